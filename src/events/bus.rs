use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::{CommunicationEvent, ConsensusEvent, DataCollectionEvent, Event};
use crate::error::ConsensusError;

/// Producer side of a node's event queues. Every family gets its own unbounded
/// FIFO, so an event nobody consumes yet never holds up the other consumers.
pub struct EventBus<P> {
    communication: UnboundedSender<CommunicationEvent<P>>,
    consensus: UnboundedSender<ConsensusEvent<P>>,
    data_collection: UnboundedSender<DataCollectionEvent>,
}

/// Consumer side, handed out once to the three consumers of a node.
pub struct EventQueues<P> {
    pub communication: UnboundedReceiver<CommunicationEvent<P>>,
    pub consensus: UnboundedReceiver<ConsensusEvent<P>>,
    pub data_collection: UnboundedReceiver<DataCollectionEvent>,
}

impl<P> Clone for EventBus<P> {
    fn clone(&self) -> Self {
        Self {
            communication: self.communication.clone(),
            consensus: self.consensus.clone(),
            data_collection: self.data_collection.clone(),
        }
    }
}

impl<P> EventBus<P> {
    pub fn new() -> (Self, EventQueues<P>) {
        let (communication_tx, communication_rx) = mpsc::unbounded_channel();
        let (consensus_tx, consensus_rx) = mpsc::unbounded_channel();
        let (data_tx, data_rx) = mpsc::unbounded_channel();
        (
            Self {
                communication: communication_tx,
                consensus: consensus_tx,
                data_collection: data_tx,
            },
            EventQueues {
                communication: communication_rx,
                consensus: consensus_rx,
                data_collection: data_rx,
            },
        )
    }

    /// Route an event to the queue of its family.
    pub fn publish(&self, event: Event<P>) -> Result<(), ConsensusError> {
        let family = event.family();
        let sent = match event {
            Event::Communication(e) => self.communication.send(e).is_ok(),
            Event::Consensus(e) => self.consensus.send(e).is_ok(),
            Event::DataCollection(e) => self.data_collection.send(e).is_ok(),
        };
        if sent {
            Ok(())
        } else {
            Err(ConsensusError::ChannelClosed { family })
        }
    }

    pub fn publish_all(
        &self,
        events: impl IntoIterator<Item = Event<P>>,
    ) -> Result<(), ConsensusError> {
        events.into_iter().try_for_each(|event| self.publish(event))
    }

    pub fn consensus(&self, event: ConsensusEvent<P>) -> Result<(), ConsensusError> {
        self.publish(Event::Consensus(event))
    }
}
