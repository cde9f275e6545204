//! In-process transport: every node's communication queue is drained by a
//! transport task that routes each message to its recipients' consensus queues.

pub mod wire;

pub use wire::Envelope;

use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;

use crate::blockchain::Proof;
use crate::consensus::raft::RaftEvent;
use crate::error::ConsensusError;
use crate::events::{CommunicationEvent, ConsensusEvent, EventBus};
use crate::transaction::NodeId;

/// Who a message goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipients {
    /// Every node except the sender.
    Broadcast,
    Node(NodeId),
}

/// Translate an outbound message into the event its recipients handle.
pub fn route<P>(message: CommunicationEvent<P>) -> (Recipients, ConsensusEvent<P>) {
    use CommunicationEvent as C;
    match message {
        C::SendBlock(block) => (Recipients::Broadcast, ConsensusEvent::ReceiveBlock(block)),
        C::SendTransaction { transaction, to } => (
            to.map_or(Recipients::Broadcast, Recipients::Node),
            ConsensusEvent::ReceiveTransaction(transaction),
        ),
        C::RequestVote(request) => (
            Recipients::Broadcast,
            ConsensusEvent::Raft(RaftEvent::RequestVote(request)),
        ),
        C::CastVote { to, response } => (
            Recipients::Node(to),
            ConsensusEvent::Raft(RaftEvent::VoteResponse(response)),
        ),
        C::RequestHeartbeat { to, request } => (
            Recipients::Node(to),
            ConsensusEvent::Raft(RaftEvent::AppendEntry(request)),
        ),
        C::ReceiveHeartbeat { to, response } => (
            Recipients::Node(to),
            ConsensusEvent::Raft(RaftEvent::HeartbeatResponse(response)),
        ),
        C::RequestChain { from } => (
            Recipients::Broadcast,
            ConsensusEvent::ChainRequest { requester: from },
        ),
        C::SendChain { to, blocks } => (Recipients::Node(to), ConsensusEvent::ChainResponse(blocks)),
    }
}

/// Address book of the local cluster.
pub struct LocalNetwork<P> {
    routes: BTreeMap<NodeId, EventBus<P>>,
}

impl<P: Proof> LocalNetwork<P> {
    pub fn new() -> Self {
        Self {
            routes: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, node_id: NodeId, bus: EventBus<P>) {
        self.routes.insert(node_id, bus);
    }

    /// Encode a message once and hand the frame to every recipient.
    pub fn send(&self, from: NodeId, message: CommunicationEvent<P>) -> Result<(), ConsensusError> {
        let (recipients, event) = route(message);
        let frame = wire::encode(&Envelope { from, event })?;
        match recipients {
            Recipients::Broadcast => {
                for &to in self.routes.keys().filter(|&&id| id != from) {
                    self.deliver(from, to, &frame)?;
                }
                Ok(())
            }
            Recipients::Node(to) => self.deliver(from, to, &frame),
        }
    }

    /// Decode a received frame and post it on the recipient's consensus queue.
    /// A frame that does not decode is fatal; a stopped recipient is not.
    pub fn deliver(&self, from: NodeId, to: NodeId, frame: &[u8]) -> Result<(), ConsensusError> {
        let Some(bus) = self.routes.get(&to) else {
            warn!("node {from}: no route to node {to}, dropping message");
            return Ok(());
        };
        let envelope: Envelope<P> = wire::decode(from, frame)?;
        if bus.consensus(envelope.event).is_err() {
            debug!("node {from}: node {to} has stopped, dropping message");
        }
        Ok(())
    }
}

impl<P: Proof> Default for LocalNetwork<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport task of one node.
pub async fn run_transport<P: Proof>(
    node_id: NodeId,
    mut outbound: UnboundedReceiver<CommunicationEvent<P>>,
    network: Arc<LocalNetwork<P>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ConsensusError> {
    debug!("node {node_id}: transport started");
    loop {
        tokio::select! {
            biased;
            message = outbound.recv() => match message {
                Some(message) => network.send(node_id, message)?,
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    debug!("node {node_id}: transport stopped");
    Ok(())
}
