pub mod bus;

pub use bus::{EventBus, EventQueues};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::blockchain::Block;
use crate::consensus::raft::{AppendEntry, HeartbeatResponse, RaftEvent, VoteRequest, VoteResponse};
use crate::transaction::{NodeId, Transaction};

/// The consumer an event is addressed to. Each family has its own queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventFamily {
    Communication,
    Consensus,
    DataCollection,
}

impl fmt::Display for EventFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventFamily::Communication => f.write_str("communication"),
            EventFamily::Consensus => f.write_str("consensus"),
            EventFamily::DataCollection => f.write_str("data-collection"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event<P> {
    Communication(CommunicationEvent<P>),
    Consensus(ConsensusEvent<P>),
    DataCollection(DataCollectionEvent),
}

impl<P> Event<P> {
    pub fn family(&self) -> EventFamily {
        match self {
            Event::Communication(_) => EventFamily::Communication,
            Event::Consensus(_) => EventFamily::Consensus,
            Event::DataCollection(_) => EventFamily::DataCollection,
        }
    }
}

/// Outbound work for the transport.
#[derive(Debug, Clone)]
pub enum CommunicationEvent<P> {
    SendBlock(Block<P>),
    /// `to: None` broadcasts to every peer.
    SendTransaction {
        transaction: Transaction,
        to: Option<NodeId>,
    },
    RequestVote(VoteRequest),
    CastVote {
        to: NodeId,
        response: VoteResponse,
    },
    RequestHeartbeat {
        to: NodeId,
        request: AppendEntry,
    },
    ReceiveHeartbeat {
        to: NodeId,
        response: HeartbeatResponse,
    },
    RequestChain {
        from: NodeId,
    },
    SendChain {
        to: NodeId,
        blocks: Vec<Block<P>>,
    },
}

/// Work for the consensus module, either delivered by the transport or posted locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConsensusEvent<P> {
    CreateBlock,
    ReceiveBlock(Block<P>),
    CreateTransaction,
    ReceiveTransaction(Transaction),
    ChainRequest { requester: NodeId },
    ChainResponse(Vec<Block<P>>),
    Raft(RaftEvent),
}

impl<P> ConsensusEvent<P> {
    pub fn name(&self) -> &'static str {
        match self {
            ConsensusEvent::CreateBlock => "CreateBlock",
            ConsensusEvent::ReceiveBlock(_) => "ReceiveBlock",
            ConsensusEvent::CreateTransaction => "CreateTransaction",
            ConsensusEvent::ReceiveTransaction(_) => "ReceiveTransaction",
            ConsensusEvent::ChainRequest { .. } => "ChainRequest",
            ConsensusEvent::ChainResponse(_) => "ChainResponse",
            ConsensusEvent::Raft(event) => event.name(),
        }
    }

    /// Vote or heartbeat traffic; an election is not started while one is queued.
    pub fn is_raft_rpc(&self) -> bool {
        matches!(self, ConsensusEvent::Raft(event) if event.is_rpc())
    }
}

/// Counters for the data collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCollectionEvent {
    IncrementBlock,
    IncrementTransaction,
}
