use thiserror::Error;

use crate::config::Mechanism;
use crate::events::EventFamily;
use crate::transaction::NodeId;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Invalid config: {0}")]
    Config(String),

    #[error("{family} queue is closed")]
    ChannelClosed { family: EventFamily },

    #[error("{event} is not supported by the {mechanism} driver")]
    UnsupportedEvent {
        event: &'static str,
        mechanism: Mechanism,
    },

    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode message from node {from}: {source}")]
    Decode {
        from: NodeId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),
}
