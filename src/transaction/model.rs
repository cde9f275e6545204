use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifier of a node taking part in the benchmark.
pub type NodeId = u32;

/// A unit of work produced by a node. Identity is `(owner_node_id, sequence_number)`;
/// the timestamp is informational only.
#[derive(Debug, Clone, Serialize, Deserialize, Eq)]
pub struct Transaction {
    pub owner_node_id: NodeId,
    pub sequence_number: u64,
    pub created_at: i64, // Unix millis (UTC)
}

impl Transaction {
    pub fn new(owner_node_id: NodeId, sequence_number: u64) -> Self {
        Self {
            owner_node_id,
            sequence_number,
            created_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn key(&self) -> (NodeId, u64) {
        (self.owner_node_id, self.sequence_number)
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.owner_node_id == other.owner_node_id && self.sequence_number == other.sequence_number
    }
}

impl Hash for Transaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner_node_id.hash(state);
        self.sequence_number.hash(state);
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx({},{})", self.owner_node_id, self.sequence_number)
    }
}
