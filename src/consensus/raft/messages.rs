use serde::{Deserialize, Serialize};

use crate::blockchain::RaftBlock;
use crate::transaction::{NodeId, Transaction};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub candidate_id: NodeId,
    pub candidate_term: u64,
    pub latest_index: Option<u64>,
    pub latest_term: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub voter_id: NodeId,
    pub term: u64,
    pub granted: bool,
}

/// AppendEntry RPC; a pure heartbeat when `entry` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendEntry {
    pub term: u64,
    pub leader_id: NodeId,
    pub prev_log_index: Option<u64>,
    /// `None` when the leader no longer retains the entry at `prev_log_index`.
    pub prev_log_term: Option<u64>,
    pub entry: Option<RaftBlock>,
    pub leader_commit: Option<u64>,
}

impl AppendEntry {
    /// Absolute log index `entry` is meant for.
    pub fn entry_index(&self) -> u64 {
        self.prev_log_index.map_or(0, |prev| prev + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub follower_id: NodeId,
    pub term: u64,
    /// `Some(true)` when the follower's log now holds the carried entry,
    /// `Some(false)` when the leader must retry from an earlier index,
    /// `None` for a pure heartbeat.
    pub added_entry: Option<bool>,
    pub success: bool,
    /// Highest index the follower knows to match the leader's log.
    pub match_index: Option<u64>,
    /// Fresh transaction piggybacked for the leader's next block.
    pub transaction: Option<Transaction>,
}

/// Raft traffic and timer firings, as seen by the consensus module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RaftEvent {
    RequestVote(VoteRequest),
    VoteResponse(VoteResponse),
    AppendEntry(AppendEntry),
    HeartbeatResponse(HeartbeatResponse),
    ElectionTimeout { generation: u64 },
    HeartbeatTimeout { generation: u64 },
}

impl RaftEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RaftEvent::RequestVote(_) => "RequestVote",
            RaftEvent::VoteResponse(_) => "VoteResponse",
            RaftEvent::AppendEntry(_) => "AppendEntry",
            RaftEvent::HeartbeatResponse(_) => "HeartbeatResponse",
            RaftEvent::ElectionTimeout { .. } => "ElectionTimeout",
            RaftEvent::HeartbeatTimeout { .. } => "HeartbeatTimeout",
        }
    }

    pub fn is_rpc(&self) -> bool {
        !matches!(
            self,
            RaftEvent::ElectionTimeout { .. } | RaftEvent::HeartbeatTimeout { .. }
        )
    }
}
