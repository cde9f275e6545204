use serde::Serialize;
use std::sync::Arc;

use crate::config::Mechanism;
use crate::consensus::DriverStatus;
use crate::error::ConsensusError;
use crate::metrics::NodeStats;
use crate::node::NodeView;
use crate::transaction::NodeId;

/// Shared application state: read handles on every node of the local cluster.
pub struct AppState {
    pub mechanism: Mechanism,
    pub nodes: Vec<Arc<dyn NodeView>>,
}

impl AppState {
    pub fn new(mechanism: Mechanism, nodes: Vec<Arc<dyn NodeView>>) -> Self {
        Self { mechanism, nodes }
    }

    pub fn node(&self, id: NodeId) -> Result<&Arc<dyn NodeView>, ConsensusError> {
        self.nodes
            .iter()
            .find(|node| node.id() == id)
            .ok_or(ConsensusError::UnknownNode(id))
    }
}

/* ---------- Node API Models ---------- */

#[derive(Serialize)]
pub struct NodeResponse {
    #[serde(flatten)]
    pub status: DriverStatus,
    pub running: bool,
}

#[derive(Serialize)]
pub struct NodesResponse {
    pub mechanism: Mechanism,
    pub nodes: Vec<NodeResponse>,
}

/* ---------- Chain API Models ---------- */

#[derive(Serialize)]
pub struct ChainResponse {
    pub node_id: NodeId,
    pub length: usize,
    pub last_index: Option<u64>,
    pub chain: serde_json::Value,
}

#[derive(Serialize)]
pub struct RequestedResponse {
    pub node_id: NodeId,
    pub event: &'static str,
}

/* ---------- Stats API Models ---------- */

#[derive(Serialize)]
pub struct NodeStatsResponse {
    pub node_id: NodeId,
    #[serde(flatten)]
    pub stats: NodeStats,
    pub elapsed_ms: Option<i64>,
    pub blocks_per_second: Option<f64>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub mechanism: Mechanism,
    pub network_size: usize,
    pub finished_nodes: usize,
    pub nodes: Vec<NodeStatsResponse>,
}
