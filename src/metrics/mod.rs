use chrono::Utc;
use log::{debug, info};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;

use crate::error::ConsensusError;
use crate::events::DataCollectionEvent;
use crate::transaction::NodeId;

/// Benchmark counters of one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeStats {
    pub blocks: u64,
    pub transactions: u64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl NodeStats {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn elapsed_ms(&self) -> Option<i64> {
        let started = self.started_at?;
        let until = self.finished_at.unwrap_or_else(|| Utc::now().timestamp_millis());
        Some((until - started).max(0))
    }

    pub fn blocks_per_second(&self) -> Option<f64> {
        match self.elapsed_ms()? {
            0 => None,
            ms => Some(self.blocks as f64 * 1000.0 / ms as f64),
        }
    }
}

pub type SharedStats = Arc<Mutex<NodeStats>>;

/// Data collection task of one node. Flips the node's keep-running flag once
/// `total_blocks` blocks were appended; `0` disables the threshold.
pub async fn run_collector(
    node_id: NodeId,
    mut events: UnboundedReceiver<DataCollectionEvent>,
    stats: SharedStats,
    total_blocks: u64,
    stop: Arc<watch::Sender<bool>>,
) -> Result<(), ConsensusError> {
    stats.lock().expect("mutex poisoned").started_at = Some(Utc::now().timestamp_millis());
    let mut shutdown = stop.subscribe();

    while !*shutdown.borrow() {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let mut s = stats.lock().expect("mutex poisoned");
        match event {
            DataCollectionEvent::IncrementBlock => s.blocks += 1,
            DataCollectionEvent::IncrementTransaction => s.transactions += 1,
        }
        if total_blocks > 0 && s.blocks >= total_blocks && !s.is_finished() {
            s.finished_at = Some(Utc::now().timestamp_millis());
            info!(
                "node {node_id}: reached {} blocks ({} transactions) in {} ms",
                s.blocks,
                s.transactions,
                s.elapsed_ms().unwrap_or_default()
            );
            drop(s);
            stop.send_replace(true);
            break;
        }
    }

    debug!("node {node_id}: data collection stopped");
    Ok(())
}
