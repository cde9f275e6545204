//! Assembly of a node (driver, consensus module, transport and data collection
//! around one event bus) and of a local cluster of such nodes.

use log::{error, info};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::consensus::{ConsensusDriver, ConsensusModule, DriverStatus, SharedDriver};
use crate::error::ConsensusError;
use crate::events::{ConsensusEvent, EventBus, EventQueues};
use crate::metrics::{NodeStats, SharedStats, run_collector};
use crate::network::{LocalNetwork, run_transport};
use crate::transaction::NodeId;

/// Mechanism-independent handle on a running node.
pub trait NodeView: Send + Sync {
    fn id(&self) -> NodeId;

    fn status(&self) -> DriverStatus;

    /// Retained chain window, serialized.
    fn chain(&self) -> Result<serde_json::Value, ConsensusError>;

    fn stats(&self) -> NodeStats;

    fn is_running(&self) -> bool;

    /// Post a CreateBlock event on the node's consensus queue.
    fn request_block(&self) -> Result<(), ConsensusError>;

    /// Post a CreateTransaction event on the node's consensus queue.
    fn request_transaction(&self) -> Result<(), ConsensusError>;

    fn stop(&self);
}

pub struct Node<D: ConsensusDriver> {
    id: NodeId,
    driver: SharedDriver<D>,
    bus: EventBus<D::Proof>,
    stats: SharedStats,
    stop: Arc<watch::Sender<bool>>,
}

impl<D: ConsensusDriver> NodeView for Node<D> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn status(&self) -> DriverStatus {
        self.driver.lock().expect("mutex poisoned").status()
    }

    fn chain(&self) -> Result<serde_json::Value, ConsensusError> {
        let blocks = self.driver.lock().expect("mutex poisoned").state().chain.to_vec();
        Ok(serde_json::to_value(blocks)?)
    }

    fn stats(&self) -> NodeStats {
        self.stats.lock().expect("mutex poisoned").clone()
    }

    fn is_running(&self) -> bool {
        !*self.stop.borrow()
    }

    fn request_block(&self) -> Result<(), ConsensusError> {
        self.bus.consensus(ConsensusEvent::CreateBlock)
    }

    fn request_transaction(&self) -> Result<(), ConsensusError> {
        self.bus.consensus(ConsensusEvent::CreateTransaction)
    }

    fn stop(&self) {
        self.stop.send_replace(true);
    }
}

/// Every node of the benchmark, running in this process over a [`LocalNetwork`].
pub struct LocalCluster {
    nodes: Vec<Arc<dyn NodeView>>,
    tasks: Vec<JoinHandle<()>>,
}

impl LocalCluster {
    /// Spawn one node per id, each with the driver `factory` builds for it.
    pub fn launch<D, F>(node_ids: &[NodeId], total_blocks: u64, mut factory: F) -> Self
    where
        D: ConsensusDriver,
        F: FnMut(NodeId) -> D,
    {
        let mut network = LocalNetwork::new();
        let mut wired = Vec::with_capacity(node_ids.len());
        for &id in node_ids {
            let (bus, queues) = EventBus::new();
            network.register(id, bus.clone());
            wired.push((id, bus, queues));
        }
        let network = Arc::new(network);

        let mut nodes: Vec<Arc<dyn NodeView>> = Vec::with_capacity(wired.len());
        let mut tasks = Vec::with_capacity(wired.len() * 3);
        for (id, bus, queues) in wired {
            let EventQueues {
                communication,
                consensus,
                data_collection,
            } = queues;
            let driver = Arc::new(Mutex::new(factory(id)));
            let stats = SharedStats::default();
            let (stop, shutdown) = watch::channel(false);
            let stop = Arc::new(stop);

            let module =
                ConsensusModule::new(Arc::clone(&driver), bus.clone(), consensus, shutdown.clone());
            tasks.push(supervise(id, "consensus", module.run(), &stop));
            tasks.push(supervise(
                id,
                "transport",
                run_transport(id, communication, Arc::clone(&network), shutdown),
                &stop,
            ));
            tasks.push(supervise(
                id,
                "data collection",
                run_collector(
                    id,
                    data_collection,
                    Arc::clone(&stats),
                    total_blocks,
                    Arc::clone(&stop),
                ),
                &stop,
            ));

            nodes.push(Arc::new(Node {
                id,
                driver,
                bus,
                stats,
                stop,
            }));
        }
        info!("launched {} {} nodes", nodes.len(), D::MECHANISM);

        Self { nodes, tasks }
    }

    pub fn nodes(&self) -> &[Arc<dyn NodeView>] {
        &self.nodes
    }

    /// Resolves once every task of every node has ended.
    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("node task panicked: {e}");
            }
        }
    }
}

/// Run one task of a node; a failure is logged and stops the whole node.
fn supervise<F>(
    node_id: NodeId,
    task: &'static str,
    future: F,
    stop: &Arc<watch::Sender<bool>>,
) -> JoinHandle<()>
where
    F: Future<Output = Result<(), ConsensusError>> + Send + 'static,
{
    let stop = Arc::clone(stop);
    tokio::spawn(async move {
        if let Err(e) = future.await {
            error!("node {node_id}: {task} failed: {e}");
            stop.send_replace(true);
        }
    })
}
