pub mod module;
pub mod pow;
pub mod raft;
pub mod timer;

pub use module::ConsensusModule;
pub use pow::PowConsensus;
pub use raft::RaftConsensus;

use log::{debug, info};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::blockchain::{Block, Chain, Proof};
use crate::config::Mechanism;
use crate::error::ConsensusError;
use crate::events::{CommunicationEvent, DataCollectionEvent, Event, EventBus};
use crate::transaction::{NodeId, Transaction, TransactionPool};
use raft::RaftEvent;
use timer::TimerCommand;

/// A driver shared between the event loop and its workers (the PoW miner).
pub type SharedDriver<D> = Arc<Mutex<D>>;

/// Side effects a driver produced while handling one event.
#[derive(Debug)]
pub struct Outbox<P> {
    pub events: Vec<Event<P>>,
    pub timers: Vec<TimerCommand>,
}

impl<P> Default for Outbox<P> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            timers: Vec::new(),
        }
    }
}

/// State every driver has: the chain window, the pending pool and the local
/// transaction counter.
#[derive(Debug)]
pub struct DriverState<P> {
    pub node_id: NodeId,
    pub chain: Chain<P>,
    pub pool: TransactionPool,
    sequence: u64,
    outbox: Outbox<P>,
}

impl<P: Proof> DriverState<P> {
    pub fn new(node_id: NodeId, window: usize) -> Self {
        Self {
            node_id,
            chain: Chain::new(window),
            pool: TransactionPool::new(),
            sequence: 0,
            outbox: Outbox::default(),
        }
    }

    /// The only path that appends to the chain. Skips blocks already present,
    /// evicts beyond the window and drops the block's transactions from the pool.
    pub fn add_new_block_to_chain(&mut self, block: Block<P>) -> bool {
        if self.chain.contains(&block) {
            debug!("node {}: block already in chain, skipping", self.node_id);
            return false;
        }
        self.pool.remove_all(&block.transactions);
        let txs = block.transactions.len();
        self.chain.push(block);
        info!(
            "node {}: appended block #{} ({} txs, pool={})",
            self.node_id,
            self.chain.next_index() - 1,
            txs,
            self.pool.len()
        );
        self.emit(Event::DataCollection(DataCollectionEvent::IncrementBlock));
        true
    }

    /// Add a transaction to the pool unless it is already pending.
    pub fn receive_transaction(&mut self, tx: Transaction) -> bool {
        self.pool.insert(tx)
    }

    /// Stamp a new local transaction with the next sequence number.
    pub fn next_transaction(&mut self) -> Transaction {
        self.sequence += 1;
        self.emit(Event::DataCollection(DataCollectionEvent::IncrementTransaction));
        Transaction::new(self.node_id, self.sequence)
    }

    pub fn transactions_created(&self) -> u64 {
        self.sequence
    }

    pub fn emit(&mut self, event: Event<P>) {
        self.outbox.events.push(event);
    }

    pub fn communicate(&mut self, event: CommunicationEvent<P>) {
        self.emit(Event::Communication(event));
    }

    pub fn schedule(&mut self, command: TimerCommand) {
        self.outbox.timers.push(command);
    }

    pub fn take_outbox(&mut self) -> Outbox<P> {
        std::mem::take(&mut self.outbox)
    }
}

/// Snapshot of a driver for observation.
#[derive(Debug, Clone, Serialize)]
pub struct DriverStatus {
    pub node_id: NodeId,
    pub mechanism: Mechanism,
    pub chain_length: usize,
    pub last_index: Option<u64>,
    pub pool_size: usize,
    pub transactions_created: u64,
    pub role: Option<String>,
    pub term: Option<u64>,
    pub commit_index: Option<u64>,
    pub last_applied: Option<u64>,
    pub leader_id: Option<NodeId>,
    pub difficulty: Option<usize>,
}

/// A consensus mechanism plugged into a node.
///
/// Drivers are plain state machines: they never block or do I/O. Everything they
/// want to happen outside (messages, counters, timers) goes through the outbox
/// of their [`DriverState`], which the [`ConsensusModule`] drains after each event.
pub trait ConsensusDriver: Send + 'static {
    type Proof: Proof;

    const MECHANISM: Mechanism;

    /// Stamp and gossip a fresh local transaction at start and after every
    /// appended block, keeping the pool fed for the next round.
    const GOSSIPS_TRANSACTIONS: bool = false;

    fn state(&self) -> &DriverState<Self::Proof>;

    fn state_mut(&mut self) -> &mut DriverState<Self::Proof>;

    /// Validate a block produced elsewhere and append it if acceptable.
    /// Invalid input is rejected with `false`, never with an error.
    fn receive_block(&mut self, block: Block<Self::Proof>) -> bool;

    /// Add a transaction to the pool; idempotent.
    fn receive_transaction(&mut self, tx: Transaction) -> bool {
        self.state_mut().receive_transaction(tx)
    }

    /// First block of an empty chain. `None` when the chain already has blocks
    /// or the driver cannot produce one right now.
    fn generate_genesis_block(&mut self) -> Result<Option<Block<Self::Proof>>, ConsensusError>;

    /// Next block built from the pending pool.
    fn generate_next_block(&mut self) -> Result<Option<Block<Self::Proof>>, ConsensusError>;

    fn generate_next_transaction(&mut self) -> Transaction {
        self.state_mut().next_transaction()
    }

    /// Called once by the module before the first event.
    fn start(&mut self) {}

    /// Handle an explicit block-creation request.
    fn create_block(&mut self) -> Result<(), ConsensusError> {
        self.generate_next_block().map(|_| ())
    }

    /// Stamp a local transaction, keep it and gossip it to the peers.
    fn create_transaction(&mut self) {
        let tx = self.generate_next_transaction();
        self.receive_transaction(tx.clone());
        self.state_mut()
            .communicate(CommunicationEvent::SendTransaction {
                transaction: tx,
                to: None,
            });
    }

    fn answer_chain_request(&mut self, requester: NodeId) {
        let state = self.state_mut();
        if requester == state.node_id || state.chain.is_empty() {
            return;
        }
        let blocks = state.chain.to_vec();
        state.communicate(CommunicationEvent::SendChain {
            to: requester,
            blocks,
        });
    }

    /// Adopt a peer's chain window. Returns how many blocks were appended.
    fn receive_chain(&mut self, blocks: Vec<Block<Self::Proof>>) -> usize {
        debug!(
            "node {}: ignoring chain response with {} blocks",
            self.state().node_id,
            blocks.len()
        );
        0
    }

    fn handle_raft(&mut self, event: RaftEvent, _rpc_pending: bool) -> Result<(), ConsensusError> {
        Err(ConsensusError::UnsupportedEvent {
            event: event.name(),
            mechanism: Self::MECHANISM,
        })
    }

    fn status(&self) -> DriverStatus {
        let state = self.state();
        DriverStatus {
            node_id: state.node_id,
            mechanism: Self::MECHANISM,
            chain_length: state.chain.len(),
            last_index: state.chain.last_index(),
            pool_size: state.pool.len(),
            transactions_created: state.transactions_created(),
            role: None,
            term: None,
            commit_index: None,
            last_applied: None,
            leader_id: None,
            difficulty: None,
        }
    }

    /// Background tasks the mechanism needs next to the event loop.
    fn spawn_workers(
        _driver: &SharedDriver<Self>,
        _bus: &EventBus<Self::Proof>,
        _shutdown: &watch::Receiver<bool>,
    ) -> Vec<JoinHandle<Result<(), ConsensusError>>>
    where
        Self: Sized,
    {
        Vec::new()
    }
}
