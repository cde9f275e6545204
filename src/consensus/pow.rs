use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use super::{ConsensusDriver, DriverState, DriverStatus, SharedDriver};
use crate::blockchain::block::{compute_hash, hash_basis, meets_difficulty};
use crate::blockchain::{Block, GENESIS_PREVIOUS_HASH, PowBlock, PowProof};
use crate::config::Mechanism;
use crate::error::ConsensusError;
use crate::events::{CommunicationEvent, ConsensusEvent, EventBus};
use crate::transaction::{NodeId, Transaction};

/// Flags shared between the driver and a running mining pass.
#[derive(Debug)]
pub struct MiningGate {
    allowed: AtomicBool,
    restart: AtomicBool,
    wake: Notify,
}

impl Default for MiningGate {
    fn default() -> Self {
        Self {
            allowed: AtomicBool::new(true),
            restart: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }
}

impl MiningGate {
    pub fn allow(&self) {
        self.allowed.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn disable(&self) {
        self.allowed.store(false, Ordering::SeqCst);
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed.load(Ordering::SeqCst)
    }

    /// Ask the current pass to stop because its transaction set or prefix is stale.
    pub fn request_restart(&self) {
        self.restart.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    fn clear_restart(&self) {
        self.restart.store(false, Ordering::SeqCst);
    }

    /// Checked before every hash attempt.
    pub fn should_abort(&self) -> bool {
        self.restart.load(Ordering::SeqCst) || !self.allowed.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        self.wake.notified().await;
    }
}

/// One attempt at sealing the current pool on top of the current tail.
/// Runs without access to the driver; only the gate is consulted.
#[derive(Debug)]
pub struct MiningPass {
    owner_node_id: NodeId,
    previous_block_hash: String,
    transactions: Vec<Transaction>,
    basis: String,
    difficulty: usize,
    rng: StdRng,
}

impl MiningPass {
    /// Draw random nonces until one satisfies the difficulty. Returns `None` as
    /// soon as the gate asks for a restart or mining gets disabled.
    pub fn run(mut self, gate: &MiningGate) -> Option<PowBlock> {
        loop {
            if gate.should_abort() {
                return None;
            }
            let nonce = self.rng.gen_range(0..i32::MAX as u32);
            let hash = compute_hash(&self.basis, nonce);
            if meets_difficulty(&hash, self.difficulty) {
                return Some(Block::new(
                    self.owner_node_id,
                    self.transactions,
                    PowProof {
                        block_hash: hash,
                        previous_block_hash: self.previous_block_hash,
                        nonce,
                    },
                ));
            }
        }
    }
}

/// Proof-of-Work driver: competitive mining over the whole pending pool.
pub struct PowConsensus {
    state: DriverState<PowProof>,
    difficulty: usize,
    rng: StdRng,
    gate: Arc<MiningGate>,
}

impl PowConsensus {
    pub fn new(node_id: NodeId, difficulty: usize, window: usize) -> Self {
        Self {
            state: DriverState::new(node_id, window),
            difficulty,
            rng: StdRng::seed_from_u64(u64::from(node_id)),
            gate: Arc::new(MiningGate::default()),
        }
    }

    fn tail_hash(&self) -> &str {
        self.state
            .chain
            .last()
            .map(PowBlock::block_hash)
            .unwrap_or(GENESIS_PREVIOUS_HASH)
    }

    /// Snapshot the basis for a mining pass. `None` while mining is not allowed
    /// or there is nothing to mine.
    pub fn prepare_mining_pass(&mut self) -> Result<Option<MiningPass>, ConsensusError> {
        if !self.gate.is_allowed() || self.state.pool.is_empty() {
            return Ok(None);
        }
        self.gate.clear_restart();

        let previous_block_hash = self.tail_hash().to_string();
        let transactions = self.state.pool.snapshot();
        let basis = hash_basis(&previous_block_hash, &transactions)?;
        debug!(
            "node {}: mining {} txs on {}",
            self.state.node_id,
            transactions.len(),
            &previous_block_hash[..previous_block_hash.len().min(12)]
        );
        Ok(Some(MiningPass {
            owner_node_id: self.state.node_id,
            previous_block_hash,
            transactions,
            basis,
            difficulty: self.difficulty,
            rng: StdRng::seed_from_u64(self.rng.r#gen()),
        }))
    }

    /// Append a block found by a pass, unless the tail moved in the meantime.
    pub fn complete_mining_pass(&mut self, block: PowBlock) -> Option<PowBlock> {
        if block.previous_block_hash() != self.tail_hash() {
            debug!(
                "node {}: mined block is stale, discarding",
                self.state.node_id
            );
            return None;
        }
        if !self.state.add_new_block_to_chain(block.clone()) {
            return None;
        }
        info!(
            "node {}: mined block {} (nonce={})",
            self.state.node_id,
            block.block_hash(),
            block.proof.nonce
        );
        self.state.communicate(CommunicationEvent::SendBlock(block.clone()));
        Some(block)
    }

    /// Mine on the calling thread, retrying aborted passes.
    fn mine_blocking(&mut self) -> Result<Option<PowBlock>, ConsensusError> {
        loop {
            let Some(pass) = self.prepare_mining_pass()? else {
                return Ok(None);
            };
            let gate = Arc::clone(&self.gate);
            match pass.run(&gate) {
                Some(block) => return Ok(self.complete_mining_pass(block)),
                None => debug!("node {}: mining pass restarted", self.state.node_id),
            }
        }
    }

    fn validate(&self, block: &PowBlock) -> bool {
        let Some(tail) = self.state.chain.last() else {
            // genesis: nothing to link to, only the seal is checked
            return self.check_seal(block);
        };
        if block.previous_block_hash() != tail.block_hash() {
            debug!(
                "node {}: rejected block, previous hash does not match tail",
                self.state.node_id
            );
            return false;
        }
        if !self.state.pool.is_superset_of(&block.transactions) {
            debug!(
                "node {}: rejected block, it commits unseen transactions",
                self.state.node_id
            );
            return false;
        }
        self.check_seal(block)
    }

    fn check_seal(&self, block: &PowBlock) -> bool {
        if !block.is_valid(self.difficulty) {
            warn!(
                "node {}: rejected block {}, invalid proof of work",
                self.state.node_id,
                block.block_hash()
            );
            return false;
        }
        true
    }
}

impl ConsensusDriver for PowConsensus {
    type Proof = PowProof;

    const MECHANISM: Mechanism = Mechanism::Pow;

    const GOSSIPS_TRANSACTIONS: bool = true;

    fn state(&self) -> &DriverState<PowProof> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut DriverState<PowProof> {
        &mut self.state
    }

    fn receive_block(&mut self, block: PowBlock) -> bool {
        self.gate.disable();
        let accepted = self.validate(&block) && self.state.add_new_block_to_chain(block);
        if accepted {
            // the running pass is mining on a stale prefix now
            self.gate.request_restart();
        }
        self.gate.allow();
        accepted
    }

    fn receive_transaction(&mut self, tx: Transaction) -> bool {
        let added = self.state.receive_transaction(tx);
        if added {
            self.gate.request_restart();
        }
        added
    }

    fn generate_genesis_block(&mut self) -> Result<Option<PowBlock>, ConsensusError> {
        if !self.state.chain.is_empty() {
            return Ok(None);
        }
        self.mine_blocking()
    }

    fn generate_next_block(&mut self) -> Result<Option<PowBlock>, ConsensusError> {
        if self.state.chain.is_empty() {
            return self.generate_genesis_block();
        }
        self.mine_blocking()
    }

    fn start(&mut self) {
        self.gate.allow();
    }

    /// The miner runs on its own task; a request only wakes it up.
    fn create_block(&mut self) -> Result<(), ConsensusError> {
        self.gate.allow();
        Ok(())
    }

    fn receive_chain(&mut self, blocks: Vec<PowBlock>) -> usize {
        if !self.state.chain.is_empty() || blocks.is_empty() {
            return 0;
        }
        let linked = blocks
            .windows(2)
            .all(|pair| pair[1].previous_block_hash() == pair[0].block_hash());
        if !linked || !blocks.iter().all(|b| b.is_valid(self.difficulty)) {
            warn!("node {}: rejected invalid chain response", self.state.node_id);
            return 0;
        }
        let adopted = blocks
            .into_iter()
            .filter(|b| self.state.add_new_block_to_chain(b.clone()))
            .count();
        info!("node {}: adopted {} blocks from peer", self.state.node_id, adopted);
        self.gate.request_restart();
        adopted
    }

    fn status(&self) -> DriverStatus {
        let state = &self.state;
        DriverStatus {
            node_id: state.node_id,
            mechanism: Mechanism::Pow,
            chain_length: state.chain.len(),
            last_index: state.chain.last_index(),
            pool_size: state.pool.len(),
            transactions_created: state.transactions_created(),
            role: None,
            term: None,
            commit_index: None,
            last_applied: None,
            leader_id: None,
            difficulty: Some(self.difficulty),
        }
    }

    fn spawn_workers(
        driver: &SharedDriver<Self>,
        bus: &EventBus<PowProof>,
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<JoinHandle<Result<(), ConsensusError>>> {
        vec![tokio::spawn(run_mining_loop(
            Arc::clone(driver),
            bus.clone(),
            shutdown.clone(),
        ))]
    }
}

/// Mining loop: waits on the gate instead of polling, hashes on a blocking
/// thread and hands found blocks back to the driver.
pub async fn run_mining_loop(
    driver: SharedDriver<PowConsensus>,
    bus: EventBus<PowProof>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ConsensusError> {
    let (node_id, gate) = {
        let d = driver.lock().expect("mutex poisoned");
        (d.state.node_id, Arc::clone(&d.gate))
    };
    debug!("node {node_id}: mining loop started");

    while !*shutdown.borrow() {
        let pass = {
            let mut d = driver.lock().expect("mutex poisoned");
            d.prepare_mining_pass()?
        };
        let Some(pass) = pass else {
            tokio::select! {
                _ = gate.wait() => {}
                _ = shutdown.changed() => {}
            }
            continue;
        };

        let pass_gate = Arc::clone(&gate);
        let mut mining = tokio::task::spawn_blocking(move || pass.run(&pass_gate));
        let found = tokio::select! {
            found = &mut mining => found?,
            _ = shutdown.changed() => {
                gate.disable();
                mining.await?;
                break;
            }
        };

        let Some(block) = found else {
            debug!("node {node_id}: mining pass aborted, restarting");
            continue;
        };
        let (appended, outbox) = {
            let mut d = driver.lock().expect("mutex poisoned");
            let appended = d.complete_mining_pass(block).is_some();
            (appended, d.state.take_outbox())
        };
        let mut published = bus.publish_all(outbox.events);
        if appended && published.is_ok() {
            published = bus.consensus(ConsensusEvent::CreateTransaction);
        }
        if let Err(e) = published {
            if *shutdown.borrow() {
                break;
            }
            error!("node {node_id}: mining loop cannot publish: {e}");
            return Err(e);
        }
    }

    debug!("node {node_id}: mining loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{MiningGate, PowConsensus};
    use crate::blockchain::PowBlock;
    use crate::consensus::ConsensusDriver;
    use crate::events::{CommunicationEvent, Event};
    use crate::transaction::Transaction;

    fn tx(owner: u32, sequence: u64) -> Transaction {
        Transaction {
            owner_node_id: owner,
            sequence_number: sequence,
            created_at: 0,
        }
    }

    fn node_with_pool(id: u32, difficulty: usize) -> PowConsensus {
        let mut node = PowConsensus::new(id, difficulty, 10);
        node.receive_transaction(tx(2, 1));
        node.receive_transaction(tx(3, 1));
        node
    }

    fn mine(node: &mut PowConsensus) -> PowBlock {
        node.generate_next_block().unwrap().expect("block mined")
    }

    #[test]
    fn mined_block_is_accepted_by_peer_with_same_pool() {
        let mut miner = node_with_pool(1, 1);
        let block = mine(&mut miner);
        assert!(block.block_hash().starts_with('0'));
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(miner.state().chain.len(), 1);
        assert!(miner.state().pool.is_empty());

        let sent = miner.state_mut().take_outbox().events;
        assert!(sent.iter().any(|e| matches!(
            e,
            Event::Communication(CommunicationEvent::SendBlock(b)) if *b == block
        )));

        let mut peer = node_with_pool(2, 1);
        assert!(peer.receive_block(block));
        assert_eq!(peer.state().chain.len(), 1);
        assert!(peer.state().pool.is_empty());
    }

    #[test]
    fn mining_is_deterministic_for_a_seed() {
        let a = mine(&mut node_with_pool(1, 1));
        let b = mine(&mut node_with_pool(1, 1));
        assert_eq!(a.proof.nonce, b.proof.nonce);
        assert_eq!(a.block_hash(), b.block_hash());
    }

    #[test]
    fn block_with_forged_hash_is_rejected() {
        let mut miner = node_with_pool(1, 1);
        let mut block = mine(&mut miner);
        block.proof.block_hash = "deadbeef".to_string();

        let mut peer = node_with_pool(2, 1);
        let pool_before = peer.state().pool.snapshot();
        assert!(!peer.receive_block(block));
        assert!(peer.state().chain.is_empty());
        assert_eq!(peer.state().pool.snapshot(), pool_before);
        assert!(peer.gate.is_allowed());
    }

    #[test]
    fn first_block_needs_only_a_valid_seal() {
        let mut miner = node_with_pool(1, 1);
        let block = mine(&mut miner);

        // an empty peer has seen none of the committed transactions
        let mut peer = PowConsensus::new(2, 1, 10);
        assert!(peer.receive_block(block));
        assert_eq!(peer.state().chain.len(), 1);
    }

    #[test]
    fn block_must_extend_the_tail() {
        let mut miner = node_with_pool(1, 1);
        let genesis = mine(&mut miner);
        let mut peer = node_with_pool(2, 1);
        assert!(peer.receive_block(genesis.clone()));

        miner.receive_transaction(Transaction::new(4, 1));
        peer.receive_transaction(Transaction::new(4, 1));
        let mut next = mine(&mut miner);
        assert_eq!(next.previous_block_hash(), genesis.block_hash());

        let mut orphan = next.clone();
        orphan.proof.previous_block_hash = "f".repeat(64);
        assert!(!peer.receive_block(orphan));

        // replaying the genesis is a duplicate, not an extension
        assert!(!peer.receive_block(genesis));

        assert!(peer.receive_block(next.clone()));
        assert_eq!(peer.state().chain.len(), 2);

        next.created_at += 1;
        assert!(!peer.receive_block(next));
    }

    #[test]
    fn peer_must_know_every_committed_transaction() {
        let mut miner = node_with_pool(1, 1);
        let genesis = mine(&mut miner);
        let mut peer = node_with_pool(2, 1);
        assert!(peer.receive_block(genesis));

        miner.receive_transaction(Transaction::new(4, 1));
        miner.receive_transaction(Transaction::new(5, 1));
        peer.receive_transaction(Transaction::new(4, 1));
        let block = mine(&mut miner);
        assert!(!peer.receive_block(block.clone()));

        // knowing more than the block commits is fine
        peer.receive_transaction(Transaction::new(5, 1));
        peer.receive_transaction(Transaction::new(6, 1));
        assert!(peer.receive_block(block));
        assert_eq!(peer.state().pool.snapshot(), vec![Transaction::new(6, 1)]);
    }

    #[test]
    fn new_transaction_requests_restart() {
        let mut node = PowConsensus::new(1, 1, 10);
        assert!(!node.gate.should_abort());
        node.receive_transaction(Transaction::new(2, 1));
        assert!(node.gate.should_abort());

        // a repeated transaction changes nothing
        let pass = node.prepare_mining_pass().unwrap().expect("pass");
        assert!(!node.gate.should_abort());
        node.receive_transaction(Transaction::new(2, 1));
        assert!(!node.gate.should_abort());
        assert!(pass.run(&node.gate).is_some());
    }

    #[test]
    fn aborted_pass_returns_nothing() {
        let mut node = PowConsensus::new(1, 64, 10);
        node.receive_transaction(Transaction::new(2, 1));
        let pass = node.prepare_mining_pass().unwrap().expect("pass");
        node.gate.disable();
        assert!(pass.run(&node.gate).is_none());
        assert!(node.prepare_mining_pass().unwrap().is_none());
    }

    #[test]
    fn nothing_to_mine_without_transactions() {
        let mut node = PowConsensus::new(1, 1, 10);
        assert!(node.generate_next_block().unwrap().is_none());
        let gate = MiningGate::default();
        assert!(gate.is_allowed());
    }

    #[test]
    fn stale_solution_is_discarded() {
        let mut node = node_with_pool(1, 1);
        let pass = node.prepare_mining_pass().unwrap().expect("pass");
        let solution = pass.run(&node.gate).expect("solution");

        let mut other = node_with_pool(3, 1);
        let competing = mine(&mut other);
        assert!(node.receive_block(competing));

        assert!(node.complete_mining_pass(solution).is_none());
        assert_eq!(node.state().chain.len(), 1);
    }

    #[test]
    fn chain_response_is_adopted_only_when_empty() {
        let mut miner = node_with_pool(1, 1);
        let genesis = mine(&mut miner);
        miner.receive_transaction(Transaction::new(4, 1));
        mine(&mut miner);
        let blocks = miner.state().chain.to_vec();

        let mut fresh = PowConsensus::new(5, 1, 10);
        assert_eq!(fresh.receive_chain(blocks.clone()), 2);
        assert_eq!(fresh.state().chain.last().map(|b| b.block_hash().to_string()),
            blocks.last().map(|b| b.block_hash().to_string()));

        let mut tampered = blocks.clone();
        tampered[1].proof.previous_block_hash = "0".repeat(64);
        assert_eq!(PowConsensus::new(6, 1, 10).receive_chain(tampered), 0);

        let mut busy = node_with_pool(7, 1);
        assert!(busy.receive_block(genesis));
        assert_eq!(busy.receive_chain(blocks), 0);
    }
}
