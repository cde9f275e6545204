//! Raft leader election and log replication over the bounded chain window.
//!
//! The driver never touches timers or sockets directly: it asks for timer
//! changes through [`TimerCommand`]s and answers RPCs through communication
//! events. Timer firings come back as [`RaftEvent`]s carrying the generation
//! they were armed with, so a firing from a timer that was since restarted or
//! stopped is recognised and dropped.

pub mod messages;
pub mod peers;

pub use messages::{AppendEntry, HeartbeatResponse, RaftEvent, VoteRequest, VoteResponse};
pub use peers::{PeerRecord, PeerTable};

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::time::Duration;

use super::timer::TimerCommand;
use super::{ConsensusDriver, DriverState, DriverStatus};
use crate::blockchain::{Block, RaftBlock, RaftProof};
use crate::config::Mechanism;
use crate::error::ConsensusError;
use crate::events::CommunicationEvent;
use crate::transaction::{NodeId, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follower => f.write_str("follower"),
            Role::Candidate => f.write_str("candidate"),
            Role::Leader => f.write_str("leader"),
        }
    }
}

pub struct RaftConsensus {
    state: DriverState<RaftProof>,
    role: Role,
    current_term: u64,
    voted_for: Option<NodeId>,
    commit_index: Option<u64>,
    last_applied: Option<u64>,
    leader_id: Option<NodeId>,
    /// Cluster size, this node included.
    peer_count: usize,
    peers: PeerTable,
    votes: usize,
    max_election_timeout: Duration,
    rng: StdRng,
    election_generation: u64,
    heartbeat_generation: u64,
    heartbeat_running: bool,
    /// Transaction handed to the leader of a term and not yet seen in an appended entry.
    contribution: Option<(u64, Transaction)>,
}

impl RaftConsensus {
    pub fn new(
        node_id: NodeId,
        cluster: &[NodeId],
        max_election_timeout: Duration,
        window: usize,
    ) -> Self {
        let others: Vec<NodeId> = cluster.iter().copied().filter(|&id| id != node_id).collect();
        Self {
            state: DriverState::new(node_id, window),
            role: Role::Follower,
            current_term: 0,
            voted_for: None,
            commit_index: None,
            last_applied: None,
            leader_id: None,
            peer_count: others.len() + 1,
            peers: PeerTable::new(&others),
            votes: 0,
            max_election_timeout,
            rng: StdRng::seed_from_u64(u64::from(node_id)),
            election_generation: 0,
            heartbeat_generation: 0,
            heartbeat_running: false,
            contribution: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn election_generation(&self) -> u64 {
        self.election_generation
    }

    fn node_id(&self) -> NodeId {
        self.state.node_id
    }

    fn last_log_term(&self) -> Option<u64> {
        self.state.chain.last().map(RaftBlock::election_term)
    }

    fn has_quorum(&self, votes: usize) -> bool {
        votes * 2 > self.peer_count
    }

    /* ---------- timers ---------- */

    fn restart_election_timer(&mut self) {
        let max = (self.max_election_timeout.as_millis() as u64).max(2);
        let timeout = Duration::from_millis(self.rng.gen_range(max / 2..max));
        self.election_generation += 1;
        self.state.schedule(TimerCommand::RestartElection {
            timeout,
            generation: self.election_generation,
        });
    }

    fn stop_election_timer(&mut self) {
        self.election_generation += 1;
        self.state.schedule(TimerCommand::StopElection);
    }

    fn start_heartbeat_timer(&mut self) {
        self.heartbeat_generation += 1;
        self.heartbeat_running = true;
        self.state.schedule(TimerCommand::StartHeartbeat {
            period: self.max_election_timeout / 4,
            generation: self.heartbeat_generation,
        });
    }

    fn stop_heartbeat_timer(&mut self) {
        if self.heartbeat_running {
            self.heartbeat_generation += 1;
            self.heartbeat_running = false;
            self.state.schedule(TimerCommand::StopHeartbeat);
        }
    }

    /* ---------- transitions ---------- */

    fn start_election(&mut self) {
        self.current_term += 1;
        self.role = Role::Candidate;
        self.voted_for = Some(self.node_id());
        self.votes = 1;
        self.leader_id = None;
        self.peers.reset(self.state.chain.next_index());
        info!(
            "node {}: starting election for term {}",
            self.node_id(),
            self.current_term
        );
        self.restart_election_timer();

        let request = VoteRequest {
            candidate_id: self.node_id(),
            candidate_term: self.current_term,
            latest_index: self.state.chain.last_index(),
            latest_term: self.last_log_term(),
        };
        self.state.communicate(CommunicationEvent::RequestVote(request));

        if self.has_quorum(self.votes) {
            self.become_leader();
        }
    }

    fn become_leader(&mut self) {
        self.role = Role::Leader;
        self.leader_id = Some(self.node_id());
        self.peers.reset(self.state.chain.next_index());
        // followers re-contribute to every new term
        let leftover = self.state.pool.len();
        if leftover > 0 {
            debug!(
                "node {}: dropping {} transactions pooled before term {}",
                self.node_id(),
                leftover,
                self.current_term
            );
            self.state.pool.clear();
        }
        self.stop_election_timer();
        self.start_heartbeat_timer();
        info!(
            "node {}: became leader for term {} with {} votes",
            self.node_id(),
            self.current_term,
            self.votes
        );
        for peer_id in self.peers.ids() {
            self.replicate_to(peer_id);
        }
    }

    fn transition_to_follower(&mut self, term: u64) {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            self.leader_id = None;
        }
        let previous = self.role;
        self.role = Role::Follower;
        self.votes = 0;
        self.stop_heartbeat_timer();
        if previous != Role::Follower {
            info!(
                "node {}: {} -> follower in term {}",
                self.node_id(),
                previous,
                self.current_term
            );
        }
        if previous == Role::Leader {
            // leaders run no election timer
            self.restart_election_timer();
        }
    }

    /* ---------- timer firings ---------- */

    pub fn on_election_timeout(&mut self, generation: u64, rpc_pending: bool) {
        if generation != self.election_generation || self.role == Role::Leader {
            debug!("node {}: ignoring stale election timeout", self.node_id());
            return;
        }
        if rpc_pending {
            debug!(
                "node {}: election timeout with vote/heartbeat queued, postponing",
                self.node_id()
            );
            self.restart_election_timer();
            return;
        }
        self.start_election();
    }

    pub fn on_heartbeat_timeout(&mut self, generation: u64) {
        if generation != self.heartbeat_generation || self.role != Role::Leader {
            debug!("node {}: ignoring stale heartbeat timeout", self.node_id());
            return;
        }
        // one contribution per follower since the last cut
        if self.state.pool.len() >= self.peer_count - 1 {
            self.cut_block();
            self.advance_commit();
        }
        for peer_id in self.peers.ids() {
            self.replicate_to(peer_id);
        }
    }

    /* ---------- RequestVote ---------- */

    pub fn on_request_vote(&mut self, request: VoteRequest) {
        if request.candidate_term > self.current_term {
            self.transition_to_follower(request.candidate_term);
        }
        let log_ok = request.latest_index >= self.state.chain.last_index();
        let granted = self.role != Role::Leader
            && request.candidate_term >= self.current_term
            && self
                .voted_for
                .is_none_or(|voted| voted == request.candidate_id)
            && log_ok;

        if granted {
            self.voted_for = Some(request.candidate_id);
            self.restart_election_timer();
            debug!(
                "node {}: voted for {} in term {}",
                self.node_id(),
                request.candidate_id,
                self.current_term
            );
        } else {
            debug!(
                "node {}: refused vote to {} (term {}, voted for {:?})",
                self.node_id(),
                request.candidate_id,
                request.candidate_term,
                self.voted_for
            );
        }

        let response = VoteResponse {
            voter_id: self.node_id(),
            term: self.current_term,
            granted,
        };
        self.state.communicate(CommunicationEvent::CastVote {
            to: request.candidate_id,
            response,
        });
    }

    pub fn on_vote_response(&mut self, response: VoteResponse) {
        if response.term > self.current_term {
            self.transition_to_follower(response.term);
            return;
        }
        if self.role != Role::Candidate || response.term != self.current_term || !response.granted
        {
            return;
        }
        if !self.peers.grant_vote(response.voter_id) {
            return;
        }
        self.votes += 1;
        if self.has_quorum(self.votes) {
            self.become_leader();
        }
    }

    /* ---------- AppendEntry, leader side ---------- */

    fn append_entry_for(&self, peer: &PeerRecord) -> AppendEntry {
        let chain = &self.state.chain;
        let next = peer.next_index.max(chain.first_index());
        let prev_log_index = next.checked_sub(1);
        AppendEntry {
            term: self.current_term,
            leader_id: self.node_id(),
            prev_log_index,
            prev_log_term: prev_log_index
                .and_then(|prev| chain.get(prev))
                .map(RaftBlock::election_term),
            entry: chain.get(next).cloned(),
            leader_commit: self.commit_index,
        }
    }

    fn replicate_to(&mut self, peer_id: NodeId) {
        let Some(peer) = self.peers.get(peer_id) else {
            return;
        };
        let request = self.append_entry_for(peer);
        self.state.communicate(CommunicationEvent::RequestHeartbeat {
            to: peer_id,
            request,
        });
    }

    fn cut_block(&mut self) -> Option<RaftBlock> {
        if self.role != Role::Leader {
            return None;
        }
        let block = Block::new(
            self.node_id(),
            self.state.pool.snapshot(),
            RaftProof {
                election_term: self.current_term,
            },
        );
        if !self.state.add_new_block_to_chain(block.clone()) {
            return None;
        }
        Some(block)
    }

    /// Commit the newest current-term entry held by a majority.
    fn advance_commit(&mut self) {
        let chain = &self.state.chain;
        let Some(last) = chain.last_index() else {
            return;
        };
        let start = self
            .commit_index
            .map_or(0, |commit| commit + 1)
            .max(chain.first_index());
        let committed = (start..=last).rev().find(|&index| {
            chain
                .get(index)
                .is_some_and(|entry| entry.election_term() == self.current_term)
                && self.has_quorum(1 + self.peers.replicated_on(index))
        });
        if let Some(index) = committed {
            self.commit_index = Some(index);
            self.last_applied = self.commit_index;
            debug!("node {}: commit index -> {}", self.node_id(), index);
        }
    }

    pub fn on_heartbeat_response(&mut self, response: HeartbeatResponse) {
        if response.term > self.current_term {
            self.transition_to_follower(response.term);
            return;
        }
        if self.role != Role::Leader || response.term != self.current_term {
            return;
        }
        if response.success {
            if let Some(tx) = response.transaction.clone() {
                self.receive_transaction(tx);
            }
        }

        let last_index = self.state.chain.last_index();
        let follower_id = response.follower_id;
        let Some(peer) = self.peers.get_mut(follower_id) else {
            warn!(
                "node {}: heartbeat response from unknown node {}",
                self.state.node_id, follower_id
            );
            return;
        };
        if response.success && response.match_index > peer.match_index {
            peer.match_index = response.match_index;
            peer.next_index = peer
                .next_index
                .max(response.match_index.map_or(0, |m| m + 1));
        }

        match response.added_entry {
            Some(true) => {
                let lagging = peer.match_index < last_index;
                self.advance_commit();
                if lagging {
                    self.replicate_to(follower_id);
                }
            }
            Some(false) => {
                peer.next_index = peer.next_index.saturating_sub(1);
                debug!(
                    "node {}: node {} rejected entry, retrying from {}",
                    self.state.node_id, follower_id, peer.next_index
                );
                self.replicate_to(follower_id);
            }
            None => self.advance_commit(),
        }
    }

    /* ---------- AppendEntry, follower side ---------- */

    pub fn on_append_entry(&mut self, request: AppendEntry) {
        if request.term < self.current_term {
            debug!(
                "node {}: rejecting heartbeat from {} with stale term {}",
                self.node_id(),
                request.leader_id,
                request.term
            );
            self.respond_heartbeat(request.leader_id, false, None, None, None);
            return;
        }
        if request.term > self.current_term || self.role != Role::Follower {
            self.transition_to_follower(request.term);
        }
        self.leader_id = Some(request.leader_id);
        self.restart_election_timer();

        if !self.matches_prev_entry(&request) {
            self.respond_heartbeat(request.leader_id, false, Some(false), None, None);
            return;
        }

        let entry_index = request.entry_index();
        let (added_entry, match_index, appended) = match request.entry.clone() {
            Some(entry) => {
                let appended = self.store_entry(entry_index, entry.clone());
                (Some(true), Some(entry_index), appended.then_some(entry))
            }
            // an empty log only adopted the leader's numbering
            None if self.state.chain.is_empty() => (None, None, None),
            None => (None, request.prev_log_index, None),
        };

        if let Some(leader_commit) = request.leader_commit {
            let candidate = self
                .state
                .chain
                .last_index()
                .map(|last| last.min(leader_commit));
            if candidate > self.commit_index {
                self.commit_index = candidate;
                self.last_applied = candidate;
            }
        }

        let transaction = self.contribution_for(appended.as_ref());
        self.respond_heartbeat(
            request.leader_id,
            true,
            added_entry,
            match_index,
            transaction,
        );
    }

    /// Log-matching check on `prev_log_index`. Truncates after a conflicting entry.
    fn matches_prev_entry(&mut self, request: &AppendEntry) -> bool {
        let Some(prev) = request.prev_log_index else {
            return true;
        };
        let chain = &mut self.state.chain;
        if chain.is_empty() {
            chain.rebase(prev + 1);
            return true;
        }
        match chain.get(prev) {
            Some(block) => match request.prev_log_term {
                Some(term) if term != block.election_term() => {
                    debug!(
                        "node {}: term conflict at {}, truncating",
                        self.state.node_id, prev
                    );
                    chain.truncate_from(prev + 1);
                    false
                }
                _ => true,
            },
            // already evicted here
            None if prev < chain.first_index() => true,
            None if request.prev_log_term.is_none() => {
                // the leader's window starts past our log: restart from its numbering
                chain.truncate_from(chain.first_index());
                chain.rebase(prev + 1);
                true
            }
            None => false,
        }
    }

    /// Put `entry` at `index`. Returns true when it was newly appended.
    fn store_entry(&mut self, index: u64, entry: RaftBlock) -> bool {
        let chain = &mut self.state.chain;
        if chain.is_empty() {
            chain.rebase(index);
        }
        match chain.get(index) {
            Some(existing) if *existing == entry => false,
            Some(_) => {
                chain.truncate_from(index);
                self.state.add_new_block_to_chain(entry)
            }
            None if index < chain.first_index() => false,
            None => self.state.add_new_block_to_chain(entry),
        }
    }

    /// A follower hands each leader one transaction at a time; a new one is made
    /// once the previous one shows up in an appended entry or the term changes.
    fn contribution_for(&mut self, appended: Option<&RaftBlock>) -> Option<Transaction> {
        let refresh = match &self.contribution {
            None => true,
            Some((term, _)) if *term != self.current_term => true,
            Some((_, tx)) => appended.is_some_and(|block| block.transactions.contains(tx)),
        };
        if !refresh {
            return None;
        }
        let tx = self.generate_next_transaction();
        self.contribution = Some((self.current_term, tx.clone()));
        Some(tx)
    }

    fn has_outstanding_contribution(&self) -> bool {
        self.contribution
            .as_ref()
            .is_some_and(|(term, _)| *term == self.current_term)
    }

    fn respond_heartbeat(
        &mut self,
        leader_id: NodeId,
        success: bool,
        added_entry: Option<bool>,
        match_index: Option<u64>,
        transaction: Option<Transaction>,
    ) {
        let response = HeartbeatResponse {
            follower_id: self.node_id(),
            term: self.current_term,
            added_entry,
            success,
            match_index,
            transaction,
        };
        self.state.communicate(CommunicationEvent::ReceiveHeartbeat {
            to: leader_id,
            response,
        });
    }
}

impl ConsensusDriver for RaftConsensus {
    type Proof = RaftProof;

    const MECHANISM: Mechanism = Mechanism::Raft;

    fn state(&self) -> &DriverState<RaftProof> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut DriverState<RaftProof> {
        &mut self.state
    }

    /// Entries normally arrive through AppendEntry; a block handed over directly
    /// is appended only if it keeps the log's terms non-decreasing.
    fn receive_block(&mut self, block: RaftBlock) -> bool {
        let term = block.election_term();
        if term > self.current_term || Some(term) < self.last_log_term() {
            debug!(
                "node {}: rejected block from term {}",
                self.node_id(),
                term
            );
            return false;
        }
        self.state.add_new_block_to_chain(block)
    }

    fn generate_genesis_block(&mut self) -> Result<Option<RaftBlock>, ConsensusError> {
        if !self.state.chain.is_empty() {
            return Ok(None);
        }
        Ok(self.cut_block())
    }

    fn generate_next_block(&mut self) -> Result<Option<RaftBlock>, ConsensusError> {
        if self.state.chain.is_empty() {
            return self.generate_genesis_block();
        }
        Ok(self.cut_block())
    }

    fn start(&mut self) {
        self.restart_election_timer();
    }

    /// Leaders never pool their own transactions; a follower sends one only
    /// when nothing it contributed this term is still pending.
    fn create_transaction(&mut self) {
        let leader = match (self.role, self.leader_id) {
            (Role::Follower, Some(leader)) => leader,
            _ => {
                debug!(
                    "node {}: no leader to contribute to as {}",
                    self.node_id(),
                    self.role
                );
                return;
            }
        };
        if self.has_outstanding_contribution() {
            debug!(
                "node {}: contribution still pending at leader {}",
                self.node_id(),
                leader
            );
            return;
        }
        let tx = self.generate_next_transaction();
        self.contribution = Some((self.current_term, tx.clone()));
        self.state.communicate(CommunicationEvent::SendTransaction {
            transaction: tx,
            to: Some(leader),
        });
    }

    /// A leader holds at most one pending transaction per follower.
    fn receive_transaction(&mut self, tx: Transaction) -> bool {
        if self.role == Role::Leader {
            let owner = tx.owner_node_id;
            if owner == self.node_id()
                || self
                    .state
                    .pool
                    .iter()
                    .any(|pending| pending.owner_node_id == owner && *pending != tx)
            {
                debug!(
                    "node {}: node {} already has a pending transaction, dropping {}",
                    self.node_id(),
                    owner,
                    tx
                );
                return false;
            }
        }
        self.state.receive_transaction(tx)
    }

    fn handle_raft(&mut self, event: RaftEvent, rpc_pending: bool) -> Result<(), ConsensusError> {
        match event {
            RaftEvent::RequestVote(request) => self.on_request_vote(request),
            RaftEvent::VoteResponse(response) => self.on_vote_response(response),
            RaftEvent::AppendEntry(request) => self.on_append_entry(request),
            RaftEvent::HeartbeatResponse(response) => self.on_heartbeat_response(response),
            RaftEvent::ElectionTimeout { generation } => {
                self.on_election_timeout(generation, rpc_pending)
            }
            RaftEvent::HeartbeatTimeout { generation } => self.on_heartbeat_timeout(generation),
        }
        Ok(())
    }

    fn status(&self) -> DriverStatus {
        let state = &self.state;
        DriverStatus {
            node_id: state.node_id,
            mechanism: Mechanism::Raft,
            chain_length: state.chain.len(),
            last_index: state.chain.last_index(),
            pool_size: state.pool.len(),
            transactions_created: state.transactions_created(),
            role: Some(self.role.to_string()),
            term: Some(self.current_term),
            commit_index: self.commit_index,
            last_applied: self.last_applied,
            leader_id: self.leader_id,
            difficulty: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ConsensusDriver;
    use crate::events::Event;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn cluster(size: u32) -> Vec<RaftConsensus> {
        let ids: Vec<NodeId> = (1..=size).collect();
        ids.iter()
            .map(|&id| {
                let mut node = RaftConsensus::new(id, &ids, TIMEOUT, 10);
                node.start();
                node.state_mut().take_outbox();
                node
            })
            .collect()
    }

    fn node_mut(nodes: &mut [RaftConsensus], id: NodeId) -> &mut RaftConsensus {
        nodes
            .iter_mut()
            .find(|n| n.state().node_id == id)
            .expect("node in cluster")
    }

    fn communications(node: &mut RaftConsensus) -> Vec<CommunicationEvent<RaftProof>> {
        node.state_mut()
            .take_outbox()
            .events
            .into_iter()
            .filter_map(|event| match event {
                Event::Communication(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    /// Deliver every pending RPC until the cluster goes quiet.
    fn settle(nodes: &mut [RaftConsensus]) {
        loop {
            let mut pending = Vec::new();
            for node in nodes.iter_mut() {
                let from = node.state().node_id;
                pending.extend(communications(node).into_iter().map(|c| (from, c)));
            }
            if pending.is_empty() {
                return;
            }
            for (from, message) in pending {
                match message {
                    CommunicationEvent::RequestVote(request) => {
                        for node in nodes.iter_mut().filter(|n| n.state().node_id != from) {
                            node.on_request_vote(request.clone());
                        }
                    }
                    CommunicationEvent::CastVote { to, response } => {
                        node_mut(nodes, to).on_vote_response(response)
                    }
                    CommunicationEvent::RequestHeartbeat { to, request } => {
                        node_mut(nodes, to).on_append_entry(request)
                    }
                    CommunicationEvent::ReceiveHeartbeat { to, response } => {
                        node_mut(nodes, to).on_heartbeat_response(response)
                    }
                    CommunicationEvent::SendTransaction {
                        transaction,
                        to: Some(to),
                    } => {
                        node_mut(nodes, to).receive_transaction(transaction);
                    }
                    _ => {}
                }
            }
        }
    }

    fn fire_election(node: &mut RaftConsensus) {
        let generation = node.election_generation;
        node.on_election_timeout(generation, false);
    }

    fn fire_heartbeat(node: &mut RaftConsensus) {
        let generation = node.heartbeat_generation;
        node.on_heartbeat_timeout(generation);
    }

    fn block(term: u64, owner: NodeId) -> RaftBlock {
        Block::new(owner, Vec::new(), RaftProof { election_term: term })
    }

    fn heartbeat(term: u64, leader_id: NodeId) -> AppendEntry {
        AppendEntry {
            term,
            leader_id,
            prev_log_index: None,
            prev_log_term: None,
            entry: None,
            leader_commit: None,
        }
    }

    fn last_response(node: &mut RaftConsensus) -> HeartbeatResponse {
        communications(node)
            .into_iter()
            .filter_map(|c| match c {
                CommunicationEvent::ReceiveHeartbeat { response, .. } => Some(response),
                _ => None,
            })
            .last()
            .expect("heartbeat response")
    }

    #[test]
    fn three_nodes_elect_a_leader_and_cut_one_entry_per_tick() {
        let mut nodes = cluster(3);

        fire_election(&mut nodes[0]);
        assert_eq!(nodes[0].role, Role::Candidate);
        assert_eq!(nodes[0].current_term, 1);

        settle(&mut nodes);
        assert_eq!(nodes[0].role, Role::Leader);
        assert_eq!(nodes[0].current_term, 1);
        assert_eq!(nodes[1].leader_id, Some(1));
        assert_eq!(nodes[2].leader_id, Some(1));
        // one contribution from each follower
        assert_eq!(nodes[0].state().pool.len(), 2);

        for round in 1..=3usize {
            fire_heartbeat(&mut nodes[0]);
            assert_eq!(nodes[0].state().chain.len(), round);
            settle(&mut nodes);
            for node in &nodes {
                assert_eq!(node.state().chain.len(), round);
            }
            assert_eq!(nodes[0].commit_index, Some(round as u64 - 1));
            assert_eq!(nodes[0].state().pool.len(), 2);
        }

        let tail = nodes[0].state().chain.last().expect("entry");
        assert_eq!(tail.election_term(), 1);
        assert_eq!(tail.transactions.len(), 2);
    }

    #[test]
    fn leader_waits_for_every_follower_before_cutting() {
        let mut nodes = cluster(3);
        fire_election(&mut nodes[0]);
        settle(&mut nodes);

        let tx = nodes[0].state().pool.snapshot()[0].clone();
        nodes[0].state_mut().pool.remove(&tx);
        fire_heartbeat(&mut nodes[0]);
        assert!(nodes[0].state().chain.is_empty());
    }

    /// Tick the leader `rounds` times and check one entry lands per tick.
    fn assert_cuts_every_tick(nodes: &mut [RaftConsensus], leader: NodeId, rounds: usize) {
        for _ in 0..rounds {
            let before = node_mut(nodes, leader).state().chain.len();
            fire_heartbeat(node_mut(nodes, leader));
            assert_eq!(node_mut(nodes, leader).state().chain.len(), before + 1);
            settle(nodes);
            assert!(node_mut(nodes, leader).state().pool.len() <= nodes.len() - 1);
        }
    }

    #[test]
    fn leader_ignores_local_transaction_requests() {
        let mut nodes = cluster(3);
        fire_election(&mut nodes[0]);
        settle(&mut nodes);
        fire_heartbeat(&mut nodes[0]);
        settle(&mut nodes);

        nodes[0].create_transaction();
        assert!(communications(&mut nodes[0]).is_empty());
        assert_eq!(nodes[0].state().pool.len(), 2);
        assert!(
            nodes[0]
                .state()
                .pool
                .iter()
                .all(|tx| tx.owner_node_id != 1)
        );
        assert_cuts_every_tick(&mut nodes, 1, 3);
    }

    #[test]
    fn follower_local_transaction_waits_for_pending_contribution() {
        let mut nodes = cluster(3);
        fire_election(&mut nodes[0]);
        settle(&mut nodes);

        // contribution from the election round is still pending
        nodes[1].create_transaction();
        assert!(communications(&mut nodes[1]).is_empty());

        // a second transaction from the same follower never enters the pool
        assert!(!nodes[0].receive_transaction(Transaction::new(2, 99)));
        assert_eq!(nodes[0].state().pool.len(), 2);

        assert_cuts_every_tick(&mut nodes, 1, 3);
    }

    #[test]
    fn follower_local_transaction_stands_in_for_contribution() {
        let mut node = RaftConsensus::new(2, &[1, 2, 3], TIMEOUT, 10);
        node.start();
        node.on_append_entry(AppendEntry {
            entry: Some(block(1, 1)),
            ..heartbeat(1, 1)
        });
        node.state_mut().take_outbox();

        // a new leader is known, but its first AppendEntry did not match
        node.on_append_entry(AppendEntry {
            prev_log_index: Some(4),
            prev_log_term: Some(2),
            ..heartbeat(2, 3)
        });
        assert_eq!(last_response(&mut node).transaction, None);
        assert_eq!(node.leader_id, Some(3));

        node.create_transaction();
        let sent: Vec<Transaction> = communications(&mut node)
            .into_iter()
            .filter_map(|c| match c {
                CommunicationEvent::SendTransaction {
                    transaction,
                    to: Some(3),
                } => Some(transaction),
                _ => None,
            })
            .collect();
        assert_eq!(sent.len(), 1);

        node.create_transaction();
        assert!(communications(&mut node).is_empty());

        // the next accepted heartbeat carries nothing new
        node.on_append_entry(heartbeat(2, 3));
        assert_eq!(last_response(&mut node).transaction, None);
        assert_eq!(node.state().transactions_created(), 2);
    }

    #[test]
    fn re_elected_leader_drops_leftover_pool_and_keeps_cutting() {
        let mut nodes = cluster(3);
        fire_election(&mut nodes[0]);
        settle(&mut nodes);
        assert_cuts_every_tick(&mut nodes, 1, 1);
        assert_eq!(nodes[0].state().pool.len(), 2);

        fire_election(&mut nodes[1]);
        settle(&mut nodes);
        assert_eq!(nodes[1].role, Role::Leader);
        assert_eq!(nodes[0].role, Role::Follower);
        // node 1 keeps its term-1 pool while following
        assert_eq!(nodes[0].state().pool.len(), 2);
        assert_eq!(nodes[1].state().pool.len(), 2);
        assert_cuts_every_tick(&mut nodes, 2, 1);

        fire_election(&mut nodes[0]);
        settle(&mut nodes);
        assert_eq!(nodes[0].role, Role::Leader);
        assert_eq!(nodes[0].current_term, 3);
        let pool = nodes[0].state().pool.snapshot();
        assert_eq!(pool.len(), 2);
        assert!(pool.iter().all(|tx| tx.owner_node_id != 1));
        assert_cuts_every_tick(&mut nodes, 1, 3);
        assert_eq!(nodes[0].state().chain.len(), 5);
    }

    #[test]
    fn votes_once_per_term() {
        let mut nodes = cluster(3);
        let voter = &mut nodes[2];
        for candidate in [1, 2] {
            voter.on_request_vote(VoteRequest {
                candidate_id: candidate,
                candidate_term: 1,
                latest_index: None,
                latest_term: None,
            });
        }
        let grants: Vec<NodeId> = communications(voter)
            .into_iter()
            .filter_map(|c| match c {
                CommunicationEvent::CastVote { to, response } if response.granted => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(grants, vec![1]);
        assert_eq!(voter.voted_for, Some(1));
    }

    #[test]
    fn refuses_vote_to_candidate_with_shorter_log() {
        let mut node = RaftConsensus::new(3, &[1, 2, 3], TIMEOUT, 10);
        node.state_mut().add_new_block_to_chain(block(1, 1));
        node.on_request_vote(VoteRequest {
            candidate_id: 2,
            candidate_term: 2,
            latest_index: None,
            latest_term: None,
        });
        assert_eq!(node.current_term, 2);
        assert_eq!(node.voted_for, None);
    }

    #[test]
    fn stale_heartbeat_is_rejected_without_changes() {
        let mut node = RaftConsensus::new(2, &[1, 2, 3], TIMEOUT, 10);
        node.on_append_entry(heartbeat(2, 1));
        node.state_mut().take_outbox();

        node.on_append_entry(AppendEntry {
            entry: Some(block(1, 3)),
            ..heartbeat(1, 3)
        });
        let response = last_response(&mut node);
        assert!(!response.success);
        assert_eq!(response.term, 2);
        assert_eq!(node.current_term, 2);
        assert_eq!(node.leader_id, Some(1));
        assert!(node.state().chain.is_empty());
    }

    #[test]
    fn higher_term_turns_candidate_into_follower() {
        let mut nodes = cluster(3);
        fire_election(&mut nodes[0]);
        assert_eq!(nodes[0].role, Role::Candidate);

        nodes[0].on_append_entry(heartbeat(5, 2));
        assert_eq!(nodes[0].role, Role::Follower);
        assert_eq!(nodes[0].current_term, 5);
        assert_eq!(nodes[0].voted_for, None);
        assert_eq!(nodes[0].leader_id, Some(2));
    }

    #[test]
    fn conflicting_entry_is_truncated_and_replaced() {
        let mut node = RaftConsensus::new(2, &[1, 2, 3], TIMEOUT, 10);
        let old_leader = |prev: Option<u64>, prev_term: Option<u64>| AppendEntry {
            prev_log_index: prev,
            prev_log_term: prev_term,
            entry: Some(block(1, 1)),
            ..heartbeat(1, 1)
        };
        node.on_append_entry(old_leader(None, None));
        let mut second = old_leader(Some(0), Some(1));
        second.entry = Some(Block::new(1, vec![Transaction::new(1, 1)], RaftProof { election_term: 1 }));
        node.on_append_entry(second);
        assert_eq!(node.state().chain.len(), 2);
        node.state_mut().take_outbox();

        // new leader holds a term-2 entry at index 1
        node.on_append_entry(AppendEntry {
            prev_log_index: Some(1),
            prev_log_term: Some(2),
            entry: None,
            ..heartbeat(2, 3)
        });
        let response = last_response(&mut node);
        assert_eq!(response.added_entry, Some(false));
        assert!(!response.success);

        let replacement = block(2, 3);
        node.on_append_entry(AppendEntry {
            prev_log_index: Some(0),
            prev_log_term: Some(1),
            entry: Some(replacement.clone()),
            ..heartbeat(2, 3)
        });
        let response = last_response(&mut node);
        assert_eq!(response.added_entry, Some(true));
        assert_eq!(response.match_index, Some(1));
        assert_eq!(node.state().chain.len(), 2);
        assert_eq!(node.state().chain.get(1), Some(&replacement));
    }

    #[test]
    fn rejected_entry_moves_next_index_back() {
        let mut nodes = cluster(3);
        fire_election(&mut nodes[0]);
        settle(&mut nodes);
        fire_heartbeat(&mut nodes[0]);
        settle(&mut nodes);
        let leader = &mut nodes[0];
        assert_eq!(leader.peers.get(2).map(|p| p.next_index), Some(1));

        leader.on_heartbeat_response(HeartbeatResponse {
            follower_id: 2,
            term: 1,
            added_entry: Some(false),
            success: false,
            match_index: None,
            transaction: None,
        });
        assert_eq!(leader.peers.get(2).map(|p| p.next_index), Some(0));
        let retried = communications(leader).into_iter().any(|c| {
            matches!(c, CommunicationEvent::RequestHeartbeat { to: 2, request }
                if request.prev_log_index.is_none() && request.entry.is_some())
        });
        assert!(retried);
    }

    #[test]
    fn follower_commit_index_never_moves_back() {
        let mut node = RaftConsensus::new(2, &[1, 2, 3], TIMEOUT, 10);
        node.on_append_entry(AppendEntry {
            entry: Some(block(1, 1)),
            ..heartbeat(1, 1)
        });
        node.on_append_entry(AppendEntry {
            prev_log_index: Some(0),
            prev_log_term: Some(1),
            leader_commit: Some(0),
            ..heartbeat(1, 1)
        });
        assert_eq!(node.commit_index, Some(0));
        assert_eq!(node.last_applied, Some(0));

        node.on_append_entry(heartbeat(1, 1));
        assert_eq!(node.commit_index, Some(0));
    }

    #[test]
    fn stale_or_blocked_election_timeouts_do_not_start_elections() {
        let mut node = RaftConsensus::new(1, &[1, 2, 3], TIMEOUT, 10);
        node.start();
        let stale = node.election_generation;
        node.on_append_entry(heartbeat(1, 2));
        node.state_mut().take_outbox();

        node.on_election_timeout(stale, false);
        assert_eq!(node.role, Role::Follower);
        assert_eq!(node.current_term, 1);

        let current = node.election_generation;
        node.on_election_timeout(current, true);
        assert_eq!(node.role, Role::Follower);
        let timers = node.state_mut().take_outbox().timers;
        assert!(matches!(
            timers.as_slice(),
            [TimerCommand::RestartElection { timeout, .. }] if *timeout >= TIMEOUT / 2 && *timeout < TIMEOUT
        ));
    }

    #[test]
    fn single_node_leads_alone() {
        let mut node = RaftConsensus::new(1, &[1], TIMEOUT, 10);
        node.start();
        fire_election(&mut node);
        assert_eq!(node.role, Role::Leader);
        fire_heartbeat(&mut node);
        assert_eq!(node.state().chain.len(), 1);
        assert_eq!(node.commit_index, Some(0));
    }
}
