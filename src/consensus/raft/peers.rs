use crate::transaction::NodeId;

/// Leader/candidate bookkeeping for one other node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub peer_id: NodeId,
    pub next_index: u64,
    pub match_index: Option<u64>,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    peers: Vec<PeerRecord>,
}

impl PeerTable {
    pub fn new(peer_ids: &[NodeId]) -> Self {
        Self {
            peers: peer_ids
                .iter()
                .map(|&peer_id| PeerRecord {
                    peer_id,
                    next_index: 0,
                    match_index: None,
                    vote_granted: false,
                })
                .collect(),
        }
    }

    /// Forget votes and replication progress.
    pub fn reset(&mut self, next_index: u64) {
        for peer in &mut self.peers {
            peer.next_index = next_index;
            peer.match_index = None;
            peer.vote_granted = false;
        }
    }

    pub fn get(&self, peer_id: NodeId) -> Option<&PeerRecord> {
        self.peers.iter().find(|p| p.peer_id == peer_id)
    }

    pub fn get_mut(&mut self, peer_id: NodeId) -> Option<&mut PeerRecord> {
        self.peers.iter_mut().find(|p| p.peer_id == peer_id)
    }

    /// Record a granted vote. `false` for unknown peers and repeated grants.
    pub fn grant_vote(&mut self, peer_id: NodeId) -> bool {
        match self.get_mut(peer_id) {
            Some(peer) if !peer.vote_granted => {
                peer.vote_granted = true;
                true
            }
            _ => false,
        }
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.peers.iter().map(|p| p.peer_id).collect()
    }

    /// Peers whose log is known to hold `index`.
    pub fn replicated_on(&self, index: u64) -> usize {
        self.peers
            .iter()
            .filter(|p| p.match_index.is_some_and(|m| m >= index))
            .count()
    }
}
