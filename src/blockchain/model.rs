use std::collections::VecDeque;

use super::Block;

/// Bounded in-memory chain. Only the newest `window` blocks are retained, but
/// indices stay absolute: `first_index` counts the blocks evicted so far, so an
/// index keeps naming the same entry after older ones are dropped.
#[derive(Debug, Clone)]
pub struct Chain<P> {
    blocks: VecDeque<Block<P>>,
    first_index: u64,
    window: usize,
}

impl<P: PartialEq> Chain<P> {
    pub fn new(window: usize) -> Self {
        Self {
            blocks: VecDeque::with_capacity(window + 1),
            first_index: 0,
            window: window.max(1),
        }
    }

    /// Number of retained blocks (never above the window).
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Absolute index of the oldest retained block.
    pub fn first_index(&self) -> u64 {
        self.first_index
    }

    /// Absolute index of the newest block, if any.
    pub fn last_index(&self) -> Option<u64> {
        self.next_index().checked_sub(1).filter(|_| !self.is_empty())
    }

    /// Absolute index the next appended block will get (the log length).
    pub fn next_index(&self) -> u64 {
        self.first_index + self.blocks.len() as u64
    }

    pub fn last(&self) -> Option<&Block<P>> {
        self.blocks.back()
    }

    /// Block at an absolute index, `None` if evicted or not appended yet.
    pub fn get(&self, index: u64) -> Option<&Block<P>> {
        let offset = index.checked_sub(self.first_index)?;
        self.blocks.get(usize::try_from(offset).ok()?)
    }

    pub fn contains(&self, block: &Block<P>) -> bool {
        self.blocks.iter().any(|b| b == block)
    }

    /// Append a block, evicting the oldest one once the window is exceeded.
    /// Returns the evicted block.
    pub fn push(&mut self, block: Block<P>) -> Option<Block<P>> {
        self.blocks.push_back(block);
        if self.blocks.len() > self.window {
            self.first_index += 1;
            return self.blocks.pop_front();
        }
        None
    }

    /// Drop every block at `index` and after. Indices below the window are clamped.
    pub fn truncate_from(&mut self, index: u64) {
        let keep = index.saturating_sub(self.first_index);
        let keep = usize::try_from(keep).unwrap_or(usize::MAX);
        self.blocks.truncate(keep);
    }

    /// Make the next appended block get absolute index `index`.
    /// Only meaningful on an empty chain; ignored otherwise.
    pub fn rebase(&mut self, index: u64) {
        if self.blocks.is_empty() {
            self.first_index = index;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block<P>> {
        self.blocks.iter()
    }
}

impl<P: Clone + PartialEq> Chain<P> {
    /// Owned copy of the retained blocks, oldest first.
    pub fn to_vec(&self) -> Vec<Block<P>> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::Chain;
    use crate::blockchain::{Block, RaftProof};

    fn block(term: u64, seq: u64) -> Block<RaftProof> {
        let mut b = Block::new(1, Vec::new(), RaftProof { election_term: term });
        b.created_at = seq as i64;
        b
    }

    #[test]
    fn window_keeps_most_recent_blocks_in_order() {
        let mut chain = Chain::new(10);
        for i in 0..15 {
            chain.push(block(1, i));
        }
        assert_eq!(chain.len(), 10);
        let stamps: Vec<i64> = chain.iter().map(|b| b.created_at).collect();
        assert_eq!(stamps, (5..15).collect::<Vec<i64>>());
        assert_eq!(chain.first_index(), 5);
        assert_eq!(chain.last_index(), Some(14));
        assert_eq!(chain.next_index(), 15);
    }

    #[test]
    fn absolute_indices_survive_eviction() {
        let mut chain = Chain::new(3);
        for i in 0..5 {
            chain.push(block(1, i));
        }
        assert!(chain.get(1).is_none());
        assert_eq!(chain.get(2).map(|b| b.created_at), Some(2));
        assert_eq!(chain.get(4).map(|b| b.created_at), Some(4));
        assert!(chain.get(5).is_none());
    }

    #[test]
    fn truncate_from_drops_suffix() {
        let mut chain = Chain::new(10);
        for i in 0..4 {
            chain.push(block(1, i));
        }
        chain.truncate_from(2);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.last_index(), Some(1));

        chain.truncate_from(0);
        assert!(chain.is_empty());
        assert_eq!(chain.last_index(), None);
    }

    #[test]
    fn rebase_only_applies_to_empty_chain() {
        let mut chain = Chain::new(10);
        chain.rebase(7);
        chain.push(block(2, 0));
        assert_eq!(chain.last_index(), Some(7));
        chain.rebase(0);
        assert_eq!(chain.first_index(), 7);
    }

    #[test]
    fn to_vec_copies_only_the_retained_window() {
        let mut chain = Chain::new(2);
        for i in 0..3 {
            chain.push(block(1, i));
        }
        let copy = chain.to_vec();
        assert_eq!(copy, vec![block(1, 1), block(1, 2)]);
        chain.truncate_from(chain.first_index());
        assert_eq!(copy.len(), 2);
    }

    #[test]
    fn contains_compares_by_value() {
        let mut chain = Chain::new(10);
        chain.push(block(1, 1));
        assert!(chain.contains(&block(1, 1)));
        assert!(!chain.contains(&block(2, 1)));
    }
}
