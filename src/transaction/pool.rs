use std::collections::BTreeMap;

use super::model::{NodeId, Transaction};

/// Pending transactions not yet embedded in a retained block.
/// Keyed by (owner, sequence) so iteration order is the same on every node.
#[derive(Debug, Default, Clone)]
pub struct TransactionPool {
    map: BTreeMap<(NodeId, u64), Transaction>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Insert a transaction. Returns `false` if an equal one is already pending.
    pub fn insert(&mut self, tx: Transaction) -> bool {
        if self.map.contains_key(&tx.key()) {
            return false;
        }
        self.map.insert(tx.key(), tx);
        true
    }

    pub fn contains(&self, tx: &Transaction) -> bool {
        self.map.contains_key(&tx.key())
    }

    pub fn remove(&mut self, tx: &Transaction) -> Option<Transaction> {
        self.map.remove(&tx.key())
    }

    /// Remove every transaction in `txs` that is pending.
    pub fn remove_all(&mut self, txs: &[Transaction]) {
        for tx in txs {
            self.remove(tx);
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// True when every transaction in `txs` is pending here.
    pub fn is_superset_of(&self, txs: &[Transaction]) -> bool {
        txs.iter().all(|tx| self.contains(tx))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.map.values()
    }

    /// Owned copy of the pending transactions in canonical order.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::TransactionPool;
    use crate::transaction::Transaction;

    #[test]
    fn insert_is_idempotent() {
        let mut pool = TransactionPool::new();
        assert!(pool.insert(Transaction::new(1, 1)));
        assert!(!pool.insert(Transaction::new(1, 1)));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn snapshot_is_ordered_by_owner_then_sequence() {
        let mut pool = TransactionPool::new();
        pool.insert(Transaction::new(3, 1));
        pool.insert(Transaction::new(2, 2));
        pool.insert(Transaction::new(2, 1));
        let keys: Vec<_> = pool.snapshot().iter().map(|t| t.key()).collect();
        assert_eq!(keys, vec![(2, 1), (2, 2), (3, 1)]);
    }

    #[test]
    fn superset_accepts_extra_pending_transactions() {
        let mut pool = TransactionPool::new();
        pool.insert(Transaction::new(2, 1));
        pool.insert(Transaction::new(3, 1));
        pool.insert(Transaction::new(4, 1));

        assert!(pool.is_superset_of(&[Transaction::new(2, 1), Transaction::new(3, 1)]));
        assert!(!pool.is_superset_of(&[Transaction::new(5, 1)]));
        assert!(pool.is_superset_of(&[]));
    }

    #[test]
    fn remove_all_ignores_unknown() {
        let mut pool = TransactionPool::new();
        pool.insert(Transaction::new(2, 1));
        pool.remove_all(&[Transaction::new(2, 1), Transaction::new(9, 9)]);
        assert!(pool.is_empty());
    }
}
