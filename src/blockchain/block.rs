use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Debug;

use crate::error::ConsensusError;
use crate::transaction::{NodeId, Transaction};

/// Mechanism-specific data attached to a block.
pub trait Proof:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A block of transactions. Equality is by value and is what the chain uses
/// to detect duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block<P> {
    pub owner_node_id: NodeId,
    pub created_at: i64, // Unix millis (UTC)
    pub transactions: Vec<Transaction>,
    pub proof: P,
}

impl<P> Block<P> {
    pub fn new(owner_node_id: NodeId, transactions: Vec<Transaction>, proof: P) -> Self {
        Self {
            owner_node_id,
            created_at: Utc::now().timestamp_millis(),
            transactions,
            proof,
        }
    }
}

/// Proof-of-Work seal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowProof {
    pub block_hash: String,
    pub previous_block_hash: String,
    pub nonce: u32,
}

/// Raft log entry metadata: the term in which the entry was appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftProof {
    pub election_term: u64,
}

impl Proof for PowProof {}
impl Proof for RaftProof {}

pub type PowBlock = Block<PowProof>;
pub type RaftBlock = Block<RaftProof>;

/// The nonce-independent part of the PoW preimage: previous hash followed by
/// the JSON serialization of the transactions.
pub fn hash_basis(
    previous_block_hash: &str,
    transactions: &[Transaction],
) -> Result<String, ConsensusError> {
    let txs_json = serde_json::to_string(transactions)?;
    Ok(format!("{previous_block_hash}{txs_json}"))
}

/// SHA-256 of `basis ‖ nonce`, hex encoded (64 chars).
pub fn compute_hash(basis: &str, nonce: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(basis.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// True when `hash` starts with at least `difficulty` '0' hex characters.
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.chars().take(difficulty).all(|c| c == '0')
}

impl PowBlock {
    pub fn block_hash(&self) -> &str {
        &self.proof.block_hash
    }

    pub fn previous_block_hash(&self) -> &str {
        &self.proof.previous_block_hash
    }

    /// Recompute the hash from previous hash, transactions and nonce and check it
    /// against the cached one and the difficulty. Does NOT check chain linkage.
    pub fn is_valid(&self, difficulty: usize) -> bool {
        let Ok(basis) = hash_basis(&self.proof.previous_block_hash, &self.transactions) else {
            return false;
        };
        let expected = compute_hash(&basis, self.proof.nonce);
        expected == self.proof.block_hash && meets_difficulty(&expected, difficulty)
    }
}

impl RaftBlock {
    pub fn election_term(&self) -> u64 {
        self.proof.election_term
    }
}
