pub mod block;
pub mod model;

pub use block::{Block, PowBlock, PowProof, Proof, RaftBlock, RaftProof};
pub use model::Chain;

/// Default Proof-of-Work difficulty (number of leading hex zeros).
pub const DEFAULT_DIFFICULTY: usize = 7;

/// Number of most recent blocks a node keeps in memory.
pub const DEFAULT_CHAIN_WINDOW: usize = 10;

/// Previous-hash value used when mining on an empty chain.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";
