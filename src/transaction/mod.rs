pub mod model;
pub mod pool;

pub use model::{NodeId, Transaction};
pub use pool::TransactionPool;
