//! Pool, graph and transaction handles.
//!
//! Every commit runs under the pool's write lock: buffered mutations are
//! planned into redo records, flushed to the log area, applied to the region
//! and only then installed in memory. Readers take the read lock and see
//! committed state only.

mod config;
mod graph;
mod pool;
mod transaction;

pub use config::{PoolOptions, Synchronous};
pub use graph::Graph;
pub use pool::{Pool, PoolStats};
pub use transaction::{Transaction, TxnState};
