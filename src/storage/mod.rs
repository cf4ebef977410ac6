//! Graph storage inside a pool region.
//!
//! Node and relationship tables and their bodies, the graph directory and
//! the string dictionary, plus the redo records that change them and the
//! recovery that replays them.

/// String dictionary for labels and property keys.
pub mod dict;

/// Graph directory block.
pub mod directory;

/// Slot tables, slots and slot bookkeeping.
pub mod node;

/// Commit planning.
///
/// Resolves buffered mutations into idempotent redo records.
pub mod plan;

/// Property values and the node body codec.
pub mod props;

/// Crash recovery run at open.
pub mod recovery;

/// Redo record format and application.
pub mod redo;

/// Relationship bodies and endpoint index.
pub mod relationship;

mod metrics;

/// Metrics sinks.
pub use metrics::{default_metrics, CounterMetrics, NoopMetrics, PoolMetrics};

pub use props::{props, Node, PropValue, Properties};
pub use recovery::{recover, RecoveryAction, RecoveryReport};
pub use relationship::Relationship;
