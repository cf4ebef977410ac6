//! Crash-consistent graph storage over a single fixed-size durable region.
//!
//! A [`Pool`] is one pool file (or any [`primitives::io::FileIo`]) holding
//! any number of named graphs. Every [`Graph`] is a fixed-capacity store of
//! nodes and the labelled relationships between them; changes are buffered
//! in a [`Transaction`] and become durable and visible together at commit,
//! or not at all if the process dies first.
//!
//! ```no_run
//! use pmgraph::{props, Pool, PropValue};
//!
//! let pool = Pool::create("people.pool", 80 << 20)?;
//! let graph = pool.create_graph("people", 1_000)?;
//! let mut txn = graph.begin()?;
//! let ada = graph.create_node(&mut txn, "Person", props([("name", PropValue::from("Ada"))]))?;
//! graph.commit(&mut txn)?;
//! assert_eq!(graph.get_node(ada)?.properties["name"], PropValue::from("Ada"));
//! pool.close()?;
//! # Ok::<(), pmgraph::PoolError>(())
//! ```

#![warn(missing_docs)]

pub mod admin;
pub mod db;
pub mod primitives;
pub mod storage;
pub mod types;

pub use db::{Graph, Pool, PoolOptions, PoolStats, Synchronous, Transaction, TxnState};
pub use storage::{
    props, CounterMetrics, Node, NoopMetrics, PoolMetrics, PropValue, Properties, Relationship,
};
pub use types::{NodeId, PoolError, RelId, Result};
