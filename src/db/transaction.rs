use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use super::graph::GraphShared;
use crate::storage::{PoolMetrics, Properties};
use crate::types::{NodeId, PoolError, RelId, Result, TxnId};

/// The state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting mutations.
    Open,
    /// Durably committed.
    Committed,
    /// Discarded.
    Aborted,
}

/// Buffered final state of one node touched by a transaction.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Pending {
    /// Node will hold this label and these properties.
    Put {
        label: String,
        props: Properties,
        created: bool,
    },
    /// Node will be deleted.
    Delete { created: bool },
}

impl Pending {
    pub(crate) fn created(&self) -> bool {
        match self {
            Pending::Put { created, .. } | Pending::Delete { created } => *created,
        }
    }
}

/// Buffered final state of one relationship touched by a transaction.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PendingRel {
    /// Relationship will be created.
    Create {
        src: NodeId,
        dst: NodeId,
        label: String,
        props: Properties,
    },
    /// Relationship will be deleted.
    Delete { created: bool },
}

impl PendingRel {
    pub(crate) fn created(&self) -> bool {
        match self {
            PendingRel::Create { .. } => true,
            PendingRel::Delete { created } => *created,
        }
    }
}

/// A unit of work on one graph.
///
/// Mutations are buffered in the transaction and reach the pool only through
/// [`super::Graph::commit`], which makes them durable and visible together.
/// A transaction is tied to the thread that began it and is aborted when
/// dropped while still open.
///
/// # Example
///
/// ```no_run
/// use pmgraph::{props, Pool, PropValue};
///
/// let pool = Pool::create("movies.pool", 80 << 20)?;
/// let graph = pool.create_graph("g3", 1_000)?;
/// let mut txn = graph.begin()?;
/// let tenet = graph.create_node(&mut txn, "Movie", props([("title", PropValue::from("Tenet"))]))?;
/// graph.commit(&mut txn)?;
/// assert_eq!(graph.get_node(tenet)?.label, "Movie");
/// # Ok::<(), pmgraph::PoolError>(())
/// ```
pub struct Transaction {
    id: TxnId,
    pub(crate) graph: Arc<GraphShared>,
    state: TxnState,
    pub(crate) pending: BTreeMap<NodeId, Pending>,
    pub(crate) rels: BTreeMap<RelId, PendingRel>,
    metrics: Arc<dyn PoolMetrics>,
    _not_send: PhantomData<*const ()>,
}

impl Transaction {
    pub(crate) fn new(id: TxnId, graph: Arc<GraphShared>, metrics: Arc<dyn PoolMetrics>) -> Self {
        Self {
            id,
            graph,
            state: TxnState::Open,
            pending: BTreeMap::new(),
            rels: BTreeMap::new(),
            metrics,
            _not_send: PhantomData,
        }
    }

    /// Returns the transaction id.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the current state.
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Name of the graph the transaction runs on.
    pub fn graph_name(&self) -> &str {
        &self.graph.name
    }

    /// Number of nodes with buffered changes.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of relationships with buffered changes.
    pub fn pending_relationships(&self) -> usize {
        self.rels.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.rels.is_empty()
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self.state {
            TxnState::Open => Ok(()),
            TxnState::Committed => Err(PoolError::TransactionState("transaction already committed")),
            TxnState::Aborted => Err(PoolError::TransactionState("transaction already aborted")),
        }
    }

    pub(crate) fn mark_committed(&mut self) {
        self.pending.clear();
        self.rels.clear();
        self.state = TxnState::Committed;
        self.graph.release(self.id);
        debug!(txn = self.id.0, graph = %self.graph.name, "graph.txn.committed");
    }

    /// Releases reservations and the graph; a no-op unless open.
    pub(crate) fn rollback(&mut self) {
        if self.state != TxnState::Open {
            return;
        }
        {
            let mut slots = self.graph.slots.lock();
            for (id, change) in &self.pending {
                if change.created() {
                    slots.release(*id);
                }
            }
        }
        if let Some(store) = self.graph.rels.lock().as_mut() {
            for (id, change) in &self.rels {
                if change.created() {
                    store.slots.release(*id);
                }
            }
        }
        self.pending.clear();
        self.rels.clear();
        self.state = TxnState::Aborted;
        self.graph.release(self.id);
        self.metrics.abort();
        debug!(txn = self.id.0, graph = %self.graph.name, "graph.txn.aborted");
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.rollback();
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("graph", &self.graph.name)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .field("relationships", &self.rels.len())
            .finish()
    }
}
