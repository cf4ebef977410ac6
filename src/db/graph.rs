use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::pool::Pool;
use super::transaction::{Pending, PendingRel, Transaction};
use crate::storage::dict;
use crate::storage::directory::GraphEntry;
use crate::storage::node::{SlotMap, TableHeader, TableKind};
use crate::storage::relationship::{relationship_capacity, RelStore};
use crate::storage::{Node, Properties, Relationship};
use crate::types::{GraphId, NodeId, Offset, PoolError, RelId, Result, TxnId};

#[derive(Clone, Copy, Debug)]
struct TxnOwner {
    txn: TxnId,
    thread: ThreadId,
}

/// State shared by every handle to one graph.
pub(crate) struct GraphShared {
    pub(crate) id: GraphId,
    pub(crate) name: String,
    pub(crate) capacity: u32,
    pub(crate) table: Offset,
    gate: Mutex<Option<TxnOwner>>,
    turn: Condvar,
    pub(crate) slots: Mutex<SlotMap>,
    pub(crate) rels: Mutex<Option<RelStore>>,
    pub(crate) dropped: AtomicBool,
}

impl GraphShared {
    pub(crate) fn new(entry: GraphEntry, slots: SlotMap, rels: Option<RelStore>) -> Self {
        Self {
            id: entry.id,
            name: entry.name,
            capacity: entry.capacity,
            table: entry.table,
            gate: Mutex::new(None),
            turn: Condvar::new(),
            slots: Mutex::new(slots),
            rels: Mutex::new(rels),
            dropped: AtomicBool::new(false),
        }
    }

    /// Slots in the relationship table, created or not.
    pub(crate) fn rel_capacity(&self) -> u32 {
        relationship_capacity(self.capacity)
    }

    /// Header of one of the graph's tables with the given issued mark and link.
    pub(crate) fn table_header(&self, kind: TableKind, issued: u32, link: Offset) -> TableHeader {
        TableHeader {
            kind,
            graph: self.id,
            capacity: match kind {
                TableKind::Nodes => self.capacity,
                TableKind::Relationships => self.rel_capacity(),
            },
            name: self.name.clone(),
            issued,
            link,
        }
    }

    pub(crate) fn has_open_txn(&self) -> bool {
        self.gate.lock().is_some()
    }

    pub(crate) fn release(&self, txn: TxnId) {
        let mut gate = self.gate.lock();
        if matches!(*gate, Some(owner) if owner.txn == txn) {
            *gate = None;
        }
        drop(gate);
        self.turn.notify_all();
    }

    /// Marks the graph dropped; fails with `Busy` while a transaction is open.
    pub(crate) fn retire(&self) -> Result<()> {
        let gate = self.gate.lock();
        if gate.is_some() {
            return Err(PoolError::Busy("graph has an open transaction"));
        }
        self.dropped.store(true, Ordering::Release);
        drop(gate);
        self.turn.notify_all();
        Ok(())
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.dropped.load(Ordering::Acquire) {
            return Err(PoolError::not_found("graph", &self.name));
        }
        Ok(())
    }
}

/// Handle to one graph of a pool.
///
/// Handles are cheap to clone; all handles to the same graph share one
/// transaction gate, so at most one transaction is open on a graph at a time.
#[derive(Clone)]
pub struct Graph {
    pool: Pool,
    shared: Arc<GraphShared>,
}

impl Graph {
    pub(crate) fn new(pool: Pool, shared: Arc<GraphShared>) -> Self {
        Self { pool, shared }
    }

    /// Graph name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Graph id inside the pool.
    pub fn id(&self) -> GraphId {
        self.shared.id
    }

    /// Maximum number of live nodes.
    pub fn capacity(&self) -> u32 {
        self.shared.capacity
    }

    /// Begins a transaction, waiting while another one is open on the graph.
    ///
    /// Returns `Busy` instead of waiting when the calling thread itself holds
    /// the open transaction.
    pub fn begin(&self) -> Result<Transaction> {
        self.start(true)
    }

    /// Begins a transaction, failing with `Busy` if one is already open.
    pub fn try_begin(&self) -> Result<Transaction> {
        self.start(false)
    }

    fn start(&self, wait: bool) -> Result<Transaction> {
        self.pool.ensure_usable()?;
        let me = thread::current().id();
        let mut gate = self.shared.gate.lock();
        loop {
            self.shared.ensure_live()?;
            let holder = *gate;
            match holder {
                None => break,
                Some(owner) if owner.thread == me => {
                    return Err(PoolError::Busy(
                        "this thread already has a transaction open on the graph",
                    ))
                }
                Some(_) if !wait => return Err(PoolError::Busy("graph has an open transaction")),
                Some(_) => self.shared.turn.wait(&mut gate),
            }
        }
        let txn = self.pool.next_txn_id();
        *gate = Some(TxnOwner { txn, thread: me });
        drop(gate);
        debug!(txn = txn.0, graph = %self.shared.name, "graph.txn.begin");
        Ok(Transaction::new(
            txn,
            Arc::clone(&self.shared),
            self.pool.metrics(),
        ))
    }

    /// Makes every change buffered in `txn` durable and visible.
    ///
    /// On any error the transaction ends up aborted.
    pub fn commit(&self, txn: &mut Transaction) -> Result<()> {
        self.check_txn(txn)?;
        match self.pool.commit_graph(&self.shared, txn) {
            Ok(()) => {
                txn.mark_committed();
                Ok(())
            }
            Err(err) => {
                txn.rollback();
                Err(err)
            }
        }
    }

    /// Discards every change buffered in `txn`.
    pub fn abort(&self, txn: &mut Transaction) -> Result<()> {
        self.check_txn(txn)?;
        txn.rollback();
        Ok(())
    }

    /// Creates a node; its id is valid immediately but the node is only
    /// visible after commit.
    pub fn create_node(
        &self,
        txn: &mut Transaction,
        label: &str,
        props: Properties,
    ) -> Result<NodeId> {
        self.check_txn(txn)?;
        validate(label, &props)?;
        let lease = self.shared.slots.lock().lease_needed();
        if lease.is_some() {
            self.pool.extend_lease(&self.shared, TableKind::Nodes)?;
        }
        let id = self.shared.slots.lock().reserve()?;
        txn.pending.insert(
            id,
            Pending::Put {
                label: label.to_owned(),
                props,
                created: true,
            },
        );
        Ok(id)
    }

    /// Merges `props` into the properties of node `id`.
    pub fn update_node(&self, txn: &mut Transaction, id: NodeId, props: Properties) -> Result<()> {
        self.check_txn(txn)?;
        validate("", &props)?;
        match txn.pending.get_mut(&id) {
            Some(Pending::Put { props: current, .. }) => {
                current.extend(props);
                Ok(())
            }
            Some(Pending::Delete { .. }) => Err(node_missing(id)),
            None => {
                let node = self.get_node(id)?;
                let mut merged = node.properties;
                merged.extend(props);
                txn.pending.insert(
                    id,
                    Pending::Put {
                        label: node.label,
                        props: merged,
                        created: false,
                    },
                );
                Ok(())
            }
        }
    }

    /// Deletes node `id` together with every relationship attached to it.
    pub fn delete_node(&self, txn: &mut Transaction, id: NodeId) -> Result<()> {
        self.check_txn(txn)?;
        let created = match txn.pending.get(&id) {
            Some(Pending::Delete { .. }) => return Err(node_missing(id)),
            Some(change) => change.created(),
            None => {
                if !self.shared.slots.lock().is_live(id) {
                    return Err(node_missing(id));
                }
                false
            }
        };
        txn.pending.insert(id, Pending::Delete { created });

        let committed = match self.shared.rels.lock().as_ref() {
            Some(store) => store.adjacency.of(id),
            None => Vec::new(),
        };
        for rel in committed {
            txn.rels
                .entry(rel)
                .or_insert(PendingRel::Delete { created: false });
        }
        for change in txn.rels.values_mut() {
            if matches!(change, PendingRel::Create { src, dst, .. } if *src == id || *dst == id) {
                *change = PendingRel::Delete { created: true };
            }
        }
        Ok(())
    }

    /// Creates a relationship from `src` to `dst`.
    ///
    /// Both endpoints must exist as seen by `txn`: committed and not deleted
    /// by it, or created by it.
    pub fn create_relationship(
        &self,
        txn: &mut Transaction,
        src: NodeId,
        dst: NodeId,
        label: &str,
        props: Properties,
    ) -> Result<RelId> {
        self.check_txn(txn)?;
        validate(label, &props)?;
        for end in [src, dst] {
            if !self.node_visible(txn, end) {
                return Err(node_missing(end));
            }
        }
        let lease = match self.shared.rels.lock().as_ref() {
            Some(store) => store.slots.lease_needed().is_some(),
            None => true,
        };
        if lease {
            self.pool.extend_lease(&self.shared, TableKind::Relationships)?;
        }
        let id = self
            .shared
            .rels
            .lock()
            .as_mut()
            .ok_or(PoolError::Corruption("relationship table missing after its lease"))?
            .slots
            .reserve()?;
        txn.rels.insert(
            id,
            PendingRel::Create {
                src,
                dst,
                label: label.to_owned(),
                props,
            },
        );
        Ok(id)
    }

    /// Deletes relationship `id`.
    pub fn delete_relationship(&self, txn: &mut Transaction, id: RelId) -> Result<()> {
        self.check_txn(txn)?;
        let created = match txn.rels.get(&id) {
            Some(PendingRel::Delete { .. }) => return Err(relationship_missing(id)),
            Some(change) => change.created(),
            None => {
                let live = self
                    .shared
                    .rels
                    .lock()
                    .as_ref()
                    .is_some_and(|store| store.slots.is_live(id));
                if !live {
                    return Err(relationship_missing(id));
                }
                false
            }
        };
        txn.rels.insert(id, PendingRel::Delete { created });
        Ok(())
    }

    /// Reads a committed relationship.
    pub fn get_relationship(&self, id: RelId) -> Result<Relationship> {
        self.pool.read_relationship(&self.shared, id)
    }

    /// Every committed relationship, in slot order.
    pub fn relationships(&self) -> Result<Vec<Relationship>> {
        self.pool.scan_relationships(&self.shared, None)
    }

    /// Committed relationships with `node` as source or destination.
    pub fn relationships_of(&self, node: NodeId) -> Result<Vec<Relationship>> {
        self.pool.scan_relationships(&self.shared, Some(node))
    }

    /// Number of committed relationships.
    pub fn relationship_count(&self) -> Result<u32> {
        self.pool.ensure_usable()?;
        self.shared.ensure_live()?;
        Ok(self
            .shared
            .rels
            .lock()
            .as_ref()
            .map_or(0, |store| store.slots.live_count()))
    }

    /// Maximum number of live relationships.
    pub fn relationship_capacity(&self) -> u32 {
        self.shared.rel_capacity()
    }

    /// Reads a committed node.
    pub fn get_node(&self, id: NodeId) -> Result<Node> {
        self.pool.read_node(&self.shared, id)
    }

    /// Every committed node, in slot order.
    pub fn nodes(&self) -> Result<Vec<Node>> {
        self.pool.scan_nodes(&self.shared, None)
    }

    /// Committed nodes carrying `label`, in slot order.
    pub fn nodes_by_label(&self, label: &str) -> Result<Vec<Node>> {
        self.pool.scan_nodes(&self.shared, Some(label))
    }

    /// Number of committed nodes.
    pub fn node_count(&self) -> Result<u32> {
        self.pool.ensure_usable()?;
        self.shared.ensure_live()?;
        Ok(self.shared.slots.lock().live_count())
    }

    fn node_visible(&self, txn: &Transaction, id: NodeId) -> bool {
        match txn.pending.get(&id) {
            Some(Pending::Put { .. }) => true,
            Some(Pending::Delete { .. }) => false,
            None => self.shared.slots.lock().is_live(id),
        }
    }

    fn check_txn(&self, txn: &Transaction) -> Result<()> {
        if !Arc::ptr_eq(&txn.graph, &self.shared) {
            return Err(PoolError::Invalid("transaction belongs to another graph"));
        }
        txn.ensure_open()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

fn validate(label: &str, props: &Properties) -> Result<()> {
    dict::validate(label)?;
    props.keys().try_for_each(|key| dict::validate(key))
}

pub(crate) fn node_missing(id: NodeId) -> PoolError {
    PoolError::not_found("node", id)
}

pub(crate) fn relationship_missing(id: RelId) -> PoolError {
    PoolError::not_found("relationship", id)
}
