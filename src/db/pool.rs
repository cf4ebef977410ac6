use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::config::PoolOptions;
use super::graph::{node_missing, relationship_missing, Graph, GraphShared};
use super::transaction::{Pending, PendingRel, Transaction};
use crate::admin::verify::{verify_region, VerifyReport};
use crate::primitives::concurrency::RegionLock;
use crate::primitives::io::{FileIo, StdFileIo};
use crate::primitives::region::{format, Allocator, PoolHeader, RegionMeta};
use crate::primitives::wal::LogArea;
use crate::storage::dict::Dictionary;
use crate::storage::directory::{Directory, GraphEntry};
use crate::storage::node::{
    read_body, read_slot, read_slots, SlotMap, TableHeader, TableKind, LEASE_SPAN, MAX_GRAPH_NAME,
};
use crate::storage::plan::{CommitPlan, PlannedCommit};
use crate::storage::props::{decode_body, decode_label, RawBody};
use crate::storage::redo::apply;
use crate::storage::relationship::{decode_endpoints, decode_rel_body, RelStore};
use crate::storage::{
    recover, Node, PoolMetrics, Properties, RecoveryAction, RecoveryReport, Relationship,
};
use crate::types::{Lsn, NodeId, Offset, PoolError, RelId, Result, TxnId};

/// Committed in-memory view of an open pool.
pub(crate) struct PoolState {
    pub(crate) io: Arc<dyn FileIo>,
    pub(crate) header: PoolHeader,
    pub(crate) log: LogArea,
    pub(crate) meta: RegionMeta,
    pub(crate) alloc: Allocator,
    pub(crate) directory: Directory,
    pub(crate) dict: Dictionary,
    pub(crate) graphs: HashMap<String, Arc<GraphShared>>,
    pub(crate) recovery: RecoveryReport,
}

struct PoolInner {
    path: Option<PathBuf>,
    options: PoolOptions,
    state: RwLock<Option<PoolState>>,
    poisoned: AtomicBool,
    next_txn: AtomicU64,
    lock: Mutex<Option<RegionLock>>,
}

/// Handle to an open pool.
///
/// A pool is one region of persistent storage holding any number of named
/// graphs. Handles are cheap to clone and share one open pool; the pool stays
/// exclusively owned by this process until [`Pool::close`] or until the last
/// handle is dropped.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

/// Space and progress figures for an open pool.
#[derive(Clone, Debug, Serialize)]
pub struct PoolStats {
    /// Region size in bytes.
    pub pool_size: u64,
    /// Bytes reserved for the log area.
    pub log_capacity: u64,
    /// First heap byte.
    pub heap_offset: u64,
    /// Heap high-water mark.
    pub heap_top: u64,
    /// Blocks on the free list.
    pub free_blocks: usize,
    /// Payload bytes held by free blocks.
    pub free_bytes: u64,
    /// Never-used bytes past the high-water mark.
    pub wilderness: u64,
    /// Number of graphs.
    pub graphs: usize,
    /// Interned labels and property keys.
    pub strings: usize,
    /// LSN of the last applied commit.
    pub last_lsn: u64,
    /// What recovery did when the pool was opened.
    pub recovery: RecoveryReport,
}

impl Pool {
    /// Creates a pool of `size` bytes at `path`, or opens the pool already
    /// there when it has the same size.
    pub fn create(path: impl AsRef<Path>, size: u64) -> Result<Self> {
        Self::create_with(path, size, PoolOptions::default())
    }

    /// [`Pool::create`] with explicit options.
    pub fn create_with(path: impl AsRef<Path>, size: u64, options: PoolOptions) -> Result<Self> {
        let path = path.as_ref();
        let existed = path.exists();
        let lock = RegionLock::claim(path)?;
        let result = StdFileIo::open(path).and_then(|io| {
            let lock = Self::lock_file(lock, &io, &options)?;
            Self::create_on(Arc::new(io), size, options, Some(path.to_path_buf()), Some(lock))
        });
        if result.is_err() && !existed {
            if let Err(err) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %err, "pool.create.cleanup_failed");
            }
        }
        result
    }

    /// Opens an existing pool at `path`, replaying any interrupted commit.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, PoolOptions::default())
    }

    /// [`Pool::open`] with explicit options.
    pub fn open_with(path: impl AsRef<Path>, options: PoolOptions) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PoolError::not_found("pool", path.display()));
        }
        let lock = RegionLock::claim(path)?;
        let io = StdFileIo::open_existing(path)?;
        let lock = Self::lock_file(lock, &io, &options)?;
        Self::open_on(Arc::new(io), options, Some(path.to_path_buf()), Some(lock))
    }

    /// Creates (or opens) a pool over caller-supplied storage.
    pub fn create_with_io(io: Arc<dyn FileIo>, size: u64, options: PoolOptions) -> Result<Self> {
        Self::create_on(io, size, options, None, None)
    }

    /// Opens a pool over caller-supplied storage.
    pub fn open_with_io(io: Arc<dyn FileIo>, options: PoolOptions) -> Result<Self> {
        Self::open_on(io, options, None, None)
    }

    /// Deletes the pool file at `path`.
    pub fn destroy(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PoolError::not_found("pool", path.display()));
        }
        {
            let lock = RegionLock::claim(path)?;
            let io = StdFileIo::open_existing(path)?;
            let _lock = Self::lock_file(lock, &io, &PoolOptions::default())?;
            PoolHeader::read(&io)?;
        }
        std::fs::remove_file(path)?;
        info!(path = %path.display(), "pool.destroyed");
        Ok(())
    }

    fn lock_file(mut lock: RegionLock, io: &StdFileIo, options: &PoolOptions) -> Result<RegionLock> {
        if options.advisory_lock {
            lock.lock_file(Arc::clone(io.file()))?;
        }
        Ok(lock)
    }

    fn create_on(
        io: Arc<dyn FileIo>,
        size: u64,
        options: PoolOptions,
        path: Option<PathBuf>,
        lock: Option<RegionLock>,
    ) -> Result<Self> {
        let name = describe(path.as_deref());
        if PoolHeader::is_unformatted(&*io)? {
            let header = PoolHeader::plan(size, options.log_capacity, rand::random())?;
            format(&*io, &header)?;
            info!(
                pool = %name,
                size,
                log_capacity = header.log_capacity,
                "pool.created"
            );
        } else {
            match PoolHeader::read(&*io) {
                Ok(header) if header.pool_size == size => {}
                Ok(_) | Err(PoolError::Corruption(_)) => {
                    return Err(PoolError::already_exists("pool", name));
                }
                Err(err) => return Err(err),
            }
        }
        Self::open_on(io, options, path, lock)
    }

    fn open_on(
        io: Arc<dyn FileIo>,
        options: PoolOptions,
        path: Option<PathBuf>,
        lock: Option<RegionLock>,
    ) -> Result<Self> {
        let header = PoolHeader::load(&*io)?;
        let recovery = recover(&*io)?;
        if recovery.action == RecoveryAction::Replayed {
            options.metrics.replay();
        }
        let meta = RegionMeta::read(&*io, &header)?;
        let alloc = Allocator::load(&*io, &header, &meta)?;
        let dict = Dictionary::load(&*io, &header, &meta)?;
        let directory = Directory::load(&*io, &header, &meta)?;
        info!(
            pool = %describe(path.as_deref()),
            size = header.pool_size,
            graphs = directory.len(),
            last_lsn = meta.last_lsn,
            recovery = ?recovery.action,
            "pool.open"
        );
        let state = PoolState {
            io,
            log: LogArea::new(&header),
            header,
            meta,
            alloc,
            directory,
            dict,
            graphs: HashMap::new(),
            recovery,
        };
        Ok(Self {
            inner: Arc::new(PoolInner {
                path,
                options,
                next_txn: AtomicU64::new(meta.next_txn_id),
                state: RwLock::new(Some(state)),
                poisoned: AtomicBool::new(false),
                lock: Mutex::new(lock),
            }),
        })
    }

    /// Closes the pool and releases its file.
    ///
    /// Closing twice is a no-op. Fails with `Busy` while any transaction is
    /// open; afterwards every handle reports `Closed`.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.state.write();
        let Some(state) = guard.as_ref() else {
            return Ok(());
        };
        if state.graphs.values().any(|graph| graph.has_open_txn()) {
            return Err(PoolError::Busy("a transaction is still open"));
        }
        *guard = None;
        drop(guard);
        self.inner.lock.lock().take();
        info!(pool = %describe(self.inner.path.as_deref()), "pool.close");
        Ok(())
    }

    /// Path of the backing file, when the pool lives in one.
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Creates an empty graph that can hold `capacity` nodes.
    pub fn create_graph(&self, name: &str, capacity: u32) -> Result<Graph> {
        if name.is_empty() {
            return Err(PoolError::Invalid("graph name must not be empty"));
        }
        if name.len() > MAX_GRAPH_NAME {
            return Err(PoolError::Invalid("graph name is limited to 255 bytes"));
        }
        if capacity == 0 {
            return Err(PoolError::Invalid("graph capacity must be positive"));
        }
        let shared = self.with_state_mut(|state| {
            if state.directory.contains(name) {
                return Err(PoolError::already_exists("graph", name));
            }
            let txn = self.next_txn_id();
            let mut plan = CommitPlan::new(
                &*state.io,
                state.header,
                state.meta,
                &state.alloc,
                &state.dict,
            );
            let (id, table) = plan.create_table(name, capacity)?;
            let entry = GraphEntry {
                id,
                name: name.to_owned(),
                table,
                capacity,
            };
            let site = plan.write_directory(&state.directory, state.directory.with_entry(&entry))?;
            let planned = plan.finish(txn);
            self.execute(state, planned)?;
            state.directory.insert(entry.clone(), site.block, site.capacity);
            let slots = SlotMap::empty(capacity, LEASE_SPAN);
            let shared = Arc::new(GraphShared::new(entry, slots, None));
            state.graphs.insert(name.to_owned(), Arc::clone(&shared));
            info!(graph = name, id = id.0, capacity, "pool.graph.created");
            Ok(shared)
        })?;
        Ok(Graph::new(self.clone(), shared))
    }

    /// Opens an existing graph.
    pub fn open_graph(&self, name: &str) -> Result<Graph> {
        let shared = self.with_state_mut(|state| {
            if let Some(shared) = state.graphs.get(name) {
                return Ok(Arc::clone(shared));
            }
            let entry = state
                .directory
                .get(name)
                .cloned()
                .ok_or_else(|| PoolError::not_found("graph", name))?;
            let io = &*state.io;
            let salt = state.header.salt;
            let table = TableHeader::read_kind(io, entry.table, salt, TableKind::Nodes)?;
            let slots = read_slots(io, entry.table, entry.capacity)?;
            let slots = SlotMap::from_slots(&slots, table.issued);
            let rels = if table.link.is_null() {
                None
            } else {
                let header =
                    TableHeader::read_kind(io, table.link, salt, TableKind::Relationships)?;
                let rel_slots = read_slots(io, table.link, header.capacity)?;
                let verify = self.inner.options.verify_checksums;
                Some(RelStore::load(table.link, &rel_slots, header.issued, |slot| {
                    let bytes = read_body(io, salt, slot, verify)?;
                    let (src, dst, _) = decode_endpoints(&bytes)?;
                    Ok((src, dst))
                })?)
            };
            debug!(
                graph = name,
                issued = table.issued,
                relationships = rels.as_ref().map_or(0, |store| store.slots.live_count()),
                "pool.graph.opened"
            );
            let shared = Arc::new(GraphShared::new(entry, slots, rels));
            state.graphs.insert(name.to_owned(), Arc::clone(&shared));
            Ok(shared)
        })?;
        Ok(Graph::new(self.clone(), shared))
    }

    /// Drops a graph and every node and relationship in it.
    ///
    /// Fails with `Busy` while a transaction is open on the graph.
    pub fn drop_graph(&self, name: &str) -> Result<()> {
        self.with_state_mut(|state| {
            let entry = state
                .directory
                .get(name)
                .cloned()
                .ok_or_else(|| PoolError::not_found("graph", name))?;
            let shared = state.graphs.get(name).cloned();
            let io = &*state.io;
            let salt = state.header.salt;
            let table = TableHeader::read_kind(io, entry.table, salt, TableKind::Nodes)?;
            let slots = read_slots(io, entry.table, entry.capacity)?;
            let bodies: Vec<_> = slots
                .iter()
                .filter(|slot| slot.live)
                .map(|slot| slot.body)
                .collect();
            let rel_bodies: Vec<_> = if table.link.is_null() {
                Vec::new()
            } else {
                let rels =
                    TableHeader::read_kind(io, table.link, salt, TableKind::Relationships)?;
                read_slots(io, table.link, rels.capacity)?
                    .iter()
                    .filter(|slot| slot.live)
                    .map(|slot| slot.body)
                    .collect()
            };
            let txn = self.next_txn_id();
            let mut plan = CommitPlan::new(
                &*state.io,
                state.header,
                state.meta,
                &state.alloc,
                &state.dict,
            );
            let site = plan.write_directory(&state.directory, state.directory.without(name))?;
            if !table.link.is_null() {
                plan.drop_table(table.link, &rel_bodies)?;
            }
            plan.drop_table(entry.table, &bodies)?;
            let planned = plan.finish(txn);
            if let Some(shared) = &shared {
                shared.retire()?;
            }
            self.execute(state, planned)?;
            state.directory.remove(name, site.block, site.capacity);
            state.graphs.remove(name);
            info!(
                graph = name,
                nodes = bodies.len(),
                relationships = rel_bodies.len(),
                "pool.graph.dropped"
            );
            Ok(())
        })
    }

    /// Names of all graphs, sorted.
    pub fn graph_names(&self) -> Result<Vec<String>> {
        self.with_state(|state| Ok(state.directory.names()))
    }

    /// LSN of the last applied commit.
    pub fn last_lsn(&self) -> Result<Lsn> {
        self.with_state(|state| Ok(Lsn(state.meta.last_lsn)))
    }

    /// Space and progress figures.
    pub fn stats(&self) -> Result<PoolStats> {
        self.with_state(|state| {
            Ok(PoolStats {
                pool_size: state.header.pool_size,
                log_capacity: state.header.log_capacity,
                heap_offset: state.header.heap_offset,
                heap_top: state.alloc.top(),
                free_blocks: state.alloc.free_blocks(),
                free_bytes: state.alloc.free_bytes(),
                wilderness: state.alloc.wilderness(),
                graphs: state.directory.len(),
                strings: state.dict.len(),
                last_lsn: state.meta.last_lsn,
                recovery: state.recovery,
            })
        })
    }

    /// Checks every on-region structure of the open pool.
    pub fn verify(&self) -> Result<VerifyReport> {
        self.with_state(|state| verify_region(&*state.io))
    }

    pub(crate) fn next_txn_id(&self) -> TxnId {
        TxnId(self.inner.next_txn.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn metrics(&self) -> Arc<dyn PoolMetrics> {
        Arc::clone(&self.inner.options.metrics)
    }

    pub(crate) fn ensure_usable(&self) -> Result<()> {
        self.with_state(|_| Ok(()))
    }

    fn ensure_healthy(&self) -> Result<()> {
        if self.inner.poisoned.load(Ordering::Acquire) {
            return Err(PoolError::Durability(
                "pool was poisoned by an earlier durability failure; reopen it".into(),
            ));
        }
        Ok(())
    }

    fn with_state<T>(&self, f: impl FnOnce(&PoolState) -> Result<T>) -> Result<T> {
        let guard = self.inner.state.read();
        let state = guard.as_ref().ok_or(PoolError::Closed)?;
        self.ensure_healthy()?;
        f(state)
    }

    fn with_state_mut<T>(&self, f: impl FnOnce(&mut PoolState) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.state.write();
        let state = guard.as_mut().ok_or(PoolError::Closed)?;
        self.ensure_healthy()?;
        f(state)
    }

    /// Runs a planned commit and counts it.
    fn execute(&self, state: &mut PoolState, planned: PlannedCommit) -> Result<()> {
        let (records, bytes) = (planned.records.len(), planned.payload.len());
        self.install(state, planned)?;
        self.inner.options.metrics.commit(records, bytes);
        Ok(())
    }

    /// Flushes, applies and installs a planned commit.
    ///
    /// Any write or sync failure from the flush onwards poisons the pool.
    fn install(&self, state: &mut PoolState, planned: PlannedCommit) -> Result<()> {
        let sync = self.inner.options.sync();
        let io = &*state.io;
        let segment = match state.log.flush(
            io,
            planned.lsn,
            planned.txn,
            planned.records.len() as u32,
            &planned.payload,
            sync,
        ) {
            Ok(segment) => segment,
            Err(err @ PoolError::CapacityExceeded { .. }) => return Err(err),
            Err(err) => return Err(self.poison(err)),
        };
        debug!(
            lsn = planned.lsn.0,
            txn = planned.txn.0,
            records = planned.records.len(),
            "pool.commit.flushed"
        );
        let applied = planned
            .records
            .iter()
            .try_for_each(|record| apply(io, &state.header, record))
            .and_then(|()| if sync { io.sync_all() } else { Ok(()) })
            .and_then(|()| state.log.mark_applied(io, &segment));
        if let Err(err) = applied {
            return Err(self.poison(err));
        }
        debug!(lsn = planned.lsn.0, "pool.commit.applied");
        state.meta = planned.meta;
        state.alloc = planned.alloc;
        let (added, tail) = planned.delta.into_parts();
        state.dict.absorb(added, tail);
        Ok(())
    }

    fn poison(&self, err: PoolError) -> PoolError {
        self.inner.poisoned.store(true, Ordering::Release);
        warn!(error = %err, "pool.poisoned");
        PoolError::Durability(err.to_string())
    }

    /// Durably raises the issued mark of one of the graph's tables before
    /// more ids are handed out, creating the relationship table on first use.
    ///
    /// Lease updates are not counted as commits.
    pub(crate) fn extend_lease(&self, shared: &GraphShared, kind: TableKind) -> Result<()> {
        self.with_state_mut(|state| {
            shared.ensure_live()?;
            let txn = self.next_txn_id();
            let mut plan = CommitPlan::new(
                &*state.io,
                state.header,
                state.meta,
                &state.alloc,
                &state.dict,
            );
            match kind {
                TableKind::Nodes => {
                    let Some(issued) = shared.slots.lock().lease_needed() else {
                        return Ok(());
                    };
                    let link = shared
                        .rels
                        .lock()
                        .as_ref()
                        .map_or(Offset::default(), |store| store.table);
                    plan.put_table_header(shared.table, shared.table_header(kind, issued, link));
                    let planned = plan.finish(txn);
                    self.install(state, planned)?;
                    shared.slots.lock().grant(issued);
                    debug!(graph = %shared.name, issued, "pool.lease.nodes");
                }
                TableKind::Relationships => {
                    let node_issued = shared.slots.lock().issued();
                    let mut rels = shared.rels.lock();
                    match rels.as_mut() {
                        Some(store) => {
                            let Some(issued) = store.slots.lease_needed() else {
                                return Ok(());
                            };
                            let header = shared.table_header(kind, issued, shared.table);
                            plan.put_table_header(store.table, header);
                            let planned = plan.finish(txn);
                            self.install(state, planned)?;
                            store.slots.grant(issued);
                            debug!(graph = %shared.name, issued, "pool.lease.relationships");
                        }
                        None => {
                            let header = shared.table_header(kind, LEASE_SPAN, shared.table);
                            let block = plan.create_rel_table(header)?;
                            plan.put_table_header(
                                shared.table,
                                shared.table_header(TableKind::Nodes, node_issued, block),
                            );
                            let planned = plan.finish(txn);
                            self.install(state, planned)?;
                            *rels = Some(RelStore::empty(block, shared.rel_capacity(), LEASE_SPAN));
                            info!(
                                graph = %shared.name,
                                capacity = shared.rel_capacity(),
                                "pool.graph.relationship_table"
                            );
                        }
                    }
                }
            }
            Ok(())
        })
    }

    pub(crate) fn commit_graph(&self, shared: &GraphShared, txn: &Transaction) -> Result<()> {
        self.with_state_mut(|state| {
            shared.ensure_live()?;
            if txn.is_empty() {
                return Ok(());
            }
            let io = &*state.io;
            let mut plan = CommitPlan::new(io, state.header, state.meta, &state.alloc, &state.dict);
            for (id, change) in &txn.pending {
                match change {
                    Pending::Put {
                        label,
                        props,
                        created,
                    } => {
                        let old = if *created {
                            None
                        } else {
                            Some(read_slot(io, shared.table, id.slot())?.body)
                        };
                        plan.put_node(shared.table, *id, old, label, props)?;
                    }
                    Pending::Delete { created: true } => {}
                    Pending::Delete { created: false } => {
                        let slot = read_slot(io, shared.table, id.slot())?;
                        plan.clear_node(shared.table, *id, slot.body)?;
                    }
                }
            }
            let rel_table = shared.rels.lock().as_ref().map(|store| store.table);
            if let Some(table) = rel_table {
                for (id, change) in &txn.rels {
                    match change {
                        PendingRel::Create {
                            src,
                            dst,
                            label,
                            props,
                        } => plan.put_relationship(table, *id, *src, *dst, label, props)?,
                        PendingRel::Delete { created: true } => {}
                        PendingRel::Delete { created: false } => {
                            let slot = read_slot(io, table, id.slot())?;
                            plan.clear_relationship(table, *id, slot.body)?;
                        }
                    }
                }
            }
            let planned = plan.finish(txn.id());
            self.execute(state, planned)?;

            let metrics = &self.inner.options.metrics;
            let mut slots = shared.slots.lock();
            for (id, change) in &txn.pending {
                match change {
                    Pending::Put { created: true, .. } => {
                        slots.commit_create(*id);
                        metrics.node_created();
                    }
                    Pending::Put { .. } => {}
                    Pending::Delete { created: true } => slots.release(*id),
                    Pending::Delete { created: false } => {
                        slots.commit_delete(*id);
                        metrics.node_deleted();
                    }
                }
            }
            drop(slots);
            if let Some(store) = shared.rels.lock().as_mut() {
                for (id, change) in &txn.rels {
                    match change {
                        PendingRel::Create { src, dst, .. } => {
                            store.slots.commit_create(*id);
                            store.adjacency.attach(*id, *src, *dst);
                            metrics.relationship_created();
                        }
                        PendingRel::Delete { created: true } => store.slots.release(*id),
                        PendingRel::Delete { created: false } => {
                            store.slots.commit_delete(*id);
                            store.adjacency.detach(*id);
                            metrics.relationship_deleted();
                        }
                    }
                }
            }
            Ok(())
        })
    }

    pub(crate) fn read_node(&self, shared: &GraphShared, id: NodeId) -> Result<Node> {
        self.with_state(|state| {
            shared.ensure_live()?;
            if id.slot() >= shared.capacity {
                return Err(node_missing(id));
            }
            let slot = read_slot(&*state.io, shared.table, id.slot())?;
            if !slot.holds(id) {
                return Err(node_missing(id));
            }
            let bytes = read_body(
                &*state.io,
                state.header.salt,
                &slot,
                self.inner.options.verify_checksums,
            )?;
            materialize(state, id, &bytes)
        })
    }

    pub(crate) fn read_relationship(
        &self,
        shared: &GraphShared,
        id: RelId,
    ) -> Result<Relationship> {
        self.with_state(|state| {
            shared.ensure_live()?;
            let table = shared.rels.lock().as_ref().map(|store| store.table);
            let Some(table) = table else {
                return Err(relationship_missing(id));
            };
            if id.slot() >= shared.rel_capacity() {
                return Err(relationship_missing(id));
            }
            let slot = read_slot(&*state.io, table, id.slot())?;
            if !slot.holds(id) {
                return Err(relationship_missing(id));
            }
            let bytes = read_body(
                &*state.io,
                state.header.salt,
                &slot,
                self.inner.options.verify_checksums,
            )?;
            materialize_relationship(state, id, &bytes)
        })
    }

    /// Committed relationships, all of them or those touching `node`.
    pub(crate) fn scan_relationships(
        &self,
        shared: &GraphShared,
        node: Option<NodeId>,
    ) -> Result<Vec<Relationship>> {
        self.with_state(|state| {
            shared.ensure_live()?;
            let (table, ids) = {
                let rels = shared.rels.lock();
                let Some(store) = rels.as_ref() else {
                    return Ok(Vec::new());
                };
                (store.table, node.map(|node| store.adjacency.of(node)))
            };
            let io = &*state.io;
            let verify = self.inner.options.verify_checksums;
            let mut out = Vec::new();
            match ids {
                Some(ids) => {
                    for id in ids {
                        let slot = read_slot(io, table, id.slot())?;
                        let bytes = read_body(io, state.header.salt, &slot, verify)?;
                        out.push(materialize_relationship(state, id, &bytes)?);
                    }
                }
                None => {
                    let slots = read_slots(io, table, shared.rel_capacity())?;
                    for (idx, slot) in slots.iter().enumerate().filter(|(_, slot)| slot.live) {
                        let bytes = read_body(io, state.header.salt, slot, verify)?;
                        let id = RelId::new(idx as u32, slot.generation);
                        out.push(materialize_relationship(state, id, &bytes)?);
                    }
                }
            }
            Ok(out)
        })
    }

    pub(crate) fn scan_nodes(&self, shared: &GraphShared, label: Option<&str>) -> Result<Vec<Node>> {
        self.with_state(|state| {
            shared.ensure_live()?;
            let wanted = match label {
                Some(label) => match state.dict.lookup(label) {
                    Some(id) => Some(id),
                    None => return Ok(Vec::new()),
                },
                None => None,
            };
            let verify = self.inner.options.verify_checksums;
            let slots = read_slots(&*state.io, shared.table, shared.capacity)?;
            let mut out = Vec::new();
            for (idx, slot) in slots.iter().enumerate() {
                if !slot.live {
                    continue;
                }
                let bytes = read_body(&*state.io, state.header.salt, slot, verify)?;
                if let Some(wanted) = wanted {
                    if decode_label(&bytes)? != wanted {
                        continue;
                    }
                }
                let id = NodeId::new(idx as u32, slot.generation);
                out.push(materialize(state, id, &bytes)?);
            }
            Ok(out)
        })
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("path", &self.inner.path)
            .field("options", &self.inner.options)
            .field("poisoned", &self.inner.poisoned.load(Ordering::Relaxed))
            .finish()
    }
}

fn resolve(state: &PoolState, raw: RawBody) -> Result<(String, Properties)> {
    let label = state.dict.resolve_stored(raw.label)?.to_owned();
    let mut properties = Properties::new();
    for (key, value) in raw.props {
        properties.insert(state.dict.resolve_stored(key)?.to_owned(), value);
    }
    Ok((label, properties))
}

fn materialize(state: &PoolState, id: NodeId, bytes: &[u8]) -> Result<Node> {
    let (label, properties) = resolve(state, decode_body(bytes)?)?;
    Ok(Node {
        id,
        label,
        properties,
    })
}

fn materialize_relationship(state: &PoolState, id: RelId, bytes: &[u8]) -> Result<Relationship> {
    let raw = decode_rel_body(bytes)?;
    let (label, properties) = resolve(state, raw.body)?;
    Ok(Relationship {
        id,
        src: raw.src,
        dst: raw.dst,
        label,
        properties,
    })
}

fn describe(path: Option<&Path>) -> String {
    path.map_or_else(|| "<memory>".to_owned(), |p| p.display().to_string())
}
