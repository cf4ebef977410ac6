//! Turns buffered transaction work into a resolved redo record list.
//!
//! Planning runs against copies of the allocator, superblock and dictionary
//! tail, so a plan that fails (heap full, log too small) leaves the pool
//! untouched. The caller installs the copies only after the segment applied.

use crate::primitives::io::FileIo;
use crate::primitives::region::{Allocator, BlockKind, HeaderWrite, PoolHeader, RegionMeta};
use crate::storage::dict::{self, DictDelta, DictPlacement, Dictionary, DICT_PAGE_LEN};
use crate::storage::directory::{directory_payload_len, Directory, MIN_DIR_CAPACITY};
use crate::storage::node::{table_payload_len, TableHeader, TableKind, LEASE_SPAN};
use crate::storage::props::{encode_body, PropValue, Properties};
use crate::storage::relationship::encode_rel_body;
use crate::storage::redo::{encode_records, LogRecord};
use crate::types::{GraphId, Lsn, NodeId, Offset, RelId, Result, StrId, TxnId};

/// Work planned for one commit.
pub struct CommitPlan<'a> {
    io: &'a dyn FileIo,
    header: PoolHeader,
    alloc: Allocator,
    meta: RegionMeta,
    dict: &'a Dictionary,
    delta: DictDelta,
    records: Vec<LogRecord>,
    headers: Vec<HeaderWrite>,
}

/// A finished plan, ready to flush.
#[derive(Debug)]
pub struct PlannedCommit {
    /// Segment sequence number.
    pub lsn: Lsn,
    /// Transaction the segment belongs to.
    pub txn: TxnId,
    /// Records in apply order, ending with the superblock.
    pub records: Vec<LogRecord>,
    /// Encoded records.
    pub payload: Vec<u8>,
    /// Superblock after the commit.
    pub meta: RegionMeta,
    /// Allocator after the commit.
    pub alloc: Allocator,
    /// Strings interned by the commit.
    pub delta: DictDelta,
}

/// Directory block chosen for a rewritten directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectorySite {
    /// Directory block.
    pub block: Offset,
    /// Entries it can hold.
    pub capacity: u32,
}

impl<'a> CommitPlan<'a> {
    /// Starts a plan over the committed pool state.
    pub fn new(
        io: &'a dyn FileIo,
        header: PoolHeader,
        meta: RegionMeta,
        alloc: &Allocator,
        dict: &'a Dictionary,
    ) -> Self {
        Self {
            io,
            header,
            alloc: alloc.clone(),
            meta,
            dict,
            delta: DictDelta::new(dict),
            records: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Id for `text`, interning it when new.
    pub fn intern(&mut self, text: &str) -> Result<StrId> {
        dict::validate(text)?;
        if let Some(id) = self.dict.lookup(text).or_else(|| self.delta.lookup(text)) {
            return Ok(id);
        }
        if self.delta.placement(text) == DictPlacement::NewPage {
            let page = self.allocate(BlockKind::Dictionary, DICT_PAGE_LEN)?;
            self.records.push(LogRecord::DictPage { block: page });
            let tail = self.delta.tail().page;
            if tail.is_null() {
                self.meta.dict_head = page.0;
            } else {
                self.records.push(LogRecord::DictLink { page: tail, next: page });
            }
            self.meta.dict_tail = page.0;
            self.delta.start_page(page);
        }
        let (at, count) = match self.delta.placement(text) {
            DictPlacement::Append { at, count } => (at, count),
            DictPlacement::NewPage => (0, 1),
        };
        let id = StrId(self.meta.next_str_id);
        self.meta.next_str_id += 1;
        self.records.push(LogRecord::DictAppend {
            page: self.delta.tail().page,
            at,
            count,
            id,
            text: text.to_owned(),
        });
        self.delta.record(id, text);
        Ok(id)
    }

    fn intern_props<'p>(&mut self, props: &'p Properties) -> Result<Vec<(StrId, &'p PropValue)>> {
        let mut entries = Vec::with_capacity(props.len());
        for (key, value) in props {
            entries.push((self.intern(key)?, value));
        }
        Ok(entries)
    }

    fn put_slot(
        &mut self,
        kind: TableKind,
        table: Offset,
        slot: u32,
        generation: u32,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let body = self.allocate(kind.body_block(), bytes.len() as u64)?;
        self.records.push(LogRecord::PutSlot {
            table,
            slot,
            generation,
            body,
            bytes,
        });
        Ok(())
    }

    /// Writes a node body and its live slot, retiring `old_body` when set.
    pub fn put_node(
        &mut self,
        table: Offset,
        id: NodeId,
        old_body: Option<Offset>,
        label: &str,
        props: &Properties,
    ) -> Result<()> {
        let label = self.intern(label)?;
        let entries = self.intern_props(props)?;
        let bytes = encode_body(label, &entries);
        self.put_slot(TableKind::Nodes, table, id.slot(), id.generation(), bytes)?;
        if let Some(old) = old_body {
            self.free(old)?;
        }
        Ok(())
    }

    /// Vacates the slot of `id` and frees its body.
    pub fn clear_node(&mut self, table: Offset, id: NodeId, body: Offset) -> Result<()> {
        self.records.push(LogRecord::ClearSlot {
            table,
            slot: id.slot(),
            generation: id.generation(),
        });
        self.free(body)
    }

    /// Writes a relationship body and its live slot.
    pub fn put_relationship(
        &mut self,
        table: Offset,
        id: RelId,
        src: NodeId,
        dst: NodeId,
        label: &str,
        props: &Properties,
    ) -> Result<()> {
        let label = self.intern(label)?;
        let entries = self.intern_props(props)?;
        let bytes = encode_rel_body(src, dst, label, &entries);
        self.put_slot(TableKind::Relationships, table, id.slot(), id.generation(), bytes)
    }

    /// Vacates the slot of relationship `id` and frees its body.
    pub fn clear_relationship(&mut self, table: Offset, id: RelId, body: Offset) -> Result<()> {
        self.records.push(LogRecord::ClearSlot {
            table,
            slot: id.slot(),
            generation: id.generation(),
        });
        self.free(body)
    }

    /// Allocates and initialises a node table for a new graph.
    ///
    /// The table starts with one lease of generations already issued.
    pub fn create_table(&mut self, name: &str, capacity: u32) -> Result<(GraphId, Offset)> {
        let graph = GraphId(self.meta.next_graph_id);
        self.meta.next_graph_id += 1;
        let block = self.allocate(BlockKind::NodeTable, table_payload_len(capacity))?;
        self.records.push(LogRecord::InitTable {
            block,
            header: TableHeader {
                kind: TableKind::Nodes,
                graph,
                capacity,
                name: name.to_owned(),
                issued: LEASE_SPAN,
                link: Offset::default(),
            },
        });
        Ok((graph, block))
    }

    /// Allocates and initialises the relationship table described by
    /// `header`, returning its block.
    pub fn create_rel_table(&mut self, header: TableHeader) -> Result<Offset> {
        let block = self.allocate(BlockKind::RelTable, table_payload_len(header.capacity))?;
        self.records.push(LogRecord::InitTable { block, header });
        Ok(block)
    }

    /// Rewrites the header of an existing slot table.
    pub fn put_table_header(&mut self, block: Offset, header: TableHeader) {
        self.records.push(LogRecord::PutTableHeader { block, header });
    }

    /// Frees a slot table and every body still referenced from it.
    pub fn drop_table(&mut self, table: Offset, bodies: &[Offset]) -> Result<()> {
        for body in bodies {
            self.free(*body)?;
        }
        self.free(table)
    }

    /// Rewrites the directory, moving it to a larger block when it is full.
    pub fn write_directory(
        &mut self,
        current: &Directory,
        entries: Vec<(GraphId, Offset)>,
    ) -> Result<DirectorySite> {
        let needed = entries.len() as u32;
        let site = if current.block().is_null() || needed > current.capacity() {
            let capacity = needed.saturating_mul(2).max(MIN_DIR_CAPACITY);
            let block = self.allocate(BlockKind::Directory, directory_payload_len(capacity))?;
            self.meta.directory = block.0;
            DirectorySite { block, capacity }
        } else {
            DirectorySite {
                block: current.block(),
                capacity: current.capacity(),
            }
        };
        self.records.push(LogRecord::PutDirectory {
            block: site.block,
            entries,
        });
        if site.block != current.block() && !current.block().is_null() {
            self.free(current.block())?;
        }
        Ok(site)
    }

    /// Number of records planned so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing was planned.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Seals the plan with the final superblock image.
    pub fn finish(mut self, txn: TxnId) -> PlannedCommit {
        let lsn = Lsn(self.meta.last_lsn + 1);
        self.meta.last_lsn = lsn.0;
        self.meta.next_txn_id = self.meta.next_txn_id.max(txn.0 + 1);
        self.alloc.store_roots(&mut self.meta);
        self.alloc.settle();
        self.records.push(LogRecord::Meta(self.meta));
        let payload = encode_records(&self.records);
        PlannedCommit {
            lsn,
            txn,
            records: self.records,
            payload,
            meta: self.meta,
            alloc: self.alloc,
            delta: self.delta,
        }
    }

    fn allocate(&mut self, kind: BlockKind, nbytes: u64) -> Result<Offset> {
        let offset = self.alloc.allocate(kind, nbytes, &mut self.headers)?;
        self.drain_headers();
        Ok(offset)
    }

    fn free(&mut self, offset: Offset) -> Result<()> {
        self.alloc
            .free(self.io, self.header.salt, offset, &mut self.headers)?;
        self.drain_headers();
        Ok(())
    }

    fn drain_headers(&mut self) {
        self.records.extend(
            self.headers
                .drain(..)
                .map(|write| LogRecord::Block {
                    offset: write.offset,
                    header: write.header,
                }),
        );
    }
}
