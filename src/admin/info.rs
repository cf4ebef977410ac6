use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::primitives::io::FileIo;
use crate::primitives::region::{Allocator, PoolHeader, RegionMeta};
use crate::primitives::wal::{LogArea, SegmentRead, SegmentState};
use crate::storage::dict::Dictionary;
use crate::storage::directory::Directory;
use crate::storage::node::{read_slots, Slot, TableHeader, TableKind};
use crate::types::{PoolError, Result as CoreResult};

use crate::admin::util::open_region;
use crate::admin::Result;

/// Layout and contents summary of a pool file.
#[derive(Clone, Debug, Serialize)]
pub struct InfoReport {
    /// File inspected.
    pub path: PathBuf,
    /// Region size recorded at creation.
    pub pool_size: u64,
    /// Log area offset.
    pub log_offset: u64,
    /// Log area size.
    pub log_capacity: u64,
    /// First heap byte.
    pub heap_offset: u64,
    /// Heap high-water mark.
    pub heap_top: u64,
    /// Blocks on the free list.
    pub free_blocks: usize,
    /// Payload bytes on the free list.
    pub free_bytes: u64,
    /// LSN of the last applied commit.
    pub last_lsn: u64,
    /// Next transaction id to be issued.
    pub next_txn_id: u64,
    /// Interned strings.
    pub strings: usize,
    /// State of the log segment slot.
    pub segment: SegmentInfo,
    /// Graphs, sorted by name.
    pub graphs: Vec<GraphInfo>,
    /// Set when the structures could not be read consistently.
    pub problem: Option<String>,
}

/// Log segment slot summary.
#[derive(Clone, Debug, Serialize)]
pub struct SegmentInfo {
    /// Slot state; `None` when torn.
    pub state: Option<SegmentState>,
    /// LSN of the segment, when it has a valid header.
    pub lsn: Option<u64>,
    /// Records it carries.
    pub records: u32,
    /// Payload length.
    pub payload_len: u32,
}

/// One directory entry.
#[derive(Clone, Debug, Serialize)]
pub struct GraphInfo {
    /// Graph name.
    pub name: String,
    /// Graph id.
    pub id: u32,
    /// Slot capacity.
    pub capacity: u32,
    /// Live nodes.
    pub nodes: u32,
    /// Live relationships.
    pub relationships: u32,
    /// Node table offset.
    pub table: u64,
}

/// Summarises the pool file at `path` without running recovery.
///
/// # Errors
///
/// Returns an error if the file is missing, already open, or its header or
/// superblock is unreadable.
pub fn info(path: impl AsRef<Path>) -> Result<InfoReport> {
    let path = path.as_ref();
    let handle = open_region(path)?;
    let io = &handle.io;
    let header = handle.header;
    let meta = RegionMeta::read(io, &header)?;
    let segment = segment_info(io, &header)?;
    let mut report = InfoReport {
        path: path.to_path_buf(),
        pool_size: header.pool_size,
        log_offset: header.log_offset,
        log_capacity: header.log_capacity,
        heap_offset: header.heap_offset,
        heap_top: meta.heap_top,
        free_blocks: 0,
        free_bytes: 0,
        last_lsn: meta.last_lsn,
        next_txn_id: meta.next_txn_id,
        strings: 0,
        segment,
        graphs: Vec::new(),
        problem: None,
    };
    if let Err(err) = fill_contents(io, &header, &meta, &mut report) {
        match err {
            PoolError::Corruption(reason) => report.problem = Some(reason.to_owned()),
            other => return Err(other.into()),
        }
    }
    Ok(report)
}

fn segment_info(io: &dyn FileIo, header: &PoolHeader) -> CoreResult<SegmentInfo> {
    let (state, segment) = match LogArea::new(header).read(io)? {
        SegmentRead::Empty => (Some(SegmentState::Empty), None),
        SegmentRead::Flushed { header, .. } => (Some(SegmentState::Flushed), Some(header)),
        SegmentRead::Applied(header) => (Some(SegmentState::Applied), Some(header)),
        SegmentRead::Torn(_) => (None, None),
    };
    Ok(SegmentInfo {
        state,
        lsn: segment.map(|s| s.lsn.0),
        records: segment.map_or(0, |s| s.records),
        payload_len: segment.map_or(0, |s| s.payload_len),
    })
}

fn fill_contents(
    io: &dyn FileIo,
    header: &PoolHeader,
    meta: &RegionMeta,
    report: &mut InfoReport,
) -> CoreResult<()> {
    let alloc = Allocator::load(io, header, meta)?;
    report.free_blocks = alloc.free_blocks();
    report.free_bytes = alloc.free_bytes();
    report.strings = Dictionary::load(io, header, meta)?.len();
    let directory = Directory::load(io, header, meta)?;
    for entry in directory.entries() {
        let slots = read_slots(io, entry.table, entry.capacity)?;
        let table = TableHeader::read_kind(io, entry.table, header.salt, TableKind::Nodes)?;
        let relationships = if table.link.is_null() {
            0
        } else {
            let rels =
                TableHeader::read_kind(io, table.link, header.salt, TableKind::Relationships)?;
            live(&read_slots(io, table.link, rels.capacity)?)
        };
        report.graphs.push(GraphInfo {
            name: entry.name.clone(),
            id: entry.id.0,
            capacity: entry.capacity,
            nodes: live(&slots),
            relationships,
            table: entry.table.0,
        });
    }
    Ok(())
}

fn live(slots: &[Slot]) -> u32 {
    slots.iter().filter(|slot| slot.live).count() as u32
}
