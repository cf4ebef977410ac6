//! The graph directory.
//!
//! One Directory block maps graph ids to node-table blocks. Names and
//! capacities are kept in each table's header, so the directory image stays
//! fixed-width and is always rewritten whole.

use std::collections::BTreeMap;

use crate::primitives::bytes::{get_u32, get_u64, put_u32, put_u64};
use crate::primitives::io::FileIo;
use crate::primitives::region::{payload_offset, BlockHeader, BlockKind, PoolHeader, RegionMeta};
use crate::storage::node::{TableHeader, TableKind};
use crate::types::{block_crc32, GraphId, Offset, PoolError, Result};

const DIR_MAGIC: [u8; 4] = *b"PMDR";
/// Bytes in front of the first directory entry.
pub const DIR_HEADER_LEN: u64 = 16;
/// Encoded length of one entry.
pub const DIR_ENTRY_LEN: u64 = 16;
/// Smallest directory block, in entries.
pub const MIN_DIR_CAPACITY: u32 = 8;

/// Payload bytes for a directory of `capacity` entries.
pub fn directory_payload_len(capacity: u32) -> u64 {
    DIR_HEADER_LEN + capacity as u64 * DIR_ENTRY_LEN
}

/// Entries a directory block with `payload_len` bytes can hold.
pub fn directory_capacity(payload_len: u64) -> u32 {
    (payload_len.saturating_sub(DIR_HEADER_LEN) / DIR_ENTRY_LEN).min(u32::MAX as u64) as u32
}

/// Encodes a full directory image for the block at `block`.
pub fn encode_image(block: Offset, salt: u64, entries: &[(GraphId, Offset)]) -> Vec<u8> {
    let mut buf = vec![0u8; directory_payload_len(entries.len() as u32) as usize];
    buf[0..4].copy_from_slice(&DIR_MAGIC);
    put_u32(&mut buf, 4, entries.len() as u32);
    for (idx, (graph, table)) in entries.iter().enumerate() {
        let at = DIR_HEADER_LEN as usize + idx * DIR_ENTRY_LEN as usize;
        put_u32(&mut buf, at, graph.0);
        put_u64(&mut buf, at + 8, table.0);
    }
    let crc = block_crc32(payload_offset(block), salt, &buf[DIR_HEADER_LEN as usize..]);
    put_u32(&mut buf, 8, crc);
    buf
}

/// One graph known to the directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphEntry {
    /// Graph id.
    pub id: GraphId,
    /// Graph name.
    pub name: String,
    /// Node table block.
    pub table: Offset,
    /// Node capacity.
    pub capacity: u32,
}

/// Loaded directory.
#[derive(Clone, Debug, Default)]
pub struct Directory {
    block: Offset,
    capacity: u32,
    graphs: BTreeMap<String, GraphEntry>,
}

impl Directory {
    /// Loads the directory and every node-table header it references.
    pub fn load(io: &dyn FileIo, header: &PoolHeader, meta: &RegionMeta) -> Result<Self> {
        if meta.directory == 0 {
            return Ok(Self::default());
        }
        let block = Offset(meta.directory);
        let block_header = BlockHeader::read(io, block, header.salt)?;
        if block_header.kind != BlockKind::Directory {
            return Err(PoolError::Corruption("superblock directory is not a directory block"));
        }
        let capacity = directory_capacity(block_header.len);
        let mut head = [0u8; DIR_HEADER_LEN as usize];
        io.read_at(payload_offset(block), &mut head)?;
        if head[0..4] != DIR_MAGIC {
            return Err(PoolError::Corruption("directory magic mismatch"));
        }
        let count = get_u32(&head, 4);
        if count > capacity {
            return Err(PoolError::Corruption("directory count exceeds its block"));
        }
        let mut body = vec![0u8; count as usize * DIR_ENTRY_LEN as usize];
        io.read_at(payload_offset(block) + DIR_HEADER_LEN, &mut body)?;
        if get_u32(&head, 8) != block_crc32(payload_offset(block), header.salt, &body) {
            return Err(PoolError::Corruption("directory crc mismatch"));
        }
        let mut graphs = BTreeMap::new();
        for chunk in body.chunks_exact(DIR_ENTRY_LEN as usize) {
            let id = GraphId(get_u32(chunk, 0));
            let table = Offset(get_u64(chunk, 8));
            if table.0 < header.heap_offset || table.0 >= meta.heap_top {
                return Err(PoolError::Corruption("directory entry points outside the heap"));
            }
            let table_header = TableHeader::read_kind(io, table, header.salt, TableKind::Nodes)?;
            if table_header.graph != id {
                return Err(PoolError::Corruption("node table belongs to another graph"));
            }
            let entry = GraphEntry {
                id,
                name: table_header.name.clone(),
                table,
                capacity: table_header.capacity,
            };
            if graphs.insert(table_header.name, entry).is_some() {
                return Err(PoolError::Corruption("duplicate graph name in directory"));
            }
        }
        Ok(Self {
            block,
            capacity,
            graphs,
        })
    }

    /// Entry for `name`.
    pub fn get(&self, name: &str) -> Option<&GraphEntry> {
        self.graphs.get(name)
    }

    /// True when `name` is taken.
    pub fn contains(&self, name: &str) -> bool {
        self.graphs.contains_key(name)
    }

    /// Graph names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.graphs.keys().cloned().collect()
    }

    /// All entries, sorted by name.
    pub fn entries(&self) -> impl Iterator<Item = &GraphEntry> {
        self.graphs.values()
    }

    /// Number of graphs.
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    /// True when no graph exists.
    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Directory block, or null before the first graph.
    pub fn block(&self) -> Offset {
        self.block
    }

    /// Entries the current block can hold.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Image entries with `entry` added.
    pub fn with_entry(&self, entry: &GraphEntry) -> Vec<(GraphId, Offset)> {
        let mut out = self.image();
        out.push((entry.id, entry.table));
        out.sort();
        out
    }

    /// Image entries with `name` removed.
    pub fn without(&self, name: &str) -> Vec<(GraphId, Offset)> {
        let mut out: Vec<_> = self
            .graphs
            .values()
            .filter(|entry| entry.name != name)
            .map(|entry| (entry.id, entry.table))
            .collect();
        out.sort();
        out
    }

    fn image(&self) -> Vec<(GraphId, Offset)> {
        self.graphs
            .values()
            .map(|entry| (entry.id, entry.table))
            .collect()
    }

    /// Installs a committed insert.
    pub fn insert(&mut self, entry: GraphEntry, block: Offset, capacity: u32) {
        self.graphs.insert(entry.name.clone(), entry);
        self.block = block;
        self.capacity = capacity;
    }

    /// Installs a committed removal.
    pub fn remove(&mut self, name: &str, block: Offset, capacity: u32) -> Option<GraphEntry> {
        self.block = block;
        self.capacity = capacity;
        self.graphs.remove(name)
    }
}
