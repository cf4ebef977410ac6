//! Per-graph slot tables.
//!
//! A graph owns a node table and, once its first relationship is created, a
//! relationship table. Both are one heap block: a fixed 320-byte table header
//! (including the graph name) followed by `capacity` fixed-size slots. A slot
//! points at a separate body block holding the encoded label and properties.
//!
//! Ids are `(slot, generation)` pairs. Generations come from one counter per
//! table, and the header records the highest generation that may have been
//! handed out, so ids issued by a session that never committed are not
//! issued again after a reopen.

use std::collections::BTreeSet;

use crate::primitives::bytes::{get_u16, get_u32, get_u64, put_u16, put_u32, put_u64};
use crate::primitives::io::FileIo;
use crate::primitives::region::{payload_offset, BlockHeader, BlockKind};
use crate::types::{block_crc32, BlockCrc, GraphId, Offset, PoolError, Result, SlotKey};

const NODE_TABLE_MAGIC: [u8; 4] = *b"PMNT";
const REL_TABLE_MAGIC: [u8; 4] = *b"PMRT";
/// Longest graph name, in bytes.
pub const MAX_GRAPH_NAME: usize = 255;
const TABLE_FIXED_LEN: usize = 64;
const TABLE_ISSUED: usize = 16;
const TABLE_LINK: usize = 24;
const TABLE_CRC: usize = 60;
/// Bytes in front of the first slot.
pub const TABLE_HEADER_LEN: u64 = (TABLE_FIXED_LEN + 256) as u64;
/// Encoded length of one slot.
pub const SLOT_LEN: u64 = 24;
/// Generations granted per durable header update.
pub const LEASE_SPAN: u32 = 1024;

const SLOT_VACANT: u8 = 0;
const SLOT_LIVE: u8 = 1;
const SLOT_DELETED: u8 = 2;

/// Payload bytes needed for a table of `capacity` slots.
pub fn table_payload_len(capacity: u32) -> u64 {
    TABLE_HEADER_LEN + capacity as u64 * SLOT_LEN
}

/// Region offset of `slot` in the table block at `table`.
pub fn slot_offset(table: Offset, slot: u32) -> u64 {
    payload_offset(table) + TABLE_HEADER_LEN + slot as u64 * SLOT_LEN
}

/// What a slot table stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableKind {
    /// Nodes of a graph.
    Nodes,
    /// Relationships of a graph.
    Relationships,
}

impl TableKind {
    /// Block kind of the table itself.
    pub fn table_block(self) -> BlockKind {
        match self {
            TableKind::Nodes => BlockKind::NodeTable,
            TableKind::Relationships => BlockKind::RelTable,
        }
    }

    /// Block kind of the bodies its slots point at.
    pub fn body_block(self) -> BlockKind {
        match self {
            TableKind::Nodes => BlockKind::NodeBody,
            TableKind::Relationships => BlockKind::RelBody,
        }
    }

    /// On-region code used by log records.
    pub fn code(self) -> u8 {
        match self {
            TableKind::Nodes => 1,
            TableKind::Relationships => 2,
        }
    }

    /// Kind for a log record code.
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(TableKind::Nodes),
            2 => Ok(TableKind::Relationships),
            _ => Err(PoolError::Corruption("unknown table kind")),
        }
    }

    fn magic(self) -> [u8; 4] {
        match self {
            TableKind::Nodes => NODE_TABLE_MAGIC,
            TableKind::Relationships => REL_TABLE_MAGIC,
        }
    }

    fn from_block(kind: BlockKind) -> Result<Self> {
        match kind {
            BlockKind::NodeTable => Ok(TableKind::Nodes),
            BlockKind::RelTable => Ok(TableKind::Relationships),
            _ => Err(PoolError::Corruption("block is not a slot table")),
        }
    }
}

/// Header of a slot table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableHeader {
    /// Node or relationship table.
    pub kind: TableKind,
    /// Owning graph.
    pub graph: GraphId,
    /// Number of slots.
    pub capacity: u32,
    /// Graph name.
    pub name: String,
    /// Highest generation that may have been handed out.
    pub issued: u32,
    /// The companion table: a node table links its relationship table (null
    /// until one exists), a relationship table links its node table.
    pub link: Offset,
}

impl TableHeader {
    /// Encodes the header for the table block at `table`.
    pub fn encode(&self, table: Offset, salt: u64) -> Vec<u8> {
        let mut buf = vec![0u8; TABLE_HEADER_LEN as usize];
        buf[0..4].copy_from_slice(&self.kind.magic());
        put_u32(&mut buf, 4, self.graph.0);
        put_u32(&mut buf, 8, self.capacity);
        put_u16(&mut buf, 12, self.name.len() as u16);
        put_u32(&mut buf, TABLE_ISSUED, self.issued);
        put_u64(&mut buf, TABLE_LINK, self.link.0);
        buf[TABLE_FIXED_LEN..TABLE_FIXED_LEN + self.name.len()]
            .copy_from_slice(self.name.as_bytes());
        let crc = header_crc(table, salt, &buf);
        put_u32(&mut buf, TABLE_CRC, crc);
        buf
    }

    /// Reads and validates the header of the table block at `table`.
    pub fn read(io: &dyn FileIo, table: Offset, salt: u64) -> Result<Self> {
        let block = BlockHeader::read(io, table, salt)?;
        let kind = TableKind::from_block(block.kind)?;
        let mut buf = vec![0u8; TABLE_HEADER_LEN as usize];
        io.read_at(payload_offset(table), &mut buf)?;
        if buf[0..4] != kind.magic() {
            return Err(PoolError::Corruption("slot table magic mismatch"));
        }
        let name_len = get_u16(&buf, 12) as usize;
        if name_len > MAX_GRAPH_NAME {
            return Err(PoolError::Corruption("graph name length out of range"));
        }
        if get_u32(&buf, TABLE_CRC) != header_crc(table, salt, &buf) {
            return Err(PoolError::Corruption("slot table header crc mismatch"));
        }
        let capacity = get_u32(&buf, 8);
        if table_payload_len(capacity) > block.len {
            return Err(PoolError::Corruption("slot table larger than its block"));
        }
        let name = std::str::from_utf8(&buf[TABLE_FIXED_LEN..TABLE_FIXED_LEN + name_len])
            .map_err(|_| PoolError::Corruption("graph name is not valid UTF-8"))?
            .to_owned();
        Ok(Self {
            kind,
            graph: GraphId(get_u32(&buf, 4)),
            capacity,
            name,
            issued: get_u32(&buf, TABLE_ISSUED),
            link: Offset(get_u64(&buf, TABLE_LINK)),
        })
    }

    /// Reads a header and checks that it describes a table of `kind`.
    pub fn read_kind(io: &dyn FileIo, table: Offset, salt: u64, kind: TableKind) -> Result<Self> {
        let header = Self::read(io, table, salt)?;
        if header.kind != kind {
            return Err(PoolError::Corruption("slot table has the wrong kind"));
        }
        Ok(header)
    }
}

fn header_crc(table: Offset, salt: u64, buf: &[u8]) -> u32 {
    let name_end = TABLE_FIXED_LEN + get_u16(buf, 12) as usize;
    BlockCrc::new(payload_offset(table), salt)
        .update(&buf[..TABLE_CRC])
        .update(&buf[TABLE_FIXED_LEN..name_end.min(buf.len())])
        .finish()
}

/// One decoded slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Slot {
    /// Whether the slot holds a committed node.
    pub live: bool,
    /// Generation of the node stored, or of the last node deleted from it.
    pub generation: u32,
    /// NodeBody block.
    pub body: Offset,
    /// Encoded body length.
    pub body_len: u32,
    /// Salted CRC32 of the body bytes.
    pub body_crc: u32,
}

impl Slot {
    /// Encodes the slot.
    pub fn encode(&self) -> [u8; SLOT_LEN as usize] {
        let mut buf = [0u8; SLOT_LEN as usize];
        buf[0] = match (self.live, self.generation) {
            (true, _) => SLOT_LIVE,
            (false, 0) => SLOT_VACANT,
            (false, _) => SLOT_DELETED,
        };
        put_u32(&mut buf, 4, self.generation);
        put_u64(&mut buf, 8, self.body.0);
        put_u32(&mut buf, 16, self.body_len);
        put_u32(&mut buf, 20, self.body_crc);
        buf
    }

    /// Decodes a slot.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let live = match buf[0] {
            SLOT_VACANT | SLOT_DELETED => false,
            SLOT_LIVE => true,
            _ => return Err(PoolError::Corruption("unknown slot state")),
        };
        Ok(Self {
            live,
            generation: get_u32(buf, 4),
            body: Offset(get_u64(buf, 8)),
            body_len: get_u32(buf, 16),
            body_crc: get_u32(buf, 20),
        })
    }

    /// True when this slot currently holds `id`.
    pub fn holds<K: SlotKey>(&self, id: K) -> bool {
        self.live && self.generation == id.slot_generation()
    }
}

/// Reads one slot.
pub fn read_slot(io: &dyn FileIo, table: Offset, slot: u32) -> Result<Slot> {
    let mut buf = [0u8; SLOT_LEN as usize];
    io.read_at(slot_offset(table, slot), &mut buf)?;
    Slot::decode(&buf)
}

/// Reads every slot of a table in one pass.
pub fn read_slots(io: &dyn FileIo, table: Offset, capacity: u32) -> Result<Vec<Slot>> {
    let mut buf = vec![0u8; capacity as usize * SLOT_LEN as usize];
    io.read_at(slot_offset(table, 0), &mut buf)?;
    buf.chunks_exact(SLOT_LEN as usize).map(Slot::decode).collect()
}

/// Reads the body a live slot points at, checking its checksum when asked.
pub fn read_body(io: &dyn FileIo, salt: u64, slot: &Slot, verify: bool) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; slot.body_len as usize];
    io.read_at(payload_offset(slot.body), &mut bytes)?;
    if verify && block_crc32(slot.body.0, salt, &bytes) != slot.body_crc {
        return Err(PoolError::Corruption("body crc mismatch"));
    }
    Ok(bytes)
}

/// In-memory slot bookkeeping for one table.
///
/// Tracks which slots are live, which are reserved by the open transaction,
/// the generation each slot holds, and the table's generation lease: ids are
/// only handed out up to the durable `issued` mark.
#[derive(Debug)]
pub struct SlotMap {
    capacity: u32,
    generations: Vec<u32>,
    live: Vec<bool>,
    free: BTreeSet<u32>,
    live_count: u32,
    reserved: u32,
    next: u64,
    issued: u32,
}

impl SlotMap {
    /// Slot map for a new, empty table whose header records `issued`.
    pub fn empty(capacity: u32, issued: u32) -> Self {
        Self {
            capacity,
            generations: vec![0; capacity as usize],
            live: vec![false; capacity as usize],
            free: (0..capacity).collect(),
            live_count: 0,
            reserved: 0,
            next: 1,
            issued,
        }
    }

    /// Rebuilds the map from decoded slots and the header's issued mark.
    ///
    /// Generation numbering resumes past every generation that may have
    /// been handed out before, committed or not.
    pub fn from_slots(slots: &[Slot], issued: u32) -> Self {
        let mut map = Self::empty(slots.len() as u32, issued);
        let mut highest = issued;
        for (idx, slot) in slots.iter().enumerate() {
            map.generations[idx] = slot.generation;
            highest = highest.max(slot.generation);
            if slot.live {
                map.live[idx] = true;
                map.live_count += 1;
                map.free.remove(&(idx as u32));
            }
        }
        map.next = highest as u64 + 1;
        map
    }

    /// The issued mark to persist before the next reservation, when the
    /// current lease is used up.
    pub fn lease_needed(&self) -> Option<u32> {
        if self.free.is_empty() || self.next <= self.issued as u64 || self.next > u32::MAX as u64 {
            return None;
        }
        Some((self.next + LEASE_SPAN as u64 - 1).min(u32::MAX as u64) as u32)
    }

    /// Records that `issued` is durable.
    pub fn grant(&mut self, issued: u32) {
        self.issued = self.issued.max(issued);
    }

    /// Durable issued mark.
    pub fn issued(&self) -> u32 {
        self.issued
    }

    /// Reserves the lowest free slot under the next generation.
    pub fn reserve<K: SlotKey>(&mut self) -> Result<K> {
        let Some(&slot) = self.free.first() else {
            return Err(PoolError::CapacityExceeded {
                what: "slot table",
                limit: self.capacity as u64,
            });
        };
        if self.next > self.issued as u64 {
            return Err(PoolError::CapacityExceeded {
                what: "slot generations",
                limit: self.issued as u64,
            });
        }
        self.free.remove(&slot);
        let generation = self.next as u32;
        self.next += 1;
        self.generations[slot as usize] = generation;
        self.reserved += 1;
        Ok(K::from_parts(slot, generation))
    }

    /// Returns a reservation that was never committed.
    pub fn release<K: SlotKey>(&mut self, id: K) {
        let slot = id.slot_index();
        if slot < self.capacity && !self.live[slot as usize] {
            self.free.insert(slot);
            self.reserved = self.reserved.saturating_sub(1);
        }
    }

    /// Marks a reserved slot live after its create committed.
    pub fn commit_create<K: SlotKey>(&mut self, id: K) {
        let slot = id.slot_index() as usize;
        if !self.live[slot] {
            self.live[slot] = true;
            self.live_count += 1;
            self.reserved = self.reserved.saturating_sub(1);
        }
    }

    /// Frees a slot after its delete committed.
    pub fn commit_delete<K: SlotKey>(&mut self, id: K) {
        let slot = id.slot_index() as usize;
        if self.live[slot] {
            self.live[slot] = false;
            self.live_count -= 1;
            self.free.insert(id.slot_index());
        }
    }

    /// True when `id` names a committed, live entry.
    pub fn is_live<K: SlotKey>(&self, id: K) -> bool {
        let slot = id.slot_index();
        slot < self.capacity
            && self.live[slot as usize]
            && self.generations[slot as usize] == id.slot_generation()
    }

    /// Number of committed live entries.
    pub fn live_count(&self) -> u32 {
        self.live_count
    }

    /// Number of slots reserved by the open transaction.
    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    /// Total number of slots.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}
