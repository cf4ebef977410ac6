#![forbid(unsafe_code)]
//! Fixed-size region layout: pool header, superblock and heap block headers.
//!
//! ```text
//! 0        256        512      4096              heap_offset          pool_size
//! | header | superblk | (pad)  | log area        | block | block | ... |
//! ```
//!
//! Integers are big-endian. Every structure carries a CRC32 salted with the
//! pool's random salt and the structure's own offset.

use std::ops::Range;

use crate::primitives::bytes::{align_up, get_u16, get_u32, get_u64, put_u16, put_u32, put_u64};
use crate::primitives::io::FileIo;
use crate::types::{block_crc32, crc32, Offset, PoolError, Result};

mod alloc;

pub use alloc::{Allocator, FreeBlock, HeaderWrite};

/// Magic bytes at the start of every pool.
pub const POOL_MAGIC: [u8; 4] = *b"PMGP";
/// On-region format version.
pub const FORMAT_VERSION: u16 = 1;
/// Encoded length of [`PoolHeader`].
pub const POOL_HEADER_LEN: usize = 64;
/// Offset of the superblock.
pub const META_OFFSET: u64 = 256;
/// Encoded length of [`RegionMeta`].
pub const META_LEN: usize = 96;
/// Offset of the transaction log area.
pub const LOG_OFFSET: u64 = 4096;
/// Smallest pool accepted by `format`.
pub const MIN_POOL_SIZE: u64 = 64 * 1024;
/// Smallest heap left after the log area.
pub const MIN_HEAP: u64 = 16 * 1024;
/// Bounds for the default log capacity.
pub const MIN_LOG_CAPACITY: u64 = 16 * 1024;
/// Upper bound for the default log capacity.
pub const MAX_LOG_CAPACITY: u64 = 8 * 1024 * 1024;
/// Alignment of block headers and payloads.
pub const BLOCK_ALIGN: u64 = 16;
/// Encoded length of [`BlockHeader`].
pub const BLOCK_HEADER_LEN: u64 = 32;

const HDR_MAGIC: Range<usize> = 0..4;
const HDR_VERSION: Range<usize> = 4..6;
const HDR_POOL_SIZE: Range<usize> = 8..16;
const HDR_LOG_OFFSET: Range<usize> = 16..24;
const HDR_LOG_CAPACITY: Range<usize> = 24..32;
const HDR_HEAP_OFFSET: Range<usize> = 32..40;
const HDR_SALT: Range<usize> = 40..48;
const HDR_CRC: Range<usize> = 60..64;

/// Immutable description of a pool, written once at format time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolHeader {
    /// Total size of the region in bytes.
    pub pool_size: u64,
    /// Start of the log area.
    pub log_offset: u64,
    /// Bytes reserved for the log area.
    pub log_capacity: u64,
    /// Start of the heap.
    pub heap_offset: u64,
    /// Random per-pool salt mixed into every checksum.
    pub salt: u64,
}

impl PoolHeader {
    /// Computes the layout for a pool of `pool_size` bytes.
    pub fn plan(pool_size: u64, log_capacity: Option<u64>, salt: u64) -> Result<Self> {
        if pool_size < MIN_POOL_SIZE {
            return Err(PoolError::Invalid("pool size below minimum of 64 KiB"));
        }
        let log_capacity = align_up(
            log_capacity.unwrap_or_else(|| default_log_capacity(pool_size)),
            4096,
        );
        if log_capacity < MIN_LOG_CAPACITY {
            return Err(PoolError::Invalid("log capacity below minimum of 16 KiB"));
        }
        let heap_offset = align_up(LOG_OFFSET + log_capacity, BLOCK_ALIGN);
        if heap_offset
            .checked_add(MIN_HEAP)
            .map_or(true, |end| end > pool_size)
        {
            return Err(PoolError::Invalid("log capacity leaves no room for the heap"));
        }
        Ok(Self {
            pool_size,
            log_offset: LOG_OFFSET,
            log_capacity,
            heap_offset,
            salt,
        })
    }

    /// Encodes the header with its checksum.
    pub fn encode(&self) -> [u8; POOL_HEADER_LEN] {
        let mut buf = [0u8; POOL_HEADER_LEN];
        buf[HDR_MAGIC].copy_from_slice(&POOL_MAGIC);
        put_u16(&mut buf, HDR_VERSION.start, FORMAT_VERSION);
        put_u64(&mut buf, HDR_POOL_SIZE.start, self.pool_size);
        put_u64(&mut buf, HDR_LOG_OFFSET.start, self.log_offset);
        put_u64(&mut buf, HDR_LOG_CAPACITY.start, self.log_capacity);
        put_u64(&mut buf, HDR_HEAP_OFFSET.start, self.heap_offset);
        put_u64(&mut buf, HDR_SALT.start, self.salt);
        let crc = header_crc(&buf[..HDR_CRC.start]);
        put_u32(&mut buf, HDR_CRC.start, crc);
        buf
    }

    /// Decodes and validates a header.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < POOL_HEADER_LEN {
            return Err(PoolError::Corruption("pool header truncated"));
        }
        if buf[HDR_MAGIC] != POOL_MAGIC {
            return Err(PoolError::Corruption("pool magic mismatch"));
        }
        if get_u16(buf, HDR_VERSION.start) != FORMAT_VERSION {
            return Err(PoolError::Corruption("unsupported pool format version"));
        }
        if get_u32(buf, HDR_CRC.start) != header_crc(&buf[..HDR_CRC.start]) {
            return Err(PoolError::Corruption("pool header crc mismatch"));
        }
        let header = Self {
            pool_size: get_u64(buf, HDR_POOL_SIZE.start),
            log_offset: get_u64(buf, HDR_LOG_OFFSET.start),
            log_capacity: get_u64(buf, HDR_LOG_CAPACITY.start),
            heap_offset: get_u64(buf, HDR_HEAP_OFFSET.start),
            salt: get_u64(buf, HDR_SALT.start),
        };
        if header.log_offset < META_OFFSET + META_LEN as u64
            || header.log_offset + header.log_capacity > header.heap_offset
            || header.heap_offset > header.pool_size
        {
            return Err(PoolError::Corruption("pool header layout is inconsistent"));
        }
        Ok(header)
    }

    /// Reads the header from the start of `io`.
    pub fn read(io: &dyn FileIo) -> Result<Self> {
        if io.len()? < POOL_HEADER_LEN as u64 {
            return Err(PoolError::Corruption("pool header truncated"));
        }
        let mut buf = [0u8; POOL_HEADER_LEN];
        io.read_at(0, &mut buf)?;
        Self::decode(&buf)
    }

    /// Reads the header and checks it against the backing length.
    pub fn load(io: &dyn FileIo) -> Result<Self> {
        let header = Self::read(io)?;
        let found = io.len()?;
        if found != header.pool_size {
            return Err(PoolError::SizeMismatch {
                expected: header.pool_size,
                found,
            });
        }
        Ok(header)
    }

    /// Returns true when `io` is empty or holds nothing but zero bytes.
    pub fn is_unformatted(io: &dyn FileIo) -> Result<bool> {
        let len = io.len()?;
        let mut chunk = vec![0u8; (len.min(ZERO_SCAN_CHUNK)) as usize];
        let mut off = 0u64;
        while off < len {
            let take = (len - off).min(ZERO_SCAN_CHUNK) as usize;
            io.read_at(off, &mut chunk[..take])?;
            if chunk[..take].iter().any(|&b| b != 0) {
                return Ok(false);
            }
            off += take as u64;
        }
        Ok(true)
    }

    /// First byte past the heap.
    pub fn heap_end(&self) -> u64 {
        self.pool_size
    }
}

const ZERO_SCAN_CHUNK: u64 = 64 << 10;

fn header_crc(bytes: &[u8]) -> u32 {
    crc32(bytes)
}

/// Default log capacity: one eighth of the pool, clamped.
pub fn default_log_capacity(pool_size: u64) -> u64 {
    (pool_size / 8).clamp(MIN_LOG_CAPACITY, MAX_LOG_CAPACITY)
}

const META_MAGIC: [u8; 4] = *b"PMSB";
const META_HEAP_TOP: usize = 8;
const META_FREE_HEAD: usize = 16;
const META_DIRECTORY: usize = 24;
const META_DICT_HEAD: usize = 32;
const META_DICT_TAIL: usize = 40;
const META_NEXT_GRAPH: usize = 48;
const META_NEXT_STR: usize = 52;
const META_NEXT_TXN: usize = 56;
const META_LAST_LSN: usize = 64;
const META_CRC: usize = 92;

/// Mutable pool roots. Changed only by applying log records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionMeta {
    /// High-water mark of the heap.
    pub heap_top: u64,
    /// First block of the free list, or 0.
    pub free_head: u64,
    /// Directory block, or 0 before the first graph is created.
    pub directory: u64,
    /// First dictionary page, or 0.
    pub dict_head: u64,
    /// Last dictionary page, or 0.
    pub dict_tail: u64,
    /// Next graph id to hand out.
    pub next_graph_id: u32,
    /// Next dictionary string id to hand out.
    pub next_str_id: u32,
    /// Next transaction id to hand out.
    pub next_txn_id: u64,
    /// LSN of the last applied segment.
    pub last_lsn: u64,
}

impl RegionMeta {
    /// Roots of a freshly formatted pool.
    pub fn fresh(header: &PoolHeader) -> Self {
        Self {
            heap_top: header.heap_offset,
            free_head: 0,
            directory: 0,
            dict_head: 0,
            dict_tail: 0,
            next_graph_id: 1,
            next_str_id: 1,
            next_txn_id: 1,
            last_lsn: 0,
        }
    }

    /// Encodes the superblock with its checksum.
    pub fn encode(&self, salt: u64) -> [u8; META_LEN] {
        let mut buf = [0u8; META_LEN];
        buf[0..4].copy_from_slice(&META_MAGIC);
        put_u64(&mut buf, META_HEAP_TOP, self.heap_top);
        put_u64(&mut buf, META_FREE_HEAD, self.free_head);
        put_u64(&mut buf, META_DIRECTORY, self.directory);
        put_u64(&mut buf, META_DICT_HEAD, self.dict_head);
        put_u64(&mut buf, META_DICT_TAIL, self.dict_tail);
        put_u32(&mut buf, META_NEXT_GRAPH, self.next_graph_id);
        put_u32(&mut buf, META_NEXT_STR, self.next_str_id);
        put_u64(&mut buf, META_NEXT_TXN, self.next_txn_id);
        put_u64(&mut buf, META_LAST_LSN, self.last_lsn);
        let crc = block_crc32(META_OFFSET, salt, &buf[..META_CRC]);
        put_u32(&mut buf, META_CRC, crc);
        buf
    }

    /// Decodes and validates the superblock.
    pub fn decode(buf: &[u8], salt: u64) -> Result<Self> {
        if buf.len() < META_LEN || buf[0..4] != META_MAGIC {
            return Err(PoolError::Corruption("superblock magic mismatch"));
        }
        if get_u32(buf, META_CRC) != block_crc32(META_OFFSET, salt, &buf[..META_CRC]) {
            return Err(PoolError::Corruption("superblock crc mismatch"));
        }
        Ok(Self {
            heap_top: get_u64(buf, META_HEAP_TOP),
            free_head: get_u64(buf, META_FREE_HEAD),
            directory: get_u64(buf, META_DIRECTORY),
            dict_head: get_u64(buf, META_DICT_HEAD),
            dict_tail: get_u64(buf, META_DICT_TAIL),
            next_graph_id: get_u32(buf, META_NEXT_GRAPH),
            next_str_id: get_u32(buf, META_NEXT_STR),
            next_txn_id: get_u64(buf, META_NEXT_TXN),
            last_lsn: get_u64(buf, META_LAST_LSN),
        })
    }

    /// Reads the superblock and checks it against the heap bounds.
    pub fn read(io: &dyn FileIo, header: &PoolHeader) -> Result<Self> {
        let mut buf = [0u8; META_LEN];
        io.read_at(META_OFFSET, &mut buf)?;
        let meta = Self::decode(&buf, header.salt)?;
        if meta.heap_top < header.heap_offset || meta.heap_top > header.heap_end() {
            return Err(PoolError::Corruption("superblock heap top out of range"));
        }
        Ok(meta)
    }

    /// Writes the superblock.
    pub fn write(&self, io: &dyn FileIo, salt: u64) -> Result<()> {
        io.write_at(META_OFFSET, &self.encode(salt))
    }
}

/// Lays out an empty pool on `io`, sized to `header.pool_size`.
///
/// The pool header is written last so a crash mid-format leaves a file that
/// still reads as unformatted.
pub fn format(io: &dyn FileIo, header: &PoolHeader) -> Result<()> {
    io.set_len(header.pool_size)?;
    io.write_at(header.log_offset, &[0u8; 64])?;
    RegionMeta::fresh(header).write(io, header.salt)?;
    io.sync_all()?;
    io.write_at(0, &header.encode())?;
    io.sync_all()
}

/// What a heap block holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// On the free list.
    Free,
    /// A graph's slot table.
    NodeTable,
    /// One node's encoded label and properties.
    NodeBody,
    /// The graph directory.
    Directory,
    /// A page of the string dictionary.
    Dictionary,
    /// A graph's relationship slot table.
    RelTable,
    /// One relationship's endpoints, label and properties.
    RelBody,
}

impl BlockKind {
    /// On-region code of the kind.
    pub fn code(self) -> u8 {
        match self {
            BlockKind::Free => 0,
            BlockKind::NodeTable => 1,
            BlockKind::NodeBody => 2,
            BlockKind::Directory => 3,
            BlockKind::Dictionary => 4,
            BlockKind::RelTable => 5,
            BlockKind::RelBody => 6,
        }
    }

    /// Kind for an on-region code.
    pub fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => BlockKind::Free,
            1 => BlockKind::NodeTable,
            2 => BlockKind::NodeBody,
            3 => BlockKind::Directory,
            4 => BlockKind::Dictionary,
            5 => BlockKind::RelTable,
            6 => BlockKind::RelBody,
            _ => return Err(PoolError::Corruption("unknown block kind")),
        })
    }
}

const BLOCK_MAGIC: [u8; 2] = *b"BK";

/// Header in front of every heap block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block contents.
    pub kind: BlockKind,
    /// Payload length in bytes, a multiple of [`BLOCK_ALIGN`].
    pub len: u64,
    /// Next block on the free list when `kind` is `Free`.
    pub next_free: u64,
}

impl BlockHeader {
    /// Encodes the header for a block at `offset`.
    pub fn encode(&self, offset: u64, salt: u64) -> [u8; BLOCK_HEADER_LEN as usize] {
        let mut buf = [0u8; BLOCK_HEADER_LEN as usize];
        buf[0..2].copy_from_slice(&BLOCK_MAGIC);
        buf[2] = self.kind.code();
        put_u64(&mut buf, 8, self.len);
        put_u64(&mut buf, 16, self.next_free);
        let crc = block_crc32(offset, salt, &buf[..28]);
        put_u32(&mut buf, 28, crc);
        buf
    }

    /// Decodes the header of the block at `offset`.
    pub fn decode(buf: &[u8], offset: u64, salt: u64) -> Result<Self> {
        if buf.len() < BLOCK_HEADER_LEN as usize || buf[0..2] != BLOCK_MAGIC {
            return Err(PoolError::Corruption("block header magic mismatch"));
        }
        if get_u32(buf, 28) != block_crc32(offset, salt, &buf[..28]) {
            return Err(PoolError::Corruption("block header crc mismatch"));
        }
        let header = Self {
            kind: BlockKind::from_code(buf[2])?,
            len: get_u64(buf, 8),
            next_free: get_u64(buf, 16),
        };
        if header.len % BLOCK_ALIGN != 0 {
            return Err(PoolError::Corruption("block length is not aligned"));
        }
        Ok(header)
    }

    /// Reads the header of the block at `offset`.
    pub fn read(io: &dyn FileIo, offset: Offset, salt: u64) -> Result<Self> {
        let mut buf = [0u8; BLOCK_HEADER_LEN as usize];
        io.read_at(offset.0, &mut buf)?;
        Self::decode(&buf, offset.0, salt)
    }

    /// Writes the header of the block at `offset`.
    pub fn write(&self, io: &dyn FileIo, offset: Offset, salt: u64) -> Result<()> {
        io.write_at(offset.0, &self.encode(offset.0, salt))
    }
}

/// Offset of the payload of the block at `block`.
pub fn payload_offset(block: Offset) -> u64 {
    block.0 + BLOCK_HEADER_LEN
}
