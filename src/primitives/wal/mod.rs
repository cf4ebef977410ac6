#![forbid(unsafe_code)]
//! The log area: one segment slot holding the redo payload of the transaction
//! being committed.
//!
//! A segment moves `Empty -> Flushed -> Applied`. The payload is opaque here;
//! `storage::redo` owns its record format. A header or payload that fails its
//! checksum was never completely flushed, and is reported as torn.

use tracing::debug;

use crate::primitives::bytes::{get_u32, get_u64, put_u32, put_u64};
use crate::primitives::io::FileIo;
use crate::primitives::region::PoolHeader;
use crate::types::{block_crc32, crc32, Lsn, PoolError, Result, TxnId};

const LOG_MAGIC: [u8; 4] = *b"PMGL";
/// Encoded length of a segment header.
pub const SEGMENT_HEADER_LEN: usize = 64;

const SEG_STATE: usize = 4;
const SEG_LSN: usize = 8;
const SEG_TXN: usize = 16;
const SEG_RECORDS: usize = 24;
const SEG_PAYLOAD_LEN: usize = 28;
const SEG_PAYLOAD_CRC: usize = 32;
const SEG_CRC: usize = 60;

/// Lifecycle of the segment slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentState {
    /// Nothing was ever flushed.
    Empty,
    /// Durable but possibly not yet applied.
    Flushed,
    /// Applied to the region.
    Applied,
}

impl SegmentState {
    fn code(self) -> u8 {
        match self {
            SegmentState::Empty => 0,
            SegmentState::Flushed => 1,
            SegmentState::Applied => 2,
        }
    }
}

/// Decoded segment header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Current state.
    pub state: SegmentState,
    /// Sequence number of the segment.
    pub lsn: Lsn,
    /// Transaction that produced it.
    pub txn: TxnId,
    /// Number of records in the payload.
    pub records: u32,
    /// Payload length in bytes.
    pub payload_len: u32,
    /// CRC32 of the payload.
    pub payload_crc: u32,
}

/// What the segment slot currently holds.
#[derive(Debug)]
pub enum SegmentRead {
    /// Never written, or reset.
    Empty,
    /// Flushed and intact; must be replayed.
    Flushed {
        /// Segment header.
        header: SegmentHeader,
        /// Verified payload.
        payload: Vec<u8>,
    },
    /// Already applied.
    Applied(SegmentHeader),
    /// Header or payload failed validation: the flush never completed.
    Torn(&'static str),
}

/// Reader/writer for the log area of one pool.
#[derive(Clone, Copy, Debug)]
pub struct LogArea {
    offset: u64,
    capacity: u64,
    salt: u64,
}

impl LogArea {
    /// Log area described by the pool header.
    pub fn new(header: &PoolHeader) -> Self {
        Self {
            offset: header.log_offset,
            capacity: header.log_capacity,
            salt: header.salt,
        }
    }

    /// Largest payload a single segment can carry.
    pub fn max_payload(&self) -> u64 {
        (self.capacity - SEGMENT_HEADER_LEN as u64).min(u32::MAX as u64)
    }

    /// Writes `payload` and a `Flushed` header, then syncs when asked.
    ///
    /// Returning `Ok` with `sync` set is the durability boundary of a commit.
    pub fn flush(
        &self,
        io: &dyn FileIo,
        lsn: Lsn,
        txn: TxnId,
        records: u32,
        payload: &[u8],
        sync: bool,
    ) -> Result<SegmentHeader> {
        if payload.len() as u64 > self.max_payload() {
            return Err(PoolError::CapacityExceeded {
                what: "transaction log",
                limit: self.max_payload(),
            });
        }
        let header = SegmentHeader {
            state: SegmentState::Flushed,
            lsn,
            txn,
            records,
            payload_len: payload.len() as u32,
            payload_crc: payload_crc(payload),
        };
        io.write_at(self.payload_offset(), payload)?;
        io.write_at(self.offset, &self.encode(&header))?;
        if sync {
            io.sync_all()?;
        }
        debug!(
            lsn = lsn.0,
            txn = txn.0,
            records,
            bytes = payload.len(),
            "wal.segment.flushed"
        );
        Ok(header)
    }

    /// Rewrites the header of an applied segment.
    pub fn mark_applied(&self, io: &dyn FileIo, header: &SegmentHeader) -> Result<()> {
        let applied = SegmentHeader {
            state: SegmentState::Applied,
            ..*header
        };
        io.write_at(self.offset, &self.encode(&applied))
    }

    /// Clears the header so the slot reads as empty.
    pub fn reset(&self, io: &dyn FileIo) -> Result<()> {
        io.write_at(self.offset, &[0u8; SEGMENT_HEADER_LEN])
    }

    /// Reads and validates the segment slot.
    pub fn read(&self, io: &dyn FileIo) -> Result<SegmentRead> {
        let mut buf = [0u8; SEGMENT_HEADER_LEN];
        io.read_at(self.offset, &mut buf)?;
        if buf.iter().all(|&b| b == 0) {
            return Ok(SegmentRead::Empty);
        }
        let header = match self.decode(&buf) {
            Ok(header) => header,
            Err(PoolError::Corruption(reason)) => return Ok(SegmentRead::Torn(reason)),
            Err(other) => return Err(other),
        };
        match header.state {
            SegmentState::Empty => Ok(SegmentRead::Empty),
            SegmentState::Applied => Ok(SegmentRead::Applied(header)),
            SegmentState::Flushed => match self.read_payload(io, &header)? {
                Some(payload) => Ok(SegmentRead::Flushed { header, payload }),
                None => Ok(SegmentRead::Torn("segment payload crc mismatch")),
            },
        }
    }

    /// Reads the payload described by `header`; `None` when it fails its checksum.
    pub fn read_payload(&self, io: &dyn FileIo, header: &SegmentHeader) -> Result<Option<Vec<u8>>> {
        if header.payload_len as u64 > self.max_payload() {
            return Ok(None);
        }
        let mut payload = vec![0u8; header.payload_len as usize];
        io.read_at(self.payload_offset(), &mut payload)?;
        if payload_crc(&payload) != header.payload_crc {
            return Ok(None);
        }
        Ok(Some(payload))
    }

    fn payload_offset(&self) -> u64 {
        self.offset + SEGMENT_HEADER_LEN as u64
    }

    fn encode(&self, header: &SegmentHeader) -> [u8; SEGMENT_HEADER_LEN] {
        let mut buf = [0u8; SEGMENT_HEADER_LEN];
        buf[0..4].copy_from_slice(&LOG_MAGIC);
        buf[SEG_STATE] = header.state.code();
        put_u64(&mut buf, SEG_LSN, header.lsn.0);
        put_u64(&mut buf, SEG_TXN, header.txn.0);
        put_u32(&mut buf, SEG_RECORDS, header.records);
        put_u32(&mut buf, SEG_PAYLOAD_LEN, header.payload_len);
        put_u32(&mut buf, SEG_PAYLOAD_CRC, header.payload_crc);
        let crc = block_crc32(self.offset, self.salt, &buf[..SEG_CRC]);
        put_u32(&mut buf, SEG_CRC, crc);
        buf
    }

    fn decode(&self, buf: &[u8]) -> Result<SegmentHeader> {
        if buf[0..4] != LOG_MAGIC {
            return Err(PoolError::Corruption("segment magic mismatch"));
        }
        if get_u32(buf, SEG_CRC) != block_crc32(self.offset, self.salt, &buf[..SEG_CRC]) {
            return Err(PoolError::Corruption("segment header crc mismatch"));
        }
        let state = match buf[SEG_STATE] {
            0 => SegmentState::Empty,
            1 => SegmentState::Flushed,
            2 => SegmentState::Applied,
            _ => return Err(PoolError::Corruption("unknown segment state")),
        };
        Ok(SegmentHeader {
            state,
            lsn: Lsn(get_u64(buf, SEG_LSN)),
            txn: TxnId(get_u64(buf, SEG_TXN)),
            records: get_u32(buf, SEG_RECORDS),
            payload_len: get_u32(buf, SEG_PAYLOAD_LEN),
            payload_crc: get_u32(buf, SEG_PAYLOAD_CRC),
        })
    }
}

fn payload_crc(payload: &[u8]) -> u32 {
    crc32(payload)
}
