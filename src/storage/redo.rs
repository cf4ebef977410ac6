//! Redo records carried by a log segment.
//!
//! Every record stores complete images at fixed offsets, so applying the same
//! record list twice leaves the region exactly as applying it once.

use crate::primitives::bytes::{buf, buf::Cursor, put_u32, put_u64, var};
use crate::primitives::io::FileIo;
use crate::primitives::region::{payload_offset, BlockHeader, BlockKind, PoolHeader, RegionMeta};
use crate::storage::dict::{encode_entry, DICT_PAGE_HEADER, DICT_PAGE_LEN};
use crate::storage::directory::encode_image;
use crate::storage::node::{slot_offset, Slot, TableHeader, TableKind, SLOT_LEN};
use crate::types::{block_crc32, GraphId, Offset, PoolError, Result, StrId};

const TAG_META: u8 = 1;
const TAG_BLOCK: u8 = 2;
const TAG_INIT_TABLE: u8 = 3;
const TAG_PUT_SLOT: u8 = 4;
const TAG_CLEAR_SLOT: u8 = 5;
const TAG_PUT_DIRECTORY: u8 = 6;
const TAG_DICT_PAGE: u8 = 7;
const TAG_DICT_LINK: u8 = 8;
const TAG_DICT_APPEND: u8 = 9;
const TAG_PUT_TABLE_HEADER: u8 = 10;

const ZERO_CHUNK: usize = 64 * 1024;

/// One idempotent region write.
#[derive(Clone, Debug, PartialEq)]
pub enum LogRecord {
    /// Superblock image; always the last record of a segment.
    Meta(RegionMeta),
    /// Block header image.
    Block {
        /// Block offset.
        offset: Offset,
        /// Header to store.
        header: BlockHeader,
    },
    /// Table header plus zeroed slots for a new slot table.
    InitTable {
        /// NodeTable or RelTable block.
        block: Offset,
        /// Header to store.
        header: TableHeader,
    },
    /// Table header image alone, leaving the slots untouched.
    PutTableHeader {
        /// NodeTable or RelTable block.
        block: Offset,
        /// Header to store.
        header: TableHeader,
    },
    /// Body followed by the live slot pointing at it.
    PutSlot {
        /// NodeTable or RelTable block.
        table: Offset,
        /// Slot index.
        slot: u32,
        /// Slot generation.
        generation: u32,
        /// Body block.
        body: Offset,
        /// Encoded body.
        bytes: Vec<u8>,
    },
    /// Vacates a slot, keeping its generation.
    ClearSlot {
        /// NodeTable or RelTable block.
        table: Offset,
        /// Slot index.
        slot: u32,
        /// Generation of the deleted entry.
        generation: u32,
    },
    /// Full directory image.
    PutDirectory {
        /// Directory block.
        block: Offset,
        /// Sorted `(graph, table)` pairs.
        entries: Vec<(GraphId, Offset)>,
    },
    /// Empty dictionary page.
    DictPage {
        /// Dictionary block.
        block: Offset,
    },
    /// Links a dictionary page to its successor.
    DictLink {
        /// Page being linked.
        page: Offset,
        /// Following page.
        next: Offset,
    },
    /// One dictionary entry plus the page's new fill.
    DictAppend {
        /// Dictionary page.
        page: Offset,
        /// Byte position in the entry area.
        at: u32,
        /// Entry count after the append.
        count: u32,
        /// Interned id.
        id: StrId,
        /// Interned text.
        text: String,
    },
}

impl LogRecord {
    /// Short name used by log dumps.
    pub fn kind(&self) -> &'static str {
        match self {
            LogRecord::Meta(_) => "meta",
            LogRecord::Block { .. } => "block",
            LogRecord::InitTable { .. } => "init_table",
            LogRecord::PutTableHeader { .. } => "put_table_header",
            LogRecord::PutSlot { .. } => "put_slot",
            LogRecord::ClearSlot { .. } => "clear_slot",
            LogRecord::PutDirectory { .. } => "put_directory",
            LogRecord::DictPage { .. } => "dict_page",
            LogRecord::DictLink { .. } => "dict_link",
            LogRecord::DictAppend { .. } => "dict_append",
        }
    }

    /// Appends the record's encoding to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            LogRecord::Meta(meta) => {
                out.push(TAG_META);
                for v in [
                    meta.heap_top,
                    meta.free_head,
                    meta.directory,
                    meta.dict_head,
                    meta.dict_tail,
                    meta.next_graph_id as u64,
                    meta.next_str_id as u64,
                    meta.next_txn_id,
                    meta.last_lsn,
                ] {
                    var::encode_u64(v, out);
                }
            }
            LogRecord::Block { offset, header } => {
                out.push(TAG_BLOCK);
                var::encode_u64(offset.0, out);
                out.push(header.kind.code());
                var::encode_u64(header.len, out);
                var::encode_u64(header.next_free, out);
            }
            LogRecord::InitTable { block, header } => {
                out.push(TAG_INIT_TABLE);
                var::encode_u64(block.0, out);
                encode_table_header(header, out);
            }
            LogRecord::PutTableHeader { block, header } => {
                out.push(TAG_PUT_TABLE_HEADER);
                var::encode_u64(block.0, out);
                encode_table_header(header, out);
            }
            LogRecord::PutSlot {
                table,
                slot,
                generation,
                body,
                bytes,
            } => {
                out.push(TAG_PUT_SLOT);
                var::encode_u64(table.0, out);
                var::encode_u64(*slot as u64, out);
                var::encode_u64(*generation as u64, out);
                var::encode_u64(body.0, out);
                buf::put_bytes(out, bytes);
            }
            LogRecord::ClearSlot {
                table,
                slot,
                generation,
            } => {
                out.push(TAG_CLEAR_SLOT);
                var::encode_u64(table.0, out);
                var::encode_u64(*slot as u64, out);
                var::encode_u64(*generation as u64, out);
            }
            LogRecord::PutDirectory { block, entries } => {
                out.push(TAG_PUT_DIRECTORY);
                var::encode_u64(block.0, out);
                var::encode_u64(entries.len() as u64, out);
                for (graph, table) in entries {
                    var::encode_u64(graph.0 as u64, out);
                    var::encode_u64(table.0, out);
                }
            }
            LogRecord::DictPage { block } => {
                out.push(TAG_DICT_PAGE);
                var::encode_u64(block.0, out);
            }
            LogRecord::DictLink { page, next } => {
                out.push(TAG_DICT_LINK);
                var::encode_u64(page.0, out);
                var::encode_u64(next.0, out);
            }
            LogRecord::DictAppend {
                page,
                at,
                count,
                id,
                text,
            } => {
                out.push(TAG_DICT_APPEND);
                var::encode_u64(page.0, out);
                var::encode_u64(*at as u64, out);
                var::encode_u64(*count as u64, out);
                var::encode_u64(id.0 as u64, out);
                buf::put_bytes(out, text.as_bytes());
            }
        }
    }

    /// Decodes one record from `cur`.
    pub fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let record = match cur.u8()? {
            TAG_META => LogRecord::Meta(RegionMeta {
                heap_top: cur.var_u64()?,
                free_head: cur.var_u64()?,
                directory: cur.var_u64()?,
                dict_head: cur.var_u64()?,
                dict_tail: cur.var_u64()?,
                next_graph_id: cur.var_u32()?,
                next_str_id: cur.var_u32()?,
                next_txn_id: cur.var_u64()?,
                last_lsn: cur.var_u64()?,
            }),
            TAG_BLOCK => LogRecord::Block {
                offset: Offset(cur.var_u64()?),
                header: BlockHeader {
                    kind: BlockKind::from_code(cur.u8()?)?,
                    len: cur.var_u64()?,
                    next_free: cur.var_u64()?,
                },
            },
            TAG_INIT_TABLE => LogRecord::InitTable {
                block: Offset(cur.var_u64()?),
                header: decode_table_header(cur)?,
            },
            TAG_PUT_TABLE_HEADER => LogRecord::PutTableHeader {
                block: Offset(cur.var_u64()?),
                header: decode_table_header(cur)?,
            },
            TAG_PUT_SLOT => LogRecord::PutSlot {
                table: Offset(cur.var_u64()?),
                slot: cur.var_u32()?,
                generation: cur.var_u32()?,
                body: Offset(cur.var_u64()?),
                bytes: cur.bytes()?.to_vec(),
            },
            TAG_CLEAR_SLOT => LogRecord::ClearSlot {
                table: Offset(cur.var_u64()?),
                slot: cur.var_u32()?,
                generation: cur.var_u32()?,
            },
            TAG_PUT_DIRECTORY => {
                let block = Offset(cur.var_u64()?);
                let count = cur.var_u64()?;
                if count > cur.remaining() as u64 {
                    return Err(PoolError::Corruption("directory record count out of range"));
                }
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    entries.push((GraphId(cur.var_u32()?), Offset(cur.var_u64()?)));
                }
                LogRecord::PutDirectory { block, entries }
            }
            TAG_DICT_PAGE => LogRecord::DictPage {
                block: Offset(cur.var_u64()?),
            },
            TAG_DICT_LINK => LogRecord::DictLink {
                page: Offset(cur.var_u64()?),
                next: Offset(cur.var_u64()?),
            },
            TAG_DICT_APPEND => LogRecord::DictAppend {
                page: Offset(cur.var_u64()?),
                at: cur.var_u32()?,
                count: cur.var_u32()?,
                id: StrId(cur.var_u32()?),
                text: cur.str()?.to_owned(),
            },
            _ => return Err(PoolError::Corruption("unknown log record tag")),
        };
        Ok(record)
    }
}

fn encode_table_header(header: &TableHeader, out: &mut Vec<u8>) {
    out.push(header.kind.code());
    var::encode_u64(header.graph.0 as u64, out);
    var::encode_u64(header.capacity as u64, out);
    var::encode_u64(header.issued as u64, out);
    var::encode_u64(header.link.0, out);
    buf::put_bytes(out, header.name.as_bytes());
}

fn decode_table_header(cur: &mut Cursor<'_>) -> Result<TableHeader> {
    let header = TableHeader {
        kind: TableKind::from_code(cur.u8()?)?,
        graph: GraphId(cur.var_u32()?),
        capacity: cur.var_u32()?,
        issued: cur.var_u32()?,
        link: Offset(cur.var_u64()?),
        name: cur.str()?.to_owned(),
    };
    if header.name.len() > crate::storage::node::MAX_GRAPH_NAME {
        return Err(PoolError::Corruption("graph name length out of range"));
    }
    Ok(header)
}

/// Encodes a record list into a segment payload.
pub fn encode_records(records: &[LogRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        record.encode(&mut out);
    }
    out
}

/// Decodes exactly `expected` records from a segment payload.
pub fn decode_records(payload: &[u8], expected: u32) -> Result<Vec<LogRecord>> {
    let mut cur = Cursor::new(payload);
    let mut records = Vec::with_capacity(expected.min(4096) as usize);
    while !cur.is_exhausted() {
        records.push(LogRecord::decode(&mut cur)?);
    }
    if records.len() != expected as usize {
        return Err(PoolError::Corruption("segment record count mismatch"));
    }
    if !matches!(records.last(), Some(LogRecord::Meta(_))) {
        return Err(PoolError::Corruption("segment does not end with a superblock"));
    }
    Ok(records)
}

/// Applies one record to the region.
pub fn apply(io: &dyn FileIo, header: &PoolHeader, record: &LogRecord) -> Result<()> {
    let salt = header.salt;
    match record {
        LogRecord::Meta(meta) => meta.write(io, salt),
        LogRecord::Block {
            offset,
            header: block,
        } => {
            check_range(header, offset.0, crate::primitives::region::BLOCK_HEADER_LEN)?;
            block.write(io, *offset, salt)
        }
        LogRecord::InitTable {
            block,
            header: table,
        } => {
            let image = table.encode(*block, salt);
            let slots = table.capacity as u64 * SLOT_LEN;
            check_range(header, payload_offset(*block), image.len() as u64 + slots)?;
            io.write_at(payload_offset(*block), &image)?;
            let zeros = vec![0u8; ZERO_CHUNK];
            let mut at = slot_offset(*block, 0);
            let end = at + slots;
            while at < end {
                let n = ((end - at) as usize).min(ZERO_CHUNK);
                io.write_at(at, &zeros[..n])?;
                at += n as u64;
            }
            Ok(())
        }
        LogRecord::PutTableHeader {
            block,
            header: table,
        } => {
            let image = table.encode(*block, salt);
            check_range(header, payload_offset(*block), image.len() as u64)?;
            io.write_at(payload_offset(*block), &image)
        }
        LogRecord::PutSlot {
            table,
            slot,
            generation,
            body,
            bytes,
        } => {
            check_range(header, payload_offset(*body), bytes.len() as u64)?;
            check_range(header, slot_offset(*table, *slot), SLOT_LEN)?;
            io.write_at(payload_offset(*body), bytes)?;
            let image = Slot {
                live: true,
                generation: *generation,
                body: *body,
                body_len: bytes.len() as u32,
                body_crc: block_crc32(body.0, salt, bytes),
            };
            io.write_at(slot_offset(*table, *slot), &image.encode())
        }
        LogRecord::ClearSlot {
            table,
            slot,
            generation,
        } => {
            check_range(header, slot_offset(*table, *slot), SLOT_LEN)?;
            let image = Slot {
                generation: *generation,
                ..Slot::default()
            };
            io.write_at(slot_offset(*table, *slot), &image.encode())
        }
        LogRecord::PutDirectory { block, entries } => {
            let image = encode_image(*block, salt, entries);
            check_range(header, payload_offset(*block), image.len() as u64)?;
            io.write_at(payload_offset(*block), &image)
        }
        LogRecord::DictPage { block } => {
            check_range(header, payload_offset(*block), DICT_PAGE_LEN)?;
            io.write_at(payload_offset(*block), &[0u8; DICT_PAGE_HEADER as usize])
        }
        LogRecord::DictLink { page, next } => {
            check_range(header, payload_offset(*page), DICT_PAGE_HEADER)?;
            let mut field = [0u8; 8];
            put_u64(&mut field, 0, next.0);
            io.write_at(payload_offset(*page), &field)
        }
        LogRecord::DictAppend {
            page,
            at,
            count,
            id,
            text,
        } => {
            let entry = encode_entry(*id, text);
            let used = *at as u64 + entry.len() as u64;
            if used > DICT_PAGE_LEN - DICT_PAGE_HEADER {
                return Err(PoolError::Corruption("dictionary append overflows its page"));
            }
            check_range(header, payload_offset(*page), DICT_PAGE_LEN)?;
            io.write_at(payload_offset(*page) + DICT_PAGE_HEADER + *at as u64, &entry)?;
            let mut fill = [0u8; 8];
            put_u32(&mut fill, 0, used as u32);
            put_u32(&mut fill, 4, *count);
            io.write_at(payload_offset(*page) + 8, &fill)
        }
    }
}

fn check_range(header: &PoolHeader, at: u64, len: u64) -> Result<()> {
    let end = at
        .checked_add(len)
        .ok_or(PoolError::Corruption("log record range overflows"))?;
    if at < header.heap_offset || end > header.heap_end() {
        return Err(PoolError::Corruption("log record writes outside the heap"));
    }
    Ok(())
}
