use std::path::Path;

use serde::Serialize;

use crate::primitives::bytes::buf::Cursor;
use crate::primitives::wal::{LogArea, SegmentRead, SegmentState};
use crate::storage::redo::LogRecord;

use crate::admin::util::open_region;
use crate::admin::Result;

/// Decoded contents of the log segment slot.
#[derive(Clone, Debug, Serialize)]
pub struct LogDump {
    /// Slot state; `None` when torn.
    pub state: Option<SegmentState>,
    /// Why the segment was judged torn.
    pub torn_reason: Option<String>,
    /// Segment LSN.
    pub lsn: Option<u64>,
    /// Transaction that produced the segment.
    pub txn: Option<u64>,
    /// Record count from the header.
    pub declared_records: u32,
    /// Records decoded from the payload.
    pub records: Vec<RecordDump>,
    /// Set when the payload stopped decoding part way.
    pub problem: Option<String>,
}

/// One redo record.
#[derive(Clone, Debug, Serialize)]
pub struct RecordDump {
    /// Record kind.
    pub kind: &'static str,
    /// Short description of the target and contents.
    pub summary: String,
    /// Encoded record, hex.
    pub hex: String,
}

/// Decodes the log segment of the pool at `path` without replaying it.
///
/// Applied segments keep their payload until the next commit overwrites it,
/// so the last commit stays visible here.
///
/// # Errors
///
/// Returns an error if the file is missing, already open, or unreadable.
pub fn dump_log(path: impl AsRef<Path>) -> Result<LogDump> {
    let handle = open_region(path.as_ref())?;
    let log = LogArea::new(&handle.header);
    let mut dump = LogDump {
        state: None,
        torn_reason: None,
        lsn: None,
        txn: None,
        declared_records: 0,
        records: Vec::new(),
        problem: None,
    };
    let (segment, payload) = match log.read(&handle.io)? {
        SegmentRead::Empty => {
            dump.state = Some(SegmentState::Empty);
            return Ok(dump);
        }
        SegmentRead::Torn(reason) => {
            dump.torn_reason = Some(reason.to_owned());
            return Ok(dump);
        }
        SegmentRead::Flushed { header, payload } => (header, Some(payload)),
        SegmentRead::Applied(header) => (header, log.read_payload(&handle.io, &header)?),
    };
    dump.state = Some(segment.state);
    dump.lsn = Some(segment.lsn.0);
    dump.txn = Some(segment.txn.0);
    dump.declared_records = segment.records;
    match payload {
        Some(payload) => {
            let (records, problem) = decode_all(&payload);
            dump.records = records;
            dump.problem = problem;
        }
        None => dump.problem = Some("payload checksum mismatch".to_owned()),
    }
    Ok(dump)
}

fn decode_all(payload: &[u8]) -> (Vec<RecordDump>, Option<String>) {
    let mut cur = Cursor::new(payload);
    let mut out = Vec::new();
    while !cur.is_exhausted() {
        let start = cur.off;
        match LogRecord::decode(&mut cur) {
            Ok(record) => out.push(RecordDump {
                kind: record.kind(),
                summary: summarize(&record),
                hex: hex::encode(&payload[start..cur.off]),
            }),
            Err(err) => {
                let index = out.len();
                return (out, Some(format!("record {index} at byte {start}: {err}")));
            }
        }
    }
    (out, None)
}

fn summarize(record: &LogRecord) -> String {
    match record {
        LogRecord::Meta(meta) => format!(
            "lsn={} heap_top={} free_head={} directory={} strings={}",
            meta.last_lsn,
            meta.heap_top,
            meta.free_head,
            meta.directory,
            meta.next_str_id.saturating_sub(1)
        ),
        LogRecord::Block { offset, header } => format!(
            "block={offset} kind={:?} len={} next_free={}",
            header.kind, header.len, header.next_free
        ),
        LogRecord::InitTable { block, header } => format!(
            "table={block} kind={:?} graph={} name={:?} capacity={} issued={} link={}",
            header.kind, header.graph, header.name, header.capacity, header.issued, header.link
        ),
        LogRecord::PutTableHeader { block, header } => format!(
            "table={block} kind={:?} graph={} issued={} link={}",
            header.kind, header.graph, header.issued, header.link
        ),
        LogRecord::PutSlot {
            table,
            slot,
            generation,
            body,
            bytes,
        } => format!(
            "table={table} slot={slot} generation={generation} body={body} len={}",
            bytes.len()
        ),
        LogRecord::ClearSlot {
            table,
            slot,
            generation,
        } => format!("table={table} slot={slot} generation={generation}"),
        LogRecord::PutDirectory { block, entries } => {
            format!("directory={block} graphs={}", entries.len())
        }
        LogRecord::DictPage { block } => format!("page={block}"),
        LogRecord::DictLink { page, next } => format!("page={page} next={next}"),
        LogRecord::DictAppend {
            page,
            at,
            count,
            id,
            text,
        } => format!("page={page} at={at} count={count} id={id} text={text:?}"),
    }
}
