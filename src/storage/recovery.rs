//! Crash recovery: finishes or discards whatever the log area holds.

use serde::Serialize;
use tracing::{info, warn};

use crate::primitives::io::FileIo;
use crate::primitives::region::PoolHeader;
use crate::primitives::wal::{LogArea, SegmentRead};
use crate::storage::redo::{apply, decode_records};
use crate::types::{Lsn, Result};

/// What recovery did to the log area.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Nothing pending.
    Clean,
    /// A flushed segment was applied.
    Replayed,
    /// A partially written segment was thrown away.
    DiscardedTorn,
}

/// Outcome of [`recover`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Action taken.
    pub action: RecoveryAction,
    /// LSN of the replayed segment.
    pub lsn: Option<Lsn>,
    /// Records applied.
    pub records: u32,
}

impl RecoveryReport {
    fn clean() -> Self {
        Self {
            action: RecoveryAction::Clean,
            lsn: None,
            records: 0,
        }
    }
}

/// Brings the region to the state of its last durable commit.
///
/// A flushed segment is re-applied from the start and marked applied; a torn
/// one is reset. Running this again on its own output is a no-op.
pub fn recover(io: &dyn FileIo) -> Result<RecoveryReport> {
    let header = PoolHeader::read(io)?;
    let log = LogArea::new(&header);
    match log.read(io)? {
        SegmentRead::Empty | SegmentRead::Applied(_) => Ok(RecoveryReport::clean()),
        SegmentRead::Torn(reason) => {
            warn!(reason, "recovery.discarded_torn_segment");
            log.reset(io)?;
            io.sync_all()?;
            Ok(RecoveryReport {
                action: RecoveryAction::DiscardedTorn,
                lsn: None,
                records: 0,
            })
        }
        SegmentRead::Flushed {
            header: segment,
            payload,
        } => {
            let records = decode_records(&payload, segment.records)?;
            for record in &records {
                apply(io, &header, record)?;
            }
            io.sync_all()?;
            log.mark_applied(io, &segment)?;
            io.sync_all()?;
            info!(
                lsn = segment.lsn.0,
                txn = segment.txn.0,
                records = segment.records,
                "recovery.replayed"
            );
            Ok(RecoveryReport {
                action: RecoveryAction::Replayed,
                lsn: Some(segment.lsn),
                records: segment.records,
            })
        }
    }
}
