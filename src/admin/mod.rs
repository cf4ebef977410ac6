#![forbid(unsafe_code)]

//! Offline pool inspection.
//!
//! These entry points claim a pool file exclusively and read it without
//! running recovery, so they describe the file exactly as a crash left it.

mod error;
mod info;
mod log_dump;
mod util;
pub mod verify;

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Layout, superblock and directory summary.
pub use info::{info, GraphInfo, InfoReport, SegmentInfo};

/// Decoded log segment contents.
pub use log_dump::{dump_log, LogDump, RecordDump};

/// Structural integrity checks.
///
/// Walks the heap, the free list, the dictionary, the directory and every
/// node body, reporting anything inconsistent.
pub use verify::{verify, VerifyCounts, VerifyFinding, VerifyReport, VerifySeverity};
