use std::path::Path;
use std::sync::Arc;

use crate::primitives::concurrency::RegionLock;
use crate::primitives::io::StdFileIo;
use crate::primitives::region::PoolHeader;

use crate::admin::error::{AdminError, Result};

/// A pool file held exclusively for inspection.
///
/// Inspection never runs recovery; a pending log segment is reported, not
/// replayed.
pub(crate) struct RegionHandle {
    pub(crate) io: StdFileIo,
    pub(crate) header: PoolHeader,
    _lock: RegionLock,
}

/// Claims and opens the pool at `path` without touching its contents.
///
/// # Errors
///
/// Returns `MissingPool` when nothing exists at `path` and `Busy` (wrapped in
/// `Core`) when the pool is open elsewhere.
pub(crate) fn open_region(path: &Path) -> Result<RegionHandle> {
    if !path.exists() {
        return Err(AdminError::missing_pool(path));
    }
    let mut lock = RegionLock::claim(path)?;
    let io = StdFileIo::open_existing(path)?;
    lock.lock_file(Arc::clone(io.file()))?;
    let header = PoolHeader::read(&io)?;
    Ok(RegionHandle {
        io,
        header,
        _lock: lock,
    })
}
