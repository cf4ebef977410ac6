use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use super::FileIo;
use crate::types::{PoolError, Result};

#[derive(Default, Debug)]
struct CrashState {
    write_budget: Option<u64>,
    fail_syncs: bool,
    crashed: bool,
    bytes_written: u64,
    syncs: u64,
}

/// `FileIo` wrapper that simulates a crash after a byte budget of writes.
///
/// Once armed with [`CrashIo::crash_after`], the write that exhausts the
/// budget is persisted only up to the budget (a torn write) and every later
/// write or sync fails, as if the process had died at that byte.
pub struct CrashIo {
    inner: Arc<dyn FileIo>,
    state: Mutex<CrashState>,
}

impl CrashIo {
    /// Wraps `inner` with no fault armed.
    pub fn new(inner: Arc<dyn FileIo>) -> Self {
        Self {
            inner,
            state: Mutex::new(CrashState::default()),
        }
    }

    /// Crash once `bytes` more bytes have been written.
    pub fn crash_after(&self, bytes: u64) {
        let mut state = self.state.lock();
        state.write_budget = Some(bytes);
        state.crashed = false;
    }

    /// Make every subsequent `sync_all` fail without crashing writes.
    pub fn fail_syncs(&self, fail: bool) {
        self.state.lock().fail_syncs = fail;
    }

    /// Removes any armed fault.
    pub fn disarm(&self) {
        let mut state = self.state.lock();
        state.write_budget = None;
        state.fail_syncs = false;
        state.crashed = false;
    }

    /// Returns true once the armed budget was exhausted.
    pub fn has_crashed(&self) -> bool {
        self.state.lock().crashed
    }

    /// Total bytes passed through to the inner storage.
    pub fn bytes_written(&self) -> u64 {
        self.state.lock().bytes_written
    }

    /// Number of successful syncs.
    pub fn syncs(&self) -> u64 {
        self.state.lock().syncs
    }

    fn injected(what: &str) -> PoolError {
        PoolError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("injected fault: {what}"),
        ))
    }
}

impl FileIo for CrashIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        self.inner.read_at(off, dst)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if state.crashed {
            return Err(Self::injected("write after crash"));
        }
        if let Some(budget) = state.write_budget {
            if (src.len() as u64) > budget {
                let torn = &src[..budget as usize];
                if !torn.is_empty() {
                    self.inner.write_at(off, torn)?;
                }
                state.bytes_written += budget;
                state.write_budget = Some(0);
                state.crashed = true;
                return Err(Self::injected("torn write"));
            }
            state.write_budget = Some(budget - src.len() as u64);
        }
        self.inner.write_at(off, src)?;
        state.bytes_written += src.len() as u64;
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.crashed {
            return Err(Self::injected("sync after crash"));
        }
        if state.fail_syncs {
            return Err(Self::injected("sync failure"));
        }
        self.inner.sync_all()?;
        state.syncs += 1;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        self.inner.len()
    }

    fn set_len(&self, len: u64) -> Result<()> {
        if self.state.lock().crashed {
            return Err(Self::injected("resize after crash"));
        }
        self.inner.set_len(len)
    }
}
