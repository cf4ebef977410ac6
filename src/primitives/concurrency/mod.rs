#![allow(unsafe_code)]
//! Exclusive ownership of a pool file.
//!
//! Two layers keep a region single-owner: a process-wide registry of claimed
//! paths, and an advisory byte-range lock on the file for other processes.
//! The registry is checked before any descriptor is opened, because POSIX
//! record locks are dropped when the process closes *any* descriptor of the
//! file.

use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::debug;

use crate::types::{PoolError, Result};

/// Offset of the locked byte; far past any pool data so the lock never
/// overlaps bytes that are read or written.
const LOCK_OFFSET: u64 = 1 << 62;
const LOCK_LEN: u64 = 1;

fn registry() -> &'static Mutex<HashSet<PathBuf>> {
    static REGISTRY: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

fn registry_key(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    let file_name = path
        .file_name()
        .ok_or(PoolError::Invalid("pool path has no file name"))?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let parent = parent.canonicalize().map_err(PoolError::from)?;
    Ok(parent.join(file_name))
}

/// Claim on a pool path held for as long as a pool handle is open.
pub struct RegionLock {
    key: PathBuf,
    file: Option<Arc<File>>,
}

impl RegionLock {
    /// Claims `path` for this process; fails with `Busy` when already claimed.
    pub fn claim(path: &Path) -> Result<Self> {
        let key = registry_key(path)?;
        let mut claimed = registry().lock();
        if !claimed.insert(key.clone()) {
            return Err(PoolError::Busy("pool is already open in this process"));
        }
        debug!(path = %key.display(), "region.lock.claim");
        Ok(Self { key, file: None })
    }

    /// Returns true when `path` is claimed by a live handle in this process.
    pub fn is_claimed(path: &Path) -> bool {
        match registry_key(path) {
            Ok(key) => registry().lock().contains(&key),
            Err(_) => false,
        }
    }

    /// Takes the cross-process advisory lock on the opened pool file.
    pub fn lock_file(&mut self, file: Arc<File>) -> Result<()> {
        if !lock_range(&file, LOCK_OFFSET, LOCK_LEN).map_err(PoolError::from)? {
            return Err(PoolError::Busy("pool is locked by another process"));
        }
        self.file = Some(file);
        Ok(())
    }

    /// Canonical path this claim covers.
    pub fn path(&self) -> &Path {
        &self.key
    }
}

impl Drop for RegionLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(_err) = unlock_range(&file, LOCK_OFFSET, LOCK_LEN) {
                #[cfg(debug_assertions)]
                eprintln!("failed to unlock {}: {:?}", self.key.display(), _err);
            }
        }
        registry().lock().remove(&self.key);
        debug!(path = %self.key.display(), "region.lock.release");
    }
}

fn lock_range(file: &Arc<File>, start: u64, len: u64) -> io::Result<bool> {
    #[cfg(unix)]
    {
        unix::lock_region(file, start, len)
    }
    #[cfg(windows)]
    {
        windows::lock_region(file, start, len)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (file, start, len);
        Err(io::Error::new(
            io::ErrorKind::Other,
            "file locking unsupported on this platform",
        ))
    }
}

fn unlock_range(file: &Arc<File>, start: u64, len: u64) -> io::Result<()> {
    #[cfg(unix)]
    {
        unix::unlock_region(file, start, len)
    }
    #[cfg(windows)]
    {
        windows::unlock_region(file, start, len)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = (file, start, len);
        Err(io::Error::new(
            io::ErrorKind::Other,
            "file locking unsupported on this platform",
        ))
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::io::AsRawFd;

    pub fn lock_region(file: &Arc<File>, start: u64, len: u64) -> io::Result<bool> {
        let fd = file.as_raw_fd();
        let mut flock = libc::flock {
            l_type: libc::F_WRLCK as _,
            l_whence: libc::SEEK_SET as _,
            l_start: start as libc::off_t,
            l_len: len as libc::off_t,
            l_pid: 0,
        };
        loop {
            let res = unsafe { libc::fcntl(fd, libc::F_SETLK, &mut flock) };
            if res == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) | Some(libc::EACCES) => return Ok(false),
                _ => return Err(err),
            }
        }
    }

    pub fn unlock_region(file: &Arc<File>, start: u64, len: u64) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let mut flock = libc::flock {
            l_type: libc::F_UNLCK as _,
            l_whence: libc::SEEK_SET as _,
            l_start: start as libc::off_t,
            l_len: len as libc::off_t,
            l_pid: 0,
        };
        let res = unsafe { libc::fcntl(fd, libc::F_SETLK, &mut flock) };
        if res == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use std::mem::zeroed;
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::ERROR_LOCK_VIOLATION;
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, UnlockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    pub fn lock_region(file: &Arc<File>, start: u64, len: u64) -> io::Result<bool> {
        unsafe {
            let handle = file.as_raw_handle();
            let mut overlapped: OVERLAPPED = zeroed();
            overlapped.Anonymous.Anonymous.Offset = start as u32;
            overlapped.Anonymous.Anonymous.OffsetHigh = (start >> 32) as u32;
            let flags = LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY;
            let res = LockFileEx(
                handle as isize,
                flags,
                0,
                len as u32,
                (len >> 32) as u32,
                &mut overlapped,
            );
            if res != 0 {
                Ok(true)
            } else {
                let err = io::Error::last_os_error();
                if matches!(err.raw_os_error(), Some(code) if code as u32 == ERROR_LOCK_VIOLATION) {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    pub fn unlock_region(file: &Arc<File>, start: u64, len: u64) -> io::Result<()> {
        unsafe {
            let handle = file.as_raw_handle();
            let mut overlapped: OVERLAPPED = zeroed();
            overlapped.Anonymous.Anonymous.Offset = start as u32;
            overlapped.Anonymous.Anonymous.OffsetHigh = (start >> 32) as u32;
            let res = UnlockFileEx(
                handle as isize,
                0,
                len as u32,
                (len >> 32) as u32,
                &mut overlapped,
            );
            if res != 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        }
    }
}
