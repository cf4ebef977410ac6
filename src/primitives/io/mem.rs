use std::io;

use parking_lot::Mutex;

use super::FileIo;
use crate::types::{PoolError, Result};

/// In-memory backing storage.
///
/// With sync tracking enabled the store also keeps the image as of the last
/// `sync_all`, which is what a power loss would leave behind.
#[derive(Default)]
pub struct MemIo {
    data: Mutex<Vec<u8>>,
    synced: Option<Mutex<Vec<u8>>>,
}

impl MemIo {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding a copy of `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(bytes),
            synced: None,
        }
    }

    /// Creates a store that also records the image at every sync.
    pub fn with_sync_tracking(bytes: Vec<u8>) -> Self {
        Self {
            synced: Some(Mutex::new(bytes.clone())),
            data: Mutex::new(bytes),
        }
    }

    /// Returns every completed write, synced or not.
    pub fn image(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Returns the image as of the last sync, or the current image when sync
    /// tracking is disabled.
    pub fn synced_image(&self) -> Vec<u8> {
        match &self.synced {
            Some(synced) => synced.lock().clone(),
            None => self.image(),
        }
    }

    /// Overwrites bytes directly, bypassing any wrapper; used to corrupt regions in tests.
    pub fn poke(&self, off: u64, bytes: &[u8]) {
        let mut data = self.data.lock();
        let start = off as usize;
        let end = start + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
    }
}

impl FileIo for MemIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        let data = self.data.lock();
        let start = usize::try_from(off).map_err(|_| PoolError::Invalid("offset overflow"))?;
        let end = start
            .checked_add(dst.len())
            .ok_or(PoolError::Invalid("offset overflow"))?;
        if end > data.len() {
            return Err(PoolError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of memory region",
            )));
        }
        dst.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        let start = usize::try_from(off).map_err(|_| PoolError::Invalid("offset overflow"))?;
        let end = start
            .checked_add(src.len())
            .ok_or(PoolError::Invalid("offset overflow"))?;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(src);
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        if let Some(synced) = &self.synced {
            let data = self.data.lock();
            let mut synced = synced.lock();
            synced.clear();
            synced.extend_from_slice(&data);
        }
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data.lock().len() as u64)
    }

    fn set_len(&self, len: u64) -> Result<()> {
        let len = usize::try_from(len).map_err(|_| PoolError::Invalid("length overflow"))?;
        self.data.lock().resize(len, 0);
        Ok(())
    }
}
