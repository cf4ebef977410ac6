#![forbid(unsafe_code)]

//! CRC32 helpers for on-region structures.

/// Streaming CRC32 seeded with the location and pool salt of a structure.
///
/// Seeding means a block copied to another offset, or into another pool,
/// fails validation even if its bytes are intact.
pub struct BlockCrc {
    hasher: crc32fast::Hasher,
}

impl BlockCrc {
    /// Starts a checksum for the structure stored at `offset`.
    pub fn new(offset: u64, salt: u64) -> Self {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&offset.to_be_bytes());
        hasher.update(&salt.to_be_bytes());
        Self { hasher }
    }

    /// Feeds more covered bytes.
    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update(bytes);
        self
    }

    /// Checksum of the seed and every covered byte.
    pub fn finish(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

/// One-shot [`BlockCrc`] over `payload`.
pub fn block_crc32(offset: u64, salt: u64, payload: &[u8]) -> u32 {
    BlockCrc::new(offset, salt).update(payload).finish()
}

/// Unseeded CRC32, for structures validated before the salt is known.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}
