//! Low-level primitives for building the storage engine.
//!
//! Includes byte utilities, positioned I/O, region locking, the region
//! layout with its block allocator, and the transaction log area.

/// Byte-level utilities and encoding/decoding.
pub mod bytes;

/// Exclusive ownership of pool files.
pub mod concurrency;

/// I/O abstractions: files, memory, and crash injection.
pub mod io;

/// Region layout and the persistent block allocator.
///
/// Pool header, superblock, heap block headers and free-list management.
pub mod region;

/// Transaction log area.
///
/// Segment slot that makes a commit durable before it is applied.
pub mod wal;
