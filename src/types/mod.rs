#![forbid(unsafe_code)]
//! Identifiers, the crate error type and checksum helpers.

use std::fmt;

use serde::Serialize;

pub mod checksum;

pub use checksum::{block_crc32, crc32, BlockCrc};

/// Byte offset into a pool region.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize)]
pub struct Offset(pub u64);
/// Identifier of a graph inside a pool.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
pub struct GraphId(pub u32);
/// Identifier of an interned label or property key.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
pub struct StrId(pub u32);
/// Log sequence number of a committed segment.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize)]
pub struct Lsn(pub u64);
/// Transaction identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize)]
pub struct TxnId(pub u64);

/// Node identifier: slot index in the low 32 bits, slot generation in the high 32 bits.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Builds an id from a slot index and its generation.
    pub fn new(slot: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | slot as u64)
    }

    /// Slot index inside the graph's node table.
    pub fn slot(self) -> u32 {
        self.0 as u32
    }

    /// Generation the slot carried when this id was issued.
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

/// Relationship identifier, packed like [`NodeId`] over the relationship table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize)]
pub struct RelId(pub u64);

impl RelId {
    /// Builds an id from a slot index and its generation.
    pub fn new(slot: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | slot as u64)
    }

    /// Slot index inside the graph's relationship table.
    pub fn slot(self) -> u32 {
        self.0 as u32
    }

    /// Generation the slot carried when this id was issued.
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

/// An id that names one generation of one table slot.
pub trait SlotKey: Copy {
    /// Builds the id.
    fn from_parts(slot: u32, generation: u32) -> Self;
    /// Slot index.
    fn slot_index(self) -> u32;
    /// Slot generation.
    fn slot_generation(self) -> u32;
}

impl SlotKey for NodeId {
    fn from_parts(slot: u32, generation: u32) -> Self {
        NodeId::new(slot, generation)
    }

    fn slot_index(self) -> u32 {
        self.slot()
    }

    fn slot_generation(self) -> u32 {
        self.generation()
    }
}

impl SlotKey for RelId {
    fn from_parts(slot: u32, generation: u32) -> Self {
        RelId::new(slot, generation)
    }

    fn slot_index(self) -> u32 {
        self.slot()
    }

    fn slot_generation(self) -> u32 {
        self.generation()
    }
}

impl Offset {
    /// Returns true for the null offset.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised by the pool, graph and transaction APIs.
#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    /// Underlying I/O failure outside the commit path.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// A pool, graph, node or relationship does not exist.
    #[error("{what} not found: {name}")]
    NotFound {
        /// Kind of object that was looked up.
        what: &'static str,
        /// Name or id that was looked up.
        name: String,
    },
    /// A pool or graph with this name already exists.
    #[error("{what} already exists: {name}")]
    AlreadyExists {
        /// Kind of object that was created.
        what: &'static str,
        /// Conflicting name.
        name: String,
    },
    /// The pool is already open or the graph has an open transaction.
    #[error("busy: {0}")]
    Busy(&'static str),
    /// A fixed-size structure has no room left.
    #[error("capacity exceeded: {what} (limit {limit})")]
    CapacityExceeded {
        /// The structure that is full.
        what: &'static str,
        /// Its configured limit.
        limit: u64,
    },
    /// A transaction was used outside its open state or against the wrong graph.
    #[error("transaction state: {0}")]
    TransactionState(&'static str),
    /// A durable write failed; the pool refuses further writes until reopened.
    #[error("durability failure: {0}")]
    Durability(String),
    /// On-disk structures are inconsistent.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// The backing file length does not match the size recorded at creation.
    #[error("pool size mismatch: header records {expected} bytes, file has {found}")]
    SizeMismatch {
        /// Size recorded in the pool header.
        expected: u64,
        /// Actual length of the backing storage.
        found: u64,
    },
    /// An argument was rejected.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The pool handle was closed.
    #[error("pool is closed")]
    Closed,
}

impl PoolError {
    pub(crate) fn not_found(what: &'static str, name: impl fmt::Display) -> Self {
        PoolError::NotFound {
            what,
            name: name.to_string(),
        }
    }

    pub(crate) fn already_exists(what: &'static str, name: impl fmt::Display) -> Self {
        PoolError::AlreadyExists {
            what,
            name: name.to_string(),
        }
    }

    /// Returns true for [`PoolError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, PoolError::NotFound { .. })
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PoolError>;
