use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::{BlockHeader, BlockKind, PoolHeader, RegionMeta, BLOCK_ALIGN, BLOCK_HEADER_LEN};
use crate::primitives::bytes::align_up;
use crate::primitives::io::FileIo;
use crate::types::{Offset, PoolError, Result};

const MIN_PAYLOAD: u64 = 16;

/// A block header image the allocator wants persisted.
///
/// The allocator never writes the region itself; callers route these through
/// the transaction log so allocation commits atomically with its transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderWrite {
    /// Block offset.
    pub offset: Offset,
    /// Header to store there.
    pub header: BlockHeader,
}

/// In-memory view of one free-list entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeBlock {
    /// Payload length.
    pub len: u64,
    /// Next block on the durable list, or 0.
    pub next: u64,
    /// Previous block on the list, or 0 for the head. Not persisted.
    pub prev: u64,
}

/// Block allocator for the heap area of a region.
///
/// Free blocks form a singly linked list through their headers, rooted in the
/// superblock; the untouched tail of the heap beyond `top` is the wilderness.
#[derive(Clone, Debug)]
pub struct Allocator {
    heap_start: u64,
    heap_end: u64,
    top: u64,
    head: u64,
    free: BTreeMap<u64, FreeBlock>,
    by_size: BTreeSet<(u64, u64)>,
    fresh: HashMap<u64, u64>,
}

impl Allocator {
    /// Allocator over an empty heap.
    pub fn new(heap_start: u64, heap_end: u64) -> Self {
        Self {
            heap_start,
            heap_end,
            top: heap_start,
            head: 0,
            free: BTreeMap::new(),
            by_size: BTreeSet::new(),
            fresh: HashMap::new(),
        }
    }

    /// Rebuilds the allocator by walking the durable free list.
    pub fn load(io: &dyn FileIo, header: &PoolHeader, meta: &RegionMeta) -> Result<Self> {
        let mut alloc = Self::new(header.heap_offset, header.heap_end());
        alloc.top = meta.heap_top;
        alloc.head = meta.free_head;
        let mut seen = HashSet::new();
        let mut prev = 0u64;
        let mut cursor = meta.free_head;
        while cursor != 0 {
            if cursor < alloc.heap_start || cursor + BLOCK_HEADER_LEN > alloc.top {
                return Err(PoolError::Corruption("free list points outside the heap"));
            }
            if !seen.insert(cursor) {
                return Err(PoolError::Corruption("free list contains a cycle"));
            }
            let block = BlockHeader::read(io, Offset(cursor), header.salt)?;
            if block.kind != BlockKind::Free {
                return Err(PoolError::Corruption("free list links a used block"));
            }
            if cursor + BLOCK_HEADER_LEN + block.len > alloc.top {
                return Err(PoolError::Corruption("free block extends past heap top"));
            }
            alloc.free.insert(
                cursor,
                FreeBlock {
                    len: block.len,
                    next: block.next_free,
                    prev,
                },
            );
            alloc.by_size.insert((block.len, cursor));
            prev = cursor;
            cursor = block.next_free;
        }
        Ok(alloc)
    }

    /// Allocates a block with at least `nbytes` of payload.
    ///
    /// Best fit from the free list, splitting when the remainder can hold a
    /// block of its own; otherwise carves from the wilderness.
    pub fn allocate(
        &mut self,
        kind: BlockKind,
        nbytes: u64,
        out: &mut Vec<HeaderWrite>,
    ) -> Result<Offset> {
        debug_assert!(kind != BlockKind::Free);
        let need = align_up(nbytes.max(MIN_PAYLOAD), BLOCK_ALIGN);
        if let Some(&(found_len, off)) = self.by_size.range((need, 0)..).next() {
            self.unlink(off, out);
            let mut len = found_len;
            if found_len >= need + BLOCK_HEADER_LEN + MIN_PAYLOAD {
                let rest = off + BLOCK_HEADER_LEN + need;
                self.push(rest, found_len - need - BLOCK_HEADER_LEN, out);
                len = need;
            }
            self.claim(off, kind, len, out);
            return Ok(Offset(off));
        }
        let end = self
            .top
            .checked_add(BLOCK_HEADER_LEN + need)
            .ok_or(PoolError::Invalid("allocation size overflow"))?;
        if end > self.heap_end {
            return Err(PoolError::CapacityExceeded {
                what: "pool heap",
                limit: self.heap_end - self.heap_start,
            });
        }
        let off = self.top;
        self.top = end;
        self.claim(off, kind, need, out);
        Ok(Offset(off))
    }

    /// Returns the block at `offset` to the heap, merging it with free
    /// neighbours and with the wilderness when adjacent.
    pub fn free(
        &mut self,
        io: &dyn FileIo,
        salt: u64,
        offset: Offset,
        out: &mut Vec<HeaderWrite>,
    ) -> Result<()> {
        let mut start = offset.0;
        if start < self.heap_start || start >= self.top {
            return Err(PoolError::Corruption("freeing a block outside the heap"));
        }
        if self.free.contains_key(&start) {
            return Err(PoolError::Corruption("block freed twice"));
        }
        let mut len = match self.fresh.remove(&start) {
            Some(len) => len,
            None => {
                let header = BlockHeader::read(io, offset, salt)?;
                if header.kind == BlockKind::Free {
                    return Err(PoolError::Corruption("block freed twice"));
                }
                header.len
            }
        };
        let following = start + BLOCK_HEADER_LEN + len;
        if let Some(next) = self.free.get(&following).copied() {
            self.unlink(following, out);
            len += BLOCK_HEADER_LEN + next.len;
        }
        let preceding = self
            .free
            .range(..start)
            .next_back()
            .map(|(&off, block)| (off, *block));
        if let Some((prev_off, prev)) = preceding {
            if prev_off + BLOCK_HEADER_LEN + prev.len == start {
                self.unlink(prev_off, out);
                len += BLOCK_HEADER_LEN + prev.len;
                start = prev_off;
            }
        }
        if start + BLOCK_HEADER_LEN + len == self.top {
            self.top = start;
        } else {
            self.push(start, len, out);
        }
        Ok(())
    }

    /// Forgets which blocks were allocated since the last commit.
    pub fn settle(&mut self) {
        self.fresh.clear();
    }

    /// Current high-water mark.
    pub fn top(&self) -> u64 {
        self.top
    }

    /// Head of the durable free list.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// First heap byte.
    pub fn heap_start(&self) -> u64 {
        self.heap_start
    }

    /// Number of blocks on the free list.
    pub fn free_blocks(&self) -> usize {
        self.free.len()
    }

    /// Payload bytes held by free blocks.
    pub fn free_bytes(&self) -> u64 {
        self.free.values().map(|b| b.len).sum()
    }

    /// Bytes between the high-water mark and the end of the heap.
    pub fn wilderness(&self) -> u64 {
        self.heap_end - self.top
    }

    /// Free blocks keyed by offset.
    pub fn free_list(&self) -> &BTreeMap<u64, FreeBlock> {
        &self.free
    }

    /// Copies the allocator roots into `meta`.
    pub fn store_roots(&self, meta: &mut RegionMeta) {
        meta.heap_top = self.top;
        meta.free_head = self.head;
    }

    fn claim(&mut self, off: u64, kind: BlockKind, len: u64, out: &mut Vec<HeaderWrite>) {
        self.fresh.insert(off, len);
        out.push(HeaderWrite {
            offset: Offset(off),
            header: BlockHeader {
                kind,
                len,
                next_free: 0,
            },
        });
    }

    fn push(&mut self, off: u64, len: u64, out: &mut Vec<HeaderWrite>) {
        let next = self.head;
        if let Some(old_head) = self.free.get_mut(&next) {
            old_head.prev = off;
        }
        self.free.insert(off, FreeBlock { len, next, prev: 0 });
        self.by_size.insert((len, off));
        self.head = off;
        out.push(HeaderWrite {
            offset: Offset(off),
            header: BlockHeader {
                kind: BlockKind::Free,
                len,
                next_free: next,
            },
        });
    }

    fn unlink(&mut self, off: u64, out: &mut Vec<HeaderWrite>) {
        let Some(block) = self.free.remove(&off) else {
            return;
        };
        self.by_size.remove(&(block.len, off));
        if block.prev == 0 {
            self.head = block.next;
        } else if let Some(prev) = self.free.get_mut(&block.prev) {
            prev.next = block.next;
            out.push(HeaderWrite {
                offset: Offset(block.prev),
                header: BlockHeader {
                    kind: BlockKind::Free,
                    len: prev.len,
                    next_free: block.next,
                },
            });
        }
        if let Some(next) = self.free.get_mut(&block.next) {
            next.prev = block.prev;
        }
    }
}
