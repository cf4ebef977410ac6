//! Pool-wide string dictionary for labels and property keys.
//!
//! Strings live in a chain of Dictionary pages, each an append-only list of
//! `(id u32, len u16, bytes)` entries behind a 16-byte page header
//! `(next u64, used u32, count u32)`. Ids are handed out sequentially from 1.

use std::collections::HashMap;

use crate::primitives::bytes::{get_u16, get_u32, get_u64};
use crate::primitives::io::FileIo;
use crate::primitives::region::{payload_offset, BlockHeader, BlockKind, PoolHeader, RegionMeta};
use crate::types::{Offset, PoolError, Result, StrId};

/// Payload size of a dictionary page.
pub const DICT_PAGE_LEN: u64 = 4096;
/// Bytes of page header in front of the entries.
pub const DICT_PAGE_HEADER: u64 = 16;
/// Longest label or property key, in bytes.
pub const MAX_DICT_STRING: usize = 1024;
const ENTRY_OVERHEAD: u32 = 6;

/// Position where the next entry will be appended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DictTail {
    /// Tail page, or null before the first string.
    pub page: Offset,
    /// Entry bytes used in the tail page.
    pub used: u32,
    /// Entries in the tail page.
    pub count: u32,
}

/// Loaded dictionary.
#[derive(Clone, Debug, Default)]
pub struct Dictionary {
    by_text: HashMap<String, StrId>,
    by_id: Vec<String>,
    tail: DictTail,
}

impl Dictionary {
    /// Loads every page reachable from the superblock.
    pub fn load(io: &dyn FileIo, header: &PoolHeader, meta: &RegionMeta) -> Result<Self> {
        let mut dict = Self::default();
        let mut page = meta.dict_head;
        let mut pages = 0u64;
        while page != 0 {
            pages += 1;
            if pages > header.pool_size / DICT_PAGE_LEN {
                return Err(PoolError::Corruption("dictionary page chain is cyclic"));
            }
            let block = BlockHeader::read(io, Offset(page), header.salt)?;
            if block.kind != BlockKind::Dictionary || block.len < DICT_PAGE_LEN {
                return Err(PoolError::Corruption("dictionary chain links a foreign block"));
            }
            let mut buf = vec![0u8; DICT_PAGE_LEN as usize];
            io.read_at(payload_offset(Offset(page)), &mut buf)?;
            let next = get_u64(&buf, 0);
            let used = get_u32(&buf, 8);
            let count = get_u32(&buf, 12);
            if used as u64 > DICT_PAGE_LEN - DICT_PAGE_HEADER {
                return Err(PoolError::Corruption("dictionary page overflows"));
            }
            let entries = &buf[DICT_PAGE_HEADER as usize..(DICT_PAGE_HEADER as usize + used as usize)];
            let mut at = 0usize;
            let mut seen = 0u32;
            while at < entries.len() {
                if at + ENTRY_OVERHEAD as usize > entries.len() {
                    return Err(PoolError::Corruption("dictionary entry truncated"));
                }
                let id = get_u32(entries, at);
                let len = get_u16(entries, at + 4) as usize;
                let start = at + ENTRY_OVERHEAD as usize;
                let text = entries
                    .get(start..start + len)
                    .ok_or(PoolError::Corruption("dictionary entry truncated"))?;
                let text = std::str::from_utf8(text)
                    .map_err(|_| PoolError::Corruption("dictionary entry is not valid UTF-8"))?;
                if id as usize != dict.by_id.len() + 1 {
                    return Err(PoolError::Corruption("dictionary ids are not sequential"));
                }
                dict.insert(StrId(id), text.to_owned());
                at = start + len;
                seen += 1;
            }
            if seen != count {
                return Err(PoolError::Corruption("dictionary page count mismatch"));
            }
            if next == 0 {
                if page != meta.dict_tail {
                    return Err(PoolError::Corruption("dictionary tail mismatch"));
                }
                dict.tail = DictTail {
                    page: Offset(page),
                    used,
                    count,
                };
            }
            page = next;
        }
        if dict.by_id.len() as u64 + 1 != meta.next_str_id as u64 {
            return Err(PoolError::Corruption("dictionary size disagrees with superblock"));
        }
        Ok(dict)
    }

    /// Id of `text`, if interned.
    pub fn lookup(&self, text: &str) -> Option<StrId> {
        self.by_text.get(text).copied()
    }

    /// Text of `id`, if known.
    pub fn resolve(&self, id: StrId) -> Option<&str> {
        let idx = (id.0 as usize).checked_sub(1)?;
        self.by_id.get(idx).map(String::as_str)
    }

    /// Text of `id`, or corruption when a stored id dangles.
    pub fn resolve_stored(&self, id: StrId) -> Result<&str> {
        self.resolve(id)
            .ok_or(PoolError::Corruption("dangling dictionary id"))
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Where the next entry goes.
    pub fn tail(&self) -> DictTail {
        self.tail
    }

    /// Installs strings interned by a committed transaction.
    pub fn absorb(&mut self, added: Vec<(StrId, String)>, tail: DictTail) {
        for (id, text) in added {
            self.insert(id, text);
        }
        self.tail = tail;
    }

    fn insert(&mut self, id: StrId, text: String) {
        self.by_text.insert(text.clone(), id);
        self.by_id.push(text);
    }
}

/// Strings interned while planning one commit.
#[derive(Debug)]
pub struct DictDelta {
    added: Vec<(StrId, String)>,
    index: HashMap<String, StrId>,
    tail: DictTail,
}

/// Where a new dictionary entry must be written.
#[derive(Debug, PartialEq, Eq)]
pub enum DictPlacement {
    /// Fits in the current tail page.
    Append {
        /// Byte position inside the page's entry area.
        at: u32,
        /// Entry count after the append.
        count: u32,
    },
    /// Needs a new page linked after the current tail.
    NewPage,
}

impl DictDelta {
    /// Empty delta starting at the dictionary's current tail.
    pub fn new(base: &Dictionary) -> Self {
        Self {
            added: Vec::new(),
            index: HashMap::new(),
            tail: base.tail,
        }
    }

    /// Id of `text` if this delta interned it.
    pub fn lookup(&self, text: &str) -> Option<StrId> {
        self.index.get(text).copied()
    }

    /// Decides where an entry for `text` goes without recording it.
    pub fn placement(&self, text: &str) -> DictPlacement {
        let need = ENTRY_OVERHEAD + text.len() as u32;
        if self.tail.page.is_null()
            || self.tail.used as u64 + need as u64 > DICT_PAGE_LEN - DICT_PAGE_HEADER
        {
            DictPlacement::NewPage
        } else {
            DictPlacement::Append {
                at: self.tail.used,
                count: self.tail.count + 1,
            }
        }
    }

    /// Starts a fresh, empty tail page.
    pub fn start_page(&mut self, page: Offset) {
        self.tail = DictTail {
            page,
            used: 0,
            count: 0,
        };
    }

    /// Records `text` at the current tail.
    pub fn record(&mut self, id: StrId, text: &str) {
        self.tail.used += ENTRY_OVERHEAD + text.len() as u32;
        self.tail.count += 1;
        self.index.insert(text.to_owned(), id);
        self.added.push((id, text.to_owned()));
    }

    /// Current tail page.
    pub fn tail(&self) -> DictTail {
        self.tail
    }

    /// Text of an id interned by this delta.
    pub fn resolve(&self, id: StrId) -> Option<&str> {
        self.added
            .iter()
            .find(|(added, _)| *added == id)
            .map(|(_, text)| text.as_str())
    }

    /// Consumes the delta.
    pub fn into_parts(self) -> (Vec<(StrId, String)>, DictTail) {
        (self.added, self.tail)
    }
}

/// Encodes one dictionary entry.
pub fn encode_entry(id: StrId, text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(ENTRY_OVERHEAD as usize + text.len());
    out.extend_from_slice(&id.0.to_be_bytes());
    out.extend_from_slice(&(text.len() as u16).to_be_bytes());
    out.extend_from_slice(text.as_bytes());
    out
}

/// Rejects strings that cannot be interned.
pub fn validate(text: &str) -> Result<()> {
    if text.len() > MAX_DICT_STRING {
        return Err(PoolError::Invalid(
            "labels and property keys are limited to 1024 bytes",
        ));
    }
    Ok(())
}
