use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Serialize;

use crate::primitives::bytes::get_u64;
use crate::primitives::io::FileIo;
use crate::primitives::region::{
    payload_offset, Allocator, BlockHeader, BlockKind, PoolHeader, RegionMeta, BLOCK_HEADER_LEN,
};
use crate::primitives::wal::{LogArea, SegmentRead};
use crate::storage::dict::Dictionary;
use crate::storage::directory::{directory_payload_len, Directory};
use crate::storage::node::{
    read_body, read_slots, table_payload_len, Slot, TableHeader, TableKind,
};
use crate::storage::props::{decode_body, RawBody};
use crate::storage::relationship::decode_rel_body;
use crate::types::{Offset, PoolError};

use crate::admin::util::open_region;
use crate::admin::Result;

const MAX_FINDINGS: usize = 32;

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Non-critical issue that may indicate a problem.
    Warning,
    /// Critical issue indicating corruption.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

impl VerifyFinding {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Warning,
            message: message.into(),
        }
    }
}

/// Figures collected while walking the region.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Heap blocks walked.
    pub blocks: u64,
    /// Blocks on the free list.
    pub free_blocks: u64,
    /// Graphs in the directory.
    pub graphs: u64,
    /// Live nodes across all graphs.
    pub nodes: u64,
    /// Live relationships across all graphs.
    pub relationships: u64,
    /// Interned dictionary strings.
    pub strings: u64,
}

/// Complete report of a verification pass.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// True when no error-level finding was raised.
    pub success: bool,
    /// Issues discovered, capped at a fixed number.
    pub findings: Vec<VerifyFinding>,
    /// Figures about the structures examined.
    pub counts: VerifyCounts,
}

/// Verifies the pool file at `path` without opening it as a pool.
///
/// The file is claimed exclusively for the duration of the check; no
/// recovery runs, so a pending log segment is reported as a warning.
///
/// # Errors
///
/// Returns an error if the file is missing, already open, or unreadable.
pub fn verify(path: impl AsRef<Path>) -> Result<VerifyReport> {
    let handle = open_region(path.as_ref())?;
    Ok(verify_region(&handle.io)?)
}

/// Walks every structure of the region behind `io`.
///
/// Structural damage becomes findings; only I/O failures are returned as
/// errors.
pub fn verify_region(io: &dyn FileIo) -> crate::types::Result<VerifyReport> {
    let mut findings = Vec::new();
    let mut counts = VerifyCounts::default();
    run_checks(io, &mut findings, &mut counts)?;
    Ok(VerifyReport {
        success: !findings
            .iter()
            .any(|finding| finding.severity == VerifySeverity::Error),
        findings,
        counts,
    })
}

fn run_checks(
    io: &dyn FileIo,
    findings: &mut Vec<VerifyFinding>,
    counts: &mut VerifyCounts,
) -> crate::types::Result<()> {
    let Some(header) = surface(findings, "pool header", PoolHeader::load(io))? else {
        return Ok(());
    };
    match LogArea::new(&header).read(io)? {
        SegmentRead::Empty | SegmentRead::Applied(_) => {}
        SegmentRead::Flushed { header: segment, .. } => push(
            findings,
            VerifyFinding::warning(format!(
                "log segment lsn {} is flushed but not applied; it will be replayed on open",
                segment.lsn
            )),
        ),
        SegmentRead::Torn(reason) => push(
            findings,
            VerifyFinding::warning(format!(
                "log segment is torn ({reason}); it will be discarded on open"
            )),
        ),
    }
    let Some(meta) = surface(findings, "superblock", RegionMeta::read(io, &header))? else {
        return Ok(());
    };
    if meta.heap_top < header.heap_offset || meta.heap_top > header.heap_end() {
        push_error(
            findings,
            format!("heap top {} lies outside the heap", meta.heap_top),
        );
        return Ok(());
    }

    let blocks = walk_heap(io, &header, &meta, findings, counts)?;
    let mut referenced: HashSet<u64> = HashSet::new();

    if let Some(alloc) = surface(findings, "free list", Allocator::load(io, &header, &meta))? {
        check_free_list(&alloc, &blocks, findings, counts);
    }

    let dict = surface(findings, "dictionary", Dictionary::load(io, &header, &meta))?;
    if let Some(dict) = &dict {
        counts.strings = dict.len() as u64;
        let mut page = meta.dict_head;
        while page != 0 && referenced.insert(page) {
            let mut next = [0u8; 8];
            io.read_at(payload_offset(Offset(page)), &mut next)?;
            page = get_u64(&next, 0);
        }
    }

    let Some(directory) = surface(findings, "directory", Directory::load(io, &header, &meta))?
    else {
        return Ok(());
    };
    if !directory.block().is_null() {
        referenced.insert(directory.block().0);
        expect_block(
            &blocks,
            directory.block(),
            BlockKind::Directory,
            directory_payload_len(directory.len() as u32),
            findings,
        );
    }
    counts.graphs = directory.len() as u64;
    let mut walk = TableWalk {
        io,
        salt: header.salt,
        blocks: &blocks,
        dict: dict.as_ref(),
        referenced: &mut referenced,
        findings: &mut *findings,
    };
    for entry in directory.entries() {
        walk.referenced.insert(entry.table.0);
        expect_block(
            &blocks,
            entry.table,
            BlockKind::NodeTable,
            table_payload_len(entry.capacity),
            walk.findings,
        );
        let Some(table) = walk.header(&entry.name, entry.table, TableKind::Nodes)? else {
            continue;
        };
        let Some(nodes) = walk.slots(&entry.name, entry.table, &table, None)? else {
            continue;
        };
        counts.nodes += nodes.iter().filter(|slot| slot.live).count() as u64;
        if !table.link.is_null() {
            walk.referenced.insert(table.link.0);
            let Some(rels) = walk.header(&entry.name, table.link, TableKind::Relationships)? else {
                continue;
            };
            expect_block(
                &blocks,
                table.link,
                BlockKind::RelTable,
                table_payload_len(rels.capacity),
                walk.findings,
            );
            if rels.link != entry.table || rels.graph != table.graph {
                push_error(
                    walk.findings,
                    format!(
                        "graph {}: relationship table {} does not link back to its node table",
                        entry.name, table.link
                    ),
                );
            }
            let rel_slots = walk.slots(&entry.name, table.link, &rels, Some(nodes.as_slice()))?;
            if let Some(slots) = rel_slots {
                counts.relationships += slots.iter().filter(|slot| slot.live).count() as u64;
            }
        }
        if walk.findings.len() >= MAX_FINDINGS {
            return Ok(());
        }
    }

    if dict.is_some() {
        for (offset, block) in &blocks {
            if block.kind != BlockKind::Free && !referenced.contains(offset) {
                push_error(
                    findings,
                    format!("{:?} block at {offset} is not referenced", block.kind),
                );
            }
        }
    }
    Ok(())
}

/// Checks slot tables and the bodies their live slots point at.
struct TableWalk<'a> {
    io: &'a dyn FileIo,
    salt: u64,
    blocks: &'a BTreeMap<u64, BlockHeader>,
    dict: Option<&'a Dictionary>,
    referenced: &'a mut HashSet<u64>,
    findings: &'a mut Vec<VerifyFinding>,
}

impl TableWalk<'_> {
    fn header(
        &mut self,
        graph: &str,
        at: Offset,
        kind: TableKind,
    ) -> crate::types::Result<Option<TableHeader>> {
        match TableHeader::read_kind(self.io, at, self.salt, kind) {
            Ok(header) => Ok(Some(header)),
            Err(PoolError::Corruption(reason)) => {
                push_error(self.findings, format!("graph {graph}: {reason}"));
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Checks every live slot of one table. Relationship tables pass the
    /// node slots so endpoints can be resolved.
    fn slots(
        &mut self,
        graph: &str,
        at: Offset,
        table: &TableHeader,
        nodes: Option<&[Slot]>,
    ) -> crate::types::Result<Option<Vec<Slot>>> {
        let slots = match read_slots(self.io, at, table.capacity) {
            Ok(slots) => slots,
            Err(PoolError::Corruption(reason)) => {
                push_error(self.findings, format!("graph {graph}: {reason}"));
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let what = match table.kind {
            TableKind::Nodes => "slot",
            TableKind::Relationships => "relationship slot",
        };
        for (idx, slot) in slots.iter().enumerate().filter(|(_, slot)| slot.live) {
            if self.findings.len() >= MAX_FINDINGS {
                break;
            }
            if slot.generation > table.issued {
                push_error(
                    self.findings,
                    format!(
                        "graph {graph} {what} {idx}: generation {} is past the issued mark {}",
                        slot.generation, table.issued
                    ),
                );
            }
            if !self.referenced.insert(slot.body.0) {
                push_error(
                    self.findings,
                    format!("graph {graph} {what} {idx}: body block {} is shared", slot.body.0),
                );
                continue;
            }
            if !expect_block(
                self.blocks,
                slot.body,
                table.kind.body_block(),
                slot.body_len as u64,
                self.findings,
            ) {
                continue;
            }
            let bytes = match read_body(self.io, self.salt, slot, true) {
                Ok(bytes) => bytes,
                Err(PoolError::Corruption(reason)) => {
                    push_error(self.findings, format!("graph {graph} {what} {idx}: {reason}"));
                    continue;
                }
                Err(err) => return Err(err),
            };
            let body = match nodes {
                None => decode_body(&bytes),
                Some(nodes) => decode_rel_body(&bytes).map(|rel| {
                    for end in [rel.src, rel.dst] {
                        let live = nodes
                            .get(end.slot() as usize)
                            .is_some_and(|node| node.holds(end));
                        if !live {
                            push_error(
                                self.findings,
                                format!(
                                    "graph {graph} {what} {idx}: endpoint {end} is not a live node"
                                ),
                            );
                        }
                    }
                    rel.body
                }),
            };
            match body {
                Ok(body) => self.check_strings(graph, what, idx, &body),
                Err(err) => {
                    push_error(self.findings, format!("graph {graph} {what} {idx}: {err}"))
                }
            }
        }
        Ok(Some(slots))
    }

    fn check_strings(&mut self, graph: &str, what: &str, idx: usize, body: &RawBody) {
        let Some(dict) = self.dict else { return };
        let dangling = std::iter::once(body.label)
            .chain(body.props.iter().map(|(key, _)| *key))
            .find(|id| dict.resolve(*id).is_none());
        if let Some(id) = dangling {
            push_error(
                self.findings,
                format!(
                    "graph {graph} {what} {idx}: string id {} is not in the dictionary",
                    id.0
                ),
            );
        }
    }
}

/// Walks block headers from the heap start to the high-water mark.
fn walk_heap(
    io: &dyn FileIo,
    header: &PoolHeader,
    meta: &RegionMeta,
    findings: &mut Vec<VerifyFinding>,
    counts: &mut VerifyCounts,
) -> crate::types::Result<BTreeMap<u64, BlockHeader>> {
    let mut blocks = BTreeMap::new();
    let mut offset = header.heap_offset;
    while offset < meta.heap_top {
        let block = match BlockHeader::read(io, Offset(offset), header.salt) {
            Ok(block) => block,
            Err(PoolError::Corruption(reason)) => {
                push_error(findings, format!("block at {offset}: {reason}"));
                return Ok(blocks);
            }
            Err(err) => return Err(err),
        };
        let end = offset + BLOCK_HEADER_LEN + block.len;
        if end > meta.heap_top {
            push_error(
                findings,
                format!("block at {offset} runs past the heap top {}", meta.heap_top),
            );
            return Ok(blocks);
        }
        counts.blocks += 1;
        blocks.insert(offset, block);
        offset = end;
    }
    Ok(blocks)
}

fn check_free_list(
    alloc: &Allocator,
    blocks: &BTreeMap<u64, BlockHeader>,
    findings: &mut Vec<VerifyFinding>,
    counts: &mut VerifyCounts,
) {
    counts.free_blocks = alloc.free_blocks() as u64;
    for offset in alloc.free_list().keys() {
        if !blocks.contains_key(offset) {
            push_error(
                findings,
                format!("free list entry {offset} is not a block boundary"),
            );
        }
    }
    for (offset, block) in blocks {
        if block.kind == BlockKind::Free && !alloc.free_list().contains_key(offset) {
            push_error(findings, format!("free block at {offset} is not on the free list"));
        }
    }
}

fn expect_block(
    blocks: &BTreeMap<u64, BlockHeader>,
    at: Offset,
    kind: BlockKind,
    min_len: u64,
    findings: &mut Vec<VerifyFinding>,
) -> bool {
    match blocks.get(&at.0) {
        Some(block) if block.kind == kind && block.len >= min_len => true,
        Some(block) => {
            push_error(
                findings,
                format!(
                    "block at {} is {:?} ({} bytes), expected {kind:?} of at least {min_len}",
                    at.0, block.kind, block.len
                ),
            );
            false
        }
        None => {
            push_error(
                findings,
                format!("{kind:?} reference {} is not a block boundary", at.0),
            );
            false
        }
    }
}

/// Turns a structural error into a finding; I/O errors propagate.
fn surface<T>(
    findings: &mut Vec<VerifyFinding>,
    what: &str,
    result: crate::types::Result<T>,
) -> crate::types::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err @ (PoolError::Corruption(_) | PoolError::SizeMismatch { .. })) => {
            push_error(findings, format!("{what}: {err}"));
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn push(findings: &mut Vec<VerifyFinding>, finding: VerifyFinding) {
    if findings.len() < MAX_FINDINGS {
        findings.push(finding);
    }
}

fn push_error(findings: &mut Vec<VerifyFinding>, message: impl Into<String>) {
    push(findings, VerifyFinding::error(message));
}
