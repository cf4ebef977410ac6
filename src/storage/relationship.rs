//! Relationship bodies and the in-memory endpoint index.
//!
//! A relationship body is the two endpoint ids followed by an ordinary
//! label-and-properties body. Endpoints are kept in memory per graph so
//! deleting a node can find the relationships attached to it without a
//! table scan.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::primitives::bytes::{buf::Cursor, var};
use crate::storage::node::{Slot, SlotMap};
use crate::storage::props::{decode_body, encode_body, PropValue, Properties, RawBody};
use crate::types::{NodeId, Offset, RelId, Result, StrId};

/// Relationship slots allotted per node of capacity.
pub const RELATIONSHIPS_PER_NODE: u32 = 4;

/// Relationship table capacity for a graph of `nodes` node slots.
pub fn relationship_capacity(nodes: u32) -> u32 {
    nodes.saturating_mul(RELATIONSHIPS_PER_NODE)
}

/// A committed relationship as read back from a graph.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Relationship {
    /// Relationship identifier.
    pub id: RelId,
    /// Source node.
    pub src: NodeId,
    /// Destination node.
    pub dst: NodeId,
    /// Relationship label.
    pub label: String,
    /// Relationship properties.
    pub properties: Properties,
}

/// Decoded relationship body with dictionary ids still unresolved.
#[derive(Clone, Debug, PartialEq)]
pub struct RawRelationship {
    /// Source node.
    pub src: NodeId,
    /// Destination node.
    pub dst: NodeId,
    /// Label and properties.
    pub body: RawBody,
}

/// Encodes a relationship body.
pub fn encode_rel_body(
    src: NodeId,
    dst: NodeId,
    label: StrId,
    props: &[(StrId, &PropValue)],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    var::encode_u64(src.0, &mut out);
    var::encode_u64(dst.0, &mut out);
    out.extend_from_slice(&encode_body(label, props));
    out
}

/// Decodes only the endpoints of a relationship body.
pub fn decode_endpoints(bytes: &[u8]) -> Result<(NodeId, NodeId, usize)> {
    let mut cur = Cursor::new(bytes);
    let src = NodeId(cur.var_u64()?);
    let dst = NodeId(cur.var_u64()?);
    Ok((src, dst, cur.off))
}

/// Decodes a full relationship body.
pub fn decode_rel_body(bytes: &[u8]) -> Result<RawRelationship> {
    let (src, dst, off) = decode_endpoints(bytes)?;
    Ok(RawRelationship {
        src,
        dst,
        body: decode_body(&bytes[off..])?,
    })
}

/// Committed relationships of one node, by endpoint.
#[derive(Debug, Default)]
pub struct Adjacency {
    ends: BTreeMap<RelId, (NodeId, NodeId)>,
    attached: BTreeMap<NodeId, BTreeSet<RelId>>,
}

impl Adjacency {
    /// Records a committed relationship.
    pub fn attach(&mut self, id: RelId, src: NodeId, dst: NodeId) {
        self.ends.insert(id, (src, dst));
        self.attached.entry(src).or_default().insert(id);
        self.attached.entry(dst).or_default().insert(id);
    }

    /// Forgets a deleted relationship.
    pub fn detach(&mut self, id: RelId) {
        let Some((src, dst)) = self.ends.remove(&id) else {
            return;
        };
        for node in [src, dst] {
            if let Some(set) = self.attached.get_mut(&node) {
                set.remove(&id);
                if set.is_empty() {
                    self.attached.remove(&node);
                }
            }
        }
    }

    /// Endpoints of a committed relationship.
    pub fn ends(&self, id: RelId) -> Option<(NodeId, NodeId)> {
        self.ends.get(&id).copied()
    }

    /// Relationships with `node` as either endpoint.
    pub fn of(&self, node: NodeId) -> Vec<RelId> {
        self.attached
            .get(&node)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// A graph's relationship table as held in memory.
#[derive(Debug)]
pub struct RelStore {
    /// RelTable block.
    pub table: Offset,
    /// Slot bookkeeping.
    pub slots: SlotMap,
    /// Endpoint index over committed relationships.
    pub adjacency: Adjacency,
}

impl RelStore {
    /// Store for a freshly created table.
    pub fn empty(table: Offset, capacity: u32, issued: u32) -> Self {
        Self {
            table,
            slots: SlotMap::empty(capacity, issued),
            adjacency: Adjacency::default(),
        }
    }

    /// Rebuilds the store from a table's slots and the endpoints of its
    /// live relationships.
    pub fn load(
        table: Offset,
        slots: &[Slot],
        issued: u32,
        mut endpoints: impl FnMut(&Slot) -> Result<(NodeId, NodeId)>,
    ) -> Result<Self> {
        let mut adjacency = Adjacency::default();
        for (idx, slot) in slots.iter().enumerate().filter(|(_, slot)| slot.live) {
            let (src, dst) = endpoints(slot)?;
            adjacency.attach(RelId::new(idx as u32, slot.generation), src, dst);
        }
        Ok(Self {
            table,
            slots: SlotMap::from_slots(slots, issued),
            adjacency,
        })
    }
}
