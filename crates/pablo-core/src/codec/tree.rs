//! Succinct (LOUDS) encoding for edge sets that form a forest.
//!
//! The forest hangs under a virtual super-root. Walking it breadth-first, each
//! node writes one `1` bit per child followed by a `0`, which costs `2n + 1`
//! bits for `n` nodes. The node ids travel alongside in BFS order
//! (zigzag-delta coded), and one parallel column per edge field holds the data
//! of the edge entering each non-root node, BFS order again.

use super::varint::{Reader, Writer};
use crate::confidence::{Confidence, Weight};
use crate::graph::{Edge, Graph};
use crate::types::{EdgeId, EdgeType, LabelId, NodeId, PabloError};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A forest laid out in BFS order.
#[derive(Debug)]
pub(crate) struct Forest<'g> {
    /// Nodes in BFS order (super-root excluded).
    order: Vec<NodeId>,
    /// Children of the super-root; they lead `order`.
    roots: usize,
    /// Edge entering `order[roots + i]`.
    parent_edges: Vec<&'g Edge>,
    bits: Vec<bool>,
}

/// Lay out `edges` as a forest, or `None` when some node has two parents or
/// the edges contain a cycle.
pub(crate) fn as_forest<'g>(edges: &[&'g Edge]) -> Option<Forest<'g>> {
    let mut parent: BTreeMap<NodeId, &'g Edge> = BTreeMap::new();
    let mut children: BTreeMap<NodeId, Vec<&'g Edge>> = BTreeMap::new();
    let mut members: BTreeSet<NodeId> = BTreeSet::new();

    for &edge in edges {
        if parent.insert(edge.dst, edge).is_some() {
            return None;
        }
        children.entry(edge.src).or_default().push(edge);
        members.insert(edge.src);
        members.insert(edge.dst);
    }
    for list in children.values_mut() {
        list.sort_by_key(|e| (e.dst, e.id));
    }

    let roots: Vec<NodeId> = members
        .iter()
        .copied()
        .filter(|n| !parent.contains_key(n))
        .collect();

    let mut order = Vec::with_capacity(members.len());
    let mut parent_edges = Vec::with_capacity(edges.len());
    let mut bits = Vec::with_capacity(2 * members.len() + 1);

    bits.extend(std::iter::repeat_n(true, roots.len()));
    bits.push(false);

    let mut queue: VecDeque<NodeId> = roots.iter().copied().collect();
    while let Some(node) = queue.pop_front() {
        order.push(node);
        if let Some(&edge) = parent.get(&node) {
            parent_edges.push(edge);
        }
        let kids = children.get(&node).map_or(&[][..], Vec::as_slice);
        for edge in kids {
            bits.push(true);
            queue.push_back(edge.dst);
        }
        bits.push(false);
    }

    // nodes on a cycle are never reached from a root
    if order.len() != members.len() {
        return None;
    }

    Some(Forest {
        order,
        roots: roots.len(),
        parent_edges,
        bits,
    })
}

pub(crate) fn write_forest(forest: &Forest<'_>, out: &mut Writer) {
    out.len(forest.order.len());
    out.len(forest.bits.len());
    let mut packed = vec![0u8; forest.bits.len().div_ceil(8)];
    for (i, bit) in forest.bits.iter().enumerate() {
        if *bit {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    out.bytes(&packed);

    let mut prev = 0i64;
    for node in &forest.order {
        let id = i64::from(node.0);
        out.svarint(id - prev);
        prev = id;
    }

    debug_assert_eq!(forest.parent_edges.len(), forest.order.len() - forest.roots);
    for edge in &forest.parent_edges {
        out.uvarint(u64::from(edge.id.0));
    }
    for edge in &forest.parent_edges {
        out.uvarint(u64::from(edge.attr.0));
    }
    for edge in &forest.parent_edges {
        out.u8(edge.weight.raw());
    }
    for edge in &forest.parent_edges {
        out.uvarint(u64::from(edge.time));
    }
    for edge in &forest.parent_edges {
        out.u16(edge.flags);
    }
    for edge in &forest.parent_edges {
        out.u8(edge.confidence.raw());
    }
}

/// Decode a forest of `e_type` edges into `graph.edges` slots.
pub(crate) fn read_forest(
    input: &mut Reader<'_>,
    e_type: EdgeType,
    graph: &Graph,
    slots: &mut [Option<Edge>],
) -> Result<(), PabloError> {
    let num_nodes = graph.nodes.len();
    let n = input.count(num_nodes, "forest node")?;
    let bits_at = input.offset();
    let bit_len = 2 * n + 1;
    let declared = input.uvarint()?;
    if declared != bit_len as u64 {
        return Err(PabloError::format(
            bits_at,
            format!("forest of {} nodes needs {} bits, got {}", n, bit_len, declared),
        ));
    }
    let packed_at = input.offset();
    let packed = input.take(bit_len.div_ceil(8))?;
    let bit = |i: usize| packed[i / 8] & (1 << (i % 8)) != 0;

    // parent BFS index (0 = super-root) of BFS nodes 1..=n
    let mut parents: Vec<usize> = Vec::with_capacity(n);
    let mut cursor = 0usize;
    for node in 0..=n {
        if node > parents.len() {
            return Err(PabloError::format(packed_at, "forest bit sequence is disconnected"));
        }
        loop {
            if cursor >= bit_len {
                return Err(PabloError::format(packed_at, "forest bit sequence ends early"));
            }
            let one = bit(cursor);
            cursor += 1;
            if !one {
                break;
            }
            if parents.len() == n {
                return Err(PabloError::format(packed_at, "forest has more children than nodes"));
            }
            parents.push(node);
        }
    }
    if parents.len() != n {
        return Err(PabloError::format(packed_at, "forest has fewer children than nodes"));
    }
    let roots = parents.iter().take_while(|&&p| p == 0).count();

    let mut order = Vec::with_capacity(n);
    let mut seen = BTreeSet::new();
    let mut prev = 0i64;
    for _ in 0..n {
        let at = input.offset();
        let id = prev.saturating_add(input.svarint()?);
        if id < 0 || id >= num_nodes as i64 || !seen.insert(id) {
            return Err(PabloError::format(at, format!("bad forest node id {}", id)));
        }
        order.push(NodeId(id as u32));
        prev = id;
    }

    let m = n - roots;
    let ids_at = input.offset();
    let mut ids = Vec::with_capacity(m);
    for _ in 0..m {
        ids.push(input.u32_varint()?);
    }
    let mut attrs = Vec::with_capacity(m);
    for _ in 0..m {
        attrs.push(input.u32_varint()?);
    }
    let mut weights = Vec::with_capacity(m);
    for _ in 0..m {
        weights.push(input.u8()?);
    }
    let mut times = Vec::with_capacity(m);
    for _ in 0..m {
        times.push(input.u32_varint()?);
    }
    let mut flags = Vec::with_capacity(m);
    for _ in 0..m {
        flags.push(input.u16()?);
    }
    let mut confidences = Vec::with_capacity(m);
    for _ in 0..m {
        confidences.push(input.u8()?);
    }

    for i in 0..m {
        let child = roots + i;
        let parent = parents[child] - 1;
        let id = ids[i];
        let slot = slots.get_mut(id as usize).ok_or_else(|| {
            PabloError::format(ids_at, format!("forest edge id {} out of range", id))
        })?;
        if slot.is_some() {
            return Err(PabloError::format(ids_at, format!("edge id {} appears twice", id)));
        }
        *slot = Some(Edge {
            id: EdgeId(id),
            src: order[parent],
            dst: order[child],
            e_type,
            weight: Weight(weights[i]),
            time: times[i],
            flags: flags[i],
            confidence: Confidence(confidences[i]),
            attr: LabelId(attrs[i]),
        });
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
