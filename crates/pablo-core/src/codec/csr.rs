//! Compressed-sparse-row encoding for edges that do not form a forest.
//!
//! Edges are grouped by source row and sorted by `(dst, id)` within a row.
//! The row table stores per-row counts, destinations are zigzag deltas within
//! the row, and every other field is a parallel column in the same order.

use super::varint::{Reader, Writer};
use crate::confidence::{Confidence, Weight};
use crate::graph::{Edge, Graph};
use crate::primitives::MAX_EDGES;
use crate::types::{EdgeId, EdgeType, LabelId, NodeId, PabloError};

pub(crate) fn write_csr(edges: &[&Edge], out: &mut Writer) {
    let mut sorted: Vec<&Edge> = edges.to_vec();
    sorted.sort_by_key(|e| (e.src, e.dst, e.id));

    out.len(sorted.len());
    let rows = sorted.last().map_or(0, |e| e.src.0 as usize + 1);
    out.len(rows);

    let mut counts = vec![0usize; rows];
    for edge in &sorted {
        counts[edge.src.0 as usize] += 1;
    }
    for count in &counts {
        out.len(*count);
    }

    let mut row = u32::MAX;
    let mut prev = 0i64;
    for edge in &sorted {
        if edge.src.0 != row {
            row = edge.src.0;
            prev = 0;
        }
        let dst = i64::from(edge.dst.0);
        out.svarint(dst - prev);
        prev = dst;
    }

    for edge in &sorted {
        out.uvarint(u64::from(edge.id.0));
    }
    for edge in &sorted {
        out.u8(edge.e_type.code());
    }
    for edge in &sorted {
        out.uvarint(u64::from(edge.attr.0));
    }
    for edge in &sorted {
        out.u16(edge.flags);
    }
    for edge in &sorted {
        out.u8(edge.weight.raw());
    }
    for edge in &sorted {
        out.uvarint(u64::from(edge.time));
    }
    for edge in &sorted {
        out.u8(edge.confidence.raw());
    }
}

pub(crate) fn read_csr(
    input: &mut Reader<'_>,
    graph: &Graph,
    slots: &mut [Option<Edge>],
) -> Result<(), PabloError> {
    let num_nodes = graph.nodes.len();
    let m = input.count(MAX_EDGES as usize, "csr edge")?;
    let rows = input.count(num_nodes, "csr row")?;

    let mut sources = Vec::with_capacity(m);
    let counts_at = input.offset();
    for row in 0..rows {
        let count = input.count(m, "csr row entry")?;
        sources.extend(std::iter::repeat_n(NodeId(row as u32), count));
        if sources.len() > m {
            return Err(PabloError::format(counts_at, "csr row counts exceed edge count"));
        }
    }
    if sources.len() != m {
        return Err(PabloError::format(
            counts_at,
            format!("csr row counts sum to {}, expected {}", sources.len(), m),
        ));
    }

    let mut dsts = Vec::with_capacity(m);
    let mut row = None;
    let mut prev = 0i64;
    for src in &sources {
        if row != Some(*src) {
            row = Some(*src);
            prev = 0;
        }
        let at = input.offset();
        let dst = prev.saturating_add(input.svarint()?);
        if dst < 0 || dst >= num_nodes as i64 {
            return Err(PabloError::format(at, format!("csr destination {} out of range", dst)));
        }
        dsts.push(NodeId(dst as u32));
        prev = dst;
    }

    let ids_at = input.offset();
    let mut ids = Vec::with_capacity(m);
    for _ in 0..m {
        ids.push(input.u32_varint()?);
    }
    let mut types = Vec::with_capacity(m);
    for _ in 0..m {
        let at = input.offset();
        let code = input.u8()?;
        let e_type = EdgeType::from_code(code)
            .ok_or_else(|| PabloError::format(at, format!("unknown edge type code {}", code)))?;
        types.push(e_type);
    }
    let mut attrs = Vec::with_capacity(m);
    for _ in 0..m {
        attrs.push(input.u32_varint()?);
    }
    let mut flags = Vec::with_capacity(m);
    for _ in 0..m {
        flags.push(input.u16()?);
    }
    let mut weights = Vec::with_capacity(m);
    for _ in 0..m {
        weights.push(input.u8()?);
    }
    let mut times = Vec::with_capacity(m);
    for _ in 0..m {
        times.push(input.u32_varint()?);
    }
    let mut confidences = Vec::with_capacity(m);
    for _ in 0..m {
        confidences.push(input.u8()?);
    }

    for i in 0..m {
        let id = ids[i];
        let slot = slots.get_mut(id as usize).ok_or_else(|| {
            PabloError::format(ids_at, format!("csr edge id {} out of range", id))
        })?;
        if slot.is_some() {
            return Err(PabloError::format(ids_at, format!("edge id {} appears twice", id)));
        }
        *slot = Some(Edge {
            id: EdgeId(id),
            src: sources[i],
            dst: dsts[i],
            e_type: types[i],
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
