//! One graph record: header, node table, relation sections, tagged adjuncts.
//!
//! Relation sections come in two shapes. Each edge type whose edges form a
//! forest gets its own LOUDS section; every remaining edge is pooled into a
//! single CSR section. Adjuncts (features, thumbnail, foreign links, the
//! justification trail) follow in increasing tag order and end with `END`.

use super::csr::{read_csr, write_csr};
use super::tree::{as_forest, read_forest, write_forest};
use super::varint::{Reader, Writer};
use crate::confidence::Confidence;
use crate::graph::{Edge, ForeignLink, Graph, Node};
use crate::primitives::{
    MAX_EDGES, MAX_FEATURE_LEN, MAX_NODES, MAX_PATTERN_VARS, MAX_TRAIL_LEN, THUMBNAIL_DIMS,
};
use crate::provenance::{ApplyOutcome, Justification, RejectReason, RuleScores};
use crate::types::{
    EdgeId, EdgeType, ElementRef, GraphId, GraphType, LabelId, NodeId, NodeType, PabloError, Phase,
    RuleId, SchemaId, SourceId, Span,
};

const SECTION_TREE: u8 = 1;
const SECTION_CSR: u8 = 2;

const ADJUNCT_END: u8 = 0;
const ADJUNCT_FEATURES: u8 = 1;
const ADJUNCT_THUMBNAIL: u8 = 2;
const ADJUNCT_LINKS: u8 = 3;
const ADJUNCT_TRAIL: u8 = 4;

const ELEMENT_NODE: u8 = 0;
const ELEMENT_EDGE: u8 = 1;

const OUTCOME_APPLIED: u8 = 0;
const OUTCOME_SLACK: u8 = 1;
const OUTCOME_REJECTED: u8 = 2;
const OUTCOME_OVERRIDDEN: u8 = 3;

const REJECT_SLACK_EXHAUSTED: u8 = 0;

// =============================================================================
// ENCODE
// =============================================================================

pub(crate) fn write_record(graph: &Graph, out: &mut Writer) {
    out.uvarint(graph.graph_id.0);
    out.u8(graph.graph_type.code());
    out.len(graph.nodes.len());
    out.len(graph.edges.len());
    out.uvarint(graph.source_id.0);
    out.uvarint(u64::from(graph.version));
    out.u8(graph.schema_id.code());
    out.u16(graph.status);
    out.uvarint(u64::from(graph.slack_spent));
    out.uvarint(graph.source_len.map_or(0, |len| u64::from(len) + 1));

    for node in &graph.nodes {
        write_node(node, out);
    }
    write_relations(&graph.edges, out);
    write_adjuncts(graph, out);
}

fn write_node(node: &Node, out: &mut Writer) {
    out.uvarint(u64::from(node.id.0));
    out.u8(node.n_type.code());
    out.u8(node.sub_type);
    out.uvarint(u64::from(node.features_ref));
    out.uvarint(u64::from(node.span.start));
    out.uvarint(u64::from(node.span.end));
    out.u16(node.flags);
    out.u8(node.confidence.raw());
    out.uvarint(u64::from(node.label.0));
}

fn write_relations(edges: &[Edge], out: &mut Writer) {
    let mut forests = Vec::new();
    let mut pooled: Vec<&Edge> = Vec::new();
    for &e_type in EdgeType::ALL {
        let of_type: Vec<&Edge> = edges.iter().filter(|e| e.e_type == e_type).collect();
        if of_type.is_empty() {
            continue;
        }
        match as_forest(&of_type) {
            Some(forest) => forests.push((e_type, forest)),
            None => pooled.extend(of_type),
        }
    }

    out.len(forests.len() + usize::from(!pooled.is_empty()));
    for (e_type, forest) in &forests {
        out.u8(SECTION_TREE);
        out.u8(e_type.code());
        write_forest(forest, out);
    }
    if !pooled.is_empty() {
        out.u8(SECTION_CSR);
        write_csr(&pooled, out);
    }
}

fn write_adjuncts(graph: &Graph, out: &mut Writer) {
    if !graph.features.is_empty() {
        out.u8(ADJUNCT_FEATURES);
        out.len(graph.features.len());
        for row in &graph.features {
            out.len(row.len());
            for value in row {
                out.svarint(i64::from(*value));
            }
        }
    }
    if let Some(values) = &graph.g_features {
        out.u8(ADJUNCT_THUMBNAIL);
        out.len(values.len());
        for value in values {
            out.svarint(i64::from(*value));
        }
    }
    if !graph.links.is_empty() {
        out.u8(ADJUNCT_LINKS);
        out.len(graph.links.len());
        for link in &graph.links {
            out.uvarint(u64::from(link.node.0));
            out.uvarint(link.source_id.0);
            out.uvarint(u64::from(link.foreign_node.0));
        }
    }
    if !graph.trail.is_empty() {
        out.u8(ADJUNCT_TRAIL);
        out.len(graph.trail.len());
        for justification in &graph.trail {
            write_justification(justification, out);
        }
    }
    out.u8(ADJUNCT_END);
}

fn write_justification(j: &Justification, out: &mut Writer) {
    out.uvarint(u64::from(j.rule_id.0));
    out.uvarint(u64::from(j.rule_version));
    out.u8(j.phase.code());
    out.uvarint(u64::from(j.pass));
    match j.outcome {
        ApplyOutcome::Applied => out.u8(OUTCOME_APPLIED),
        ApplyOutcome::AppliedWithSlack { penalty } => {
            out.u8(OUTCOME_SLACK);
            out.uvarint(u64::from(penalty));
        }
        ApplyOutcome::Rejected { reason } => {
            out.u8(OUTCOME_REJECTED);
            out.u8(match reason {
                RejectReason::SlackExhausted => REJECT_SLACK_EXHAUSTED,
            });
        }
        ApplyOutcome::Overridden { by } => {
            out.u8(OUTCOME_OVERRIDDEN);
            out.uvarint(u64::from(by.0));
        }
    }
    out.uvarint(u64::from(j.scores.support));
    out.uvarint(u64::from(j.scores.precision));
    out.uvarint(u64::from(j.scores.coverage));
    out.uvarint(u64::from(j.scores.mdl));
    for list in [&j.bindings, &j.targets] {
        out.len(list.len());
        for element in list {
            match element {
                ElementRef::Node(id) => {
                    out.u8(ELEMENT_NODE);
                    out.uvarint(u64::from(id.0));
                }
                ElementRef::Edge(id) => {
                    out.u8(ELEMENT_EDGE);
                    out.uvarint(u64::from(id.0));
                }
            }
        }
    }
}

// =============================================================================
// DECODE
// =============================================================================

/// Decode one record occupying all of `bytes`; `base` is its block offset.
pub(crate) fn read_record(bytes: &[u8], base: u64) -> Result<Graph, PabloError> {
    let mut input = Reader::new(bytes, base);

    let graph_id = GraphId(input.uvarint()?);
    let at = input.offset();
    let graph_type = GraphType::from_code(input.u8()?)
        .ok_or_else(|| PabloError::format(at, "unknown graph type"))?;
    let num_nodes = input.count(MAX_NODES as usize, "node")?;
    let num_edges = input.count(MAX_EDGES as usize, "edge")?;
    let source_id = SourceId(input.uvarint()?);
    let version = input.u32_varint()?;
    let at = input.offset();
    let schema_id = SchemaId::from_code(input.u8()?)
        .ok_or_else(|| PabloError::format(at, "unknown schema id"))?;

    let mut graph = Graph::empty(source_id, schema_id);
    graph.graph_id = graph_id;
    graph.graph_type = graph_type;
    graph.version = version;
    graph.status = input.u16()?;
    graph.slack_spent = input.u32_varint()?;
    graph.source_len = input.u32_varint()?.checked_sub(1);

    graph.nodes.reserve(num_nodes);
    for index in 0..num_nodes {
        let node = read_node(&mut input, index)?;
        graph.nodes.push(node);
    }

    let mut slots: Vec<Option<Edge>> = vec![None; num_edges];
    read_relations(&mut input, &graph, &mut slots)?;
    let edges_end = input.offset();
    graph.edges = slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.ok_or_else(|| {
                PabloError::format(edges_end, format!("edge {} missing from relation sections", i))
            })
        })
        .collect::<Result<_, _>>()?;

    read_adjuncts(&mut input, &mut graph)?;
    if !input.is_at_end() {
        return Err(input.fail("trailing bytes after record"));
    }

    graph.reindex_provenance();
    graph
        .validate(None)
        .map_err(|e| PabloError::format(base, e.to_string()))?;
    Ok(graph)
}

fn read_node(input: &mut Reader<'_>, index: usize) -> Result<Node, PabloError> {
    let at = input.offset();
    let id = input.u32_varint()?;
    if id as usize != index {
        return Err(PabloError::format(
            at,
            format!("node id {} at index {}", id, index),
        ));
    }
    let at = input.offset();
    let code = input.u8()?;
    let n_type = NodeType::from_code(code)
        .ok_or_else(|| PabloError::format(at, format!("unknown node type code {}", code)))?;
    Ok(Node {
        id: NodeId(id),
        n_type,
        sub_type: input.u8()?,
        features_ref: input.u32_varint()?,
        span: Span::new(input.u32_varint()?, input.u32_varint()?),
        flags: input.u16()?,
        confidence: Confidence(input.u8()?),
        label: LabelId(input.u32_varint()?),
    })
}

fn read_relations(
    input: &mut Reader<'_>,
    graph: &Graph,
    slots: &mut [Option<Edge>],
) -> Result<(), PabloError> {
    let sections = input.count(EdgeType::ALL.len() + 1, "relation section")?;
    let mut seen_csr = false;
    for _ in 0..sections {
        let at = input.offset();
        match input.u8()? {
            SECTION_TREE => {
                let at = input.offset();
                let code = input.u8()?;
                let e_type = EdgeType::from_code(code).ok_or_else(|| {
                    PabloError::format(at, format!("unknown edge type code {}", code))
                })?;
                read_forest(input, e_type, graph, slots)?;
            }
            SECTION_CSR if !seen_csr => {
                seen_csr = true;
                read_csr(input, graph, slots)?;
            }
            tag => {
                return Err(PabloError::format(
                    at,
                    format!("unexpected relation section tag {}", tag),
                ));
            }
        }
    }
    Ok(())
}

fn read_adjuncts(input: &mut Reader<'_>, graph: &mut Graph) -> Result<(), PabloError> {
    let mut last = 0u8;
    loop {
        let at = input.offset();
        let tag = input.u8()?;
        if tag == ADJUNCT_END {
            return Ok(());
        }
        if tag <= last {
            return Err(PabloError::format(
                at,
                format!("adjunct tag {} out of order", tag),
            ));
        }
        last = tag;
        match tag {
            ADJUNCT_FEATURES => {
                let rows = input.count(MAX_NODES as usize, "feature row")?;
                for _ in 0..rows {
                    let len = input.count(MAX_FEATURE_LEN as usize, "feature")?;
                    let mut row = Vec::with_capacity(len);
                    for _ in 0..len {
                        let at = input.offset();
                        let value = input.svarint()?;
                        row.push(i32::try_from(value).map_err(|_| {
                            PabloError::format(at, format!("feature {} exceeds i32", value))
                        })?);
                    }
                    graph.features.push(row);
                }
            }
            ADJUNCT_THUMBNAIL => {
                let at = input.offset();
                let len = input.count(usize::MAX, "thumbnail")?;
                if !THUMBNAIL_DIMS.contains(&len) {
                    return Err(PabloError::format(at, format!("thumbnail of {} elements", len)));
                }
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    let at = input.offset();
                    let value = input.svarint()?;
                    values.push(i8::try_from(value).map_err(|_| {
                        PabloError::format(at, format!("thumbnail value {} exceeds i8", value))
                    })?);
                }
                graph.g_features = Some(values);
            }
            ADJUNCT_LINKS => {
                let count = input.count(MAX_NODES as usize, "foreign link")?;
                for _ in 0..count {
                    let node = NodeId(input.u32_varint()?);
                    let source_id = SourceId(input.uvarint()?);
                    let foreign_node = NodeId(input.u32_varint()?);
                    graph.links.push(ForeignLink {
                        node,
                        source_id,
                        foreign_node,
                    });
                }
            }
            ADJUNCT_TRAIL => {
                let count = input.count(MAX_TRAIL_LEN as usize, "justification")?;
                for _ in 0..count {
                    let justification = read_justification(input, graph)?;
                    graph.trail.push(justification);
                }
            }
            _ => {
                return Err(PabloError::format(at, format!("unknown adjunct tag {}", tag)));
            }
        }
    }
}

fn read_justification(input: &mut Reader<'_>, graph: &Graph) -> Result<Justification, PabloError> {
    let rule_id = RuleId(input.u32_varint()?);
    let rule_version = input.u32_varint()?;
    let at = input.offset();
    let phase = Phase::from_code(input.u8()?)
        .ok_or_else(|| PabloError::format(at, "unknown phase code"))?;
    let pass = input.u32_varint()?;

    let at = input.offset();
    let outcome = match input.u8()? {
        OUTCOME_APPLIED => ApplyOutcome::Applied,
        OUTCOME_SLACK => ApplyOutcome::AppliedWithSlack {
            penalty: read_u16_varint(input)?,
        },
        OUTCOME_REJECTED => {
            let at = input.offset();
            match input.u8()? {
                REJECT_SLACK_EXHAUSTED => ApplyOutcome::Rejected {
                    reason: RejectReason::SlackExhausted,
                },
                other => {
                    return Err(PabloError::format(at, format!("unknown reject reason {}", other)));
                }
            }
        }
        OUTCOME_OVERRIDDEN => ApplyOutcome::Overridden {
            by: RuleId(input.u32_varint()?),
        },
        other => return Err(PabloError::format(at, format!("unknown outcome tag {}", other))),
    };

    let scores = RuleScores {
        support: input.u32_varint()?,
        precision: read_u16_varint(input)?,
        coverage: read_u16_varint(input)?,
        mdl: input.u32_varint()?,
    };
    let bindings = read_elements(input, graph, MAX_PATTERN_VARS)?;
    let targets = read_elements(input, graph, usize::MAX)?;

    Ok(Justification {
        rule_id,
        rule_version,
        phase,
        pass,
        outcome,
        scores,
        bindings,
        targets,
    })
}

fn read_u16_varint(input: &mut Reader<'_>) -> Result<u16, PabloError> {
    let at = input.offset();
    let value = input.uvarint()?;
    u16::try_from(value).map_err(|_| PabloError::format(at, format!("value {} exceeds u16", value)))
}

fn read_elements(
    input: &mut Reader<'_>,
    graph: &Graph,
    limit: usize,
) -> Result<Vec<ElementRef>, PabloError> {
    let count = input.count(limit, "element")?;
    let mut elements = Vec::with_capacity(count);
    for _ in 0..count {
        let at = input.offset();
        let tag = input.u8()?;
        let id = input.u32_varint()?;
        let element = match tag {
            ELEMENT_NODE if (id as usize) < graph.nodes.len() => ElementRef::Node(NodeId(id)),
            ELEMENT_EDGE if (id as usize) < graph.edges.len() => ElementRef::Edge(EdgeId(id)),
            _ => {
                return Err(PabloError::format(
                    at,
                    format!("element tag {} id {} does not resolve", tag, id),
                ));
            }
        };
        elements.push(element);
    }
    Ok(elements)
}
