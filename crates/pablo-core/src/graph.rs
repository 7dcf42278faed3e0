//! # Graph Model
//!
//! The arena representation of one analyzed text unit.
//!
//! Nodes and edges live in dense, index-addressed vectors owned by the graph.
//! Every reference between elements is an integer handle (`NodeId`, `EdgeId`),
//! never a live pointer, so the codec can write the arena byte for byte and the
//! rule engine can mutate it without aliasing.
//!
//! Elements are never physically removed: removal sets the `RETRACTED` flag,
//! which keeps ids dense and stable for the graph's whole lifetime.
//!
//! Public mutation goes through `GraphBuilder` before `finalize`; after that,
//! only the rule engine (crate-internal) mutates a graph.

use crate::confidence::{Confidence, Weight};
use crate::primitives::{MAX_EDGES, MAX_FEATURE_LEN, MAX_NODES, THUMBNAIL_DIMS};
use crate::provenance::Justification;
use crate::types::{
    DiscourseRelation, EdgeId, EdgeType, ElementRef, GraphId, GraphType, LabelId, NodeId,
    NodeType, PabloError, Phase, Pos, RuleId, SchemaId, SourceId, Span, edge_flags, graph_status,
    node_flags,
};
use crate::vocab::VocabStore;
use serde::Serialize;
use std::collections::BTreeMap;

// =============================================================================
// ELEMENTS
// =============================================================================

/// A typed node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub n_type: NodeType,
    /// POS code for tokens, relation code for discourse relations, free otherwise.
    pub sub_type: u8,
    /// 1-based index into the graph's feature table; 0 means none.
    pub features_ref: u32,
    pub span: Span,
    pub flags: u16,
    pub confidence: Confidence,
    pub label: LabelId,
}

impl Node {
    #[must_use]
    pub const fn has_flags(&self, flags: u16) -> bool {
        self.flags & flags == flags
    }

    #[must_use]
    pub const fn is_retracted(&self) -> bool {
        self.flags & node_flags::RETRACTED != 0
    }
}

/// A typed, directed edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub id: EdgeId,
    pub src: NodeId,
    pub dst: NodeId,
    pub e_type: EdgeType,
    pub weight: Weight,
    /// Ordering or version stamp; 0 when unset.
    pub time: u32,
    pub flags: u16,
    pub confidence: Confidence,
    /// Vocabulary id of the edge attribute (e.g. dependency label); 0 means none.
    pub attr: LabelId,
}

impl Edge {
    #[must_use]
    pub const fn has_flags(&self, flags: u16) -> bool {
        self.flags & flags == flags
    }

    #[must_use]
    pub const fn is_retracted(&self) -> bool {
        self.flags & edge_flags::RETRACTED != 0
    }
}

/// A `SAME_AS` link to a node of another graph, stored by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ForeignLink {
    pub node: NodeId,
    pub source_id: SourceId,
    pub foreign_node: NodeId,
}

// =============================================================================
// GRAPH
// =============================================================================

/// One analyzed text unit.
///
/// Uses `BTreeMap` exclusively for deterministic ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Graph {
    pub(crate) graph_id: GraphId,
    pub(crate) graph_type: GraphType,
    pub(crate) source_id: SourceId,
    pub(crate) version: u32,
    pub(crate) schema_id: SchemaId,
    /// Length of the source text when known; bounds every span.
    pub(crate) source_len: Option<u32>,
    pub(crate) status: u16,
    pub(crate) slack_spent: u32,
    pub(crate) nodes: Vec<Node>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) features: Vec<Vec<i32>>,
    pub(crate) g_features: Option<Vec<i8>>,
    pub(crate) links: Vec<ForeignLink>,
    pub(crate) trail: Vec<Justification>,
    /// Element -> indices into `trail`, in firing order. Rebuilt from `trail`.
    #[serde(skip)]
    pub(crate) provenance: BTreeMap<ElementRef, Vec<u32>>,
}

impl Graph {
    pub(crate) fn empty(source_id: SourceId, schema_id: SchemaId) -> Self {
        Self {
            graph_id: GraphId::default(),
            graph_type: GraphType::Hetero,
            source_id,
            version: 1,
            schema_id,
            source_len: None,
            status: 0,
            slack_spent: 0,
            nodes: Vec::new(),
            edges: Vec::new(),
            features: Vec::new(),
            g_features: None,
            links: Vec::new(),
            trail: Vec::new(),
            provenance: BTreeMap::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Header accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn graph_id(&self) -> GraphId {
        self.graph_id
    }

    #[must_use]
    pub fn graph_type(&self) -> GraphType {
        self.graph_type
    }

    #[must_use]
    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn schema_id(&self) -> SchemaId {
        self.schema_id
    }

    #[must_use]
    pub fn source_len(&self) -> Option<u32> {
        self.source_len
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn slack_spent(&self) -> u32 {
        self.slack_spent
    }

    #[must_use]
    pub fn num_nodes(&self) -> u32 {
        self.nodes.len() as u32
    }

    #[must_use]
    pub fn num_edges(&self) -> u32 {
        self.edges.len() as u32
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.status & graph_status::FINALIZED != 0
    }

    /// A phase ran out of time; the graph is a flagged partial result.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.status & graph_status::INCOMPLETE != 0
    }

    #[must_use]
    pub fn phase_truncated(&self, phase: Phase) -> bool {
        self.status & phase.truncated_flag() != 0
    }

    // -------------------------------------------------------------------------
    // Element access
    // -------------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Result<&Node, PabloError> {
        self.nodes
            .get(id.0 as usize)
            .ok_or(PabloError::NodeNotFound(id))
    }

    pub fn edge(&self, id: EdgeId) -> Result<&Edge, PabloError> {
        self.edges
            .get(id.0 as usize)
            .ok_or(PabloError::EdgeNotFound(id))
    }

    /// All nodes, retracted ones included, in id order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All edges, retracted ones included, in id order.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn live_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| !n.is_retracted())
    }

    pub fn live_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|e| !e.is_retracted())
    }

    /// Live edges leaving `node`.
    pub fn outgoing(&self, node: NodeId) -> impl Iterator<Item = &Edge> {
        self.live_edges().filter(move |e| e.src == node)
    }

    /// Live edges entering `node`.
    pub fn incoming(&self, node: NodeId) -> impl Iterator<Item = &Edge> {
        self.live_edges().filter(move |e| e.dst == node)
    }

    /// First live edge `src -> dst` of the given type.
    #[must_use]
    pub fn find_edge(&self, src: NodeId, dst: NodeId, e_type: EdgeType) -> Option<&Edge> {
        self.outgoing(src)
            .find(|e| e.dst == dst && e.e_type == e_type)
    }

    /// Feature vector behind a node's `features_ref`.
    #[must_use]
    pub fn features(&self, features_ref: u32) -> Option<&[i32]> {
        features_ref
            .checked_sub(1)
            .and_then(|i| self.features.get(i as usize))
            .map(Vec::as_slice)
    }

    #[must_use]
    pub fn feature_table(&self) -> &[Vec<i32>] {
        &self.features
    }

    /// The graph-level quantized feature vector (thumbnail), once scored.
    #[must_use]
    pub fn g_features(&self) -> Option<&[i8]> {
        self.g_features.as_deref()
    }

    /// Attach the graph-level feature vector. Only 64 or 128 elements are accepted.
    pub fn set_g_features(&mut self, values: Vec<i8>) -> Result<(), PabloError> {
        if !THUMBNAIL_DIMS.contains(&values.len()) {
            return Err(PabloError::SchemaViolation(format!(
                "g_features must have 64 or 128 elements, got {}",
                values.len()
            )));
        }
        self.g_features = Some(values);
        Ok(())
    }

    #[must_use]
    pub fn links(&self) -> &[ForeignLink] {
        &self.links
    }

    // -------------------------------------------------------------------------
    // Provenance
    // -------------------------------------------------------------------------

    /// The full justification trail, in firing order.
    #[must_use]
    pub fn trail(&self) -> &[Justification] {
        &self.trail
    }

    /// Justifications that created or touched `element`, in firing order.
    pub fn justifications_for(&self, element: ElementRef) -> impl Iterator<Item = &Justification> {
        self.provenance
            .get(&element)
            .into_iter()
            .flatten()
            .filter_map(|&i| self.trail.get(i as usize))
    }

    /// The rule whose firing last took effect on `element`.
    #[must_use]
    pub fn derived_by(&self, element: ElementRef) -> Option<RuleId> {
        self.justifications_for(element)
            .filter(|j| j.outcome.took_effect())
            .last()
            .map(|j| j.rule_id)
    }

    // -------------------------------------------------------------------------
    // Crate-internal mutation (builder, engine, codec)
    // -------------------------------------------------------------------------

    pub(crate) fn push_node(
        &mut self,
        n_type: NodeType,
        sub_type: u8,
        span: Span,
        features: Option<Vec<i32>>,
    ) -> Result<NodeId, PabloError> {
        if self.nodes.len() >= MAX_NODES as usize {
            return Err(PabloError::SchemaViolation(format!(
                "graph exceeds {} nodes",
                MAX_NODES
            )));
        }
        let features_ref = match features {
            Some(values) => self.push_features(values)?,
            None => 0,
        };
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            n_type,
            sub_type,
            features_ref,
            span,
            flags: 0,
            confidence: Confidence::default(),
            label: LabelId::NONE,
        });
        Ok(id)
    }

    pub(crate) fn push_edge(
        &mut self,
        src: NodeId,
        dst: NodeId,
        e_type: EdgeType,
        weight: Weight,
    ) -> Result<EdgeId, PabloError> {
        for endpoint in [src, dst] {
            if endpoint.0 as usize >= self.nodes.len() {
                return Err(PabloError::SchemaViolation(format!(
                    "edge endpoint {} does not exist",
                    endpoint
                )));
            }
        }
        if self.edges.len() >= MAX_EDGES as usize {
            return Err(PabloError::SchemaViolation(format!(
                "graph exceeds {} edges",
                MAX_EDGES
            )));
        }
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge {
            id,
            src,
            dst,
            e_type,
            weight,
            time: 0,
            flags: edge_flags::DIRECTED,
            confidence: Confidence::default(),
            attr: LabelId::NONE,
        });
        Ok(id)
    }

    pub(crate) fn push_features(&mut self, values: Vec<i32>) -> Result<u32, PabloError> {
        if values.len() > MAX_FEATURE_LEN as usize {
            return Err(PabloError::SchemaViolation(format!(
                "feature vector of {} exceeds {}",
                values.len(),
                MAX_FEATURE_LEN
            )));
        }
        self.features.push(values);
        Ok(self.features.len() as u32)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, PabloError> {
        self.nodes
            .get_mut(id.0 as usize)
            .ok_or(PabloError::NodeNotFound(id))
    }

    pub(crate) fn edge_mut(&mut self, id: EdgeId) -> Result<&mut Edge, PabloError> {
        self.edges
            .get_mut(id.0 as usize)
            .ok_or(PabloError::EdgeNotFound(id))
    }

    /// Tombstone a node and every live edge touching it. Returns the retracted edges.
    pub(crate) fn retract_node(&mut self, id: NodeId) -> Result<Vec<EdgeId>, PabloError> {
        self.node_mut(id)?.flags |= node_flags::RETRACTED;
        let mut retracted = Vec::new();
        for edge in &mut self.edges {
            if (edge.src == id || edge.dst == id) && !edge.is_retracted() {
                edge.flags |= edge_flags::RETRACTED;
                retracted.push(edge.id);
            }
        }
        Ok(retracted)
    }

    pub(crate) fn push_link(&mut self, link: ForeignLink) -> Result<(), PabloError> {
        self.node(link.node)?;
        self.links.push(link);
        Ok(())
    }

    pub(crate) fn set_status(&mut self, bits: u16) {
        self.status |= bits;
    }

    pub(crate) fn spend_slack(&mut self, penalty: u32) {
        self.slack_spent = self.slack_spent.saturating_add(penalty);
    }

    /// Append a justification and index it under its targets.
    pub(crate) fn record(&mut self, justification: Justification) {
        let index = self.trail.len() as u32;
        for target in &justification.targets {
            let entries = self.provenance.entry(*target).or_default();
            if entries.last() != Some(&index) {
                entries.push(index);
            }
        }
        self.trail.push(justification);
    }

    /// Rebuild the provenance index from the trail.
    pub(crate) fn reindex_provenance(&mut self) {
        self.provenance.clear();
        let trail = std::mem::take(&mut self.trail);
        for justification in trail {
            self.record(justification);
        }
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    /// Check the structural invariants: dense ids, existing endpoints, well-formed
    /// spans within the source, known sub-types, resolvable feature references.
    ///
    /// With a vocabulary, every non-zero label and attribute must also resolve.
    pub fn validate(&self, vocab: Option<&VocabStore>) -> Result<(), PabloError> {
        let node_count = self.nodes.len();

        for (index, node) in self.nodes.iter().enumerate() {
            if node.id.0 as usize != index {
                return Err(PabloError::SchemaViolation(format!(
                    "node at index {} carries id {}",
                    index, node.id
                )));
            }
            if !node.span.is_well_formed() {
                return Err(PabloError::SchemaViolation(format!(
                    "node {} has span end {} before start {}",
                    node.id, node.span.end, node.span.start
                )));
            }
            if let Some(len) = self.source_len
                && node.span.end > len
            {
                return Err(PabloError::SchemaViolation(format!(
                    "node {} span ends at {} beyond source length {}",
                    node.id, node.span.end, len
                )));
            }
            match node.n_type {
                NodeType::Token if Pos::from_code(node.sub_type).is_none() => {
                    return Err(PabloError::SchemaViolation(format!(
                        "token {} has unknown POS code {}",
                        node.id, node.sub_type
                    )));
                }
                NodeType::DiscourseRel if DiscourseRelation::from_code(node.sub_type).is_none() => {
                    return Err(PabloError::SchemaViolation(format!(
                        "discourse relation {} has unknown relation code {}",
                        node.id, node.sub_type
                    )));
                }
                _ => {}
            }
            if node.features_ref as usize > self.features.len() {
                return Err(PabloError::SchemaViolation(format!(
                    "node {} references missing feature row {}",
                    node.id, node.features_ref
                )));
            }
            if let Some(vocab) = vocab
                && !node.label.is_none()
                && !vocab.contains(node.label)
            {
                return Err(PabloError::SchemaViolation(format!(
                    "node {} label {} does not resolve in the vocabulary",
                    node.id, node.label.0
                )));
            }
        }

        for (index, edge) in self.edges.iter().enumerate() {
            if edge.id.0 as usize != index {
                return Err(PabloError::SchemaViolation(format!(
                    "edge at index {} carries id {}",
                    index, edge.id
                )));
            }
            if edge.src.0 as usize >= node_count || edge.dst.0 as usize >= node_count {
                return Err(PabloError::SchemaViolation(format!(
                    "edge {} is dangling ({} -> {})",
                    edge.id, edge.src, edge.dst
                )));
            }
            if let Some(vocab) = vocab
                && !edge.attr.is_none()
                && !vocab.contains(edge.attr)
            {
                return Err(PabloError::SchemaViolation(format!(
                    "edge {} attribute {} does not resolve in the vocabulary",
                    edge.id, edge.attr.0
                )));
            }
        }

        for link in &self.links {
            if link.node.0 as usize >= node_count {
                return Err(PabloError::SchemaViolation(format!(
                    "foreign link from missing node {}",
                    link.node
                )));
            }
        }

        if let Some(values) = &self.g_features
            && !THUMBNAIL_DIMS.contains(&values.len())
        {
            return Err(PabloError::SchemaViolation(format!(
                "g_features has {} elements",
                values.len()
            )));
        }

        Ok(())
    }

    /// Estimated heap plus inline footprint of this graph, in bytes.
    ///
    /// Counts lengths, not capacities, so the figure is deterministic.
    #[must_use]
    pub fn approx_heap_bytes(&self) -> usize {
        use std::mem::size_of;

        let features: usize = self
            .features
            .iter()
            .map(|f| size_of::<Vec<i32>>() + f.len() * size_of::<i32>())
            .sum();
        let trail: usize = self
            .trail
            .iter()
            .map(|j| {
                size_of::<Justification>()
                    + (j.bindings.len() + j.targets.len()) * size_of::<ElementRef>()
            })
            .sum();
        let provenance: usize = self
            .provenance
            .values()
            .map(|v| size_of::<ElementRef>() + size_of::<Vec<u32>>() + v.len() * size_of::<u32>())
            .sum();

        size_of::<Self>()
            + self.nodes.len() * size_of::<Node>()
            + self.edges.len() * size_of::<Edge>()
            + features
            + self.g_features.as_ref().map_or(0, Vec::len)
            + self.links.len() * size_of::<ForeignLink>()
            + trail
            + provenance
    }
}

// =============================================================================
// TESTS
// =============================================================================
