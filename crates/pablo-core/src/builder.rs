//! # Graph Builder
//!
//! Constructs one graph per text unit.
//!
//! Ids come from the graph's own monotonic counters, so two builds from the
//! same calls produce identical ids. `finalize` is the only way out of the
//! builder and checks every structural invariant first.

use crate::confidence::{Confidence, Weight};
use crate::graph::{ForeignLink, Graph};
use crate::types::{
    EdgeId, EdgeType, GraphId, GraphType, LabelId, NodeId, NodeType, PabloError, SchemaId,
    SourceId, Span, graph_status,
};
use crate::vocab::VocabStore;

/// Handle to a graph under construction.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    /// Start a new graph. Node and edge counters start at zero.
    #[must_use]
    pub fn create_graph(source_id: SourceId, schema_id: SchemaId) -> Self {
        Self {
            graph: Graph::empty(source_id, schema_id),
        }
    }

    #[must_use]
    pub fn with_graph_id(mut self, graph_id: GraphId) -> Self {
        self.graph.graph_id = graph_id;
        self
    }

    #[must_use]
    pub fn with_graph_type(mut self, graph_type: GraphType) -> Self {
        self.graph.graph_type = graph_type;
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.graph.version = version;
        self
    }

    /// Bound every span by the source text length.
    #[must_use]
    pub fn with_source_len(mut self, len: u32) -> Self {
        self.graph.source_len = Some(len);
        self
    }

    /// Add a node. Optional features go to the graph's adjunct feature table.
    pub fn add_node(
        &mut self,
        n_type: NodeType,
        sub_type: u8,
        span: Span,
        features: Option<Vec<i32>>,
    ) -> Result<NodeId, PabloError> {
        self.graph.push_node(n_type, sub_type, span, features)
    }

    /// Add an edge. Fails with `SchemaViolation` if either endpoint is missing.
    pub fn add_edge(
        &mut self,
        src: NodeId,
        dst: NodeId,
        e_type: EdgeType,
        weight: Weight,
    ) -> Result<EdgeId, PabloError> {
        self.graph.push_edge(src, dst, e_type, weight)
    }

    /// Set or clear node flag bits.
    pub fn set_flag(&mut self, node: NodeId, flags: u16, on: bool) -> Result<(), PabloError> {
        let node = self.graph.node_mut(node)?;
        if on {
            node.flags |= flags;
        } else {
            node.flags &= !flags;
        }
        Ok(())
    }

    /// Set or clear edge flag bits.
    pub fn set_edge_flag(&mut self, edge: EdgeId, flags: u16, on: bool) -> Result<(), PabloError> {
        let edge = self.graph.edge_mut(edge)?;
        if on {
            edge.flags |= flags;
        } else {
            edge.flags &= !flags;
        }
        Ok(())
    }

    pub fn set_label(&mut self, node: NodeId, label: LabelId) -> Result<(), PabloError> {
        self.graph.node_mut(node)?.label = label;
        Ok(())
    }

    pub fn set_edge_attr(&mut self, edge: EdgeId, attr: LabelId) -> Result<(), PabloError> {
        self.graph.edge_mut(edge)?.attr = attr;
        Ok(())
    }

    pub fn set_confidence(&mut self, node: NodeId, confidence: Confidence) -> Result<(), PabloError> {
        self.graph.node_mut(node)?.confidence = confidence;
        Ok(())
    }

    pub fn set_edge_confidence(
        &mut self,
        edge: EdgeId,
        confidence: Confidence,
    ) -> Result<(), PabloError> {
        self.graph.edge_mut(edge)?.confidence = confidence;
        Ok(())
    }

    pub fn set_edge_time(&mut self, edge: EdgeId, time: u32) -> Result<(), PabloError> {
        self.graph.edge_mut(edge)?.time = time;
        Ok(())
    }

    /// Link `node` to a node of another graph by `(source_id, node_id)` value.
    pub fn link_foreign(
        &mut self,
        node: NodeId,
        source_id: SourceId,
        foreign_node: NodeId,
    ) -> Result<(), PabloError> {
        self.graph.push_link(ForeignLink {
            node,
            source_id,
            foreign_node,
        })
    }

    /// The graph as built so far.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Validate the structural invariants and seal the graph.
    pub fn finalize(self) -> Result<Graph, PabloError> {
        self.seal(None)
    }

    /// Like `finalize`, additionally requiring every label and attribute to
    /// resolve in `vocab`.
    pub fn finalize_with_vocab(self, vocab: &VocabStore) -> Result<Graph, PabloError> {
        self.seal(Some(vocab))
    }

    fn seal(mut self, vocab: Option<&VocabStore>) -> Result<Graph, PabloError> {
        self.graph.validate(vocab)?;
        self.graph.set_status(graph_status::FINALIZED);
        Ok(self.graph)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Pos, edge_flags, node_flags};

    fn build_pair() -> (GraphBuilder, NodeId, NodeId) {
        let mut builder = GraphBuilder::create_graph(SourceId(3), SchemaId::Writing)
            .with_graph_id(GraphId(9))
            .with_source_len(12);
        let a = builder
            .add_node(NodeType::Token, Pos::Pron.code(), Span::new(0, 2), None)
            .expect("node");
        let b = builder
            .add_node(NodeType::Token, Pos::Verb.code(), Span::new(3, 7), None)
            .expect("node");
        (builder, a, b)
    }

    #[test]
    fn identical_calls_yield_identical_graphs() {
        let build = || {
            let (mut builder, a, b) = build_pair();
            builder
                .add_edge(a, b, EdgeType::Next, Weight::FULL)
                .expect("edge");
            builder.finalize().expect("finalize")
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn add_edge_to_missing_node_is_schema_violation() {
        let (mut builder, a, _) = build_pair();
        let result = builder.add_edge(a, NodeId(42), EdgeType::Dep, Weight::FULL);
        assert!(matches!(result, Err(PabloError::SchemaViolation(_))));
    }

    #[test]
    fn finalize_rejects_inverted_span() {
        let (mut builder, _, _) = build_pair();
        builder
            .add_node(NodeType::Phrase, 0, Span::new(9, 4), None)
            .expect("node");
        assert!(matches!(
            builder.finalize(),
            Err(PabloError::SchemaViolation(_))
        ));
    }

    #[test]
    fn finalize_marks_status() {
        let (builder, _, _) = build_pair();
        let graph = builder.finalize().expect("finalize");
        assert!(graph.is_finalized());
        assert_eq!(graph.graph_id(), GraphId(9));
        assert_eq!(graph.source_len(), Some(12));
    }

    #[test]
    fn flags_set_and_clear() {
        let (mut builder, a, b) = build_pair();
        builder.set_flag(a, node_flags::IS_STOP, true).expect("set");
        let e = builder
            .add_edge(a, b, EdgeType::Next, Weight::FULL)
            .expect("edge");
        builder
            .set_edge_flag(e, edge_flags::DIRECTED, false)
            .expect("clear");
        let graph = builder.finalize().expect("finalize");
        assert!(graph.node(a).expect("a").has_flags(node_flags::IS_STOP));
        assert_eq!(graph.edge(e).expect("e").flags, 0);
    }

    #[test]
    fn finalize_with_vocab_requires_resolvable_labels() {
        let vocab = VocabStore::in_memory();
        let known = vocab.get_or_insert("he").expect("intern");

        let (mut builder, a, b) = build_pair();
        builder.set_label(a, known).expect("label");
        assert!(builder.clone().finalize_with_vocab(&vocab).is_ok());

        builder.set_label(b, LabelId(999)).expect("label");
        assert!(builder.clone().finalize().is_ok());
        assert!(builder.finalize_with_vocab(&vocab).is_err());
    }

    #[test]
    fn foreign_link_requires_local_node() {
        let (mut builder, a, _) = build_pair();
        builder
            .link_foreign(a, SourceId(77), NodeId(4))
            .expect("link");
        assert!(builder.link_foreign(NodeId(50), SourceId(77), NodeId(4)).is_err());
        let graph = builder.finalize().expect("finalize");
        assert_eq!(graph.links().len(), 1);
    }
}
