//! # `.pgraph` Codec
//!
//! Byte-exact serialization of finalized graphs.
//!
//! A block is a fixed header and offset table followed by a body of records,
//! optionally zstd-compressed as a whole. Every integer inside a record is a
//! base-128 varint; signed values are zigzag-mapped first. Edges are written
//! per relation type in one of two shapes: a LOUDS succinct tree when the
//! type's edges form a forest, otherwise a shared CSR section.
//!
//! Decoding either returns a graph that is field-for-field identical to the
//! one encoded, or a `PabloError::Format` naming the byte offset of failure.
//! No partial graph is ever returned.

mod block;
mod csr;
mod record;
mod tree;
pub mod varint;

pub use block::{
    BlockHeader, BlockReader, Compression, EncodeOptions, decode_block, decode_pgraph,
    encode_block, encode_pgraph, encode_pgraph_with,
};

#[cfg(feature = "crypto-hash")]
pub use block::block_digest;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::confidence::{Confidence, Weight};
    use crate::graph::Graph;
    use crate::provenance::{ApplyOutcome, Justification, RejectReason, RuleScores};
    use crate::types::{
        EdgeId, EdgeType, ElementRef, GraphId, NodeId, NodeType, PabloError, Phase, Pos, RuleId,
        SchemaId, SourceId, Span, edge_flags, node_flags,
    };

    /// "The dog chased the cat ." with a dependency tree, a NEXT chain,
    /// a coreference cycle and every adjunct populated.
    fn sample_graph() -> Graph {
        let mut builder = GraphBuilder::create_graph(SourceId(12), SchemaId::Writing)
            .with_graph_id(GraphId(300))
            .with_source_len(23);
        let spans = [(0, 3), (4, 7), (8, 14), (15, 18), (19, 22), (22, 23)];
        let pos = [Pos::Det, Pos::Noun, Pos::Verb, Pos::Det, Pos::Noun, Pos::Punct];
        let mut ids = Vec::new();
        for ((start, end), pos) in spans.iter().zip(pos) {
            ids.push(
                builder
                    .add_node(NodeType::Token, pos.code(), Span::new(*start, *end), None)
                    .expect("token"),
            );
        }
        for pair in ids.windows(2) {
            builder
                .add_edge(pair[0], pair[1], EdgeType::Next, Weight::FULL)
                .expect("next");
        }
        let subj = builder
            .add_edge(ids[2], ids[1], EdgeType::Dep, Weight::new(200))
            .expect("dep");
        builder
            .add_edge(ids[2], ids[4], EdgeType::Dep, Weight::FULL)
            .expect("dep");
        builder
            .add_edge(ids[1], ids[0], EdgeType::Dep, Weight::FULL)
            .expect("dep");
        builder.set_edge_time(subj, 7).expect("time");
        builder
            .set_edge_confidence(subj, Confidence::new(180))
            .expect("confidence");
        builder
            .add_edge(ids[1], ids[4], EdgeType::Coref, Weight::new(90))
            .expect("coref");
        builder
            .add_edge(ids[4], ids[1], EdgeType::Coref, Weight::new(90))
            .expect("coref");
        builder.set_flag(ids[2], node_flags::IS_ROOT, true).expect("flag");
        builder.set_flag(ids[5], node_flags::IS_PUNCT, true).expect("flag");
        builder
            .add_node(NodeType::Entity, 0, Span::new(4, 7), Some(vec![-5, 0, 1 << 20]))
            .expect("entity");
        builder
            .link_foreign(NodeId(6), SourceId(99), NodeId(3))
            .expect("link");

        let mut graph = builder.finalize().expect("finalize");
        graph
            .set_g_features((0..64).map(|i| (i * 4 - 128) as i8).collect())
            .expect("thumbnail");
        graph.edges[subj.0 as usize].flags |= edge_flags::INFERRED;
        graph.record(Justification {
            rule_id: RuleId(110),
            rule_version: 2,
            phase: Phase::Syntax,
            pass: 1,
            outcome: ApplyOutcome::Applied,
            scores: RuleScores {
                support: 40,
                precision: 950,
                coverage: 300,
                mdl: 12,
            },
            bindings: vec![ElementRef::Node(ids[2]), ElementRef::Node(ids[1])],
            targets: vec![ElementRef::Edge(subj)],
        });
        graph.record(Justification {
            rule_id: RuleId(205),
            rule_version: 1,
            phase: Phase::Syntax,
            pass: 2,
            outcome: ApplyOutcome::AppliedWithSlack { penalty: 8 },
            scores: RuleScores::default(),
            bindings: vec![ElementRef::Edge(subj)],
            targets: vec![ElementRef::Edge(subj), ElementRef::Node(ids[1])],
        });
        graph.record(Justification {
            rule_id: RuleId(206),
            rule_version: 1,
            phase: Phase::Scope,
            pass: 1,
            outcome: ApplyOutcome::Rejected {
                reason: RejectReason::SlackExhausted,
            },
            scores: RuleScores::default(),
            bindings: vec![ElementRef::Node(ids[0])],
            targets: Vec::new(),
        });
        graph.record(Justification {
            rule_id: RuleId(300),
            rule_version: 1,
            phase: Phase::Scope,
            pass: 1,
            outcome: ApplyOutcome::Overridden { by: RuleId(110) },
            scores: RuleScores::default(),
            bindings: vec![ElementRef::Node(ids[2])],
            targets: vec![ElementRef::Edge(EdgeId(0))],
        });
        graph.spend_slack(8);
        graph
    }

    #[test]
    fn round_trip_is_field_for_field() {
        let graph = sample_graph();
        let bytes = encode_pgraph(&graph).expect("encode");
        assert_eq!(&bytes[0..4], b"PGRB");
        let decoded = decode_pgraph(&bytes).expect("decode");
        assert_eq!(decoded, graph);
        assert_eq!(decoded.derived_by(ElementRef::Edge(EdgeId(5))), Some(RuleId(205)));
    }

    #[test]
    fn encoding_is_deterministic() {
        let graph = sample_graph();
        assert_eq!(
            encode_pgraph(&graph).expect("encode"),
            encode_pgraph(&graph.clone()).expect("encode")
        );
    }

    #[test]
    fn compressed_round_trip() {
        let graph = sample_graph();
        let bytes = encode_pgraph_with(&graph, &EncodeOptions::zstd(3)).expect("encode");
        let reader = BlockReader::new(&bytes).expect("reader");
        assert!(reader.header().is_compressed());
        assert_eq!(reader.record(0).expect("decode"), graph);
    }

    #[test]
    fn multi_record_block_by_index() {
        let first = sample_graph();
        let mut builder = GraphBuilder::create_graph(SourceId(2), SchemaId::Writing);
        builder
            .add_node(NodeType::Event, 0, Span::new(0, 0), None)
            .expect("node");
        let second = builder.finalize().expect("finalize");

        let bytes = encode_block(&[&first, &second], &EncodeOptions::default()).expect("encode");
        let reader = BlockReader::new(&bytes).expect("reader");
        assert_eq!(reader.record_count(), 2);
        assert_eq!(reader.record(1).expect("second"), second);
        assert_eq!(decode_block(&bytes).expect("all"), vec![first, second]);

        // a one-record decode refuses a multi-record block
        let err = decode_pgraph(&bytes).expect_err("two records");
        assert_eq!(err.offset(), Some(12));
    }

    #[test]
    fn altered_magic_is_rejected_at_offset_zero() {
        let mut bytes = encode_pgraph(&sample_graph()).expect("encode");
        bytes[0..4].copy_from_slice(b"XXXX");
        let err = decode_pgraph(&bytes).expect_err("bad magic");
        assert!(matches!(err, PabloError::Format { offset: 0, .. }));
    }

    #[test]
    fn unsupported_version_points_at_version_field() {
        let mut bytes = encode_pgraph(&sample_graph()).expect("encode");
        bytes[4] = 9;
        assert_eq!(decode_pgraph(&bytes).expect_err("version").offset(), Some(4));
    }

    #[test]
    fn truncation_anywhere_fails_cleanly() {
        let bytes = encode_pgraph(&sample_graph()).expect("encode");
        for cut in 0..bytes.len() {
            let err = decode_pgraph(&bytes[..cut]).expect_err("truncated");
            let offset = err.offset().expect("format error");
            assert!(offset <= cut as u64, "offset {} beyond cut {}", offset, cut);
        }
    }

    #[test]
    fn offset_outside_body_is_rejected() {
        let graph = sample_graph();
        let mut bytes = encode_block(&[&graph, &graph], &EncodeOptions::default()).expect("encode");
        bytes[24..32].copy_from_slice(&u64::MAX.to_le_bytes());
        let err = decode_block(&bytes).expect_err("offset");
        assert_eq!(err.offset(), Some(24));
    }

    #[test]
    fn corrupt_compressed_body_reports_body_start() {
        let mut bytes =
            encode_pgraph_with(&sample_graph(), &EncodeOptions::zstd(1)).expect("encode");
        for byte in bytes.iter_mut().skip(24) {
            *byte = 0xAB;
        }
        let err = decode_pgraph(&bytes).expect_err("corrupt");
        assert_eq!(err.offset(), Some(24));
    }

    #[test]
    fn mismatched_node_id_is_format_error() {
        let mut builder = GraphBuilder::create_graph(SourceId(1), SchemaId::Writing);
        let a = builder
            .add_node(NodeType::Token, 0, Span::new(0, 1), None)
            .expect("node");
        builder.add_edge(a, a, EdgeType::Role, Weight::FULL).expect("edge");
        let graph = builder.finalize().expect("finalize");
        let bytes = encode_pgraph(&graph).expect("encode");

        // the single node claims id 1 instead of 0
        let mut tampered = bytes;
        let node_id_at = 24 + 11;
        assert_eq!(tampered[node_id_at], 0);
        tampered[node_id_at] = 1;
        assert!(matches!(
            decode_pgraph(&tampered),
            Err(PabloError::Format { .. })
        ));
    }
}
