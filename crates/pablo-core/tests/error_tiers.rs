//! # Error Tier Tests
//!
//! One module per failure kind. Fatal kinds surface as `PabloError`; the
//! others are values in reports and never abort the caller.
//!
//! ## Tiers
//! - Format errors: fatal for the requested block
//! - Schema violations: fatal for one graph, isolated from its siblings
//! - Rule conflicts, slack exhaustion, phase timeouts: recorded, non-fatal
//! - Degraded retrieval: flagged, never raised

use pablo_core::config::RetrievalConfig;
use pablo_core::rules::parse_rules;
use pablo_core::{
    ApplyOutcome, EdgeType, EncodeOptions, EngineConfig, Graph, GraphBuilder, GraphId, GraphKey,
    NodeId, NodeType, PabloConfig, PabloError, Phase, RejectReason, RuleEngine, RuleLibrary,
    SchemaId, Session, SourceId, Span, Thumbnail, ThumbnailIndex, TokenUnit, UnitToken,
    VocabStore, Weight, decode_block, decode_pgraph, encode_block, encode_pgraph, graph_status,
};
use std::sync::Arc;
use std::time::Duration;

fn chain(len: u32) -> Graph {
    let mut builder = GraphBuilder::create_graph(SourceId(1), SchemaId::Writing);
    for i in 0..len {
        builder
            .add_node(NodeType::Token, 1, Span::new(i * 2, i * 2 + 1), None)
            .expect("node");
    }
    for i in 1..len {
        builder
            .add_edge(NodeId(i - 1), NodeId(i), EdgeType::Next, Weight::FULL)
            .expect("edge");
    }
    builder.finalize().expect("finalize")
}

fn unit(graph_id: u64, pos: &[&str]) -> TokenUnit {
    TokenUnit {
        source_id: SourceId(1),
        graph_id: GraphId(graph_id),
        text_len: pos.len() as u32 * 4,
        tokens: pos
            .iter()
            .enumerate()
            .map(|(i, p)| UnitToken {
                start: i as u32 * 4,
                end: i as u32 * 4 + 3,
                pos: (*p).to_string(),
                lemma: format!("w{}", i),
                flags: Vec::new(),
            })
            .collect(),
    }
}

// =============================================================================
// FORMAT ERRORS
// =============================================================================

mod format_errors {
    use super::*;

    #[test]
    fn bad_version_rejects_whole_block() {
        let graphs = [chain(3), chain(4)];
        let mut bytes =
            encode_block(&[&graphs[0], &graphs[1]], &EncodeOptions::default()).expect("encode");
        bytes[4..8].copy_from_slice(&2u32.to_le_bytes());
        let err = decode_block(&bytes).expect_err("version");
        assert_eq!(err.offset(), Some(4));
    }

    #[test]
    fn truncated_block_names_an_offset() {
        let bytes = encode_pgraph(&chain(5)).expect("encode");
        let err = decode_pgraph(&bytes[..bytes.len() - 1]).expect_err("truncated");
        assert!(matches!(err, PabloError::Format { .. }));
        assert!(err.offset().is_some_and(|o| o <= bytes.len() as u64));
    }

    #[test]
    fn empty_input_is_a_format_error() {
        assert_eq!(decode_pgraph(&[]).expect_err("empty").offset(), Some(0));
    }
}

// =============================================================================
// SCHEMA VIOLATIONS
// =============================================================================

mod schema_violations {
    use super::*;

    #[test]
    fn dangling_endpoint_rejected() {
        let mut builder = GraphBuilder::create_graph(SourceId(1), SchemaId::Writing);
        let a = builder
            .add_node(NodeType::Token, 1, Span::new(0, 1), None)
            .expect("node");
        let result = builder.add_edge(a, NodeId(9), EdgeType::Dep, Weight::FULL);
        assert!(matches!(result, Err(PabloError::SchemaViolation(_))));
    }

    #[test]
    fn inverted_span_rejected_at_finalize() {
        let mut builder = GraphBuilder::create_graph(SourceId(1), SchemaId::Writing);
        builder
            .add_node(NodeType::Token, 1, Span::new(5, 2), None)
            .expect("node");
        assert!(matches!(
            builder.finalize(),
            Err(PabloError::SchemaViolation(_))
        ));
    }

    #[test]
    fn unknown_pos_code_rejected_at_finalize() {
        let mut builder = GraphBuilder::create_graph(SourceId(1), SchemaId::Writing);
        builder
            .add_node(NodeType::Token, 200, Span::new(0, 1), None)
            .expect("node");
        assert!(builder.finalize().is_err());
    }

    #[test]
    fn bad_unit_does_not_affect_siblings() {
        let session = Session::in_memory(
            PabloConfig::default(),
            RuleLibrary::empty(),
            VocabStore::in_memory(),
        )
        .expect("session");
        let units = vec![
            unit(1, &["DET", "NOUN"]),
            unit(2, &["DET", "BOGUS"]),
            unit(3, &["PRON", "VERB"]),
        ];
        let outcomes = session.process_batch(&units);
        assert!(outcomes[0].is_ok());
        assert!(matches!(outcomes[1], Err(PabloError::InvalidUnit(_))));
        assert!(outcomes[2].is_ok());
        assert_eq!(session.index().len(), 2);
    }
}

// =============================================================================
// NON-FATAL RULE OUTCOMES
// =============================================================================

mod rule_outcomes {
    use super::*;

    const SLACK_RULE: &str = r#"
[[rule]]
rule_id = 5
name = "loose-link"
phase = "semantics"
kind = "regulatory"
slack_penalty = 10

[[rule.nodes]]
var = "a"
n_type = "token"

[[rule.nodes]]
var = "b"
n_type = "token"

[[rule.guards]]
adjacent = ["a", "b"]
soft = true

[[rule.guards]]
precedes = ["a", "b"]

[[rule.actions]]
add_edge = { src = "a", dst = "b", e_type = "role" }
"#;

    #[test]
    fn slack_exhaustion_is_recorded_not_raised() {
        let vocab = VocabStore::in_memory();
        let rules = parse_rules(SLACK_RULE, &vocab, "slack.toml").expect("parse");
        let config = EngineConfig {
            slack_budget: 20,
            ..EngineConfig::default()
        };
        let engine = RuleEngine::new(
            Arc::new(RuleLibrary::new(1, rules).expect("library")),
            config,
        );
        // 4 tokens: 3 adjacent pairs apply cleanly, 3 non-adjacent pairs need slack
        let mut graph = chain(4);
        let report = engine
            .run_rules(&mut graph, Phase::Semantics)
            .expect("run");

        assert_eq!(report.slack_firings, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(graph.slack_spent(), 20);
        let rejected: Vec<_> = graph
            .trail()
            .iter()
            .filter(|j| {
                j.outcome
                    == ApplyOutcome::Rejected {
                        reason: RejectReason::SlackExhausted,
                    }
            })
            .collect();
        assert_eq!(rejected.len(), 1);
        assert!(rejected[0].targets.is_empty());
    }

    #[test]
    fn timeout_marks_graph_incomplete() {
        let vocab = VocabStore::in_memory();
        let rules = parse_rules(SLACK_RULE, &vocab, "slack.toml").expect("parse");
        let config = EngineConfig {
            phase_time_budget: Some(Duration::ZERO),
            ..EngineConfig::default()
        };
        let engine = RuleEngine::new(
            Arc::new(RuleLibrary::new(1, rules).expect("library")),
            config,
        );
        let mut graph = chain(4);
        let edges_before = graph.num_edges();

        let report = engine.run_all_phases(&mut graph).expect("partial result");
        assert!(report.timed_out());
        assert!(graph.is_incomplete());
        assert_ne!(graph.status() & graph_status::INCOMPLETE, 0);
        assert_eq!(graph.num_edges(), edges_before);
    }
}

// =============================================================================
// DEGRADED RETRIEVAL
// =============================================================================

mod degraded_retrieval {
    use super::*;

    fn key(n: u64) -> GraphKey {
        GraphKey {
            source_id: SourceId(1),
            graph_id: GraphId(n),
        }
    }

    #[test]
    fn stale_index_falls_back_to_linear_scan() {
        let index = ThumbnailIndex::new(RetrievalConfig {
            merge_batch: 1000,
            stale_after: 2,
            ..RetrievalConfig::default()
        });
        for n in 0..4u64 {
            index
                .insert(key(n), Thumbnail::new(vec![n as i8; 64]).expect("thumb"))
                .expect("insert");
        }
        let result = index.query(&Thumbnail::new(vec![3; 64]).expect("q"), 2);
        assert!(result.degraded);
        assert_eq!(result.hits[0].key, key(3));
        assert_eq!(result.hits[1].key, key(2));

        index.merge();
        let fresh = index.query(&Thumbnail::new(vec![3; 64]).expect("q"), 1);
        assert!(!fresh.degraded);
        assert_eq!(fresh.hits[0].key, key(3));
    }

    #[test]
    fn wrong_dimension_query_is_empty_and_flagged() {
        let index = ThumbnailIndex::new(RetrievalConfig::default());
        index
            .insert(key(1), Thumbnail::new(vec![1; 64]).expect("thumb"))
            .expect("insert");
        index.merge();
        let result = index.query(&Thumbnail::new(vec![1; 128]).expect("q"), 5);
        assert!(result.degraded);
        assert!(result.hits.is_empty());
    }
}
