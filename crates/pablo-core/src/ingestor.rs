//! # Ingestor Module
//!
//! Validation and ingestion of token units handed over by the tokenizer and
//! morphology collaborators.
//!
//! - Validate units before any graph is built
//! - Reject malformed input with `PabloError::InvalidUnit`
//! - Build the initial token graph: one `Token` node per token, `NEXT` edges
//! - No inference: everything beyond tokens is left to the rule phases

use crate::builder::GraphBuilder;
use crate::confidence::Weight;
use crate::graph::Graph;
use crate::primitives::{MAX_LEMMA_LENGTH, MAX_UNIT_TOKENS};
use crate::schema::SchemaRegistry;
use crate::types::{
    EdgeType, GraphId, GraphType, LabelId, NodeType, PabloError, Pos, SchemaId, SourceId, Span,
    node_flags,
};
use crate::vocab::VocabStore;
use serde::{Deserialize, Serialize};

/// One token as produced by the tokenizer and morphology passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitToken {
    pub start: u32,
    pub end: u32,
    /// Coarse POS tag name, e.g. `"NOUN"`.
    pub pos: String,
    /// Lemma; empty means no label.
    #[serde(default)]
    pub lemma: String,
    /// Node flag names, e.g. `["is_capitalized", "sent_end_strong"]`.
    #[serde(default)]
    pub flags: Vec<String>,
}

/// A tokenized text unit: the input of one graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenUnit {
    pub source_id: SourceId,
    pub graph_id: GraphId,
    /// Length of the source text in bytes. Every span must lie inside it.
    pub text_len: u32,
    pub tokens: Vec<UnitToken>,
}

/// The Ingestor turns token units into finalized token graphs.
pub struct Ingestor;

impl Ingestor {
    /// Validate a unit.
    ///
    /// A unit is valid if:
    /// - It holds at most `MAX_UNIT_TOKENS` tokens
    /// - Every span is well formed and inside `text_len`
    /// - Tokens appear in source order
    /// - Every lemma is within `MAX_LEMMA_LENGTH`
    /// - Every POS tag and flag name is known
    pub fn validate(unit: &TokenUnit) -> Result<(), PabloError> {
        if unit.tokens.len() > MAX_UNIT_TOKENS {
            return Err(PabloError::InvalidUnit(format!(
                "{} tokens exceeds the limit of {}",
                unit.tokens.len(),
                MAX_UNIT_TOKENS
            )));
        }

        let schema = SchemaRegistry;
        let mut previous_start = 0u32;
        for (i, token) in unit.tokens.iter().enumerate() {
            let invalid = |reason: String| PabloError::InvalidUnit(format!("token {i}: {reason}"));

            if token.end < token.start {
                return Err(invalid(format!(
                    "span {}..{} ends before it starts",
                    token.start, token.end
                )));
            }
            if token.end > unit.text_len {
                return Err(invalid(format!(
                    "span end {} past text length {}",
                    token.end, unit.text_len
                )));
            }
            if token.start < previous_start {
                return Err(invalid("out of source order".to_string()));
            }
            previous_start = token.start;

            if token.lemma.len() > MAX_LEMMA_LENGTH {
                return Err(invalid(format!(
                    "lemma of {} bytes exceeds {}",
                    token.lemma.len(),
                    MAX_LEMMA_LENGTH
                )));
            }
            schema.pos(&token.pos).map_err(|e| invalid(e.to_string()))?;
            schema
                .node_flags(&token.flags)
                .map_err(|e| invalid(e.to_string()))?;
        }
        Ok(())
    }

    /// Validate a unit and build its finalized token graph.
    ///
    /// Lemmas are interned in `vocab`. Punctuation tokens always carry
    /// `IS_PUNCT`, whatever flags the unit lists.
    pub fn ingest(unit: &TokenUnit, vocab: &VocabStore) -> Result<Graph, PabloError> {
        Self::validate(unit)?;

        let schema = SchemaRegistry;
        let mut builder = GraphBuilder::create_graph(unit.source_id, SchemaId::Writing)
            .with_graph_id(unit.graph_id)
            .with_graph_type(GraphType::Hetero)
            .with_source_len(unit.text_len);

        let mut previous = None;
        for token in &unit.tokens {
            let pos = schema.pos(&token.pos)?;
            let node = builder.add_node(
                NodeType::Token,
                pos.code(),
                Span::new(token.start, token.end),
                None,
            )?;

            let mut flags = schema.node_flags(&token.flags)?;
            if pos == Pos::Punct {
                flags |= node_flags::IS_PUNCT;
            }
            if flags != 0 {
                builder.set_flag(node, flags, true)?;
            }

            if !token.lemma.is_empty() {
                let label: LabelId = vocab.get_or_insert(&token.lemma)?;
                builder.set_label(node, label)?;
            }

            if let Some(prev) = previous {
                builder.add_edge(prev, node, EdgeType::Next, Weight::FULL)?;
            }
            previous = Some(node);
        }

        let graph = builder.finalize_with_vocab(vocab)?;
        tracing::debug!(
            source_id = unit.source_id.0,
            graph_id = unit.graph_id.0,
            tokens = unit.tokens.len(),
            "token unit ingested"
        );
        Ok(graph)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeId, graph_status};

    fn token(start: u32, end: u32, pos: &str, lemma: &str, flags: &[&str]) -> UnitToken {
        UnitToken {
            start,
            end,
            pos: pos.to_string(),
            lemma: lemma.to_string(),
            flags: flags.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    /// "The cat sleeps."
    fn unit() -> TokenUnit {
        TokenUnit {
            source_id: SourceId(3),
            graph_id: GraphId(11),
            text_len: 15,
            tokens: vec![
                token(0, 3, "DET", "the", &["is_capitalized", "is_stop"]),
                token(4, 7, "NOUN", "cat", &[]),
                token(8, 14, "VERB", "sleep", &[]),
                token(14, 15, "PUNCT", ".", &["sent_end_strong"]),
            ],
        }
    }

    #[test]
    fn builds_token_chain() {
        let vocab = VocabStore::in_memory();
        let graph = Ingestor::ingest(&unit(), &vocab).expect("ingest");

        assert_eq!(graph.graph_id(), GraphId(11));
        assert_eq!(graph.source_id(), SourceId(3));
        assert_eq!(graph.num_nodes(), 4);
        assert_eq!(graph.num_edges(), 3);
        assert!(graph.is_finalized());
        assert_ne!(graph.status() & graph_status::FINALIZED, 0);

        let cat = graph.node(NodeId(1)).expect("cat");
        assert_eq!(cat.sub_type, Pos::Noun.code());
        assert_eq!(vocab.resolve(cat.label).as_deref(), Some("cat"));

        let stop = graph.node(NodeId(3)).expect("stop");
        assert!(stop.has_flags(node_flags::IS_PUNCT | node_flags::SENT_END_STRONG));
        assert!(graph.node(NodeId(0)).expect("the").has_flags(node_flags::IS_STOP));

        for edge in graph.edges() {
            assert_eq!(edge.e_type, EdgeType::Next);
            assert_eq!(edge.dst.0, edge.src.0 + 1);
        }
    }

    #[test]
    fn lemma_ids_are_shared_across_units() {
        let vocab = VocabStore::in_memory();
        let a = Ingestor::ingest(&unit(), &vocab).expect("a");
        let mut second = unit();
        second.graph_id = GraphId(12);
        let b = Ingestor::ingest(&second, &vocab).expect("b");
        assert_eq!(
            a.node(NodeId(1)).expect("a").label,
            b.node(NodeId(1)).expect("b").label
        );
        assert_eq!(vocab.len(), 4);
    }

    #[test]
    fn empty_unit_gives_empty_graph() {
        let vocab = VocabStore::in_memory();
        let mut empty = unit();
        empty.tokens.clear();
        let graph = Ingestor::ingest(&empty, &vocab).expect("empty");
        assert_eq!(graph.num_nodes(), 0);
        assert_eq!(graph.num_edges(), 0);
    }

    #[test]
    fn malformed_units_rejected() {
        let vocab = VocabStore::in_memory();

        let mut past_end = unit();
        past_end.tokens[3].end = 16;
        assert!(matches!(
            Ingestor::ingest(&past_end, &vocab),
            Err(PabloError::InvalidUnit(_))
        ));

        let mut reversed = unit();
        reversed.tokens[1].start = 5;
        reversed.tokens[1].end = 4;
        assert!(Ingestor::validate(&reversed).is_err());

        let mut unordered = unit();
        unordered.tokens.swap(0, 1);
        assert!(Ingestor::validate(&unordered).is_err());

        let mut bad_pos = unit();
        bad_pos.tokens[0].pos = "ARTICLE".to_string();
        assert!(Ingestor::validate(&bad_pos).is_err());

        let mut bad_flag = unit();
        bad_flag.tokens[0].flags = vec!["is_shiny".to_string()];
        assert!(Ingestor::validate(&bad_flag).is_err());

        let mut long_lemma = unit();
        long_lemma.tokens[1].lemma = "a".repeat(MAX_LEMMA_LENGTH + 1);
        assert!(Ingestor::validate(&long_lemma).is_err());

        let mut too_many = unit();
        too_many.text_len = 1;
        too_many.tokens = vec![token(0, 1, "X", "", &[]); MAX_UNIT_TOKENS + 1];
        assert!(Ingestor::validate(&too_many).is_err());

        assert!(vocab.is_empty());
    }
}
