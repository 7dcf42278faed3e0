//! # Core Type Definitions
//!
//! Identifiers, wire enumerations, flag sets and the crate error type for the
//! Pablo graph core:
//! - Element identifiers (`NodeId`, `EdgeId`, `LabelId`, `GraphId`, `SourceId`, `RuleId`)
//! - Wire enumerations with stable numeric codes (`NodeType`, `EdgeType`, ...)
//! - Flag bit sets for nodes, edges and graph status
//! - Error types (`PabloError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer representations only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Carry numeric codes that never change once published in a `.pgraph` block

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Dense index of a node inside its owning graph.
///
/// Assigned by the graph's monotonic counter, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Dense index of an edge inside its owning graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

/// Identifier issued by the vocabulary store. `LabelId::NONE` (0) means "no label".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct LabelId(pub u32);

impl LabelId {
    /// The reserved "no label" id.
    pub const NONE: Self = Self(0);

    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Identifier of one analyzed text unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct GraphId(pub u64);

/// Identifier of the document or stream a text unit came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SourceId(pub u64);

/// Stable identifier of a published rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// A reference to one element of a graph, by handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ElementRef {
    Node(NodeId),
    Edge(EdgeId),
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => id.fmt(f),
            Self::Edge(id) => id.fmt(f),
        }
    }
}

// =============================================================================
// SPAN
// =============================================================================

/// Byte offsets `[start, end)` into the source text of a unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// `end >= start`.
    #[must_use]
    pub const fn is_well_formed(self) -> bool {
        self.end >= self.start
    }

    /// Smallest span covering both.
    #[must_use]
    pub fn cover(self, other: Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

// =============================================================================
// WIRE ENUMERATIONS
// =============================================================================

/// Declares a `u8`-coded enumeration with stable wire codes and symbolic names.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident ($what:literal) {
            $( $variant:ident = $code:literal => $sym:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum $name {
            $( $variant = $code ),+
        }

        impl $name {
            /// Every variant, in code order.
            pub const ALL: &'static [Self] = &[ $( Self::$variant ),+ ];

            #[must_use]
            pub const fn code(self) -> u8 {
                self as u8
            }

            #[must_use]
            pub const fn from_code(code: u8) -> Option<Self> {
                match code {
                    $( $code => Some(Self::$variant), )+
                    _ => None,
                }
            }

            /// Like `from_code`, failing with `SchemaViolation` on unknown codes.
            pub fn try_from_code(code: u8) -> Result<Self, PabloError> {
                Self::from_code(code).ok_or_else(|| {
                    PabloError::SchemaViolation(format!("unknown {} code {}", $what, code))
                })
            }

            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $sym ),+
                }
            }

            /// Case-insensitive lookup by symbolic name.
            #[must_use]
            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.name().eq_ignore_ascii_case(name))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

wire_enum! {
    /// Structural class of a graph.
    pub enum GraphType ("graph type") {
        Simple = 1 => "simple",
        Multi = 2 => "multi",
        Tree = 3 => "tree",
        Dag = 4 => "dag",
        Hetero = 5 => "hetero",
        Temporal = 6 => "temporal",
    }
}

wire_enum! {
    /// Schema a graph was built against.
    pub enum SchemaId ("schema") {
        Writing = 1 => "writing",
    }
}

wire_enum! {
    /// Node type.
    pub enum NodeType ("node type") {
        Token = 1 => "token",
        Entity = 2 => "entity",
        Predicate = 3 => "predicate",
        Event = 4 => "event",
        Phrase = 5 => "phrase",
        Edu = 6 => "edu",
        DiscourseRel = 7 => "discourse_rel",
        Negation = 8 => "negation",
        Modality = 9 => "modality",
        Quantifier = 10 => "quantifier",
        TimeExpr = 11 => "time_expr",
        Place = 12 => "place",
        KgEntity = 13 => "kg_entity",
        KgConcept = 14 => "kg_concept",
    }
}

wire_enum! {
    /// Edge type.
    pub enum EdgeType ("edge type") {
        Dep = 1 => "dep",
        Role = 2 => "role",
        Coref = 3 => "coref",
        Discourse = 4 => "discourse",
        ScopesOver = 5 => "scopes_over",
        HappensAt = 6 => "happens_at",
        LocatedIn = 7 => "located_in",
        SameAs = 8 => "same_as",
        Next = 9 => "next",
        Punct = 10 => "punct",
        ArgOf = 11 => "arg_of",
    }
}

wire_enum! {
    /// Coarse part-of-speech tag carried in a token's `sub_type`.
    pub enum Pos ("part of speech") {
        X = 0 => "X",
        Noun = 1 => "NOUN",
        Verb = 2 => "VERB",
        Adj = 3 => "ADJ",
        Adv = 4 => "ADV",
        Pron = 5 => "PRON",
        Det = 6 => "DET",
        Adp = 7 => "ADP",
        Cconj = 8 => "CCONJ",
        Sconj = 9 => "SCONJ",
        Punct = 10 => "PUNCT",
        Num = 11 => "NUM",
        Propn = 12 => "PROPN",
        Aux = 13 => "AUX",
    }
}

wire_enum! {
    /// Relation carried in a discourse-relation node's `sub_type`.
    pub enum DiscourseRelation ("discourse relation") {
        Cause = 1 => "CAUSE",
        Contrast = 2 => "CONTRAST",
        Condition = 3 => "CONDITION",
        Temporal = 4 => "TEMPORAL",
        Elaboration = 5 => "ELABORATION",
        Concession = 6 => "CONCESSION",
    }
}

wire_enum! {
    /// Rule execution phase. Phases always run in code order.
    pub enum Phase ("phase") {
        Syntax = 0 => "syntax",
        Semantics = 1 => "semantics",
        Discourse = 2 => "discourse",
        Scope = 3 => "scope",
    }
}

wire_enum! {
    /// Rule kind. Constitutive rules define structure and win conflicts.
    pub enum RuleKind ("rule kind") {
        Constitutive = 0 => "constitutive",
        Regulatory = 1 => "regulatory",
    }
}

impl Phase {
    /// Status bit marking this phase as cut short by the iteration cap.
    #[must_use]
    pub const fn truncated_flag(self) -> u16 {
        graph_status::PHASE_TRUNCATED_BASE << (self as u16)
    }
}

// =============================================================================
// FLAG SETS
// =============================================================================

/// Node flag bits (`Node::flags`).
pub mod node_flags {
    pub const IS_ROOT: u16 = 1 << 0;
    pub const IS_STOP: u16 = 1 << 1;
    pub const IS_CAPITALIZED: u16 = 1 << 2;
    pub const IS_PUNCT: u16 = 1 << 3;
    pub const PROPOSED: u16 = 1 << 4;
    pub const IS_HEAD: u16 = 1 << 5;
    pub const SENT_END_STRONG: u16 = 1 << 6;
    pub const SENT_END_WEAK: u16 = 1 << 7;
    /// Tombstone set when a rule removes the node.
    pub const RETRACTED: u16 = 1 << 15;

    pub const NAMED: &[(&str, u16)] = &[
        ("is_root", IS_ROOT),
        ("is_stop", IS_STOP),
        ("is_capitalized", IS_CAPITALIZED),
        ("is_punct", IS_PUNCT),
        ("proposed", PROPOSED),
        ("is_head", IS_HEAD),
        ("sent_end_strong", SENT_END_STRONG),
        ("sent_end_weak", SENT_END_WEAK),
        ("retracted", RETRACTED),
    ];
}

/// Edge flag bits (`Edge::flags`).
pub mod edge_flags {
    pub const DIRECTED: u16 = 1 << 0;
    pub const PROPOSED: u16 = 1 << 1;
    pub const SYMMETRIC: u16 = 1 << 2;
    pub const CROSS_SENT: u16 = 1 << 3;
    pub const NEGATED: u16 = 1 << 4;
    pub const INFERRED: u16 = 1 << 5;
    /// Tombstone set when a rule removes the edge or one of its endpoints.
    pub const RETRACTED: u16 = 1 << 15;

    pub const NAMED: &[(&str, u16)] = &[
        ("directed", DIRECTED),
        ("proposed", PROPOSED),
        ("symmetric", SYMMETRIC),
        ("cross_sent", CROSS_SENT),
        ("negated", NEGATED),
        ("inferred", INFERRED),
        ("retracted", RETRACTED),
    ];
}

/// Graph status bits (`Graph::status`).
pub mod graph_status {
    /// Passed `finalize`.
    pub const FINALIZED: u16 = 1 << 0;
    /// A phase exceeded its time budget; the graph is a partial result.
    pub const INCOMPLETE: u16 = 1 << 1;
    /// First of four per-phase "iteration cap reached" bits.
    pub const PHASE_TRUNCATED_BASE: u16 = 1 << 4;
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Pablo core.
///
/// - No silent failures
/// - Use `Result<T, PabloError>` for fallible operations
/// - The core should never panic; all errors must be recoverable
///
/// Rule conflicts, slack exhaustion, phase timeouts and degraded retrieval are
/// not errors: they are reported as values and logged.
#[derive(Debug, Error)]
pub enum PabloError {
    /// A `.pgraph` block is malformed. `offset` is the byte position of failure.
    #[error("Format error at byte {offset}: {reason}")]
    Format { offset: u64, reason: String },

    /// A graph broke a structural invariant (dangling edge, bad span, unknown code).
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// The requested node does not exist in the graph.
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// The requested edge does not exist in the graph.
    #[error("Edge not found: {0}")]
    EdgeNotFound(EdgeId),

    /// A symbolic name did not resolve in the schema registry.
    #[error("Unknown {namespace} '{name}'")]
    UnknownSymbol {
        namespace: &'static str,
        name: String,
    },

    /// A token unit handed over by a collaborator is malformed.
    #[error("Invalid token unit: {0}")]
    InvalidUnit(String),

    /// A rule file could not be parsed or compiled.
    #[error("Rule file error: {0}")]
    RuleFile(String),

    /// Two rules in one library share an id.
    #[error("Duplicate rule id: {0}")]
    DuplicateRule(RuleId),

    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl PabloError {
    /// Shorthand for a `Format` error.
    #[must_use]
    pub fn format(offset: u64, reason: impl Into<String>) -> Self {
        Self::Format {
            offset,
            reason: reason.into(),
        }
    }

    /// Byte offset of failure for format errors.
    #[must_use]
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::Format { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_are_stable() {
        assert_eq!(NodeType::Token.code(), 1);
        assert_eq!(NodeType::KgConcept.code(), 14);
        assert_eq!(EdgeType::Dep.code(), 1);
        assert_eq!(EdgeType::ArgOf.code(), 11);
        assert_eq!(Pos::Aux.code(), 13);
        assert_eq!(GraphType::Temporal.code(), 6);
    }

    #[test]
    fn unknown_code_is_schema_violation() {
        assert!(NodeType::from_code(0).is_none());
        assert!(matches!(
            EdgeType::try_from_code(99),
            Err(PabloError::SchemaViolation(_))
        ));
    }

    #[test]
    fn names_resolve_case_insensitively() {
        assert_eq!(Pos::from_name("noun"), Some(Pos::Noun));
        assert_eq!(Pos::from_name("NOUN"), Some(Pos::Noun));
        assert_eq!(DiscourseRelation::from_name("cause"), Some(DiscourseRelation::Cause));
        assert_eq!(Phase::from_name("Discourse"), Some(Phase::Discourse));
        assert_eq!(EdgeType::from_name("scopes_over"), Some(EdgeType::ScopesOver));
        assert!(NodeType::from_name("sentence").is_none());
    }

    #[test]
    fn phase_order_follows_codes() {
        let phases: Vec<_> = Phase::ALL.to_vec();
        assert_eq!(
            phases,
            vec![Phase::Syntax, Phase::Semantics, Phase::Discourse, Phase::Scope]
        );
    }

    #[test]
    fn truncated_flags_are_distinct() {
        let bits: Vec<u16> = Phase::ALL.iter().map(|p| p.truncated_flag()).collect();
        for (i, a) in bits.iter().enumerate() {
            assert_eq!(a & graph_status::FINALIZED, 0);
            assert_eq!(a & graph_status::INCOMPLETE, 0);
            for b in &bits[i + 1..] {
                assert_eq!(a & b, 0);
            }
        }
    }

    #[test]
    fn span_cover() {
        let a = Span::new(4, 7);
        let b = Span::new(0, 3);
        assert_eq!(a.cover(b), Span::new(0, 7));
        assert!(!Span::new(5, 2).is_well_formed());
    }

    #[test]
    fn format_error_carries_offset() {
        let err = PabloError::format(17, "bad magic");
        assert_eq!(err.offset(), Some(17));
        assert!(err.to_string().contains("17"));
    }
}
