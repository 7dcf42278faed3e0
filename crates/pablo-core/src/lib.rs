//! # pablo-core
//!
//! The deterministic graph core of Pablo.
//!
//! One text unit becomes one typed linguistic graph. The graph is built from
//! collaborator tokens, refined by phase-ordered rules that record why every
//! element exists, scored into a fixed-length thumbnail for retrieval, and
//! then dropped. Only the shared stores live longer:
//! - the append-only vocabulary (`vocab`)
//! - the versioned rule library (`rules`)
//! - the retrieval index and redb retention store (`retrieval`, `storage`)
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: no async, no network dependencies
//! - Deterministic: BTreeMap only, no floats, no randomness
//! - Same graph, same rule library, same phase order: same result, byte for byte
//! - Library code never panics on malformed input

// =============================================================================
// MODULES
// =============================================================================

pub mod builder;
pub mod codec;
pub mod confidence;
pub mod config;
pub mod graph;
pub mod ingestor;
pub mod primitives;
pub mod provenance;
pub mod retrieval;
pub mod rules;
pub mod schema;
pub mod session;
pub mod storage;
pub mod types;
pub mod vocab;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    DiscourseRelation, EdgeId, EdgeType, ElementRef, GraphId, GraphType, LabelId, NodeId,
    NodeType, PabloError, Phase, Pos, RuleId, RuleKind, SchemaId, SourceId, Span, edge_flags,
    graph_status, node_flags,
};

// =============================================================================
// RE-EXPORTS: Graph Model
// =============================================================================

pub use builder::GraphBuilder;
pub use confidence::{Confidence, Weight};
pub use graph::{Edge, ForeignLink, Graph, Node};
pub use provenance::{ApplyOutcome, Justification, RejectReason, RuleScores};
pub use schema::SchemaRegistry;
pub use vocab::VocabStore;

// =============================================================================
// RE-EXPORTS: Codec
// =============================================================================

pub use codec::{
    BlockReader, Compression, EncodeOptions, decode_block, decode_pgraph, encode_block,
    encode_pgraph, encode_pgraph_with,
};

// =============================================================================
// RE-EXPORTS: Rules
// =============================================================================

pub use rules::{
    EngineConfig, PhaseReport, ProvenanceStep, Rule, RuleEngine, RuleLibrary, RuleRegistry,
    RunReport, justify, justify_edge,
};

// =============================================================================
// RE-EXPORTS: Retrieval, Storage & Session
// =============================================================================

pub use config::PabloConfig;
pub use ingestor::{Ingestor, TokenUnit, UnitToken};
pub use retrieval::{GraphKey, QueryResult, Thumbnail, ThumbnailIndex, score_thumbnail};
pub use session::{Analysis, Session, SessionStatus, UnitOutcome};
pub use storage::RetainStore;
