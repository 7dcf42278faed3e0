//! # Rule Library
//!
//! Rules, their immutable library snapshots, and the registry that publishes
//! new snapshots.
//!
//! A rule binds pattern variables to live graph elements, checks guards over
//! the binding, and applies actions. Rules are never edited in place: a new
//! version is a new library, published atomically through `RuleRegistry`
//! while in-flight runs keep the snapshot they started with.
//!
//! ## Execution Order
//!
//! Within a phase: constitutive rules before regulatory ones, then descending
//! `precision × support`, then ascending `mdl`, then ascending `rule_id`.

pub mod engine;
pub mod file;
pub mod justify;
mod matcher;

use crate::confidence::{Weight, rule_strength};
use crate::primitives::{MAX_PATTERN_VARS, fnv1a64};
use crate::provenance::RuleScores;
use crate::types::{EdgeType, LabelId, NodeType, PabloError, Phase, RuleId, RuleKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub use engine::{ClaimField, ConflictRecord, EngineConfig, PhaseReport, RuleEngine, RunReport};
pub use file::{load_dir, load_library, parse_rules};
pub use justify::{ProvenanceStep, justify, justify_edge};

// =============================================================================
// RULE
// =============================================================================

/// Where a rule came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuleMeta {
    pub author: String,
    pub source: String,
    pub created: String,
}

/// A node variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePattern {
    pub var: String,
    pub n_type: Option<NodeType>,
    pub sub_type: Option<u8>,
    pub label: Option<LabelId>,
    /// Every bit must be set.
    pub all_flags: u16,
    /// No bit may be set.
    pub no_flags: u16,
}

/// An edge between two node variables (indices into `Rule::nodes`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgePattern {
    /// Named edges can be targeted by actions and guards.
    pub var: Option<String>,
    pub src: usize,
    pub dst: usize,
    pub e_type: Option<EdgeType>,
    pub attr: Option<LabelId>,
    pub all_flags: u16,
    pub no_flags: u16,
}

/// A guard condition. Node operands are indices into `Rule::nodes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// `a` starts before `b`.
    Precedes { a: usize, b: usize },
    /// A live `NEXT` edge runs from `a` to `b`.
    Adjacent { a: usize, b: usize },
    /// No live edge `src -> dst` (of the given type).
    NoEdge {
        src: usize,
        dst: usize,
        e_type: Option<EdgeType>,
    },
    /// No live edge enters `node` (with the given type and attribute).
    NoIncoming {
        node: usize,
        e_type: Option<EdgeType>,
        attr: Option<LabelId>,
    },
    /// No live edge leaves `node` (with the given type and attribute).
    NoOutgoing {
        node: usize,
        e_type: Option<EdgeType>,
        attr: Option<LabelId>,
    },
    HasFlag { node: usize, flag: u16 },
    LacksFlag { node: usize, flag: u16 },
    LabelIs { node: usize, label: LabelId },
    /// `a` and `b` start in the same sentence. Sentences end at strong ends
    /// (with their trailing closers) and at an ellipsis before a capital.
    SameSentence { a: usize, b: usize },
}

impl Condition {
    fn node_operands(&self) -> Vec<usize> {
        match *self {
            Self::Precedes { a, b } | Self::Adjacent { a, b } | Self::SameSentence { a, b } => {
                vec![a, b]
            }
            Self::NoEdge { src, dst, .. } => vec![src, dst],
            Self::NoIncoming { node, .. }
            | Self::NoOutgoing { node, .. }
            | Self::HasFlag { node, .. }
            | Self::LacksFlag { node, .. }
            | Self::LabelIs { node, .. } => vec![node],
        }
    }
}

/// A guard. A failing hard guard vetoes the binding; a failing soft guard can
/// be bent with slack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guard {
    pub cond: Condition,
    pub soft: bool,
}

/// A node operand of an action: a bound variable or a node created by an
/// earlier `AddNode` of the same firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarRef {
    Bound(usize),
    New(usize),
}

/// A graph mutation. Edge operands are indices into `Rule::edges`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    AddNode {
        n_type: NodeType,
        sub_type: u8,
        label: LabelId,
        flags: u16,
        /// The new node spans the cover of these bound nodes.
        span_of: Vec<usize>,
    },
    AddEdge {
        src: VarRef,
        dst: VarRef,
        e_type: EdgeType,
        attr: LabelId,
        weight: Weight,
        flags: u16,
    },
    RemoveNode { node: usize },
    RemoveEdge { edge: usize },
    SetNodeFlag { node: usize, flag: u16, value: bool },
    SetEdgeFlag { edge: usize, flag: u16, value: bool },
    SetLabel { node: usize, label: LabelId },
    SetEdgeLabel { edge: usize, attr: LabelId },
}

/// One published rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub version: u32,
    pub phase: Phase,
    pub kind: RuleKind,
    pub scores: RuleScores,
    /// Present on rules that may be applied with slack.
    pub slack_penalty: Option<u16>,
    pub meta: RuleMeta,
    pub nodes: Vec<NodePattern>,
    pub edges: Vec<EdgePattern>,
    pub guards: Vec<Guard>,
    pub actions: Vec<Action>,
}

impl Rule {
    /// `precision × support`.
    #[must_use]
    pub fn strength(&self) -> u64 {
        rule_strength(self.scores.precision, self.scores.support)
    }

    /// Check that every operand refers to an existing variable.
    pub fn validate(&self) -> Result<(), PabloError> {
        let fail = |reason: String| {
            PabloError::RuleFile(format!("{} ({}): {}", self.id, self.name, reason))
        };

        if self.nodes.is_empty() {
            return Err(fail("pattern binds no nodes".to_string()));
        }
        if self.nodes.len() + self.edges.len() > MAX_PATTERN_VARS {
            return Err(fail(format!(
                "pattern binds {} elements, limit is {}",
                self.nodes.len() + self.edges.len(),
                MAX_PATTERN_VARS
            )));
        }
        let mut names = BTreeSet::new();
        let edge_names = self.edges.iter().filter_map(|e| e.var.as_deref());
        for name in self.nodes.iter().map(|n| n.var.as_str()).chain(edge_names) {
            if !names.insert(name) {
                return Err(fail(format!("variable '{}' bound twice", name)));
            }
        }

        let nodes = self.nodes.len();
        let edges = self.edges.len();
        let node_ok = |i: usize| i < nodes;

        for edge in &self.edges {
            if !node_ok(edge.src) || !node_ok(edge.dst) {
                return Err(fail("edge pattern refers to a missing node variable".to_string()));
            }
        }
        for guard in &self.guards {
            if !guard.cond.node_operands().into_iter().all(node_ok) {
                return Err(fail("guard refers to a missing node variable".to_string()));
            }
        }

        let mut created = 0usize;
        let var_ok = |v: VarRef, created: usize| match v {
            VarRef::Bound(i) => i < nodes,
            VarRef::New(i) => i < created,
        };
        for action in &self.actions {
            let ok = match action {
                Action::AddNode { span_of, .. } => {
                    created += 1;
                    !span_of.is_empty() && span_of.iter().all(|&i| node_ok(i))
                }
                Action::AddEdge { src, dst, .. } => var_ok(*src, created) && var_ok(*dst, created),
                Action::RemoveNode { node }
                | Action::SetNodeFlag { node, .. }
                | Action::SetLabel { node, .. } => node_ok(*node),
                Action::RemoveEdge { edge }
                | Action::SetEdgeFlag { edge, .. }
                | Action::SetEdgeLabel { edge, .. } => *edge < edges,
            };
            if !ok {
                return Err(fail("action refers to a missing variable".to_string()));
            }
        }
        if self.actions.is_empty() {
            return Err(fail("rule has no actions".to_string()));
        }
        Ok(())
    }
}

/// Execution order within a phase.
fn execution_order(a: &Rule, b: &Rule) -> Ordering {
    a.kind
        .code()
        .cmp(&b.kind.code())
        .then_with(|| b.strength().cmp(&a.strength()))
        .then_with(|| a.scores.mdl.cmp(&b.scores.mdl))
        .then_with(|| a.id.cmp(&b.id))
}

// =============================================================================
// LIBRARY
// =============================================================================

/// An immutable, versioned set of rules.
#[derive(Debug, Clone)]
pub struct RuleLibrary {
    version: u64,
    /// Sorted by id.
    rules: Vec<Rule>,
    /// Per phase, indices into `rules` in execution order.
    order: BTreeMap<Phase, Vec<usize>>,
    fingerprint: u64,
}

impl RuleLibrary {
    /// Build a library. Every rule is validated; ids must be unique.
    pub fn new(version: u64, mut rules: Vec<Rule>) -> Result<Self, PabloError> {
        rules.sort_by_key(|r| r.id);
        for pair in rules.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(PabloError::DuplicateRule(pair[0].id));
            }
        }
        for rule in &rules {
            rule.validate()?;
        }

        let mut order: BTreeMap<Phase, Vec<usize>> = BTreeMap::new();
        for &phase in Phase::ALL {
            let mut indices: Vec<usize> = (0..rules.len())
                .filter(|&i| rules[i].phase == phase)
                .collect();
            indices.sort_by(|&a, &b| execution_order(&rules[a], &rules[b]));
            order.insert(phase, indices);
        }

        let mut content = postcard::to_allocvec(&rules)
            .map_err(|e| PabloError::Serialization(e.to_string()))?;
        content.extend_from_slice(&version.to_le_bytes());
        let fingerprint = fnv1a64(&content);

        Ok(Self {
            version,
            rules,
            order,
            fingerprint,
        })
    }

    /// A library with no rules, version 0.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: 0,
            rules: Vec::new(),
            order: Phase::ALL.iter().map(|&p| (p, Vec::new())).collect(),
            fingerprint: 0,
        }
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Content hash over every rule and the version.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// All rules, by id.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[must_use]
    pub fn get(&self, id: RuleId) -> Option<&Rule> {
        self.rules
            .binary_search_by_key(&id, |r| r.id)
            .ok()
            .map(|i| &self.rules[i])
    }

    /// Rules of `phase` in execution order.
    pub fn phase_order(&self, phase: Phase) -> impl Iterator<Item = &Rule> {
        self.order
            .get(&phase)
            .into_iter()
            .flatten()
            .map(|&i| &self.rules[i])
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Holds the active library snapshot.
///
/// Readers take an `Arc` and keep it for a whole run; `publish` swaps the
/// snapshot under a short write lock.
#[derive(Debug)]
pub struct RuleRegistry {
    active: RwLock<Arc<RuleLibrary>>,
}

impl RuleRegistry {
    #[must_use]
    pub fn new(library: RuleLibrary) -> Self {
        Self {
            active: RwLock::new(Arc::new(library)),
        }
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RuleLibrary> {
        Arc::clone(&self.active.read())
    }

    /// Make `library` the active snapshot. Its version must be newer.
    pub fn publish(&self, library: RuleLibrary) -> Result<(), PabloError> {
        let mut active = self.active.write();
        if library.version() <= active.version() {
            return Err(PabloError::RuleFile(format!(
                "library version {} does not supersede {}",
                library.version(),
                active.version()
            )));
        }
        tracing::info!(
            version = library.version(),
            rules = library.len(),
            fingerprint = library.fingerprint(),
            "published rule library"
        );
        *active = Arc::new(library);
        Ok(())
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new(RuleLibrary::empty())
    }
}

// =============================================================================
// TESTS
// =============================================================================
