//! # Provenance Records
//!
//! Every rule firing leaves a `Justification` on the graph it mutated. The
//! graph indexes them by the elements they created or touched, which is all
//! `justify` needs: provenance is read back, never recomputed.

use crate::types::{ElementRef, Phase, RuleId};
use serde::{Deserialize, Serialize};

/// Scores attached to a rule, copied into each of its justifications.
///
/// `precision` and `coverage` are per-mille.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct RuleScores {
    pub support: u32,
    pub precision: u16,
    pub coverage: u16,
    pub mdl: u32,
}

/// Why a firing was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    /// The rule needed slack and the graph's budget could not cover it.
    SlackExhausted,
}

/// Outcome of one rule application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplyOutcome {
    Applied,
    AppliedWithSlack { penalty: u16 },
    Rejected { reason: RejectReason },
    /// The action lost a conflict to the named rule and was not (or no longer) in effect.
    Overridden { by: RuleId },
}

impl ApplyOutcome {
    /// True when the firing's actions took effect.
    #[must_use]
    pub const fn took_effect(self) -> bool {
        matches!(self, Self::Applied | Self::AppliedWithSlack { .. })
    }
}

/// One recorded rule firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Justification {
    pub rule_id: RuleId,
    pub rule_version: u32,
    pub phase: Phase,
    /// 1-based pass of the phase in which the rule fired.
    pub pass: u32,
    pub outcome: ApplyOutcome,
    pub scores: RuleScores,
    /// Bound elements: node variables first, then edge variables, in rule order.
    pub bindings: Vec<ElementRef>,
    /// Elements created or mutated by this firing.
    pub targets: Vec<ElementRef>,
}
