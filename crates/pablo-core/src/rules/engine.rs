//! # Rule Engine
//!
//! Runs a library snapshot over one graph, phase by phase.
//!
//! A phase makes passes over its rules in execution order until a pass fires
//! nothing (fixpoint) or the iteration cap is hit, which flags the phase as
//! truncated on the graph. Each firing is recorded as a `Justification`.
//!
//! ## Refraction
//!
//! A rule fires at most once per distinct binding per graph. The refraction
//! set is seeded from the graph's trail, so re-running a phase on a graph
//! that already went through it changes nothing.
//!
//! ## Conflicts
//!
//! Writes to a node flag bit, edge flag bit or label are claimed for the whole
//! phase. A write that disagrees with the claimant is resolved by kind:
//! constitutive beats regulatory, equal kinds keep the first claimant. The
//! loser is recorded as `Overridden` and a `ConflictRecord` is reported.
//!
//! ## Budgets
//!
//! Soft guard failures are bent with slack while the graph's slack budget
//! lasts and rejected after. A phase that runs past its soft time budget stops
//! where it is and marks the graph `INCOMPLETE`.

use super::matcher::{Binding, GuardVerdict, check_guards, find_bindings, still_matches};
use super::{Action, Rule, RuleLibrary, VarRef};
use crate::confidence::{Confidence, derive_confidence};
use crate::graph::Graph;
use crate::primitives::{DEFAULT_ITERATION_CAP, DEFAULT_SLACK_BUDGET};
use crate::provenance::{ApplyOutcome, Justification, RejectReason, RuleScores};
use crate::types::{
    EdgeId, ElementRef, NodeId, PabloError, Phase, RuleId, RuleKind, Span, edge_flags,
    graph_status, node_flags,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

// =============================================================================
// CONFIG & REPORTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Passes per phase before the phase is flagged truncated.
    pub iteration_cap: u32,
    /// Total slack penalty one graph may accumulate.
    pub slack_budget: u32,
    /// Soft wall-clock budget per phase.
    pub phase_time_budget: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            iteration_cap: DEFAULT_ITERATION_CAP,
            slack_budget: DEFAULT_SLACK_BUDGET,
            phase_time_budget: None,
        }
    }
}

/// A claimable field of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ClaimField {
    NodeFlag(u16),
    EdgeFlag(u16),
    /// Node label or edge attribute.
    Label,
}

/// Two rules disagreed on one field in one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictRecord {
    pub phase: Phase,
    pub pass: u32,
    pub target: ElementRef,
    pub field: ClaimField,
    pub winner: RuleId,
    pub loser: RuleId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub passes: u32,
    /// Firings that took effect, slack ones included.
    pub firings: u32,
    pub slack_firings: u32,
    pub rejected: u32,
    pub overridden: u32,
    pub conflicts: Vec<ConflictRecord>,
    /// The iteration cap was reached.
    pub truncated: bool,
    /// The time budget ran out; the graph is `INCOMPLETE`.
    pub timed_out: bool,
}

impl PhaseReport {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            passes: 0,
            firings: 0,
            slack_firings: 0,
            rejected: 0,
            overridden: 0,
            conflicts: Vec::new(),
            truncated: false,
            timed_out: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub library_version: u64,
    pub phases: Vec<PhaseReport>,
}

impl RunReport {
    pub fn conflicts(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.phases.iter().flat_map(|p| p.conflicts.iter())
    }

    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.phases.iter().any(|p| p.timed_out)
    }

    #[must_use]
    pub fn firings(&self) -> u32 {
        self.phases.iter().map(|p| p.firings).sum()
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Applies one library snapshot. Cheap to clone; holds no graph state.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    library: Arc<RuleLibrary>,
    config: EngineConfig,
}

impl RuleEngine {
    #[must_use]
    pub fn new(library: Arc<RuleLibrary>, config: EngineConfig) -> Self {
        Self { library, config }
    }

    #[must_use]
    pub fn library(&self) -> &RuleLibrary {
        &self.library
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run every phase in order. Stops after a phase that timed out.
    pub fn run_all_phases(&self, graph: &mut Graph) -> Result<RunReport, PabloError> {
        let mut phases = Vec::with_capacity(Phase::ALL.len());
        for &phase in Phase::ALL {
            let report = self.run_rules(graph, phase)?;
            let timed_out = report.timed_out;
            phases.push(report);
            if timed_out {
                break;
            }
        }
        Ok(RunReport {
            library_version: self.library.version(),
            phases,
        })
    }

    /// Run one phase to fixpoint, the iteration cap or the time budget.
    pub fn run_rules(&self, graph: &mut Graph, phase: Phase) -> Result<PhaseReport, PabloError> {
        if !graph.is_finalized() {
            return Err(PabloError::SchemaViolation(
                "rules run on finalized graphs only".to_string(),
            ));
        }

        let started = Instant::now();
        let mut refracted: BTreeSet<(RuleId, Vec<ElementRef>)> = graph
            .trail()
            .iter()
            .map(|j| (j.rule_id, j.bindings.clone()))
            .collect();
        let mut run = PhaseRun::new(graph, phase);
        let mut progressed = false;

        for pass in 1..=self.config.iteration_cap {
            run.pass = pass;
            run.report.passes = pass;
            progressed = false;

            for rule in self.library.phase_order(phase) {
                if self
                    .config
                    .phase_time_budget
                    .is_some_and(|budget| started.elapsed() >= budget)
                {
                    run.time_out();
                    return Ok(run.finish());
                }

                for binding in find_bindings(run.graph, rule) {
                    let elements = binding.elements();
                    let key = (rule.id, elements);
                    if refracted.contains(&key) || !still_matches(run.graph, rule, &binding) {
                        continue;
                    }
                    let outcome = match check_guards(run.graph, &rule.guards, &binding) {
                        GuardVerdict::HardFail => continue,
                        GuardVerdict::Pass => ApplyOutcome::Applied,
                        GuardVerdict::SoftFail => match rule.slack_penalty {
                            None => continue,
                            Some(penalty) => self.bend(run.graph, penalty),
                        },
                    };
                    let elements = key.1.clone();
                    refracted.insert(key);
                    progressed = true;
                    run.fire(rule, &binding, elements, outcome)?;
                }
            }

            if !progressed {
                break;
            }
        }

        if progressed {
            run.truncate();
        }
        Ok(run.finish())
    }

    fn bend(&self, graph: &Graph, penalty: u16) -> ApplyOutcome {
        let spent = u64::from(graph.slack_spent());
        if spent + u64::from(penalty) <= u64::from(self.config.slack_budget) {
            ApplyOutcome::AppliedWithSlack { penalty }
        } else {
            ApplyOutcome::Rejected {
                reason: RejectReason::SlackExhausted,
            }
        }
    }
}

// =============================================================================
// PHASE STATE
// =============================================================================

#[derive(Debug)]
struct Claim {
    rule: RuleId,
    kind: RuleKind,
    version: u32,
    scores: RuleScores,
    bindings: Vec<ElementRef>,
    value: u32,
}

/// A losing write, recorded after the firing that produced it.
#[derive(Debug)]
struct Loss {
    justification: Justification,
}

#[derive(Debug)]
struct PhaseRun<'g> {
    graph: &'g mut Graph,
    phase: Phase,
    pass: u32,
    claims: BTreeMap<(ElementRef, ClaimField), Claim>,
    report: PhaseReport,
}

impl<'g> PhaseRun<'g> {
    fn new(graph: &'g mut Graph, phase: Phase) -> Self {
        Self {
            graph,
            phase,
            pass: 0,
            claims: BTreeMap::new(),
            report: PhaseReport::new(phase),
        }
    }

    fn justification(
        &self,
        rule: &Rule,
        outcome: ApplyOutcome,
        bindings: Vec<ElementRef>,
        targets: Vec<ElementRef>,
    ) -> Justification {
        Justification {
            rule_id: rule.id,
            rule_version: rule.version,
            phase: self.phase,
            pass: self.pass,
            outcome,
            scores: rule.scores,
            bindings,
            targets,
        }
    }

    fn fire(
        &mut self,
        rule: &Rule,
        binding: &Binding,
        bindings: Vec<ElementRef>,
        outcome: ApplyOutcome,
    ) -> Result<(), PabloError> {
        if let ApplyOutcome::Rejected { .. } = outcome {
            tracing::warn!(
                rule = %rule.id,
                phase = %self.phase,
                slack_spent = self.graph.slack_spent(),
                "slack budget exhausted, rule application rejected"
            );
            self.report.rejected += 1;
            let record = self.justification(rule, outcome, bindings, Vec::new());
            self.graph.record(record);
            return Ok(());
        }
        if let ApplyOutcome::AppliedWithSlack { penalty } = outcome {
            self.graph.spend_slack(u32::from(penalty));
            self.report.slack_firings += 1;
            tracing::debug!(rule = %rule.id, penalty, "applied with slack");
        }

        let confidence = derive_confidence(
            binding
                .nodes
                .iter()
                .filter_map(|&id| self.graph.node(id).ok().map(|n| n.confidence)),
            rule.scores.precision,
        );

        let mut targets = Vec::new();
        let mut losses = Vec::new();
        let mut created: Vec<NodeId> = Vec::new();

        for action in &rule.actions {
            self.apply(
                rule,
                action,
                binding,
                &bindings,
                confidence,
                &mut created,
                &mut targets,
                &mut losses,
            )?;
        }

        self.report.firings += 1;
        let record = self.justification(rule, outcome, bindings, targets);
        self.graph.record(record);
        for loss in losses {
            self.report.overridden += 1;
            self.graph.record(loss.justification);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn apply(
        &mut self,
        rule: &Rule,
        action: &Action,
        binding: &Binding,
        bindings: &[ElementRef],
        confidence: Confidence,
        created: &mut Vec<NodeId>,
        targets: &mut Vec<ElementRef>,
        losses: &mut Vec<Loss>,
    ) -> Result<(), PabloError> {
        let resolve = |var: &VarRef, created: &[NodeId]| match *var {
            VarRef::Bound(i) => binding.nodes[i],
            VarRef::New(i) => created[i],
        };

        match action {
            Action::AddNode {
                n_type,
                sub_type,
                label,
                flags,
                span_of,
            } => {
                let mut span: Option<Span> = None;
                for &i in span_of {
                    let s = self.graph.node(binding.nodes[i])?.span;
                    span = Some(span.map_or(s, |acc| acc.cover(s)));
                }
                let id = self
                    .graph
                    .push_node(*n_type, *sub_type, span.unwrap_or_default(), None)?;
                let node = self.graph.node_mut(id)?;
                node.label = *label;
                node.flags = *flags;
                node.confidence = confidence;
                created.push(id);
                targets.push(ElementRef::Node(id));
            }
            Action::AddEdge {
                src,
                dst,
                e_type,
                attr,
                weight,
                flags,
            } => {
                let (src, dst) = (resolve(src, &created[..]), resolve(dst, &created[..]));
                let exists = self
                    .graph
                    .outgoing(src)
                    .any(|e| e.dst == dst && e.e_type == *e_type && e.attr == *attr);
                if !exists {
                    let id = self.graph.push_edge(src, dst, *e_type, *weight)?;
                    let edge = self.graph.edge_mut(id)?;
                    edge.attr = *attr;
                    edge.flags = *flags;
                    edge.confidence = confidence;
                    targets.push(ElementRef::Edge(id));
                }
            }
            Action::RemoveNode { node } => {
                let id = binding.nodes[*node];
                let target = ElementRef::Node(id);
                let field = ClaimField::NodeFlag(node_flags::RETRACTED);
                if self.claim(rule, bindings, target, field, 1, losses) {
                    let edges = self.graph.retract_node(id)?;
                    targets.push(target);
                    targets.extend(edges.into_iter().map(ElementRef::Edge));
                }
            }
            Action::RemoveEdge { edge } => {
                let id = binding.edges[*edge];
                let target = ElementRef::Edge(id);
                let field = ClaimField::EdgeFlag(edge_flags::RETRACTED);
                if self.claim(rule, bindings, target, field, 1, losses) {
                    self.graph.edge_mut(id)?.flags |= edge_flags::RETRACTED;
                    targets.push(target);
                }
            }
            Action::SetNodeFlag { node, flag, value } => {
                let id = binding.nodes[*node];
                let target = ElementRef::Node(id);
                for bit in bits(*flag) {
                    let field = ClaimField::NodeFlag(bit);
                    if self.claim(rule, bindings, target, field, u32::from(*value), losses) {
                        let node = self.graph.node_mut(id)?;
                        set_bit(&mut node.flags, bit, *value);
                        push_once(targets, target);
                    }
                }
            }
            Action::SetEdgeFlag { edge, flag, value } => {
                let id = binding.edges[*edge];
                let target = ElementRef::Edge(id);
                for bit in bits(*flag) {
                    let field = ClaimField::EdgeFlag(bit);
                    if self.claim(rule, bindings, target, field, u32::from(*value), losses) {
                        let edge = self.graph.edge_mut(id)?;
                        set_bit(&mut edge.flags, bit, *value);
                        push_once(targets, target);
                    }
                }
            }
            Action::SetLabel { node, label } => {
                let id = binding.nodes[*node];
                let target = ElementRef::Node(id);
                if self.claim(rule, bindings, target, ClaimField::Label, label.0, losses) {
                    self.graph.node_mut(id)?.label = *label;
                    push_once(targets, target);
                }
            }
            Action::SetEdgeLabel { edge, attr } => {
                let id: EdgeId = binding.edges[*edge];
                let target = ElementRef::Edge(id);
                if self.claim(rule, bindings, target, ClaimField::Label, attr.0, losses) {
                    self.graph.edge_mut(id)?.attr = *attr;
                    push_once(targets, target);
                }
            }
        }
        Ok(())
    }

    /// Whether `rule` may write `value` to `field` of `target`. Losing writes
    /// and losing claimants are queued in `losses`.
    fn claim(
        &mut self,
        rule: &Rule,
        bindings: &[ElementRef],
        target: ElementRef,
        field: ClaimField,
        value: u32,
        losses: &mut Vec<Loss>,
    ) -> bool {
        let key = (target, field);
        let challenger = Claim {
            rule: rule.id,
            kind: rule.kind,
            version: rule.version,
            scores: rule.scores,
            bindings: bindings.to_vec(),
            value,
        };
        let Some(held) = self.claims.get(&key) else {
            self.claims.insert(key, challenger);
            return true;
        };
        if held.value == value {
            return true;
        }

        let challenger_wins =
            challenger.kind == RuleKind::Constitutive && held.kind == RuleKind::Regulatory;
        let (winner, loser) = if challenger_wins {
            (&challenger, held)
        } else {
            (held, &challenger)
        };

        tracing::warn!(
            winner = %winner.rule,
            loser = %loser.rule,
            target = %target,
            field = ?field,
            phase = %self.phase,
            "rule conflict"
        );
        self.report.conflicts.push(ConflictRecord {
            phase: self.phase,
            pass: self.pass,
            target,
            field,
            winner: winner.rule,
            loser: loser.rule,
        });
        losses.push(Loss {
            justification: Justification {
                rule_id: loser.rule,
                rule_version: loser.version,
                phase: self.phase,
                pass: self.pass,
                outcome: ApplyOutcome::Overridden { by: winner.rule },
                scores: loser.scores,
                bindings: loser.bindings.clone(),
                targets: vec![target],
            },
        });

        if challenger_wins {
            self.claims.insert(key, challenger);
        }
        challenger_wins
    }

    fn truncate(&mut self) {
        self.report.truncated = true;
        self.graph.set_status(self.phase.truncated_flag());
        tracing::warn!(
            phase = %self.phase,
            passes = self.report.passes,
            graph_id = self.graph.graph_id().0,
            "iteration cap reached, phase truncated"
        );
    }

    fn time_out(&mut self) {
        self.report.timed_out = true;
        self.graph.set_status(graph_status::INCOMPLETE);
        tracing::warn!(
            phase = %self.phase,
            pass = self.pass,
            graph_id = self.graph.graph_id().0,
            "phase time budget exceeded, graph marked incomplete"
        );
    }

    fn finish(self) -> PhaseReport {
        tracing::debug!(
            phase = %self.phase,
            passes = self.report.passes,
            firings = self.report.firings,
            conflicts = self.report.conflicts.len(),
            "phase finished"
        );
        self.report
    }
}

/// The single-bit masks of `mask`, low to high.
fn bits(mask: u16) -> impl Iterator<Item = u16> {
    (0..16).map(|i| 1u16 << i).filter(move |bit| mask & bit != 0)
}

fn set_bit(flags: &mut u16, bit: u16, on: bool) {
    if on {
        *flags |= bit;
    } else {
        *flags &= !bit;
    }
}

fn push_once(targets: &mut Vec<ElementRef>, target: ElementRef) {
    if !targets.contains(&target) {
        targets.push(target);
    }
}

// =============================================================================
// TESTS
// =============================================================================
