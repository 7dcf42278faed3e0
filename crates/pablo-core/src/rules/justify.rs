//! # Justify
//!
//! Walks the justification trail backwards from one element: the firing that
//! produced it, then the firings that produced that firing's bindings, and so
//! on, breadth-first, up to `MAX_JUSTIFY_DEPTH` levels.

use crate::graph::Graph;
use crate::primitives::MAX_JUSTIFY_DEPTH;
use crate::provenance::Justification;
use crate::types::{EdgeId, ElementRef, PabloError, RuleId};
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};

/// One link of a provenance chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvenanceStep {
    /// The element this firing touched.
    pub element: ElementRef,
    /// 0 for the queried element, +1 per antecedent hop.
    pub depth: u32,
    pub justification: Justification,
}

/// Provenance chain of `element`, nearest first.
///
/// Only firings recorded before the firing that consumed an element count as
/// its causes. With `rule` set the chain starts at that rule's first firing on
/// the element and is empty when it never fired there. Elements without
/// firings (input tokens) end their branch.
#[must_use]
pub fn justify(graph: &Graph, element: ElementRef, rule: Option<RuleId>) -> Vec<ProvenanceStep> {
    let mut steps = Vec::new();
    let mut seen: BTreeSet<usize> = BTreeSet::new();
    // (element, depth, only firings before this trail index)
    let mut queue: VecDeque<(ElementRef, u32, usize)> = VecDeque::new();

    match rule {
        Some(rule) => {
            let Some((index, first)) =
                firings(graph, element).find(|(_, j)| j.rule_id == rule)
            else {
                return steps;
            };
            seen.insert(index);
            steps.push(ProvenanceStep {
                element,
                depth: 0,
                justification: first.clone(),
            });
            enqueue(&mut queue, first, 1, index);
        }
        None => queue.push_back((element, 0, usize::MAX)),
    }

    while let Some((current, depth, before)) = queue.pop_front() {
        if depth as usize > MAX_JUSTIFY_DEPTH {
            continue;
        }
        for (index, justification) in firings(graph, current) {
            if index >= before || !justification.outcome.took_effect() || !seen.insert(index) {
                continue;
            }
            steps.push(ProvenanceStep {
                element: current,
                depth,
                justification: justification.clone(),
            });
            enqueue(&mut queue, justification, depth + 1, index);
        }
    }
    steps
}

/// Trail entries targeting `element`, with their trail index.
fn firings(graph: &Graph, element: ElementRef) -> impl Iterator<Item = (usize, &Justification)> {
    graph
        .provenance
        .get(&element)
        .into_iter()
        .flatten()
        .filter_map(move |&i| graph.trail.get(i as usize).map(|j| (i as usize, j)))
}

fn enqueue(
    queue: &mut VecDeque<(ElementRef, u32, usize)>,
    justification: &Justification,
    depth: u32,
    index: usize,
) {
    for &antecedent in &justification.bindings {
        queue.push_back((antecedent, depth, index));
    }
}

/// `justify` for an edge handle.
pub fn justify_edge(
    graph: &Graph,
    edge: EdgeId,
    rule: Option<RuleId>,
) -> Result<Vec<ProvenanceStep>, PabloError> {
    graph.edge(edge)?;
    Ok(justify(graph, ElementRef::Edge(edge), rule))
}
