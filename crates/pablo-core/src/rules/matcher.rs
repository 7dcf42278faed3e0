//! Pattern matching and guard evaluation.
//!
//! Node variables are bound injectively by backtracking over live nodes in
//! id order; edge patterns are checked as soon as both endpoints are bound and
//! enumerated once every node variable is bound. The enumeration order is a
//! pure function of the graph, so the bindings come out in the same order on
//! every run.

use super::{Condition, EdgePattern, Guard, NodePattern, Rule};
use crate::graph::{Edge, Graph, Node};
use crate::primitives::MAX_BINDINGS_PER_RULE;
use crate::types::{EdgeId, EdgeType, ElementRef, NodeId, NodeType, node_flags};

/// One satisfying assignment of a rule's variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Binding {
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) edges: Vec<EdgeId>,
}

impl Binding {
    /// Bound elements: nodes first, then edges.
    pub(crate) fn elements(&self) -> Vec<ElementRef> {
        self.nodes
            .iter()
            .map(|&n| ElementRef::Node(n))
            .chain(self.edges.iter().map(|&e| ElementRef::Edge(e)))
            .collect()
    }
}

fn node_matches(node: &Node, pattern: &NodePattern) -> bool {
    !node.is_retracted()
        && pattern.n_type.is_none_or(|t| node.n_type == t)
        && pattern.sub_type.is_none_or(|s| node.sub_type == s)
        && pattern.label.is_none_or(|l| node.label == l)
        && node.flags & pattern.all_flags == pattern.all_flags
        && node.flags & pattern.no_flags == 0
}

fn edge_matches(edge: &Edge, pattern: &EdgePattern, src: NodeId, dst: NodeId) -> bool {
    !edge.is_retracted()
        && edge.src == src
        && edge.dst == dst
        && pattern.e_type.is_none_or(|t| edge.e_type == t)
        && pattern.attr.is_none_or(|a| edge.attr == a)
        && edge.flags & pattern.all_flags == pattern.all_flags
        && edge.flags & pattern.no_flags == 0
}

fn candidate_edges<'g>(
    graph: &'g Graph,
    pattern: &'g EdgePattern,
    nodes: &[NodeId],
) -> impl Iterator<Item = &'g Edge> + 'g {
    let (src, dst) = (nodes[pattern.src], nodes[pattern.dst]);
    graph
        .outgoing(src)
        .filter(move |e| edge_matches(e, pattern, src, dst))
}

/// Every binding of `rule`'s pattern in `graph`, capped at
/// `MAX_BINDINGS_PER_RULE`. Guards are not evaluated here.
pub(crate) fn find_bindings(graph: &Graph, rule: &Rule) -> Vec<Binding> {
    let candidates: Vec<Vec<NodeId>> = rule
        .nodes
        .iter()
        .map(|pattern| {
            graph
                .nodes()
                .iter()
                .filter(|n| node_matches(n, pattern))
                .map(|n| n.id)
                .collect()
        })
        .collect();

    let mut out = Vec::new();
    let mut bound = Vec::with_capacity(rule.nodes.len());
    bind_nodes(graph, rule, &candidates, &mut bound, &mut out);
    out
}

fn bind_nodes(
    graph: &Graph,
    rule: &Rule,
    candidates: &[Vec<NodeId>],
    bound: &mut Vec<NodeId>,
    out: &mut Vec<Binding>,
) {
    if out.len() >= MAX_BINDINGS_PER_RULE {
        return;
    }
    let depth = bound.len();
    if depth == candidates.len() {
        let mut edges = Vec::with_capacity(rule.edges.len());
        bind_edges(graph, rule, bound, &mut edges, out);
        return;
    }
    for &candidate in &candidates[depth] {
        if bound.contains(&candidate) {
            continue;
        }
        bound.push(candidate);
        // prune on edge patterns whose endpoints are now both bound
        let reachable = rule
            .edges
            .iter()
            .filter(|p| p.src.max(p.dst) == depth)
            .all(|p| candidate_edges(graph, p, bound).next().is_some());
        if reachable {
            bind_nodes(graph, rule, candidates, bound, out);
        }
        bound.pop();
    }
}

fn bind_edges(
    graph: &Graph,
    rule: &Rule,
    nodes: &[NodeId],
    bound: &mut Vec<EdgeId>,
    out: &mut Vec<Binding>,
) {
    if out.len() >= MAX_BINDINGS_PER_RULE {
        return;
    }
    let depth = bound.len();
    let Some(pattern) = rule.edges.get(depth) else {
        out.push(Binding {
            nodes: nodes.to_vec(),
            edges: bound.clone(),
        });
        return;
    };
    for edge in candidate_edges(graph, pattern, nodes) {
        if bound.contains(&edge.id) {
            continue;
        }
        bound.push(edge.id);
        bind_edges(graph, rule, nodes, bound, out);
        bound.pop();
    }
}

/// Whether `binding` still satisfies the pattern. Earlier firings in the same
/// pass may have retracted or relabelled bound elements.
pub(crate) fn still_matches(graph: &Graph, rule: &Rule, binding: &Binding) -> bool {
    let nodes_ok = rule.nodes.iter().zip(&binding.nodes).all(|(pattern, &id)| {
        graph
            .node(id)
            .is_ok_and(|node| node_matches(node, pattern))
    });
    nodes_ok
        && rule.edges.iter().zip(&binding.edges).all(|(pattern, &id)| {
            graph.edge(id).is_ok_and(|edge| {
                edge_matches(
                    edge,
                    pattern,
                    binding.nodes[pattern.src],
                    binding.nodes[pattern.dst],
                )
            })
        })
}

// =============================================================================
// GUARDS
// =============================================================================

/// Result of evaluating a rule's guards on one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GuardVerdict {
    Pass,
    /// Only soft guards failed.
    SoftFail,
    HardFail,
}

pub(crate) fn check_guards(graph: &Graph, guards: &[Guard], binding: &Binding) -> GuardVerdict {
    let mut verdict = GuardVerdict::Pass;
    for guard in guards {
        if holds(graph, &guard.cond, &binding.nodes) {
            continue;
        }
        if !guard.soft {
            return GuardVerdict::HardFail;
        }
        verdict = GuardVerdict::SoftFail;
    }
    verdict
}

fn holds(graph: &Graph, cond: &Condition, nodes: &[NodeId]) -> bool {
    let node = |i: usize| graph.node(nodes[i]).ok();
    match *cond {
        Condition::Precedes { a, b } => match (node(a), node(b)) {
            (Some(a), Some(b)) => a.span.start < b.span.start,
            _ => false,
        },
        Condition::Adjacent { a, b } => graph
            .find_edge(nodes[a], nodes[b], EdgeType::Next)
            .is_some(),
        Condition::NoEdge { src, dst, e_type } => !graph
            .outgoing(nodes[src])
            .any(|e| e.dst == nodes[dst] && e_type.is_none_or(|t| e.e_type == t)),
        Condition::NoIncoming { node, e_type, attr } => !graph.incoming(nodes[node]).any(|e| {
            e_type.is_none_or(|t| e.e_type == t) && attr.is_none_or(|l| e.attr == l)
        }),
        Condition::NoOutgoing { node, e_type, attr } => !graph.outgoing(nodes[node]).any(|e| {
            e_type.is_none_or(|t| e.e_type == t) && attr.is_none_or(|l| e.attr == l)
        }),
        Condition::HasFlag { node: i, flag } => node(i).is_some_and(|n| n.has_flags(flag)),
        Condition::LacksFlag { node: i, flag } => node(i).is_some_and(|n| n.flags & flag == 0),
        Condition::LabelIs { node: i, label } => node(i).is_some_and(|n| n.label == label),
        Condition::SameSentence { a, b } => match (node(a), node(b)) {
            (Some(a), Some(b)) => {
                let starts = sentence_starts(graph);
                let sentence = |offset: u32| starts.partition_point(|&s| s <= offset);
                sentence(a.span.start) == sentence(b.span.start)
            }
            _ => false,
        },
    }
}

/// Start offsets of every sentence after the first, ascending.
///
/// A strong end closes its sentence together with the weak closers right
/// after it. Any other weak end is an ellipsis: it closes the sentence when
/// the next token that is not punctuation is capitalized, or when nothing
/// follows.
fn sentence_starts(graph: &Graph) -> Vec<u32> {
    let mut tokens: Vec<&Node> = graph
        .live_nodes()
        .filter(|n| n.n_type == NodeType::Token)
        .collect();
    tokens.sort_by_key(|n| (n.span.start, n.id));

    let is_punctuation =
        |n: &Node| n.flags & (node_flags::IS_PUNCT | node_flags::SENT_END_WEAK) != 0;
    let mut starts = Vec::new();
    let mut k = 0;
    while k < tokens.len() {
        let token = tokens[k];
        k += 1;
        if token.has_flags(node_flags::SENT_END_STRONG) {
            while k < tokens.len() && tokens[k].has_flags(node_flags::SENT_END_WEAK) {
                k += 1;
            }
            if let Some(next) = tokens.get(k) {
                starts.push(next.span.start);
            }
        } else if token.has_flags(node_flags::SENT_END_WEAK) {
            let next_word = tokens[k..].iter().find(|&&n| !is_punctuation(n));
            if next_word.is_none_or(|n| n.has_flags(node_flags::IS_CAPITALIZED))
                && let Some(next) = tokens.get(k)
            {
                starts.push(next.span.start);
            }
        }
    }
    starts
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::confidence::Weight;
    use crate::provenance::RuleScores;
    use crate::rules::{Action, RuleMeta};
    use crate::types::{Phase, Pos, RuleId, RuleKind, SchemaId, SourceId, Span};

    fn node_var(var: &str, pos: Pos) -> NodePattern {
        NodePattern {
            var: var.to_string(),
            n_type: Some(NodeType::Token),
            sub_type: Some(pos.code()),
            label: None,
            all_flags: 0,
            no_flags: 0,
        }
    }

    fn rule_with(nodes: Vec<NodePattern>, edges: Vec<EdgePattern>, guards: Vec<Guard>) -> Rule {
        Rule {
            id: RuleId(1),
            name: "test".to_string(),
            version: 1,
            phase: Phase::Syntax,
            kind: RuleKind::Constitutive,
            scores: RuleScores::default(),
            slack_penalty: None,
            meta: RuleMeta::default(),
            nodes,
            edges,
            guards,
            actions: vec![Action::RemoveNode { node: 0 }],
        }
    }

    /// NOUN VERB NOUN "." with NEXT edges; the period ends the sentence.
    fn sentence() -> Graph {
        let mut builder = GraphBuilder::create_graph(SourceId(1), SchemaId::Writing);
        let tags = [Pos::Noun, Pos::Verb, Pos::Noun, Pos::Punct, Pos::Noun];
        let mut ids = Vec::new();
        for (i, pos) in tags.iter().enumerate() {
            let start = i as u32 * 4;
            ids.push(
                builder
                    .add_node(NodeType::Token, pos.code(), Span::new(start, start + 3), None)
                    .expect("node"),
            );
        }
        for pair in ids.windows(2) {
            builder
                .add_edge(pair[0], pair[1], EdgeType::Next, Weight::FULL)
                .expect("edge");
        }
        builder
            .set_flag(ids[3], node_flags::SENT_END_STRONG, true)
            .expect("flag");
        builder.finalize().expect("finalize")
    }

    #[test]
    fn bindings_are_injective_and_ordered() {
        let graph = sentence();
        let rule = rule_with(
            vec![node_var("a", Pos::Noun), node_var("b", Pos::Noun)],
            Vec::new(),
            Vec::new(),
        );
        let bindings = find_bindings(&graph, &rule);
        let pairs: Vec<(u32, u32)> = bindings.iter().map(|b| (b.nodes[0].0, b.nodes[1].0)).collect();
        assert_eq!(pairs, vec![(0, 2), (0, 4), (2, 0), (2, 4), (4, 0), (4, 2)]);
    }

    #[test]
    fn edge_patterns_restrict_bindings() {
        let graph = sentence();
        let rule = rule_with(
            vec![node_var("n", Pos::Noun), node_var("v", Pos::Verb)],
            vec![EdgePattern {
                var: Some("e".to_string()),
                src: 0,
                dst: 1,
                e_type: Some(EdgeType::Next),
                attr: None,
                all_flags: 0,
                no_flags: 0,
            }],
            Vec::new(),
        );
        let bindings = find_bindings(&graph, &rule);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].edges, vec![EdgeId(0)]);
        assert_eq!(
            bindings[0].elements(),
            vec![
                ElementRef::Node(NodeId(0)),
                ElementRef::Node(NodeId(1)),
                ElementRef::Edge(EdgeId(0))
            ]
        );
    }

    #[test]
    fn soft_and_hard_guards() {
        let graph = sentence();
        let binding = Binding {
            nodes: vec![NodeId(2), NodeId(1)],
            edges: Vec::new(),
        };
        let precedes = Condition::Precedes { a: 0, b: 1 };
        let hard = [Guard {
            cond: precedes.clone(),
            soft: false,
        }];
        let soft = [Guard {
            cond: precedes,
            soft: true,
        }];
        assert_eq!(check_guards(&graph, &hard, &binding), GuardVerdict::HardFail);
        assert_eq!(check_guards(&graph, &soft, &binding), GuardVerdict::SoftFail);
        assert_eq!(check_guards(&graph, &[], &binding), GuardVerdict::Pass);
    }

    #[test]
    fn same_sentence_stops_at_strong_boundary() {
        let graph = sentence();
        let within = [NodeId(0), NodeId(2)];
        let across = [NodeId(2), NodeId(4)];
        let cond = Condition::SameSentence { a: 0, b: 1 };
        assert!(holds(&graph, &cond, &within));
        assert!(!holds(&graph, &cond, &across));
    }

    /// Tokens `(pos, flags)` laid out four bytes apart.
    fn tokens(spec: &[(Pos, u16)]) -> Graph {
        let mut builder = GraphBuilder::create_graph(SourceId(1), SchemaId::Writing);
        for (i, &(pos, flags)) in spec.iter().enumerate() {
            let start = i as u32 * 4;
            let id = builder
                .add_node(NodeType::Token, pos.code(), Span::new(start, start + 3), None)
                .expect("node");
            if flags != 0 {
                builder.set_flag(id, flags, true).expect("flag");
            }
        }
        builder.finalize().expect("finalize")
    }

    #[test]
    fn closing_quote_stays_with_the_strong_end() {
        // Go . " Next
        let graph = tokens(&[
            (Pos::Verb, node_flags::IS_CAPITALIZED),
            (Pos::Punct, node_flags::IS_PUNCT | node_flags::SENT_END_STRONG),
            (Pos::Punct, node_flags::IS_PUNCT | node_flags::SENT_END_WEAK),
            (Pos::Adv, node_flags::IS_CAPITALIZED),
        ]);
        assert_eq!(sentence_starts(&graph), vec![12]);
        let cond = Condition::SameSentence { a: 0, b: 1 };
        assert!(holds(&graph, &cond, &[NodeId(0), NodeId(2)]));
        assert!(holds(&graph, &cond, &[NodeId(1), NodeId(2)]));
        assert!(!holds(&graph, &cond, &[NodeId(2), NodeId(3)]));
    }

    #[test]
    fn ellipsis_ends_sentence_before_capital() {
        // Wait … Then
        let graph = tokens(&[
            (Pos::Verb, node_flags::IS_CAPITALIZED),
            (Pos::Punct, node_flags::IS_PUNCT | node_flags::SENT_END_WEAK),
            (Pos::Adv, node_flags::IS_CAPITALIZED),
        ]);
        let cond = Condition::SameSentence { a: 0, b: 1 };
        assert!(holds(&graph, &cond, &[NodeId(0), NodeId(1)]));
        assert!(!holds(&graph, &cond, &[NodeId(1), NodeId(2)]));

        // Wait … then
        let lower = tokens(&[
            (Pos::Verb, node_flags::IS_CAPITALIZED),
            (Pos::Punct, node_flags::IS_PUNCT | node_flags::SENT_END_WEAK),
            (Pos::Adv, 0),
        ]);
        assert!(sentence_starts(&lower).is_empty());
        assert!(holds(&lower, &cond, &[NodeId(0), NodeId(2)]));
    }

    #[test]
    fn adjacency_and_missing_edges() {
        let graph = sentence();
        let nodes = [NodeId(1), NodeId(2)];
        assert!(holds(&graph, &Condition::Adjacent { a: 0, b: 1 }, &nodes));
        assert!(!holds(&graph, &Condition::Adjacent { a: 1, b: 0 }, &nodes));
        assert!(holds(
            &graph,
            &Condition::NoEdge {
                src: 1,
                dst: 0,
                e_type: None
            },
            &nodes
        ));
        assert!(!holds(
            &graph,
            &Condition::NoIncoming {
                node: 1,
                e_type: Some(EdgeType::Next),
                attr: None
            },
            &nodes
        ));
    }

    #[test]
    fn retracted_binding_no_longer_matches() {
        let mut graph = sentence();
        let rule = rule_with(vec![node_var("n", Pos::Noun)], Vec::new(), Vec::new());
        let bindings = find_bindings(&graph, &rule);
        assert_eq!(bindings.len(), 3);
        graph.retract_node(NodeId(2)).expect("retract");
        assert!(still_matches(&graph, &rule, &bindings[0]));
        assert!(!still_matches(&graph, &rule, &bindings[1]));
    }
}
