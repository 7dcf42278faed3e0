//! # Rule Files
//!
//! TOML front end for rules. A file holds any number of `[[rule]]` tables;
//! symbolic names (types, POS tags, flags) resolve through `SchemaRegistry`
//! and labels are interned into the vocabulary.
//!
//! ```toml
//! [[rule]]
//! rule_id = 100
//! name = "det-attaches-to-noun"
//! phase = "syntax"
//! kind = "constitutive"
//! scores = { support = 420, precision = 930, coverage = 310, mdl = 12 }
//!
//! [[rule.nodes]]
//! var = "d"
//! n_type = "token"
//! pos = "DET"
//!
//! [[rule.nodes]]
//! var = "n"
//! n_type = "token"
//! pos = "NOUN"
//!
//! [[rule.guards]]
//! adjacent = ["d", "n"]
//!
//! [[rule.actions]]
//! add_edge = { src = "n", dst = "d", e_type = "dep", label = "det" }
//! ```

use super::{
    Action, Condition, EdgePattern, Guard, NodePattern, Rule, RuleLibrary, RuleMeta, VarRef,
};
use crate::confidence::Weight;
use crate::primitives::DEFAULT_WEIGHT;
use crate::provenance::RuleScores;
use crate::schema::SchemaRegistry;
use crate::types::{LabelId, NodeType, PabloError, RuleId, edge_flags};
use crate::vocab::VocabStore;
use serde::Deserialize;
use std::path::Path;

// =============================================================================
// RAW TOML SHAPES
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFile {
    #[serde(default)]
    rule: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    rule_id: u32,
    name: String,
    #[serde(default = "first_version")]
    version: u32,
    phase: String,
    kind: String,
    #[serde(default)]
    slack_penalty: Option<u16>,
    #[serde(default)]
    scores: RawScores,
    #[serde(default)]
    provenance: RawMeta,
    #[serde(default)]
    nodes: Vec<RawNode>,
    #[serde(default)]
    edges: Vec<RawEdge>,
    #[serde(default)]
    guards: Vec<RawGuard>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

fn first_version() -> u32 {
    1
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawScores {
    #[serde(default)]
    support: u32,
    #[serde(default)]
    precision: u16,
    #[serde(default)]
    coverage: u16,
    #[serde(default)]
    mdl: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMeta {
    #[serde(default)]
    author: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    created: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNode {
    var: String,
    n_type: Option<String>,
    /// Shorthand for a token's `sub_type`.
    pos: Option<String>,
    sub_type: Option<String>,
    label: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    lacks_flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEdge {
    var: Option<String>,
    src: String,
    dst: String,
    e_type: Option<String>,
    label: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
    #[serde(default)]
    lacks_flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPair {
    src: String,
    dst: String,
    e_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawIncident {
    node: String,
    e_type: Option<String>,
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFlagRef {
    node: String,
    flag: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLabelRef {
    node: String,
    label: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGuard {
    #[serde(default)]
    soft: bool,
    precedes: Option<[String; 2]>,
    adjacent: Option<[String; 2]>,
    same_sentence: Option<[String; 2]>,
    no_edge: Option<RawPair>,
    no_incoming: Option<RawIncident>,
    no_outgoing: Option<RawIncident>,
    has_flag: Option<RawFlagRef>,
    lacks_flag: Option<RawFlagRef>,
    label_is: Option<RawLabelRef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAddNode {
    #[serde(rename = "as")]
    name: String,
    n_type: String,
    pos: Option<String>,
    sub_type: Option<String>,
    label: Option<String>,
    #[serde(default)]
    flags: Vec<String>,
    span_of: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAddEdge {
    src: String,
    dst: String,
    e_type: String,
    label: Option<String>,
    weight: Option<u8>,
    /// Defaults to `["directed"]`.
    flags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSetFlag {
    node: Option<String>,
    edge: Option<String>,
    flag: String,
    #[serde(default = "flag_on")]
    value: bool,
}

fn flag_on() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEdgeLabel {
    edge: String,
    label: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAction {
    add_node: Option<RawAddNode>,
    add_edge: Option<RawAddEdge>,
    remove_node: Option<String>,
    remove_edge: Option<String>,
    set_node_flag: Option<RawSetFlag>,
    set_edge_flag: Option<RawSetFlag>,
    set_label: Option<RawLabelRef>,
    set_edge_label: Option<RawEdgeLabel>,
}

// =============================================================================
// LOWERING
// =============================================================================

/// Variable names of one rule, in binding order.
struct Scope {
    nodes: Vec<String>,
    edges: Vec<Option<String>>,
    created: Vec<String>,
}

impl Scope {
    fn node(&self, name: &str) -> Result<usize, String> {
        self.nodes
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| format!("unknown node variable '{}'", name))
    }

    fn edge(&self, name: &str) -> Result<usize, String> {
        self.edges
            .iter()
            .position(|e| e.as_deref() == Some(name))
            .ok_or_else(|| format!("unknown edge variable '{}'", name))
    }

    fn var(&self, name: &str) -> Result<VarRef, String> {
        if let Some(i) = self.created.iter().position(|n| n == name) {
            return Ok(VarRef::New(i));
        }
        self.node(name).map(VarRef::Bound)
    }
}

struct Lowering<'a> {
    schema: SchemaRegistry,
    vocab: &'a VocabStore,
}

impl Lowering<'_> {
    fn label(&self, name: Option<&str>) -> Result<Option<LabelId>, PabloError> {
        name.map(|n| self.vocab.get_or_insert(n)).transpose()
    }

    fn sub_type(
        &self,
        n_type: NodeType,
        pos: Option<&str>,
        sub_type: Option<&str>,
    ) -> Result<Option<u8>, PabloError> {
        match (pos, sub_type) {
            (Some(_), Some(_)) => Err(PabloError::RuleFile(
                "give either pos or sub_type, not both".to_string(),
            )),
            (Some(pos), None) => {
                if n_type != NodeType::Token {
                    return Err(PabloError::RuleFile("pos applies to tokens only".to_string()));
                }
                Ok(Some(self.schema.pos(pos)?.code()))
            }
            (None, Some(name)) => self.schema.sub_type(n_type, name).map(Some),
            (None, None) => Ok(None),
        }
    }

    fn rule(&self, raw: RawRule) -> Result<Rule, PabloError> {
        let schema = self.schema;
        let mut scope = Scope {
            nodes: raw.nodes.iter().map(|n| n.var.clone()).collect(),
            edges: raw.edges.iter().map(|e| e.var.clone()).collect(),
            created: Vec::new(),
        };
        let vars = |r: Result<usize, String>| r.map_err(PabloError::RuleFile);

        let mut nodes = Vec::with_capacity(raw.nodes.len());
        for node in &raw.nodes {
            let n_type = node.n_type.as_deref().map(|t| schema.node_type(t)).transpose()?;
            let sub_type = match n_type {
                Some(t) => self.sub_type(t, node.pos.as_deref(), node.sub_type.as_deref())?,
                None if node.pos.is_some() || node.sub_type.is_some() => {
                    return Err(PabloError::RuleFile(format!(
                        "node variable '{}' needs n_type to take a sub-type",
                        node.var
                    )));
                }
                None => None,
            };
            nodes.push(NodePattern {
                var: node.var.clone(),
                n_type,
                sub_type,
                label: self.label(node.label.as_deref())?,
                all_flags: schema.node_flags(&node.flags)?,
                no_flags: schema.node_flags(&node.lacks_flags)?,
            });
        }

        let mut edges = Vec::with_capacity(raw.edges.len());
        for edge in &raw.edges {
            edges.push(EdgePattern {
                var: edge.var.clone(),
                src: vars(scope.node(&edge.src))?,
                dst: vars(scope.node(&edge.dst))?,
                e_type: edge.e_type.as_deref().map(|t| schema.edge_type(t)).transpose()?,
                attr: self.label(edge.label.as_deref())?,
                all_flags: schema.edge_flags(&edge.flags)?,
                no_flags: schema.edge_flags(&edge.lacks_flags)?,
            });
        }

        let mut guards = Vec::with_capacity(raw.guards.len());
        for guard in raw.guards {
            guards.push(self.guard(&scope, guard)?);
        }

        let mut actions = Vec::with_capacity(raw.actions.len());
        for action in raw.actions {
            actions.push(self.action(&mut scope, action)?);
        }

        Ok(Rule {
            id: RuleId(raw.rule_id),
            name: raw.name,
            version: raw.version,
            phase: schema.phase(&raw.phase)?,
            kind: schema.kind(&raw.kind)?,
            scores: RuleScores {
                support: raw.scores.support,
                precision: raw.scores.precision,
                coverage: raw.scores.coverage,
                mdl: raw.scores.mdl,
            },
            slack_penalty: raw.slack_penalty,
            meta: RuleMeta {
                author: raw.provenance.author,
                source: raw.provenance.source,
                created: raw.provenance.created,
            },
            nodes,
            edges,
            guards,
            actions,
        })
    }

    fn guard(&self, scope: &Scope, raw: RawGuard) -> Result<Guard, PabloError> {
        let schema = self.schema;
        let node = |name: &str| scope.node(name).map_err(PabloError::RuleFile);
        let set = [
            raw.precedes.is_some(),
            raw.adjacent.is_some(),
            raw.same_sentence.is_some(),
            raw.no_edge.is_some(),
            raw.no_incoming.is_some(),
            raw.no_outgoing.is_some(),
            raw.has_flag.is_some(),
            raw.lacks_flag.is_some(),
            raw.label_is.is_some(),
        ];
        if set.iter().filter(|&&s| s).count() != 1 {
            return Err(PabloError::RuleFile(
                "a guard names exactly one condition".to_string(),
            ));
        }

        let cond = if let Some([a, b]) = &raw.precedes {
            Condition::Precedes { a: node(a)?, b: node(b)? }
        } else if let Some([a, b]) = &raw.adjacent {
            Condition::Adjacent { a: node(a)?, b: node(b)? }
        } else if let Some([a, b]) = &raw.same_sentence {
            Condition::SameSentence { a: node(a)?, b: node(b)? }
        } else if let Some(pair) = &raw.no_edge {
            Condition::NoEdge {
                src: node(&pair.src)?,
                dst: node(&pair.dst)?,
                e_type: pair.e_type.as_deref().map(|t| schema.edge_type(t)).transpose()?,
            }
        } else if let Some(inc) = &raw.no_incoming {
            Condition::NoIncoming {
                node: node(&inc.node)?,
                e_type: inc.e_type.as_deref().map(|t| schema.edge_type(t)).transpose()?,
                attr: self.label(inc.label.as_deref())?,
            }
        } else if let Some(out) = &raw.no_outgoing {
            Condition::NoOutgoing {
                node: node(&out.node)?,
                e_type: out.e_type.as_deref().map(|t| schema.edge_type(t)).transpose()?,
                attr: self.label(out.label.as_deref())?,
            }
        } else if let Some(f) = &raw.has_flag {
            Condition::HasFlag {
                node: node(&f.node)?,
                flag: schema.node_flag(&f.flag)?,
            }
        } else if let Some(f) = &raw.lacks_flag {
            Condition::LacksFlag {
                node: node(&f.node)?,
                flag: schema.node_flag(&f.flag)?,
            }
        } else {
            match &raw.label_is {
                Some(l) => Condition::LabelIs {
                    node: node(&l.node)?,
                    label: self.vocab.get_or_insert(&l.label)?,
                },
                None => {
                    return Err(PabloError::RuleFile(
                        "a guard names exactly one condition".to_string(),
                    ));
                }
            }
        };
        Ok(Guard {
            cond,
            soft: raw.soft,
        })
    }

    fn action(&self, scope: &mut Scope, raw: RawAction) -> Result<Action, PabloError> {
        let schema = self.schema;
        let set = [
            raw.add_node.is_some(),
            raw.add_edge.is_some(),
            raw.remove_node.is_some(),
            raw.remove_edge.is_some(),
            raw.set_node_flag.is_some(),
            raw.set_edge_flag.is_some(),
            raw.set_label.is_some(),
            raw.set_edge_label.is_some(),
        ];
        if set.iter().filter(|&&s| s).count() != 1 {
            return Err(PabloError::RuleFile(
                "an action names exactly one operation".to_string(),
            ));
        }
        let vars = |r: Result<usize, String>| r.map_err(PabloError::RuleFile);

        if let Some(add) = raw.add_node {
            let n_type = schema.node_type(&add.n_type)?;
            let span_of = add
                .span_of
                .iter()
                .map(|v| vars(scope.node(v)))
                .collect::<Result<Vec<_>, _>>()?;
            let action = Action::AddNode {
                n_type,
                sub_type: self
                    .sub_type(n_type, add.pos.as_deref(), add.sub_type.as_deref())?
                    .unwrap_or(0),
                label: self.label(add.label.as_deref())?.unwrap_or(LabelId::NONE),
                flags: schema.node_flags(&add.flags)?,
                span_of,
            };
            if scope.nodes.contains(&add.name) || scope.created.contains(&add.name) {
                return Err(PabloError::RuleFile(format!(
                    "new node '{}' shadows a variable",
                    add.name
                )));
            }
            scope.created.push(add.name);
            return Ok(action);
        }
        if let Some(add) = raw.add_edge {
            let flags = match &add.flags {
                Some(names) => schema.edge_flags(names)?,
                None => edge_flags::DIRECTED,
            };
            return Ok(Action::AddEdge {
                src: scope.var(&add.src).map_err(PabloError::RuleFile)?,
                dst: scope.var(&add.dst).map_err(PabloError::RuleFile)?,
                e_type: schema.edge_type(&add.e_type)?,
                attr: self.label(add.label.as_deref())?.unwrap_or(LabelId::NONE),
                weight: Weight::new(add.weight.unwrap_or(DEFAULT_WEIGHT)),
                flags,
            });
        }
        if let Some(name) = raw.remove_node {
            return Ok(Action::RemoveNode {
                node: vars(scope.node(&name))?,
            });
        }
        if let Some(name) = raw.remove_edge {
            return Ok(Action::RemoveEdge {
                edge: vars(scope.edge(&name))?,
            });
        }
        if let Some(set) = raw.set_node_flag {
            let name = set.node.ok_or_else(|| {
                PabloError::RuleFile("set_node_flag needs a node".to_string())
            })?;
            return Ok(Action::SetNodeFlag {
                node: vars(scope.node(&name))?,
                flag: schema.node_flag(&set.flag)?,
                value: set.value,
            });
        }
        if let Some(set) = raw.set_edge_flag {
            let name = set.edge.ok_or_else(|| {
                PabloError::RuleFile("set_edge_flag needs an edge".to_string())
            })?;
            return Ok(Action::SetEdgeFlag {
                edge: vars(scope.edge(&name))?,
                flag: schema.edge_flag(&set.flag)?,
                value: set.value,
            });
        }
        if let Some(set) = raw.set_label {
            return Ok(Action::SetLabel {
                node: vars(scope.node(&set.node))?,
                label: self.vocab.get_or_insert(&set.label)?,
            });
        }
        match raw.set_edge_label {
            Some(set) => Ok(Action::SetEdgeLabel {
                edge: vars(scope.edge(&set.edge))?,
                attr: self.vocab.get_or_insert(&set.label)?,
            }),
            None => Err(PabloError::RuleFile(
                "an action names exactly one operation".to_string(),
            )),
        }
    }
}

// =============================================================================
// ENTRY POINTS
// =============================================================================

/// Parse every `[[rule]]` in `text`. Errors name `source_name` and the rule.
pub fn parse_rules(
    text: &str,
    vocab: &VocabStore,
    source_name: &str,
) -> Result<Vec<Rule>, PabloError> {
    let file: RawFile = toml::from_str(text)
        .map_err(|e| PabloError::RuleFile(format!("{}: {}", source_name, e)))?;
    let lowering = Lowering {
        schema: SchemaRegistry,
        vocab,
    };

    let mut rules = Vec::with_capacity(file.rule.len());
    for raw in file.rule {
        let (id, name) = (raw.rule_id, raw.name.clone());
        let rule = lowering.rule(raw).map_err(|e| {
            PabloError::RuleFile(format!("{}: rule {} ({}): {}", source_name, id, name, e))
        })?;
        rule.validate()
            .map_err(|e| PabloError::RuleFile(format!("{}: {}", source_name, e)))?;
        rules.push(rule);
    }
    Ok(rules)
}

/// Parse every `*.toml` file of `dir`, in file-name order.
pub fn load_dir(dir: impl AsRef<Path>, vocab: &VocabStore) -> Result<Vec<Rule>, PabloError> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|e| PabloError::Io(e.to_string()))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PabloError::Io(e.to_string()))?.path();
        if path.extension().is_some_and(|ext| ext == "toml") && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut rules = Vec::new();
    for path in &paths {
        let text = std::fs::read_to_string(path).map_err(|e| PabloError::Io(e.to_string()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        rules.extend(parse_rules(&text, vocab, &name)?);
    }
    tracing::info!(
        dir = %dir.display(),
        files = paths.len(),
        rules = rules.len(),
        "loaded rule files"
    );
    Ok(rules)
}

/// `load_dir` into a library of the given version.
pub fn load_library(
    dir: impl AsRef<Path>,
    vocab: &VocabStore,
    version: u64,
) -> Result<RuleLibrary, PabloError> {
    RuleLibrary::new(version, load_dir(dir, vocab)?)
}
