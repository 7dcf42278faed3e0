//! # Schema Registry
//!
//! Resolves symbolic names used by rule files and token units to wire codes.
//! Names are case-insensitive; anything unknown is an `UnknownSymbol` error
//! naming the namespace that was searched.

use crate::types::{
    DiscourseRelation, EdgeType, NodeType, PabloError, Phase, Pos, RuleKind, edge_flags,
    node_flags,
};

/// Name lookup over the `Writing` schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaRegistry;

fn unknown(namespace: &'static str, name: &str) -> PabloError {
    PabloError::UnknownSymbol {
        namespace,
        name: name.to_string(),
    }
}

fn flag(table: &[(&str, u16)], namespace: &'static str, name: &str) -> Result<u16, PabloError> {
    table
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, bit)| *bit)
        .ok_or_else(|| unknown(namespace, name))
}

impl SchemaRegistry {
    pub fn node_type(self, name: &str) -> Result<NodeType, PabloError> {
        NodeType::from_name(name).ok_or_else(|| unknown("node type", name))
    }

    pub fn edge_type(self, name: &str) -> Result<EdgeType, PabloError> {
        EdgeType::from_name(name).ok_or_else(|| unknown("edge type", name))
    }

    pub fn pos(self, name: &str) -> Result<Pos, PabloError> {
        Pos::from_name(name).ok_or_else(|| unknown("part of speech", name))
    }

    pub fn relation(self, name: &str) -> Result<DiscourseRelation, PabloError> {
        DiscourseRelation::from_name(name).ok_or_else(|| unknown("discourse relation", name))
    }

    pub fn phase(self, name: &str) -> Result<Phase, PabloError> {
        Phase::from_name(name).ok_or_else(|| unknown("phase", name))
    }

    pub fn kind(self, name: &str) -> Result<RuleKind, PabloError> {
        RuleKind::from_name(name).ok_or_else(|| unknown("rule kind", name))
    }

    /// A single node flag bit.
    pub fn node_flag(self, name: &str) -> Result<u16, PabloError> {
        flag(node_flags::NAMED, "node flag", name)
    }

    /// A single edge flag bit.
    pub fn edge_flag(self, name: &str) -> Result<u16, PabloError> {
        flag(edge_flags::NAMED, "edge flag", name)
    }

    /// The union of several node flags.
    pub fn node_flags<S: AsRef<str>>(self, names: &[S]) -> Result<u16, PabloError> {
        names
            .iter()
            .try_fold(0u16, |acc, n| Ok(acc | self.node_flag(n.as_ref())?))
    }

    /// The union of several edge flags.
    pub fn edge_flags<S: AsRef<str>>(self, names: &[S]) -> Result<u16, PabloError> {
        names
            .iter()
            .try_fold(0u16, |acc, n| Ok(acc | self.edge_flag(n.as_ref())?))
    }

    /// The `sub_type` code a name selects for `n_type`: a POS tag for tokens,
    /// a relation for discourse relations. Other node types take no sub-type name.
    pub fn sub_type(self, n_type: NodeType, name: &str) -> Result<u8, PabloError> {
        match n_type {
            NodeType::Token => self.pos(name).map(Pos::code),
            NodeType::DiscourseRel => self.relation(name).map(DiscourseRelation::code),
            _ => Err(unknown("sub-type", name)),
        }
    }
}
