//! Thumbnail scoring.
//!
//! Each live node hashes `(n_type, sub_type, label)` and each live edge hashes
//! `(e_type, attr, src type, dst type)` into one of `dims` signed buckets,
//! weighted by confidence (and weight, for edges). The accumulated buckets are
//! max-abs scaled to `[-127, 127]`.

use crate::graph::Graph;
use crate::primitives::{PARTITION_BITS, THUMBNAIL_DIMS, fnv1a64};
use crate::types::PabloError;
use serde::{Deserialize, Serialize};

const NODE_TAG: u8 = b'N';
const EDGE_TAG: u8 = b'E';

/// A fixed-length int8 summary of one finished graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Thumbnail(Vec<i8>);

impl Thumbnail {
    /// Wrap raw values. The length must be a supported dimension.
    pub fn new(values: Vec<i8>) -> Result<Self, PabloError> {
        if !THUMBNAIL_DIMS.contains(&values.len()) {
            return Err(PabloError::SchemaViolation(format!(
                "thumbnail of {} values, expected one of {:?}",
                values.len(),
                THUMBNAIL_DIMS
            )));
        }
        Ok(Self(values))
    }

    #[must_use]
    pub fn dims(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn values(&self) -> &[i8] {
        &self.0
    }

    #[must_use]
    pub fn into_values(self) -> Vec<i8> {
        self.0
    }

    /// One bit per dimension slice: set when the slice sums above zero.
    #[must_use]
    pub fn partition_code(&self) -> u8 {
        let slice = self.0.len() / PARTITION_BITS as usize;
        let mut code = 0u8;
        for (bit, chunk) in self.0.chunks(slice.max(1)).take(PARTITION_BITS as usize).enumerate() {
            let sum: i32 = chunk.iter().map(|&v| i32::from(v)).sum();
            if sum > 0 {
                code |= 1 << bit;
            }
        }
        code
    }

    /// Squared Euclidean distance. Both thumbnails must have equal dims.
    #[must_use]
    pub fn squared_distance(&self, other: &Self) -> u64 {
        self.0
            .iter()
            .zip(&other.0)
            .map(|(&a, &b)| {
                let d = i64::from(a) - i64::from(b);
                (d * d) as u64
            })
            .sum()
    }
}

fn bucket(bytes: &[u8], dims: usize) -> (usize, i64) {
    let hash = fnv1a64(bytes);
    let index = (hash % dims as u64) as usize;
    let sign = if hash >> 63 == 1 { -1 } else { 1 };
    (index, sign)
}

/// Score a graph into a `dims`-long thumbnail. Same graph, same thumbnail.
pub fn score_thumbnail(graph: &Graph, dims: usize) -> Result<Thumbnail, PabloError> {
    if !THUMBNAIL_DIMS.contains(&dims) {
        return Err(PabloError::SchemaViolation(format!(
            "thumbnail dims {} not in {:?}",
            dims, THUMBNAIL_DIMS
        )));
    }
    let mut acc = vec![0i64; dims];

    for node in graph.live_nodes() {
        let mut key = [0u8; 7];
        key[0] = NODE_TAG;
        key[1] = node.n_type.code();
        key[2] = node.sub_type;
        key[3..7].copy_from_slice(&node.label.0.to_le_bytes());
        let (i, sign) = bucket(&key, dims);
        acc[i] += sign * (i64::from(node.confidence.raw()) + 1);
    }

    for edge in graph.live_edges() {
        let endpoint = |id| graph.node(id).map(|n| n.n_type.code());
        let mut key = [0u8; 8];
        key[0] = EDGE_TAG;
        key[1] = edge.e_type.code();
        key[2..6].copy_from_slice(&edge.attr.0.to_le_bytes());
        key[6] = endpoint(edge.src)?;
        key[7] = endpoint(edge.dst)?;
        let (i, sign) = bucket(&key, dims);
        let strength = (i64::from(edge.weight.raw()) + 1) * (i64::from(edge.confidence.raw()) + 1);
        acc[i] += sign * (strength / 256);
    }

    let max_abs = acc.iter().map(|v| v.abs()).max().unwrap_or(0);
    let values = acc
        .iter()
        .map(|&v| if max_abs == 0 { 0 } else { (v * 127 / max_abs) as i8 })
        .collect();
    Ok(Thumbnail(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::confidence::Weight;
    use crate::types::{EdgeType, NodeId, NodeType, SchemaId, SourceId, Span};

    fn sentence(pos: &[u8]) -> Graph {
        let mut builder = GraphBuilder::create_graph(SourceId(1), SchemaId::Writing);
        for (i, &p) in pos.iter().enumerate() {
            let start = i as u32 * 3;
            builder
                .add_node(NodeType::Token, p, Span::new(start, start + 2), None)
                .expect("node");
        }
        for i in 1..pos.len() as u32 {
            builder
                .add_edge(NodeId(i - 1), NodeId(i), EdgeType::Next, Weight::FULL)
                .expect("edge");
        }
        builder.finalize().expect("finalize")
    }

    #[test]
    fn scoring_is_deterministic_and_bounded() {
        let graph = sentence(&[6, 1, 2, 6, 1, 10]);
        let a = score_thumbnail(&graph, 64).expect("score");
        let b = score_thumbnail(&graph, 64).expect("score");
        assert_eq!(a, b);
        assert_eq!(a.dims(), 64);
        assert!(a.values().iter().any(|&v| v.unsigned_abs() == 127));
        assert_eq!(score_thumbnail(&graph, 128).expect("wide").dims(), 128);
    }

    #[test]
    fn unsupported_dims_rejected() {
        let graph = sentence(&[1]);
        assert!(score_thumbnail(&graph, 100).is_err());
        assert!(Thumbnail::new(vec![0; 63]).is_err());
    }

    #[test]
    fn empty_graph_scores_zero() {
        let graph = GraphBuilder::create_graph(SourceId(1), SchemaId::Writing)
            .finalize()
            .expect("empty");
        let thumb = score_thumbnail(&graph, 64).expect("score");
        assert!(thumb.values().iter().all(|&v| v == 0));
        assert_eq!(thumb.partition_code(), 0);
    }

    #[test]
    fn distance_and_partition_code() {
        let mut values = vec![0i8; 64];
        values[0] = 10;
        values[63] = -3;
        let a = Thumbnail::new(values).expect("a");
        let b = Thumbnail::new(vec![0; 64]).expect("b");
        assert_eq!(a.squared_distance(&b), 109);
        assert_eq!(a.partition_code(), 0b0000_0001);
    }
}
