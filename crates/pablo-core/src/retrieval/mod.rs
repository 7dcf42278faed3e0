//! # Retrieval
//!
//! What survives a graph: a fixed-length int8 thumbnail, and an approximate
//! nearest-neighbour index that answers with graph keys, never with graphs.

mod index;
mod thumbnail;

pub use index::{BackgroundMerger, ThumbnailIndex};
pub use thumbnail::{Thumbnail, score_thumbnail};

use crate::graph::Graph;
use crate::types::{GraphId, SourceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a finished graph across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GraphKey {
    pub source_id: SourceId,
    pub graph_id: GraphId,
}

impl GraphKey {
    #[must_use]
    pub fn of(graph: &Graph) -> Self {
        Self {
            source_id: graph.source_id(),
            graph_id: graph.graph_id(),
        }
    }
}

impl fmt::Display for GraphKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source_id.0, self.graph_id.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hit {
    pub key: GraphKey,
    /// Squared L2 distance to the query.
    pub distance: u64,
}

/// Ranked candidates. `degraded` marks answers from a stale or unmerged index.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct QueryResult {
    pub hits: Vec<Hit>,
    pub degraded: bool,
}
