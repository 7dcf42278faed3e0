//! # redb-backed Retention Store
//!
//! Graphs are discarded after analysis. What is kept goes here:
//! - the thumbnail of every retained graph (postcard records)
//! - optional fact blocks: encoded `.pgraph` bytes of selected graphs
//! - the rule library version of the latest retention
//!
//! Everything is keyed by `(source_id, graph_id)`. One retention is one
//! write transaction, so a crash never leaves a fact block without its
//! thumbnail.

use crate::retrieval::{GraphKey, Thumbnail};
use crate::types::{GraphId, PabloError, SourceId};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Thumbnails: (source_id, graph_id) -> postcard `ThumbnailRecord`
const THUMBNAILS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("thumbnails");

/// Fact blocks: (source_id, graph_id) -> encoded .pgraph block
const FACTS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("facts");

/// Metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const META_LIBRARY_VERSION: &str = "library_version";

#[derive(Debug, Serialize, Deserialize)]
struct ThumbnailRecord {
    values: Vec<i8>,
    /// Rule library the graph was analyzed with.
    library_version: u64,
}

fn io(e: impl std::fmt::Display) -> PabloError {
    PabloError::Io(e.to_string())
}

fn table_key(key: GraphKey) -> (u64, u64) {
    (key.source_id.0, key.graph_id.0)
}

/// Durable partial persistence of finished graphs.
pub struct RetainStore {
    db: Database,
}

impl std::fmt::Debug for RetainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetainStore").finish_non_exhaustive()
    }
}

impl RetainStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PabloError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io)?;
            let _ = write_txn.open_table(THUMBNAILS).map_err(io)?;
            let _ = write_txn.open_table(FACTS).map_err(io)?;
            let _ = write_txn.open_table(METADATA).map_err(io)?;
            write_txn.commit().map_err(io)?;
        }

        let store = Self { db };
        tracing::info!(
            path = %path.as_ref().display(),
            thumbnails = store.thumbnail_count()?,
            "retention store opened"
        );
        Ok(store)
    }

    /// Store a graph's thumbnail and, optionally, its encoded fact block.
    pub fn retain(
        &self,
        key: GraphKey,
        thumbnail: &Thumbnail,
        facts: Option<&[u8]>,
        library_version: u64,
    ) -> Result<(), PabloError> {
        let record = ThumbnailRecord {
            values: thumbnail.values().to_vec(),
            library_version,
        };
        let bytes =
            postcard::to_allocvec(&record).map_err(|e| PabloError::Serialization(e.to_string()))?;

        let write_txn = self.db.begin_write().map_err(io)?;
        {
            let mut thumbnails = write_txn.open_table(THUMBNAILS).map_err(io)?;
            thumbnails
                .insert(table_key(key), bytes.as_slice())
                .map_err(io)?;

            if let Some(block) = facts {
                let mut fact_table = write_txn.open_table(FACTS).map_err(io)?;
                fact_table.insert(table_key(key), block).map_err(io)?;
            }

            let mut meta = write_txn.open_table(METADATA).map_err(io)?;
            meta.insert(META_LIBRARY_VERSION, library_version)
                .map_err(io)?;
        }
        write_txn.commit().map_err(io)?;

        tracing::debug!(
            key = %key,
            facts = facts.map_or(0, <[u8]>::len),
            "graph retained"
        );
        Ok(())
    }

    pub fn thumbnail(&self, key: GraphKey) -> Result<Option<Thumbnail>, PabloError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(THUMBNAILS).map_err(io)?;
        let Some(bytes) = table.get(table_key(key)).map_err(io)? else {
            return Ok(None);
        };
        decode_thumbnail(bytes.value()).map(Some)
    }

    /// Every stored thumbnail, in key order.
    pub fn thumbnails(&self) -> Result<Vec<(GraphKey, Thumbnail)>, PabloError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(THUMBNAILS).map_err(io)?;

        let mut out = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (key, value) = entry.map_err(io)?;
            let (source_id, graph_id) = key.value();
            let graph_key = GraphKey {
                source_id: SourceId(source_id),
                graph_id: GraphId(graph_id),
            };
            out.push((graph_key, decode_thumbnail(value.value())?));
        }
        Ok(out)
    }

    /// The encoded fact block of a retained graph.
    pub fn fact_block(&self, key: GraphKey) -> Result<Option<Vec<u8>>, PabloError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(FACTS).map_err(io)?;
        Ok(table
            .get(table_key(key))
            .map_err(io)?
            .map(|v| v.value().to_vec()))
    }

    pub fn thumbnail_count(&self) -> Result<usize, PabloError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(THUMBNAILS).map_err(io)?;
        Ok(table.len().map_err(io)? as usize)
    }

    pub fn fact_count(&self) -> Result<usize, PabloError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(FACTS).map_err(io)?;
        Ok(table.len().map_err(io)? as usize)
    }

    /// Rule library version of the most recent retention.
    pub fn library_version(&self) -> Result<Option<u64>, PabloError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(METADATA).map_err(io)?;
        Ok(table
            .get(META_LIBRARY_VERSION)
            .map_err(io)?
            .map(|v| v.value()))
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), PabloError> {
        self.db.compact().map_err(io)?;
        Ok(())
    }
}

fn decode_thumbnail(bytes: &[u8]) -> Result<Thumbnail, PabloError> {
    let record: ThumbnailRecord =
        postcard::from_bytes(bytes).map_err(|e| PabloError::Serialization(e.to_string()))?;
    Thumbnail::new(record.values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(n: u64) -> GraphKey {
        GraphKey {
            source_id: SourceId(9),
            graph_id: GraphId(n),
        }
    }

    fn thumb(v: i8) -> Thumbnail {
        Thumbnail::new(vec![v; 64]).expect("thumb")
    }

    #[test]
    fn retained_thumbnails_survive_reopen() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("retain.redb");
        {
            let store = RetainStore::open(&path).expect("open");
            store.retain(key(2), &thumb(2), None, 1).expect("retain");
            store.retain(key(1), &thumb(1), Some(&b"PGRB"[..]), 1).expect("retain");
        }
        let store = RetainStore::open(&path).expect("reopen");
        assert_eq!(store.thumbnail_count().expect("count"), 2);
        assert_eq!(store.fact_count().expect("facts"), 1);
        assert_eq!(store.thumbnail(key(2)).expect("get"), Some(thumb(2)));
        assert_eq!(store.fact_block(key(1)).expect("facts"), Some(b"PGRB".to_vec()));
        assert_eq!(store.fact_block(key(2)).expect("facts"), None);

        let keys: Vec<u64> = store
            .thumbnails()
            .expect("all")
            .iter()
            .map(|(k, _)| k.graph_id.0)
            .collect();
        assert_eq!(keys, vec![1, 2]);
    }

    #[test]
    fn retaining_again_replaces_and_tracks_version() {
        let temp = tempdir().expect("temp dir");
        let mut store = RetainStore::open(temp.path().join("retain.redb")).expect("open");
        assert_eq!(store.library_version().expect("version"), None);
        store.retain(key(1), &thumb(1), None, 3).expect("retain");
        store.retain(key(1), &thumb(5), None, 4).expect("retain");
        assert_eq!(store.thumbnail_count().expect("count"), 1);
        assert_eq!(store.thumbnail(key(1)).expect("get"), Some(thumb(5)));
        assert_eq!(store.library_version().expect("version"), Some(4));
        store.compact().expect("compact");
        assert_eq!(store.thumbnail(key(7)).expect("missing"), None);
    }
}
