//! # Session Module
//!
//! The per-process pipeline around the shared stores.
//!
//! A session owns everything that outlives one graph:
//! - the vocabulary (single writer, many readers)
//! - the rule registry (atomically swapped library snapshots)
//! - the retrieval index (segments plus pending inserts)
//! - the optional redb retention store
//!
//! Graphs themselves never outlive `process_unit`: a unit is built, run
//! through every phase, scored, indexed, optionally retained, then dropped.
//! Units share no mutable state besides the stores above, so batches run in
//! parallel on the rayon pool.

use crate::codec::encode_pgraph_with;
use crate::config::PabloConfig;
use crate::graph::Graph;
use crate::ingestor::{Ingestor, TokenUnit};
use crate::primitives::MAX_LEMMA_LENGTH;
use crate::retrieval::{GraphKey, QueryResult, Thumbnail, ThumbnailIndex, score_thumbnail};
use crate::rules::{RuleEngine, RuleLibrary, RuleRegistry, RunReport, load_library};
use crate::storage::RetainStore;
use crate::types::PabloError;
use crate::vocab::VocabStore;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;

// =============================================================================
// RESULTS
// =============================================================================

/// A fully analyzed unit, graph included.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub graph: Graph,
    pub report: RunReport,
    pub thumbnail: Thumbnail,
}

/// What is left of a unit after `process_unit` drops its graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitOutcome {
    pub key: GraphKey,
    pub report: RunReport,
    pub thumbnail: Thumbnail,
    /// A phase ran out of time; the thumbnail summarizes a partial graph.
    pub incomplete: bool,
    /// The thumbnail went to the retention store.
    pub retained: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub vocab_entries: usize,
    pub library_version: u64,
    pub library_fingerprint: u64,
    pub rules: usize,
    pub indexed: usize,
    pub pending: usize,
    /// `None` without a retention store.
    pub stored_thumbnails: Option<usize>,
    pub stored_fact_blocks: Option<usize>,
}

// =============================================================================
// SESSION
// =============================================================================

pub struct Session {
    config: PabloConfig,
    vocab: Arc<VocabStore>,
    registry: Arc<RuleRegistry>,
    index: Arc<ThumbnailIndex>,
    store: Option<RetainStore>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("vocab_entries", &self.vocab.len())
            .field("library_version", &self.registry.snapshot().version())
            .field("indexed", &self.index.len())
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl Session {
    /// Open the stores named by `config`.
    ///
    /// Missing paths fall back to in-memory stores: no `vocab_dir` means a
    /// volatile vocabulary, no `rules_dir` an empty rule library, and no
    /// `store_path` an index that starts empty and retains nothing.
    pub fn open(config: PabloConfig) -> Result<Self, PabloError> {
        config.validate()?;

        let vocab = match &config.paths.vocab_dir {
            Some(dir) => VocabStore::open(dir)?,
            None => VocabStore::in_memory(),
        };

        let library = match &config.paths.rules_dir {
            Some(dir) => load_library(dir, &vocab, 1)?,
            None => RuleLibrary::empty(),
        };

        let store = match &config.paths.store_path {
            Some(path) => Some(RetainStore::open(path)?),
            None => None,
        };

        let index = match &store {
            Some(store) => ThumbnailIndex::load_from_store(store, config.retrieval)?,
            None => ThumbnailIndex::new(config.retrieval),
        };

        tracing::info!(
            vocab_entries = vocab.len(),
            rules = library.len(),
            library_version = library.version(),
            indexed = index.len(),
            "session opened"
        );

        Ok(Self {
            config,
            vocab: Arc::new(vocab),
            registry: Arc::new(RuleRegistry::new(library)),
            index: Arc::new(index),
            store,
        })
    }

    /// A fully in-memory session over the given rules.
    pub fn in_memory(
        config: PabloConfig,
        library: RuleLibrary,
        vocab: VocabStore,
    ) -> Result<Self, PabloError> {
        config.validate()?;
        let index = ThumbnailIndex::new(config.retrieval);
        Ok(Self {
            config,
            vocab: Arc::new(vocab),
            registry: Arc::new(RuleRegistry::new(library)),
            index: Arc::new(index),
            store: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PabloConfig {
        &self.config
    }

    #[must_use]
    pub fn vocab(&self) -> &Arc<VocabStore> {
        &self.vocab
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn index(&self) -> &Arc<ThumbnailIndex> {
        &self.index
    }

    #[must_use]
    pub fn store(&self) -> Option<&RetainStore> {
        self.store.as_ref()
    }

    /// Reload the rules directory as the next library version and publish it.
    ///
    /// Units already running keep the snapshot they started with.
    pub fn reload_rules(&self) -> Result<u64, PabloError> {
        let Some(dir) = &self.config.paths.rules_dir else {
            return Err(PabloError::Config("no rules_dir configured".to_string()));
        };
        let version = self.registry.snapshot().version() + 1;
        let library = load_library(dir, &self.vocab, version)?;
        self.registry.publish(library)?;
        Ok(version)
    }

    // =========================================================================
    // PIPELINE
    // =========================================================================

    /// Build a unit's graph, run every phase and attach its thumbnail.
    ///
    /// Nothing is indexed or stored.
    pub fn analyze(&self, unit: &TokenUnit) -> Result<Analysis, PabloError> {
        let mut graph = Ingestor::ingest(unit, &self.vocab)?;

        let engine = RuleEngine::new(self.registry.snapshot(), self.config.engine_config());
        let report = engine.run_all_phases(&mut graph)?;

        let thumbnail = score_thumbnail(&graph, self.config.retrieval.dims)?;
        graph.set_g_features(thumbnail.values().to_vec())?;

        Ok(Analysis {
            graph,
            report,
            thumbnail,
        })
    }

    /// Analyze, index and (with a store) retain one unit's thumbnail.
    pub fn process_unit(&self, unit: &TokenUnit) -> Result<UnitOutcome, PabloError> {
        let Analysis {
            graph,
            report,
            thumbnail,
        } = self.analyze(unit)?;
        let key = GraphKey::of(&graph);
        let incomplete = graph.is_incomplete();
        drop(graph);

        self.index.insert(key, thumbnail.clone())?;
        let retained = match &self.store {
            Some(store) => {
                store.retain(key, &thumbnail, None, report.library_version)?;
                true
            }
            None => false,
        };

        if incomplete {
            tracing::warn!(key = %key, "unit finished incomplete");
        }
        Ok(UnitOutcome {
            key,
            report,
            thumbnail,
            incomplete,
            retained,
        })
    }

    /// Process units in parallel. One unit's failure never affects another.
    ///
    /// Lemmas are interned in unit order first, so label ids match a
    /// sequential run of the same batch.
    pub fn process_batch(&self, units: &[TokenUnit]) -> Vec<Result<UnitOutcome, PabloError>> {
        for unit in units {
            for token in &unit.tokens {
                if token.lemma.is_empty() || token.lemma.len() > MAX_LEMMA_LENGTH {
                    continue;
                }
                if let Err(e) = self.vocab.get_or_insert(&token.lemma) {
                    tracing::warn!(error = %e, "lemma pre-interning failed");
                }
            }
        }

        let outcomes: Vec<_> = units.par_iter().map(|u| self.process_unit(u)).collect();
        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        tracing::debug!(units = units.len(), failed, "batch processed");
        outcomes
    }

    /// Index a finished graph and store its thumbnail, plus its encoded fact
    /// block when `keep_facts` is set.
    pub fn retain_graph(&self, graph: &Graph, keep_facts: bool) -> Result<Thumbnail, PabloError> {
        let Some(store) = &self.store else {
            return Err(PabloError::Config("no store_path configured".to_string()));
        };
        let thumbnail = self.thumbnail_of(graph)?;
        let key = GraphKey::of(graph);

        let facts = if keep_facts {
            Some(encode_pgraph_with(graph, &self.config.codec.encode_options())?)
        } else {
            None
        };
        store.retain(
            key,
            &thumbnail,
            facts.as_deref(),
            self.registry.snapshot().version(),
        )?;
        self.index.insert(key, thumbnail.clone())?;
        Ok(thumbnail)
    }

    /// Nearest indexed graphs to `graph`.
    pub fn query_graph(&self, graph: &Graph, k: usize) -> Result<QueryResult, PabloError> {
        let thumbnail = self.thumbnail_of(graph)?;
        Ok(self.index.query(&thumbnail, k))
    }

    /// The graph's own thumbnail when it has one of the configured length,
    /// otherwise a fresh score.
    fn thumbnail_of(&self, graph: &Graph) -> Result<Thumbnail, PabloError> {
        match graph.g_features() {
            Some(values) if values.len() == self.config.retrieval.dims => {
                Thumbnail::new(values.to_vec())
            }
            _ => score_thumbnail(graph, self.config.retrieval.dims),
        }
    }

    pub fn status(&self) -> Result<SessionStatus, PabloError> {
        let library = self.registry.snapshot();
        let (stored_thumbnails, stored_fact_blocks) = match &self.store {
            Some(store) => (Some(store.thumbnail_count()?), Some(store.fact_count()?)),
            None => (None, None),
        };
        Ok(SessionStatus {
            vocab_entries: self.vocab.len(),
            library_version: library.version(),
            library_fingerprint: library.fingerprint(),
            rules: library.len(),
            indexed: self.index.len(),
            pending: self.index.pending_len(),
            stored_thumbnails,
            stored_fact_blocks,
        })
    }

    /// Flush the vocabulary and merge pending index inserts.
    pub fn close(self) -> Result<(), PabloError> {
        let flushed = self.vocab.flush()?;
        let merged = self.index.merge();
        tracing::info!(flushed, merged, "session closed");
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
