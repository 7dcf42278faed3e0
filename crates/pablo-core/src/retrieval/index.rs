//! Quantized-partition nearest-neighbour index over thumbnails.
//!
//! Inserts land in a pending buffer. `merge` freezes the buffer into an
//! immutable segment whose entries are bucketed by partition code; once there
//! are too many segments they are compacted into one. Readers clone the `Arc`
//! of the segment list, so a merge in progress never blocks them.
//!
//! Lock order: `pending`, then `segments`. `merging` serializes merges.

use super::thumbnail::Thumbnail;
use super::{GraphKey, Hit, QueryResult};
use crate::config::RetrievalConfig;
use crate::primitives::PARTITION_BITS;
use crate::storage::RetainStore;
use crate::types::PabloError;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Segments beyond this are compacted on the next merge.
const MAX_SEGMENTS: usize = 8;

#[derive(Debug, Clone)]
struct Entry {
    key: GraphKey,
    thumbnail: Thumbnail,
}

/// An immutable, merged batch of entries.
#[derive(Debug, Default)]
struct Segment {
    partitions: BTreeMap<u8, Vec<Entry>>,
}

impl Segment {
    /// Later entries for a key replace earlier ones.
    fn build(entries: impl IntoIterator<Item = Entry>) -> Self {
        let latest: BTreeMap<GraphKey, Thumbnail> =
            entries.into_iter().map(|e| (e.key, e.thumbnail)).collect();
        let mut partitions: BTreeMap<u8, Vec<Entry>> = BTreeMap::new();
        for (key, thumbnail) in latest {
            partitions
                .entry(thumbnail.partition_code())
                .or_default()
                .push(Entry { key, thumbnail });
        }
        Self { partitions }
    }

    fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.partitions.values().flatten()
    }
}

/// Merged segments, with the position of the newest copy of every key.
#[derive(Debug, Default)]
struct SegmentList {
    /// Oldest first.
    segments: Vec<Arc<Segment>>,
    newest: BTreeMap<GraphKey, usize>,
}

impl SegmentList {
    fn new(segments: Vec<Arc<Segment>>) -> Self {
        let mut newest = BTreeMap::new();
        for (position, segment) in segments.iter().enumerate() {
            for entry in segment.entries() {
                newest.insert(entry.key, position);
            }
        }
        Self { segments, newest }
    }

    /// Whether `entry`, found in the segment at `position`, is its key's newest copy.
    fn is_newest(&self, position: usize, entry: &Entry) -> bool {
        self.newest.get(&entry.key) == Some(&position)
    }
}

/// Approximate k-NN over graph thumbnails.
#[derive(Debug)]
pub struct ThumbnailIndex {
    config: RetrievalConfig,
    segments: RwLock<Arc<SegmentList>>,
    pending: Mutex<Vec<Entry>>,
    merging: Mutex<()>,
}

impl ThumbnailIndex {
    #[must_use]
    pub fn new(config: RetrievalConfig) -> Self {
        Self {
            config,
            segments: RwLock::new(Arc::new(SegmentList::default())),
            pending: Mutex::new(Vec::new()),
            merging: Mutex::new(()),
        }
    }

    /// Build an index from every thumbnail in `store`.
    pub fn load_from_store(store: &RetainStore, config: RetrievalConfig) -> Result<Self, PabloError> {
        let index = Self::new(config);
        let stored = store.thumbnails()?;
        let count = stored.len();
        {
            let mut pending = index.pending.lock();
            for (key, thumbnail) in stored {
                if thumbnail.dims() == config.dims {
                    pending.push(Entry { key, thumbnail });
                } else {
                    tracing::warn!(
                        source_id = key.source_id.0,
                        graph_id = key.graph_id.0,
                        dims = thumbnail.dims(),
                        "skipping stored thumbnail of other dimension"
                    );
                }
            }
        }
        index.merge();
        tracing::info!(thumbnails = count, "retrieval index loaded from store");
        Ok(index)
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Queue a thumbnail. Merges when the pending buffer reaches `merge_batch`.
    pub fn insert(&self, key: GraphKey, thumbnail: Thumbnail) -> Result<(), PabloError> {
        if thumbnail.dims() != self.config.dims {
            return Err(PabloError::SchemaViolation(format!(
                "thumbnail has {} dims, index holds {}",
                thumbnail.dims(),
                self.config.dims
            )));
        }
        let should_merge = {
            let mut pending = self.pending.lock();
            pending.push(Entry { key, thumbnail });
            pending.len() >= self.config.merge_batch
        };
        if should_merge {
            self.merge();
        }
        Ok(())
    }

    /// Freeze pending inserts into a segment. Returns how many were merged.
    pub fn merge(&self) -> usize {
        let _merging = self.merging.lock();
        let batch: Vec<Entry> = self.pending.lock().clone();
        if batch.is_empty() {
            return 0;
        }
        let current = Arc::clone(&self.segments.read());

        let mut next: Vec<Arc<Segment>> = current.segments.clone();
        next.push(Arc::new(Segment::build(batch.iter().cloned())));
        let compacted = next.len() > MAX_SEGMENTS;
        if compacted {
            let all: Vec<Entry> = next.iter().flat_map(|s| s.entries().cloned()).collect();
            next = vec![Arc::new(Segment::build(all))];
        }

        // inserts only append, so the batch is still the head of `pending`
        let mut pending = self.pending.lock();
        let mut segments = self.segments.write();
        *segments = Arc::new(SegmentList::new(next));
        let newer = pending.split_off(batch.len());
        *pending = newer;
        drop(segments);
        drop(pending);

        tracing::info!(merged = batch.len(), compacted, "retrieval index merged");
        batch.len()
    }

    /// Distinct keys held, pending or merged.
    #[must_use]
    pub fn len(&self) -> usize {
        let pending: BTreeSet<GraphKey> = self.pending.lock().iter().map(|e| e.key).collect();
        let merged = Arc::clone(&self.segments.read());
        let unmerged = pending
            .iter()
            .filter(|key| !merged.newest.contains_key(key))
            .count();
        merged.newest.len() + unmerged
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.read().segments.len()
    }

    /// The `k` nearest thumbnails to `query` by squared L2, ties by key.
    ///
    /// Probes the `nprobe` partitions closest to the query's code. A stale or
    /// unmerged index is answered by a linear scan and flagged `degraded`.
    #[must_use]
    pub fn query(&self, query: &Thumbnail, k: usize) -> QueryResult {
        if query.dims() != self.config.dims {
            tracing::warn!(
                dims = query.dims(),
                expected = self.config.dims,
                "query thumbnail dimension mismatch, returning degraded empty result"
            );
            return QueryResult {
                hits: Vec::new(),
                degraded: true,
            };
        }

        let (pending, merged) = {
            let pending = self.pending.lock();
            let merged = Arc::clone(&self.segments.read());
            (pending.clone(), merged)
        };

        let degraded = pending.len() > self.config.stale_after
            || (merged.segments.is_empty() && !pending.is_empty());
        if degraded {
            tracing::warn!(
                pending = pending.len(),
                segments = merged.segments.len(),
                "retrieval index stale, answering by linear scan"
            );
        }

        let probes: BTreeSet<u8> = if degraded {
            BTreeSet::new()
        } else {
            probe_codes(query.partition_code(), self.config.nprobe)
        };

        // newest location of a key wins, whether or not its partition is probed
        let hit = |entry: &Entry| Hit {
            key: entry.key,
            distance: query.squared_distance(&entry.thumbnail),
        };
        let mut pending_keys: BTreeSet<GraphKey> = BTreeSet::new();
        let mut hits: Vec<Hit> = Vec::new();
        for entry in pending.iter().rev() {
            if pending_keys.insert(entry.key) {
                hits.push(hit(entry));
            }
        }
        for (position, segment) in merged.segments.iter().enumerate().rev() {
            let candidates: Vec<&Entry> = if degraded {
                segment.entries().collect()
            } else {
                probes
                    .iter()
                    .filter_map(|code| segment.partitions.get(code))
                    .flatten()
                    .collect()
            };
            for entry in candidates {
                if !pending_keys.contains(&entry.key) && merged.is_newest(position, entry) {
                    hits.push(hit(entry));
                }
            }
        }

        hits.sort_by(|a, b| a.distance.cmp(&b.distance).then_with(|| a.key.cmp(&b.key)));
        hits.truncate(k);
        QueryResult { hits, degraded }
    }
}

/// The `nprobe` codes nearest `code` by Hamming distance, ties by code.
fn probe_codes(code: u8, nprobe: usize) -> BTreeSet<u8> {
    let mut codes: Vec<u8> = (0..=u8::MAX).collect();
    codes.sort_by_key(|&c| ((c ^ code).count_ones(), c));
    let limit = nprobe.min(1 << PARTITION_BITS);
    codes.into_iter().take(limit).collect()
}

// =============================================================================
// BACKGROUND MERGER
// =============================================================================

/// Merges an index periodically on its own thread until dropped.
#[derive(Debug)]
pub struct BackgroundMerger {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundMerger {
    pub fn spawn(index: Arc<ThumbnailIndex>, interval: Duration) -> Result<Self, PabloError> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("pablo-index-merge".to_string())
            .spawn(move || {
                let (lock, cvar) = &*signal;
                let mut stopped = lock.lock();
                while !*stopped {
                    cvar.wait_for(&mut stopped, interval);
                    if *stopped {
                        break;
                    }
                    drop(stopped);
                    if index.pending_len() > 0 {
                        index.merge();
                    }
                    stopped = lock.lock();
                }
            })
            .map_err(|e| PabloError::Io(e.to_string()))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for BackgroundMerger {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.stop;
        *lock.lock() = true;
        cvar.notify_all();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("index merge thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GraphId, SourceId};

    fn key(n: u64) -> GraphKey {
        GraphKey {
            source_id: SourceId(1),
            graph_id: GraphId(n),
        }
    }

    fn thumb(fill: i8, first: i8) -> Thumbnail {
        let mut values = vec![fill; 64];
        values[0] = first;
        Thumbnail::new(values).expect("thumb")
    }

    fn config() -> RetrievalConfig {
        RetrievalConfig {
            merge_batch: 1000,
            ..RetrievalConfig::default()
        }
    }

    #[test]
    fn merged_index_ranks_by_distance_then_key() {
        let index = ThumbnailIndex::new(RetrievalConfig {
            nprobe: 256,
            ..config()
        });
        index.insert(key(3), thumb(5, 5)).expect("insert");
        index.insert(key(1), thumb(5, 9)).expect("insert");
        index.insert(key(2), thumb(5, 1)).expect("insert");
        index.insert(key(4), thumb(-5, 0)).expect("insert");
        assert_eq!(index.merge(), 4);
        assert_eq!(index.pending_len(), 0);

        let result = index.query(&thumb(5, 5), 3);
        assert!(!result.degraded);
        let keys: Vec<u64> = result.hits.iter().map(|h| h.key.graph_id.0).collect();
        // key 1 and key 2 tie at distance 16
        assert_eq!(keys, vec![3, 1, 2]);
        assert_eq!(result.hits[1].distance, 16);
    }

    #[test]
    fn probing_skips_distant_partitions() {
        let index = ThumbnailIndex::new(RetrievalConfig { nprobe: 1, ..config() });
        index.insert(key(1), thumb(5, 5)).expect("insert");
        index.insert(key(2), thumb(-5, -5)).expect("insert");
        index.merge();
        let result = index.query(&thumb(4, 4), 10);
        let keys: Vec<u64> = result.hits.iter().map(|h| h.key.graph_id.0).collect();
        assert_eq!(keys, vec![1]);
    }

    #[test]
    fn unmerged_index_answers_degraded_by_scan() {
        let index = ThumbnailIndex::new(config());
        index.insert(key(1), thumb(5, 5)).expect("insert");
        let result = index.query(&thumb(5, 5), 1);
        assert!(result.degraded);
        assert_eq!(result.hits.len(), 1);

        let stale = ThumbnailIndex::new(RetrievalConfig {
            stale_after: 1,
            ..config()
        });
        stale.insert(key(1), thumb(1, 1)).expect("insert");
        stale.merge();
        stale.insert(key(2), thumb(2, 2)).expect("insert");
        stale.insert(key(3), thumb(3, 3)).expect("insert");
        assert!(stale.query(&thumb(1, 1), 5).degraded);
        assert_eq!(stale.query(&thumb(1, 1), 5).hits.len(), 3);
    }

    #[test]
    fn newest_thumbnail_for_a_key_wins() {
        let index = ThumbnailIndex::new(RetrievalConfig {
            nprobe: 256,
            ..config()
        });
        index.insert(key(1), thumb(5, 5)).expect("insert");
        index.merge();
        index.insert(key(1), thumb(7, 7)).expect("insert");
        let result = index.query(&thumb(7, 7), 5);
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].distance, 0);
    }

    #[test]
    fn reinserted_key_in_unprobed_partition_hides_older_copy() {
        let index = ThumbnailIndex::new(RetrievalConfig { nprobe: 1, ..config() });
        index.insert(key(1), thumb(5, 5)).expect("insert");
        index.merge();
        index.insert(key(1), thumb(-5, -5)).expect("insert");
        index.merge();
        assert_eq!(index.segment_count(), 2);

        // the newer copy sits in a partition this query does not probe
        let near_old = index.query(&thumb(5, 5), 5);
        assert!(!near_old.degraded);
        assert!(near_old.hits.iter().all(|h| h.key != key(1)));

        let near_new = index.query(&thumb(-5, -5), 5);
        assert_eq!(near_new.hits.len(), 1);
        assert_eq!(near_new.hits[0].key, key(1));
        assert_eq!(near_new.hits[0].distance, 0);
    }

    #[test]
    fn pending_copy_hides_merged_copy_outside_probe() {
        let index = ThumbnailIndex::new(RetrievalConfig { nprobe: 1, ..config() });
        index.insert(key(1), thumb(5, 5)).expect("insert");
        index.insert(key(2), thumb(5, 4)).expect("insert");
        index.merge();
        index.insert(key(1), thumb(-5, -5)).expect("insert");

        let result = index.query(&thumb(5, 5), 5);
        let stale: Vec<&Hit> = result.hits.iter().filter(|h| h.key == key(1)).collect();
        assert_eq!(stale.len(), 1);
        assert!(stale[0].distance > 0);
    }

    #[test]
    fn len_counts_each_key_once() {
        let index = ThumbnailIndex::new(config());
        index.insert(key(1), thumb(5, 5)).expect("insert");
        index.merge();
        index.insert(key(1), thumb(-5, -5)).expect("insert");
        assert_eq!(index.len(), 1);
        index.merge();
        assert_eq!(index.len(), 1);
        index.insert(key(1), thumb(1, 1)).expect("insert");
        index.insert(key(2), thumb(1, 1)).expect("insert");
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn batch_threshold_merges_and_segments_compact() {
        let index = ThumbnailIndex::new(RetrievalConfig {
            merge_batch: 2,
            ..RetrievalConfig::default()
        });
        for n in 0..(2 * MAX_SEGMENTS as u64 + 2) {
            index.insert(key(n), thumb(1, n as i8)).expect("insert");
        }
        assert_eq!(index.pending_len(), 0);
        assert!(index.segment_count() <= MAX_SEGMENTS);
        assert_eq!(index.len(), 2 * MAX_SEGMENTS + 2);
    }

    #[test]
    fn wrong_dimensions_are_refused_or_degraded() {
        let index = ThumbnailIndex::new(config());
        let wide = Thumbnail::new(vec![0; 128]).expect("wide");
        assert!(index.insert(key(1), wide.clone()).is_err());
        let result = index.query(&wide, 1);
        assert!(result.degraded && result.hits.is_empty());
    }

    #[test]
    fn background_merger_drains_pending() {
        let index = Arc::new(ThumbnailIndex::new(config()));
        index.insert(key(1), thumb(1, 1)).expect("insert");
        let merger =
            BackgroundMerger::spawn(Arc::clone(&index), Duration::from_millis(5)).expect("spawn");
        let mut waited = 0;
        while index.pending_len() > 0 && waited < 400 {
            std::thread::sleep(Duration::from_millis(5));
            waited += 1;
        }
        drop(merger);
        assert_eq!(index.pending_len(), 0);
        assert_eq!(index.segment_count(), 1);
    }
}
