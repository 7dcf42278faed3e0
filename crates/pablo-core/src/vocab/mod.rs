//! # Vocabulary Store
//!
//! Append-only dictionary between strings and `LabelId`s.
//!
//! ## Layout on disk
//!
//! - `vocab.blob`: the raw UTF-8 bytes of every entry, back to back
//! - `vocab.idx`: magic `PVIX`, version (u32 LE), entry count (u64 LE), then one
//!   u64 LE end offset per entry. Entry `i` spans `end[i-1]..end[i]` of the blob.
//!
//! Both files are memory-mapped read-only on open, so id -> string for the
//! persisted part is a constant-time slice into the mapping. Entries appended
//! since open live in an in-memory tail with the same blob/offset layout until
//! `flush` appends them to disk.
//!
//! ## Concurrency
//!
//! - Single writer: appends and flushes are serialized by `writer`
//! - Many readers: lookups take a shared lock held only for a slice copy
//! - An entry becomes visible only once its bytes, end offset and index entry
//!   are all in place, so readers never see a partial entry
//!
//! Ids are `1..`; `LabelId::NONE` (0) is never issued. An id, once issued, keeps
//! its string forever.

use crate::primitives::MAX_VOCAB_ENTRY_LENGTH;
use crate::types::{LabelId, PabloError};
use memmap2::{Mmap, MmapOptions};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Blob file name inside a vocabulary directory.
pub const BLOB_FILE: &str = "vocab.blob";

/// Offset index file name inside a vocabulary directory.
pub const INDEX_FILE: &str = "vocab.idx";

const INDEX_MAGIC: &[u8; 4] = b"PVIX";
const INDEX_VERSION: u32 = 1;
const INDEX_HEADER_LEN: usize = 16;

// =============================================================================
// MAPPED BASE
// =============================================================================

/// The persisted, frozen part of the store.
struct MappedBase {
    blob: Mmap,
    idx: Mmap,
    count: u32,
}

impl MappedBase {
    fn end_at(&self, i: u32) -> Option<usize> {
        let pos = INDEX_HEADER_LEN + (i as usize) * 8;
        let raw: [u8; 8] = self.idx.get(pos..pos + 8)?.try_into().ok()?;
        usize::try_from(u64::from_le_bytes(raw)).ok()
    }

    fn entry(&self, i: u32) -> Option<&str> {
        if i >= self.count {
            return None;
        }
        let start = if i == 0 { 0 } else { self.end_at(i - 1)? };
        let end = self.end_at(i)?;
        std::str::from_utf8(self.blob.get(start..end)?).ok()
    }

    fn blob_len(&self) -> usize {
        self.count
            .checked_sub(1)
            .and_then(|last| self.end_at(last))
            .unwrap_or(0)
    }
}

/// Entries appended since open, plus the string index over everything.
#[derive(Default)]
struct State {
    bytes: Vec<u8>,
    ends: Vec<usize>,
    index: BTreeMap<Box<str>, LabelId>,
    /// Tail entries already written by `flush`.
    persisted: usize,
}

impl State {
    fn tail_entry(&self, t: usize) -> Option<&str> {
        let end = *self.ends.get(t)?;
        let start = if t == 0 { 0 } else { self.ends[t - 1] };
        std::str::from_utf8(self.bytes.get(start..end)?).ok()
    }
}

// =============================================================================
// VOCABULARY STORE
// =============================================================================

/// Append-only string <-> id store. Share it behind an `Arc`.
pub struct VocabStore {
    dir: Option<PathBuf>,
    base: Option<MappedBase>,
    base_count: u32,
    state: RwLock<State>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for VocabStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VocabStore")
            .field("dir", &self.dir)
            .field("base_count", &self.base_count)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl VocabStore {
    /// A store with no backing files. `flush` is a no-op.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            base: None,
            base_count: 0,
            state: RwLock::new(State::default()),
            writer: Mutex::new(()),
        }
    }

    /// Open (or create) the store in `dir`, mapping any persisted entries.
    ///
    /// A blob longer than its index (an interrupted flush) is truncated back
    /// to the last indexed entry.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, PabloError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| PabloError::Io(format!("Cannot create '{}': {}", dir.display(), e)))?;

        let blob_path = dir.join(BLOB_FILE);
        let idx_path = dir.join(INDEX_FILE);

        let base = if idx_path.is_file() {
            Self::map_base(&blob_path, &idx_path)?
        } else {
            None
        };
        if base.is_none() && blob_path.is_file() {
            Self::truncate_blob(&blob_path, 0)?;
        }

        let base_count = base.as_ref().map_or(0, |b| b.count);
        let mut index = BTreeMap::new();
        if let Some(base) = &base {
            for i in 0..base.count {
                let entry = base.entry(i).ok_or_else(|| {
                    PabloError::format(
                        (INDEX_HEADER_LEN + i as usize * 8) as u64,
                        format!("vocabulary entry {} is not valid UTF-8", i + 1),
                    )
                })?;
                if index.insert(Box::from(entry), LabelId(i + 1)).is_some() {
                    return Err(PabloError::format(
                        (INDEX_HEADER_LEN + i as usize * 8) as u64,
                        format!("vocabulary entry '{}' is duplicated", entry),
                    ));
                }
            }
        }

        tracing::info!(dir = %dir.display(), entries = base_count, "vocabulary opened");

        Ok(Self {
            dir: Some(dir.to_path_buf()),
            base,
            base_count,
            state: RwLock::new(State {
                index,
                ..State::default()
            }),
            writer: Mutex::new(()),
        })
    }

    fn map_base(blob_path: &Path, idx_path: &Path) -> Result<Option<MappedBase>, PabloError> {
        let idx_file = File::open(idx_path)
            .map_err(|e| PabloError::Io(format!("Cannot open '{}': {}", idx_path.display(), e)))?;
        let idx_len = idx_file
            .metadata()
            .map_err(|e| PabloError::Io(e.to_string()))?
            .len() as usize;
        if idx_len < INDEX_HEADER_LEN {
            return Err(PabloError::format(0, "vocabulary index shorter than its header"));
        }

        // SAFETY: the index is only ever replaced by rename, never written in
        // place, so the mapped inode does not change underneath us.
        let idx = unsafe { MmapOptions::new().map(&idx_file) }
            .map_err(|e| PabloError::Io(format!("Cannot map '{}': {}", idx_path.display(), e)))?;

        if &idx[0..4] != INDEX_MAGIC {
            return Err(PabloError::format(0, "bad vocabulary index magic"));
        }
        let version = u32::from_le_bytes([idx[4], idx[5], idx[6], idx[7]]);
        if version != INDEX_VERSION {
            return Err(PabloError::format(
                4,
                format!("unsupported vocabulary index version {}", version),
            ));
        }
        let mut raw_count = [0u8; 8];
        raw_count.copy_from_slice(&idx[8..16]);
        let count = u64::from_le_bytes(raw_count);
        let expected = (count as usize)
            .checked_mul(8)
            .and_then(|n| n.checked_add(INDEX_HEADER_LEN));
        if count > u64::from(u32::MAX - 1) || expected != Some(idx_len) {
            return Err(PabloError::format(
                8,
                format!("vocabulary index count {} does not match its length", count),
            ));
        }
        let count = count as u32;
        if count == 0 {
            return Ok(None);
        }

        let mut prev = 0u64;
        for i in 0..count as usize {
            let pos = INDEX_HEADER_LEN + i * 8;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&idx[pos..pos + 8]);
            let end = u64::from_le_bytes(raw);
            if end <= prev {
                return Err(PabloError::format(
                    pos as u64,
                    "vocabulary offsets are not strictly increasing",
                ));
            }
            prev = end;
        }

        let blob_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(blob_path)
            .map_err(|e| PabloError::Io(format!("Cannot open '{}': {}", blob_path.display(), e)))?;
        let blob_len = blob_file
            .metadata()
            .map_err(|e| PabloError::Io(e.to_string()))?
            .len();
        if blob_len < prev {
            return Err(PabloError::format(
                (idx_len - 8) as u64,
                format!("vocabulary blob is {} bytes, index needs {}", blob_len, prev),
            ));
        }
        if blob_len > prev {
            Self::truncate_blob(blob_path, prev)?;
        }

        // SAFETY: the blob is append-only and only this store's single writer
        // appends to it; bytes inside the mapped range are never rewritten.
        let blob = unsafe { MmapOptions::new().map(&blob_file) }
            .map_err(|e| PabloError::Io(format!("Cannot map '{}': {}", blob_path.display(), e)))?;

        Ok(Some(MappedBase { blob, idx, count }))
    }

    fn truncate_blob(blob_path: &Path, len: u64) -> Result<(), PabloError> {
        let file = OpenOptions::new()
            .write(true)
            .open(blob_path)
            .map_err(|e| PabloError::Io(format!("Cannot open '{}': {}", blob_path.display(), e)))?;
        let current = file
            .metadata()
            .map_err(|e| PabloError::Io(e.to_string()))?
            .len();
        if current > len {
            tracing::warn!(
                blob_len = current,
                indexed = len,
                "truncating unindexed vocabulary tail"
            );
            file.set_len(len).map_err(|e| PabloError::Io(e.to_string()))?;
        }
        Ok(())
    }

    /// Directory backing this store, if any.
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Number of issued ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.base_count as usize + self.state.read().ends.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` has been issued.
    #[must_use]
    pub fn contains(&self, id: LabelId) -> bool {
        id.0 != 0 && (id.0 as usize) <= self.len()
    }

    /// Id of `entry`, if it has one.
    #[must_use]
    pub fn lookup_id(&self, entry: &str) -> Option<LabelId> {
        self.state.read().index.get(entry).copied()
    }

    /// String behind `id`.
    #[must_use]
    pub fn resolve(&self, id: LabelId) -> Option<String> {
        let slot = id.0.checked_sub(1)?;
        if slot < self.base_count {
            return self
                .base
                .as_ref()
                .and_then(|b| b.entry(slot))
                .map(str::to_owned);
        }
        let state = self.state.read();
        state
            .tail_entry((slot - self.base_count) as usize)
            .map(str::to_owned)
    }

    /// Id of `entry`, issuing the next id if it is new.
    pub fn get_or_insert(&self, entry: &str) -> Result<LabelId, PabloError> {
        if entry.is_empty() || entry.len() > MAX_VOCAB_ENTRY_LENGTH {
            return Err(PabloError::SchemaViolation(format!(
                "vocabulary entries must be 1..={} bytes, got {}",
                MAX_VOCAB_ENTRY_LENGTH,
                entry.len()
            )));
        }
        if let Some(id) = self.lookup_id(entry) {
            return Ok(id);
        }

        let _writer = self.writer.lock();
        if let Some(id) = self.lookup_id(entry) {
            return Ok(id);
        }

        let mut state = self.state.write();
        let next = self.base_count as usize + state.ends.len() + 1;
        let id = u32::try_from(next)
            .ok()
            .filter(|&n| n < u32::MAX)
            .map(LabelId)
            .ok_or_else(|| PabloError::SchemaViolation("vocabulary id space exhausted".into()))?;
        state.bytes.extend_from_slice(entry.as_bytes());
        let end = state.bytes.len();
        state.ends.push(end);
        state.index.insert(Box::from(entry), id);
        Ok(id)
    }

    /// Append every unflushed entry to the backing files. Returns the number written.
    ///
    /// The blob is appended first and the index replaced by rename afterwards,
    /// so an interrupted flush leaves the previous index intact.
    pub fn flush(&self) -> Result<usize, PabloError> {
        let Some(dir) = &self.dir else {
            return Ok(0);
        };
        let _writer = self.writer.lock();

        let (new_bytes, tail_ends, persisted) = {
            let state = self.state.read();
            if state.persisted == state.ends.len() && dir.join(INDEX_FILE).is_file() {
                return Ok(0);
            }
            let from = state
                .persisted
                .checked_sub(1)
                .map_or(0, |i| state.ends[i]);
            (
                state.bytes[from..].to_vec(),
                state.ends.clone(),
                state.persisted,
            )
        };

        let blob_path = dir.join(BLOB_FILE);
        let mut blob = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&blob_path)
            .map_err(|e| PabloError::Io(format!("Cannot open '{}': {}", blob_path.display(), e)))?;
        blob.write_all(&new_bytes)
            .and_then(|()| blob.sync_all())
            .map_err(|e| PabloError::Io(e.to_string()))?;

        let base_len = self.base.as_ref().map_or(0, MappedBase::blob_len);
        let total = self.base_count as usize + tail_ends.len();
        let mut idx = Vec::with_capacity(INDEX_HEADER_LEN + total * 8);
        idx.extend_from_slice(INDEX_MAGIC);
        idx.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        idx.extend_from_slice(&(total as u64).to_le_bytes());
        if let Some(base) = &self.base {
            for i in 0..base.count {
                let end = base.end_at(i).unwrap_or(0);
                idx.extend_from_slice(&(end as u64).to_le_bytes());
            }
        }
        for end in &tail_ends {
            idx.extend_from_slice(&((base_len + end) as u64).to_le_bytes());
        }

        let tmp_path = dir.join(format!("{}.tmp", INDEX_FILE));
        std::fs::write(&tmp_path, &idx).map_err(|e| PabloError::Io(e.to_string()))?;
        std::fs::rename(&tmp_path, dir.join(INDEX_FILE))
            .map_err(|e| PabloError::Io(e.to_string()))?;

        let written = tail_ends.len() - persisted;
        self.state.write().persisted = tail_ends.len();
        tracing::info!(dir = %dir.display(), written, total, "vocabulary flushed");
        Ok(written)
    }
}

// =============================================================================
// TESTS
// =============================================================================
