//! # Innate Primitives
//!
//! Hardcoded runtime constants for the Pablo core.
//!
//! These values are compiled into the binary and are immutable at runtime.
//! Anything an operator may tune lives in `config` instead.

// =============================================================================
// .PGRAPH FORMAT
// =============================================================================

/// Magic bytes opening every `.pgraph` block.
pub const BLOCK_MAGIC: &[u8; 4] = b"PGRB";

/// Current `.pgraph` format version.
///
/// Increment this when making breaking changes to the block layout.
pub const FORMAT_VERSION: u32 = 1;

/// Block flag: the body after the offset table is zstd-compressed.
pub const BLOCK_FLAG_ZSTD: u32 = 1 << 0;

/// Fixed part of a block header: magic, version, flags, record count.
pub const BLOCK_HEADER_FIXED_LEN: usize = 16;

// =============================================================================
// SIZE LIMITS (checked before allocation)
// =============================================================================

/// Maximum size of an encoded or decompressed block (256 MB).
pub const MAX_BLOCK_BYTES: usize = 256 * 1024 * 1024;

/// Maximum number of graph records in one block.
pub const MAX_RECORDS: u32 = 1 << 20;

/// Maximum number of nodes in one graph.
pub const MAX_NODES: u32 = 1 << 22;

/// Maximum number of edges in one graph.
pub const MAX_EDGES: u32 = 1 << 23;

/// Maximum length of one adjunct feature vector.
pub const MAX_FEATURE_LEN: u32 = 4096;

/// Maximum number of justification records carried by one graph.
pub const MAX_TRAIL_LEN: u32 = 1 << 20;

// =============================================================================
// GRAPH BUDGETS
// =============================================================================

/// Documented soft budget for the in-memory footprint of a single-sentence graph.
pub const SINGLE_SENTENCE_BUDGET_BYTES: usize = 1536;

/// Confidence assigned to nodes and edges when none is given.
pub const DEFAULT_CONFIDENCE: u8 = 255;

/// Weight assigned to edges when none is given.
pub const DEFAULT_WEIGHT: u8 = 255;

// =============================================================================
// RULE ENGINE
// =============================================================================

/// Default number of passes over a phase's rules before it is flagged truncated.
pub const DEFAULT_ITERATION_CAP: u32 = 16;

/// Default slack budget per graph.
pub const DEFAULT_SLACK_BUDGET: u32 = 64;

/// Maximum number of pattern variables (nodes plus edges) in one rule.
pub const MAX_PATTERN_VARS: usize = 8;

/// Maximum depth followed by `justify` through antecedent elements.
pub const MAX_JUSTIFY_DEPTH: usize = 8;

/// Maximum bindings one rule may produce in one pass; matching stops there.
pub const MAX_BINDINGS_PER_RULE: usize = 4096;

// =============================================================================
// RETRIEVAL
// =============================================================================

/// Supported thumbnail lengths.
pub const THUMBNAIL_DIMS: [usize; 2] = [64, 128];

/// Number of partition bits in a thumbnail's partition code.
pub const PARTITION_BITS: u32 = 8;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum number of tokens in one token unit.
///
/// Units longer than this are rejected by the ingestor.
pub const MAX_UNIT_TOKENS: usize = 4096;

/// Maximum length of one lemma string.
pub const MAX_LEMMA_LENGTH: usize = 256;

/// Maximum length of one vocabulary entry.
pub const MAX_VOCAB_ENTRY_LENGTH: usize = 4096;

// =============================================================================
// HASHING
// =============================================================================

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a. Stable across platforms and releases, unlike `std`'s hasher.
#[must_use]
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(BLOCK_MAGIC, b"PGRB");
    }

    #[test]
    fn fnv_reference_values() {
        assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn thumbnail_dims_are_supported_shapes() {
        assert_eq!(THUMBNAIL_DIMS, [64, 128]);
        for dims in THUMBNAIL_DIMS {
            assert_eq!(dims % PARTITION_BITS as usize, 0);
        }
    }
}
