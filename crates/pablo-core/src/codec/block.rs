//! Block framing: header, offset table, optional whole-body compression.
//!
//! ```text
//! 0   magic "PGRB"
//! 4   format version   u32 LE
//! 8   block flags      u32 LE   (bit 0: body is zstd-compressed)
//! 12  record count     u32 LE
//! 16  offset table     u64 LE × count, positions in the decompressed body
//! ..  body
//! ```
//!
//! Every failure is a `PabloError::Format` carrying the byte offset where the
//! block stopped making sense. Inside a record, offsets are `header_len` plus
//! the position in the decompressed body. All limits are checked before the
//! corresponding allocation.

use super::record::{read_record, write_record};
use super::varint::Writer;
use crate::graph::Graph;
use crate::primitives::{
    BLOCK_FLAG_ZSTD, BLOCK_HEADER_FIXED_LEN, BLOCK_MAGIC, FORMAT_VERSION, MAX_BLOCK_BYTES,
    MAX_RECORDS,
};
use crate::types::PabloError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::Read;

const OFFSET_WIDTH: usize = 8;

// =============================================================================
// OPTIONS
// =============================================================================

/// Whole-block compressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Zstd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub compression: Compression,
    /// zstd level, used when `compression` is `Zstd`.
    pub zstd_level: i32,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            zstd_level: 3,
        }
    }
}

impl EncodeOptions {
    #[must_use]
    pub fn zstd(level: i32) -> Self {
        Self {
            compression: Compression::Zstd,
            zstd_level: level,
        }
    }
}

// =============================================================================
// HEADER
// =============================================================================

/// The uncompressed block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub flags: u32,
    /// Start of each record in the decompressed body.
    pub offsets: Vec<u64>,
}

impl BlockHeader {
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.offsets.len()
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.flags & BLOCK_FLAG_ZSTD != 0
    }

    /// Encoded size of this header.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        BLOCK_HEADER_FIXED_LEN + OFFSET_WIDTH * self.offsets.len()
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(BLOCK_MAGIC);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.flags.to_le_bytes());
        bytes.extend_from_slice(&(self.offsets.len() as u32).to_le_bytes());
        for offset in &self.offsets {
            bytes.extend_from_slice(&offset.to_le_bytes());
        }
        bytes
    }

    /// Parse and validate the header at the front of `bytes`.
    ///
    /// Checks magic, version, flags, the record count and the ordering of the
    /// offset table. Whether offsets lie inside the body is checked once the
    /// body length is known (`BlockReader::new`).
    pub fn parse(bytes: &[u8]) -> Result<Self, PabloError> {
        let magic_len = bytes.len().min(BLOCK_MAGIC.len());
        if let Some(bad) = (0..magic_len).find(|&i| bytes[i] != BLOCK_MAGIC[i]) {
            return Err(PabloError::format(bad as u64, "bad magic"));
        }
        if bytes.len() < BLOCK_HEADER_FIXED_LEN {
            return Err(PabloError::format(
                bytes.len() as u64,
                format!("block header truncated at {} bytes", bytes.len()),
            ));
        }

        let version = read_u32(bytes, 4);
        if version != FORMAT_VERSION {
            return Err(PabloError::format(
                4,
                format!("unsupported version {} (expected {})", version, FORMAT_VERSION),
            ));
        }
        let flags = read_u32(bytes, 8);
        if flags & !BLOCK_FLAG_ZSTD != 0 {
            return Err(PabloError::format(8, format!("unknown block flags {:#x}", flags)));
        }
        let count = read_u32(bytes, 12);
        if count > MAX_RECORDS {
            return Err(PabloError::format(
                12,
                format!("record count {} exceeds {}", count, MAX_RECORDS),
            ));
        }
        let count = count as usize;
        let table_end = BLOCK_HEADER_FIXED_LEN + OFFSET_WIDTH * count;
        if bytes.len() < table_end {
            return Err(PabloError::format(
                bytes.len() as u64,
                format!("offset table of {} entries truncated", count),
            ));
        }

        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let at = BLOCK_HEADER_FIXED_LEN + OFFSET_WIDTH * i;
            let offset = read_u64(bytes, at);
            let in_order = match offsets.last() {
                None => offset == 0,
                Some(&prev) => offset > prev,
            };
            if !in_order {
                return Err(PabloError::format(
                    at as u64,
                    format!("record offset {} out of order", offset),
                ));
            }
            offsets.push(offset);
        }

        Ok(Self {
            version,
            flags,
            offsets,
        })
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

// =============================================================================
// ENCODE
// =============================================================================

/// Encode `graphs` as one block, one record each, in order.
pub fn encode_block(graphs: &[&Graph], options: &EncodeOptions) -> Result<Vec<u8>, PabloError> {
    if graphs.len() > MAX_RECORDS as usize {
        return Err(PabloError::Serialization(format!(
            "{} records exceed the block limit of {}",
            graphs.len(),
            MAX_RECORDS
        )));
    }

    let mut body = Writer::new();
    let mut offsets = Vec::with_capacity(graphs.len());
    for graph in graphs {
        offsets.push(body.position() as u64);
        write_record(graph, &mut body);
    }
    let body = body.into_inner();
    if body.len() > MAX_BLOCK_BYTES {
        return Err(PabloError::Serialization(format!(
            "block body of {} bytes exceeds {}",
            body.len(),
            MAX_BLOCK_BYTES
        )));
    }

    let (flags, body) = match options.compression {
        Compression::None => (0, body),
        Compression::Zstd => {
            let packed = zstd::encode_all(body.as_slice(), options.zstd_level)
                .map_err(|e| PabloError::Io(e.to_string()))?;
            (BLOCK_FLAG_ZSTD, packed)
        }
    };

    let header = BlockHeader {
        version: FORMAT_VERSION,
        flags,
        offsets,
    };
    let mut block = header.to_bytes();
    block.extend_from_slice(&body);

    tracing::debug!(
        records = graphs.len(),
        bytes = block.len(),
        compressed = header.is_compressed(),
        "encoded block"
    );
    Ok(block)
}

/// Encode a single graph as an uncompressed one-record block.
pub fn encode_pgraph(graph: &Graph) -> Result<Vec<u8>, PabloError> {
    encode_block(&[graph], &EncodeOptions::default())
}

pub fn encode_pgraph_with(graph: &Graph, options: &EncodeOptions) -> Result<Vec<u8>, PabloError> {
    encode_block(&[graph], options)
}

// =============================================================================
// DECODE
// =============================================================================

/// Random access over the records of one block.
///
/// The header is validated and the body decompressed up front; records are
/// decoded on demand.
#[derive(Debug)]
pub struct BlockReader<'a> {
    header: BlockHeader,
    header_len: usize,
    body: Cow<'a, [u8]>,
}

impl<'a> BlockReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, PabloError> {
        if bytes.len() > MAX_BLOCK_BYTES {
            return Err(PabloError::format(
                MAX_BLOCK_BYTES as u64,
                format!("block of {} bytes exceeds {}", bytes.len(), MAX_BLOCK_BYTES),
            ));
        }
        let header = BlockHeader::parse(bytes)?;
        let header_len = header.encoded_len();
        let raw = &bytes[header_len..];

        let body = if header.is_compressed() {
            Cow::Owned(decompress(raw, header_len)?)
        } else {
            Cow::Borrowed(raw)
        };

        for (i, offset) in header.offsets.iter().enumerate() {
            if *offset >= body.len() as u64 {
                return Err(PabloError::format(
                    (BLOCK_HEADER_FIXED_LEN + OFFSET_WIDTH * i) as u64,
                    format!("record offset {} outside body of {} bytes", offset, body.len()),
                ));
            }
        }

        Ok(Self {
            header,
            header_len,
            body,
        })
    }

    #[must_use]
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.header.record_count()
    }

    /// Decode record `index`.
    pub fn record(&self, index: usize) -> Result<Graph, PabloError> {
        let start = *self.header.offsets.get(index).ok_or_else(|| {
            PabloError::format(
                12,
                format!("record {} requested, block holds {}", index, self.record_count()),
            )
        })? as usize;
        let end = self
            .header
            .offsets
            .get(index + 1)
            .map_or(self.body.len(), |&next| next as usize);
        read_record(&self.body[start..end], (self.header_len + start) as u64)
    }

    /// Decode every record, in order.
    pub fn records(&self) -> Result<Vec<Graph>, PabloError> {
        (0..self.record_count()).map(|i| self.record(i)).collect()
    }
}

fn decompress(raw: &[u8], header_len: usize) -> Result<Vec<u8>, PabloError> {
    let at = header_len as u64;
    let decoder = zstd::stream::read::Decoder::new(raw)
        .map_err(|e| PabloError::format(at, format!("zstd: {}", e)))?;
    let mut body = Vec::new();
    decoder
        .take(MAX_BLOCK_BYTES as u64 + 1)
        .read_to_end(&mut body)
        .map_err(|e| PabloError::format(at, format!("zstd: {}", e)))?;
    if body.len() > MAX_BLOCK_BYTES {
        return Err(PabloError::format(
            at,
            format!("decompressed body exceeds {} bytes", MAX_BLOCK_BYTES),
        ));
    }
    Ok(body)
}

/// Decode every record of a block. Fails as a whole on the first bad record.
pub fn decode_block(bytes: &[u8]) -> Result<Vec<Graph>, PabloError> {
    BlockReader::new(bytes)?.records()
}

/// Decode a one-record block.
pub fn decode_pgraph(bytes: &[u8]) -> Result<Graph, PabloError> {
    let reader = BlockReader::new(bytes)?;
    if reader.record_count() != 1 {
        return Err(PabloError::format(
            12,
            format!("expected one record, block holds {}", reader.record_count()),
        ));
    }
    reader.record(0)
}

/// BLAKE3 hex digest of an encoded block.
#[cfg(feature = "crypto-hash")]
#[must_use]
pub fn block_digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
