//! Base-128 variable-length integers, zigzag mapping, and the byte cursor the
//! record decoder runs on.
//!
//! Every read error carries the absolute block offset of the failing byte.

use crate::types::PabloError;

/// Map a signed integer onto the unsigned line: 0, -1, 1, -2, 2, ...
#[must_use]
pub const fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of `zigzag_encode`.
#[must_use]
pub const fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Append `value` as LEB128.
pub fn put_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Append `value` zigzag-mapped, then as LEB128.
pub fn put_svarint(out: &mut Vec<u8>, value: i64) {
    put_uvarint(out, zigzag_encode(value));
}

/// Decode one LEB128 value from the front of `bytes`. Returns the value and
/// the number of bytes consumed; offsets in errors are relative to `bytes`.
pub fn decode_uvarint(bytes: &[u8]) -> Result<(u64, usize), PabloError> {
    let mut reader = Reader::new(bytes, 0);
    let value = reader.uvarint()?;
    Ok((value, reader.position()))
}

// =============================================================================
// WRITER
// =============================================================================

/// Growable little-endian / varint byte sink.
#[derive(Debug, Default)]
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub(crate) fn u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn uvarint(&mut self, value: u64) {
        put_uvarint(&mut self.buf, value);
    }

    /// Length or count prefix.
    pub(crate) fn len(&mut self, value: usize) {
        self.uvarint(value as u64);
    }

    pub(crate) fn svarint(&mut self, value: i64) {
        put_svarint(&mut self.buf, value);
    }

    pub(crate) fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes written so far.
    pub(crate) fn position(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

// =============================================================================
// READER
// =============================================================================

/// Cursor over one record. `base` is the absolute block offset of `buf[0]`.
#[derive(Debug)]
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8], base: u64) -> Self {
        Self { buf, pos: 0, base }
    }

    /// Absolute block offset of the next unread byte.
    pub(crate) fn offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// A format error at the current offset.
    pub(crate) fn fail(&self, reason: impl Into<String>) -> PabloError {
        PabloError::format(self.offset(), reason)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, PabloError> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| self.fail("unexpected end of record"))?;
        self.pos += 1;
        Ok(byte)
    }

    pub(crate) fn u16(&mut self) -> Result<u16, PabloError> {
        let raw = self.take(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], PabloError> {
        if n > self.remaining() {
            return Err(PabloError::format(
                self.base + self.buf.len() as u64,
                format!("need {} bytes, {} left", n, self.remaining()),
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn uvarint(&mut self) -> Result<u64, PabloError> {
        let start = self.offset();
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            if shift == 63 && byte > 1 {
                return Err(PabloError::format(start, "varint overflows 64 bits"));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(PabloError::format(start, "varint longer than 10 bytes"));
            }
        }
    }

    pub(crate) fn svarint(&mut self) -> Result<i64, PabloError> {
        self.uvarint().map(zigzag_decode)
    }

    pub(crate) fn u32_varint(&mut self) -> Result<u32, PabloError> {
        let start = self.offset();
        let value = self.uvarint()?;
        u32::try_from(value)
            .map_err(|_| PabloError::format(start, format!("value {} exceeds u32", value)))
    }

    /// A count prefix bounded by `limit` and by the bytes left (every element
    /// takes at least one byte), checked before anything is allocated.
    pub(crate) fn count(&mut self, limit: usize, what: &str) -> Result<usize, PabloError> {
        let start = self.offset();
        let value = self.uvarint()?;
        let count = usize::try_from(value).unwrap_or(usize::MAX);
        if count > limit || count > self.remaining() {
            return Err(PabloError::format(
                start,
                format!("{} count {} out of range", what, value),
            ));
        }
        Ok(count)
    }
}

// =============================================================================
// TESTS
// =============================================================================
