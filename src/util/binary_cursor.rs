//! Bounds-checked reads over an untrusted byte buffer.
//!
//! Message-table resources come from foreign binaries and must never be
//! trusted. Every read here checks its range against the underlying slice
//! and reports a [`EventResolverError::MalformedData`] instead of reading
//! past the end.

use crate::util::error::{EventResolverError, Result};

/// A read cursor over a byte slice. All numeric reads are little-endian.
#[derive(Debug, Clone)]
pub struct BinaryCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BinaryCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Total length of the underlying buffer.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes left between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Move to an absolute offset. Seeking exactly to the end is allowed.
    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.buf.len() {
            return Err(out_of_bounds("seek", offset, 0, self.buf.len()));
        }
        self.pos = offset;
        Ok(())
    }

    /// Advance by `count` bytes without reading them.
    pub fn advance(&mut self, count: usize) -> Result<()> {
        let target = self
            .pos
            .checked_add(count)
            .ok_or_else(|| out_of_bounds("advance", self.pos, count, self.buf.len()))?;
        self.seek(target)
    }

    /// Borrow `len` bytes at an absolute offset without moving the cursor.
    pub fn slice_at(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| out_of_bounds("slice", offset, len, self.buf.len()))?;
        self.buf
            .get(offset..end)
            .ok_or_else(|| out_of_bounds("slice", offset, len, self.buf.len()))
    }

    pub fn read_u16_at(&self, offset: usize) -> Result<u16> {
        let b = self.slice_at(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_at(&self, offset: usize) -> Result<u32> {
        let b = self.slice_at(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let v = self.read_u16_at(self.pos)?;
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let v = self.read_u32_at(self.pos)?;
        self.pos += 4;
        Ok(v)
    }

    /// Read `len` bytes at the cursor and advance past them.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let b = self.slice_at(self.pos, len)?;
        self.pos += len;
        Ok(b)
    }
}

fn out_of_bounds(what: &str, offset: usize, need: usize, len: usize) -> EventResolverError {
    EventResolverError::MalformedData(format!(
        "{what} of {need} bytes at offset {offset} exceeds buffer of {len} bytes"
    ))
}

/// Decode a NUL-terminated (or unterminated) single-byte string.
///
/// Bytes are treated as Latin-1, which never fails and keeps ASCII intact.
pub fn decode_ansi(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    bytes[..end].iter().map(|&b| b as char).collect()
}

/// Decode a NUL-terminated (or unterminated) UTF-16LE string. An odd
/// trailing byte is ignored.
pub fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_are_bounds_checked() {
        let data = [1u8, 0, 2, 0, 0, 0];
        let mut cursor = BinaryCursor::new(&data);
        assert_eq!(cursor.read_u16().unwrap(), 1);
        assert_eq!(cursor.read_u32().unwrap(), 2);
        assert!(cursor.read_u16().is_err());
        assert_eq!(cursor.position(), 6);
    }

    #[test]
    fn test_advance_past_end_fails() {
        let data = [0u8; 4];
        let mut cursor = BinaryCursor::new(&data);
        assert!(cursor.advance(4).is_ok());
        assert!(cursor.advance(1).is_err());
        assert!(cursor.advance(usize::MAX).is_err());
    }

    #[test]
    fn test_decode_strings_stop_at_nul() {
        assert_eq!(decode_ansi(b"abc\0\0\0"), "abc");
        assert_eq!(decode_utf16le(&[b'h', 0, b'i', 0, 0, 0, 0xFF]), "hi");
    }
}
