//! Little-endian readers over in-memory byte slices.
//!
//! Both archive indexes and dex containers are parsed from memory (a mapped
//! file or a buffer handed over by a device), so every reader here works on
//! `&[u8]` and reports truncation with `None` rather than an I/O error.

/// Reads a little-endian u16 at `offset`.
#[inline]
pub fn le_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Reads a little-endian u32 at `offset`.
#[inline]
pub fn le_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Reads a little-endian u64 at `offset`.
#[inline]
pub fn le_u64(buf: &[u8], offset: usize) -> Option<u64> {
    let bytes = buf.get(offset..offset.checked_add(8)?)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Some(u64::from_le_bytes(raw))
}

/// A forward-only cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a cursor positioned at `pos`.
    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    /// Returns the current position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns the number of bytes left after the current position.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Reads a little-endian u16 and advances.
    pub fn u16(&mut self) -> Option<u16> {
        let value = le_u16(self.buf, self.pos)?;
        self.pos += 2;
        Some(value)
    }

    /// Reads a little-endian u32 and advances.
    pub fn u32(&mut self) -> Option<u32> {
        let value = le_u32(self.buf, self.pos)?;
        self.pos += 4;
        Some(value)
    }

    /// Reads `len` raw bytes and advances.
    pub fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    /// Reads an unsigned LEB128 value (at most 5 bytes, as used by dex).
    pub fn uleb128(&mut self) -> Option<u32> {
        let mut result = 0u32;
        for i in 0..5 {
            let byte = *self.buf.get(self.pos)?;
            self.pos += 1;
            result |= u32::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Some(result);
            }
        }
        None
    }

    /// Reads a signed LEB128 value (at most 5 bytes).
    pub fn sleb128(&mut self) -> Option<i32> {
        let mut result = 0u32;
        for i in 0..5 {
            let byte = *self.buf.get(self.pos)?;
            self.pos += 1;
            result |= u32::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                let shift = 7 * (i + 1);
                if shift < 32 && byte & 0x40 != 0 {
                    result |= u32::MAX << shift;
                }
                return Some(result as i32);
            }
        }
        None
    }

    /// Reads bytes up to (not including) the next NUL and skips the NUL.
    pub fn c_str(&mut self) -> Option<&'a [u8]> {
        let rest = self.buf.get(self.pos..)?;
        let len = rest.iter().position(|&b| b == 0)?;
        self.pos += len + 1;
        Some(&rest[..len])
    }
}
