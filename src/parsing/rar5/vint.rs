//! Variable-length integer (vint) parsing for RAR5.
//!
//! Each byte contributes 7 bits of data, least significant group first;
//! the high bit says whether more bytes follow.

use crate::parsing::{HeaderError, ParseResult};

/// Longest vint that still fits a u64.
const MAX_VINT_LEN: usize = 10;

/// Read a variable-length integer from a byte slice.
/// Returns the value and the number of bytes consumed, or `None` if the
/// slice ends before the last byte or the encoding overflows.
#[inline]
pub fn read_vint(data: &[u8]) -> Option<(u64, usize)> {
    let mut result = 0u64;

    for (i, &byte) in data.iter().take(MAX_VINT_LEN).enumerate() {
        result |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }
    None
}

/// Sequential reader over a single RAR5 header.
///
/// Every accessor fails with [`HeaderError::Malformed`] instead of reading
/// past the end, since a field overrunning its header means the declared
/// header size is wrong.
pub struct VintReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> VintReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Start reading at `offset` into `data`.
    pub fn at(data: &'a [u8], offset: usize) -> Self {
        Self {
            data,
            offset: offset.min(data.len()),
        }
    }

    #[inline]
    pub fn read(&mut self) -> ParseResult<u64> {
        let (value, consumed) = read_vint(&self.data[self.offset..])
            .ok_or(HeaderError::Malformed("field overruns header"))?;
        self.offset += consumed;
        Ok(value)
    }

    /// Read a vint that is used as an in-memory length.
    #[inline]
    pub fn read_len(&mut self) -> ParseResult<usize> {
        usize::try_from(self.read()?).map_err(|_| HeaderError::Malformed("length overflow"))
    }

    #[inline]
    pub fn read_bytes(&mut self, count: usize) -> ParseResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(count)
            .filter(|&end| end <= self.data.len())
            .ok_or(HeaderError::Malformed("field overruns header"))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    #[inline]
    pub fn read_u32_le(&mut self) -> ParseResult<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }
}
