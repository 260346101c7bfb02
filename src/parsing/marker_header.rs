//! Marker header parser - RAR signature.
//!
//! The marker is the first block of every volume.
//! RAR4: 0x52 0x61 0x72 0x21 0x1A 0x07 0x00
//! RAR5: 0x52 0x61 0x72 0x21 0x1A 0x07 0x01 0x00
//!
//! Self-extracting archives prepend an executable stub, so the first volume
//! may carry the signature at a non-zero offset.

use super::{need, HeaderError, ParseResult};
use crate::formats::Signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerHeader {
    pub signature: Signature,
    /// Offset of the signature within the scanned buffer.
    pub offset: u64,
}

impl MarkerHeader {
    /// Offset of the first header after the signature.
    pub fn end(&self) -> u64 {
        self.offset + self.signature.size()
    }
}

pub struct MarkerHeaderParser;

impl MarkerHeaderParser {
    /// Bytes needed to recognise either signature.
    pub const HEADER_SIZE: usize = Signature::MAX_LEN;
    /// Largest SFX stub searched for a signature.
    pub const MAX_SFX_SEARCH: u64 = 1024 * 1024;

    /// Parse a signature at the very start of `buffer`.
    pub fn parse(buffer: &[u8]) -> ParseResult<MarkerHeader> {
        need(buffer, 7)?;
        let signature = Signature::from_bytes(buffer).ok_or(HeaderError::Malformed(
            "missing RAR signature",
        ))?;
        Ok(MarkerHeader {
            signature,
            offset: 0,
        })
    }

    /// Find a signature anywhere in `buffer`.
    pub fn search(buffer: &[u8]) -> Option<MarkerHeader> {
        Signature::find(buffer).map(|(offset, signature)| MarkerHeader {
            signature,
            offset: offset as u64,
        })
    }
}
