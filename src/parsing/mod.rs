//! RAR header parsing modules.
//!
//! Parsers work on byte slices that hold exactly one header and know nothing
//! about volumes or offsets; [`block`] unifies the RAR 1.5-4.x and RAR 5.0
//! encodings into a single [`Block`] that the header walker consumes.

pub mod archive_header;
pub mod block;
pub mod file_header;
pub mod marker_header;
pub mod rar5;
pub mod terminator_header;

pub use archive_header::ArchiveHeaderParser;
pub use block::{ArchiveInfo, Block, BlockFlags, BlockKind, FileBlock};
pub use file_header::FileHeaderParser;
pub use marker_header::MarkerHeaderParser;
pub use terminator_header::TerminatorHeaderParser;

use thiserror::Error;

/// Failure decoding a single header.
///
/// The header walker attaches the volume and offset and surfaces these as
/// [`RarError::CorruptHeader`](crate::RarError::CorruptHeader), except
/// [`HeaderError::Encrypted`] which becomes
/// [`RarError::HeadersEncrypted`](crate::RarError::HeadersEncrypted).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("header truncated: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    #[error("header CRC mismatch: stored {stored:#x}, computed {computed:#x}")]
    CrcMismatch { stored: u32, computed: u32 },

    #[error("unexpected header type {0:#x}")]
    UnexpectedType(u64),

    #[error("malformed header: {0}")]
    Malformed(&'static str),

    #[error("archive headers are encrypted")]
    Encrypted,
}

pub type ParseResult<T> = std::result::Result<T, HeaderError>;

#[inline]
pub(crate) fn need(buffer: &[u8], needed: usize) -> ParseResult<()> {
    if buffer.len() < needed {
        return Err(HeaderError::Truncated {
            needed,
            have: buffer.len(),
        });
    }
    Ok(())
}

#[inline]
pub(crate) fn u16_at(buffer: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buffer[offset], buffer[offset + 1]])
}

#[inline]
pub(crate) fn u32_at(buffer: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buffer[offset],
        buffer[offset + 1],
        buffer[offset + 2],
        buffer[offset + 3],
    ])
}
