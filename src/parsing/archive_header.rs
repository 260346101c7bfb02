//! Archive header parser (RAR 1.5-4.x).
//!
//! The archive header follows the marker header and contains
//! archive-level flags and metadata.

use super::{need, u16_at, HeaderError, ParseResult};
use crate::crc32::crc16;

/// Archive header type constant.
pub const ARCHIVE_HEADER_TYPE: u8 = 0x73;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub crc: u16,
    pub flags: u16,
    pub size: u16,
    // Parsed flags
    pub is_volume: bool,
    pub has_comment: bool,
    pub is_locked: bool,
    pub is_solid: bool,
    pub is_new_numbering: bool,
    pub has_auth_info: bool,
    pub has_recovery: bool,
    pub headers_encrypted: bool,
    pub is_first_volume: bool,
}

pub struct ArchiveHeaderParser;

impl ArchiveHeaderParser {
    pub const HEADER_SIZE: usize = 13;

    pub fn parse(buffer: &[u8]) -> ParseResult<ArchiveHeader> {
        need(buffer, 7)?;

        let crc = u16_at(buffer, 0);
        let header_type = buffer[2];
        let flags = u16_at(buffer, 3);
        let size = u16_at(buffer, 5);

        if header_type != ARCHIVE_HEADER_TYPE {
            return Err(HeaderError::UnexpectedType(header_type as u64));
        }
        if (size as usize) < Self::HEADER_SIZE {
            return Err(HeaderError::Malformed("archive header shorter than 13 bytes"));
        }
        need(buffer, size as usize)?;

        let computed = crc16(&buffer[2..size as usize]);
        if computed != crc {
            return Err(HeaderError::CrcMismatch {
                stored: crc as u32,
                computed: computed as u32,
            });
        }

        Ok(ArchiveHeader {
            crc,
            flags,
            size,
            is_volume: (flags & 0x0001) != 0,
            has_comment: (flags & 0x0002) != 0,
            is_locked: (flags & 0x0004) != 0,
            is_solid: (flags & 0x0008) != 0,
            is_new_numbering: (flags & 0x0010) != 0,
            has_auth_info: (flags & 0x0020) != 0,
            has_recovery: (flags & 0x0040) != 0,
            headers_encrypted: (flags & 0x0080) != 0,
            is_first_volume: (flags & 0x0100) != 0,
        })
    }
}
