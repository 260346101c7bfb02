//! RAR5 main archive header parser.
//!
//! The main archive header appears once after the signature and contains
//! archive-level flags and optional locator information.

use super::{CommonHeader, Rar5HeaderFlags, Rar5HeaderType};
use crate::parsing::{HeaderError, ParseResult};

/// RAR5 archive flags (specific to main header).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rar5ArchiveFlags {
    /// Archive is part of multi-volume set
    pub is_volume: bool,
    /// Volume number field is present
    pub has_volume_number: bool,
    /// Solid archive
    pub is_solid: bool,
    /// Recovery record present
    pub has_recovery_record: bool,
    /// Archive is locked
    pub is_locked: bool,
}

impl From<u64> for Rar5ArchiveFlags {
    fn from(flags: u64) -> Self {
        Self {
            is_volume: flags & 0x0001 != 0,
            has_volume_number: flags & 0x0002 != 0,
            is_solid: flags & 0x0004 != 0,
            has_recovery_record: flags & 0x0008 != 0,
            is_locked: flags & 0x0010 != 0,
        }
    }
}

/// Parsed RAR5 main archive header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rar5ArchiveHeader {
    pub header_flags: Rar5HeaderFlags,
    pub archive_flags: Rar5ArchiveFlags,
    /// Volume number; absent on the first volume.
    pub volume_number: Option<u64>,
    /// Header length including CRC and size vint
    pub total_len: usize,
}

pub struct Rar5ArchiveHeaderParser;

impl Rar5ArchiveHeaderParser {
    /// Parse a main archive header starting right after the signature.
    pub fn parse(buffer: &[u8]) -> ParseResult<Rar5ArchiveHeader> {
        let (common, mut reader) = CommonHeader::parse(buffer)?;
        if common.header_type != Rar5HeaderType::Main as u64 {
            return Err(HeaderError::UnexpectedType(common.header_type));
        }

        let archive_flags = Rar5ArchiveFlags::from(reader.read()?);
        let volume_number = if archive_flags.has_volume_number {
            Some(reader.read()?)
        } else {
            None
        };

        Ok(Rar5ArchiveHeader {
            header_flags: common.flags,
            archive_flags,
            volume_number,
            total_len: common.total_len,
        })
    }
}
