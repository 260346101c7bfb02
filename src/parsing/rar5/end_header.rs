//! RAR5 end of archive header parser.
//!
//! The end header closes every volume and says whether the archive
//! continues in another one.

use super::{CommonHeader, Rar5HeaderType};
use crate::parsing::{HeaderError, ParseResult};

/// RAR5 end header flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rar5EndFlags {
    /// Archive continues in next volume
    pub has_next_volume: bool,
}

impl From<u64> for Rar5EndFlags {
    fn from(flags: u64) -> Self {
        Self {
            has_next_volume: flags & 0x0001 != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rar5EndHeader {
    pub end_flags: Rar5EndFlags,
    pub total_len: usize,
}

pub struct Rar5EndHeaderParser;

impl Rar5EndHeaderParser {
    pub fn parse(buffer: &[u8]) -> ParseResult<Rar5EndHeader> {
        let (common, mut reader) = CommonHeader::parse(buffer)?;
        if common.header_type != Rar5HeaderType::End as u64 {
            return Err(HeaderError::UnexpectedType(common.header_type));
        }
        let end_flags = Rar5EndFlags::from(reader.read()?);

        Ok(Rar5EndHeader {
            end_flags,
            total_len: common.total_len,
        })
    }
}
