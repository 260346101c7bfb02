//! Terminator header parser (RAR 1.5-4.x).
//!
//! The terminator header marks the end of a RAR volume and says whether
//! another volume follows.

use super::{need, u16_at, u32_at, HeaderError, ParseResult};
use crate::crc32::crc16;

/// End-of-archive header type constant.
pub const TERMINATOR_HEADER_TYPE: u8 = 0x7B;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminatorHeader {
    pub flags: u16,
    pub size: u16,
    pub has_next_volume: bool,
    /// CRC32 of the volume data, when EARC_DATACRC is set.
    pub data_crc: Option<u32>,
    /// Zero-based volume number, when EARC_VOLNUMBER is set.
    pub volume_number: Option<u16>,
}

pub struct TerminatorHeaderParser;

impl TerminatorHeaderParser {
    pub const HEADER_SIZE: usize = 7;

    pub fn parse(buffer: &[u8]) -> ParseResult<TerminatorHeader> {
        need(buffer, Self::HEADER_SIZE)?;

        let crc = u16_at(buffer, 0);
        let header_type = buffer[2];
        let flags = u16_at(buffer, 3);
        let size = u16_at(buffer, 5);

        if header_type != TERMINATOR_HEADER_TYPE {
            return Err(HeaderError::UnexpectedType(header_type as u64));
        }
        if (size as usize) < Self::HEADER_SIZE {
            return Err(HeaderError::Malformed("end header shorter than 7 bytes"));
        }
        need(buffer, size as usize)?;

        let computed = crc16(&buffer[2..size as usize]);
        if computed != crc {
            return Err(HeaderError::CrcMismatch {
                stored: crc as u32,
                computed: computed as u32,
            });
        }

        let mut offset = Self::HEADER_SIZE;
        let data_crc = if flags & 0x0002 != 0 && size as usize >= offset + 4 {
            let value = u32_at(buffer, offset);
            offset += 4;
            Some(value)
        } else {
            None
        };
        let volume_number = if flags & 0x0008 != 0 && size as usize >= offset + 2 {
            Some(u16_at(buffer, offset))
        } else {
            None
        };

        Ok(TerminatorHeader {
            flags,
            size,
            has_next_volume: (flags & 0x0001) != 0,
            data_crc,
            volume_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(flags: u16, tail: &[u8]) -> Vec<u8> {
        let size = (7 + tail.len()) as u16;
        let mut buffer = vec![0, 0, TERMINATOR_HEADER_TYPE];
        buffer.extend_from_slice(&flags.to_le_bytes());
        buffer.extend_from_slice(&size.to_le_bytes());
        buffer.extend_from_slice(tail);
        let crc = crc16(&buffer[2..]);
        buffer[..2].copy_from_slice(&crc.to_le_bytes());
        buffer
    }

    #[test]
    fn test_last_volume() {
        let parsed = TerminatorHeaderParser::parse(&header(0x4000, &[])).unwrap();
        assert!(!parsed.has_next_volume);
        assert_eq!(parsed.data_crc, None);
    }

    #[test]
    fn test_next_volume_with_number() {
        let parsed =
            TerminatorHeaderParser::parse(&header(0x000B, &[1, 2, 3, 4, 5, 0])).unwrap();
        assert!(parsed.has_next_volume);
        assert_eq!(parsed.data_crc, Some(0x04030201));
        assert_eq!(parsed.volume_number, Some(5));
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(
            TerminatorHeaderParser::parse(&[0, 0, 0x7B]),
            Err(HeaderError::Truncated { .. })
        ));
    }
}
