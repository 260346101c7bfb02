//! RAR5 format parsing modules.
//!
//! RAR5 uses a completely different header format than RAR4:
//! - Variable-length integers (vint) for sizes
//! - CRC-32 over the whole header instead of CRC-16
//! - Different header type codes

mod vint;

pub mod archive_header;
pub mod end_header;
pub mod file_header;

pub use archive_header::{Rar5ArchiveHeader, Rar5ArchiveHeaderParser};
pub use end_header::{Rar5EndHeader, Rar5EndHeaderParser};
pub use file_header::{Rar5FileHeader, Rar5FileHeaderParser};
pub use vint::{read_vint, VintReader};

use super::{need, u32_at, HeaderError, ParseResult};
use crate::crc32::crc32;

/// RAR5 caps a single header at 2 MiB.
pub const MAX_HEADER_SIZE: u64 = 2 * 1024 * 1024;

/// RAR5 header type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Rar5HeaderType {
    /// Main archive header
    Main = 1,
    /// File header
    File = 2,
    /// Service header (e.g., NTFS streams, ACL)
    Service = 3,
    /// Encryption header
    Encryption = 4,
    /// End of archive header
    End = 5,
}

impl TryFrom<u64> for Rar5HeaderType {
    type Error = ();

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Main),
            2 => Ok(Self::File),
            3 => Ok(Self::Service),
            4 => Ok(Self::Encryption),
            5 => Ok(Self::End),
            _ => Err(()),
        }
    }
}

/// RAR5 common header flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rar5HeaderFlags {
    /// Extra area is present after header
    pub has_extra_area: bool,
    /// Data area is present after header
    pub has_data_area: bool,
    /// Skip header if unknown type
    pub skip_if_unknown: bool,
    /// Data continues from previous volume
    pub split_before: bool,
    /// Data continues in next volume
    pub split_after: bool,
}

impl From<u64> for Rar5HeaderFlags {
    fn from(flags: u64) -> Self {
        Self {
            has_extra_area: flags & 0x0001 != 0,
            has_data_area: flags & 0x0002 != 0,
            skip_if_unknown: flags & 0x0004 != 0,
            split_before: flags & 0x0008 != 0,
            split_after: flags & 0x0010 != 0,
        }
    }
}

/// Fields every RAR5 header starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeader {
    /// Header CRC32
    pub crc32: u32,
    /// Size of the header after the size vint
    pub header_size: u64,
    pub header_type: u64,
    pub flags: Rar5HeaderFlags,
    pub extra_area_size: u64,
    /// Length of the data area that follows the header
    pub data_size: u64,
    /// Header length including CRC and size vint
    pub total_len: usize,
}

impl CommonHeader {
    /// Bytes that always suffice for [`CommonHeader::peek_len`].
    pub const PREFIX_LEN: usize = 7;

    /// Total header length from the first bytes of a header.
    ///
    /// Returns `Ok(None)` when `prefix` is too short to tell.
    pub fn peek_len(prefix: &[u8]) -> ParseResult<Option<usize>> {
        if prefix.len() < 5 {
            return Ok(None);
        }
        match read_vint(&prefix[4..]) {
            Some((size, consumed)) => {
                if size == 0 || size > MAX_HEADER_SIZE {
                    return Err(HeaderError::Malformed("header size out of range"));
                }
                Ok(Some(4 + consumed + size as usize))
            }
            // Header sizes never need more than three vint bytes.
            None if prefix.len() >= Self::PREFIX_LEN => {
                Err(HeaderError::Malformed("header size vint too long"))
            }
            None => Ok(None),
        }
    }

    /// Parse and CRC-check the common fields; the returned reader is
    /// positioned at the type-specific fields.
    pub fn parse(buffer: &[u8]) -> ParseResult<(Self, VintReader<'_>)> {
        need(buffer, 5)?;
        let total_len = Self::peek_len(buffer)?.ok_or(HeaderError::Truncated {
            needed: Self::PREFIX_LEN,
            have: buffer.len(),
        })?;
        need(buffer, total_len)?;

        let header = &buffer[..total_len];
        let stored = u32_at(header, 0);
        let computed = crc32(&header[4..]);
        if stored != computed {
            return Err(HeaderError::CrcMismatch { stored, computed });
        }

        let mut reader = VintReader::at(header, 4);
        let header_size = reader.read()?;
        let header_type = reader.read()?;
        let flags = Rar5HeaderFlags::from(reader.read()?);
        let extra_area_size = if flags.has_extra_area {
            reader.read()?
        } else {
            0
        };
        let data_size = if flags.has_data_area {
            reader.read()?
        } else {
            0
        };
        if extra_area_size > header_size {
            return Err(HeaderError::Malformed("extra area larger than header"));
        }

        Ok((
            Self {
                crc32: stored,
                header_size,
                header_type,
                flags,
                extra_area_size,
                data_size,
                total_len,
            },
            reader,
        ))
    }

    /// The extra area occupies the tail of the header.
    pub fn extra_area<'a>(&self, header: &'a [u8]) -> &'a [u8] {
        let start = self.total_len - self.extra_area_size as usize;
        &header[start..self.total_len]
    }
}

/// Find a record of `record_type` inside an extra area.
///
/// Each record is `size (vint) | type (vint) | data`, where `size` covers
/// the type and data but not itself.
pub fn find_extra_record(extra: &[u8], record_type: u64) -> Option<&[u8]> {
    let mut pos = 0;
    while pos < extra.len() {
        let (size, size_len) = read_vint(&extra[pos..])?;
        let size = usize::try_from(size).ok()?;
        let record_end = pos.checked_add(size_len)?.checked_add(size)?;
        if record_end > extra.len() {
            return None;
        }
        let (ty, ty_len) = read_vint(&extra[pos + size_len..record_end])?;
        if ty == record_type {
            return Some(&extra[pos + size_len + ty_len..record_end]);
        }
        pos = record_end;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_len() {
        assert_eq!(CommonHeader::peek_len(&[0, 0, 0, 0]), Ok(None));
        assert_eq!(CommonHeader::peek_len(&[0, 0, 0, 0, 0x05, 0x01]), Ok(Some(10)));
        assert_eq!(
            CommonHeader::peek_len(&[0, 0, 0, 0, 0x80, 0x01, 0x00]),
            Ok(Some(4 + 2 + 128))
        );
        assert!(CommonHeader::peek_len(&[0, 0, 0, 0, 0x00, 0, 0]).is_err());
        assert!(CommonHeader::peek_len(&[0, 0, 0, 0, 0xFF, 0xFF, 0xFF]).is_err());
    }

    #[test]
    fn test_common_header_crc() {
        // Main header from a real RAR5 archive.
        let header = [
            0x33, 0x92, 0xb5, 0xe5, 0x0a, 0x01, 0x05, 0x06, 0x00, 0x05, 0x01, 0x01, 0x80,
            0x80, 0x00,
        ];
        let (common, _) = CommonHeader::parse(&header).unwrap();
        assert_eq!(common.header_type, 1);
        assert_eq!(common.extra_area_size, 6);
        assert_eq!(common.total_len, 15);
        assert_eq!(common.extra_area(&header), &header[9..]);

        let mut corrupt = header;
        corrupt[8] = 0x01;
        assert!(matches!(
            CommonHeader::parse(&corrupt),
            Err(HeaderError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_find_extra_record() {
        // Two records: type 0x02 with 1 data byte, then type 0x01 with 2.
        let extra = [0x02, 0x02, 0xAA, 0x03, 0x01, 0xBB, 0xCC];
        assert_eq!(find_extra_record(&extra, 0x01), Some(&[0xBB, 0xCC][..]));
        assert_eq!(find_extra_record(&extra, 0x02), Some(&[0xAA][..]));
        assert_eq!(find_extra_record(&extra, 0x07), None);
        assert_eq!(find_extra_record(&[0x09, 0x01], 0x01), None);
    }
}
