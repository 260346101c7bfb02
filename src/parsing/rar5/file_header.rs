//! RAR5 file header parser.
//!
//! The file header contains information about each file in the archive,
//! including name, size, compression method, and timestamps. Service
//! headers (type 3) share the layout.

use super::{find_extra_record, CommonHeader, Rar5HeaderFlags, Rar5HeaderType};
use crate::parsing::{HeaderError, ParseResult};

/// Extra record type marking an encrypted payload.
pub const FHEXTRA_CRYPT: u64 = 0x01;

/// RAR5 file flags (specific to file header).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rar5FileFlags {
    /// File is a directory
    pub is_directory: bool,
    /// File modification time is present
    pub has_mtime: bool,
    /// File CRC32 is present
    pub has_crc32: bool,
    /// Unpacked size is unknown
    pub unpacked_size_unknown: bool,
}

impl From<u64> for Rar5FileFlags {
    fn from(flags: u64) -> Self {
        Self {
            is_directory: flags & 0x0001 != 0,
            has_mtime: flags & 0x0002 != 0,
            has_crc32: flags & 0x0004 != 0,
            unpacked_size_unknown: flags & 0x0008 != 0,
        }
    }
}

/// RAR5 compression information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rar5CompressionInfo {
    /// Compression algorithm version
    pub version: u8,
    /// Solid flag
    pub is_solid: bool,
    /// Compression method (0 = store, 1-5 = compression levels)
    pub method: u8,
    /// Dictionary size as power of 2 (minimum 17 = 128KB)
    pub dict_size_log: u8,
}

impl From<u64> for Rar5CompressionInfo {
    fn from(info: u64) -> Self {
        Self {
            version: (info & 0x3F) as u8,
            is_solid: (info >> 6) & 1 != 0,
            method: ((info >> 7) & 0x07) as u8,
            dict_size_log: ((info >> 10) & 0x0F) as u8 + 17,
        }
    }
}

impl Rar5CompressionInfo {
    pub fn is_stored(&self) -> bool {
        self.method == 0
    }
}

/// Parsed RAR5 file or service header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rar5FileHeader {
    pub header_type: Rar5HeaderType,
    pub header_flags: Rar5HeaderFlags,
    pub file_flags: Rar5FileFlags,
    /// Unpacked (original) file size
    pub unpacked_size: u64,
    /// Packed data size in this volume
    pub packed_size: u64,
    pub attributes: u64,
    /// Modification time as a Unix timestamp (if present)
    pub mtime: Option<u32>,
    /// File CRC32 (if present)
    pub file_crc32: Option<u32>,
    pub compression: Rar5CompressionInfo,
    pub host_os: u64,
    /// File name (UTF-8)
    pub name: String,
    /// Payload carries an encryption record
    pub is_encrypted: bool,
    /// Header length including CRC and size vint
    pub total_len: usize,
}

impl Rar5FileHeader {
    pub fn continues_from_previous(&self) -> bool {
        self.header_flags.split_before
    }

    pub fn continues_in_next(&self) -> bool {
        self.header_flags.split_after
    }

    pub fn is_directory(&self) -> bool {
        self.file_flags.is_directory
    }

    pub fn is_service(&self) -> bool {
        self.header_type == Rar5HeaderType::Service
    }
}

pub struct Rar5FileHeaderParser;

impl Rar5FileHeaderParser {
    pub fn parse(buffer: &[u8]) -> ParseResult<Rar5FileHeader> {
        let (common, mut reader) = CommonHeader::parse(buffer)?;
        let header_type = match Rar5HeaderType::try_from(common.header_type) {
            Ok(t @ (Rar5HeaderType::File | Rar5HeaderType::Service)) => t,
            _ => return Err(HeaderError::UnexpectedType(common.header_type)),
        };

        let file_flags = Rar5FileFlags::from(reader.read()?);
        let unpacked_size = reader.read()?;
        let attributes = reader.read()?;
        let mtime = if file_flags.has_mtime {
            Some(reader.read_u32_le()?)
        } else {
            None
        };
        let file_crc32 = if file_flags.has_crc32 {
            Some(reader.read_u32_le()?)
        } else {
            None
        };
        let compression = Rar5CompressionInfo::from(reader.read()?);
        let host_os = reader.read()?;
        let name_len = reader.read_len()?;
        let name = String::from_utf8_lossy(reader.read_bytes(name_len)?).into_owned();

        let extra_start = common.total_len - common.extra_area_size as usize;
        if reader.position() > extra_start {
            return Err(HeaderError::Malformed("file fields overlap extra area"));
        }
        let is_encrypted = common.flags.has_extra_area
            && find_extra_record(common.extra_area(buffer), FHEXTRA_CRYPT).is_some();

        Ok(Rar5FileHeader {
            header_type,
            header_flags: common.flags,
            file_flags,
            unpacked_size,
            packed_size: common.data_size,
            attributes,
            mtime,
            file_crc32,
            compression,
            host_os,
            name,
            is_encrypted,
            total_len: common.total_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc32::crc32;

    /// Frame `body` (type, flags, ... ) with its size vint and CRC32.
    fn frame(body: &[u8]) -> Vec<u8> {
        assert!(body.len() < 128);
        let mut content = vec![body.len() as u8];
        content.extend_from_slice(body);
        let mut out = crc32(&content).to_le_bytes().to_vec();
        out.extend_from_slice(&content);
        out
    }

    #[test]
    fn test_compression_info() {
        let info = Rar5CompressionInfo::from(0);
        assert_eq!(info.version, 0);
        assert_eq!(info.dict_size_log, 17);
        assert!(!info.is_solid);
        assert!(info.is_stored());

        // method=3 at bits 7-9: 0b011 << 7 = 0x180
        assert_eq!(Rar5CompressionInfo::from(0x180).method, 3);
    }

    #[test]
    fn test_parse_stored_file() {
        let mut body = vec![
            0x02, // type = file
            0x02, // flags = data area
            0x05, // data size
            0x04, // file flags = crc present
            0x05, // unpacked size
            0x20, // attributes
        ];
        body.extend_from_slice(&0x3610a686u32.to_le_bytes());
        body.extend_from_slice(&[0x00, 0x01, 0x05]); // store, unix, name length
        body.extend_from_slice(b"a.txt");

        let parsed = Rar5FileHeaderParser::parse(&frame(&body)).unwrap();
        assert_eq!(parsed.name, "a.txt");
        assert_eq!(parsed.packed_size, 5);
        assert_eq!(parsed.unpacked_size, 5);
        assert_eq!(parsed.file_crc32, Some(0x3610a686));
        assert!(parsed.compression.is_stored());
        assert!(!parsed.is_encrypted);
        assert!(!parsed.is_directory());
        assert!(!parsed.continues_in_next());
    }

    #[test]
    fn test_parse_encrypted_split_file() {
        let extra = [0x02, 0x01, 0x00]; // crypt record, one data byte
        let mut body = vec![
            0x02,
            0x1B, // extra | data | split before | split after
            extra.len() as u8,
            0x03,
            0x00, // file flags
            0x09, // unpacked size
            0x00, // attributes
            0x80, 0x03, // compression: method 3
            0x00, // windows
            0x01,
            b'x',
        ];
        body.extend_from_slice(&extra);

        let parsed = Rar5FileHeaderParser::parse(&frame(&body)).unwrap();
        assert!(parsed.is_encrypted);
        assert!(parsed.continues_from_previous());
        assert!(parsed.continues_in_next());
        assert_eq!(parsed.compression.method, 3);
        assert_eq!(parsed.packed_size, 3);
    }

    #[test]
    fn test_service_header() {
        let body = [0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, b'C', b'M', b'T'];
        let parsed = Rar5FileHeaderParser::parse(&frame(&body)).unwrap();
        assert!(parsed.is_service());
        assert_eq!(parsed.name, "CMT");
    }

    #[test]
    fn test_name_overruns_header() {
        let body = [0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09, b'a'];
        assert!(matches!(
            Rar5FileHeaderParser::parse(&frame(&body)),
            Err(HeaderError::Malformed(_))
        ));
    }
}
