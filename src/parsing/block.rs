//! Format-independent view of a header block.
//!
//! The header walker only needs to know how long a block is, how much data
//! follows it, and whether it describes a file, so both RAR encodings are
//! decoded into the same [`Block`].

use super::archive_header::{ArchiveHeaderParser, ARCHIVE_HEADER_TYPE};
use super::file_header::{FileHeaderParser, FILE_HEADER_TYPE, SERVICE_HEADER_TYPE};
use super::rar5::{
    CommonHeader, Rar5ArchiveHeaderParser, Rar5EndHeaderParser, Rar5FileHeaderParser,
    Rar5HeaderType,
};
use super::terminator_header::{TerminatorHeaderParser, TERMINATOR_HEADER_TYPE};
use super::{need, u16_at, u32_at, HeaderError, ParseResult};
use crate::crc32::crc16;
use crate::formats::{CompressionMethod, Signature};

/// RAR4 LONG_BLOCK: an ADD_SIZE data length follows the base header.
const RAR4_LONG_BLOCK: u16 = 0x8000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockFlags {
    /// A data area follows the header
    pub has_data: bool,
    /// RAR5 extra area inside the header
    pub extra_data_present: bool,
    /// Data continues from the previous volume
    pub split_before: bool,
    /// Data continues in the next volume
    pub split_after: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub is_volume: bool,
    pub is_solid: bool,
    pub volume_number: Option<u64>,
}

/// A file header, normalized across formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    pub name: String,
    pub unpacked_size: u64,
    pub method: CompressionMethod,
    pub crc: Option<u32>,
    pub is_directory: bool,
    pub is_encrypted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    ArchiveHeader(ArchiveInfo),
    File(FileBlock),
    /// Service header, by service name (`CMT`, `QO`, `RR`, ...).
    Service(String),
    EndOfArchive {
        next_volume: bool,
    },
    /// Any other block type; skipped using its lengths.
    Other(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    /// Length of the header itself
    pub header_len: u64,
    /// Length of the data area following the header
    pub data_len: u64,
    pub flags: BlockFlags,
}

impl Block {
    /// Bytes that always suffice for [`Block::header_len`].
    pub const PREFIX_LEN: usize = 7;

    /// Length of the header starting at `prefix`, or `None` if more bytes
    /// are needed to tell.
    pub fn header_len(signature: Signature, prefix: &[u8]) -> ParseResult<Option<usize>> {
        match signature {
            Signature::Rar15 => {
                if prefix.len() < 7 {
                    return Ok(None);
                }
                let size = u16_at(prefix, 5) as usize;
                if size < 7 {
                    return Err(HeaderError::Malformed("header shorter than 7 bytes"));
                }
                Ok(Some(size))
            }
            Signature::Rar50 => CommonHeader::peek_len(prefix),
        }
    }

    /// Decode one complete header.
    ///
    /// Encryption headers, and RAR4 archive headers announcing encrypted
    /// headers, fail with [`HeaderError::Encrypted`].
    pub fn decode(signature: Signature, header: &[u8]) -> ParseResult<Block> {
        match signature {
            Signature::Rar15 => decode_rar4(header),
            Signature::Rar50 => decode_rar5(header),
        }
    }

    pub fn file(&self) -> Option<&FileBlock> {
        match &self.kind {
            BlockKind::File(file) => Some(file),
            _ => None,
        }
    }

    /// Total bytes occupied by header and data.
    pub fn span(&self) -> u64 {
        self.header_len + self.data_len
    }
}

fn decode_rar4(header: &[u8]) -> ParseResult<Block> {
    need(header, 7)?;
    let header_type = header[2];
    let flags = u16_at(header, 3);
    let head_size = u16_at(header, 5) as u64;

    match header_type {
        ARCHIVE_HEADER_TYPE => {
            let parsed = ArchiveHeaderParser::parse(header)?;
            if parsed.headers_encrypted {
                return Err(HeaderError::Encrypted);
            }
            Ok(Block {
                kind: BlockKind::ArchiveHeader(ArchiveInfo {
                    is_volume: parsed.is_volume,
                    is_solid: parsed.is_solid,
                    volume_number: None,
                }),
                header_len: head_size,
                data_len: 0,
                flags: BlockFlags::default(),
            })
        }
        FILE_HEADER_TYPE | SERVICE_HEADER_TYPE => {
            let parsed = FileHeaderParser::parse(header)?;
            let flags = BlockFlags {
                has_data: true,
                extra_data_present: false,
                split_before: parsed.continues_from_previous,
                split_after: parsed.continues_in_next,
            };
            let kind = if parsed.is_service() {
                BlockKind::Service(parsed.name)
            } else {
                BlockKind::File(FileBlock {
                    method: CompressionMethod::from_rar4(parsed.method),
                    // The CRC of a part that continues elsewhere covers only
                    // that part; the final part carries the full-file CRC.
                    crc: Some(parsed.file_crc),
                    is_directory: parsed.is_directory,
                    is_encrypted: parsed.is_encrypted,
                    unpacked_size: parsed.unpacked_size,
                    name: parsed.name,
                })
            };
            Ok(Block {
                kind,
                header_len: head_size,
                data_len: parsed.packed_size,
                flags,
            })
        }
        TERMINATOR_HEADER_TYPE => {
            let parsed = TerminatorHeaderParser::parse(header)?;
            Ok(Block {
                kind: BlockKind::EndOfArchive {
                    next_volume: parsed.has_next_volume,
                },
                header_len: head_size,
                data_len: 0,
                flags: BlockFlags::default(),
            })
        }
        other => {
            // Unknown types are skipped only once their header CRC checks out.
            need(header, head_size as usize)?;
            let stored = u16_at(header, 0);
            let computed = crc16(&header[2..head_size as usize]);
            if stored != computed {
                return Err(HeaderError::CrcMismatch {
                    stored: stored as u32,
                    computed: computed as u32,
                });
            }
            let data_len = if flags & RAR4_LONG_BLOCK != 0 {
                if head_size < 11 {
                    return Err(HeaderError::Malformed("long block without ADD_SIZE"));
                }
                need(header, 11)?;
                u32_at(header, 7) as u64
            } else {
                0
            };
            Ok(Block {
                kind: BlockKind::Other(other as u64),
                header_len: head_size,
                data_len,
                flags: BlockFlags {
                    has_data: flags & RAR4_LONG_BLOCK != 0,
                    ..BlockFlags::default()
                },
            })
        }
    }
}

fn decode_rar5(header: &[u8]) -> ParseResult<Block> {
    let (common, _) = CommonHeader::parse(header)?;
    let header_len = common.total_len as u64;
    let flags = BlockFlags {
        has_data: common.flags.has_data_area,
        extra_data_present: common.flags.has_extra_area,
        split_before: common.flags.split_before,
        split_after: common.flags.split_after,
    };

    let kind = match Rar5HeaderType::try_from(common.header_type) {
        Ok(Rar5HeaderType::Main) => {
            let parsed = Rar5ArchiveHeaderParser::parse(header)?;
            BlockKind::ArchiveHeader(ArchiveInfo {
                is_volume: parsed.archive_flags.is_volume,
                is_solid: parsed.archive_flags.is_solid,
                volume_number: parsed.volume_number,
            })
        }
        Ok(Rar5HeaderType::File | Rar5HeaderType::Service) => {
            let parsed = Rar5FileHeaderParser::parse(header)?;
            if parsed.is_service() {
                BlockKind::Service(parsed.name)
            } else {
                BlockKind::File(FileBlock {
                    method: CompressionMethod::from_rar5(parsed.compression.method),
                    crc: parsed.file_crc32,
                    is_directory: parsed.is_directory(),
                    is_encrypted: parsed.is_encrypted,
                    unpacked_size: parsed.unpacked_size,
                    name: parsed.name,
                })
            }
        }
        Ok(Rar5HeaderType::Encryption) => return Err(HeaderError::Encrypted),
        Ok(Rar5HeaderType::End) => {
            let parsed = Rar5EndHeaderParser::parse(header)?;
            BlockKind::EndOfArchive {
                next_volume: parsed.end_flags.has_next_volume,
            }
        }
        Err(()) => BlockKind::Other(common.header_type),
    };

    Ok(Block {
        kind,
        header_len,
        data_len: common.data_size,
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc32::crc32;

    fn rar4_block(header_type: u8, flags: u16, tail: &[u8]) -> Vec<u8> {
        let size = (7 + tail.len()) as u16;
        let mut out = vec![0, 0, header_type];
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(tail);
        let crc = crc16(&out[2..]);
        out[..2].copy_from_slice(&crc.to_le_bytes());
        out
    }

    fn rar5_block(body: &[u8]) -> Vec<u8> {
        let mut content = vec![body.len() as u8];
        content.extend_from_slice(body);
        let mut out = crc32(&content).to_le_bytes().to_vec();
        out.extend_from_slice(&content);
        out
    }

    #[test]
    fn test_rar4_header_len() {
        let block = rar4_block(0x7B, 0, &[]);
        assert_eq!(Block::header_len(Signature::Rar15, &block), Ok(Some(7)));
        assert_eq!(Block::header_len(Signature::Rar15, &block[..3]), Ok(None));
    }

    #[test]
    fn test_rar4_long_block_skips_add_size() {
        // Old-style recovery block (0x78) with 100 bytes of data.
        let block = rar4_block(0x78, 0x8000, &100u32.to_le_bytes());
        let decoded = Block::decode(Signature::Rar15, &block).unwrap();
        assert_eq!(decoded.kind, BlockKind::Other(0x78));
        assert_eq!(decoded.header_len, 11);
        assert_eq!(decoded.data_len, 100);
        assert_eq!(decoded.span(), 111);
    }

    #[test]
    fn test_rar4_unknown_block_checks_crc() {
        // A file header whose type byte was damaged must not be skipped
        // using its packed size as ADD_SIZE.
        let mut block = rar4_block(0x74, 0x8000, &[0x10, 0, 0, 0, 0x10, 0, 0, 0]);
        block[2] = 0x79;
        assert!(matches!(
            Block::decode(Signature::Rar15, &block),
            Err(HeaderError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_rar4_encrypted_headers() {
        let block = rar4_block(0x73, 0x0080, &[0; 6]);
        assert_eq!(
            Block::decode(Signature::Rar15, &block),
            Err(HeaderError::Encrypted)
        );
    }

    #[test]
    fn test_rar4_end_of_archive() {
        let block = rar4_block(0x7B, 0x0001, &[]);
        let decoded = Block::decode(Signature::Rar15, &block).unwrap();
        assert_eq!(decoded.kind, BlockKind::EndOfArchive { next_volume: true });
    }

    #[test]
    fn test_rar5_encryption_header() {
        let block = rar5_block(&[0x04, 0x00, 0x00, 0x0F]);
        assert_eq!(
            Block::decode(Signature::Rar50, &block),
            Err(HeaderError::Encrypted)
        );
    }

    #[test]
    fn test_rar5_unknown_type_keeps_data_len() {
        let block = rar5_block(&[0x09, 0x02, 0x20]);
        let decoded = Block::decode(Signature::Rar50, &block).unwrap();
        assert_eq!(decoded.kind, BlockKind::Other(9));
        assert_eq!(decoded.data_len, 0x20);
        assert!(decoded.file().is_none());
    }

    #[test]
    fn test_rar5_main_volume() {
        let block = rar5_block(&[0x01, 0x00, 0x03, 0x02]);
        let decoded = Block::decode(Signature::Rar50, &block).unwrap();
        assert_eq!(
            decoded.kind,
            BlockKind::ArchiveHeader(ArchiveInfo {
                is_volume: true,
                is_solid: false,
                volume_number: Some(2),
            })
        );
    }
}
