//! File header parser (RAR 1.5-4.x).
//!
//! Each file in a RAR archive has a file header that describes
//! the file's name, size, compression method, etc. Service headers
//! (comments, NTFS streams, recovery records) share the same layout.

use super::{need, u16_at, u32_at, HeaderError, ParseResult};
use crate::crc32::crc16;

/// File header type constant.
pub const FILE_HEADER_TYPE: u8 = 0x74; // 116
/// Service header type constant.
pub const SERVICE_HEADER_TYPE: u8 = 0x7A; // 122

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub crc: u16,
    pub header_type: u8,
    pub flags: u16,
    pub head_size: u16,
    pub packed_size: u64,
    pub unpacked_size: u64,
    pub host_os: u8,
    pub file_crc: u32,
    pub timestamp: u32,
    pub version: u8,
    pub method: u8,
    pub attributes: u32,
    pub name: String,
    // Parsed flags
    pub continues_from_previous: bool,
    pub continues_in_next: bool,
    pub is_encrypted: bool,
    pub has_comment: bool,
    pub is_solid: bool,
    pub is_directory: bool,
    pub has_high_size: bool,
    pub has_unicode_name: bool,
    pub has_salt: bool,
    pub has_extended_time: bool,
    /// 8-byte encryption salt (if has_salt is true)
    pub salt: Option<[u8; 8]>,
}

impl FileHeader {
    pub fn is_service(&self) -> bool {
        self.header_type == SERVICE_HEADER_TYPE
    }
}

pub struct FileHeaderParser;

impl FileHeaderParser {
    /// Minimum fixed header size before filename.
    pub const MIN_HEADER_SIZE: usize = 32;

    pub fn parse(buffer: &[u8]) -> ParseResult<FileHeader> {
        need(buffer, 7)?;

        let crc = u16_at(buffer, 0);
        let header_type = buffer[2];
        let flags = u16_at(buffer, 3);
        let head_size = u16_at(buffer, 5);

        if header_type != FILE_HEADER_TYPE && header_type != SERVICE_HEADER_TYPE {
            return Err(HeaderError::UnexpectedType(header_type as u64));
        }
        if (head_size as usize) < Self::MIN_HEADER_SIZE {
            return Err(HeaderError::Malformed("file header shorter than 32 bytes"));
        }
        need(buffer, head_size as usize)?;
        // Everything below reads inside the declared header only.
        let buffer = &buffer[..head_size as usize];

        let computed = crc16(&buffer[2..]);
        if computed != crc {
            return Err(HeaderError::CrcMismatch {
                stored: crc as u32,
                computed: computed as u32,
            });
        }

        let mut packed_size = u32_at(buffer, 7) as u64;
        let mut unpacked_size = u32_at(buffer, 11) as u64;
        let host_os = buffer[15];
        let file_crc = u32_at(buffer, 16);
        let timestamp = u32_at(buffer, 20);
        let version = buffer[24];
        let method = buffer[25];
        let name_size = u16_at(buffer, 26) as usize;
        let attributes = u32_at(buffer, 28);
        let mut offset = Self::MIN_HEADER_SIZE;

        let has_high_size = (flags & 0x0100) != 0; // LHD_LARGE - 64-bit sizes follow
        let has_unicode_name = (flags & 0x0200) != 0;
        let has_salt = (flags & 0x0400) != 0;
        let has_extended_time = (flags & 0x1000) != 0;

        if has_high_size {
            need(buffer, offset + 8)?;
            packed_size |= (u32_at(buffer, offset) as u64) << 32;
            unpacked_size |= (u32_at(buffer, offset + 4) as u64) << 32;
            offset += 8;
        }

        let name_end = offset + name_size;
        if buffer.len() < name_end {
            return Err(HeaderError::Malformed("file name extends past header"));
        }
        let raw_name = &buffer[offset..name_end];
        let name = if has_unicode_name {
            decode_unicode_name(raw_name)
        } else {
            String::from_utf8_lossy(raw_name).into_owned()
        };
        offset = name_end;

        let salt = if has_salt && buffer.len() >= offset + 8 {
            let mut s = [0u8; 8];
            s.copy_from_slice(&buffer[offset..offset + 8]);
            Some(s)
        } else {
            None
        };

        Ok(FileHeader {
            crc,
            header_type,
            flags,
            head_size,
            packed_size,
            unpacked_size,
            host_os,
            file_crc,
            timestamp,
            version,
            method,
            attributes,
            name,
            continues_from_previous: (flags & 0x0001) != 0,
            continues_in_next: (flags & 0x0002) != 0,
            is_encrypted: (flags & 0x0004) != 0,
            has_comment: (flags & 0x0008) != 0,
            is_solid: (flags & 0x0010) != 0,
            is_directory: (flags & 0x00E0) == 0x00E0,
            has_high_size,
            has_unicode_name,
            has_salt,
            has_extended_time,
            salt,
        })
    }
}

/// Decode a RAR 3.x "unicode" file name.
///
/// The field holds an ASCII name, a NUL, then a compressed UTF-16 form that
/// patches the ASCII bytes. Without the NUL the whole field is UTF-8.
fn decode_unicode_name(raw: &[u8]) -> String {
    let Some(split) = raw.iter().position(|&b| b == 0) else {
        return String::from_utf8_lossy(raw).into_owned();
    };
    let ascii = &raw[..split];
    let enc = &raw[split + 1..];

    let Some((&high, mut enc)) = enc.split_first() else {
        return String::from_utf8_lossy(ascii).into_owned();
    };
    let high = (high as u16) << 8;
    let mut out: Vec<u16> = Vec::with_capacity(ascii.len());
    let mut flags = 0u8;
    let mut flag_bits = 0u32;

    while !enc.is_empty() {
        if flag_bits == 0 {
            flags = enc[0];
            enc = &enc[1..];
            flag_bits = 8;
            if enc.is_empty() {
                break;
            }
        }
        let op = flags >> 6;
        flags <<= 2;
        flag_bits -= 2;

        match op {
            0 => {
                out.push(enc[0] as u16);
                enc = &enc[1..];
            }
            1 => {
                out.push(enc[0] as u16 | high);
                enc = &enc[1..];
            }
            2 => {
                if enc.len() < 2 {
                    break;
                }
                out.push(u16::from_le_bytes([enc[0], enc[1]]));
                enc = &enc[2..];
            }
            _ => {
                let length = enc[0];
                enc = &enc[1..];
                if length & 0x80 != 0 {
                    let Some((&correction, rest)) = enc.split_first() else {
                        break;
                    };
                    enc = rest;
                    for _ in 0..(length & 0x7F) as usize + 2 {
                        let Some(&b) = ascii.get(out.len()) else {
                            break;
                        };
                        out.push(b.wrapping_add(correction) as u16 | high);
                    }
                } else {
                    for _ in 0..length as usize + 2 {
                        let Some(&b) = ascii.get(out.len()) else {
                            break;
                        };
                        out.push(b as u16);
                    }
                }
            }
        }
    }

    String::from_utf16_lossy(&out)
}
