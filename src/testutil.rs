//! Byte-exact RAR archive builders for tests.
//!
//! Payloads are written as-is (Store, or tagged with another method without
//! actually compressing), which is all the index and Store extraction need.

use crate::crc32::{crc16, crc32};
use crate::formats::Signature;

#[derive(Debug, Clone)]
struct Member {
    name: String,
    data: Vec<u8>,
    directory: bool,
    encrypted: bool,
    /// 0 = store, 1..=5 compression levels
    method: u8,
    /// Replaces the CRC of the final part.
    crc_override: Option<u32>,
}

/// Builds RAR4 or RAR5 archives, optionally split across volumes.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    signature: Signature,
    members: Vec<Member>,
    sfx: Vec<u8>,
    comment: bool,
}

impl ArchiveBuilder {
    pub fn rar5() -> Self {
        Self::new(Signature::Rar50)
    }

    pub fn rar4() -> Self {
        Self::new(Signature::Rar15)
    }

    fn new(signature: Signature) -> Self {
        Self {
            signature,
            members: Vec::new(),
            sfx: Vec::new(),
            comment: false,
        }
    }

    fn push(mut self, name: &str, data: &[u8], directory: bool, encrypted: bool, method: u8) -> Self {
        self.members.push(Member {
            name: name.to_string(),
            data: data.to_vec(),
            directory,
            encrypted,
            method,
            crc_override: None,
        });
        self
    }

    pub fn file(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, false, false, 0)
    }

    pub fn dir(self, name: &str) -> Self {
        self.push(name, &[], true, false, 0)
    }

    pub fn encrypted(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, false, true, 0)
    }

    /// A member tagged as compressed with the "Normal" method.
    pub fn compressed(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, false, false, 3)
    }

    /// Store a wrong CRC for the most recently added member.
    pub fn wrong_crc(mut self) -> Self {
        if let Some(last) = self.members.last_mut() {
            last.crc_override = Some(crc32(&last.data) ^ 0xFFFF_FFFF);
        }
        self
    }

    /// Prefix the first volume with an executable stub.
    pub fn sfx(mut self, stub: &[u8]) -> Self {
        self.sfx = stub.to_vec();
        self
    }

    /// Add an archive comment service block before the members.
    pub fn with_comment(mut self) -> Self {
        self.comment = true;
        self
    }

    /// Single-volume archive.
    pub fn build(&self) -> Vec<u8> {
        self.build_volumes(&[]).remove(0)
    }

    /// Multi-volume archive.
    ///
    /// All member payloads are laid end to end; each entry of `cuts` is a
    /// position in that stream where a new volume begins. Members straddling
    /// a cut are split with continuation headers.
    pub fn build_volumes(&self, cuts: &[usize]) -> Vec<Vec<u8>> {
        let total: usize = self.members.iter().map(|m| m.data.len()).sum();
        let mut bounds = vec![0];
        bounds.extend_from_slice(cuts);
        bounds.push(total.max(cuts.last().copied().unwrap_or(0)));
        let count = cuts.len() + 1;

        let mut volumes = Vec::with_capacity(count);
        for v in 0..count {
            let (vol_start, vol_end) = (bounds[v], bounds[v + 1]);
            let mut out = if v == 0 { self.sfx.clone() } else { Vec::new() };
            match self.signature {
                Signature::Rar15 => out.extend_from_slice(Signature::RAR15),
                Signature::Rar50 => out.extend_from_slice(Signature::RAR50),
            }
            out.extend(self.main_header(count > 1, v));
            if v == 0 && self.comment {
                out.extend(self.service_header("CMT", b"archive comment"));
            }

            let mut stream_pos = 0;
            for member in &self.members {
                let start = stream_pos;
                let end = start + member.data.len();
                stream_pos = end;

                if member.data.is_empty() {
                    let home = cuts.iter().filter(|&&c| c <= start).count();
                    if home == v {
                        out.extend(self.file_header(member, 0..0, false, false));
                    }
                    continue;
                }
                let part_start = start.max(vol_start);
                let part_end = end.min(vol_end);
                if part_start >= part_end {
                    continue;
                }
                let split_before = part_start > start;
                let split_after = part_end < end;
                out.extend(self.file_header(
                    member,
                    (part_start - start)..(part_end - start),
                    split_before,
                    split_after,
                ));
                out.extend_from_slice(&member.data[part_start - start..part_end - start]);
            }

            out.extend(self.end_header(v + 1 < count));
            volumes.push(out);
        }
        volumes
    }

    fn main_header(&self, multi: bool, index: usize) -> Vec<u8> {
        match self.signature {
            Signature::Rar15 => {
                let mut flags = 0u16;
                if multi {
                    flags |= 0x0001 | 0x0010;
                    if index == 0 {
                        flags |= 0x0100;
                    }
                }
                rar4_block(0x73, flags, &[0; 6])
            }
            Signature::Rar50 => {
                let mut body = vec![0x01, 0x00];
                if multi && index > 0 {
                    push_vint(&mut body, 0x3);
                    push_vint(&mut body, index as u64);
                } else {
                    push_vint(&mut body, u64::from(multi));
                }
                rar5_block(&body)
            }
        }
    }

    fn end_header(&self, next_volume: bool) -> Vec<u8> {
        match self.signature {
            Signature::Rar15 => rar4_block(0x7B, 0x4000 | u16::from(next_volume), &[]),
            Signature::Rar50 => rar5_block(&[0x05, 0x00, u8::from(next_volume)]),
        }
    }

    fn service_header(&self, name: &str, data: &[u8]) -> Vec<u8> {
        let member = Member {
            name: name.to_string(),
            data: data.to_vec(),
            directory: false,
            encrypted: false,
            method: 0,
            crc_override: None,
        };
        let mut out = match self.signature {
            Signature::Rar15 => rar4_file_header(0x7A, &member, data.len(), crc32(data), false, false),
            Signature::Rar50 => rar5_file_header(0x03, &member, data.len(), crc32(data), false, false),
        };
        out.extend_from_slice(data);
        out
    }

    fn file_header(
        &self,
        member: &Member,
        part: std::ops::Range<usize>,
        split_before: bool,
        split_after: bool,
    ) -> Vec<u8> {
        let packed = part.len();
        let crc = if split_after {
            crc32(&member.data[part])
        } else {
            member.crc_override.unwrap_or_else(|| crc32(&member.data))
        };
        match self.signature {
            Signature::Rar15 => rar4_file_header(0x74, member, packed, crc, split_before, split_after),
            Signature::Rar50 => rar5_file_header(0x02, member, packed, crc, split_before, split_after),
        }
    }
}

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

fn rar4_file_header(
    header_type: u8,
    member: &Member,
    packed: usize,
    crc: u32,
    split_before: bool,
    split_after: bool,
) -> Vec<u8> {
    let mut flags = 0x8000u16;
    if split_before {
        flags |= 0x0001;
    }
    if split_after {
        flags |= 0x0002;
    }
    if member.encrypted {
        flags |= 0x0004;
    }
    if member.directory {
        flags |= 0x00E0;
    }
    if !member.name.is_ascii() {
        // Unicode flag without a NUL separator: the name is plain UTF-8.
        flags |= 0x0200;
    }
    let name = member.name.as_bytes();

    let mut tail = Vec::new();
    tail.extend_from_slice(&(packed as u32).to_le_bytes());
    tail.extend_from_slice(&(member.data.len() as u32).to_le_bytes());
    tail.push(3); // host OS: Unix
    tail.extend_from_slice(&crc.to_le_bytes());
    tail.extend_from_slice(&0x5A21_0000u32.to_le_bytes()); // DOS time
    tail.push(29); // version needed
    tail.push(0x30 + member.method);
    tail.extend_from_slice(&(name.len() as u16).to_le_bytes());
    tail.extend_from_slice(&(if member.directory { 0x41EDu32 } else { 0x81A4 }).to_le_bytes());
    tail.extend_from_slice(name);
    rar4_block(header_type, flags, &tail)
}

pub fn push_vint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Frame a RAR5 header body (type onwards) with size vint and CRC32.
pub fn rar5_block(body: &[u8]) -> Vec<u8> {
    let mut content = Vec::with_capacity(body.len() + 3);
    push_vint(&mut content, body.len() as u64);
    content.extend_from_slice(body);
    let mut out = crc32(&content).to_le_bytes().to_vec();
    out.extend_from_slice(&content);
    out
}

fn rar5_file_header(
    header_type: u8,
    member: &Member,
    packed: usize,
    crc: u32,
    split_before: bool,
    split_after: bool,
) -> Vec<u8> {
    // Encryption record: size, type 0x01, version, flags, KDF count.
    let extra: &[u8] = if member.encrypted {
        &[0x04, 0x01, 0x00, 0x00, 0x0F]
    } else {
        &[]
    };

    let mut header_flags = 0u64;
    if !extra.is_empty() {
        header_flags |= 0x01;
    }
    if !member.directory {
        header_flags |= 0x02;
    }
    if split_before {
        header_flags |= 0x08;
    }
    if split_after {
        header_flags |= 0x10;
    }

    let mut body = vec![header_type];
    push_vint(&mut body, header_flags);
    if !extra.is_empty() {
        push_vint(&mut body, extra.len() as u64);
    }
    if !member.directory {
        push_vint(&mut body, packed as u64);
    }
    let file_flags = if member.directory { 0x01 } else { 0x04 };
    push_vint(&mut body, file_flags);
    push_vint(&mut body, member.data.len() as u64);
    push_vint(&mut body, 0x20);
    if !member.directory {
        body.extend_from_slice(&crc.to_le_bytes());
    }
    push_vint(&mut body, u64::from(member.method) << 7);
    push_vint(&mut body, 1); // host OS: Unix
    push_vint(&mut body, member.name.len() as u64);
    body.extend_from_slice(member.name.as_bytes());
    body.extend_from_slice(extra);
    rar5_block(&body)
}

/// Position of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .unwrap_or_else(|| panic!("{:?} not found", String::from_utf8_lossy(needle)))
}

/// Deterministic test payload.
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Decoder that records every request and writes a fixed body.
#[derive(Debug, Default)]
pub struct RecordingDecoder {
    pub requests: std::sync::Mutex<Vec<crate::decoder::DecodeRequest>>,
}

impl RecordingDecoder {
    pub const OUTPUT: &'static [u8] = b"decoded by fake";

    pub fn requests(&self) -> Vec<crate::decoder::DecodeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl crate::decoder::ExternalDecoder for RecordingDecoder {
    fn decode<'a>(
        &'a self,
        request: &'a crate::decoder::DecodeRequest,
        sink: crate::decoder::DecodeSink<'a>,
        _cancel: &'a tokio_util::sync::CancellationToken,
    ) -> crate::decoder::DecodeFuture<'a> {
        Box::pin(async move {
            use tokio::io::AsyncWriteExt;
            self.requests.lock().unwrap().push(request.clone());
            sink.write_all(Self::OUTPUT).await?;
            Ok(Self::OUTPUT.len() as u64)
        })
    }
}

/// Wiremock responder that honors single `Range: bytes=a-b` requests.
///
/// Requests without a range get the whole body with `200 OK`.
#[cfg(feature = "http")]
pub fn range_responder(
    data: Vec<u8>,
) -> impl Fn(&wiremock::Request) -> wiremock::ResponseTemplate + Send + Sync + 'static {
    ranged(data, true)
}

/// Like [`range_responder`], but `Content-Range` reports the total as `*`.
#[cfg(feature = "http")]
pub fn unsized_range_responder(
    data: Vec<u8>,
) -> impl Fn(&wiremock::Request) -> wiremock::ResponseTemplate + Send + Sync + 'static {
    ranged(data, false)
}

#[cfg(feature = "http")]
fn ranged(
    data: Vec<u8>,
    report_total: bool,
) -> impl Fn(&wiremock::Request) -> wiremock::ResponseTemplate + Send + Sync + 'static {
    use std::sync::Arc;
    use wiremock::ResponseTemplate;

    let data = Arc::new(data);
    move |req: &wiremock::Request| {
        let total = data.len() as u64;
        let range = req
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.split_once('-'))
            .and_then(|(a, b)| Some((a.parse::<u64>().ok()?, b.parse::<u64>().ok()?)));

        let Some((start, end)) = range else {
            return ResponseTemplate::new(200).set_body_bytes(data.to_vec());
        };
        let shown = if report_total {
            total.to_string()
        } else {
            "*".to_string()
        };
        if start >= total {
            return ResponseTemplate::new(416)
                .insert_header("Content-Range", format!("bytes */{}", shown));
        }
        let end = end.min(total - 1);
        ResponseTemplate::new(206)
            .insert_header("Content-Range", format!("bytes {}-{}/{}", start, end, shown))
            .set_body_bytes(data[start as usize..=end as usize].to_vec())
    }
}

/// Serve each `(path, bytes)` pair with range support.
#[cfg(feature = "http")]
pub async fn serve_volumes(volumes: &[(&str, Vec<u8>)]) -> wiremock::MockServer {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer};

    let server = MockServer::start().await;
    for (name, data) in volumes {
        Mock::given(method("GET"))
            .and(path(format!("/{}", name)))
            .respond_with(range_responder(data.clone()))
            .mount(&server)
            .await;
    }
    server
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::rar5::read_vint;

    #[test]
    fn test_push_vint() {
        for value in [0u64, 1, 127, 128, 300, 1 << 20] {
            let mut out = Vec::new();
            push_vint(&mut out, value);
            assert_eq!(read_vint(&out), Some((value, out.len())));
        }
    }

    #[test]
    fn test_volume_bytes_start_with_signature() {
        let volumes = ArchiveBuilder::rar4()
            .file("a", &payload(10, 1))
            .build_volumes(&[4]);
        assert_eq!(volumes.len(), 2);
        for volume in &volumes {
            assert!(volume.starts_with(Signature::RAR15));
        }
    }
}
