//! Header walker that builds an [`ArchiveIndex`] from header reads alone.
//!
//! The walk reads each block's fixed prefix to learn the header length, then
//! the header itself, and jumps over data areas without reading them. File
//! data is recorded as [`Fragment`]s. A file whose data continues in the next
//! volume stays pending until the continuation header there is found.
//!
//! Volume boundaries:
//! - An end block announcing a next volume, or a pending split, moves the walk
//!   to the next volume. The continuation volume starts with its own
//!   signature and archive header.
//! - A pending split whose volume cannot be opened fails with
//!   [`RarError::VolumeNotFound`]. Without a pending split the walk simply
//!   ends at the last volume found.
//! - A data area running past the end of its volume is a
//!   [`RarError::CorruptHeader`]; the blocks after it cannot be located.

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::archive_index::{ArchiveEntry, ArchiveIndex, Fragment, IndexStatus};
use crate::byte_source::ByteSource;
use crate::error::{RarError, Result};
use crate::formats::{CompressionMethod, Signature};
use crate::parsing::{Block, BlockKind, FileBlock, HeaderError, MarkerHeaderParser};
use crate::volume_set::VolumeSet;

/// How a volume's block sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VolumeEnd {
    /// The archive continues in the next volume.
    Next,
    /// This was the last volume.
    Last,
}

/// A file whose data has not been fully located yet.
#[derive(Debug)]
struct PendingEntry {
    name: String,
    size: u64,
    method: CompressionMethod,
    encrypted: bool,
    is_directory: bool,
    crc: Option<u32>,
    fragments: Vec<Fragment>,
}

impl PendingEntry {
    fn new(file: &FileBlock) -> Self {
        Self {
            name: file.name.clone(),
            size: file.unpacked_size,
            method: file.method,
            encrypted: file.is_encrypted,
            is_directory: file.is_directory,
            crc: file.crc,
            fragments: Vec::new(),
        }
    }

    fn into_entry(self, position: usize) -> ArchiveEntry {
        ArchiveEntry::new(
            position,
            self.name,
            self.size,
            self.method,
            self.encrypted,
            self.is_directory,
            self.crc,
            self.fragments,
        )
    }
}

/// Builds archive indexes by walking volume headers.
pub struct HeaderParser;

impl HeaderParser {
    /// Index every entry, failing on the first structural error.
    pub async fn parse(volumes: &VolumeSet) -> Result<ArchiveIndex> {
        let mut walker = Walker::new(volumes);
        walker.walk().await?;
        Ok(walker.finish(IndexStatus::Complete))
    }

    /// Index as much as possible.
    ///
    /// A corrupt header or missing continuation volume stops the walk and
    /// yields the entries completed so far, marked
    /// [`IndexStatus::Partial`]. An entry whose data was still being stitched
    /// together is dropped. Archives that cannot be listed at all
    /// ([`RarError::NotAnArchive`], [`RarError::HeadersEncrypted`]) and
    /// transport failures still fail.
    pub async fn parse_partial(volumes: &VolumeSet) -> Result<ArchiveIndex> {
        let mut walker = Walker::new(volumes);
        match walker.walk().await {
            Ok(()) => Ok(walker.finish(IndexStatus::Complete)),
            Err(e @ (RarError::CorruptHeader { .. } | RarError::VolumeNotFound { .. })) => {
                warn!(error = %e, entries = walker.entries.len(), "index is partial");
                walker.pending = None;
                Ok(walker.finish(IndexStatus::Partial {
                    reason: e.to_string(),
                }))
            }
            Err(e) => Err(e),
        }
    }
}

struct Walker<'a> {
    volumes: &'a VolumeSet,
    format: Signature,
    entries: Vec<ArchiveEntry>,
    pending: Option<PendingEntry>,
    volume_count: usize,
}

impl<'a> Walker<'a> {
    fn new(volumes: &'a VolumeSet) -> Self {
        Self {
            volumes,
            format: Signature::Rar50,
            entries: Vec::new(),
            pending: None,
            volume_count: 0,
        }
    }

    fn finish(self, status: IndexStatus) -> ArchiveIndex {
        debug!(
            entries = self.entries.len(),
            volumes = self.volume_count,
            ?status,
            "index built"
        );
        ArchiveIndex::new(self.format, self.entries, status, self.volume_count)
    }

    async fn walk(&mut self) -> Result<()> {
        let mut source = self.volumes.volume(0).await?;
        let (signature, mut cursor) = locate_signature(source.as_ref()).await?;
        self.format = signature;
        debug!(volume = %source.name(), ?signature, offset = cursor, "found signature");

        let mut volume = 0;
        loop {
            self.volume_count = volume + 1;
            let end = self.walk_volume(volume, source.as_ref(), cursor).await?;
            trace!(volume, ?end, pending = self.pending.is_some(), "volume walked");

            if self.pending.is_none() && end == VolumeEnd::Last {
                return Ok(());
            }

            source = match self.volumes.volume(volume + 1).await {
                Ok(source) => source,
                Err(RarError::VolumeNotFound { locator }) if self.pending.is_none() => {
                    warn!(%locator, "next volume announced but not found; stopping");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            volume += 1;
            cursor = self.expect_signature(volume, source.as_ref()).await?;
        }
    }

    async fn expect_signature(&self, volume: usize, source: &dyn ByteSource) -> Result<u64> {
        let length = read_len(source, 0, MarkerHeaderParser::HEADER_SIZE as u64);
        let bytes = source.read(0, length).await?;
        let marker = MarkerHeaderParser::parse(&bytes).map_err(|e| header_error(volume, 0, e))?;
        if marker.signature != self.format {
            return Err(RarError::corrupt(
                volume,
                0,
                "volume format differs from the first volume",
            ));
        }
        Ok(marker.end())
    }

    /// Walk the blocks of one volume starting at `cursor`.
    async fn walk_volume(
        &mut self,
        volume: usize,
        source: &dyn ByteSource,
        mut cursor: u64,
    ) -> Result<VolumeEnd> {
        let length = source.length();
        let mut is_volume_archive = false;
        let mut first_block = true;

        loop {
            let prefix = match read_prefix(source, cursor).await? {
                Some(prefix) => prefix,
                None => {
                    trace!(volume, cursor, "end of volume bytes");
                    return Ok(if is_volume_archive {
                        VolumeEnd::Next
                    } else {
                        VolumeEnd::Last
                    });
                }
            };
            let header_len = match Block::header_len(self.format, &prefix) {
                Ok(Some(len)) => len as u64,
                Ok(None) => {
                    return Err(RarError::corrupt(volume, cursor, "truncated block prefix"));
                }
                Err(e) => return Err(header_error(volume, cursor, e)),
            };
            let header = if header_len <= prefix.len() as u64 {
                prefix.slice(..header_len as usize)
            } else {
                match source.read(cursor, header_len).await {
                    Ok(header) => header,
                    Err(RarError::OutOfRange { .. }) => {
                        return Err(RarError::corrupt(
                            volume,
                            cursor,
                            format!("header of {} bytes runs past end of volume", header_len),
                        ));
                    }
                    Err(e) => return Err(e),
                }
            };
            let block =
                Block::decode(self.format, &header).map_err(|e| header_error(volume, cursor, e))?;
            trace!(volume, cursor, kind = ?block.kind, data = block.data_len, "block");

            if first_block && !matches!(block.kind, BlockKind::ArchiveHeader(_)) {
                return Err(RarError::corrupt(
                    volume,
                    cursor,
                    "expected archive header after signature",
                ));
            }
            first_block = false;

            let data_offset = cursor + block.header_len;
            let available = length.map_or(block.data_len, |len| {
                len.saturating_sub(data_offset).min(block.data_len)
            });
            if available < block.data_len {
                return Err(RarError::corrupt(
                    volume,
                    cursor,
                    format!(
                        "data area of {} bytes runs past end of volume ({} available)",
                        block.data_len, available
                    ),
                ));
            }

            match &block.kind {
                BlockKind::ArchiveHeader(info) => {
                    is_volume_archive = info.is_volume;
                    if let Some(number) = info.volume_number {
                        trace!(volume, number, "volume number");
                    }
                }
                BlockKind::File(file) => {
                    self.on_file(volume, cursor, &block, file)?;
                }
                BlockKind::Service(name) => {
                    trace!(volume, cursor, service = %name, "skipping service block");
                }
                BlockKind::EndOfArchive { next_volume } => {
                    return Ok(if *next_volume {
                        VolumeEnd::Next
                    } else {
                        VolumeEnd::Last
                    });
                }
                BlockKind::Other(header_type) => {
                    trace!(volume, cursor, header_type, "skipping unknown block");
                }
            }

            cursor = data_offset.saturating_add(block.data_len);
        }
    }

    fn on_file(
        &mut self,
        volume: usize,
        cursor: u64,
        block: &Block,
        file: &FileBlock,
    ) -> Result<()> {
        let fragment = (block.flags.has_data && block.data_len > 0).then(|| Fragment {
            volume,
            offset: cursor + block.header_len,
            length: block.data_len,
        });

        if block.flags.split_before {
            let Some(pending) = self.pending.as_mut() else {
                let reason = if volume == 0 {
                    format!("{} continues from before the first volume", file.name)
                } else {
                    format!("continuation of {} without a preceding part", file.name)
                };
                return Err(RarError::corrupt(volume, cursor, reason));
            };
            if pending.name != file.name {
                return Err(RarError::corrupt(
                    volume,
                    cursor,
                    format!(
                        "continuation of {} does not match pending {}",
                        file.name, pending.name
                    ),
                ));
            }
            pending.fragments.extend(fragment);
            // Only the final part carries the CRC of the whole file.
            pending.crc = file.crc;
            trace!(volume, name = %file.name, "continued entry");
        } else {
            if let Some(pending) = &self.pending {
                return Err(RarError::corrupt(
                    volume,
                    cursor,
                    format!("expected continuation of {}, found {}", pending.name, file.name),
                ));
            }
            let mut entry = PendingEntry::new(file);
            entry.fragments.extend(fragment);
            self.pending = Some(entry);
        }

        if !block.flags.split_after {
            self.flush_pending();
        }
        Ok(())
    }

    fn flush_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            let entry = pending.into_entry(self.entries.len());
            debug!(
                position = entry.position,
                name = %entry.name,
                size = entry.size,
                fragments = entry.fragments().len(),
                "indexed entry"
            );
            self.entries.push(entry);
        }
    }
}

fn header_error(volume: usize, offset: u64, error: HeaderError) -> RarError {
    match error {
        HeaderError::Encrypted => RarError::HeadersEncrypted,
        other => RarError::corrupt(volume, offset, other.to_string()),
    }
}

/// Bytes to request at `offset`, clipped to a known source length.
fn read_len(source: &dyn ByteSource, offset: u64, wanted: u64) -> u64 {
    source
        .length()
        .map_or(wanted, |len| len.saturating_sub(offset).min(wanted))
}

/// Read the fixed block prefix at `cursor`; `None` at the end of the volume.
async fn read_prefix(source: &dyn ByteSource, cursor: u64) -> Result<Option<Bytes>> {
    let length = read_len(source, cursor, Block::PREFIX_LEN as u64);
    if length == 0 {
        return Ok(None);
    }
    match source.read(cursor, length).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(RarError::OutOfRange { .. }) if source.length().is_none() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Find the signature at the start of the first volume, or after an SFX stub
/// within [`MarkerHeaderParser::MAX_SFX_SEARCH`] bytes.
///
/// Returns the format and the offset of the first block.
async fn locate_signature(source: &dyn ByteSource) -> Result<(Signature, u64)> {
    let head_len = read_len(source, 0, MarkerHeaderParser::HEADER_SIZE as u64);
    let head = source.read(0, head_len).await?;
    if let Ok(marker) = MarkerHeaderParser::parse(&head) {
        return Ok((marker.signature, marker.end()));
    }

    let window = read_len(
        source,
        0,
        MarkerHeaderParser::MAX_SFX_SEARCH + MarkerHeaderParser::HEADER_SIZE as u64,
    );
    if window <= head_len {
        return Err(RarError::NotAnArchive);
    }
    let buffer = source.read(0, window).await?;
    match MarkerHeaderParser::search(&buffer) {
        Some(marker) if marker.offset < MarkerHeaderParser::MAX_SFX_SEARCH => {
            debug!(offset = marker.offset, "signature after SFX stub");
            Ok((marker.signature, marker.end()))
        }
        _ => Err(RarError::NotAnArchive),
    }
}
