//! Member extraction.
//!
//! Stored, unencrypted members are copied straight from their fragments to
//! the sink, verifying the CRC32 on the way. Everything else goes to the
//! configured [`ExternalDecoder`](crate::ExternalDecoder).

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::archive_index::ArchiveEntry;
use crate::config::OpenOptions;
use crate::crc32::Crc32;
use crate::decoder::{DecodeRequest, VolumeHandle};
use crate::error::{RarError, Result};
use crate::volume_set::VolumeSet;

/// Copies or delegates members of one archive.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionEngine<'a> {
    volumes: &'a VolumeSet,
    options: &'a OpenOptions,
}

impl<'a> ExtractionEngine<'a> {
    pub fn new(volumes: &'a VolumeSet, options: &'a OpenOptions) -> Self {
        Self { volumes, options }
    }

    /// Write the unpacked member to `sink`, returning the bytes written.
    ///
    /// On [`RarError::PayloadCorrupt`] the bytes have already been written;
    /// nothing is rolled back.
    pub async fn extract<W>(
        &self,
        entry: &ArchiveEntry,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if entry.is_directory {
            return Err(RarError::NotAFile {
                name: entry.name.clone(),
            });
        }
        if cancel.is_cancelled() {
            return Err(RarError::Cancelled);
        }

        if entry.is_store() && !entry.encrypted {
            self.copy_stored(entry, sink, cancel).await
        } else {
            self.delegate(entry, sink, cancel).await
        }
    }

    async fn copy_stored<W>(
        &self,
        entry: &ArchiveEntry,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let fragments = entry.slice_fragments(0, entry.size);
        let mut stream = self.volumes.read_across_volumes(&fragments);
        let mut crc = Crc32::new();
        let mut written = 0u64;
        let truncated = |actual| RarError::TruncatedPayload {
            name: entry.name.clone(),
            expected: entry.size,
            actual,
        };

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(entry = %entry.name, written, "extraction cancelled");
                    return Err(RarError::Cancelled);
                }
                chunk = stream.next_chunk() => chunk,
            };
            let chunk = match next {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(RarError::OutOfRange { .. })) => return Err(truncated(written)),
                Some(Err(e)) => return Err(e),
            };
            crc.update(&chunk);
            sink.write_all(&chunk).await.map_err(RarError::SinkWrite)?;
            written += chunk.len() as u64;
            trace!(entry = %entry.name, written, "copied chunk");
        }
        sink.flush().await.map_err(RarError::SinkWrite)?;

        if written < entry.size {
            return Err(truncated(written));
        }
        if self.options.verify_crc {
            if let Some(expected) = entry.crc {
                let computed = crc.finalize();
                if computed != expected {
                    return Err(RarError::PayloadCorrupt {
                        name: entry.name.clone(),
                        expected,
                        computed,
                    });
                }
            }
        }
        debug!(entry = %entry.name, written, "extracted stored entry");
        Ok(written)
    }

    async fn delegate<W>(
        &self,
        entry: &ArchiveEntry,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if entry.encrypted && self.options.password.is_none() {
            return Err(RarError::PasswordRequired {
                name: entry.name.clone(),
            });
        }
        let Some(decoder) = &self.options.decoder else {
            return Err(RarError::DecoderUnavailable(format!(
                "no decoder configured for {} (method {}{})",
                entry.name,
                entry.method,
                if entry.encrypted { ", encrypted" } else { "" }
            )));
        };

        let request = self.decode_request(entry).await?;
        debug!(entry = %entry.name, method = %entry.method, volumes = request.volumes.len(), "delegating to decoder");
        decoder.decode(&request, sink, cancel).await
    }

    /// Build the decoder request for `entry`, opening every volume up to the
    /// last one that holds its data.
    pub async fn decode_request(&self, entry: &ArchiveEntry) -> Result<DecodeRequest> {
        let last = entry.volumes().last().copied().unwrap_or(0);
        self.volumes.volume(last).await?;
        let volumes = self
            .volumes
            .volumes()
            .await
            .into_iter()
            .take(last + 1)
            .enumerate()
            .map(|(index, volume)| VolumeHandle {
                index,
                locator: volume.locator,
                source: volume.source,
            })
            .collect();

        Ok(DecodeRequest {
            volumes,
            entry_name: entry.name.clone(),
            position: entry.position,
            method: entry.method,
            encrypted: entry.encrypted,
            password: self.options.password.clone(),
            size: entry.size,
            crc: entry.crc,
        })
    }

    /// Read `length` bytes of a stored member starting at `offset`.
    ///
    /// The range is clipped to the member's size. Only stored, unencrypted
    /// members support ranged reads.
    pub async fn read_range(&self, entry: &ArchiveEntry, offset: u64, length: u64) -> Result<Bytes> {
        if entry.is_directory {
            return Err(RarError::NotAFile {
                name: entry.name.clone(),
            });
        }
        if !entry.is_store() || entry.encrypted {
            return Err(RarError::DecodeFailed {
                name: entry.name.clone(),
                reason: "ranged reads need a stored, unencrypted entry".to_string(),
            });
        }
        if offset > entry.size {
            return Err(RarError::OutOfRange {
                offset,
                length,
                total: entry.size,
            });
        }

        let length = length.min(entry.size - offset);
        let fragments = entry.slice_fragments(offset, length);
        let mut stream = self.volumes.read_across_volumes(&fragments);
        // Size from the bytes the fragments actually hold, not the declared size.
        let available: u64 = fragments.iter().map(|f| f.length).sum();
        let mut out = BytesMut::with_capacity(usize::try_from(available).unwrap_or(0));
        while let Some(chunk) = stream.next_chunk().await {
            out.extend_from_slice(&chunk?);
        }
        if (out.len() as u64) < length {
            return Err(RarError::TruncatedPayload {
                name: entry.name.clone(),
                expected: length,
                actual: out.len() as u64,
            });
        }
        Ok(out.freeze())
    }
}
