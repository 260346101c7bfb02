//! RarArchive - an open archive session.
//!
//! Opening resolves the first volume, walks every header and keeps the
//! resulting index. Continuation volumes opened during the walk stay open
//! for extraction; dropping or [closing](RarArchive::close) the session
//! releases them.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::archive_index::{ArchiveEntry, ArchiveIndex};
use crate::byte_source::{DefaultOpener, SourceOpener};
use crate::config::OpenOptions;
use crate::error::{RarError, Result};
use crate::extraction::ExtractionEngine;
use crate::header_parser::HeaderParser;
use crate::locator::Locator;
use crate::volume_set::VolumeSet;

/// Outcome of one member of a batch extraction.
#[derive(Debug)]
pub struct BatchOutcome {
    pub position: usize,
    pub name: String,
    /// Bytes written, or why this member failed.
    pub result: Result<u64>,
}

/// An open RAR archive.
#[derive(Debug)]
pub struct RarArchive {
    volumes: VolumeSet,
    index: ArchiveIndex,
    options: OpenOptions,
}

impl RarArchive {
    /// Open an archive and index it, failing on any structural error.
    pub async fn open(locator: impl Into<Locator>, options: OpenOptions) -> Result<Self> {
        let opener = Arc::new(DefaultOpener::new(options.source.clone()));
        Self::open_with(locator, opener, options).await
    }

    /// Open an archive, keeping whatever could be indexed before a corrupt
    /// header or missing volume. Check [`ArchiveIndex::status`].
    pub async fn open_partial(locator: impl Into<Locator>, options: OpenOptions) -> Result<Self> {
        let opener = Arc::new(DefaultOpener::new(options.source.clone()));
        Self::open_partial_with(locator, opener, options).await
    }

    /// Like [`RarArchive::open`], resolving volumes through `opener`.
    pub async fn open_with(
        locator: impl Into<Locator>,
        opener: Arc<dyn SourceOpener>,
        options: OpenOptions,
    ) -> Result<Self> {
        let volumes = VolumeSet::open_with(locator.into(), opener).await?;
        let index = HeaderParser::parse(&volumes).await?;
        Ok(Self::from_parts(volumes, index, options))
    }

    /// Like [`RarArchive::open_partial`], resolving volumes through `opener`.
    pub async fn open_partial_with(
        locator: impl Into<Locator>,
        opener: Arc<dyn SourceOpener>,
        options: OpenOptions,
    ) -> Result<Self> {
        let volumes = VolumeSet::open_with(locator.into(), opener).await?;
        let index = HeaderParser::parse_partial(&volumes).await?;
        Ok(Self::from_parts(volumes, index, options))
    }

    fn from_parts(volumes: VolumeSet, index: ArchiveIndex, options: OpenOptions) -> Self {
        info!(
            entries = index.len(),
            volumes = index.volume_count(),
            format = ?index.format(),
            complete = index.is_complete(),
            "opened archive"
        );
        Self {
            volumes,
            index,
            options,
        }
    }

    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        self.index.list_all()
    }

    /// First entry named `name`.
    pub fn entry(&self, name: &str) -> Result<&ArchiveEntry> {
        self.index
            .by_name(name)
            .ok_or_else(|| RarError::EntryNotFound(name.to_string()))
    }

    pub fn entry_at(&self, position: usize) -> Result<&ArchiveEntry> {
        self.index
            .by_position(position)
            .ok_or_else(|| RarError::EntryNotFound(format!("#{}", position)))
    }

    pub fn volumes(&self) -> &VolumeSet {
        &self.volumes
    }

    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    fn engine(&self) -> ExtractionEngine<'_> {
        ExtractionEngine::new(&self.volumes, &self.options)
    }

    /// Write `entry` to `sink`.
    pub async fn extract<W>(&self, entry: &ArchiveEntry, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.extract_with_cancellation(entry, sink, &CancellationToken::new())
            .await
    }

    /// Write `entry` to `sink`, stopping with [`RarError::Cancelled`] once
    /// `cancel` fires.
    pub async fn extract_with_cancellation<W>(
        &self,
        entry: &ArchiveEntry,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        self.engine().extract(entry, sink, cancel).await
    }

    /// Write the first entry named `name` to `sink`.
    pub async fn extract_by_name<W>(&self, name: &str, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let entry = self.entry(name)?;
        self.extract(entry, sink).await
    }

    /// Read part of a stored entry without extracting the rest.
    pub async fn read_range(&self, entry: &ArchiveEntry, offset: u64, length: u64) -> Result<Bytes> {
        self.engine().read_range(entry, offset, length).await
    }

    /// Extract several entries in order, one outcome per position.
    ///
    /// `open_sink` is called for each member before it is extracted. A
    /// failure only affects its own member; once `cancel` fires the remaining
    /// members report [`RarError::Cancelled`].
    pub async fn extract_batch<W, F>(
        &self,
        positions: &[usize],
        mut open_sink: F,
        cancel: &CancellationToken,
    ) -> Vec<BatchOutcome>
    where
        W: AsyncWrite + Unpin + Send,
        F: FnMut(&ArchiveEntry) -> Result<W>,
    {
        let mut outcomes = Vec::with_capacity(positions.len());
        for &position in positions {
            let (name, result) = match self.entry_at(position) {
                Ok(entry) => {
                    let result = match open_sink(entry) {
                        Ok(mut sink) => {
                            self.extract_with_cancellation(entry, &mut sink, cancel)
                                .await
                        }
                        Err(e) => Err(e),
                    };
                    (entry.name.clone(), result)
                }
                Err(e) => (String::new(), Err(e)),
            };
            if let Err(e) = &result {
                debug!(position, %name, error = %e, "batch member failed");
            }
            outcomes.push(BatchOutcome {
                position,
                name,
                result,
            });
        }
        outcomes
    }

    /// Bytes fetched over the network across all opened volumes.
    pub async fn transferred_bytes(&self) -> u64 {
        self.volumes
            .volumes()
            .await
            .iter()
            .filter_map(|v| v.source.transferred_bytes())
            .sum()
    }

    /// End the session, releasing every volume.
    pub fn close(self) {
        debug!(volumes = self.index.volume_count(), "closing archive");
    }
}
