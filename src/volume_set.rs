//! Multi-volume archive resolution.
//!
//! A [`VolumeSet`] starts from the first volume's locator and opens further
//! volumes lazily, deriving their names from the first name:
//!
//! | First volume        | Following volumes                              |
//! |---------------------|------------------------------------------------|
//! | `movie.part01.rar`  | `movie.part02.rar`, `movie.part03.rar`, ...    |
//! | `movie.rar`         | `movie.r00` ... `movie.r99`, `movie.s00`, ...  |
//! | anything else       | none                                           |
//!
//! Volumes are append-only: volume `i + 1` is opened strictly after volume
//! `i`, and an opened volume is never replaced.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::archive_index::Fragment;
use crate::byte_source::{ByteSource, DefaultOpener, SourceOpener};
use crate::config::SourceOptions;
use crate::error::{RarError, Result};
use crate::locator::Locator;

/// Largest chunk [`FragmentStream`] holds in memory at once.
pub const READ_CHUNK_SIZE: u64 = 1024 * 1024;

/// How continuation volume names derive from the first name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeNaming {
    /// No multi-volume convention; the archive has one volume.
    Single,
    /// `{base}{number:0width}{ext}`, e.g. `movie.part` + `01` + `.rar`.
    PartNumbered {
        base: String,
        first: u64,
        width: usize,
        ext: String,
    },
    /// `{stem}.rar`, then `{stem}.r00`, ... `{stem}.r99`, `{stem}.s00`, ...
    ExtensionNumbered { stem: String, uppercase: bool },
}

impl VolumeNaming {
    pub fn detect(file_name: &str) -> Self {
        let Some(split) = file_name.len().checked_sub(4) else {
            return Self::Single;
        };
        if !file_name.is_char_boundary(split) {
            return Self::Single;
        }
        let (stem, ext) = file_name.split_at(split);
        if !ext.eq_ignore_ascii_case(".rar") || stem.is_empty() {
            return Self::Single;
        }

        let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        if digits > 0 {
            let base = &stem[..stem.len() - digits];
            let number = &stem[stem.len() - digits..];
            let is_part = base.len() > 5
                && base
                    .get(base.len() - 5..)
                    .is_some_and(|tail| tail.eq_ignore_ascii_case(".part"));
            if let (true, Ok(first)) = (is_part, number.parse::<u64>()) {
                return Self::PartNumbered {
                    base: base.to_string(),
                    first,
                    width: digits,
                    ext: ext.to_string(),
                };
            }
        }

        Self::ExtensionNumbered {
            stem: stem.to_string(),
            uppercase: ext.as_bytes()[1] == b'R',
        }
    }

    /// File name of volume `index`, where `0` is the first volume.
    ///
    /// `None` once the convention has no further names.
    pub fn volume_name(&self, first_name: &str, index: usize) -> Option<String> {
        match self {
            Self::Single => (index == 0).then(|| first_name.to_string()),
            Self::PartNumbered {
                base,
                first,
                width,
                ext,
            } => {
                let number = first.checked_add(index as u64)?;
                Some(format!("{}{:0width$}{}", base, number, ext, width = *width))
            }
            Self::ExtensionNumbered { stem, uppercase } => {
                if index == 0 {
                    return Some(first_name.to_string());
                }
                let n = index - 1;
                let letter = b'r' + u8::try_from(n / 100).ok()?;
                if letter > b'z' {
                    return None;
                }
                let letter = if *uppercase {
                    letter.to_ascii_uppercase()
                } else {
                    letter
                };
                Some(format!("{}.{}{:02}", stem, letter as char, n % 100))
            }
        }
    }
}

/// An opened volume.
#[derive(Debug, Clone)]
pub struct Volume {
    pub locator: Locator,
    pub source: Arc<dyn ByteSource>,
}

/// Ordered, lazily grown sequence of archive volumes.
#[derive(Debug)]
pub struct VolumeSet {
    naming: VolumeNaming,
    first: Locator,
    first_name: String,
    opener: Arc<dyn SourceOpener>,
    volumes: Mutex<Vec<Volume>>,
}

impl VolumeSet {
    /// Open the first volume with the default opener.
    pub async fn open(first: Locator, options: &SourceOptions) -> Result<Self> {
        Self::open_with(first, Arc::new(DefaultOpener::new(options.clone()))).await
    }

    /// Open the first volume with a custom opener, which is also used for
    /// every continuation volume.
    pub async fn open_with(first: Locator, opener: Arc<dyn SourceOpener>) -> Result<Self> {
        let source = opener.open(&first).await?;
        Ok(Self::from_first(first, source, opener))
    }

    pub fn from_first(
        first: Locator,
        source: Arc<dyn ByteSource>,
        opener: Arc<dyn SourceOpener>,
    ) -> Self {
        let first_name = first.file_name().unwrap_or_default().to_string();
        let naming = VolumeNaming::detect(&first_name);
        debug!(volume = %first, ?naming, "opened first volume");
        Self {
            naming,
            first: first.clone(),
            first_name,
            opener,
            volumes: Mutex::new(vec![Volume {
                locator: first,
                source,
            }]),
        }
    }

    pub fn naming(&self) -> &VolumeNaming {
        &self.naming
    }

    /// Locator of volume `index`, if the naming convention defines one.
    pub fn locator_for(&self, index: usize) -> Option<Locator> {
        if index == 0 {
            return Some(self.first.clone());
        }
        self.naming
            .volume_name(&self.first_name, index)
            .map(|name| self.first.with_file_name(&name))
    }

    /// Open the volume after the last resolved one.
    ///
    /// Returns `Ok(None)` when the naming convention ends, and
    /// [`RarError::VolumeNotFound`] when the derived locator cannot be opened.
    pub async fn resolve_next(&self) -> Result<Option<Arc<dyn ByteSource>>> {
        let mut volumes = self.volumes.lock().await;
        self.resolve_locked(&mut volumes).await
    }

    async fn resolve_locked(&self, volumes: &mut Vec<Volume>) -> Result<Option<Arc<dyn ByteSource>>> {
        let index = volumes.len();
        let Some(locator) = self.locator_for(index) else {
            trace!(index, "no further volume names");
            return Ok(None);
        };

        let source = match self.opener.open(&locator).await {
            Ok(source) => source,
            Err(RarError::SourceUnavailable { reason, .. }) => {
                debug!(volume = %locator, %reason, "volume not found");
                return Err(RarError::VolumeNotFound {
                    locator: locator.to_string(),
                });
            }
            Err(e) => return Err(e),
        };
        debug!(index, volume = %locator, length = ?source.length(), "opened volume");
        volumes.push(Volume {
            locator,
            source: Arc::clone(&source),
        });
        Ok(Some(source))
    }

    /// Source of volume `index`, opening intermediate volumes as needed.
    pub async fn volume(&self, index: usize) -> Result<Arc<dyn ByteSource>> {
        let mut volumes = self.volumes.lock().await;
        while volumes.len() <= index {
            if self.resolve_locked(&mut volumes).await?.is_none() {
                return Err(RarError::VolumeNotFound {
                    locator: format!("volume {} of {}", index, self.first),
                });
            }
        }
        Ok(Arc::clone(&volumes[index].source))
    }

    pub async fn resolved_count(&self) -> usize {
        self.volumes.lock().await.len()
    }

    /// Snapshot of the volumes opened so far.
    pub async fn volumes(&self) -> Vec<Volume> {
        self.volumes.lock().await.clone()
    }

    /// Stream the bytes of `fragments` in order, one bounded chunk at a time.
    pub fn read_across_volumes(&self, fragments: &[Fragment]) -> FragmentStream<'_> {
        FragmentStream::new(self, fragments.to_vec())
    }
}

/// Lazy reader over a sequence of fragments.
pub struct FragmentStream<'a> {
    volumes: &'a VolumeSet,
    fragments: Vec<Fragment>,
    index: usize,
    offset_in_fragment: u64,
    remaining: u64,
    chunk_size: u64,
    done: bool,
}

impl<'a> FragmentStream<'a> {
    pub fn new(volumes: &'a VolumeSet, fragments: Vec<Fragment>) -> Self {
        let remaining = fragments.iter().map(|f| f.length).sum();
        Self {
            volumes,
            fragments,
            index: 0,
            offset_in_fragment: 0,
            remaining,
            chunk_size: READ_CHUNK_SIZE,
            done: false,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Bytes not yet yielded.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Get the next chunk of data. Returns `None` when done; after an error
    /// the stream is finished.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        if self.done {
            return None;
        }
        loop {
            let Some(fragment) = self.fragments.get(self.index).copied() else {
                self.done = true;
                return None;
            };
            let left = fragment.length - self.offset_in_fragment;
            if left == 0 {
                self.index += 1;
                self.offset_in_fragment = 0;
                continue;
            }

            let length = left.min(self.chunk_size);
            let offset = fragment.offset + self.offset_in_fragment;
            let result = match self.volumes.volume(fragment.volume).await {
                Ok(source) => source.read(offset, length).await,
                Err(e) => Err(e),
            };
            return match result {
                Ok(bytes) => {
                    self.offset_in_fragment += length;
                    self.remaining -= length;
                    trace!(volume = fragment.volume, offset, length, "fragment chunk");
                    Some(Ok(bytes))
                }
                Err(e) => {
                    self.done = true;
                    Some(Err(e))
                }
            };
        }
    }
}
