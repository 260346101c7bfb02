//! Seekable byte sources - local files, memory buffers, and HTTP ranges.
//!
//! Every volume of an archive is read through a [`ByteSource`]. Reads return
//! exactly the requested range or fail; a read past a known length is
//! [`RarError::OutOfRange`].
//!
//! [`SourceOpener`] turns a [`Locator`] into a source and is how the volume
//! set opens continuation volumes.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::trace;

use crate::config::SourceOptions;
use crate::error::{RarError, Result};
use crate::locator::Locator;

/// Boxed future returned by [`ByteSource::read`].
pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = Result<Bytes>> + Send + 'a>>;

/// Boxed future returned by [`SourceOpener::open`].
pub type OpenFuture<'a> = Pin<Box<dyn Future<Output = Result<Arc<dyn ByteSource>>> + Send + 'a>>;

/// Abstract byte source that can provide byte ranges asynchronously.
///
/// Implementations must be safe to share between concurrent extractions.
/// Reads are idempotent: the same range always yields the same bytes.
pub trait ByteSource: Send + Sync + fmt::Debug {
    /// Display name, usually the volume file name.
    fn name(&self) -> &str;

    /// Total length, when known.
    fn length(&self) -> Option<u64>;

    fn supports_random_access(&self) -> bool {
        true
    }

    /// Bytes fetched over the network so far, for remote sources.
    fn transferred_bytes(&self) -> Option<u64> {
        None
    }

    /// Read exactly `length` bytes starting at `offset`.
    fn read(&self, offset: u64, length: u64) -> ReadFuture<'_>;
}

/// Reject reads that extend past a known source length.
pub(crate) fn check_range(offset: u64, length: u64, total: Option<u64>) -> Result<()> {
    if let Some(total) = total {
        let in_range = offset
            .checked_add(length)
            .is_some_and(|end| end <= total);
        if !in_range {
            return Err(RarError::OutOfRange {
                offset,
                length,
                total,
            });
        }
    }
    Ok(())
}

/// A volume held in memory.
#[derive(Clone)]
pub struct MemorySource {
    name: String,
    data: Bytes,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .finish()
    }
}

impl ByteSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn read(&self, offset: u64, length: u64) -> ReadFuture<'_> {
        Box::pin(async move {
            check_range(offset, length, self.length())?;
            let start = offset as usize;
            Ok(self.data.slice(start..start + length as usize))
        })
    }
}

/// A volume on local disk.
///
/// Seeks are serialized behind an async mutex, so concurrent readers of the
/// same volume take turns rather than racing on the file cursor.
#[derive(Debug)]
pub struct LocalSource {
    path: PathBuf,
    name: String,
    length: u64,
    file: Mutex<tokio::fs::File>,
}

impl LocalSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let unavailable = |e: std::io::Error| RarError::SourceUnavailable {
            locator: path.display().to_string(),
            reason: e.to_string(),
        };
        let file = tokio::fs::File::open(&path).await.map_err(unavailable)?;
        let length = file.metadata().await.map_err(unavailable)?.len();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            path,
            name,
            length,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for LocalSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> Option<u64> {
        Some(self.length)
    }

    fn read(&self, offset: u64, length: u64) -> ReadFuture<'_> {
        Box::pin(async move {
            check_range(offset, length, Some(self.length))?;
            let mut buffer = vec![0u8; length as usize];
            let mut file = self.file.lock().await;
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut buffer).await?;
            trace!(volume = %self.name, offset, length, "local read");
            Ok(Bytes::from(buffer))
        })
    }
}

/// Opens byte sources for locators.
pub trait SourceOpener: Send + Sync + fmt::Debug {
    fn open<'a>(&'a self, locator: &'a Locator) -> OpenFuture<'a>;
}

/// Opens paths as [`LocalSource`], URLs as
/// [`HttpSource`](crate::HttpSource), and in-memory locators that carry
/// their data as [`MemorySource`].
#[derive(Debug, Clone, Default)]
pub struct DefaultOpener {
    pub options: SourceOptions,
}

impl DefaultOpener {
    pub fn new(options: SourceOptions) -> Self {
        Self { options }
    }
}

impl SourceOpener for DefaultOpener {
    fn open<'a>(&'a self, locator: &'a Locator) -> OpenFuture<'a> {
        Box::pin(async move {
            match locator {
                Locator::Path(path) => {
                    Ok(Arc::new(LocalSource::open(path).await?) as Arc<dyn ByteSource>)
                }
                #[cfg(feature = "http")]
                Locator::Url(url) => Ok(Arc::new(
                    crate::http_source::HttpSource::open(url, &self.options.http).await?,
                ) as Arc<dyn ByteSource>),
                #[cfg(not(feature = "http"))]
                Locator::Url(url) => Err(RarError::SourceUnavailable {
                    locator: url.clone(),
                    reason: "built without the `http` feature".to_string(),
                }),
                Locator::Memory { name, data } => {
                    if data.is_empty() {
                        return Err(RarError::SourceUnavailable {
                            locator: locator.to_string(),
                            reason: "no data for in-memory volume".to_string(),
                        });
                    }
                    Ok(Arc::new(MemorySource::new(name.clone(), data.clone())) as Arc<dyn ByteSource>)
                }
            }
        })
    }
}

/// In-memory volumes addressed by file name.
///
/// Lets multi-volume archives held in memory resolve their continuation
/// volumes; locators of any kind are looked up by their final name.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    volumes: HashMap<String, Bytes>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volume(mut self, name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.insert(name, data);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.volumes.insert(name.into(), data.into());
    }

    /// Locator for a volume in this catalog.
    pub fn locator(&self, name: &str) -> Option<Locator> {
        self.volumes
            .get(name)
            .map(|data| Locator::memory(name, data.clone()))
    }
}

impl SourceOpener for MemoryCatalog {
    fn open<'a>(&'a self, locator: &'a Locator) -> OpenFuture<'a> {
        Box::pin(async move {
            let name = locator.file_name().unwrap_or_default();
            match self.volumes.get(name) {
                Some(data) => {
                    Ok(Arc::new(MemorySource::new(name, data.clone())) as Arc<dyn ByteSource>)
                }
                None => Err(RarError::SourceUnavailable {
                    locator: locator.to_string(),
                    reason: "not in memory catalog".to_string(),
                }),
            }
        })
    }
}
