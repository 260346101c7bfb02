//! Random-access reader for RAR archives.
//!
//! Lists members and extracts them by fetching only the byte ranges that are
//! needed, whether the archive is on local disk, in memory, or behind an HTTP
//! server that honors range requests.
//!
//! Supports RAR15 (RAR 1.5-4.x) and RAR50 (RAR 5.0+) formats, single and
//! multi-volume (`.partNN.rar` and `.rar`/`.rNN`).
//!
//! Stored members are copied verbatim with CRC32 verification. Compressed or
//! encrypted members are handed to an [`ExternalDecoder`] such as
//! [`UnrarCommand`]; this crate implements neither decompression nor
//! decryption.
//!
//! ## Features
//! - `http` (default) - HTTP range-request sources via `reqwest`
//! - `serde` - `Serialize` for listing records
//!
//! ## Example
//!
//! ```rust,ignore
//! use rar_seek::{OpenOptions, RarArchive};
//!
//! let archive = RarArchive::open("https://example.com/movie.part01.rar", OpenOptions::default()).await?;
//! for entry in archive.entries() {
//!     println!("{}", entry.record());
//! }
//! let mut out = tokio::fs::File::create("movie.mkv").await?;
//! archive.extract_by_name("movie.mkv", &mut out).await?;
//! ```

mod crc32;
pub mod archive;
pub mod archive_index;
pub mod byte_source;
pub mod config;
pub mod decoder;
pub mod error;
pub mod extraction;
pub mod formats;
pub mod header_parser;
#[cfg(feature = "http")]
mod http_source;
pub mod locator;
pub mod parsing;
pub mod volume_set;

#[cfg(test)]
mod testutil;

pub use archive::{BatchOutcome, RarArchive};
pub use archive_index::{ArchiveEntry, ArchiveIndex, EntryRecord, Fragment, IndexStatus};
pub use byte_source::{
    ByteSource, DefaultOpener, LocalSource, MemoryCatalog, MemorySource, OpenFuture, ReadFuture,
    SourceOpener,
};
pub use config::{HttpOptions, OpenOptions, RetryPolicy, SourceOptions};
pub use decoder::{
    DecodeFuture, DecodeRequest, DecodeSink, ExternalDecoder, UnrarCommand, VolumeHandle,
};
pub use error::{RarError, Result};
pub use extraction::ExtractionEngine;
pub use formats::{CompressionMethod, Signature};
pub use header_parser::HeaderParser;
pub use locator::Locator;
pub use volume_set::{FragmentStream, Volume, VolumeNaming, VolumeSet};

#[cfg(feature = "http")]
pub use http_source::HttpSource;

/// Cancellation token accepted by extraction.
pub use tokio_util::sync::CancellationToken;
