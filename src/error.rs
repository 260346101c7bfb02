//! Error types for reading RAR archives.
//!
//! This module provides the [`RarError`] type which covers every failure
//! that can occur while opening byte sources, walking archive headers, and
//! extracting members.
//!
//! ## Error Categories
//!
//! | Category | Errors | Retryable |
//! |----------|--------|-----------|
//! | Source | [`SourceUnavailable`], [`RangeUnsupported`], [`Io`], [`OutOfRange`] | only [`Io`] |
//! | Structure | [`NotAnArchive`], [`CorruptHeader`], [`HeadersEncrypted`], [`VolumeNotFound`] | no |
//! | Extraction | [`NotAFile`], [`TruncatedPayload`], [`PayloadCorrupt`], [`SinkWrite`], [`Cancelled`] | no |
//! | Decoder | [`PasswordRequired`], [`DecoderUnavailable`], [`DecodeFailed`] | no |
//!
//! Structural errors abort index building. Extraction errors are scoped to a
//! single entry and leave the rest of the index usable.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rar_seek::{OpenOptions, RarArchive, RarError};
//!
//! match RarArchive::open("movie.rar", OpenOptions::default()).await {
//!     Ok(archive) => println!("{} entries", archive.index().len()),
//!     Err(RarError::NotAnArchive) => eprintln!("Not a RAR file"),
//!     Err(RarError::HeadersEncrypted) => eprintln!("File names are encrypted"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```
//!
//! [`SourceUnavailable`]: RarError::SourceUnavailable
//! [`RangeUnsupported`]: RarError::RangeUnsupported
//! [`Io`]: RarError::Io
//! [`OutOfRange`]: RarError::OutOfRange
//! [`NotAnArchive`]: RarError::NotAnArchive
//! [`CorruptHeader`]: RarError::CorruptHeader
//! [`HeadersEncrypted`]: RarError::HeadersEncrypted
//! [`VolumeNotFound`]: RarError::VolumeNotFound
//! [`NotAFile`]: RarError::NotAFile
//! [`TruncatedPayload`]: RarError::TruncatedPayload
//! [`PayloadCorrupt`]: RarError::PayloadCorrupt
//! [`SinkWrite`]: RarError::SinkWrite
//! [`Cancelled`]: RarError::Cancelled
//! [`PasswordRequired`]: RarError::PasswordRequired
//! [`DecoderUnavailable`]: RarError::DecoderUnavailable
//! [`DecodeFailed`]: RarError::DecodeFailed

use std::io;
use thiserror::Error;

/// Error type for RAR operations.
#[derive(Debug, Error)]
pub enum RarError {
    /// The locator could not be opened.
    ///
    /// Raised for missing files, refused connections, and HTTP responses
    /// outside the 2xx range on the initial probe.
    #[error("Source unavailable: {locator} ({reason})")]
    SourceUnavailable {
        /// Display form of the locator that failed.
        locator: String,
        /// Underlying cause.
        reason: String,
    },

    /// The HTTP server ignored the `Range` header.
    ///
    /// Random access depends entirely on partial reads, so this is
    /// permanently fatal for the source; there is no fallback to a full
    /// download.
    #[error("Server does not honor range requests: {url}")]
    RangeUnsupported {
        /// URL that answered with the full resource.
        url: String,
    },

    /// A transport-level read failure.
    ///
    /// This is the only retryable error. The HTTP source already retries it
    /// with backoff before surfacing it.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A read extended past the known end of the source.
    #[error("Read out of range: {offset}+{length} exceeds source length {total}")]
    OutOfRange {
        /// Requested start offset.
        offset: u64,
        /// Requested length.
        length: u64,
        /// Known total length of the source.
        total: u64,
    },

    /// No RAR signature was found at the start of the first volume.
    #[error("Not a RAR archive")]
    NotAnArchive,

    /// A header failed validation.
    ///
    /// Index building cannot continue past an unparseable header because
    /// the position of every following block depends on it.
    #[error("Corrupt header in volume {volume} at offset {offset}: {reason}")]
    CorruptHeader {
        /// Index of the volume containing the header.
        volume: usize,
        /// Offset of the header within that volume.
        offset: u64,
        /// What failed.
        reason: String,
    },

    /// File names and sizes are encrypted (`rar -hp`).
    ///
    /// Archives of this class cannot be listed by this crate.
    #[error("Archive headers are encrypted")]
    HeadersEncrypted,

    /// A required continuation volume could not be opened.
    #[error("Volume not found: {locator}")]
    VolumeNotFound {
        /// Display form of the derived locator.
        locator: String,
    },

    /// No entry matched the requested name or position.
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// Extraction was requested for a directory entry.
    #[error("Not a file: {name}")]
    NotAFile {
        /// Entry name.
        name: String,
    },

    /// The payload ended before the declared size was produced.
    #[error("Truncated payload for {name}: expected {expected} bytes, got {actual}")]
    TruncatedPayload {
        /// Entry name.
        name: String,
        /// Declared unpacked size.
        expected: u64,
        /// Bytes actually written.
        actual: u64,
    },

    /// The recomputed CRC32 does not match the header.
    ///
    /// Bytes already written to the sink are not rolled back.
    #[error("CRC mismatch for {name}: expected {expected:#010x}, computed {computed:#010x}")]
    PayloadCorrupt {
        /// Entry name.
        name: String,
        /// CRC declared in the file header.
        expected: u32,
        /// CRC of the produced bytes.
        computed: u32,
    },

    /// The caller's sink rejected extracted bytes.
    ///
    /// Kept apart from [`RarError::Io`] so a full disk is not retried like a
    /// dropped connection.
    #[error("Failed to write extracted data: {0}")]
    SinkWrite(#[source] io::Error),

    /// The entry is encrypted and no password was supplied.
    #[error("Password required for encrypted entry: {name}")]
    PasswordRequired {
        /// Entry name.
        name: String,
    },

    /// No external decoder is configured, or its binary is missing.
    #[error("External decoder unavailable: {0}")]
    DecoderUnavailable(String),

    /// The external decoder ran and failed.
    #[error("Decoding {name} failed: {reason}")]
    DecodeFailed {
        /// Entry name.
        name: String,
        /// Decoder diagnostics.
        reason: String,
    },

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,
}

impl RarError {
    /// Whether the operation that raised this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Whether this error comes from the archive structure rather than the
    /// transport. Structural errors make an index build partial.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::NotAnArchive
                | Self::CorruptHeader { .. }
                | Self::HeadersEncrypted
                | Self::VolumeNotFound { .. }
        )
    }

    pub(crate) fn corrupt(volume: usize, offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptHeader {
            volume,
            offset,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RarError>;
