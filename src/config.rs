//! Options for opening archives and their byte sources.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::decoder::ExternalDecoder;

/// Default HTTP read-ahead window.
pub const DEFAULT_READ_AHEAD: u64 = 64 * 1024;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Bounded exponential backoff for transport failures.
///
/// Only [`RarError::Io`](crate::RarError::Io) is retried; structural errors
/// and `RangeUnsupported` surface immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` disables retrying.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

/// Settings for the HTTP range-request source.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpOptions {
    /// Size of the read-ahead window that small reads are rounded up to.
    /// Reads larger than this bypass the cache.
    pub read_ahead: u64,
    /// Per-request timeout.
    pub timeout: Duration,
    pub user_agent: String,
    pub retry: RetryPolicy,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            read_ahead: DEFAULT_READ_AHEAD,
            timeout: Duration::from_secs(30),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl HttpOptions {
    pub fn with_read_ahead(mut self, read_ahead: u64) -> Self {
        self.read_ahead = read_ahead.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Settings passed to [`SourceOpener`](crate::SourceOpener)s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceOptions {
    pub http: HttpOptions,
}

/// Options for [`RarArchive::open`](crate::RarArchive::open).
#[derive(Clone)]
pub struct OpenOptions {
    /// Password forwarded to the external decoder for encrypted entries.
    pub password: Option<String>,
    /// Recompute and compare CRC32 of Store payloads (default: true).
    pub verify_crc: bool,
    /// Decoder for compressed or encrypted entries.
    pub decoder: Option<Arc<dyn ExternalDecoder>>,
    pub source: SourceOptions,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            password: None,
            verify_crc: true,
            decoder: None,
            source: SourceOptions::default(),
        }
    }
}

impl OpenOptions {
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_verify_crc(mut self, verify_crc: bool) -> Self {
        self.verify_crc = verify_crc;
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn ExternalDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_http(mut self, http: HttpOptions) -> Self {
        self.source.http = http;
        self
    }
}

impl fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenOptions")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("verify_crc", &self.verify_crc)
            .field("decoder", &self.decoder)
            .field("source", &self.source)
            .finish()
    }
}
