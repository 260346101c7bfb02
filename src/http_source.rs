//! HTTP range-request byte source.
//!
//! Opening a URL issues one ranged GET for the first read-ahead window. A
//! `206 Partial Content` answer yields the total length from
//! `Content-Range`; a `200 OK` means the server ignored the range and the
//! source fails permanently with [`RarError::RangeUnsupported`].
//!
//! Small reads (header walking) are rounded up to read-ahead windows that
//! are cached for the life of the source. Reads larger than one window go
//! straight to the server, so payload bytes are never cached.
//!
//! Servers may answer with `Content-Range: bytes a-b/*`. The length is then
//! unknown until a reply comes back shorter than requested, which marks the
//! end of the resource.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::{Bytes, BytesMut};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::byte_source::{check_range, ByteSource, ReadFuture};
use crate::config::{HttpOptions, RetryPolicy};
use crate::error::{RarError, Result};

/// HTTP Range reader for remote archive volumes.
#[derive(Debug)]
pub struct HttpSource {
    client: Client,
    url: String,
    name: String,
    length: Option<u64>,
    /// End of the resource, learned from a short reply when `length` is unknown.
    discovered_length: OnceLock<u64>,
    read_ahead: u64,
    retry: RetryPolicy,
    /// Read-ahead windows keyed by their start offset.
    cache: RwLock<BTreeMap<u64, Bytes>>,
    transferred_bytes: AtomicU64,
    request_count: AtomicU64,
}

impl HttpSource {
    /// Probe `url` and open it as a byte source.
    pub async fn open(url: &str, options: &HttpOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent.clone())
            .build()
            .map_err(|e| RarError::SourceUnavailable {
                locator: url.to_string(),
                reason: e.to_string(),
            })?;
        let name = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .unwrap_or("unknown")
            .to_string();

        let mut source = Self {
            client,
            url: url.to_string(),
            name,
            length: None,
            discovered_length: OnceLock::new(),
            read_ahead: options.read_ahead.max(1),
            retry: options.retry.clone(),
            cache: RwLock::new(BTreeMap::new()),
            transferred_bytes: AtomicU64::new(0),
            request_count: AtomicU64::new(0),
        };
        source.length = source.probe().await?;
        Ok(source)
    }

    /// Total bytes received from the server, including the probe.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// Number of HTTP requests issued, including retries.
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn known_length(&self) -> Option<u64> {
        self.length.or_else(|| self.discovered_length.get().copied())
    }

    fn record_end(&self, end: u64) {
        if self.discovered_length.set(end).is_ok() {
            debug!(url = %self.url, length = end, "discovered resource length");
        }
    }

    /// Fetch the first window; learn the length and check range support.
    async fn probe(&self) -> Result<Option<u64>> {
        let unavailable = |reason: String| RarError::SourceUnavailable {
            locator: self.url.clone(),
            reason,
        };

        let mut attempt = 0;
        let response = loop {
            let result = self.send_range(0, self.read_ahead).await;
            match result {
                Ok(response) if !is_transient(response.status()) => break response,
                Ok(response) if attempt >= self.retry.max_retries => {
                    return Err(unavailable(format!("HTTP {}", response.status())));
                }
                Err(e) if attempt >= self.retry.max_retries => {
                    return Err(unavailable(e.to_string()));
                }
                Ok(response) => warn!(url = %self.url, status = %response.status(), "probe failed, retrying"),
                Err(e) => warn!(url = %self.url, error = %e, "probe failed, retrying"),
            }
            sleep(self.retry.backoff(attempt)).await;
            attempt += 1;
        };

        let status = response.status();
        debug!(url = %self.url, %status, "probe response");
        match status.as_u16() {
            206 => {
                let total = response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range_total);
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| unavailable(e.to_string()))?;
                self.transferred_bytes
                    .fetch_add(body.len() as u64, Ordering::Relaxed);

                let received = body.len() as u64;
                let whole_resource = total.is_none() && received < self.read_ahead;
                if whole_resource {
                    self.record_end(received);
                }
                let expected = total.map_or(self.read_ahead, |t| t.min(self.read_ahead));
                if received == expected || whole_resource {
                    write_lock(&self.cache).insert(0, body);
                }
                Ok(total)
            }
            200 => Err(RarError::RangeUnsupported {
                url: self.url.clone(),
            }),
            // An empty resource cannot satisfy any range.
            416 => response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total)
                .map(Some)
                .ok_or_else(|| unavailable("HTTP 416 without length".to_string())),
            _ => Err(unavailable(format!("HTTP {}", status))),
        }
    }

    async fn send_range(&self, offset: u64, length: u64) -> reqwest::Result<reqwest::Response> {
        let range = format!("bytes={}-{}", offset, offset + length - 1);
        trace!(url = %self.url, %range, "HTTP range request");
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.client.get(&self.url).header(RANGE, range).send().await
    }

    /// One ranged GET returning exactly `length` bytes.
    ///
    /// When the total length is unknown a shorter body is returned as is and
    /// its end is recorded as the end of the resource.
    async fn request(&self, offset: u64, length: u64) -> Result<Bytes> {
        let response = self
            .send_range(offset, length)
            .await
            .map_err(|e| RarError::Io(io::Error::other(e)))?;

        let status = response.status();
        match status.as_u16() {
            206 => {}
            200 => {
                return Err(RarError::RangeUnsupported {
                    url: self.url.clone(),
                })
            }
            416 => {
                return Err(RarError::OutOfRange {
                    offset,
                    length,
                    total: self.length.unwrap_or(offset),
                })
            }
            _ if is_transient(status) => {
                return Err(RarError::Io(io::Error::other(format!("HTTP {}", status))));
            }
            _ => {
                return Err(RarError::SourceUnavailable {
                    locator: self.url.clone(),
                    reason: format!("HTTP {}", status),
                })
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RarError::Io(io::Error::other(e)))?;
        self.transferred_bytes
            .fetch_add(body.len() as u64, Ordering::Relaxed);

        match (body.len() as u64).cmp(&length) {
            std::cmp::Ordering::Equal => Ok(body),
            std::cmp::Ordering::Greater => Ok(body.slice(..length as usize)),
            std::cmp::Ordering::Less if self.length.is_none() => {
                self.record_end(offset + body.len() as u64);
                Ok(body)
            }
            std::cmp::Ordering::Less => Err(RarError::OutOfRange {
                offset,
                length,
                total: self.length.unwrap_or(offset + body.len() as u64),
            }),
        }
    }

    /// [`Self::request`] with retries on transport errors.
    async fn fetch(&self, offset: u64, length: u64) -> Result<Bytes> {
        let mut attempt = 0;
        loop {
            match self.request(offset, length).await {
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(url = %self.url, error = %e, ?backoff, "range request failed, retrying");
                    sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Cached read-ahead window starting at `start`.
    async fn window(&self, start: u64) -> Result<Bytes> {
        if let Some(bytes) = read_lock(&self.cache).get(&start) {
            return Ok(bytes.clone());
        }
        let length = match self.known_length() {
            Some(total) => self.read_ahead.min(total.saturating_sub(start)),
            None => self.read_ahead,
        };
        if length == 0 {
            return Ok(Bytes::new());
        }
        let bytes = self.fetch(start, length).await?;
        write_lock(&self.cache).insert(start, bytes.clone());
        Ok(bytes)
    }

    async fn read_cached(&self, offset: u64, length: u64) -> Result<Bytes> {
        let first = offset / self.read_ahead * self.read_ahead;
        let last = (offset + length - 1) / self.read_ahead * self.read_ahead;

        if first == last {
            let window = self.window(first).await?;
            let start = (offset - first) as usize;
            let end = start + length as usize;
            if end > window.len() {
                return Err(self.short_read(offset, length));
            }
            return Ok(window.slice(start..end));
        }

        let mut out = BytesMut::with_capacity(length as usize);
        let mut cursor = offset;
        let end = offset + length;
        let mut start = first;
        while start <= last {
            let window = self.window(start).await?;
            let from = (cursor - start) as usize;
            let to = ((end - start) as usize).min(window.len());
            if from >= to {
                return Err(self.short_read(offset, length));
            }
            out.extend_from_slice(&window[from..to]);
            cursor = start + to as u64;
            start += self.read_ahead;
        }
        if (out.len() as u64) < length {
            return Err(self.short_read(offset, length));
        }
        Ok(out.freeze())
    }

    fn short_read(&self, offset: u64, length: u64) -> RarError {
        RarError::OutOfRange {
            offset,
            length,
            total: self.known_length().unwrap_or(offset),
        }
    }
}

impl ByteSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> Option<u64> {
        self.known_length()
    }

    fn transferred_bytes(&self) -> Option<u64> {
        Some(HttpSource::transferred_bytes(self))
    }

    fn read(&self, offset: u64, length: u64) -> ReadFuture<'_> {
        Box::pin(async move {
            check_range(offset, length, self.known_length())?;
            if length == 0 {
                return Ok(Bytes::new());
            }
            if length > self.read_ahead {
                debug!(url = %self.url, offset, length, "uncached range read");
                let bytes = self.fetch(offset, length).await?;
                if (bytes.len() as u64) < length {
                    return Err(self.short_read(offset, length));
                }
                return Ok(bytes);
            }
            self.read_cached(offset, length).await
        })
    }
}

/// Server-side or throttling responses worth retrying.
fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Total length from `bytes 0-99/1234` or `bytes */1234`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{range_responder, unsized_range_responder};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options(read_ahead: u64) -> HttpOptions {
        HttpOptions::default()
            .with_read_ahead(read_ahead)
            .with_retry(RetryPolicy {
                max_retries: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                multiplier: 2.0,
            })
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn serve(data: Vec<u8>) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/set/a.rar"))
            .respond_with(range_responder(data))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range_total("bytes 0-99/1234"), Some(1234));
        assert_eq!(parse_content_range_total("bytes */77"), Some(77));
        assert_eq!(parse_content_range_total("bytes 0-99/*"), None);
    }

    #[tokio::test]
    async fn test_probe_learns_length_and_caches_first_window() {
        let data = payload(1000);
        let server = serve(data.clone()).await;
        let url = format!("{}/set/a.rar", server.uri());

        let source = HttpSource::open(&url, &options(128)).await.unwrap();
        assert_eq!(source.length(), Some(1000));
        assert_eq!(source.name(), "a.rar");
        assert_eq!(source.request_count(), 1);
        assert_eq!(source.transferred_bytes(), 128);

        // Served from the probe window.
        assert_eq!(&source.read(10, 20).await.unwrap()[..], &data[10..30]);
        assert_eq!(source.request_count(), 1);
    }

    #[tokio::test]
    async fn test_small_reads_span_windows() {
        let data = payload(1000);
        let server = serve(data.clone()).await;
        let url = format!("{}/set/a.rar", server.uri());
        let source = HttpSource::open(&url, &options(128)).await.unwrap();

        // Crosses from window 0 (cached) into window 128.
        assert_eq!(&source.read(120, 20).await.unwrap()[..], &data[120..140]);
        assert_eq!(source.request_count(), 2);
        // Last, short window.
        assert_eq!(&source.read(990, 10).await.unwrap()[..], &data[990..1000]);
        assert_eq!(source.request_count(), 3);
        assert_eq!(source.transferred_bytes(), 128 + 128 + (1000 - 896));
    }

    #[tokio::test]
    async fn test_large_reads_bypass_cache() {
        let data = payload(1000);
        let server = serve(data.clone()).await;
        let url = format!("{}/set/a.rar", server.uri());
        let source = HttpSource::open(&url, &options(128)).await.unwrap();

        assert_eq!(&source.read(200, 500).await.unwrap()[..], &data[200..700]);
        assert_eq!(&source.read(200, 500).await.unwrap()[..], &data[200..700]);
        assert_eq!(source.request_count(), 3);
        assert_eq!(source.transferred_bytes(), 128 + 1000);
    }

    #[tokio::test]
    async fn test_unknown_length_reads_last_window() {
        let data = payload(1000);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/set/a.rar"))
            .respond_with(unsized_range_responder(data.clone()))
            .mount(&server)
            .await;
        let url = format!("{}/set/a.rar", server.uri());

        let source = HttpSource::open(&url, &options(128)).await.unwrap();
        assert_eq!(source.length(), None);

        assert_eq!(&source.read(990, 5).await.unwrap()[..], &data[990..995]);
        assert_eq!(source.length(), Some(1000));
        assert_eq!(&source.read(995, 5).await.unwrap()[..], &data[995..1000]);
        assert!(matches!(
            source.read(998, 5).await,
            Err(RarError::OutOfRange { total: 1000, .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_length_small_resource() {
        let data = payload(50);
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(unsized_range_responder(data.clone()))
            .mount(&server)
            .await;
        let url = format!("{}/tiny.rar", server.uri());

        let source = HttpSource::open(&url, &options(128)).await.unwrap();
        assert_eq!(source.length(), Some(50));
        assert_eq!(&source.read(40, 10).await.unwrap()[..], &data[40..50]);
        assert_eq!(source.request_count(), 1);
    }

    #[tokio::test]
    async fn test_read_past_end() {
        let server = serve(payload(100)).await;
        let url = format!("{}/set/a.rar", server.uri());
        let source = HttpSource::open(&url, &options(64)).await.unwrap();
        assert!(matches!(
            source.read(90, 20).await,
            Err(RarError::OutOfRange { total: 100, .. })
        ));
    }

    #[tokio::test]
    async fn test_range_ignored_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload(300)))
            .mount(&server)
            .await;

        let url = format!("{}/a.rar", server.uri());
        let err = HttpSource::open(&url, &options(64)).await.unwrap_err();
        assert!(matches!(err, RarError::RangeUnsupported { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_not_found_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = format!("{}/missing.rar", server.uri());
        assert!(matches!(
            HttpSource::open(&url, &options(64)).await,
            Err(RarError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let data = payload(1000);
        let server = MockServer::start().await;
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        let ranges = range_responder(data.clone());

        Mock::given(method("GET"))
            .respond_with(move |req: &wiremock::Request| {
                // Probe succeeds, the next request fails once.
                if counter_clone.fetch_add(1, Ordering::SeqCst) == 1 {
                    ResponseTemplate::new(503)
                } else {
                    ranges(req)
                }
            })
            .mount(&server)
            .await;

        let url = format!("{}/a.rar", server.uri());
        let source = HttpSource::open(&url, &options(64)).await.unwrap();
        assert_eq!(&source.read(500, 300).await.unwrap()[..], &data[500..800]);
        assert_eq!(source.request_count(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        // Bind and drop to get a port nobody listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("http://127.0.0.1:{}/a.rar", port);
        let err = HttpSource::open(&url, &options(64).with_retry(RetryPolicy::none()))
            .await
            .unwrap_err();
        assert!(matches!(err, RarError::SourceUnavailable { .. }));
    }
}
