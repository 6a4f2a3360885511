//! Byte-range access to an archive on local disk or behind HTTP(S).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, RANGE};
use tracing::{debug, warn};

use crate::error::SourceError;

const USER_AGENT: &str = concat!("pmpoint/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads exact byte ranges from one archive.
///
/// Implementations keep a single cursor or connection, so callers sharing a
/// source across threads must serialize access.
pub trait ByteSource: Send {
    /// Returns exactly `length` bytes starting at `offset`, or fails.
    fn read_at(&mut self, offset: u64, length: u64) -> Result<Vec<u8>, SourceError>;

    /// Total size in bytes if known, zero otherwise.
    fn size_hint(&self) -> u64;

    fn describe(&self) -> &str;

    fn close(&mut self);
}

pub struct LocalSource {
    path: String,
    file: Option<File>,
    size: u64,
}

impl LocalSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let file = File::open(path).map_err(|source| SourceError::Open {
            uri: display.clone(),
            source,
        })?;
        let size = file
            .metadata()
            .map_err(|source| SourceError::Open {
                uri: display.clone(),
                source,
            })?
            .len();
        Ok(Self {
            path: display,
            file: Some(file),
            size,
        })
    }
}

impl ByteSource for LocalSource {
    fn read_at(&mut self, offset: u64, length: u64) -> Result<Vec<u8>, SourceError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| SourceError::Closed(self.path.clone()))?;
        if length == 0 {
            return Ok(Vec::new());
        }
        let end = offset.checked_add(length).filter(|&end| end <= self.size);
        if end.is_none() {
            return Err(SourceError::ShortRead {
                offset,
                expected: length,
                got: self.size.saturating_sub(offset),
            });
        }
        let io_err = |source| SourceError::Io {
            offset,
            length,
            source,
        };
        file.seek(SeekFrom::Start(offset)).map_err(io_err)?;
        let mut data = Vec::with_capacity(length as usize);
        file.by_ref()
            .take(length)
            .read_to_end(&mut data)
            .map_err(io_err)?;
        if data.len() as u64 != length {
            return Err(SourceError::ShortRead {
                offset,
                expected: length,
                got: data.len() as u64,
            });
        }
        Ok(data)
    }

    fn size_hint(&self) -> u64 {
        self.size
    }

    fn describe(&self) -> &str {
        &self.path
    }

    fn close(&mut self) {
        self.file = None;
    }
}

/// One HTTP response to a range request.
#[derive(Debug, Clone)]
pub struct RangeResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// HTTP plumbing behind [`HttpSource`], replaceable in tests.
pub trait RangeTransport: Send + Sync {
    /// Size of the remote object from a HEAD request.
    fn content_length(&self, url: &str) -> Result<Option<u64>, SourceError>;

    /// GET with `Range: bytes=first-last` (inclusive).
    fn get_range(&self, url: &str, first: u64, last: u64) -> Result<RangeResponse, SourceError>;
}

pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SourceError::Http {
                url: String::new(),
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

impl RangeTransport for ReqwestTransport {
    fn content_length(&self, url: &str) -> Result<Option<u64>, SourceError> {
        let response = self.client.head(url).send().map_err(|e| SourceError::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(SourceError::Http {
                url: url.to_string(),
                message: format!("HEAD returned status {}", response.status().as_u16()),
            });
        }
        // The header is read directly; the body of a HEAD response is empty.
        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok()))
    }

    fn get_range(&self, url: &str, first: u64, last: u64) -> Result<RangeResponse, SourceError> {
        let http_err = |e: reqwest::Error| SourceError::Http {
            url: url.to_string(),
            message: e.to_string(),
        };
        let response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={first}-{last}"))
            .send()
            .map_err(http_err)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(http_err)?.to_vec();
        Ok(RangeResponse { status, body })
    }
}

/// Backoff for rate-limited or overloaded remote reads.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(150),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }

    pub fn is_retryable(status: u16) -> bool {
        status == 429 || status == 503
    }
}

pub struct HttpSource<T: RangeTransport = ReqwestTransport> {
    url: String,
    transport: T,
    policy: RetryPolicy,
    size: u64,
    closed: bool,
}

impl HttpSource<ReqwestTransport> {
    pub fn open(url: &str) -> Result<Self, SourceError> {
        Self::with_transport(url, ReqwestTransport::new()?, RetryPolicy::default())
    }
}

impl<T: RangeTransport> HttpSource<T> {
    pub fn with_transport(url: &str, transport: T, policy: RetryPolicy) -> Result<Self, SourceError> {
        let size = transport.content_length(url)?.unwrap_or(0);
        debug!(url, size, "opened remote archive");
        Ok(Self {
            url: url.to_string(),
            transport,
            policy,
            size,
            closed: false,
        })
    }
}

impl<T: RangeTransport> ByteSource for HttpSource<T> {
    fn read_at(&mut self, offset: u64, length: u64) -> Result<Vec<u8>, SourceError> {
        if self.closed {
            return Err(SourceError::Closed(self.url.clone()));
        }
        if length == 0 {
            return Ok(Vec::new());
        }
        let last = offset
            .checked_add(length - 1)
            .ok_or(SourceError::ShortRead {
                offset,
                expected: length,
                got: 0,
            })?;
        let mut last_status = 0;
        for attempt in 0..self.policy.max_attempts {
            let response = self.transport.get_range(&self.url, offset, last)?;
            match response.status {
                200 | 206 => {
                    let got = response.body.len() as u64;
                    if got != length {
                        return Err(SourceError::ShortRead {
                            offset,
                            expected: length,
                            got,
                        });
                    }
                    return Ok(response.body);
                }
                status if RetryPolicy::is_retryable(status) => {
                    last_status = status;
                    if attempt + 1 < self.policy.max_attempts {
                        let delay = self.policy.delay_for(attempt);
                        warn!(
                            url = %self.url,
                            status,
                            attempt = attempt + 1,
                            "remote read throttled; retrying in {:?}",
                            delay
                        );
                        thread::sleep(delay);
                    }
                }
                status => {
                    return Err(SourceError::Status {
                        status,
                        offset,
                        length,
                    });
                }
            }
        }
        Err(SourceError::RetriesExhausted {
            attempts: self.policy.max_attempts,
            status: last_status,
        })
    }

    fn size_hint(&self) -> u64 {
        self.size
    }

    fn describe(&self) -> &str {
        &self.url
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Where an archive URI points after scheme handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Remote(String),
}

/// Maps `s3://bucket/key` to its virtual-hosted HTTPS URL and classifies
/// everything else by scheme.
pub fn resolve_uri(uri: &str) -> Result<Location, SourceError> {
    if let Some(rest) = uri.strip_prefix("s3://") {
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| SourceError::InvalidUri(uri.to_string()))?;
        if bucket.is_empty() || key.is_empty() {
            return Err(SourceError::InvalidUri(uri.to_string()));
        }
        return Ok(Location::Remote(format!(
            "https://{bucket}.s3.amazonaws.com/{key}"
        )));
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(Location::Remote(uri.to_string()));
    }
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(Location::Local(PathBuf::from(path)));
    }
    if uri.contains("://") {
        return Err(SourceError::InvalidUri(uri.to_string()));
    }
    Ok(Location::Local(PathBuf::from(uri)))
}

pub fn open_source(uri: &str) -> Result<Box<dyn ByteSource>, SourceError> {
    match resolve_uri(uri)? {
        Location::Local(path) => Ok(Box::new(LocalSource::open(path)?)),
        Location::Remote(url) => Ok(Box::new(HttpSource::open(&url)?)),
    }
}
