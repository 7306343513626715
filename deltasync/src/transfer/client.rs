//! HTTP transport abstraction.
//!
//! All network I/O goes through the [`HttpTransport`] trait so the
//! engine can be exercised in tests with mock servers that never touch
//! the network. The production implementation wraps a blocking reqwest
//! client.

use std::io;
use std::time::Duration;

use reqwest::blocking::Client;

use super::error::TransferError;
use super::range::ByteRange;
use crate::cancel::CancelFlag;

/// Default timeout for HTTP requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300; // 5 minutes

/// Buffer size for streaming response bodies (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Receives response-body chunks as they arrive.
pub type ChunkSink<'a> = &'a mut dyn FnMut(&[u8]) -> io::Result<()>;

/// How a streamed fetch ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchStatus {
    /// The body was streamed to completion.
    Completed,
    /// The cancellation flag tripped and the transfer was abandoned.
    Canceled,
}

/// Blocking HTTP operations the engine needs.
///
/// Implementations map HTTP failures onto [`TransferError`] and honor
/// the cancellation flag between chunks of streamed bodies.
pub trait HttpTransport: Send + Sync {
    /// Whole-buffer GET; returns the body of a 2xx response.
    fn get(&self, url: &str) -> Result<Vec<u8>, TransferError>;

    /// Probe whether the server honors byte-range requests: issue a
    /// one-byte range request and report whether the answer was
    /// 206 Partial Content.
    fn probe_range_support(&self, url: &str) -> Result<bool, TransferError>;

    /// GET one byte range, streaming the body into `sink`. A response
    /// status other than 206 is an error.
    fn get_range(
        &self,
        url: &str,
        range: ByteRange,
        cancel: &CancelFlag,
        sink: ChunkSink,
    ) -> Result<FetchStatus, TransferError>;

    /// Plain GET, streaming the whole body into `sink` (the fallback
    /// path when the server cannot serve ranges).
    fn get_streaming(
        &self,
        url: &str,
        cancel: &CancelFlag,
        sink: ChunkSink,
    ) -> Result<FetchStatus, TransferError>;
}

/// Production transport backed by a blocking reqwest client.
#[derive(Debug)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestTransport {
    /// Create a transport with the default timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a transport with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { client, timeout }
    }

    fn request_error(&self, url: &str, error: reqwest::Error) -> TransferError {
        if error.is_timeout() {
            TransferError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            TransferError::Request {
                url: url.to_string(),
                reason: error.to_string(),
            }
        }
    }

    fn stream_body(
        &self,
        url: &str,
        mut response: reqwest::blocking::Response,
        cancel: &CancelFlag,
        sink: ChunkSink,
    ) -> Result<FetchStatus, TransferError> {
        use std::io::Read;

        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            if cancel.is_canceled() {
                return Ok(FetchStatus::Canceled);
            }
            let bytes_read = response
                .read(&mut buffer)
                .map_err(|e| TransferError::Request {
                    url: url.to_string(),
                    reason: format!("read error: {}", e),
                })?;
            if bytes_read == 0 {
                return Ok(FetchStatus::Completed);
            }
            sink(&buffer[..bytes_read]).map_err(|source| TransferError::Sink { source })?;
        }
    }
}

/// Map an error HTTP status onto the transfer error taxonomy.
fn status_error(url: &str, status: u16) -> TransferError {
    match status {
        404 => TransferError::NotFound {
            url: url.to_string(),
        },
        403 | 429 => TransferError::RateLimited {
            url: url.to_string(),
        },
        _ => TransferError::BadStatus {
            url: url.to_string(),
            status,
        },
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str) -> Result<Vec<u8>, TransferError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| self.request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(url, status.as_u16()));
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| self.request_error(url, e))
    }

    fn probe_range_support(&self, url: &str) -> Result<bool, TransferError> {
        let response = self
            .client
            .get(url)
            .header("Range", "bytes=0-0")
            .send()
            .map_err(|e| self.request_error(url, e))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(status_error(url, status.as_u16()));
        }
        // Dropping the response aborts the remainder of the body.
        Ok(status.as_u16() == 206)
    }

    fn get_range(
        &self,
        url: &str,
        range: ByteRange,
        cancel: &CancelFlag,
        sink: ChunkSink,
    ) -> Result<FetchStatus, TransferError> {
        let response = self
            .client
            .get(url)
            .header("Range", range.header_value())
            .send()
            .map_err(|e| self.request_error(url, e))?;

        let status = response.status().as_u16();
        if status != 206 {
            if response.status().is_client_error() || response.status().is_server_error() {
                return Err(status_error(url, status));
            }
            return Err(TransferError::UnexpectedRangeStatus {
                url: url.to_string(),
                status,
            });
        }

        self.stream_body(url, response, cancel, sink)
    }

    fn get_streaming(
        &self,
        url: &str,
        cancel: &CancelFlag,
        sink: ChunkSink,
    ) -> Result<FetchStatus, TransferError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| self.request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(url, status.as_u16()));
        }

        self.stream_body(url, response, cancel, sink)
    }
}
