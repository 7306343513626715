//! Error types for HTTP transfers.

use std::io;

/// Errors raised while talking to the file server.
///
/// Every network failure is terminal for the session that hit it; the
/// engine never retries on its own.
#[derive(Debug)]
pub enum TransferError {
    /// The request could not be performed (connection refused, DNS,
    /// protocol errors).
    Request { url: String, reason: String },

    /// The request timed out.
    Timeout { url: String, timeout_secs: u64 },

    /// The server answered 404.
    NotFound { url: String },

    /// The server answered 403 or 429.
    RateLimited { url: String },

    /// Any other error status.
    BadStatus { url: String, status: u16 },

    /// A range request was answered with something other than
    /// 206 Partial Content after the probe confirmed range support.
    UnexpectedRangeStatus { url: String, status: u16 },

    /// The response body ended before the requested range was covered.
    IncompleteBody {
        url: String,
        expected: u64,
        actual: u64,
    },

    /// Writing received bytes to the output failed.
    Sink { source: io::Error },
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request { url, reason } => {
                write!(f, "request to {} failed: {}", url, reason)
            }
            Self::Timeout { url, timeout_secs } => {
                write!(f, "request to {} timed out after {}s", url, timeout_secs)
            }
            Self::NotFound { url } => write!(f, "{} not found (404)", url),
            Self::RateLimited { url } => write!(f, "rate limited by {}", url),
            Self::BadStatus { url, status } => {
                write!(f, "{} answered with HTTP status {}", url, status)
            }
            Self::UnexpectedRangeStatus { url, status } => {
                write!(
                    f,
                    "{} answered a range request with HTTP status {} instead of 206",
                    url, status
                )
            }
            Self::IncompleteBody {
                url,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "{} body ended early: expected {} bytes, got {}",
                    url, expected, actual
                )
            }
            Self::Sink { source } => write!(f, "failed to write received bytes: {}", source),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sink { source } => Some(source),
            _ => None,
        }
    }
}
