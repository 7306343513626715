//! Error types for control-file parsing.

use thiserror::Error;

/// Errors raised while parsing a control file.
///
/// Every malformed or missing field gets its own variant so callers can
/// report exactly which part of the manifest was rejected. A failed
/// parse never yields a partial manifest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// The blank-line separator before the checksum table is missing.
    #[error("no checksum table marker found in control file")]
    MissingTableMarker,

    /// A required header line is absent or out of order.
    #[error("missing `{0}` header line")]
    MissingField(&'static str),

    /// The leading format marker line is not a recognized version line.
    #[error("invalid format marker line: {0:?}")]
    InvalidVersionLine(String),

    /// The producing tool's major version is newer than we support.
    #[error("unsupported control file version {0}")]
    UnsupportedVersion(String),

    /// The `Filename` header is empty.
    #[error("empty target file name")]
    InvalidFilename,

    /// The `MTime` header is not a valid RFC 2822 date.
    #[error("invalid MTime header: {0:?}")]
    InvalidMtime(String),

    /// The `Blocksize` header is not a power of two greater than zero.
    #[error("invalid block size: {0:?}")]
    InvalidBlockSize(String),

    /// The `Length` header is not a positive integer.
    #[error("invalid target file length: {0:?}")]
    InvalidLength(String),

    /// The `Hash-Lengths` header is malformed or out of range.
    #[error("invalid Hash-Lengths header: {0:?}")]
    InvalidHashLengths(String),

    /// The `URL` header is not absolute and could not be resolved.
    #[error("invalid target file URL: {0:?}")]
    InvalidUrl(String),

    /// The `SHA-1` header is not 40 hexadecimal characters.
    #[error("invalid target file SHA-1: {0:?}")]
    InvalidSha1(String),

    /// The binary checksum table does not have the exact expected size.
    #[error("checksum table length mismatch: expected {expected} bytes, got {actual}")]
    TableLengthMismatch { expected: usize, actual: usize },
}
