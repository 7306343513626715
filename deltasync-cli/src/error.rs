//! CLI error type.

use std::fmt;

use deltasync::{DescriptorError, RevisionError};

/// Errors surfaced to the terminal.
#[derive(Debug)]
pub enum CliError {
    /// Neither `--url` nor `--descriptor` was usable.
    InvalidSource(String),

    /// The embedded descriptor string did not parse.
    Descriptor(DescriptorError),

    /// The update session failed.
    Update(RevisionError),

    /// The event channel closed before a terminal notification.
    ChannelClosed,
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidSource(msg) => write!(f, "invalid manifest source: {}", msg),
            CliError::Descriptor(e) => write!(f, "invalid descriptor: {}", e),
            CliError::Update(e) => write!(f, "{}", e),
            CliError::ChannelClosed => write!(f, "update engine exited unexpectedly"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Descriptor(e) => Some(e),
            CliError::Update(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DescriptorError> for CliError {
    fn from(e: DescriptorError) -> Self {
        CliError::Descriptor(e)
    }
}

impl From<RevisionError> for CliError {
    fn from(e: RevisionError) -> Self {
        CliError::Update(e)
    }
}
