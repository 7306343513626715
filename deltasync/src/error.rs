//! Top-level error type surfaced to revisioner callers.

use std::io;
use std::path::PathBuf;

use crate::control::ControlError;
use crate::matcher::ScanError;
use crate::reconstruct::ReconstructError;
use crate::transfer::TransferError;

/// Everything that can terminate a revision session.
///
/// One error notification carries exactly one of these; nothing is
/// silently swallowed and nothing is retried inside the engine.
/// Retrying is the caller's decision (`clear` + `start`). Cancellation
/// is not an error and has its own notification.
#[derive(Debug)]
pub enum RevisionError {
    /// `start`/`check_for_update` called before a seed file was set.
    NoSeedFile,

    /// `start`/`check_for_update` called before a manifest source was
    /// set.
    NoManifestSource,

    /// The seed file does not exist.
    SeedFileNotFound { path: PathBuf },

    /// The seed file exists but cannot be read.
    SeedFileNotReadable { path: PathBuf, source: io::Error },

    /// The manifest source is a vendor descriptor that was never
    /// resolved to a URL.
    UnresolvedDescriptor { transport: String },

    /// The manifest source's URL is not a valid absolute URL.
    InvalidManifestUrl { url: String },

    /// The control file was malformed.
    Control(ControlError),

    /// A network operation failed.
    Transfer(TransferError),

    /// Scanning the seed file failed.
    Scan(ScanError),

    /// Building or finalizing the output file failed (including the
    /// final hash mismatch).
    Reconstruct(ReconstructError),
}

impl std::fmt::Display for RevisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSeedFile => write!(f, "no seed file has been set"),
            Self::NoManifestSource => write!(f, "no manifest source has been set"),
            Self::SeedFileNotFound { path } => {
                write!(f, "seed file {} not found", path.display())
            }
            Self::SeedFileNotReadable { path, source } => {
                write!(f, "seed file {} is not readable: {}", path.display(), source)
            }
            Self::UnresolvedDescriptor { transport } => {
                write!(
                    f,
                    "descriptor transport {:?} must be resolved to a URL before starting",
                    transport
                )
            }
            Self::InvalidManifestUrl { url } => {
                write!(f, "invalid manifest URL {:?}", url)
            }
            Self::Control(e) => write!(f, "control file error: {}", e),
            Self::Transfer(e) => write!(f, "transfer error: {}", e),
            Self::Scan(e) => write!(f, "seed scan error: {}", e),
            Self::Reconstruct(e) => write!(f, "reconstruction error: {}", e),
        }
    }
}

impl std::error::Error for RevisionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SeedFileNotReadable { source, .. } => Some(source),
            Self::Control(e) => Some(e),
            Self::Transfer(e) => Some(e),
            Self::Scan(e) => Some(e),
            Self::Reconstruct(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ControlError> for RevisionError {
    fn from(e: ControlError) -> Self {
        Self::Control(e)
    }
}

impl From<TransferError> for RevisionError {
    fn from(e: TransferError) -> Self {
        Self::Transfer(e)
    }
}

impl From<ScanError> for RevisionError {
    fn from(e: ScanError) -> Self {
        Self::Scan(e)
    }
}

impl From<ReconstructError> for RevisionError {
    fn from(e: ReconstructError) -> Self {
        Self::Reconstruct(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_control_error() {
        let err: RevisionError = ControlError::MissingTableMarker.into();
        assert!(matches!(err, RevisionError::Control(_)));
        assert!(err.to_string().contains("control file"));
    }

    #[test]
    fn test_from_reconstruct_error() {
        let err: RevisionError = ReconstructError::Sha1Mismatch {
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            RevisionError::Reconstruct(ReconstructError::Sha1Mismatch { .. })
        ));
    }
}
