//! Error types for target-file reconstruction.

use std::io;
use std::path::PathBuf;

/// Errors raised while building or finalizing the output file.
#[derive(Debug)]
pub enum ReconstructError {
    /// The temporary output file could not be created.
    Create { path: PathBuf, source: io::Error },

    /// Writing to the output file failed.
    Write { path: PathBuf, source: io::Error },

    /// Reading the output back for verification failed.
    Read { path: PathBuf, source: io::Error },

    /// Moving a file into place failed.
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// Finalize was requested before every byte was accounted for.
    Incomplete { remaining: u64 },

    /// The reconstructed file's SHA-1 does not match the manifest.
    Sha1Mismatch { expected: String, actual: String },
}

impl std::fmt::Display for ReconstructError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create { path, source } => {
                write!(f, "failed to create {}: {}", path.display(), source)
            }
            Self::Write { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
            Self::Read { path, source } => {
                write!(f, "failed to read back {}: {}", path.display(), source)
            }
            Self::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to move {} to {}: {}",
                    from.display(),
                    to.display(),
                    source
                )
            }
            Self::Incomplete { remaining } => {
                write!(f, "{} bytes of the target are still unaccounted for", remaining)
            }
            Self::Sha1Mismatch { expected, actual } => {
                write!(
                    f,
                    "target file SHA-1 mismatch: expected {}, got {}",
                    expected, actual
                )
            }
        }
    }
}

impl std::error::Error for ReconstructError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Create { source, .. }
            | Self::Write { source, .. }
            | Self::Read { source, .. }
            | Self::Rename { source, .. } => Some(source),
            _ => None,
        }
    }
}
