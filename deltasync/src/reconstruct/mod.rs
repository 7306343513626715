//! Reconstruction of the target file.
//!
//! The [`Reconstructor`] owns the temporary output file for one
//! session. Matched seed blocks and downloaded ranges both land here,
//! in any offset order, through one internally-locked handle; a
//! remaining-bytes counter tracks how much of the target is still
//! unaccounted for and gates the final integrity check. On a hash
//! match the temporary file atomically takes the destination path; on
//! a mismatch it is discarded, never left in place of a valid prior
//! version.

mod error;
mod writer;

pub use error::ReconstructError;
pub use writer::{FinishedFile, Reconstructor};
