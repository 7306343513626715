//! The output-file writer.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{debug, info};

use super::error::ReconstructError;
use crate::checksum::sha1_hex_reader;
use crate::matcher::BlockSink;

/// Suffix of the temporary file while the target is under
/// construction.
const PART_SUFFIX: &str = ".part";

/// Suffix the previous version is moved aside under when it occupies
/// the destination path.
const OLD_SUFFIX: &str = ".old";

/// A successfully reconstructed and verified target file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinishedFile {
    /// Absolute path of the finished file.
    pub path: PathBuf,
    /// Its verified SHA-1, lowercase hex.
    pub sha1: String,
}

/// Sole owner of the under-construction output file.
///
/// Writes may arrive out of offset order from the matcher and from
/// several download workers; one internal lock serializes them, so no
/// caller-side coordination is needed and the file is never buffered
/// whole in memory. The remaining-bytes counter starts at the target
/// length and is decremented by [`Reconstructor::account`] as matched
/// and downloaded bytes are handed over; [`Reconstructor::finalize`]
/// refuses to run before it reaches zero.
pub struct Reconstructor {
    file: Mutex<File>,
    part_path: PathBuf,
    final_path: PathBuf,
    length: u64,
    expected_sha1: String,
    remaining: AtomicU64,
    finished: bool,
}

impl Reconstructor {
    /// Create the temporary `<filename>.part` file in `output_dir`.
    pub fn create(
        output_dir: &Path,
        filename: &str,
        length: u64,
        expected_sha1: &str,
    ) -> Result<Self, ReconstructError> {
        let final_path = output_dir.join(filename);
        let part_path = output_dir.join(format!("{}{}", filename, PART_SUFFIX));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&part_path)
            .map_err(|source| ReconstructError::Create {
                path: part_path.clone(),
                source,
            })?;

        debug!(part = %part_path.display(), "created temporary target file");

        Ok(Self {
            file: Mutex::new(file),
            part_path,
            final_path,
            length,
            expected_sha1: expected_sha1.to_ascii_lowercase(),
            remaining: AtomicU64::new(length),
            finished: false,
        })
    }

    /// Path of the temporary file.
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Destination path the finished file will take.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Write `data` at `offset`. Writes past the target length are
    /// allowed (block-padded tails) and trimmed during finalize.
    pub fn write_range(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut file = self.file.lock().expect("output file lock poisoned");
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)
    }

    /// Mark `bytes` of the target as accounted for (matched from the
    /// seed or downloaded). Returns the bytes still outstanding.
    pub fn account(&self, bytes: u64) -> u64 {
        let previous = self.remaining.fetch_sub(bytes, Ordering::SeqCst);
        debug_assert!(previous >= bytes, "accounted more bytes than the target holds");
        previous - bytes
    }

    /// Bytes of the target not yet accounted for.
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Verify the reconstructed file and move it into place.
    ///
    /// Refuses to run while bytes are outstanding. Truncates the file
    /// to the target length, hashes it back, and compares with the
    /// manifest's SHA-1. On a match: any file already at the
    /// destination is moved aside under a `.old` suffix, the temporary
    /// file is renamed in atomically, and the seed file's permission
    /// bits (the executable bit included) are applied. On a mismatch
    /// the temporary file is deleted.
    pub fn finalize(mut self, seed_path: Option<&Path>) -> Result<FinishedFile, ReconstructError> {
        let outstanding = self.remaining();
        if outstanding > 0 {
            return Err(ReconstructError::Incomplete {
                remaining: outstanding,
            });
        }

        let actual = {
            let mut file = self.file.lock().expect("output file lock poisoned");
            file.set_len(self.length).map_err(|source| ReconstructError::Write {
                path: self.part_path.clone(),
                source,
            })?;
            file.seek(SeekFrom::Start(0)).map_err(|source| ReconstructError::Read {
                path: self.part_path.clone(),
                source,
            })?;
            sha1_hex_reader(&mut *file).map_err(|source| ReconstructError::Read {
                path: self.part_path.clone(),
                source,
            })?
        };

        if actual != self.expected_sha1 {
            // Never leave a bad image where a valid version could be.
            self.finished = true;
            let _ = fs::remove_file(&self.part_path);
            return Err(ReconstructError::Sha1Mismatch {
                expected: self.expected_sha1.clone(),
                actual,
            });
        }

        if self.final_path.exists() {
            let aside = PathBuf::from(format!("{}{}", self.final_path.display(), OLD_SUFFIX));
            debug!(from = %self.final_path.display(), to = %aside.display(),
                   "moving previous version aside");
            fs::rename(&self.final_path, &aside).map_err(|source| ReconstructError::Rename {
                from: self.final_path.clone(),
                to: aside.clone(),
                source,
            })?;
        }

        fs::rename(&self.part_path, &self.final_path).map_err(|source| {
            ReconstructError::Rename {
                from: self.part_path.clone(),
                to: self.final_path.clone(),
                source,
            }
        })?;
        self.finished = true;

        if let Some(seed) = seed_path {
            copy_permissions(seed, &self.final_path);
        }

        let path = fs::canonicalize(&self.final_path).unwrap_or_else(|_| self.final_path.clone());
        info!(path = %path.display(), sha1 = %actual, "target file reconstructed");

        Ok(FinishedFile { path, sha1: actual })
    }

    /// Drop the session's partial output.
    pub fn discard(mut self) {
        self.finished = true;
        let _ = fs::remove_file(&self.part_path);
    }
}

impl Drop for Reconstructor {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_file(&self.part_path);
        }
    }
}

impl BlockSink for Reconstructor {
    fn write_block_range(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.write_range(offset, data)
    }
}

/// Copy the seed's permission bits onto the finished file, so an
/// executable bundle stays executable. Best effort.
fn copy_permissions(seed: &Path, target: &Path) {
    if let Ok(metadata) = fs::metadata(seed) {
        let _ = fs::set_permissions(target, metadata.permissions());
    }
}
