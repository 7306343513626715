//! Strong checksums: truncated MD4 per block, SHA-1 for whole files.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md4::{Digest, Md4};
use sha1::Sha1;

/// Buffer size for streaming file hashing (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Compute the MD4 digest of a single block.
///
/// The manifest keeps only the leading `strong_bytes` of this digest;
/// comparison is done with [`strong_sums_equal`].
pub fn md4_block(data: &[u8]) -> [u8; 16] {
    let mut ctx = Md4::new();
    ctx.update(data);
    ctx.finalize().into()
}

/// Compare two strong checksums over their stored prefix.
pub fn strong_sums_equal(computed: &[u8; 16], stored: &[u8; 16], strong_bytes: usize) -> bool {
    computed[..strong_bytes] == stored[..strong_bytes]
}

/// Calculate the SHA-1 of everything a reader yields, as lowercase hex.
pub fn sha1_hex_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Calculate the SHA-1 of a file on disk, as lowercase hex.
pub fn sha1_hex_file(path: &Path) -> io::Result<String> {
    sha1_hex_reader(File::open(path)?)
}
