//! Shared helpers for unit tests.

use std::io;
use std::sync::Mutex;

use crate::checksum::{md4_block, sha1_hex_reader, Rsum};
use crate::control::Manifest;
use crate::matcher::BlockSink;

/// Assemble control-file bytes for a synthetic target buffer.
///
/// Weak sums are stored at full width (4 bytes) and strong sums
/// untruncated (16 bytes); the tail block is zero-padded the way the
/// publishing tool pads it. The SHA-1 header is the real digest of the
/// target.
pub fn build_control(target: &[u8], block_size: u32, seq_matches: u8) -> Vec<u8> {
    let sha1 = sha1_hex_reader(target).expect("hashing a slice cannot fail");
    let mut bytes = format!(
        "zsync: 0.6.2\nFilename: app.bin\nMTime: Fri, 02 Mar 2018 11:10:00 +0000\n\
         Blocksize: {}\nLength: {}\nHash-Lengths: {},4,16\nURL: http://example.com/app.bin\n\
         SHA-1: {}\n\n",
        block_size,
        target.len(),
        seq_matches,
        sha1,
    )
    .into_bytes();

    for block in target.chunks(block_size as usize) {
        let mut padded = vec![0u8; block_size as usize];
        padded[..block.len()].copy_from_slice(block);
        let weak = Rsum::compute(&padded);
        bytes.extend_from_slice(&weak.a.to_be_bytes());
        bytes.extend_from_slice(&weak.b.to_be_bytes());
        bytes.extend_from_slice(&md4_block(&padded));
    }
    bytes
}

/// Parse a manifest for a synthetic target buffer.
pub fn manifest_for(target: &[u8], block_size: u32, seq_matches: u8) -> Manifest {
    Manifest::parse(&build_control(target, block_size, seq_matches), None)
        .expect("test control file must parse")
}

/// In-memory block sink capturing writes at their offsets.
pub struct VecSink {
    target_len: usize,
    bytes: Mutex<Vec<u8>>,
}

impl VecSink {
    /// Sink for a target of `target_len` bytes.
    pub fn new(target_len: usize) -> Self {
        Self {
            target_len,
            bytes: Mutex::new(vec![0u8; target_len]),
        }
    }

    /// The written image, truncated to the target length (block-padded
    /// tail writes fall off, as they do in the real writer).
    pub fn into_bytes(self) -> Vec<u8> {
        let mut bytes = self.bytes.into_inner().expect("sink lock poisoned");
        bytes.truncate(self.target_len);
        bytes
    }
}

impl BlockSink for VecSink {
    fn write_block_range(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut bytes = self.bytes.lock().expect("sink lock poisoned");
        let end = offset as usize + data.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[offset as usize..end].copy_from_slice(data);
        Ok(())
    }
}
