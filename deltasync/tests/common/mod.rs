//! Shared fixtures for integration tests.

use std::sync::{Condvar, Mutex};

use deltasync::cancel::CancelFlag;
use deltasync::checksum::{md4_block, sha1_hex_reader, Rsum};
use deltasync::transfer::{ByteRange, ChunkSink, FetchStatus, HttpTransport, TransferError};

/// Assemble control-file bytes for a synthetic target buffer, the way
/// the publishing tool would: full-width weak sums, untruncated strong
/// sums, zero-padded tail block, real SHA-1 in the header.
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

/// In-memory HTTP server: serves the control file for whole-buffer
/// GETs and the target body for range requests, recording every range
/// asked for. A gate can hold `get` calls to park a session in the
/// manifest-fetch phase deterministically.
pub struct TestServer {
    pub control: Vec<u8>,
    pub body: Vec<u8>,
    pub supports_ranges: bool,
    pub corrupt_first_bytes: usize,
    pub chunk_size: usize,
    pub range_requests: Mutex<Vec<ByteRange>>,
    gate: Mutex<bool>,
    signal: Condvar,
}

impl TestServer {
    pub fn new(target: &[u8], block_size: u32) -> Self {
        Self {
            control: build_control(target, block_size, 1),
            body: target.to_vec(),
            supports_ranges: true,
            corrupt_first_bytes: 0,
            chunk_size: 512,
            range_requests: Mutex::new(Vec::new()),
            gate: Mutex::new(true),
            signal: Condvar::new(),
        }
    }

    /// Hold every subsequent `get` until [`TestServer::open_gate`].
    pub fn close_gate(&self) {
        *self.gate.lock().unwrap() = false;
    }

    pub fn open_gate(&self) {
        *self.gate.lock().unwrap() = true;
        self.signal.notify_all();
    }

    pub fn recorded_ranges(&self) -> Vec<ByteRange> {
        self.range_requests.lock().unwrap().clone()
    }

    fn served_body(&self) -> Vec<u8> {
        let mut body = self.body.clone();
        for byte in body.iter_mut().take(self.corrupt_first_bytes) {
            *byte = !*byte;
        }
        body
    }
}

impl HttpTransport for TestServer {
    fn get(&self, _url: &str) -> Result<Vec<u8>, TransferError> {
        let mut open = self.gate.lock().unwrap();
        while !*open {
            open = self.signal.wait(open).unwrap();
        }
        drop(open);
        Ok(self.control.clone())
    }

    fn probe_range_support(&self, _url: &str) -> Result<bool, TransferError> {
        Ok(self.supports_ranges)
    }

    fn get_range(
        &self,
        _url: &str,
        range: ByteRange,
        cancel: &CancelFlag,
        sink: ChunkSink,
    ) -> Result<FetchStatus, TransferError> {
        self.range_requests.lock().unwrap().push(range);

        let body = self.served_body();
        let slice = &body[range.from as usize..range.to as usize];
        for chunk in slice.chunks(self.chunk_size) {
            if cancel.is_canceled() {
                return Ok(FetchStatus::Canceled);
            }
            sink(chunk).map_err(|source| TransferError::Sink { source })?;
        }
        Ok(FetchStatus::Completed)
    }

    fn get_streaming(
        &self,
        _url: &str,
        cancel: &CancelFlag,
        sink: ChunkSink,
    ) -> Result<FetchStatus, TransferError> {
        let body = self.served_body();
        for chunk in body.chunks(self.chunk_size) {
            if cancel.is_canceled() {
                return Ok(FetchStatus::Canceled);
            }
            sink(chunk).map_err(|source| TransferError::Sink { source })?;
        }
        Ok(FetchStatus::Completed)
    }
}
