//! Concurrent byte-range downloader.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use tracing::{debug, warn};

use super::client::{FetchStatus, HttpTransport};
use super::error::TransferError;
use super::progress::{ProgressReport, SpeedMeter};
use super::range::ByteRange;
use crate::cancel::CancelFlag;
use crate::matcher::BlockSink;

/// Default number of ranges fetched concurrently.
const DEFAULT_CONCURRENCY: usize = 4;

/// Callback invoked after every received chunk with aggregate progress.
pub type ProgressFn<'a> = &'a (dyn Fn(ProgressReport) + Sync);

/// How a download ended.
#[derive(Debug, PartialEq)]
pub enum DownloadOutcome {
    /// Every range was fetched and written.
    Completed(DownloadSummary),
    /// Cancellation tripped; all in-flight requests have unwound.
    Canceled,
}

/// Accounting for a completed download.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Bytes received over the network.
    pub bytes_received: u64,
    /// Whether the server lacked range support and the whole file was
    /// streamed instead.
    pub full_fallback: bool,
}

/// Downloads required ranges with bounded fan-out.
///
/// Each range is one HTTP request whose body is streamed into an owned
/// buffer; once complete the buffer is handed to the writer together
/// with its coordinates and ownership moves with it. The first failing
/// range aborts everything outstanding; there is no partial success
/// and no retry. A cancel request is broadcast to all in-flight
/// fetches; after they unwind the caller gets exactly one `Canceled`
/// outcome.
pub struct RangeDownloader {
    transport: Arc<dyn HttpTransport>,
    concurrency: usize,
}

impl RangeDownloader {
    /// Downloader with the default fan-out.
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Set the maximum number of concurrent range requests (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Fetch `ranges` from `url`, writing each into `writer` at its
    /// offset.
    ///
    /// `base_received` is what the caller has already accounted for
    /// (blocks recovered from the seed); progress percentages are
    /// relative to `bytes_total`, the full target length.
    pub fn download(
        &self,
        url: &str,
        ranges: &[ByteRange],
        writer: &dyn BlockSink,
        base_received: u64,
        bytes_total: u64,
        cancel: &CancelFlag,
        on_progress: ProgressFn<'_>,
    ) -> Result<DownloadOutcome, TransferError> {
        if ranges.is_empty() {
            return Ok(DownloadOutcome::Completed(DownloadSummary::default()));
        }
        if cancel.is_canceled() {
            return Ok(DownloadOutcome::Canceled);
        }

        if !self.transport.probe_range_support(url)? {
            warn!(url, "server does not honor range requests, falling back to full download");
            return self.download_full(url, writer, bytes_total, cancel, on_progress);
        }

        debug!(url, ranges = ranges.len(), "fetching required ranges");

        // Shared accounting across workers: received bytes, the sliding
        // speed window, the first error, and a stop flag that fans the
        // abort out to everything still in flight.
        let received = AtomicU64::new(0);
        let meter = Mutex::new(SpeedMeter::new());
        let first_error: Mutex<Option<TransferError>> = Mutex::new(None);
        let stop = CancelFlag::new();

        thread::scope(|scope| {
            for batch in ranges.chunks(self.concurrency) {
                let mut handles = Vec::new();
                for &range in batch {
                    let transport = &*self.transport;
                    let received = &received;
                    let meter = &meter;
                    let first_error = &first_error;
                    let stop = &stop;

                    handles.push(scope.spawn(move || {
                        if stop.is_canceled() || cancel.is_canceled() {
                            return;
                        }

                        let mut buffer = Vec::with_capacity(range.len() as usize);
                        let result = transport.get_range(url, range, stop, &mut |chunk| {
                            if cancel.is_canceled() {
                                stop.cancel();
                                return Ok(());
                            }
                            buffer.extend_from_slice(chunk);
                            let total_now =
                                received.fetch_add(chunk.len() as u64, Ordering::SeqCst)
                                    + chunk.len() as u64;

                            let rate = {
                                let mut meter = meter.lock().expect("speed meter lock poisoned");
                                meter.record(total_now, Instant::now());
                                meter.bytes_per_sec()
                            };
                            on_progress(ProgressReport::new(
                                base_received + total_now,
                                bytes_total,
                                rate,
                            ));
                            Ok(())
                        });

                        match result {
                            Ok(FetchStatus::Canceled) => {}
                            Ok(FetchStatus::Completed) => {
                                if buffer.len() as u64 != range.len() {
                                    record_error(
                                        first_error,
                                        stop,
                                        TransferError::IncompleteBody {
                                            url: url.to_string(),
                                            expected: range.len(),
                                            actual: buffer.len() as u64,
                                        },
                                    );
                                    return;
                                }
                                // Buffer ownership passes to the writer here.
                                if let Err(source) = writer.write_block_range(range.from, &buffer)
                                {
                                    record_error(
                                        first_error,
                                        stop,
                                        TransferError::Sink { source },
                                    );
                                }
                            }
                            Err(error) => record_error(first_error, stop, error),
                        }
                    }));
                }

                for handle in handles {
                    handle.join().expect("download worker panicked");
                }

                if stop.is_canceled() || cancel.is_canceled() {
                    break;
                }
            }
        });

        if cancel.is_canceled() {
            debug!(url, "download canceled");
            return Ok(DownloadOutcome::Canceled);
        }
        if let Some(error) = first_error.lock().expect("error slot poisoned").take() {
            return Err(error);
        }
        Ok(DownloadOutcome::Completed(DownloadSummary {
            bytes_received: received.load(Ordering::SeqCst),
            full_fallback: false,
        }))
    }

    /// Sequential whole-file fallback for servers without range
    /// support; one stream satisfies every range.
    fn download_full(
        &self,
        url: &str,
        writer: &dyn BlockSink,
        bytes_total: u64,
        cancel: &CancelFlag,
        on_progress: ProgressFn<'_>,
    ) -> Result<DownloadOutcome, TransferError> {
        let mut offset = 0u64;
        let mut meter = SpeedMeter::new();

        let status = self.transport.get_streaming(url, cancel, &mut |chunk| {
            writer.write_block_range(offset, chunk)?;
            offset += chunk.len() as u64;
            meter.record(offset, Instant::now());
            on_progress(ProgressReport::new(offset, bytes_total, meter.bytes_per_sec()));
            Ok(())
        });

        match status {
            Err(error) => Err(error),
            Ok(FetchStatus::Canceled) => Ok(DownloadOutcome::Canceled),
            Ok(FetchStatus::Completed) => Ok(DownloadOutcome::Completed(DownloadSummary {
                bytes_received: offset,
                full_fallback: true,
            })),
        }
    }
}

/// Keep the first error, trip the stop flag for everyone else.
fn record_error(slot: &Mutex<Option<TransferError>>, stop: &CancelFlag, error: TransferError) {
    let mut slot = slot.lock().expect("error slot poisoned");
    if slot.is_none() {
        *slot = Some(error);
    }
    stop.cancel();
}
