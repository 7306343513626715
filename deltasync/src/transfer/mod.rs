//! HTTP transfer of required byte ranges.
//!
//! This module owns everything that touches the network:
//! - `client`: the blocking [`HttpTransport`] trait and its reqwest
//!   implementation
//! - `range`: the half-open byte-range coordinates exchanged between
//!   matcher, downloader, and writer
//! - `downloader`: concurrent range fetches with bounded fan-out,
//!   full-file fallback for servers without range support, first-error
//!   abort, and cooperative cancellation
//! - `progress`: per-chunk progress aggregation and the sliding-window
//!   speed meter
//!
//! # Architecture
//!
//! ```text
//! RangeDownloader
//!         │
//!         ├── HttpTransport (trait)
//!         │       └── ReqwestTransport
//!         │
//!         ├── ByteRange (units of work)
//!         │
//!         └── ProgressReport / SpeedMeter (per-chunk updates)
//! ```

mod client;
mod downloader;
mod error;
mod progress;
mod range;

pub use client::{ChunkSink, FetchStatus, HttpTransport, ReqwestTransport};
pub use downloader::{DownloadOutcome, DownloadSummary, ProgressFn, RangeDownloader};
pub use error::TransferError;
pub use progress::{humanize_speed, ProgressReport, SpeedMeter};
pub use range::ByteRange;

#[cfg(test)]
pub(crate) use client::mock;
