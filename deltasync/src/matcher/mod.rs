//! Block matching against a local seed file.
//!
//! This is the algorithmic core of the sync engine:
//!
//! - `index`: an in-memory hash table over the manifest's per-block
//!   weak checksums, with a bit table for O(1) rejection of positions
//!   that cannot match anything
//! - `block_map`: the record of which target blocks have already been
//!   satisfied, kept as sorted id ranges
//! - `scanner`: the sliding-window scan of the seed file that confirms
//!   candidates with strong checksums, writes reusable blocks into the
//!   output file, and coalesces whatever is left into the byte ranges
//!   the downloader must fetch
//!
//! Every scan owns its index outright; for large files the scan can be
//! sharded over disjoint block-id slices, each shard with its own
//! index, and the shard outputs merged in block-id order.

mod block_map;
mod index;
mod scanner;

pub use block_map::BlockMap;
pub use index::ChecksumIndex;
pub use scanner::{scan_sharded, BlockSink, ScanError, ScanOutcome, ScanStatus, Scanner};
