//! Checksum primitives for delta sync.
//!
//! This module provides the three digests the sync engine is built on:
//! - The rolling weak checksum (`rsum`) used for cheap candidate
//!   filtering while sliding over the seed file (`rolling`)
//! - The truncated MD4 strong checksum used to confirm candidates
//!   (`strong`)
//! - Streaming SHA-1 hashing for whole-file integrity checks (`strong`)

mod rolling;
mod strong;

pub use rolling::{weak_sum_mask, Rsum};
pub use strong::{md4_block, sha1_hex_file, sha1_hex_reader, strong_sums_equal};
