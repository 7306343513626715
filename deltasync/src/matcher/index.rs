//! Weak-checksum hash index over the manifest's block table.

use crate::checksum::{weak_sum_mask, Rsum};
use crate::control::Manifest;

/// Shift applied when folding the secondary component into the hash;
/// also sizes the bit table at 2^3 bits per bucket.
const BITHASH_SHIFT: u32 = 3;

/// One block's checksums, as stored in the index arena.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct BlockEntry {
    pub weak: Rsum,
    pub strong: [u8; 16],
}

/// Hash table mapping reduced weak checksums to chains of candidate
/// block ids.
///
/// The arena holds one entry per covered block id; chains are integer
/// indices into it (`heads` + `next`), so nothing is allocated per
/// node and the whole index is a plain value owned by one scan. A bit
/// table over a wider reduction of the same hash rejects most
/// non-matching scan positions before the chain is ever touched.
///
/// An index may cover a slice of the block space (sharded scans): it
/// *owns* `[first_id, first_id + owned)` and, when two consecutive
/// matches are required, additionally carries the checksums of the
/// first block after the slice so candidate validation at the upper
/// edge reads real data. Only owned blocks are inserted into chains.
pub struct ChecksumIndex {
    entries: Vec<BlockEntry>,
    first_id: u32,
    owned: u32,
    seq_matches: u8,
    strong_bytes: u8,
    weak_mask: u16,
    heads: Vec<Option<u32>>,
    next: Vec<Option<u32>>,
    bit_table: Vec<u8>,
    hash_mask: u32,
    bit_mask: u32,
}

impl ChecksumIndex {
    /// Build an index covering every block of the manifest.
    pub fn new(manifest: &Manifest) -> Self {
        Self::for_slice(manifest, 0, manifest.block_count())
    }

    /// Build an index owning `owned` block ids starting at `first_id`.
    pub fn for_slice(manifest: &Manifest, first_id: u32, owned: u32) -> Self {
        let block_count = manifest.block_count();
        debug_assert!(first_id + owned <= block_count);

        let seq_matches = manifest.seq_matches();
        let weak_mask = weak_sum_mask(manifest.weak_bytes());

        // Carry one real entry past the slice when consecutive matches
        // are validated, then pad with zeroed sentinels so entry[id + 1]
        // is always addressable. A zero-padded seed tail rolls to an
        // all-zero rsum, which is exactly what the sentinel matches.
        let overlap = if seq_matches > 1 && first_id + owned < block_count {
            1
        } else {
            0
        };
        let covered = (owned + overlap) as usize;
        let mut entries = vec![BlockEntry::default(); covered + usize::from(seq_matches)];
        for (slot, sums) in entries
            .iter_mut()
            .zip(&manifest.block_sums()[first_id as usize..first_id as usize + covered])
        {
            slot.weak = sums.weak;
            slot.strong = sums.strong;
        }

        // Bucket count: smallest power of two that keeps average chain
        // length around one for the owned block count.
        let mut i = 16u32;
        while (2u32 << (i - 1)) > owned && i > 4 {
            i -= 1;
        }
        let hash_mask = (2u32 << i) - 1;
        let bit_mask = (2u32 << (i + BITHASH_SHIFT)) - 1;

        let mut index = Self {
            entries,
            first_id,
            owned,
            seq_matches,
            strong_bytes: manifest.strong_bytes(),
            weak_mask,
            heads: vec![None; hash_mask as usize + 1],
            next: vec![None; covered],
            bit_table: vec![0u8; (bit_mask as usize >> 3) + 1],
            hash_mask,
            bit_mask,
        };

        // Insert in reverse so the prepend-built chains come out in
        // ascending block-id order, which keeps matched writes roughly
        // sequential.
        for local in (0..owned).rev() {
            let h = index.entry_hash(local);
            index.next[local as usize] = index.heads[(h & hash_mask) as usize];
            index.heads[(h & hash_mask) as usize] = Some(local);
            index.bit_table[((h & bit_mask) >> 3) as usize] |= 1 << (h & 7);
        }

        index
    }

    /// First block id owned by this index.
    pub fn first_id(&self) -> u32 {
        self.first_id
    }

    /// One past the last block id owned by this index.
    pub fn end_id(&self) -> u32 {
        self.first_id + self.owned
    }

    /// Consecutive matches required by the manifest.
    pub fn seq_matches(&self) -> u8 {
        self.seq_matches
    }

    /// Stored strong-checksum width.
    pub fn strong_bytes(&self) -> usize {
        usize::from(self.strong_bytes)
    }

    /// Mask applied to the `a` half of scanned weak sums.
    pub fn weak_mask(&self) -> u16 {
        self.weak_mask
    }

    pub(crate) fn entry(&self, id: u32) -> &BlockEntry {
        &self.entries[(id - self.first_id) as usize]
    }

    /// Entry one past `id`; always addressable thanks to the sentinel
    /// padding.
    pub(crate) fn following_entry(&self, id: u32) -> &BlockEntry {
        &self.entries[(id - self.first_id) as usize + 1]
    }

    /// Hash for the table built from a stored entry.
    fn entry_hash(&self, local: u32) -> u32 {
        let e = &self.entries[local as usize];
        let second = if self.seq_matches > 1 {
            u32::from(self.entries[local as usize + 1].weak.b)
        } else {
            u32::from(e.weak.a & self.weak_mask)
        };
        u32::from(e.weak.b) ^ (second << BITHASH_SHIFT)
    }

    /// Hash for a scan position, from the rolling sums of the current
    /// window (and the following window when two consecutive matches
    /// are required).
    pub fn scan_hash(&self, first: Rsum, second: Rsum) -> u32 {
        let folded = if self.seq_matches > 1 {
            u32::from(second.b)
        } else {
            u32::from(first.a & self.weak_mask)
        };
        u32::from(first.b) ^ (folded << BITHASH_SHIFT)
    }

    /// O(1) negative test: if clear, no block can match this hash.
    pub fn bit_present(&self, hash: u32) -> bool {
        self.bit_table[((hash & self.bit_mask) >> 3) as usize] & (1 << (hash & 7)) != 0
    }

    /// Collect the candidate block ids chained under `hash`, in chain
    /// order.
    pub fn chain(&self, hash: u32) -> Vec<u32> {
        let mut ids = Vec::new();
        let mut cursor = self.heads[(hash & self.hash_mask) as usize];
        while let Some(local) = cursor {
            ids.push(self.first_id + local);
            cursor = self.next[local as usize];
        }
        ids
    }

    /// Unlink a block id from its chain once its data is on disk, so
    /// later lookups stop offering it.
    pub fn remove(&mut self, id: u32) {
        let local = id - self.first_id;
        if local >= self.owned {
            return;
        }
        let bucket = (self.entry_hash(local) & self.hash_mask) as usize;

        let mut cursor = self.heads[bucket];
        if cursor == Some(local) {
            self.heads[bucket] = self.next[local as usize];
            return;
        }
        while let Some(current) = cursor {
            let following = self.next[current as usize];
            if following == Some(local) {
                self.next[current as usize] = self.next[local as usize];
                return;
            }
            cursor = following;
        }
    }
}
