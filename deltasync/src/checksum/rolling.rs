//! Rolling weak checksum (rsum).
//!
//! The manifest format uses the same modified Adler-32 variant as rsync
//! for its weak per-block checksum: two 16-bit halves where `a` is the
//! byte sum and `b` weights each byte by its distance from the end of
//! the window. Both halves are truncated mod 2^16, which is what makes
//! the O(1) per-byte roll possible.

/// Rolling weak checksum over one block-sized window.
///
/// `a` is the plain byte sum; `b` is the position-weighted sum
/// `sum((len - i) * byte[i])`. Both wrap at 16 bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rsum {
    /// Byte-sum half.
    pub a: u16,
    /// Position-weighted half.
    pub b: u16,
}

impl Rsum {
    /// Compute the checksum of a full window from scratch.
    pub fn compute(block: &[u8]) -> Self {
        let mut a = 0u16;
        let mut b = 0u16;
        let mut len = block.len() as u16;

        for &c in block {
            a = a.wrapping_add(u16::from(c));
            b = b.wrapping_add(len.wrapping_mul(u16::from(c)));
            len = len.wrapping_sub(1);
        }

        Self { a, b }
    }

    /// Slide the window one byte forward: `old` leaves at the front,
    /// `new` enters at the back. `block_shift` is log2 of the window
    /// length.
    pub fn roll(&mut self, old: u8, new: u8, block_shift: u32) {
        self.a = self
            .a
            .wrapping_add(u16::from(new))
            .wrapping_sub(u16::from(old));
        self.b = self
            .b
            .wrapping_add(self.a)
            .wrapping_sub(((u32::from(old)) << block_shift) as u16);
    }

    /// Decode a weak checksum from its wire form.
    ///
    /// The manifest stores the leading `bytes.len()` bytes of the
    /// big-endian `(a, b)` pair, left-padding with zeroes when fewer
    /// than four bytes are kept. The `a` half is additionally masked to
    /// the width that survives truncation.
    pub fn from_wire(bytes: &[u8], mask: u16) -> Self {
        debug_assert!(bytes.len() <= 4);
        let mut buf = [0u8; 4];
        buf[4 - bytes.len()..].copy_from_slice(bytes);
        Self {
            a: u16::from_be_bytes([buf[0], buf[1]]) & mask,
            b: u16::from_be_bytes([buf[2], buf[3]]),
        }
    }
}

/// Mask applied to the `a` half for a given stored weak-checksum width.
///
/// With one or two stored bytes only `b` survives; three bytes keep the
/// low byte of `a`; four keep it whole.
pub fn weak_sum_mask(weak_bytes: u8) -> u16 {
    match weak_bytes {
        0..=2 => 0,
        3 => 0x00ff,
        _ => 0xffff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_compute_empty() {
        let r = Rsum::compute(&[]);
        assert_eq!(r, Rsum { a: 0, b: 0 });
    }

    #[test]
    fn test_compute_single_byte() {
        // len = 1, so b == a == the byte itself.
        let r = Rsum::compute(&[42]);
        assert_eq!(r.a, 42);
        assert_eq!(r.b, 42);
    }

    #[test]
    fn test_compute_weights_by_distance_from_end() {
        // [1, 2]: a = 3, b = 2*1 + 1*2 = 4.
        let r = Rsum::compute(&[1, 2]);
        assert_eq!(r.a, 3);
        assert_eq!(r.b, 4);
    }

    #[test]
    fn test_roll_matches_recompute() {
        let data: Vec<u8> = (0u16..300).map(|i| (i * 7 % 251) as u8).collect();
        let bs = 64usize;
        let shift = bs.trailing_zeros();

        let mut rolling = Rsum::compute(&data[0..bs]);
        for x in 0..data.len() - bs {
            assert_eq!(rolling, Rsum::compute(&data[x..x + bs]), "offset {}", x);
            rolling.roll(data[x], data[x + bs], shift);
        }
    }

    #[test]
    fn test_from_wire_full_width() {
        // a = 0x0102, b = 0x0304 stored big-endian.
        let r = Rsum::from_wire(&[0x01, 0x02, 0x03, 0x04], 0xffff);
        assert_eq!(r.a, 0x0102);
        assert_eq!(r.b, 0x0304);
    }

    #[test]
    fn test_from_wire_two_bytes_keeps_b_only() {
        let r = Rsum::from_wire(&[0x03, 0x04], weak_sum_mask(2));
        assert_eq!(r.a, 0);
        assert_eq!(r.b, 0x0304);
    }

    #[test]
    fn test_from_wire_three_bytes_masks_a() {
        let r = Rsum::from_wire(&[0xab, 0x03, 0x04], weak_sum_mask(3));
        assert_eq!(r.a, 0x00ab);
        assert_eq!(r.b, 0x0304);
    }

    #[test]
    fn test_weak_sum_mask_widths() {
        assert_eq!(weak_sum_mask(1), 0);
        assert_eq!(weak_sum_mask(2), 0);
        assert_eq!(weak_sum_mask(3), 0x00ff);
        assert_eq!(weak_sum_mask(4), 0xffff);
    }

    proptest! {
        #[test]
        fn prop_roll_equals_recompute(
            data in proptest::collection::vec(any::<u8>(), 128..512),
        ) {
            let bs = 32usize;
            let shift = bs.trailing_zeros();
            let mut rolling = Rsum::compute(&data[0..bs]);
            for x in 0..data.len() - bs {
                prop_assert_eq!(rolling, Rsum::compute(&data[x..x + bs]));
                rolling.roll(data[x], data[x + bs], shift);
            }
        }
    }
}
