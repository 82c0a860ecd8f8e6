//! Counting [approximate-membership](https://en.wikipedia.org/wiki/Approximate_Membership_Query_Filter)
//! filters: Bloom filters that support deletion by keeping a per-position counter.
//!
//! Three filters are provided, trading memory for query locality:
//!
//! * [`CountingBloomFilter`] — the textbook layout, sixteen 4-bit counters
//!   packed into each 64-bit word. Membership and counts read the same array.
//! * [`SuccinctCountingBloomFilter`] — one bit per position in a presence
//!   plane (so membership probes touch exactly as much memory as a plain,
//!   non-counting Bloom filter) plus a succinct counter plane that stores
//!   each group's counts as concatenated unary runs, spilling rare heavy
//!   groups into a fixed overflow pool.
//! * [`SuccinctCountingBlockedBloomFilter`] — the same succinct counters
//!   applied inside 512-bit buckets, so every operation touches a single
//!   cache line of presence bits and a single cache line of counters.
//!
//! ### Example
//!
//! ```rust
//! use cbfilter::{SuccinctCountingBloomFilter, Status};
//!
//! let mut f = SuccinctCountingBloomFilter::new(1000).unwrap();
//! for i in 0..1000 {
//!     f.add(&i);
//! }
//! for i in 0..1000 {
//!     assert_eq!(f.contains(&i), Status::Ok);
//! }
//! for i in 0..1000 {
//!     f.remove(&i);
//! }
//! assert!(f.is_empty());
//! ```
//!
//! ### Hasher
//!
//! The hashing algorithm used is [xxhash3](https://crates.io/crates/xxhash-rust)
//! which offers both high performance and stability across platforms. Each key
//! is hashed once; the k probe positions are derived from the two 32-bit
//! halves of the hash by double hashing.
//!
//! ### Deletions
//!
//! Removing a key that was never added (or removing it more times than it was
//! added) corrupts the affected counters and may introduce false negatives,
//! exactly as with any counting filter. The filters do not defend against it.
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod blocked;
mod counting;
mod slab;
mod stable_hasher;
mod succinct;

pub use blocked::SuccinctCountingBlockedBloomFilter;
pub use counting::CountingBloomFilter;
pub use succinct::SuccinctCountingBloomFilter;

/// Outcome of a filter operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    /// The operation succeeded; for queries, the key is possibly present.
    Ok = 0,
    /// The key is definitely not present.
    NotFound = 1,
    /// The filter cannot admit more keys.
    NotEnoughSpace = 2,
    /// The operation is not available on this filter.
    NotSupported = 3,
}

#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The requested capacity would overflow the 32-bit probe index space.
    CapacityTooLarge,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for Error {}

/// Positions-per-key budget used by the `new(capacity)` constructors.
pub(crate) const DEFAULT_BITS_PER_ITEM: u32 = 10;

/// Bulk adds stage probes into blocks of `2^BLOCK_SHIFT` entries keyed by the
/// high bits of the group index, so each flush walks a bounded window of the
/// array instead of striding across all of it.
pub(crate) const BLOCK_SHIFT: u32 = 14;
pub(crate) const BLOCK_LEN: usize = 1 << BLOCK_SHIFT;

/// Probe count for a positions-per-key budget: `round(b · ln 2)`, at least 1.
#[inline]
pub(crate) fn probes_for(bits_per_item: u32) -> u32 {
    ((bits_per_item as f64 * std::f64::consts::LN_2 + 0.5) as u32).max(1)
}

/// Maps a 32-bit hash into `[0, n)` without the cost of a modulo.
///
/// <https://lemire.me/blog/2016/06/27/a-fast-alternative-to-the-modulo-reduction/>
#[inline]
pub(crate) fn reduce(hash: u32, n: u32) -> u32 {
    ((hash as u64 * n as u64) >> 32) as u32
}

/// Index of the `n`-th (0-based) set bit of `x`, or 64 when `x` has fewer
/// than `n + 1` bits set.
///
/// The BMI2 path is a rather unusual usage of the pdep (bit deposit)
/// instruction: `x` is the mask and `1 << n` the value, so the single bit is
/// deposited at the position of the n-th set bit of `x`, where a trailing
/// zero count finds it.
#[inline]
pub(crate) fn select64(x: u64, n: u32) -> u32 {
    debug_assert!(n < 64);
    #[cfg(target_arch = "x86_64")]
    {
        // TODO: AMD CPUs up to Zen2 have slow BMI implementations
        if std::is_x86_feature_detected!("bmi2") {
            // Safety: bmi2 was just detected.
            return unsafe { select64_bmi2(x, n) };
        }
    }
    select64_generic(x, n)
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "bmi2")]
#[inline]
unsafe fn select64_bmi2(x: u64, n: u32) -> u32 {
    use std::arch::x86_64::_pdep_u64;
    _pdep_u64(1 << n, x).trailing_zeros()
}

#[inline]
fn select64_generic(mut x: u64, n: u32) -> u32 {
    for _ in 0..n {
        x &= x.wrapping_sub(1); // remove the least significant bit
    }
    x.trailing_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_finds_nth_set_bit() {
        assert_eq!(select64(0b1, 0), 0);
        assert_eq!(select64(0b1010_1000, 0), 3);
        assert_eq!(select64(0b1010_1000, 1), 5);
        assert_eq!(select64(0b1010_1000, 2), 7);
        assert_eq!(select64(u64::MAX, 63), 63);
        assert_eq!(select64(1 << 63, 0), 63);
    }

    #[test]
    fn select_not_enough_bits() {
        assert_eq!(select64(0, 0), 64);
        assert_eq!(select64(0b100, 1), 64);
    }

    #[test]
    fn select_generic_matches_detected_path() {
        let mut x = 0x9e3779b97f4a7c15u64;
        for _ in 0..1000 {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            for n in 0..x.count_ones() {
                assert_eq!(select64(x, n), select64_generic(x, n));
            }
        }
    }

    #[test]
    fn reduce_stays_in_range() {
        for n in [1u32, 2, 3, 63, 64, 1000, u32::MAX] {
            assert_eq!(reduce(0, n), 0);
            assert!(reduce(u32::MAX, n) < n);
            assert!(reduce(0x8000_0000, n) < n);
        }
        // The mapping is monotonic in the hash and roughly uniform.
        assert_eq!(reduce(u32::MAX, 1000), 999);
        assert_eq!(reduce(0x8000_0000, 1000), 500);
    }

    #[test]
    fn probe_counts() {
        assert_eq!(probes_for(8), 6);
        assert_eq!(probes_for(10), 7);
        assert_eq!(probes_for(16), 11);
        assert_eq!(probes_for(1), 1);
    }
}
