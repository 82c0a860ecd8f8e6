//! Cache-local variant: succinct counters inside 512-bit buckets.

use std::hash::Hash;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::slab::CounterSlab;
use crate::stable_hasher::stable_hash;
use crate::{probes_for, reduce, Error, DEFAULT_BITS_PER_ITEM};

/// Pool words per 100 presence groups: four and a half 8-word slots.
const OVERFLOW_HEADROOM: usize = 36;

/// Eight presence groups sharing one cache line.
#[derive(Clone, Copy)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(C, align(64))]
struct Bucket([u64; 8]);

/// Blocked counting Bloom filter with succinct counters.
///
/// Every key maps to one 512-bit bucket of the presence plane and all k
/// probes stay inside it, so an operation touches a single 64-byte-aligned
/// cache line of presence bits (plus, for adds and removes, the matching
/// line of counter words). The first three probes come from disjoint bit
/// fields of the low hash half; any further probes are double-hashed with
/// the high half.
///
/// Counter handling matches
/// [`SuccinctCountingBloomFilter`](crate::SuccinctCountingBloomFilter) but
/// overflow lanes are 8 bits wide, so per-position counts up to 255 decode
/// exactly.
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SuccinctCountingBlockedBloomFilter {
    #[cfg_attr(feature = "serde", serde(rename = "d"))]
    data: Box<[Bucket]>,
    #[cfg_attr(feature = "serde", serde(rename = "s"))]
    slab: CounterSlab<8>,
    #[cfg_attr(feature = "serde", serde(rename = "l"))]
    len: u64,
    #[cfg_attr(feature = "serde", serde(rename = "k"))]
    k: u32,
}

impl SuccinctCountingBlockedBloomFilter {
    /// Creates a filter for `capacity` keys at 10 positions per key.
    pub fn new(capacity: usize) -> Result<Self, Error> {
        Self::with_bits_per_item(capacity, DEFAULT_BITS_PER_ITEM)
    }

    /// Creates a filter for `capacity` keys with a `bits_per_item` position
    /// budget per key. The probe count is `round(bits_per_item · ln 2)`,
    /// raised to the three probes a bucket always receives.
    pub fn with_bits_per_item(capacity: usize, bits_per_item: u32) -> Result<Self, Error> {
        let bit_count = (capacity as u64)
            .checked_mul(bits_per_item as u64)
            .ok_or(Error::CapacityTooLarge)?;
        let bucket_count = ((bit_count / 512) as usize).max(1);
        let array_length = bucket_count * 8;
        // The overflow header keeps slot indices in 28 bits.
        if array_length >= 1 << 26 {
            return Err(Error::CapacityTooLarge);
        }
        Ok(Self {
            data: vec![Bucket([0; 8]); bucket_count].into_boxed_slice(),
            slab: CounterSlab::new(array_length, OVERFLOW_HEADROOM),
            len: 0,
            k: probes_for(bits_per_item).max(3),
        })
    }

    #[inline]
    fn bucket_of(&self, hash: u64) -> usize {
        reduce(hash.rotate_left(32) as u32, self.data.len() as u32) as usize
    }

    #[inline]
    fn increment(&mut self, bucket: usize, group_in_bucket: u32, bit: u32) {
        let group = bucket * 8 + group_in_bucket as usize;
        self.slab
            .increment(&mut self.data[bucket].0[group_in_bucket as usize], group, bit);
    }

    #[inline]
    fn decrement(&mut self, bucket: usize, group_in_bucket: u32, bit: u32) {
        let group = bucket * 8 + group_in_bucket as usize;
        self.slab
            .decrement(&mut self.data[bucket].0[group_in_bucket as usize], group, bit);
    }

    /// Adds one key, bumping the counter at each of its k in-bucket positions.
    pub fn add<T: Hash>(&mut self, item: &T) {
        let hash = stable_hash(item);
        let bucket = self.bucket_of(hash);
        let mut a = hash as u32;
        self.increment(bucket, a & 7, (a >> 3) & 63);
        self.increment(bucket, (a >> 9) & 7, (a >> 12) & 63);
        self.increment(bucket, (a >> 18) & 7, (a >> 21) & 63);
        let b = (hash >> 32) as u32;
        for _ in 3..self.k {
            a = a.wrapping_add(b);
            self.increment(bucket, a & 7, (a >> 3) & 63);
        }
        self.len += 1;
    }

    /// Removes one previously added key. Removing a key that was never added
    /// corrupts the affected counters (not defended).
    pub fn remove<T: Hash>(&mut self, item: &T) {
        let hash = stable_hash(item);
        let bucket = self.bucket_of(hash);
        let mut a = hash as u32;
        self.decrement(bucket, a & 7, (a >> 3) & 63);
        self.decrement(bucket, (a >> 9) & 7, (a >> 12) & 63);
        self.decrement(bucket, (a >> 18) & 7, (a >> 21) & 63);
        let b = (hash >> 32) as u32;
        for _ in 3..self.k {
            a = a.wrapping_add(b);
            self.decrement(bucket, a & 7, (a >> 3) & 63);
        }
        self.len = self.len.saturating_sub(1);
    }

    /// Whether the key is possibly present. Reads one cache line of the
    /// presence plane; `false` is definite.
    pub fn contains<T: Hash>(&self, item: &T) -> bool {
        let hash = stable_hash(item);
        let bucket = &self.data[self.bucket_of(hash)];
        let mut a = hash as u32;
        let ok = (bucket.0[(a & 7) as usize] >> ((a >> 3) & 63))
            & (bucket.0[((a >> 9) & 7) as usize] >> ((a >> 12) & 63))
            & (bucket.0[((a >> 18) & 7) as usize] >> ((a >> 21) & 63));
        if ok & 1 == 0 {
            return false;
        }
        let b = (hash >> 32) as u32;
        for _ in 3..self.k {
            a = a.wrapping_add(b);
            if (bucket.0[(a & 7) as usize] >> ((a >> 3) & 63)) & 1 == 0 {
                return false;
            }
        }
        true
    }

    /// The number of times the key appears (probabilistically): the minimum
    /// of its probed counters.
    pub fn count<T: Hash>(&self, item: &T) -> u64 {
        let hash = stable_hash(item);
        let bucket = self.bucket_of(hash);
        let mut a = hash as u32;
        let mut min = u64::MAX;
        for i in 0..self.k {
            let (g, bit) = match i {
                0 => (a & 7, (a >> 3) & 63),
                1 => ((a >> 9) & 7, (a >> 12) & 63),
                2 => ((a >> 18) & 7, (a >> 21) & 63),
                _ => {
                    a = a.wrapping_add((hash >> 32) as u32);
                    (a & 7, (a >> 3) & 63)
                }
            };
            let group = bucket * 8 + g as usize;
            min = min.min(self.slab.read_count(self.data[bucket].0[g as usize], group, bit) as u64);
        }
        min
    }

    /// Number of keys currently accounted (adds minus removes).
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Resets the filter to its freshly constructed state.
    pub fn clear(&mut self) {
        self.data.fill(Bucket([0; 8]));
        self.slab.clear();
        self.len = 0;
    }

    /// Memory held by the presence buckets, the counter plane and the pool.
    pub fn size_in_bytes(&self) -> usize {
        self.data.len() * 64 + self.slab.size_in_bytes()
    }
}

impl std::fmt::Debug for SuccinctCountingBlockedBloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuccinctCountingBlockedBloomFilter")
            .field("buckets", &self.data.len())
            .field("len", &self.len)
            .field("k", &self.k)
            .finish()
    }
}
