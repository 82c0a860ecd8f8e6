//! Counting Bloom filter whose membership plane is one bit per position.

use std::hash::Hash;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::slab::CounterSlab;
use crate::stable_hasher::stable_hash;
use crate::{probes_for, reduce, Error, Status, BLOCK_LEN, BLOCK_SHIFT, DEFAULT_BITS_PER_ITEM};

/// Pool words per 100 presence groups: three 4-word slots.
const OVERFLOW_HEADROOM: usize = 12;

/// Counting Bloom filter with a succinct counter plane.
///
/// Membership queries read a presence plane of one bit per position, the same
/// memory a plain (non-counting) Bloom filter would touch. The counts backing
/// deletion live in a parallel plane of one 64-bit word per 64-position
/// group, encoded as concatenated unary runs; the rare group whose counts
/// outgrow its word moves them to a slot in a small overflow pool. Per key,
/// that is `bits_per_item` presence bits plus as much again for counters,
/// against the 4x of [`CountingBloomFilter`](crate::CountingBloomFilter).
///
/// Overflow lanes are 4 bits wide. A single position counted past 15 carries
/// into its neighbor lane: membership stays exact while adds outnumber
/// removes, but decoded counts drift and removals of such positions can clear
/// presence bits early. Sizing the filter so positions stay within the lane
/// range (any sane capacity does) avoids this entirely.
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SuccinctCountingBloomFilter {
    #[cfg_attr(feature = "serde", serde(rename = "d"))]
    data: Box<[u64]>,
    #[cfg_attr(feature = "serde", serde(rename = "s"))]
    slab: CounterSlab<4>,
    #[cfg_attr(feature = "serde", serde(rename = "l"))]
    len: u64,
    #[cfg_attr(feature = "serde", serde(rename = "k"))]
    k: u32,
}

impl SuccinctCountingBloomFilter {
    /// Creates a filter for `capacity` keys at 10 positions per key
    /// (k = 7, ≈0.8% false positives when full).
    pub fn new(capacity: usize) -> Result<Self, Error> {
        Self::with_bits_per_item(capacity, DEFAULT_BITS_PER_ITEM)
    }

    /// Creates a filter for `capacity` keys with a `bits_per_item` position
    /// budget per key; the probe count is `round(bits_per_item · ln 2)`.
    pub fn with_bits_per_item(capacity: usize, bits_per_item: u32) -> Result<Self, Error> {
        let bit_count = (capacity as u64)
            .checked_mul(bits_per_item as u64)
            .ok_or(Error::CapacityTooLarge)?;
        let array_length = (bit_count.div_ceil(64) as usize).max(1);
        // Bulk adds pack a group index and a bit offset into a u32, and the
        // overflow header keeps slot indices in 28 bits.
        if array_length >= 1 << 26 {
            return Err(Error::CapacityTooLarge);
        }
        Ok(Self {
            data: vec![0; array_length].into_boxed_slice(),
            slab: CounterSlab::new(array_length, OVERFLOW_HEADROOM),
            len: 0,
            k: probes_for(bits_per_item),
        })
    }

    /// Adds one key, bumping the counter at each of its k positions.
    pub fn add<T: Hash>(&mut self, item: &T) -> Status {
        let hash = stable_hash(item);
        let mut a = (hash >> 32) as u32;
        let b = hash as u32;
        let array_length = self.data.len() as u32;
        for _ in 0..self.k {
            let group = reduce(a, array_length) as usize;
            self.slab.increment(&mut self.data[group], group, a & 63);
            a = a.wrapping_add(b);
        }
        self.len += 1;
        Status::Ok
    }

    /// Adds `keys[start..end]` in bulk.
    ///
    /// Probes are staged into blocks keyed by the high bits of the group
    /// index and flushed a block at a time, keeping each flush within one
    /// block-sized window of the planes. The resulting filter is identical
    /// to one built by adding the keys one by one.
    pub fn add_all<T: Hash>(&mut self, keys: &[T], start: usize, end: usize) -> Status {
        let array_length = self.data.len() as u32;
        let blocks = 1 + self.data.len() / BLOCK_LEN;
        let mut tmp = vec![0u32; blocks << BLOCK_SHIFT];
        let mut tmp_len = vec![0usize; blocks];
        for key in &keys[start..end] {
            let hash = stable_hash(key);
            let mut a = (hash >> 32) as u32;
            let b = hash as u32;
            for _ in 0..self.k {
                let index = reduce(a, array_length) as usize;
                let block = index >> BLOCK_SHIFT;
                let len = tmp_len[block];
                tmp[(block << BLOCK_SHIFT) + len] = ((index as u32) << 6) | (a & 63);
                tmp_len[block] = len + 1;
                if len + 1 == BLOCK_LEN {
                    self.add_block(&tmp, block, BLOCK_LEN);
                    tmp_len[block] = 0;
                }
                a = a.wrapping_add(b);
            }
        }
        for (block, &len) in tmp_len.iter().enumerate() {
            self.add_block(&tmp, block, len);
        }
        self.len += (end - start) as u64;
        Status::Ok
    }

    fn add_block(&mut self, tmp: &[u32], block: usize, len: usize) {
        for &entry in &tmp[block << BLOCK_SHIFT..][..len] {
            let group = (entry >> 6) as usize;
            self.slab.increment(&mut self.data[group], group, entry & 63);
        }
    }

    /// Removes one previously added key. Removing a key that was never added
    /// corrupts the affected counters (not defended).
    pub fn remove<T: Hash>(&mut self, item: &T) -> Status {
        let hash = stable_hash(item);
        let mut a = (hash >> 32) as u32;
        let b = hash as u32;
        let array_length = self.data.len() as u32;
        for _ in 0..self.k {
            let group = reduce(a, array_length) as usize;
            self.slab.decrement(&mut self.data[group], group, a & 63);
            a = a.wrapping_add(b);
        }
        self.len = self.len.saturating_sub(1);
        Status::Ok
    }

    /// Whether the key is possibly present. Reads only the presence plane;
    /// [`Status::NotFound`] is definite.
    pub fn contains<T: Hash>(&self, item: &T) -> Status {
        let hash = stable_hash(item);
        let mut a = (hash >> 32) as u32;
        let b = hash as u32;
        let array_length = self.data.len() as u32;
        for _ in 0..self.k {
            let group = reduce(a, array_length) as usize;
            if (self.data[group] >> (a & 63)) & 1 == 0 {
                return Status::NotFound;
            }
            a = a.wrapping_add(b);
        }
        Status::Ok
    }

    /// The number of times the key appears (probabilistically): the minimum
    /// of its probed counters, never less than the true multiplicity while
    /// every probed position stays within the overflow lane range.
    pub fn count<T: Hash>(&self, item: &T) -> u64 {
        let hash = stable_hash(item);
        let mut a = (hash >> 32) as u32;
        let b = hash as u32;
        let array_length = self.data.len() as u32;
        let mut min = u64::MAX;
        for _ in 0..self.k {
            let group = reduce(a, array_length) as usize;
            min = min.min(self.slab.read_count(self.data[group], group, a & 63) as u64);
            a = a.wrapping_add(b);
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
        self.data.fill(0);
        self.slab.clear();
        self.len = 0;
    }

    /// Memory held by the presence plane, the counter plane and the pool.
    pub fn size_in_bytes(&self) -> usize {
        self.data.len() * 8 + self.slab.size_in_bytes()
    }
}

impl std::fmt::Debug for SuccinctCountingBloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuccinctCountingBloomFilter")
            .field("data", &"[..]")
            .field("len", &self.len)
            .field("k", &self.k)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CountingBloomFilter;

    fn assert_pristine(f: &SuccinctCountingBloomFilter) {
        assert!(f.data.iter().all(|&w| w == 0));
        assert!(f.slab.counts.iter().all(|&c| c == 0));
        assert_eq!(f.slab.free_slots(), f.slab.total_slots());
    }

    #[test]
    fn add_contains_remove() {
        let mut f = SuccinctCountingBloomFilter::new(1000).unwrap();
        assert_eq!(f.k, 7);
        for i in 0..1000u64 {
            f.add(&i);
        }
        assert_eq!(f.len(), 1000);
        for i in 0..1000u64 {
            assert_eq!(f.contains(&i), Status::Ok);
        }
        for i in 0..1000u64 {
            f.remove(&i);
        }
        assert!(f.is_empty());
        assert_pristine(&f);
    }

    #[test]
    fn false_positive_rate_near_design_point() {
        let mut f = SuccinctCountingBloomFilter::new(1000).unwrap();
        for i in 0..1000u64 {
            f.add(&i);
        }
        let fp = (1_000_000..1_010_000u64)
            .filter(|i| f.contains(i) == Status::Ok)
            .count();
        // ~0.82% expected at 10 bits per item and k = 7.
        let rate = fp as f64 / 10_000.0;
        assert!(rate < 0.0164, "rate {rate}");
        assert!(rate > 0.002, "rate {rate}");
    }

    #[test]
    fn double_add_single_remove_keeps_membership() {
        // Sized for twice the keys so the double insert stays at design load.
        let mut f = SuccinctCountingBloomFilter::new(2000).unwrap();
        for i in 0..1000u64 {
            f.add(&i);
            f.add(&i);
        }
        for i in 0..1000u64 {
            f.remove(&i);
        }
        for i in 0..1000u64 {
            assert_eq!(f.contains(&i), Status::Ok, "{i}");
        }
        for i in 0..1000u64 {
            f.remove(&i);
        }
        // Only baseline false positives may remain.
        let lingering = (0..1000u64).filter(|i| f.contains(i) == Status::Ok).count();
        assert!(lingering <= 30, "{lingering} keys still test positive");
        assert_pristine(&f);
    }

    #[test]
    fn hot_key_promotes_and_drains() {
        let mut f = SuccinctCountingBloomFilter::new(1000).unwrap();
        for _ in 0..100 {
            f.add(&42u64);
        }
        assert_eq!(f.contains(&42u64), Status::Ok);
        for _ in 0..100 {
            f.remove(&42u64);
        }
        assert_eq!(f.contains(&42u64), Status::NotFound);
        assert!(f.is_empty());
        assert_pristine(&f);
    }

    #[test]
    fn count_tracks_multiplicity() {
        let mut f = SuccinctCountingBloomFilter::new(1000).unwrap();
        assert_eq!(f.count(&7u64), 0);
        for _ in 0..3 {
            f.add(&7u64);
        }
        assert!(f.count(&7u64) >= 3);
        for _ in 0..3 {
            f.remove(&7u64);
        }
        assert_eq!(f.count(&7u64), 0);
    }

    #[test]
    fn add_all_matches_individual_adds() {
        let keys: Vec<u64> = (0..10_000).map(|i| i * 0x9e37_79b9 + 1).collect();
        let mut f1 = SuccinctCountingBloomFilter::new(10_000).unwrap();
        for key in &keys {
            f1.add(key);
        }
        let mut f2 = SuccinctCountingBloomFilter::new(10_000).unwrap();
        f2.add_all(&keys, 0, keys.len());
        // Bulk insertion reorders work across groups, which can hand promoted
        // groups different pool slots; the presence plane must still match
        // bit for bit.
        assert_eq!(f1.data, f2.data);
        assert_eq!(f1.len(), f2.len());
    }

    #[test]
    fn add_all_matches_counter_plane_when_inline() {
        // Light enough that no group promotes: both planes are order
        // independent and must match exactly.
        let keys: Vec<u64> = (0..5_000).collect();
        let mut f1 = SuccinctCountingBloomFilter::new(10_000).unwrap();
        for key in &keys {
            f1.add(key);
        }
        let mut f2 = SuccinctCountingBloomFilter::new(10_000).unwrap();
        f2.add_all(&keys, 0, keys.len());
        assert_eq!(f1.data, f2.data);
        assert_eq!(f1.slab.counts, f2.slab.counts);
    }

    #[test]
    fn add_all_then_remove_all_is_pristine() {
        let keys: Vec<u64> = (0..2000).collect();
        let mut f = SuccinctCountingBloomFilter::new(2000).unwrap();
        f.add_all(&keys, 0, keys.len());
        for key in &keys {
            assert_eq!(f.contains(key), Status::Ok);
        }
        for key in keys.iter().rev() {
            f.remove(key);
        }
        assert_pristine(&f);
    }

    #[test]
    fn clear_resets() {
        let mut f = SuccinctCountingBloomFilter::new(1000).unwrap();
        for _ in 0..100 {
            f.add(&1u64); // deep enough to promote a group
        }
        f.clear();
        assert!(f.is_empty());
        assert_pristine(&f);
        assert_eq!(f.contains(&1u64), Status::NotFound);
    }

    #[test]
    fn capacity_guard() {
        assert!(SuccinctCountingBloomFilter::with_bits_per_item(usize::MAX, 10).is_err());
        assert!(SuccinctCountingBloomFilter::with_bits_per_item(1 << 30, 16).is_err());
    }

    #[test]
    fn size_in_bytes_accounts_for_all_planes() {
        let f = SuccinctCountingBloomFilter::new(1000).unwrap();
        let groups = (1000 * 10 + 63) / 64;
        assert!(f.size_in_bytes() >= groups * 8 * 2);
        // Succinct: ~2 words per group plus the small pool, well under the
        // 4-bit-counter layout.
        let plain = CountingBloomFilter::new(1000).unwrap();
        assert!(f.size_in_bytes() < plain.size_in_bytes());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_roundtrip() {
        let mut f = SuccinctCountingBloomFilter::new(1000).unwrap();
        for i in 0..500u64 {
            f.add(&i);
        }
        let ser = serde_json::to_string(&f).unwrap();
        let back: SuccinctCountingBloomFilter = serde_json::from_str(&ser).unwrap();
        assert_eq!(back.data, f.data);
        for i in 0..500u64 {
            assert_eq!(back.contains(&i), Status::Ok);
        }
    }
}
