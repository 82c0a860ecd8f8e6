//! Counting Bloom filter with packed 4-bit counters.

use std::hash::Hash;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::stable_hasher::stable_hash;
use crate::{probes_for, reduce, Error, Status, BLOCK_LEN, BLOCK_SHIFT, DEFAULT_BITS_PER_ITEM};

/// Counting Bloom filter storing sixteen 4-bit counters per 64-bit word.
///
/// The textbook counting filter: every probe addresses one counter, `add`
/// increments all k of a key's counters, `remove` decrements them and
/// [`contains`](Self::contains) reports [`Status::NotFound`] as soon as any
/// probed counter is zero. Spends four times the memory of the succinct
/// variants but needs no side structures.
///
/// Counters silently wrap past 15 into their neighbor; keys hot enough to
/// push a counter that far also corrupt the decoded counts of neighboring
/// positions until they drain. Add/remove pairs always cancel exactly.
#[derive(Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CountingBloomFilter {
    #[cfg_attr(feature = "serde", serde(rename = "d"))]
    data: Box<[u64]>,
    #[cfg_attr(feature = "serde", serde(rename = "l"))]
    len: u64,
    #[cfg_attr(feature = "serde", serde(rename = "k"))]
    k: u32,
}

impl CountingBloomFilter {
    /// Creates a filter for `capacity` keys at 10 positions per key
    /// (k = 7, ≈0.8% false positives when full).
    pub fn new(capacity: usize) -> Result<Self, Error> {
        Self::with_bits_per_item(capacity, DEFAULT_BITS_PER_ITEM)
    }

    /// Creates a filter for `capacity` keys with a `bits_per_item` position
    /// budget per key; the probe count is `round(bits_per_item · ln 2)`.
    pub fn with_bits_per_item(capacity: usize, bits_per_item: u32) -> Result<Self, Error> {
        let bit_count = (capacity as u64)
            .checked_mul(4 * bits_per_item as u64)
            .ok_or(Error::CapacityTooLarge)?;
        let array_length = (bit_count.div_ceil(64) as usize).max(1);
        // Bulk adds pack a group index and a counter offset into a u32.
        if array_length >= 1 << 28 {
            return Err(Error::CapacityTooLarge);
        }
        Ok(Self {
            data: vec![0; array_length].into_boxed_slice(),
            len: 0,
            k: probes_for(bits_per_item),
        })
    }

    /// Adds one key, incrementing the counter at each of its k positions.
    pub fn add<T: Hash>(&mut self, item: &T) -> Status {
        let hash = stable_hash(item);
        let mut a = (hash >> 32) as u32;
        let b = hash as u32;
        let array_length = self.data.len() as u32;
        for _ in 0..self.k {
            let index = reduce(a, array_length) as usize;
            self.data[index] = self.data[index].wrapping_add(1 << ((a << 2) & 63));
            a = a.wrapping_add(b);
        }
        self.len += 1;
        Status::Ok
    }

    /// Adds `keys[start..end]` in bulk.
    ///
    /// Probe writes are staged into blocks keyed by the high bits of the
    /// group index and flushed a block at a time, which keeps the writes of
    /// each flush within one block-sized window of the array. The resulting
    /// filter is identical to one built by adding the keys one by one.
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
                tmp[(block << BLOCK_SHIFT) + len] = ((index as u32) << 4) | (a & 0xf);
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
            let index = (entry >> 4) as usize;
            self.data[index] = self.data[index].wrapping_add(1 << ((entry << 2) & 63));
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
            let index = reduce(a, array_length) as usize;
            self.data[index] = self.data[index].wrapping_sub(1 << ((a << 2) & 63));
            a = a.wrapping_add(b);
        }
        self.len = self.len.saturating_sub(1);
        Status::Ok
    }

    /// Whether the key is possibly present. [`Status::NotFound`] is definite.
    pub fn contains<T: Hash>(&self, item: &T) -> Status {
        let hash = stable_hash(item);
        let mut a = (hash >> 32) as u32;
        let b = hash as u32;
        let array_length = self.data.len() as u32;
        for _ in 0..self.k {
            let index = reduce(a, array_length) as usize;
            if (self.data[index] >> ((a << 2) & 63)) & 0xf == 0 {
                return Status::NotFound;
            }
            a = a.wrapping_add(b);
        }
        Status::Ok
    }

    /// The number of times the key appears (probabilistically): the minimum
    /// of its probed counters, never less than the true multiplicity while
    /// every probed counter stays within the 4-bit range.
    pub fn count<T: Hash>(&self, item: &T) -> u64 {
        let hash = stable_hash(item);
        let mut a = (hash >> 32) as u32;
        let b = hash as u32;
        let array_length = self.data.len() as u32;
        let mut min = u64::MAX;
        for _ in 0..self.k {
            let index = reduce(a, array_length) as usize;
            min = min.min((self.data[index] >> ((a << 2) & 63)) & 0xf);
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
        self.len = 0;
    }

    /// Memory held by the counter array.
    pub fn size_in_bytes(&self) -> usize {
        self.data.len() * 8
    }
}

impl std::fmt::Debug for CountingBloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountingBloomFilter")
            .field("data", &"[..]")
            .field("len", &self.len)
            .field("k", &self.k)
            .finish()
    }
}
