//! Platform-stable hashing for filter keys.
//!
//! `Hash` implementations feed `usize`/`isize` values whose width varies by
//! platform. Filters built from the same keys must probe the same positions
//! everywhere, so both are widened to 64 bits before reaching xxh3.

use std::hash::{Hash, Hasher};
use xxhash_rust::xxh3::Xxh3;

#[derive(Default)]
pub(crate) struct StableHasher(Xxh3);

impl StableHasher {
    #[inline]
    pub fn new() -> Self {
        Self(Xxh3::new())
    }
}

impl Hasher for StableHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.0.digest()
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    #[inline]
    fn write_usize(&mut self, i: usize) {
        self.0.update(&(i as u64).to_le_bytes());
    }

    #[inline]
    fn write_isize(&mut self, i: isize) {
        self.0.update(&(i as i64).to_le_bytes());
    }
}

/// The 64-bit probe seed for `item`; every filter derives its probe sequence
/// from the two 32-bit halves of this value.
#[inline]
pub(crate) fn stable_hash<T: Hash>(item: &T) -> u64 {
    let mut hasher = StableHasher::new();
    item.hash(&mut hasher);
    hasher.finish()
}
