//! Module implement hashing helpers for [AssocMulti][crate::assoc::AssocMulti]
//! callers.
//!
//! Index front-ends supply their own hash functions to the table, and most
//! of them only need a stable 64-bit digest over a key or an element's
//! identity. [city_hash] gives them one.

use std::hash::{BuildHasher, Hash, Hasher};

/// Type uses google's city hash to convert [Hash]able key into ``u64``.
/// Refer [cityhash_rs] for details.
///
/// Every call to `write` folds the new bytes into the running digest, so
/// composite keys hash all of their fields.
#[derive(Clone, Copy, Default)]
pub struct CityHasher {
    digest: u128,
}

impl CityHasher {
    pub fn new() -> CityHasher {
        CityHasher::default()
    }
}

impl BuildHasher for CityHasher {
    type Hasher = Self;

    #[inline]
    fn build_hasher(&self) -> Self {
        *self
    }
}

impl Hasher for CityHasher {
    fn finish(&self) -> u64 {
        ((self.digest >> 64) as u64) ^ ((self.digest & 0xFFFFFFFFFFFFFFFF) as u64)
    }

    fn write(&mut self, bytes: &[u8]) {
        let digest = cityhash_rs::cityhash_110_128(bytes);
        self.digest = match self.digest {
            0 => digest,
            old => old.rotate_left(5) ^ digest,
        };
    }
}

/// Hash `val` into a 64-bit digest using [CityHasher].
pub fn city_hash<T>(val: &T) -> u64
where
    T: Hash + ?Sized,
{
    let mut hasher = CityHasher::new();
    val.hash(&mut hasher);
    hasher.finish()
}
