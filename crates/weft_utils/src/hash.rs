//! Hash containers with deterministic hashers.
//!
//! Codec tables are rebuilt for every session, so there is nothing to gain from a
//! randomly seeded hasher. [`FixedHashState`] hashes through `foldhash` with a fixed
//! seed, [`NoOpHashState`] passes an already well-mixed `u64` (such as a `TypeId`)
//! straight through.

use core::hash::{BuildHasher, Hasher};

use foldhash::fast::{FixedState, FoldHasher};

// -----------------------------------------------------------------------------
// FixedHashState

const FIXED_HASH_STATE: FixedState = FixedState::with_seed(0x5EED_F00D_C0DE_CAFE);

/// The hasher produced by [`FixedHashState`].
pub type FixedHasher = FoldHasher<'static>;

/// `foldhash` with a fixed seed: the hash of a value only depends on the value.
///
/// # Examples
///
/// ```
/// use core::hash::BuildHasher;
/// use weft_utils::hash::FixedHashState;
///
/// let a = FixedHashState.hash_one("namespace");
/// let b = FixedHashState.hash_one("namespace");
/// assert_eq!(a, b);
/// ```
#[derive(Copy, Clone, Default, Debug)]
pub struct FixedHashState;

impl BuildHasher for FixedHashState {
    type Hasher = FixedHasher;

    #[inline(always)]
    fn build_hasher(&self) -> Self::Hasher {
        FIXED_HASH_STATE.build_hasher()
    }
}

// -----------------------------------------------------------------------------
// NoOpHashState

/// Hasher that keeps the last `u64` written to it.
///
/// Byte writes are folded in reverse order so that `write_u32(n)` and `write_u64(n)`
/// agree when a key only writes once.
#[derive(Copy, Clone, Default, Debug)]
pub struct NoOpHasher {
    hash: u64,
}

impl Hasher for NoOpHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.hash
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes.iter().rev() {
            self.hash = self.hash.rotate_left(8).wrapping_add(*byte as u64);
        }
    }

    #[inline]
    fn write_u64(&mut self, i: u64) {
        self.hash = i;
    }
}

/// Builds [`NoOpHasher`]s. Only use it for keys that are hashes already.
#[derive(Copy, Clone, Default, Debug)]
pub struct NoOpHashState;

impl BuildHasher for NoOpHashState {
    type Hasher = NoOpHasher;

    #[inline(always)]
    fn build_hasher(&self) -> Self::Hasher {
        NoOpHasher { hash: 0 }
    }
}

// -----------------------------------------------------------------------------
// Containers

/// A `hashbrown` map using [`FixedHashState`].
pub type HashMap<K, V> = hashbrown::HashMap<K, V, FixedHashState>;

/// A `hashbrown` set using [`FixedHashState`].
pub type HashSet<T> = hashbrown::HashSet<T, FixedHashState>;

// -----------------------------------------------------------------------------
// Re-export crates

pub use foldhash;
pub use hashbrown;

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use core::hash::{BuildHasher, Hash, Hasher};

    use super::{FixedHashState, HashMap, NoOpHashState};

    #[test]
    fn noop_passes_integers_through() {
        let mut hasher = NoOpHashState.build_hasher();
        1234_u64.hash(&mut hasher);
        assert_eq!(hasher.finish(), 1234);

        let mut hasher = NoOpHashState.build_hasher();
        hasher.write_u32(1234);
        assert_eq!(hasher.finish(), 1234);
    }

    #[test]
    fn fixed_state_is_stable() {
        assert_eq!(FixedHashState.hash_one(42_u32), FixedHashState.hash_one(42_u32));

        let mut map = HashMap::default();
        map.insert("ns", 1);
        assert_eq!(map.get("ns"), Some(&1));
    }
}
