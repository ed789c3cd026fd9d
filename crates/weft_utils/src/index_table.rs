use core::borrow::Borrow;
use core::hash::Hash;

use crate::hash::HashMap;

// -----------------------------------------------------------------------------
// IndexTable

/// Assigns sequential `u32` indices to keys in the order they are first seen.
///
/// Both halves of a codec session keep one of these per kind of back-reference
/// (objects, types, shared strings): the writer looks a key up and emits its index,
/// the reader pushes decoded entries in the same order and gets the same indices.
///
/// # Examples
///
/// ```
/// use weft_utils::IndexTable;
///
/// let mut table = IndexTable::new();
/// assert_eq!(table.insert("a"), (0, true));
/// assert_eq!(table.insert("b"), (1, true));
/// assert_eq!(table.insert("a"), (0, false));
/// assert_eq!(table.get("b"), Some(1));
/// ```
#[derive(Debug, Clone)]
pub struct IndexTable<K> {
    map: HashMap<K, u32>,
}

impl<K: Eq + Hash> IndexTable<K> {
    /// Creates an empty table.
    #[inline]
    pub fn new() -> Self {
        Self {
            map: HashMap::default(),
        }
    }

    /// Returns the index of `key`, if it was inserted before.
    #[inline]
    pub fn get<Q>(&self, key: &Q) -> Option<u32>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(key).copied()
    }

    /// Returns the index of `key` and whether it was assigned by this call.
    pub fn insert(&mut self, key: K) -> (u32, bool) {
        let next = self.map.len() as u32;
        match self.map.entry(key) {
            hashbrown::hash_map::Entry::Occupied(entry) => (*entry.get(), false),
            hashbrown::hash_map::Entry::Vacant(entry) => {
                entry.insert(next);
                (next, true)
            }
        }
    }

    /// Number of indices handed out.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Forgets every key.
    #[inline]
    pub fn clear(&mut self) {
        self.map.clear();
    }
}

impl<K: Eq + Hash> Default for IndexTable<K> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------
// Tests
