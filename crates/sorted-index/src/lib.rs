//! A fixed-capacity collection kept sorted by a derived key.
//!
//! `SortedIndex` stores up to `CAP` items in ascending key order. The key is
//! never stored alongside the item: every ordered operation takes a
//! key-extraction closure, so the key can be computed from state the index
//! knows nothing about (for example, the size of a heap block derived from
//! its neighbours).
//!
//! # Features
//!
//! - **Fixed capacity**: Uses `ArrayVec` for inline storage, no allocation
//! - **Const construction**: Can live inside a `static`
//! - **Lower-bound search**: O(log n) binary search for the first entry whose
//!   key is at least a given key
//! - **Explicit capacity errors**: Inserting into a full index returns
//!   [`CapacityExceededError`] instead of truncating
//!
//! # Examples
//!
//! ```
//! use sorted_index::SortedIndex;
//!
//! let mut index = SortedIndex::<u32, 8>::new();
//! index.insert_sorted(30, |v| *v).unwrap();
//! index.insert_sorted(10, |v| *v).unwrap();
//! index.insert_sorted(20, |v| *v).unwrap();
//! assert_eq!(index.as_slice(), &[10, 20, 30]);
//!
//! assert_eq!(index.find_first_at_least(&15, |v| *v), 1);
//! assert_eq!(index.find_first_at_least(&31, |v| *v), 3);
//!
//! index.remove_exact(&20, |v| *v).unwrap();
//! assert_eq!(index.as_slice(), &[10, 30]);
//! ```
//!
//! # Performance
//!
//! - Search: O(log n)
//! - Insert: O(log n) search plus O(n) shift
//! - Remove: O(log n) search, O(k) scan over entries with an equal key, plus
//!   O(n) shift

#![feature(error_generic_member_access)]
#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use core::slice;

use arrayvec::ArrayVec;
use snafu::{Snafu, ensure};
use snafu_utils::Location;

/// The index already holds `capacity` entries.
#[derive(Debug, Snafu)]
#[snafu(display("sorted index is full ({capacity} entries)"))]
#[snafu(provide(ref, priority, Location => location))]
pub struct CapacityExceededError {
    capacity: usize,
    #[snafu(implicit)]
    location: Location,
}

impl CapacityExceededError {
    /// Returns the capacity of the index that rejected the insertion.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// The item to remove is not present in the index.
#[derive(Debug, Snafu)]
#[snafu(display("entry not found in sorted index"))]
#[snafu(provide(ref, priority, Location => location))]
pub struct NotFoundError {
    #[snafu(implicit)]
    location: Location,
}

/// A fixed-capacity sequence of items sorted in ascending key order.
///
/// Items with equal keys keep a stable but unspecified relative order: a new
/// item is placed before existing items with the same key.
///
/// # Examples
///
/// ```
/// use sorted_index::SortedIndex;
///
/// let mut index = SortedIndex::<(char, u32), 4>::new();
/// index.insert_sorted(('a', 5), |&(_, k)| k).unwrap();
/// index.insert_sorted(('b', 1), |&(_, k)| k).unwrap();
/// assert_eq!(index.as_slice(), &[('b', 1), ('a', 5)]);
/// ```
#[derive(Debug, Clone)]
pub struct SortedIndex<T, const CAP: usize> {
    entries: ArrayVec<T, CAP>,
}

impl<T, const CAP: usize> Default for SortedIndex<T, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const CAP: usize> SortedIndex<T, CAP> {
    /// Creates a new empty `SortedIndex`.
    ///
    /// # Examples
    ///
    /// ```
    /// use sorted_index::SortedIndex;
    ///
    /// let index = SortedIndex::<u32, 16>::new();
    /// assert!(index.is_empty());
    /// assert_eq!(index.capacity(), 16);
    /// ```
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: ArrayVec::new_const(),
        }
    }

    /// Returns the number of entries in the index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the maximum number of entries the index can hold.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        CAP
    }

    /// Returns `true` if the index holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if another insertion would exceed the capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.is_full()
    }

    /// Returns the entry at `index`, or `None` if out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)
    }

    /// Returns an iterator over the entries in ascending key order.
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.entries.iter()
    }

    /// Returns the entries in ascending key order.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        self.entries.as_slice()
    }

    /// Removes and returns the entry at `index`, shifting later entries down.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn remove(&mut self, index: usize) -> T {
        self.entries.remove(index)
    }

    /// Returns the position of the leftmost entry whose key is `>= key`.
    ///
    /// Returns `self.len()` if every entry has a smaller key. An empty index,
    /// or a `key` not larger than the first entry's key, yields `0` without
    /// probing the rest of the entries.
    ///
    /// # Examples
    ///
    /// ```
    /// use sorted_index::SortedIndex;
    ///
    /// let mut index = SortedIndex::<u32, 8>::new();
    /// for v in [8, 16, 16, 32] {
    ///     index.insert_sorted(v, |v| *v).unwrap();
    /// }
    /// assert_eq!(index.find_first_at_least(&1, |v| *v), 0);
    /// assert_eq!(index.find_first_at_least(&16, |v| *v), 1);
    /// assert_eq!(index.find_first_at_least(&17, |v| *v), 3);
    /// assert_eq!(index.find_first_at_least(&33, |v| *v), 4);
    /// ```
    pub fn find_first_at_least<K, F>(&self, key: &K, mut key_of: F) -> usize
    where
        K: Ord,
        F: FnMut(&T) -> K,
    {
        match self.entries.first() {
            None => return 0,
            Some(first) if *key <= key_of(first) => return 0,
            Some(_) => {}
        }
        self.entries.partition_point(|entry| key_of(entry) < *key)
    }

    /// Inserts `item` at its lower-bound position and returns that position.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityExceededError`] if the index already holds `CAP`
    /// entries. The index is left unchanged in that case.
    pub fn insert_sorted<K, F>(&mut self, item: T, mut key_of: F) -> Result<usize, CapacityExceededError>
    where
        K: Ord,
        F: FnMut(&T) -> K,
    {
        ensure!(!self.is_full(), CapacityExceededSnafu { capacity: CAP });
        let key = key_of(&item);
        let index = self.find_first_at_least(&key, &mut key_of);
        self.entries.insert(index, item);
        Ok(index)
    }

    /// Removes the entry equal to `item` and returns the position it held.
    ///
    /// The search starts at the lower bound of the item's key and walks
    /// forward only while entries share that key.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] if no entry with the same key compares equal
    /// to `item`.
    pub fn remove_exact<K, F>(&mut self, item: &T, mut key_of: F) -> Result<usize, NotFoundError>
    where
        T: PartialEq,
        K: Ord,
        F: FnMut(&T) -> K,
    {
        let key = key_of(item);
        let start = self.find_first_at_least(&key, &mut key_of);
        let Some(offset) = self.entries[start..]
            .iter()
            .take_while(|entry| key_of(*entry) == key)
            .position(|entry| entry == item)
        else {
            return NotFoundSnafu.fail();
        };
        let index = start + offset;
        self.entries.remove(index);
        Ok(index)
    }
}

impl<'a, T, const CAP: usize> IntoIterator for &'a SortedIndex<T, CAP> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    fn identity(v: &u32) -> u32 {
        *v
    }

    fn weight(&(_, w): &(u8, u32)) -> u32 {
        w
    }

    fn index_of<const CAP: usize>(values: &[u32]) -> SortedIndex<u32, CAP> {
        let mut index = SortedIndex::new();
        for &v in values {
            index.insert_sorted(v, identity).unwrap();
        }
        index
    }

    #[test]
    fn test_empty_index() {
        let index = SortedIndex::<u32, 4>::new();
        assert!(index.is_empty());
        assert!(!index.is_full());
        assert_eq!(index.len(), 0);
        assert_eq!(index.capacity(), 4);
        assert_eq!(index.find_first_at_least(&0, identity), 0);
        assert_eq!(index.find_first_at_least(&100, identity), 0);
    }

    #[test]
    fn test_insert_keeps_order() {
        let index = index_of::<8>(&[50, 10, 40, 20, 30]);
        assert_eq!(index.as_slice(), &[10, 20, 30, 40, 50]);
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn test_insert_returns_position() {
        let mut index = index_of::<8>(&[10, 30]);
        assert_eq!(index.insert_sorted(20, identity).unwrap(), 1);
        assert_eq!(index.insert_sorted(5, identity).unwrap(), 0);
        assert_eq!(index.insert_sorted(99, identity).unwrap(), 4);
    }

    #[test]
    fn test_lower_bound() {
        let index = index_of::<8>(&[4, 8, 8, 8, 16]);
        assert_eq!(index.find_first_at_least(&1, identity), 0);
        assert_eq!(index.find_first_at_least(&4, identity), 0);
        assert_eq!(index.find_first_at_least(&5, identity), 1);
        assert_eq!(index.find_first_at_least(&8, identity), 1);
        assert_eq!(index.find_first_at_least(&9, identity), 4);
        assert_eq!(index.find_first_at_least(&16, identity), 4);
        assert_eq!(index.find_first_at_least(&17, identity), 5);
    }

    #[test]
    fn test_lower_bound_skips_probing_for_small_keys() {
        let index = index_of::<8>(&[4, 8, 16]);
        let mut probes = 0;
        let pos = index.find_first_at_least(&3, |v| {
            probes += 1;
            *v
        });
        assert_eq!(pos, 0);
        assert_eq!(probes, 1);
    }

    #[test]
    fn test_insert_full() {
        let mut index = index_of::<3>(&[1, 2, 3]);
        assert!(index.is_full());
        let err = index.insert_sorted(0, identity).unwrap_err();
        assert_eq!(err.capacity(), 3);
        assert_eq!(index.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_equal_keys_insert_before_existing() {
        let mut index = SortedIndex::<(u8, u32), 8>::new();
        index.insert_sorted((1, 10), weight).unwrap();
        index.insert_sorted((2, 10), weight).unwrap();
        index.insert_sorted((3, 5), weight).unwrap();
        assert_eq!(index.as_slice(), &[(3, 5), (2, 10), (1, 10)]);
    }

    #[test]
    fn test_remove_exact_among_equal_keys() {
        let mut index = SortedIndex::<(u8, u32), 8>::new();
        for item in [(1, 10), (2, 10), (3, 10), (4, 20), (5, 5)] {
            index.insert_sorted(item, weight).unwrap();
        }
        let pos = index.remove_exact(&(2, 10), weight).unwrap();
        assert_eq!(pos, 2);
        assert_eq!(index.as_slice(), &[(5, 5), (3, 10), (1, 10), (4, 20)]);

        index.remove_exact(&(1, 10), weight).unwrap();
        index.remove_exact(&(3, 10), weight).unwrap();
        assert_eq!(index.as_slice(), &[(5, 5), (4, 20)]);
    }

    #[test]
    fn test_remove_exact_not_found() {
        let mut index = SortedIndex::<(u8, u32), 8>::new();
        index.insert_sorted((1, 10), weight).unwrap();
        index.insert_sorted((2, 20), weight).unwrap();

        // same key, different item
        index.remove_exact(&(9, 10), weight).unwrap_err();
        // no entry with that key at all
        index.remove_exact(&(3, 15), weight).unwrap_err();
        SortedIndex::<(u8, u32), 2>::new()
            .remove_exact(&(1, 1), weight)
            .unwrap_err();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_remove_by_position() {
        let mut index = index_of::<4>(&[1, 2, 3]);
        assert_eq!(index.remove(1), 2);
        assert_eq!(index.as_slice(), &[1, 3]);
        assert_eq!(index.get(1), Some(&3));
        assert_eq!(index.get(2), None);
    }

    #[test]
    fn test_iter() {
        let index = index_of::<4>(&[3, 1, 2]);
        let collected: Vec<u32> = index.iter().copied().collect();
        assert_eq!(collected, vec![1, 2, 3]);
        let collected: Vec<u32> = (&index).into_iter().copied().collect();
        assert_eq!(collected, vec![1, 2, 3]);
    }

    #[test]
    fn test_reinsert_after_full() {
        let mut index = index_of::<2>(&[7, 9]);
        index.insert_sorted(8, identity).unwrap_err();
        index.remove_exact(&9, identity).unwrap();
        index.insert_sorted(8, identity).unwrap();
        assert_eq!(index.as_slice(), &[7, 8]);
    }
}
