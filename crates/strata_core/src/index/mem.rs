//! Mutable ordered index used by writable segments.

use std::collections::BTreeSet;
use std::ops::Bound;

/// Ordered set of `(key, sub_id)` entries.
///
/// Equal keys are ordered by sub-id, matching the readonly postings.
#[derive(Debug, Default, Clone)]
pub struct MemIndex {
    entries: BTreeSet<(Vec<u8>, u32)>,
    key_bytes: usize,
}

impl MemIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, returning false if it was already present.
    pub fn insert(&mut self, key: Vec<u8>, id: u32) -> bool {
        let len = key.len();
        let added = self.entries.insert((key, id));
        if added {
            self.key_bytes += len;
        }
        added
    }

    /// Removes an entry, returning false if it was absent.
    pub fn remove(&mut self, key: &[u8], id: u32) -> bool {
        let removed = self.entries.remove(&(key.to_vec(), id));
        if removed {
            self.key_bytes -= key.len();
        }
        removed
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if any entry has `key`.
    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.seek_ge(key).is_some_and(|(k, _)| k == key)
    }

    /// Returns the ids holding `key`, ascending.
    #[must_use]
    pub fn ids_of(&self, key: &[u8]) -> Vec<u32> {
        self.entries
            .range((Bound::Included((key.to_vec(), 0)), Bound::Unbounded))
            .take_while(|(k, _)| k == key)
            .map(|&(_, id)| id)
            .collect()
    }

    /// Returns the first entry at or after `key`.
    #[must_use]
    pub fn seek_ge(&self, key: &[u8]) -> Option<(&[u8], u32)> {
        self.entries
            .range((Bound::Included((key.to_vec(), 0)), Bound::Unbounded))
            .next()
            .map(|(k, id)| (k.as_slice(), *id))
    }

    /// Returns the last entry at or before `key`.
    #[must_use]
    pub fn seek_le(&self, key: &[u8]) -> Option<(&[u8], u32)> {
        self.entries
            .range((Bound::Unbounded, Bound::Included((key.to_vec(), u32::MAX))))
            .next_back()
            .map(|(k, id)| (k.as_slice(), *id))
    }

    /// Returns the entry following `(key, id)`.
    #[must_use]
    pub fn next_after(&self, key: &[u8], id: u32) -> Option<(&[u8], u32)> {
        self.entries
            .range((Bound::Excluded((key.to_vec(), id)), Bound::Unbounded))
            .next()
            .map(|(k, id)| (k.as_slice(), *id))
    }

    /// Returns the entry preceding `(key, id)`.
    #[must_use]
    pub fn prev_before(&self, key: &[u8], id: u32) -> Option<(&[u8], u32)> {
        self.entries
            .range((Bound::Unbounded, Bound::Excluded((key.to_vec(), id))))
            .next_back()
            .map(|(k, id)| (k.as_slice(), *id))
    }

    /// Returns the smallest entry.
    #[must_use]
    pub fn first(&self) -> Option<(&[u8], u32)> {
        self.entries.first().map(|(k, id)| (k.as_slice(), *id))
    }

    /// Returns the largest entry.
    #[must_use]
    pub fn last(&self) -> Option<(&[u8], u32)> {
        self.entries.last().map(|(k, id)| (k.as_slice(), *id))
    }

    /// Iterates over entries whose key starts with `prefix`.
    pub fn prefix_iter<'a>(&'a self, prefix: &'a [u8]) -> impl Iterator<Item = (&'a [u8], u32)> {
        self.entries
            .range((Bound::Included((prefix.to_vec(), 0)), Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, id)| (k.as_slice(), *id))
    }

    /// Iterates over all entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], u32)> {
        self.entries.iter().map(|(k, id)| (k.as_slice(), *id))
    }

    /// Approximate heap footprint in bytes.
    #[must_use]
    pub fn mem_size(&self) -> usize {
        self.key_bytes + self.entries.len() * (std::mem::size_of::<(Vec<u8>, u32)>() + 16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemIndex {
        let mut index = MemIndex::new();
        for (key, id) in [("b", 4), ("a", 1), ("b", 2), ("c", 0), ("ab", 3)] {
            assert!(index.insert(key.as_bytes().to_vec(), id));
        }
        index
    }

    #[test]
    fn equal_keys_ordered_by_id() {
        let index = sample();
        assert_eq!(index.ids_of(b"b"), [2, 4]);
        assert!(index.contains_key(b"ab"));
        assert!(!index.contains_key(b"bb"));
        let all: Vec<_> = index.iter().map(|(k, id)| (k.to_vec(), id)).collect();
        assert_eq!(all[0], (b"a".to_vec(), 1));
        assert_eq!(all[4], (b"c".to_vec(), 0));
    }

    #[test]
    fn seeks() {
        let index = sample();
        assert_eq!(index.seek_ge(b"aa"), Some((&b"ab"[..], 3)));
        assert_eq!(index.seek_le(b"b"), Some((&b"b"[..], 4)));
        assert_eq!(index.seek_le(b"a0"), Some((&b"a"[..], 1)));
        assert_eq!(index.seek_ge(b"d"), None);
        assert_eq!(index.seek_le(b""), None);
        assert_eq!(index.next_after(b"b", 2), Some((&b"b"[..], 4)));
        assert_eq!(index.prev_before(b"b", 2), Some((&b"ab"[..], 3)));
        assert_eq!(index.first(), Some((&b"a"[..], 1)));
        assert_eq!(index.last(), Some((&b"c"[..], 0)));
    }

    #[test]
    fn remove_and_prefix() {
        let mut index = sample();
        let before = index.mem_size();
        assert!(index.remove(b"b", 4));
        assert!(!index.remove(b"b", 4));
        assert!(index.mem_size() < before);
        let hits: Vec<u32> = index.prefix_iter(b"a").map(|(_, id)| id).collect();
        assert_eq!(hits, [1, 3]);
        assert_eq!(index.len(), 4);
    }
}
