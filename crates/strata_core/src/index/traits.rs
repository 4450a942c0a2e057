//! Shared behaviour of readonly indexes.

use super::Postings;

/// An immutable index whose distinct keys are numbered `0..num_keys` in
/// byte order, with postings mapping each key to its row ids.
pub trait SortedIndex: Send + Sync {
    /// Returns the number of distinct keys.
    fn num_keys(&self) -> usize;

    /// Appends the key with ordinal `ord` to `out`.
    ///
    /// # Panics
    ///
    /// Panics if `ord` is out of range.
    fn key_at(&self, ord: usize, out: &mut Vec<u8>);

    /// Returns the ordinal of the first key `>= key`, or `num_keys()`.
    fn lower_bound(&self, key: &[u8]) -> usize;

    /// Returns the ordinal of `key` if present.
    fn find(&self, key: &[u8]) -> Option<usize>;

    /// Returns the postings.
    fn postings(&self) -> &Postings;

    /// Returns the number of indexed rows.
    fn num_rows(&self) -> usize {
        self.postings().num_rows()
    }

    /// Returns the ordinal of the first key `> key`, or `num_keys()`.
    fn upper_bound(&self, key: &[u8]) -> usize {
        let lb = self.lower_bound(key);
        if lb < self.num_keys() {
            let mut found = Vec::new();
            self.key_at(lb, &mut found);
            if found == key {
                return lb + 1;
            }
        }
        lb
    }

    /// Returns the row ids holding `key`, ascending.
    fn search_exact(&self, key: &[u8]) -> Vec<u32> {
        self.find(key)
            .map(|ord| self.postings().rows_of(ord).collect())
            .unwrap_or_default()
    }
}
