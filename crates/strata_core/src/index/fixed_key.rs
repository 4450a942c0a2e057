//! Index over fixed-length keys.
//!
//! File layout:
//!
//! ```text
//! +----------------------+----------------------------+----------+
//! | header (16 bytes)    | uniq * fixlen key bytes,   | postings |
//! | rows, uniq, fixlen,  | sorted, padded to 8 bytes  |          |
//! | version (all u32)    |                            |          |
//! +----------------------+----------------------------+----------+
//! ```

use super::{Postings, SortedIndex};
use crate::buf::{ByteView, Reader};
use crate::error::{CoreError, CoreResult};
use std::path::Path;
use strata_storage::MappedFile;

const HEADER_LEN: usize = 16;
const FIXED_KEY_VERSION: u32 = 1;

/// Sorted array of distinct fixed-length keys with postings.
#[derive(Debug, Clone)]
pub struct FixedLenKeyIndex {
    fixlen: usize,
    uniq: usize,
    keys: ByteView,
    postings: Postings,
}

impl FixedLenKeyIndex {
    /// Serializes `(key, id)` pairs sorted by key then id.
    ///
    /// # Panics
    ///
    /// Panics if a key is not `fixlen` bytes long or the pairs are unsorted.
    #[must_use]
    pub fn encode(fixlen: usize, entries: &[(Vec<u8>, u32)]) -> Vec<u8> {
        let (keys, postings) = Postings::build(entries);
        let mut out = Vec::with_capacity(HEADER_LEN + keys.len() * fixlen + 64);
        out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        out.extend_from_slice(&(keys.len() as u32).to_le_bytes());
        out.extend_from_slice(&(fixlen as u32).to_le_bytes());
        out.extend_from_slice(&FIXED_KEY_VERSION.to_le_bytes());
        for key in &keys {
            assert_eq!(key.len(), fixlen, "index key width mismatch");
            out.extend_from_slice(key);
        }
        out.resize(out.len().next_multiple_of(8), 0);
        postings.write_to(&mut out);
        out
    }

    /// Writes the index file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_file(path: &Path, fixlen: usize, entries: &[(Vec<u8>, u32)]) -> CoreResult<()> {
        std::fs::write(path, Self::encode(fixlen, entries))?;
        Ok(())
    }

    /// Loads an index from its serialized bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the header or sections are malformed.
    pub fn from_view(view: ByteView) -> CoreResult<Self> {
        let mut r = Reader::new(&view, "fixed-length index header");
        let rows = r.u32()? as usize;
        let uniq = r.u32()? as usize;
        let fixlen = r.u32()? as usize;
        let version = r.u32()?;
        if version != FIXED_KEY_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported fixed-length index version: {version}"
            )));
        }
        if fixlen == 0 || uniq > rows {
            return Err(CoreError::segment_corruption(format!(
                "fixed-length index has {uniq} keys of {fixlen} bytes for {rows} rows"
            )));
        }
        let keys_end = HEADER_LEN + uniq * fixlen;
        let postings_at = keys_end.next_multiple_of(8);
        if postings_at > view.len() {
            return Err(CoreError::segment_corruption("fixed-length index keys truncated"));
        }
        let keys = view.slice(HEADER_LEN..keys_end)?;
        let (postings, _) = Postings::from_view(&view.slice(postings_at..view.len())?, uniq, rows)?;
        Ok(Self {
            fixlen,
            uniq,
            keys,
            postings,
        })
    }

    /// Maps and loads an index file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be mapped or is malformed.
    pub fn open(path: &Path, populate: bool) -> CoreResult<Self> {
        let file = MappedFile::open(path, populate)?;
        Self::from_view(ByteView::from(file.bytes()))
    }

    /// Returns the key width.
    #[must_use]
    pub fn fixlen(&self) -> usize {
        self.fixlen
    }

    fn key(&self, ord: usize) -> &[u8] {
        &self.keys[ord * self.fixlen..(ord + 1) * self.fixlen]
    }
}

impl SortedIndex for FixedLenKeyIndex {
    fn num_keys(&self) -> usize {
        self.uniq
    }

    fn key_at(&self, ord: usize, out: &mut Vec<u8>) {
        out.extend_from_slice(self.key(ord));
    }

    fn lower_bound(&self, key: &[u8]) -> usize {
        let (mut lo, mut hi) = (0usize, self.uniq);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key(mid) < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    fn find(&self, key: &[u8]) -> Option<usize> {
        let ord = self.lower_bound(key);
        (ord < self.uniq && self.key(ord) == key).then_some(ord)
    }

    fn postings(&self) -> &Postings {
        &self.postings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entries(pairs: &[(u16, u32)]) -> Vec<(Vec<u8>, u32)> {
        let mut out: Vec<_> = pairs
            .iter()
            .map(|&(k, id)| (k.to_be_bytes().to_vec(), id))
            .collect();
        out.sort();
        out
    }

    #[test]
    fn lookup() {
        let data = entries(&[(30, 0), (10, 1), (20, 2), (10, 3), (40, 4)]);
        let index = FixedLenKeyIndex::from_view(ByteView::owned(FixedLenKeyIndex::encode(2, &data)))
            .unwrap();
        assert_eq!(index.num_keys(), 4);
        assert_eq!(index.num_rows(), 5);
        assert_eq!(index.search_exact(&10u16.to_be_bytes()), [1, 3]);
        assert_eq!(index.search_exact(&15u16.to_be_bytes()), Vec::<u32>::new());
        assert_eq!(index.lower_bound(&15u16.to_be_bytes()), 1);
        assert_eq!(index.upper_bound(&20u16.to_be_bytes()), 2);
        assert_eq!(index.lower_bound(&50u16.to_be_bytes()), 4);

        let mut key = Vec::new();
        index.key_at(3, &mut key);
        assert_eq!(key, 40u16.to_be_bytes());
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx0.fkey");
        FixedLenKeyIndex::write_file(&path, 2, &entries(&[(7, 0), (5, 1)])).unwrap();
        let index = FixedLenKeyIndex::open(&path, false).unwrap();
        assert_eq!(index.fixlen(), 2);
        assert_eq!(index.find(&5u16.to_be_bytes()), Some(0));
        assert_eq!(index.search_exact(&7u16.to_be_bytes()), [0]);
    }

    #[test]
    fn empty_index() {
        let index =
            FixedLenKeyIndex::from_view(ByteView::owned(FixedLenKeyIndex::encode(4, &[]))).unwrap();
        assert_eq!(index.num_keys(), 0);
        assert_eq!(index.lower_bound(b"abcd"), 0);
        assert_eq!(index.find(b"abcd"), None);
    }

    #[test]
    fn bad_version() {
        let mut data = FixedLenKeyIndex::encode(2, &entries(&[(1, 0)]));
        data[12] = 9;
        assert!(matches!(
            FixedLenKeyIndex::from_view(ByteView::owned(data)),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
