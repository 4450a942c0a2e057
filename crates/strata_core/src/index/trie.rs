//! Ordered string index backed by a finite-state transducer.
//!
//! Each distinct key maps to its ordinal, so the transducer doubles as a
//! rank/select structure: lookups return ordinals and ordinals can be
//! walked back to keys.
//!
//! File layout: a 24 byte header (`"STRI"`, version, rows, uniq, fst length),
//! the fst bytes padded to 8, then the postings.

use super::{Postings, SortedIndex};
use crate::buf::{ByteView, Reader};
use crate::error::{CoreError, CoreResult};
use fst::{IntoStreamer, Map, MapBuilder, Streamer};
use std::path::Path;
use strata_storage::MappedFile;

const TRIE_MAGIC: [u8; 4] = *b"STRI";
const TRIE_VERSION: u16 = 1;
const HEADER_LEN: usize = 24;

/// Succinct ordered index over variable-length keys.
pub struct TrieIndex {
    map: Map<ByteView>,
    postings: Postings,
}

impl std::fmt::Debug for TrieIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrieIndex")
            .field("keys", &self.map.len())
            .field("rows", &self.postings.num_rows())
            .finish()
    }
}

impl TrieIndex {
    /// Serializes `(key, id)` pairs sorted by key then id.
    ///
    /// # Errors
    ///
    /// Returns an error if the transducer cannot be built.
    pub fn encode(entries: &[(Vec<u8>, u32)]) -> CoreResult<Vec<u8>> {
        let (keys, postings) = Postings::build(entries);
        let mut builder = MapBuilder::memory();
        for (ord, key) in keys.iter().enumerate() {
            builder.insert(key, ord as u64)?;
        }
        let fst_bytes = builder.into_inner()?;

        let mut out = Vec::with_capacity(HEADER_LEN + fst_bytes.len() + 64);
        out.extend_from_slice(&TRIE_MAGIC);
        out.extend_from_slice(&TRIE_VERSION.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        out.extend_from_slice(&(keys.len() as u32).to_le_bytes());
        out.extend_from_slice(&(fst_bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(&fst_bytes);
        out.resize(out.len().next_multiple_of(8), 0);
        postings.write_to(&mut out);
        Ok(out)
    }

    /// Writes the index file.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be built or written.
    pub fn write_file(path: &Path, entries: &[(Vec<u8>, u32)]) -> CoreResult<()> {
        std::fs::write(path, Self::encode(entries)?)?;
        Ok(())
    }

    /// Loads an index from its serialized bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the header, transducer or postings are malformed.
    pub fn from_view(view: ByteView) -> CoreResult<Self> {
        let mut r = Reader::new(&view, "trie index header");
        r.magic_version(&TRIE_MAGIC, TRIE_VERSION)?;
        r.u16()?;
        let rows = r.u32()? as usize;
        let uniq = r.u32()? as usize;
        let fst_len = r.u64()? as usize;
        let fst_end = HEADER_LEN
            .checked_add(fst_len)
            .filter(|&end| end <= view.len())
            .ok_or_else(|| CoreError::segment_corruption("trie index truncated"))?;
        let map = Map::new(view.slice(HEADER_LEN..fst_end)?)?;
        if map.len() != uniq {
            return Err(CoreError::segment_corruption(format!(
                "trie index holds {} keys, header says {uniq}",
                map.len()
            )));
        }
        let postings_at = fst_end.next_multiple_of(8).min(view.len());
        let (postings, _) = Postings::from_view(&view.slice(postings_at..view.len())?, uniq, rows)?;
        Ok(Self { map, postings })
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

    /// Returns the size of the transducer in bytes.
    #[must_use]
    pub fn fst_size(&self) -> usize {
        self.map.as_fst().size()
    }
}

impl SortedIndex for TrieIndex {
    fn num_keys(&self) -> usize {
        self.map.len()
    }

    fn key_at(&self, ord: usize, out: &mut Vec<u8>) {
        assert!(ord < self.map.len(), "key ordinal {ord} out of range");
        let fst = self.map.as_fst();
        let target = ord as u64;
        let mut node = fst.root();
        let mut acc = 0u64;
        loop {
            if node.is_final() && acc + node.final_output().value() == target {
                return;
            }
            // Outputs are minimal ordinals of each subtree, so the owning
            // subtree is the last one starting at or before the target.
            let next = node
                .transitions()
                .take_while(|t| acc + t.out.value() <= target)
                .last();
            let Some(t) = next else {
                panic!("key ordinal {ord} not reachable in trie index");
            };
            out.push(t.inp);
            acc += t.out.value();
            node = fst.node(t.addr);
        }
    }

    fn lower_bound(&self, key: &[u8]) -> usize {
        let mut stream = self.map.range().ge(key).into_stream();
        match stream.next() {
            Some((_, ord)) => ord as usize,
            None => self.map.len(),
        }
    }

    fn find(&self, key: &[u8]) -> Option<usize> {
        self.map.get(key).map(|ord| ord as usize)
    }

    fn postings(&self) -> &Postings {
        &self.postings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn build(words: &[&str]) -> TrieIndex {
        let mut entries: Vec<(Vec<u8>, u32)> = words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.as_bytes().to_vec(), i as u32))
            .collect();
        entries.sort();
        TrieIndex::from_view(ByteView::owned(TrieIndex::encode(&entries).unwrap())).unwrap()
    }

    #[test]
    fn ordinals_and_keys() {
        let index = build(&["pear", "apple", "apricot", "banana", "apple", "b"]);
        assert_eq!(index.num_keys(), 5);
        let keys: Vec<Vec<u8>> = (0..index.num_keys())
            .map(|ord| {
                let mut key = Vec::new();
                index.key_at(ord, &mut key);
                key
            })
            .collect();
        assert_eq!(keys, [&b"apple"[..], b"apricot", b"b", b"banana", b"pear"]);
        assert_eq!(index.search_exact(b"apple"), [1, 4]);
        assert_eq!(index.lower_bound(b"apq"), 1);
        assert_eq!(index.lower_bound(b"c"), 4);
        assert_eq!(index.lower_bound(b"z"), 5);
        assert_eq!(index.upper_bound(b"b"), 3);
        assert_eq!(index.find(b"ban"), None);
    }

    #[test]
    fn empty_key_is_first() {
        let index = build(&["", "a"]);
        let mut key = Vec::new();
        index.key_at(0, &mut key);
        assert!(key.is_empty());
        index.key_at(1, &mut key);
        assert_eq!(key, b"a");
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx0.trie");
        TrieIndex::write_file(&path, &[(b"x".to_vec(), 3), (b"y".to_vec(), 1)]).unwrap();
        let index = TrieIndex::open(&path, false).unwrap();
        assert_eq!(index.search_exact(b"y"), [1]);
        assert!(index.fst_size() > 0);
    }

    #[test]
    fn corrupt_magic() {
        let mut data = TrieIndex::encode(&[(b"x".to_vec(), 0)]).unwrap();
        data[0] = b'X';
        assert!(TrieIndex::from_view(ByteView::owned(data)).is_err());
    }

    proptest! {
        #[test]
        fn key_at_inverts_find(words in proptest::collection::btree_set("[a-c]{0,6}", 1..40)) {
            let words: Vec<&str> = words.iter().map(String::as_str).collect();
            let index = build(&words);
            for (ord, word) in words.iter().enumerate() {
                let mut key = Vec::new();
                index.key_at(ord, &mut key);
                prop_assert_eq!(&key, word.as_bytes());
                prop_assert_eq!(index.find(word.as_bytes()), Some(ord));
            }
        }
    }
}
