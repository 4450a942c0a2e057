//! Ordered secondary indexes.
//!
//! Writable segments keep each index as a [`MemIndex`]. Compaction bulk
//! builds a [`ReadonlyIndex`], choosing the format by key shape:
//!
//! - [`SeqNumIndex`]: one integer field whose keys run `min, min + 1, ...`
//!   in row order, stored as a bare header
//! - [`IntKeyIndex`]: any other single integer field, stored as deltas
//! - [`FixedLenKeyIndex`]: every key field has a fixed width
//! - [`TrieIndex`]: anything else, typically string keys
//!
//! All readonly formats number distinct keys by byte order and share one
//! [`Postings`] layout mapping key ordinals to row ids.

mod fixed_key;
mod int_key;
mod matcher;
mod mem;
mod postings;
mod seq_num;
mod traits;
mod trie;

pub use fixed_key::FixedLenKeyIndex;
pub use int_key::{IntKeyIndex, IntKeyShape};
pub use matcher::{KeyMatcher, MatchBudget};
pub use mem::MemIndex;
pub use postings::Postings;
pub use seq_num::SeqNumIndex;
pub use traits::SortedIndex;
pub use trie::TrieIndex;

use crate::error::{CoreError, CoreResult};
use crate::schema::IndexSchema;
use std::path::{Path, PathBuf};

/// A bulk-built index of a readonly segment.
#[derive(Debug)]
pub enum ReadonlyIndex {
    /// Dense run of integer keys.
    SeqNum(SeqNumIndex),
    /// Single integer field.
    IntKey(IntKeyIndex),
    /// Fixed-length keys.
    FixedLen(FixedLenKeyIndex),
    /// Variable-length keys.
    Trie(TrieIndex),
}

impl ReadonlyIndex {
    /// Returns the file holding index `i` of a segment directory.
    ///
    /// Integer indexes have two candidate files; this returns the general
    /// one.
    #[must_use]
    pub fn path(dir: &Path, i: usize, schema: &IndexSchema) -> PathBuf {
        if schema.int_key_shape().is_some() {
            dir.join(format!("idx{i}.ikey"))
        } else if schema.fixed_key_len().is_some() {
            dir.join(format!("idx{i}.fkey"))
        } else {
            dir.join(format!("idx{i}.trie"))
        }
    }

    fn seq_num_path(dir: &Path, i: usize) -> PathBuf {
        dir.join(format!("idx{i}.seq"))
    }

    /// Sorts `entries` by key then id and writes index `i`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if a unique index would hold a key
    /// twice, or an error if the file cannot be written.
    pub fn write_file(
        dir: &Path,
        i: usize,
        schema: &IndexSchema,
        mut entries: Vec<(Vec<u8>, u32)>,
    ) -> CoreResult<()> {
        entries.sort_unstable();
        if schema.unique {
            if let Some(pair) = entries.windows(2).find(|w| w[0].0 == w[1].0) {
                return Err(CoreError::DuplicateKey {
                    index: schema.name.clone(),
                    key: pair[0].0.clone(),
                });
            }
        }
        if let Some(shape) = schema.int_key_shape() {
            if let Some(min) = SeqNumIndex::detect(shape, &entries) {
                let path = Self::seq_num_path(dir, i);
                return SeqNumIndex::write_file(&path, shape, min, entries.len());
            }
            return IntKeyIndex::write_file(&Self::path(dir, i, schema), shape, &entries);
        }
        let path = Self::path(dir, i, schema);
        match schema.fixed_key_len() {
            Some(fixlen) => FixedLenKeyIndex::write_file(&path, fixlen, &entries),
            None => TrieIndex::write_file(&path, &entries),
        }
    }

    /// Opens index `i` of a segment directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    pub fn open(dir: &Path, i: usize, schema: &IndexSchema, populate: bool) -> CoreResult<Self> {
        if let Some(shape) = schema.int_key_shape() {
            let seq_path = Self::seq_num_path(dir, i);
            let (found, index) = if seq_path.exists() {
                let index = SeqNumIndex::open(&seq_path, populate)?;
                (index.shape(), Self::SeqNum(index))
            } else {
                let index = IntKeyIndex::open(&Self::path(dir, i, schema), populate)?;
                (index.shape(), Self::IntKey(index))
            };
            if found != shape {
                return Err(CoreError::segment_corruption(format!(
                    "index '{}' has key shape {found:?}, schema expects {shape:?}",
                    schema.name
                )));
            }
            return Ok(index);
        }
        let path = Self::path(dir, i, schema);
        match schema.fixed_key_len() {
            Some(fixlen) => {
                let index = FixedLenKeyIndex::open(&path, populate)?;
                if index.fixlen() != fixlen {
                    return Err(CoreError::segment_corruption(format!(
                        "index '{}' has {} byte keys, schema expects {fixlen}",
                        schema.name,
                        index.fixlen()
                    )));
                }
                Ok(Self::FixedLen(index))
            }
            None => Ok(Self::Trie(TrieIndex::open(&path, populate)?)),
        }
    }

    fn inner(&self) -> &dyn SortedIndex {
        match self {
            Self::SeqNum(index) => index,
            Self::IntKey(index) => index,
            Self::FixedLen(index) => index,
            Self::Trie(index) => index,
        }
    }
}

impl SortedIndex for ReadonlyIndex {
    fn num_keys(&self) -> usize {
        self.inner().num_keys()
    }

    fn key_at(&self, ord: usize, out: &mut Vec<u8>) {
        self.inner().key_at(ord, out);
    }

    fn lower_bound(&self, key: &[u8]) -> usize {
        self.inner().lower_bound(key)
    }

    fn find(&self, key: &[u8]) -> Option<usize> {
        self.inner().find(key)
    }

    fn postings(&self) -> &Postings {
        self.inner().postings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{TableSchema, TableSchemaDef};
    use strata_codec::{ColumnMeta, ColumnType, Value};
    use tempfile::tempdir;

    fn schema() -> TableSchema {
        TableSchemaDef::new(vec![
            ColumnMeta::new("id", ColumnType::Sint64),
            ColumnMeta::new("name", ColumnType::StrZero),
        ])
        .index("pk", &["id"], true)
        .index("by_name", &["name"], false)
        .build()
        .unwrap()
    }

    #[test]
    fn format_follows_key_shape() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let pk = schema.index(0);
        let by_name = schema.index(1);
        let ids: Vec<_> = [5i64, -3, 9]
            .iter()
            .enumerate()
            .map(|(row, &v)| (pk.encode_key(&[Value::Int(v)]).unwrap(), row as u32))
            .collect();
        let names: Vec<_> = ["bo", "al", "bo"]
            .iter()
            .enumerate()
            .map(|(row, &v)| (by_name.encode_key(&[Value::from(v)]).unwrap(), row as u32))
            .collect();
        ReadonlyIndex::write_file(dir.path(), 0, pk, ids).unwrap();
        ReadonlyIndex::write_file(dir.path(), 1, by_name, names).unwrap();
        assert!(dir.path().join("idx0.ikey").exists());
        assert!(dir.path().join("idx1.trie").exists());

        let pk_index = ReadonlyIndex::open(dir.path(), 0, pk, false).unwrap();
        assert!(matches!(pk_index, ReadonlyIndex::IntKey(_)));
        let mut first = Vec::new();
        pk_index.key_at(0, &mut first);
        assert_eq!(first, pk.encode_key(&[Value::Int(-3)]).unwrap());

        let name_index = ReadonlyIndex::open(dir.path(), 1, by_name, false).unwrap();
        let bo = by_name.encode_key(&[Value::from("bo")]).unwrap();
        assert_eq!(name_index.search_exact(&bo), [0, 2]);
    }

    #[test]
    fn dense_integer_keys_store_no_key_data() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let pk = schema.index(0);
        let ids: Vec<_> = (0..4)
            .map(|row| (pk.encode_key(&[Value::Int(row + 10)]).unwrap(), row as u32))
            .collect();
        ReadonlyIndex::write_file(dir.path(), 0, pk, ids).unwrap();
        assert!(dir.path().join("idx0.seq").exists());
        assert!(!dir.path().join("idx0.ikey").exists());

        let index = ReadonlyIndex::open(dir.path(), 0, pk, false).unwrap();
        assert!(matches!(index, ReadonlyIndex::SeqNum(_)));
        assert_eq!(index.num_rows(), 4);
        assert_eq!(index.search_exact(&pk.encode_key(&[Value::Int(12)]).unwrap()), [2]);
        let past_end = pk.encode_key(&[Value::Int(14)]).unwrap();
        assert_eq!(index.search_exact(&past_end), Vec::<u32>::new());
        assert_eq!(index.lower_bound(&pk.encode_key(&[Value::Int(-1)]).unwrap()), 0);
    }

    #[test]
    fn multi_field_fixed_keys_use_fixed_len_format() {
        let dir = tempdir().unwrap();
        let schema = TableSchemaDef::new(vec![
            ColumnMeta::new("a", ColumnType::Uint32),
            ColumnMeta::new("b", ColumnType::Uint16),
        ])
        .index("ab", &["a", "b"], false)
        .build()
        .unwrap();
        let ab = schema.index(0);
        assert_eq!(ab.int_key_shape(), None);
        let key = ab.encode_key(&[Value::Uint(1), Value::Uint(2)]).unwrap();
        ReadonlyIndex::write_file(dir.path(), 0, ab, vec![(key, 0)]).unwrap();
        let index = ReadonlyIndex::open(dir.path(), 0, ab, false).unwrap();
        assert!(matches!(index, ReadonlyIndex::FixedLen(_)));
    }

    #[test]
    fn unique_build_rejects_duplicates() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let pk = schema.index(0);
        let key = pk.encode_key(&[Value::Int(1)]).unwrap();
        let err = ReadonlyIndex::write_file(dir.path(), 0, pk, vec![(key.clone(), 0), (key, 1)])
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey { ref index, .. } if index == "pk"));
    }
}
