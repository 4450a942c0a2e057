//! Implicit index over a dense run of integer keys.
//!
//! When a segment's one-field integer keys are exactly `min, min + 1, ...`
//! and row `i` holds key `min + i`, the index is fully described by `min`
//! and the row count. The file is a bare [`IntKeyIndex`] style header.
//!
//! [`IntKeyIndex`]: super::IntKeyIndex

use super::int_key::{lower_bound_by, IntKeyShape};
use super::{Postings, SortedIndex};
use crate::buf::ByteView;
use crate::error::{CoreError, CoreResult};
use std::path::Path;
use strata_storage::MappedFile;

const SEQ_NUM_VERSION: u16 = 1;

/// Index whose key of row `i` is `min + i`.
#[derive(Debug, Clone)]
pub struct SeqNumIndex {
    shape: IntKeyShape,
    min: u64,
    rows: usize,
    postings: Postings,
}

impl SeqNumIndex {
    /// Returns the smallest key body if `entries` (sorted by key then id)
    /// form a dense run with row `i` holding the `i`-th key.
    #[must_use]
    pub fn detect(shape: IntKeyShape, entries: &[(Vec<u8>, u32)]) -> Option<u64> {
        let min = shape.value_of(&entries.first()?.0)?;
        let dense = entries.iter().enumerate().all(|(i, (key, id))| {
            *id as usize == i && shape.value_of(key) == min.checked_add(i as u64)
        });
        dense.then_some(min)
    }

    /// Serializes a dense run of `rows` keys starting at `min`.
    #[must_use]
    pub fn encode(shape: IntKeyShape, min: u64, rows: usize) -> Vec<u8> {
        shape.write_header(rows, rows, SEQ_NUM_VERSION, min)
    }

    /// Writes the index file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_file(path: &Path, shape: IntKeyShape, min: u64, rows: usize) -> CoreResult<()> {
        std::fs::write(path, Self::encode(shape, min, rows))?;
        Ok(())
    }

    /// Loads an index from its serialized header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is malformed or the run overflows.
    pub fn from_view(view: ByteView) -> CoreResult<Self> {
        let (shape, rows, uniq, min) =
            IntKeyShape::read_header(&view, "sequence number index", SEQ_NUM_VERSION)?;
        let max_body = u64::MAX >> (64 - 8 * shape.width);
        let fits = min
            .checked_add(rows as u64)
            .is_some_and(|end| rows == 0 || end - 1 <= max_body);
        if uniq != rows || !fits {
            return Err(CoreError::segment_corruption(format!(
                "sequence number index of {rows} rows from {min} is not a dense run"
            )));
        }
        Ok(Self {
            shape,
            min,
            rows,
            postings: Postings::identity(rows),
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

    /// Returns the key shape.
    #[must_use]
    pub fn shape(&self) -> IntKeyShape {
        self.shape
    }

    /// Returns the key body of row 0.
    #[must_use]
    pub fn min_value(&self) -> u64 {
        self.min
    }
}

impl SortedIndex for SeqNumIndex {
    fn num_keys(&self) -> usize {
        self.rows
    }

    fn key_at(&self, ord: usize, out: &mut Vec<u8>) {
        assert!(ord < self.rows, "key ordinal {ord} out of range");
        let mut buf = [0u8; 9];
        let len = self.shape.key_into(self.min + ord as u64, &mut buf);
        out.extend_from_slice(&buf[..len]);
    }

    fn lower_bound(&self, key: &[u8]) -> usize {
        lower_bound_by(self.rows, key, |ord, buf| {
            self.shape.key_into(self.min + ord as u64, buf)
        })
    }

    fn find(&self, key: &[u8]) -> Option<usize> {
        let ord = self.shape.value_of(key)?.checked_sub(self.min)?;
        usize::try_from(ord).ok().filter(|&ord| ord < self.rows)
    }

    fn postings(&self) -> &Postings {
        &self.postings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: IntKeyShape = IntKeyShape { tag: 9, width: 4 };

    fn key(v: u32) -> Vec<u8> {
        let mut k = vec![SHAPE.tag];
        k.extend_from_slice(&v.to_be_bytes());
        k
    }

    #[test]
    fn detects_dense_runs_only() {
        let dense: Vec<_> = (0..4).map(|i| (key(10 + i), i)).collect();
        assert_eq!(SeqNumIndex::detect(SHAPE, &dense), Some(10));

        let gap = vec![(key(10), 0), (key(12), 1)];
        assert_eq!(SeqNumIndex::detect(SHAPE, &gap), None);
        let shuffled = vec![(key(10), 1), (key(11), 0)];
        assert_eq!(SeqNumIndex::detect(SHAPE, &shuffled), None);
        let repeated = vec![(key(10), 0), (key(10), 1)];
        assert_eq!(SeqNumIndex::detect(SHAPE, &repeated), None);
        assert_eq!(SeqNumIndex::detect(SHAPE, &[]), None);
    }

    #[test]
    fn lookup_without_storage() {
        let data = SeqNumIndex::encode(SHAPE, 100, 5);
        assert_eq!(data.len(), 24);
        let index = SeqNumIndex::from_view(ByteView::owned(data)).unwrap();
        assert_eq!(index.num_keys(), 5);
        assert_eq!(index.search_exact(&key(103)), [3]);
        assert_eq!(index.search_exact(&key(105)), Vec::<u32>::new());
        assert_eq!(index.search_exact(&key(99)), Vec::<u32>::new());
        assert_eq!(index.lower_bound(&key(50)), 0);
        assert_eq!(index.lower_bound(&key(102)), 2);
        assert_eq!(index.upper_bound(&key(102)), 3);
        assert_eq!(index.lower_bound(&key(500)), 5);

        let mut out = Vec::new();
        index.key_at(4, &mut out);
        assert_eq!(out, key(104));
    }

    #[test]
    fn rejects_run_past_key_width() {
        let shape = IntKeyShape { tag: 1, width: 1 };
        let data = SeqNumIndex::encode(shape, 250, 10);
        assert!(matches!(
            SeqNumIndex::from_view(ByteView::owned(data)),
            Err(CoreError::SegmentCorruption { .. })
        ));
    }
}
