//! Index over a single integer key field.
//!
//! A one-field integer key is a type tag followed by `width` big-endian
//! bytes, so its body read as an unsigned number keeps key order. Distinct
//! keys are stored as `value - min` in a [`UintVecMin0`].
//!
//! File layout:
//!
//! ```text
//! +--------------------------------+------------------+----------+
//! | header (24 bytes)              | key deltas       | postings |
//! | rows u32, uniq u32, width u8,  | (UintVecMin0)    |          |
//! | tag u8, version u16, 4 pad,    |                  |          |
//! | min u64                        |                  |          |
//! +--------------------------------+------------------+----------+
//! ```

use super::{Postings, SortedIndex};
use crate::buf::{ByteView, Reader};
use crate::error::{CoreError, CoreResult};
use crate::store::UintVecMin0;
use std::cmp::Ordering;
use std::path::Path;
use strata_storage::MappedFile;

pub(super) const INT_HEADER_LEN: usize = 24;
const INT_KEY_VERSION: u16 = 1;

/// Shape of a one-field integer key: its type tag and body width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntKeyShape {
    /// Leading key byte.
    pub tag: u8,
    /// Big-endian body bytes, 1 to 8.
    pub width: usize,
}

impl IntKeyShape {
    /// Returns the body of `key` as a number, or `None` if `key` does not
    /// have this shape.
    #[must_use]
    pub fn value_of(self, key: &[u8]) -> Option<u64> {
        if key.len() != self.width + 1 || key[0] != self.tag {
            return None;
        }
        Some(key[1..].iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }

    /// Writes the key whose body is `value` into `buf`, returning its length.
    pub(super) fn key_into(self, value: u64, buf: &mut [u8; 9]) -> usize {
        buf[0] = self.tag;
        buf[1..=self.width].copy_from_slice(&value.to_be_bytes()[8 - self.width..]);
        self.width + 1
    }

    pub(super) fn write_header(self, rows: usize, uniq: usize, version: u16, min: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(INT_HEADER_LEN + 64);
        out.extend_from_slice(&(rows as u32).to_le_bytes());
        out.extend_from_slice(&(uniq as u32).to_le_bytes());
        out.push(self.width as u8);
        out.push(self.tag);
        out.extend_from_slice(&version.to_le_bytes());
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&min.to_le_bytes());
        out
    }

    /// Reads a header, returning `(shape, rows, uniq, min)`.
    pub(super) fn read_header(
        view: &ByteView,
        what: &'static str,
        version: u16,
    ) -> CoreResult<(Self, usize, usize, u64)> {
        let mut r = Reader::new(view, what);
        let rows = r.u32()? as usize;
        let uniq = r.u32()? as usize;
        let width = usize::from(r.u8()?);
        let tag = r.u8()?;
        let found = r.u16()?;
        if found != version {
            return Err(CoreError::invalid_format(format!(
                "unsupported {what} version: {found}"
            )));
        }
        r.bytes(4)?;
        let min = r.u64()?;
        if !(1..=8).contains(&width) || uniq > rows {
            return Err(CoreError::segment_corruption(format!(
                "{what} has {uniq} keys of {width} bytes for {rows} rows"
            )));
        }
        Ok((Self { tag, width }, rows, uniq, min))
    }
}

/// Returns the first ordinal in `0..n` whose key is not less than `key`.
pub(super) fn lower_bound_by(
    n: usize,
    key: &[u8],
    key_of: impl Fn(usize, &mut [u8; 9]) -> usize,
) -> usize {
    let mut buf = [0u8; 9];
    let (mut lo, mut hi) = (0usize, n);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let len = key_of(mid, &mut buf);
        if buf[..len].cmp(key) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Distinct integer keys packed as deltas from the smallest one.
#[derive(Debug, Clone)]
pub struct IntKeyIndex {
    shape: IntKeyShape,
    min: u64,
    deltas: UintVecMin0,
    postings: Postings,
}

impl IntKeyIndex {
    /// Serializes `(key, id)` pairs sorted by key then id.
    ///
    /// # Panics
    ///
    /// Panics if a key does not have the given shape or the pairs are
    /// unsorted.
    #[must_use]
    pub fn encode(shape: IntKeyShape, entries: &[(Vec<u8>, u32)]) -> Vec<u8> {
        let (keys, postings) = Postings::build(entries);
        let values: Vec<u64> = keys
            .iter()
            .map(|k| match shape.value_of(k) {
                Some(v) => v,
                None => panic!("integer index key has the wrong shape"),
            })
            .collect();
        let min = values.first().copied().unwrap_or(0);
        let deltas: Vec<u64> = values.iter().map(|v| v - min).collect();
        let mut out = shape.write_header(entries.len(), keys.len(), INT_KEY_VERSION, min);
        UintVecMin0::build(&deltas).write_to(&mut out);
        postings.write_to(&mut out);
        out
    }

    /// Writes the index file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_file(
        path: &Path,
        shape: IntKeyShape,
        entries: &[(Vec<u8>, u32)],
    ) -> CoreResult<()> {
        std::fs::write(path, Self::encode(shape, entries))?;
        Ok(())
    }

    /// Loads an index from its serialized bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the header or sections are malformed.
    pub fn from_view(view: ByteView) -> CoreResult<Self> {
        let (shape, rows, uniq, min) =
            IntKeyShape::read_header(&view, "integer key index", INT_KEY_VERSION)?;
        let (deltas, used) = UintVecMin0::from_view(&view.slice(INT_HEADER_LEN..view.len())?)?;
        if deltas.len() != uniq {
            return Err(CoreError::segment_corruption(format!(
                "integer key index holds {} keys, header says {uniq}",
                deltas.len()
            )));
        }
        let rest = view.slice(INT_HEADER_LEN + used..view.len())?;
        let (postings, _) = Postings::from_view(&rest, uniq, rows)?;
        Ok(Self {
            shape,
            min,
            deltas,
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

    /// Returns the key shape.
    #[must_use]
    pub fn shape(&self) -> IntKeyShape {
        self.shape
    }

    /// Returns the smallest key body.
    #[must_use]
    pub fn min_value(&self) -> u64 {
        self.min
    }

    fn key_into(&self, ord: usize, buf: &mut [u8; 9]) -> usize {
        self.shape.key_into(self.min + self.deltas.get(ord), buf)
    }
}

impl SortedIndex for IntKeyIndex {
    fn num_keys(&self) -> usize {
        self.deltas.len()
    }

    fn key_at(&self, ord: usize, out: &mut Vec<u8>) {
        let mut buf = [0u8; 9];
        let len = self.key_into(ord, &mut buf);
        out.extend_from_slice(&buf[..len]);
    }

    fn lower_bound(&self, key: &[u8]) -> usize {
        lower_bound_by(self.num_keys(), key, |ord, buf| self.key_into(ord, buf))
    }

    fn find(&self, key: &[u8]) -> Option<usize> {
        let value = self.shape.value_of(key)?;
        let delta = value.checked_sub(self.min)?;
        let ord = self.deltas.upper_bound(delta).checked_sub(1)?;
        (self.deltas.get(ord) == delta).then_some(ord)
    }

    fn postings(&self) -> &Postings {
        &self.postings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SHAPE: IntKeyShape = IntKeyShape { tag: 7, width: 2 };

    fn key(v: u16) -> Vec<u8> {
        let mut k = vec![SHAPE.tag];
        k.extend_from_slice(&v.to_be_bytes());
        k
    }

    fn entries(pairs: &[(u16, u32)]) -> Vec<(Vec<u8>, u32)> {
        let mut out: Vec<_> = pairs.iter().map(|&(k, id)| (key(k), id)).collect();
        out.sort();
        out
    }

    #[test]
    fn lookup() {
        let data = entries(&[(300, 0), (100, 1), (200, 2), (100, 3), (400, 4)]);
        let index = IntKeyIndex::from_view(ByteView::owned(IntKeyIndex::encode(SHAPE, &data)))
            .unwrap();
        assert_eq!(index.min_value(), 100);
        assert_eq!(index.num_keys(), 4);
        assert_eq!(index.num_rows(), 5);
        assert_eq!(index.search_exact(&key(100)), [1, 3]);
        assert_eq!(index.search_exact(&key(150)), Vec::<u32>::new());
        assert_eq!(index.search_exact(&key(50)), Vec::<u32>::new());
        assert_eq!(index.lower_bound(&key(150)), 1);
        assert_eq!(index.upper_bound(&key(200)), 2);
        assert_eq!(index.lower_bound(&key(500)), 4);
        // Shorter and foreign-tag keys still order bytewise.
        assert_eq!(index.lower_bound(&[SHAPE.tag]), 0);
        assert_eq!(index.lower_bound(&[SHAPE.tag + 1]), 4);

        let mut out = Vec::new();
        index.key_at(3, &mut out);
        assert_eq!(out, key(400));
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx0.ikey");
        IntKeyIndex::write_file(&path, SHAPE, &entries(&[(9, 0), (5, 1)])).unwrap();
        let index = IntKeyIndex::open(&path, false).unwrap();
        assert_eq!(index.shape(), SHAPE);
        assert_eq!(index.find(&key(5)), Some(0));
        assert_eq!(index.search_exact(&key(9)), [0]);
    }

    #[test]
    fn empty_index() {
        let index = IntKeyIndex::from_view(ByteView::owned(IntKeyIndex::encode(SHAPE, &[])))
            .unwrap();
        assert_eq!(index.num_keys(), 0);
        assert_eq!(index.lower_bound(&key(1)), 0);
        assert_eq!(index.find(&key(1)), None);
    }

    #[test]
    fn bad_version() {
        let mut data = IntKeyIndex::encode(SHAPE, &entries(&[(1, 0)]));
        data[10] = 9;
        assert!(matches!(
            IntKeyIndex::from_view(ByteView::owned(data)),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
