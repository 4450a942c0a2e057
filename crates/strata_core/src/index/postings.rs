//! Key-to-rows postings shared by the readonly index formats.

use super::super::store::UintVecMin0;
use crate::buf::ByteView;
use crate::error::{CoreError, CoreResult};

/// Row ids grouped by key ordinal.
///
/// `perm` lists row ids in (key, id) order; `starts[k]..starts[k + 1]` is
/// the run of key `k`. Runs are sorted by id, so equal keys iterate in
/// ascending row order.
#[derive(Debug, Clone)]
pub struct Postings {
    starts: UintVecMin0,
    perm: UintVecMin0,
}

impl Postings {
    /// Groups `(key, id)` pairs that are already sorted by key then id,
    /// returning the distinct keys and the postings.
    ///
    /// # Panics
    ///
    /// Panics if the pairs are not sorted.
    #[must_use]
    pub fn build(entries: &[(Vec<u8>, u32)]) -> (Vec<&[u8]>, Self) {
        let mut keys: Vec<&[u8]> = Vec::new();
        let mut starts = Vec::new();
        let mut perm = Vec::with_capacity(entries.len());
        for (i, (key, id)) in entries.iter().enumerate() {
            if i > 0 {
                assert!(entries[i - 1] <= entries[i], "index entries out of order");
            }
            if keys.last() != Some(&key.as_slice()) {
                keys.push(key);
                starts.push(i as u64);
            }
            perm.push(u64::from(*id));
        }
        starts.push(entries.len() as u64);
        let postings = Self {
            starts: UintVecMin0::build(&starts),
            perm: UintVecMin0::build(&perm),
        };
        (keys, postings)
    }

    /// Postings of `n` distinct keys where key `k` is held by row `k`.
    #[must_use]
    pub fn identity(n: usize) -> Self {
        let ids: Vec<u64> = (0..=n as u64).collect();
        Self {
            starts: UintVecMin0::build(&ids),
            perm: UintVecMin0::build(&ids[..n]),
        }
    }

    /// Reads postings written by [`Postings::write_to`], returning them and
    /// the bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns an error if either vector is truncated or they disagree with
    /// `uniq` and `rows`.
    pub fn from_view(view: &ByteView, uniq: usize, rows: usize) -> CoreResult<(Self, usize)> {
        let (starts, a) = UintVecMin0::from_view(view)?;
        let (perm, b) = UintVecMin0::from_view(&view.slice(a..view.len())?)?;
        if starts.len() != uniq + 1 || perm.len() != rows || starts.get(uniq) != rows as u64 {
            return Err(CoreError::segment_corruption(format!(
                "postings do not match {uniq} keys and {rows} rows"
            )));
        }
        Ok((Self { starts, perm }, a + b))
    }

    /// Appends both vectors.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        self.starts.write_to(out);
        self.perm.write_to(out);
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.perm.len()
    }

    /// Returns the sorted position range of key `ord`.
    #[must_use]
    pub fn range_of(&self, ord: usize) -> std::ops::Range<usize> {
        self.starts.get(ord) as usize..self.starts.get(ord + 1) as usize
    }

    /// Returns the row ids of key `ord`.
    pub fn rows_of(&self, ord: usize) -> impl Iterator<Item = u32> + '_ {
        self.range_of(ord).map(|pos| self.row_at(pos))
    }

    /// Returns the row id at sorted position `pos`.
    #[must_use]
    pub fn row_at(&self, pos: usize) -> u32 {
        self.perm.get(pos) as u32
    }

    /// Returns the key ordinal owning sorted position `pos`.
    #[must_use]
    pub fn ord_of(&self, pos: usize) -> usize {
        self.starts.upper_bound(pos as u64) - 1
    }

    /// Returns the packed size in bytes.
    #[must_use]
    pub fn mem_size(&self) -> usize {
        self.starts.mem_size() + self.perm.mem_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_runs() {
        let entries = vec![
            (b"a".to_vec(), 4),
            (b"a".to_vec(), 9),
            (b"b".to_vec(), 0),
            (b"d".to_vec(), 2),
            (b"d".to_vec(), 3),
        ];
        let (keys, postings) = Postings::build(&entries);
        assert_eq!(keys, [&b"a"[..], &b"b"[..], &b"d"[..]]);
        assert_eq!(postings.rows_of(0).collect::<Vec<_>>(), [4, 9]);
        assert_eq!(postings.rows_of(2).collect::<Vec<_>>(), [2, 3]);
        assert_eq!(postings.ord_of(0), 0);
        assert_eq!(postings.ord_of(2), 1);
        assert_eq!(postings.ord_of(4), 2);

        let mut out = Vec::new();
        postings.write_to(&mut out);
        let (back, used) = Postings::from_view(&ByteView::owned(out.clone()), 3, 5).unwrap();
        assert_eq!(used, out.len());
        assert_eq!(back.row_at(1), 9);
        assert!(Postings::from_view(&ByteView::owned(out), 2, 5).is_err());
    }

    #[test]
    fn identity_maps_each_key_to_its_row() {
        let postings = Postings::identity(3);
        assert_eq!(postings.num_rows(), 3);
        assert_eq!(postings.rows_of(1).collect::<Vec<_>>(), [1]);
        assert_eq!(postings.ord_of(2), 2);
        assert_eq!(Postings::identity(0).num_rows(), 0);
    }

    #[test]
    fn empty() {
        let (keys, postings) = Postings::build(&[]);
        assert!(keys.is_empty());
        assert_eq!(postings.num_rows(), 0);
    }
}
