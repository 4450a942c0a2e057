//! Iterators spanning every segment of a table.

use super::Snapshot;
use crate::error::{CoreError, CoreResult};
use crate::schema::TableSchema;
use crate::segment::{Segment, SegmentCursor};
use crate::types::{RecordId, SeekResult};
use std::cmp::Ordering;
use std::sync::Arc;

/// Ordered iterator over one index across all segments.
///
/// Yields `(record id, encoded key)` for live rows. Forward iteration runs
/// in ascending `(key, record id)` order, backward in descending order.
/// The iterator works on the segment list captured when it was created; a
/// later compaction does not disturb it, but the ids it yields belong to
/// [`IndexIter::generation`].
#[derive(Debug)]
pub struct IndexIter {
    cursors: Vec<(u64, SegmentCursor)>,
    forward: bool,
    started: bool,
    generation: u64,
}

impl IndexIter {
    pub(crate) fn new(cursors: Vec<(u64, SegmentCursor)>, forward: bool, generation: u64) -> Self {
        Self {
            cursors,
            forward,
            started: false,
            generation,
        }
    }

    /// Returns the table generation the yielded ids belong to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true for a forward iterator.
    #[must_use]
    pub fn is_forward(&self) -> bool {
        self.forward
    }

    /// Restarts from the first entry in iteration order.
    pub fn reset(&mut self) {
        for (_, cursor) in &mut self.cursors {
            cursor.rewind();
        }
        self.started = true;
    }

    /// Positions on the first entry at or past `key` in iteration order and
    /// returns it. The returned entry is consumed: the next call to
    /// [`Iterator::next`] yields the entry after it.
    ///
    /// The result is [`SeekResult::Exact`] if the entry's key equals `key`,
    /// [`SeekResult::UpperBound`] if it lies past `key`, and
    /// [`SeekResult::End`] if no entry remains.
    pub fn seek_lower_bound(&mut self, key: &[u8]) -> (SeekResult, Option<(RecordId, Vec<u8>)>) {
        for (_, cursor) in &mut self.cursors {
            cursor.seek(key);
        }
        self.started = true;
        match self.pop() {
            Some((id, found)) => {
                let result = if found == key {
                    SeekResult::Exact
                } else {
                    SeekResult::UpperBound
                };
                (result, Some((id, found)))
            }
            None => (SeekResult::End, None),
        }
    }

    /// Takes the best current entry and advances its cursor.
    fn pop(&mut self) -> Option<(RecordId, Vec<u8>)> {
        let forward = self.forward;
        let mut best: Option<(usize, &[u8], u64)> = None;
        for (i, (base, cursor)) in self.cursors.iter().enumerate() {
            let Some((key, sub)) = cursor.current() else {
                continue;
            };
            let id = base + u64::from(sub);
            let better = match best {
                None => true,
                Some((_, best_key, best_id)) => {
                    let ord = key.cmp(best_key).then(id.cmp(&best_id));
                    if forward {
                        ord == Ordering::Less
                    } else {
                        ord == Ordering::Greater
                    }
                }
            };
            if better {
                best = Some((i, key, id));
            }
        }
        let (i, key, id) = best?;
        let entry = (RecordId::new(id), key.to_vec());
        self.cursors[i].1.advance();
        Some(entry)
    }
}

impl Iterator for IndexIter {
    type Item = (RecordId, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.reset();
        }
        self.pop()
    }
}

/// Iterator over every live row of a table in record id order.
///
/// Like [`IndexIter`], it reads the segment list captured at creation.
#[derive(Debug)]
pub struct TableScan {
    segments: Vec<(u64, Arc<Segment>)>,
    schema: Arc<TableSchema>,
    seg: usize,
    sub_id: u32,
    generation: u64,
}

impl TableScan {
    pub(crate) fn new(snapshot: Snapshot, schema: Arc<TableSchema>) -> Self {
        Self {
            segments: snapshot.bases.into_iter().zip(snapshot.segments).collect(),
            schema,
            seg: 0,
            sub_id: 0,
            generation: snapshot.generation,
        }
    }

    /// Returns the table generation the yielded ids belong to.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Iterator for TableScan {
    type Item = CoreResult<(RecordId, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((base, seg)) = self.segments.get(self.seg) {
            if self.sub_id >= seg.num_rows() {
                self.seg += 1;
                self.sub_id = 0;
                continue;
            }
            let sub_id = self.sub_id;
            self.sub_id += 1;
            if seg.is_deleted(sub_id) {
                continue;
            }
            let id = RecordId::new(base + u64::from(sub_id));
            match seg.get_row(&self.schema, sub_id) {
                Ok(row) => return Some(Ok((id, row))),
                Err(CoreError::RowDeleted { .. }) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }
}
