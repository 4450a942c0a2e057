//! Ordered cursor over one index of one segment.

use super::{Segment, SegmentBody};
use crate::index::{ReadonlyIndex, SortedIndex};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Position {
    Unpositioned,
    /// Last entry yielded from a writable segment's in-memory index.
    Mem { key: Vec<u8>, id: u32 },
    /// Sorted position within a readonly index and the key ordinal owning it.
    Sorted {
        pos: usize,
        ord: usize,
        key: Vec<u8>,
        id: u32,
    },
    Exhausted,
}

/// Walks `(key, sub_id)` entries of a segment index in key order, skipping
/// deleted rows.
///
/// Entries with equal keys come in ascending sub-id order going forward and
/// descending going backward.
#[derive(Debug)]
pub struct SegmentCursor {
    seg: Arc<Segment>,
    index: usize,
    forward: bool,
    position: Position,
}

impl SegmentCursor {
    /// Creates an unpositioned cursor over index `index` of `seg`.
    #[must_use]
    pub fn new(seg: Arc<Segment>, index: usize, forward: bool) -> Self {
        Self {
            seg,
            index,
            forward,
            position: Position::Unpositioned,
        }
    }

    /// Returns the segment.
    #[must_use]
    pub fn segment(&self) -> &Arc<Segment> {
        &self.seg
    }

    /// Returns the entry the cursor is on.
    #[must_use]
    pub fn current(&self) -> Option<(&[u8], u32)> {
        match &self.position {
            Position::Mem { key, id } | Position::Sorted { key, id, .. } => Some((key, *id)),
            Position::Unpositioned | Position::Exhausted => None,
        }
    }

    /// Moves to the first entry in iteration order.
    pub fn rewind(&mut self) -> Option<(&[u8], u32)> {
        self.position = match self.seg.body() {
            SegmentBody::Writable(w) => {
                let index = w.index(self.index);
                mem_position(if self.forward { index.first() } else { index.last() })
            }
            SegmentBody::Readonly(r) => {
                let index = r.index(self.index);
                let rows = index.num_rows();
                if rows == 0 {
                    Position::Exhausted
                } else if self.forward {
                    sorted_position(index, 0, 0)
                } else {
                    sorted_position(index, rows - 1, index.num_keys() - 1)
                }
            }
        };
        self.settle()
    }

    /// Moves to the next entry in iteration order.
    pub fn advance(&mut self) -> Option<(&[u8], u32)> {
        if matches!(self.position, Position::Unpositioned) {
            return self.rewind();
        }
        self.step();
        self.settle()
    }

    /// Positions on the first entry with key `>= key` going forward, or the
    /// last entry with key `<= key` going backward.
    pub fn seek(&mut self, key: &[u8]) -> Option<(&[u8], u32)> {
        self.position = match self.seg.body() {
            SegmentBody::Writable(w) => {
                let index = w.index(self.index);
                mem_position(if self.forward {
                    index.seek_ge(key)
                } else {
                    index.seek_le(key)
                })
            }
            SegmentBody::Readonly(r) => {
                let index = r.index(self.index);
                if self.forward {
                    let ord = index.lower_bound(key);
                    if ord == index.num_keys() {
                        Position::Exhausted
                    } else {
                        sorted_position(index, index.postings().range_of(ord).start, ord)
                    }
                } else {
                    match index.upper_bound(key).checked_sub(1) {
                        Some(ord) => {
                            sorted_position(index, index.postings().range_of(ord).end - 1, ord)
                        }
                        None => Position::Exhausted,
                    }
                }
            }
        };
        self.settle()
    }

    fn settle(&mut self) -> Option<(&[u8], u32)> {
        loop {
            let id = match self.current() {
                Some((_, id)) => id,
                None => return None,
            };
            if !self.seg.is_deleted(id) {
                break;
            }
            self.step();
        }
        self.current()
    }

    fn step(&mut self) {
        let seg = Arc::clone(&self.seg);
        let position = std::mem::replace(&mut self.position, Position::Exhausted);
        self.position = match (position, seg.body()) {
            (Position::Mem { key, id }, SegmentBody::Writable(w)) => {
                let index = w.index(self.index);
                mem_position(if self.forward {
                    index.next_after(&key, id)
                } else {
                    index.prev_before(&key, id)
                })
            }
            (Position::Sorted { pos, ord, key, .. }, SegmentBody::Readonly(r)) => {
                let index = r.index(self.index);
                let postings = index.postings();
                if self.forward {
                    let next = pos + 1;
                    if next >= postings.num_rows() {
                        Position::Exhausted
                    } else if next < postings.range_of(ord).end {
                        let id = postings.row_at(next);
                        Position::Sorted { pos: next, ord, key, id }
                    } else {
                        sorted_position(index, next, ord + 1)
                    }
                } else if pos == 0 {
                    Position::Exhausted
                } else if pos - 1 >= postings.range_of(ord).start {
                    let id = postings.row_at(pos - 1);
                    Position::Sorted { pos: pos - 1, ord, key, id }
                } else {
                    sorted_position(index, pos - 1, ord - 1)
                }
            }
            _ => Position::Exhausted,
        };
    }
}

fn mem_position(entry: Option<(&[u8], u32)>) -> Position {
    match entry {
        Some((key, id)) => Position::Mem {
            key: key.to_vec(),
            id,
        },
        None => Position::Exhausted,
    }
}

fn sorted_position(index: &ReadonlyIndex, pos: usize, ord: usize) -> Position {
    let mut key = Vec::new();
    index.key_at(ord, &mut key);
    Position::Sorted {
        pos,
        ord,
        key,
        id: index.postings().row_at(pos),
    }
}
