//! Core type definitions for StrataDB.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Table-wide row identifier.
///
/// Ids are dense: the rows of segment `i` occupy the half-open range
/// `[row_num_vec[i], row_num_vec[i + 1])`. An id stays valid until the
/// segment holding it is compacted; after that it may name another row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Creates a new record ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rec:{}", self.0)
    }
}

/// Stable identifier of a segment.
///
/// Segment ids are allocated from the manifest sequence and never reused,
/// so a compacted segment always receives a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(pub u64);

impl SegmentId {
    /// Creates a new segment ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg:{}", self.0)
    }
}

/// A row addressed by segment and position within it.
///
/// Unlike [`RecordId`], a `RowRef` never silently shifts: once its segment
/// is compacted away, resolving it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowRef {
    /// Owning segment.
    pub segment: SegmentId,
    /// Position inside the segment.
    pub sub_id: u32,
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.segment, self.sub_id)
    }
}

/// A record id stamped with the table generation it was issued under.
///
/// The generation bumps on every segment swap, so a cached id can be
/// checked with [`crate::CompositeTable::validate`] before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionedId {
    /// The record id.
    pub id: RecordId,
    /// Generation at the time the id was issued.
    pub generation: u64,
}

/// Physical kind of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SegmentKind {
    /// Append-friendly segment with mutable stores and in-memory indexes.
    Writable = 1,
    /// Compressed, immutable segment with succinct indexes.
    Readonly = 2,
}

impl SegmentKind {
    /// Returns the directory name prefix.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Writable => "wr",
            Self::Readonly => "rd",
        }
    }

    /// Converts from the on-disk tag.
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Writable),
            2 => Some(Self::Readonly),
            _ => None,
        }
    }

    /// Parses a directory name prefix.
    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "wr" => Some(Self::Writable),
            "rd" => Some(Self::Readonly),
            _ => None,
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Writable => f.write_str("writable"),
            Self::Readonly => f.write_str("readonly"),
        }
    }
}

/// Lifecycle state of a segment.
///
/// `Building -> Writable -> Flushing -> Readonly -> Purged`. A readonly
/// segment being merged or purged passes through `Flushing` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SegmentState {
    /// Being assembled by the builder; not yet visible.
    Building = 0,
    /// Accepts appends (only when current) and in-place updates.
    Writable = 1,
    /// Being rebuilt in the background; mutations are booked.
    Flushing = 2,
    /// Immutable apart from deletion marks and inplace columns.
    Readonly = 3,
    /// Replaced by a newer segment; files are removed on drop.
    Purged = 4,
}

impl SegmentState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Building,
            1 => Self::Writable,
            2 => Self::Flushing,
            3 => Self::Readonly,
            _ => Self::Purged,
        }
    }
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Building => "building",
            Self::Writable => "writable",
            Self::Flushing => "flushing",
            Self::Readonly => "readonly",
            Self::Purged => "purged",
        };
        f.write_str(s)
    }
}

/// A [`SegmentState`] that can be transitioned atomically.
#[derive(Debug)]
pub(crate) struct AtomicSegmentState(AtomicU8);

impl AtomicSegmentState {
    pub(crate) fn new(state: SegmentState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> SegmentState {
        SegmentState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: SegmentState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves from `from` to `to`; returns false if the state was not `from`.
    pub(crate) fn transition(&self, from: SegmentState, to: SegmentState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Result of positioning an index iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekResult {
    /// Positioned on an entry whose key equals the target.
    Exact,
    /// Positioned on the nearest entry past the target in iteration order.
    UpperBound,
    /// No entry at or past the target.
    End,
}

impl SeekResult {
    /// Returns the classic tri-state code: `0`, `1` or `-1`.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Exact => 0,
            Self::UpperBound => 1,
            Self::End => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_ordering() {
        assert!(RecordId::new(1) < RecordId::new(2));
        assert_eq!(RecordId::new(7).to_string(), "rec:7");
    }

    #[test]
    fn kind_prefix_roundtrip() {
        for kind in [SegmentKind::Writable, SegmentKind::Readonly] {
            assert_eq!(SegmentKind::from_prefix(kind.prefix()), Some(kind));
            assert_eq!(SegmentKind::from_u8(kind as u8), Some(kind));
        }
        assert_eq!(SegmentKind::from_prefix("xx"), None);
    }

    #[test]
    fn state_transition() {
        let state = AtomicSegmentState::new(SegmentState::Writable);
        assert!(state.transition(SegmentState::Writable, SegmentState::Flushing));
        assert!(!state.transition(SegmentState::Writable, SegmentState::Flushing));
        assert_eq!(state.load(), SegmentState::Flushing);
        state.store(SegmentState::Purged);
        assert_eq!(state.load().to_string(), "purged");
    }

    #[test]
    fn seek_codes() {
        assert_eq!(SeekResult::Exact.code(), 0);
        assert_eq!(SeekResult::UpperBound.code(), 1);
        assert_eq!(SeekResult::End.code(), -1);
    }
}
