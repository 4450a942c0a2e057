//! Segments: the physical storage units of a table.
//!
//! A table is an ordered list of segments. New rows go to the last
//! [`WritableSegment`]; compaction replaces writable segments with
//! [`ReadonlySegment`]s built by [`SegmentBuilder`].
//!
//! Each segment lives in its own directory:
//!
//! ```text
//! wr-000007/                 rd-000003/
//!   segment.meta               segment.meta
//!   cg0.fix                    cg0.zint
//!   cg1.vidx  cg1.vdat         cg1.dzip
//!   isdel                      idx0.seq   idx1.trie
//!                              isdel
//! ```

mod builder;
mod cursor;
mod deletion;
mod meta;
mod readonly;
mod writable;

pub use builder::SegmentBuilder;
pub use cursor::SegmentCursor;
pub use deletion::{DeletionBitmap, DELETION_FILE};
pub use meta::{SegmentMeta, META_FILE};
pub use readonly::ReadonlySegment;
pub use writable::WritableSegment;

use crate::error::CoreResult;
use crate::index::{KeyMatcher, MatchBudget};
use crate::schema::TableSchema;
use crate::types::{AtomicSegmentState, SegmentId, SegmentKind, SegmentState};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// A mutation applied to a segment while it is being rebuilt, replayed on
/// the replacement afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookedOp {
    /// Row was removed.
    Remove(u32),
    /// An inplace column group was overwritten.
    UpdateColgroup {
        /// Row in the old segment.
        sub_id: u32,
        /// Column group.
        colgroup: usize,
        /// New value.
        value: Vec<u8>,
    },
}

/// The storage behind a segment.
#[derive(Debug)]
pub enum SegmentBody {
    /// Mutable segment.
    Writable(WritableSegment),
    /// Compacted segment.
    Readonly(ReadonlySegment),
}

/// A segment with its lifecycle state.
///
/// Segments are shared through `Arc`. Once retired, the directory is
/// removed when the last reference drops.
#[derive(Debug)]
pub struct Segment {
    body: SegmentBody,
    state: AtomicSegmentState,
    retired: AtomicBool,
}

impl Segment {
    fn with_state(body: SegmentBody, state: SegmentState) -> Self {
        Self {
            body,
            state: AtomicSegmentState::new(state),
            retired: AtomicBool::new(false),
        }
    }

    /// Creates an empty writable segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment files cannot be created.
    pub fn create_writable(
        dir: &Path,
        id: SegmentId,
        schema: Arc<TableSchema>,
    ) -> CoreResult<Self> {
        let body = SegmentBody::Writable(WritableSegment::create(dir, id, schema)?);
        Ok(Self::with_state(body, SegmentState::Writable))
    }

    /// Opens an existing segment of the given kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment files are missing or corrupted.
    pub fn open(
        dir: &Path,
        kind: SegmentKind,
        id: SegmentId,
        schema: &Arc<TableSchema>,
        populate: bool,
    ) -> CoreResult<Self> {
        Ok(match kind {
            SegmentKind::Writable => Self::with_state(
                SegmentBody::Writable(WritableSegment::open(dir, id, Arc::clone(schema))?),
                SegmentState::Writable,
            ),
            SegmentKind::Readonly => Self::with_state(
                SegmentBody::Readonly(ReadonlySegment::open(dir, id, schema, populate)?),
                SegmentState::Readonly,
            ),
        })
    }

    /// Returns the storage.
    #[must_use]
    pub fn body(&self) -> &SegmentBody {
        &self.body
    }

    /// Returns the writable segment, if this is one.
    #[must_use]
    pub fn as_writable(&self) -> Option<&WritableSegment> {
        match &self.body {
            SegmentBody::Writable(w) => Some(w),
            SegmentBody::Readonly(_) => None,
        }
    }

    /// Returns the segment id.
    #[must_use]
    pub fn id(&self) -> SegmentId {
        match &self.body {
            SegmentBody::Writable(w) => w.id(),
            SegmentBody::Readonly(r) => r.id(),
        }
    }

    /// Returns the segment kind.
    #[must_use]
    pub fn kind(&self) -> SegmentKind {
        match &self.body {
            SegmentBody::Writable(_) => SegmentKind::Writable,
            SegmentBody::Readonly(_) => SegmentKind::Readonly,
        }
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> SegmentState {
        self.state.load()
    }

    pub(crate) fn set_state(&self, state: SegmentState) {
        self.state.store(state);
    }

    pub(crate) fn transition(&self, from: SegmentState, to: SegmentState) -> bool {
        self.state.transition(from, to)
    }

    /// Returns the segment directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        match &self.body {
            SegmentBody::Writable(w) => w.dir(),
            SegmentBody::Readonly(r) => r.dir(),
        }
    }

    /// Returns the number of rows, deleted ones included. This is the
    /// segment's span in the table's record id space.
    #[must_use]
    pub fn num_rows(&self) -> u32 {
        match &self.body {
            SegmentBody::Writable(w) => w.num_rows(),
            SegmentBody::Readonly(r) => r.num_rows(),
        }
    }

    /// Returns the number of deleted rows.
    #[must_use]
    pub fn num_deleted(&self) -> u64 {
        match &self.body {
            SegmentBody::Writable(w) => w.num_deleted(),
            SegmentBody::Readonly(r) => r.num_deleted(),
        }
    }

    /// Returns the number of live rows.
    #[must_use]
    pub fn live_rows(&self) -> u64 {
        u64::from(self.num_rows()) - self.num_deleted()
    }

    /// Returns true if `sub_id` is deleted or out of range.
    #[must_use]
    pub fn is_deleted(&self, sub_id: u32) -> bool {
        match &self.body {
            SegmentBody::Writable(w) => w.is_deleted(sub_id),
            SegmentBody::Readonly(r) => r.is_deleted(sub_id),
        }
    }

    /// Returns the bytes of data held.
    #[must_use]
    pub fn data_size(&self) -> u64 {
        match &self.body {
            SegmentBody::Writable(w) => w.data_size(),
            SegmentBody::Readonly(r) => r.data_size(),
        }
    }

    /// Reads column group `g` of a live row into `out`.
    ///
    /// # Errors
    ///
    /// Returns an error for a dead id or an unreadable value.
    pub fn get_colgroup_value(&self, sub_id: u32, g: usize, out: &mut Vec<u8>) -> CoreResult<()> {
        match &self.body {
            SegmentBody::Writable(w) => w.get_colgroup_value(sub_id, g, out),
            SegmentBody::Readonly(r) => r.get_colgroup_value(sub_id, g, out),
        }
    }

    /// Reads the column group values of `sub_id` without checking deletion.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be read.
    pub fn read_colgroups(&self, sub_id: u32) -> CoreResult<Vec<Vec<u8>>> {
        match &self.body {
            SegmentBody::Writable(w) => w.read_colgroups(sub_id),
            SegmentBody::Readonly(r) => r.read_colgroups(sub_id),
        }
    }

    /// Reads and reassembles a live row.
    ///
    /// # Errors
    ///
    /// Returns an error for a dead id or an unreadable value.
    pub fn get_row(&self, schema: &TableSchema, sub_id: u32) -> CoreResult<Vec<u8>> {
        let mut values = Vec::with_capacity(schema.colgroups().len());
        for g in 0..schema.colgroups().len() {
            let mut value = Vec::new();
            self.get_colgroup_value(sub_id, g, &mut value)?;
            values.push(value);
        }
        schema.combine_colgroups(&values)
    }

    /// Tombstones a live row.
    ///
    /// # Errors
    ///
    /// Returns an error for a dead id.
    pub fn remove(&self, sub_id: u32) -> CoreResult<()> {
        match &self.body {
            SegmentBody::Writable(w) => w.remove(sub_id),
            SegmentBody::Readonly(r) => r.remove(sub_id),
        }
    }

    /// Overwrites column group `g` of a live row in place.
    ///
    /// # Errors
    ///
    /// Returns an error for a dead id or a group that cannot be written.
    pub fn update_colgroup(&self, sub_id: u32, g: usize, value: &[u8]) -> CoreResult<()> {
        match &self.body {
            SegmentBody::Writable(w) => w.update_colgroup(sub_id, g, value),
            SegmentBody::Readonly(r) => r.update_colgroup(sub_id, g, value),
        }
    }

    /// Returns the live rows holding `key` in index `i`, ascending.
    #[must_use]
    pub fn index_lookup(&self, i: usize, key: &[u8]) -> Vec<u32> {
        match &self.body {
            SegmentBody::Writable(w) => w.index_lookup(i, key),
            SegmentBody::Readonly(r) => r.index_lookup(i, key),
        }
    }

    /// Returns true if a live row other than `exclude` holds `key` in
    /// index `i`.
    #[must_use]
    pub fn index_has_live(&self, i: usize, key: &[u8], exclude: Option<u32>) -> bool {
        match &self.body {
            SegmentBody::Writable(w) => {
                w.index(i).ids_of(key).into_iter().any(|r| Some(r) != exclude)
            }
            SegmentBody::Readonly(r) => r.index_has_live(i, key, exclude),
        }
    }

    /// Collects live rows of index `i` selected by `matcher`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::MatchBudgetExceeded`] if the budget runs
    /// out.
    pub fn index_match(
        &self,
        i: usize,
        matcher: &KeyMatcher,
        budget: &mut MatchBudget,
    ) -> CoreResult<Vec<u32>> {
        match &self.body {
            SegmentBody::Writable(w) => {
                let index = w.index(i);
                let mut rows = Vec::new();
                for (key, id) in index.prefix_iter(matcher.scan_prefix()) {
                    budget.charge(key.len())?;
                    if matcher.accepts(key) {
                        budget.charge(std::mem::size_of::<u32>())?;
                        rows.push(id);
                    }
                }
                Ok(rows)
            }
            SegmentBody::Readonly(r) => r.index_match(i, matcher, budget),
        }
    }

    /// Starts booking mutations for a rebuild; see
    /// [`WritableSegment::start_booking`].
    ///
    /// # Errors
    ///
    /// Returns an error if booking is already on.
    pub fn start_booking(&self) -> CoreResult<(u32, DeletionBitmap)> {
        match &self.body {
            SegmentBody::Writable(w) => w.start_booking(),
            SegmentBody::Readonly(r) => r.start_booking(),
        }
    }

    /// Stops booking and returns the recorded mutations.
    pub fn finish_booking(&self) -> Vec<BookedOp> {
        match &self.body {
            SegmentBody::Writable(w) => w.finish_booking(),
            SegmentBody::Readonly(r) => r.finish_booking(),
        }
    }

    /// Persists pending changes.
    ///
    /// # Errors
    ///
    /// Returns an error if a write fails.
    pub fn flush(&self, sync: bool) -> CoreResult<()> {
        match &self.body {
            SegmentBody::Writable(w) => w.flush(sync),
            SegmentBody::Readonly(r) => r.flush(sync),
        }
    }

    /// Marks the segment purged; its directory is removed on drop.
    pub fn retire(&self) {
        self.set_state(SegmentState::Purged);
        self.retired.store(true, Ordering::Release);
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.retired.load(Ordering::Acquire) {
            return;
        }
        let id = self.id();
        let dir = self.dir().to_path_buf();
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => debug!(segment = %id, "removed purged segment"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(segment = %id, path = %dir.display(), error = %err, "segment cleanup failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::schema::{PreparedRow, StoreEncoding, TableSchemaDef};
    use crate::store::BuildOptions;
    use strata_codec::{ColumnMeta, ColumnType, RowCodec, Value};
    use tempfile::{tempdir, TempDir};

    fn schema() -> Arc<TableSchema> {
        Arc::new(
            TableSchemaDef::new(vec![
                ColumnMeta::new("id", ColumnType::Sint64),
                ColumnMeta::new("name", ColumnType::StrZero),
                ColumnMeta::new("hits", ColumnType::Uint32).inplace(),
            ])
            .colgroup("id", &["id"], StoreEncoding::Auto)
            .index("pk", &["id"], true)
            .index("by_name", &["name"], false)
            .build()
            .unwrap(),
        )
    }

    fn row(schema: &TableSchema, id: i64, name: &str) -> PreparedRow {
        let record = vec![Value::Int(id), Value::from(name), Value::Uint(id as u64)];
        schema.prepare_row(&schema.row().encode(&record).unwrap()).unwrap()
    }

    fn name_key(schema: &TableSchema, name: &str) -> Vec<u8> {
        schema.index(1).encode_key(&[Value::from(name)]).unwrap()
    }

    fn build_readonly(schema: &Arc<TableSchema>, names: &[&str]) -> (TempDir, Arc<Segment>) {
        let root = tempdir().unwrap();
        let mut builder = SegmentBuilder::new(Arc::clone(schema));
        for (i, name) in names.iter().enumerate() {
            builder.push(row(schema, i as i64, name));
        }
        let dest = root.path().join("rd-000002");
        builder
            .finish(
                &root.path().join("rd-000002.tmp"),
                &dest,
                SegmentId::new(2),
                &BuildOptions::from(&crate::TableConfig::default()),
                false,
            )
            .unwrap();
        let seg =
            Segment::open(&dest, SegmentKind::Readonly, SegmentId::new(2), schema, false).unwrap();
        (root, Arc::new(seg))
    }

    fn drain(cursor: &mut SegmentCursor) -> Vec<(Vec<u8>, u32)> {
        let mut out = Vec::new();
        let mut entry = cursor.rewind().map(|(k, id)| (k.to_vec(), id));
        while let Some(e) = entry {
            out.push(e);
            entry = cursor.advance().map(|(k, id)| (k.to_vec(), id));
        }
        out
    }

    #[test]
    fn readonly_roundtrip() {
        let schema = schema();
        let (_root, seg) = build_readonly(&schema, &["carol", "alice", "bob", "alice"]);
        assert_eq!(seg.kind(), SegmentKind::Readonly);
        assert_eq!(seg.state(), SegmentState::Readonly);
        assert_eq!(seg.num_rows(), 4);
        let expected = schema
            .row()
            .encode(&vec![Value::Int(2), Value::from("bob"), Value::Uint(2)])
            .unwrap();
        assert_eq!(seg.get_row(&schema, 2).unwrap(), expected);
        assert_eq!(seg.index_lookup(1, &name_key(&schema, "alice")), [1, 3]);

        seg.remove(1).unwrap();
        assert!(matches!(seg.remove(1), Err(CoreError::RowDeleted { .. })));
        assert_eq!(seg.live_rows(), 3);
        assert_eq!(seg.index_lookup(1, &name_key(&schema, "alice")), [3]);
        assert!(seg.index_has_live(1, &name_key(&schema, "alice"), None));
        assert!(!seg.index_has_live(1, &name_key(&schema, "alice"), Some(3)));
    }

    #[test]
    fn readonly_inplace_update_persists() {
        let schema = schema();
        let (_root, seg) = build_readonly(&schema, &["a", "b"]);
        let (g, _) = schema.column_location(2);
        seg.update_colgroup(1, g, &99u32.to_le_bytes()).unwrap();
        seg.remove(0).unwrap();
        seg.flush(false).unwrap();
        let dir = seg.dir().to_path_buf();
        drop(seg);

        let seg =
            Segment::open(&dir, SegmentKind::Readonly, SegmentId::new(2), &schema, false).unwrap();
        let mut value = Vec::new();
        seg.get_colgroup_value(1, g, &mut value).unwrap();
        assert_eq!(value, 99u32.to_le_bytes());
        assert!(seg.is_deleted(0));
        let (id_group, _) = schema.column_location(0);
        assert!(seg.update_colgroup(1, id_group, &[0; 8]).is_err());
    }

    #[test]
    fn cursors_skip_deleted_rows() {
        let schema = schema();
        let (_root, seg) = build_readonly(&schema, &["m", "c", "x", "c", "a"]);
        seg.remove(3).unwrap();

        let mut forward = SegmentCursor::new(Arc::clone(&seg), 1, true);
        let ids: Vec<u32> = drain(&mut forward).into_iter().map(|(_, id)| id).collect();
        assert_eq!(ids, [4, 1, 0, 2]);

        let mut backward = SegmentCursor::new(Arc::clone(&seg), 1, false);
        let ids: Vec<u32> = drain(&mut backward).into_iter().map(|(_, id)| id).collect();
        assert_eq!(ids, [2, 0, 1, 4]);

        let (key, id) = forward.seek(&name_key(&schema, "d")).unwrap();
        assert_eq!((key.to_vec(), id), (name_key(&schema, "m"), 0));
        let (key, id) = backward.seek(&name_key(&schema, "d")).unwrap();
        assert_eq!((key.to_vec(), id), (name_key(&schema, "c"), 1));
        assert!(forward.seek(&name_key(&schema, "y")).is_none());
        assert!(backward.seek(&name_key(&schema, "0")).is_none());
    }

    #[test]
    fn writable_cursor_and_match() {
        let root = tempdir().unwrap();
        let schema = schema();
        let dir = root.path().join("wr-000001");
        let seg = Segment::create_writable(&dir, SegmentId::new(1), Arc::clone(&schema)).unwrap();
        let seg = Arc::new(seg);
        let Some(w) = seg.as_writable() else {
            panic!("expected writable segment");
        };
        for (i, name) in ["bo", "al", "bob", "al"].iter().enumerate() {
            w.append(&row(&schema, i as i64, name)).unwrap();
        }
        seg.remove(1).unwrap();

        let mut backward = SegmentCursor::new(Arc::clone(&seg), 1, false);
        let ids: Vec<u32> = drain(&mut backward).into_iter().map(|(_, id)| id).collect();
        assert_eq!(ids, [2, 0, 3]);

        let matcher = KeyMatcher::prefix(schema.index(1), "bo").unwrap();
        let mut budget = MatchBudget::new(1 << 20);
        assert_eq!(seg.index_match(1, &matcher, &mut budget).unwrap(), [0, 2]);
        let mut tiny = MatchBudget::new(2);
        assert!(matches!(
            seg.index_match(1, &matcher, &mut tiny),
            Err(CoreError::MatchBudgetExceeded { .. })
        ));
    }

    #[test]
    fn retired_segment_removes_directory() {
        let schema = schema();
        let (_root, seg) = build_readonly(&schema, &["a"]);
        let dir = seg.dir().to_path_buf();
        let reader = Arc::clone(&seg);
        seg.retire();
        drop(seg);
        assert!(dir.exists());
        assert_eq!(reader.state(), SegmentState::Purged);
        drop(reader);
        assert!(!dir.exists());
    }

    #[test]
    fn failed_build_publishes_nothing() {
        let root = tempdir().unwrap();
        let schema = schema();
        let temp = root.path().join("rd-000009.tmp");
        std::fs::write(&temp, b"in the way").unwrap();
        let mut builder = SegmentBuilder::new(Arc::clone(&schema));
        builder.push(row(&schema, 1, "a"));
        let dest = root.path().join("rd-000009");
        let options = BuildOptions::from(&crate::TableConfig::default());
        assert!(builder
            .finish(&temp, &dest, SegmentId::new(9), &options, false)
            .is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn duplicate_unique_key_fails_build() {
        let root = tempdir().unwrap();
        let schema = schema();
        let mut builder = SegmentBuilder::new(Arc::clone(&schema));
        builder.push(row(&schema, 1, "a"));
        builder.push(row(&schema, 1, "b"));
        let temp = root.path().join("rd-000003.tmp");
        let options = BuildOptions::from(&crate::TableConfig::default());
        let dest = root.path().join("rd-000003");
        let result = builder.finish(&temp, &dest, SegmentId::new(3), &options, false);
        assert!(matches!(result, Err(CoreError::DuplicateKey { .. })));
        assert!(!temp.exists());
    }
}
