//! Immutable, compressed segment produced by compaction.

use super::{BookedOp, DeletionBitmap, SegmentMeta};
use crate::error::{CoreError, CoreResult};
use crate::index::{KeyMatcher, MatchBudget, ReadonlyIndex, SortedIndex};
use crate::schema::TableSchema;
use crate::store::{ColgroupStore, ReadableStore};
use crate::types::{RecordId, SegmentId, SegmentKind};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Default)]
struct DeletionState {
    bitmap: DeletionBitmap,
    booking: Option<Vec<BookedOp>>,
    dirty: bool,
}

/// A compacted segment.
///
/// Stores and indexes never change; rows are only tombstoned. Column groups
/// that are inplace-updatable stay mutably mapped.
#[derive(Debug)]
pub struct ReadonlySegment {
    id: SegmentId,
    dir: PathBuf,
    rows: u32,
    stores: Vec<ColgroupStore>,
    indexes: Vec<ReadonlyIndex>,
    deletion: RwLock<DeletionState>,
}

impl ReadonlySegment {
    /// Opens a published segment directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is missing, corrupted or disagrees with
    /// the descriptor's row count.
    pub fn open(
        dir: &Path,
        id: SegmentId,
        schema: &Arc<TableSchema>,
        populate: bool,
    ) -> CoreResult<Self> {
        let meta = SegmentMeta::load(dir, SegmentKind::Readonly, id)?;
        let rows = u32::try_from(meta.rows)
            .map_err(|_| CoreError::segment_corruption("readonly segment row count overflow"))?;
        let stores = schema
            .colgroups()
            .iter()
            .enumerate()
            .map(|(g, cg)| ColgroupStore::open_readonly(dir, g, cg, populate))
            .collect::<CoreResult<Vec<_>>>()?;
        let indexes = schema
            .indexes()
            .iter()
            .enumerate()
            .map(|(i, def)| ReadonlyIndex::open(dir, i, def, populate))
            .collect::<CoreResult<Vec<_>>>()?;
        for (g, store) in stores.iter().enumerate() {
            if store.num_data_rows() != rows as usize {
                return Err(CoreError::segment_corruption(format!(
                    "{id}: column group {g} holds {} rows, segment has {rows}",
                    store.num_data_rows()
                )));
            }
        }
        for (i, index) in indexes.iter().enumerate() {
            if index.num_rows() != rows as usize {
                return Err(CoreError::segment_corruption(format!(
                    "{id}: index {i} covers {} rows, segment has {rows}",
                    index.num_rows()
                )));
            }
        }
        let bitmap = DeletionBitmap::load(dir)?;
        if bitmap.max().is_some_and(|last| last >= rows) {
            return Err(CoreError::segment_corruption(format!(
                "{id}: deletion bitmap exceeds {rows} rows"
            )));
        }
        Ok(Self {
            id,
            dir: dir.to_path_buf(),
            rows,
            stores,
            indexes,
            deletion: RwLock::new(DeletionState {
                bitmap,
                ..DeletionState::default()
            }),
        })
    }

    /// Returns the segment id.
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Returns the segment directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the number of rows, deleted ones included.
    #[must_use]
    pub fn num_rows(&self) -> u32 {
        self.rows
    }

    /// Returns the number of deleted rows.
    #[must_use]
    pub fn num_deleted(&self) -> u64 {
        self.deletion.read().bitmap.len()
    }

    /// Returns true if `sub_id` is deleted or out of range.
    #[must_use]
    pub fn is_deleted(&self, sub_id: u32) -> bool {
        sub_id >= self.rows || self.deletion.read().bitmap.contains(sub_id)
    }

    /// Returns the bytes held by stores.
    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.stores.iter().map(ReadableStore::data_storage_size).sum()
    }

    /// Returns the stores, one per column group.
    #[must_use]
    pub fn stores(&self) -> &[ColgroupStore] {
        &self.stores
    }

    /// Returns index `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    #[must_use]
    pub fn index(&self, i: usize) -> &ReadonlyIndex {
        &self.indexes[i]
    }

    fn check_live(&self, state: &DeletionState, sub_id: u32) -> CoreResult<()> {
        let id = RecordId::new(u64::from(sub_id));
        if sub_id >= self.rows {
            return Err(CoreError::RowNotFound { id });
        }
        if state.bitmap.contains(sub_id) {
            return Err(CoreError::RowDeleted { id });
        }
        Ok(())
    }

    /// Reads the column group values of `sub_id` without checking deletion.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored value cannot be decoded.
    pub fn read_colgroups(&self, sub_id: u32) -> CoreResult<Vec<Vec<u8>>> {
        self.stores
            .iter()
            .map(|store| store.get_value(sub_id as usize))
            .collect()
    }

    /// Reads column group `g` of a live row into `out`.
    ///
    /// # Errors
    ///
    /// Returns an error for a dead id or an undecodable value.
    pub fn get_colgroup_value(&self, sub_id: u32, g: usize, out: &mut Vec<u8>) -> CoreResult<()> {
        self.check_live(&self.deletion.read(), sub_id)?;
        self.stores[g].get_value_append(sub_id as usize, out)
    }

    /// Returns the live rows holding `key` in index `i`, ascending.
    #[must_use]
    pub fn index_lookup(&self, i: usize, key: &[u8]) -> Vec<u32> {
        let mut rows = self.indexes[i].search_exact(key);
        let state = self.deletion.read();
        rows.retain(|&r| !state.bitmap.contains(r));
        rows
    }

    /// Returns true if a live row other than `exclude` holds `key` in
    /// index `i`.
    #[must_use]
    pub fn index_has_live(&self, i: usize, key: &[u8], exclude: Option<u32>) -> bool {
        let index = &self.indexes[i];
        let Some(ord) = index.find(key) else {
            return false;
        };
        let state = self.deletion.read();
        index
            .postings()
            .rows_of(ord)
            .any(|r| Some(r) != exclude && !state.bitmap.contains(r))
    }

    /// Collects live rows of index `i` selected by `matcher`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MatchBudgetExceeded`] if the budget runs out.
    pub fn index_match(
        &self,
        i: usize,
        matcher: &KeyMatcher,
        budget: &mut MatchBudget,
    ) -> CoreResult<Vec<u32>> {
        let mut rows = Vec::new();
        matcher.collect(&self.indexes[i], budget, &mut rows)?;
        let state = self.deletion.read();
        rows.retain(|&r| !state.bitmap.contains(r));
        Ok(rows)
    }

    /// Tombstones a live row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RowDeleted`] / [`CoreError::RowNotFound`] for a
    /// dead id.
    pub fn remove(&self, sub_id: u32) -> CoreResult<()> {
        let mut state = self.deletion.write();
        self.check_live(&state, sub_id)?;
        state.bitmap.set(sub_id);
        state.dirty = true;
        if let Some(booked) = state.booking.as_mut() {
            booked.push(BookedOp::Remove(sub_id));
        }
        Ok(())
    }

    /// Overwrites column group `g` of a live row in an inplace-updatable
    /// group.
    ///
    /// # Errors
    ///
    /// Returns an error for a dead id, or if the group is not mutably mapped.
    pub fn update_colgroup(&self, sub_id: u32, g: usize, value: &[u8]) -> CoreResult<()> {
        let mut state = self.deletion.write();
        self.check_live(&state, sub_id)?;
        let Some(writer) = self.stores[g].as_writable() else {
            return Err(CoreError::invalid_operation(format!(
                "column group {g} of {} is not inplace-updatable",
                self.id
            )));
        };
        writer.update(sub_id as usize, value)?;
        if let Some(booked) = state.booking.as_mut() {
            booked.push(BookedOp::UpdateColgroup {
                sub_id,
                colgroup: g,
                value: value.to_vec(),
            });
        }
        Ok(())
    }

    /// Starts recording mutations and returns the deletions a rebuild
    /// should work from.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if booking is already on.
    pub fn start_booking(&self) -> CoreResult<(u32, DeletionBitmap)> {
        let mut state = self.deletion.write();
        if state.booking.is_some() {
            return Err(CoreError::invalid_operation(format!("{} is already booking", self.id)));
        }
        state.booking = Some(Vec::new());
        Ok((self.rows, state.bitmap.clone()))
    }

    /// Stops recording and returns the mutations made since booking started.
    pub fn finish_booking(&self) -> Vec<BookedOp> {
        self.deletion.write().booking.take().unwrap_or_default()
    }

    /// Persists inplace columns and, if changed, the deletion bitmap.
    ///
    /// # Errors
    ///
    /// Returns an error if a write fails.
    pub fn flush(&self, sync: bool) -> CoreResult<()> {
        for store in &self.stores {
            if let Some(writer) = store.as_writable() {
                writer.flush()?;
            }
        }
        let mut state = self.deletion.write();
        if state.dirty {
            state.bitmap.save(&self.dir, sync)?;
            state.dirty = false;
        }
        Ok(())
    }
}
