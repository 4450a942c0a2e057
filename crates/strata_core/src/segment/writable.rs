//! Mutable segment receiving new rows.
//!
//! Column groups live in growable mapped stores and every index is a
//! [`MemIndex`] holding exactly the live rows. Indexes are not persisted;
//! reopening a segment rebuilds them from the stores.

use super::{BookedOp, DeletionBitmap, SegmentMeta};
use crate::error::{CoreError, CoreResult};
use crate::index::MemIndex;
use crate::limit::{MemoryGrant, MemoryLimit};
use crate::schema::{PreparedRow, TableSchema};
use crate::store::{ColgroupStore, ReadableStore, WritableStore};
use crate::types::{RecordId, SegmentId, SegmentKind};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug)]
struct WritableMeta {
    rows: u32,
    deletion: DeletionBitmap,
    booking: Option<Vec<BookedOp>>,
}

/// An append-friendly segment.
#[derive(Debug)]
pub struct WritableSegment {
    id: SegmentId,
    dir: PathBuf,
    schema: Arc<TableSchema>,
    stores: Vec<ColgroupStore>,
    indexes: Vec<RwLock<MemIndex>>,
    meta: RwLock<WritableMeta>,
    charge: Mutex<Option<MemoryGrant>>,
    created: Instant,
}

impl WritableSegment {
    /// Creates an empty segment in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or store files cannot be created.
    pub fn create(dir: &Path, id: SegmentId, schema: Arc<TableSchema>) -> CoreResult<Self> {
        std::fs::create_dir_all(dir)?;
        let stores = schema
            .colgroups()
            .iter()
            .enumerate()
            .map(|(g, cg)| ColgroupStore::create_writable(dir, g, cg))
            .collect::<CoreResult<Vec<_>>>()?;
        SegmentMeta {
            kind: SegmentKind::Writable,
            id,
            rows: 0,
        }
        .save(dir, true)?;
        debug!(segment = %id, dir = %dir.display(), "created writable segment");
        Ok(Self::assemble(id, dir, schema, stores, 0, DeletionBitmap::new()))
    }

    /// Opens an existing segment and rebuilds its indexes.
    ///
    /// Rows appended to some but not all stores before a crash are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is missing or corrupted.
    pub fn open(dir: &Path, id: SegmentId, schema: Arc<TableSchema>) -> CoreResult<Self> {
        SegmentMeta::load(dir, SegmentKind::Writable, id)?;
        let stores = schema
            .colgroups()
            .iter()
            .enumerate()
            .map(|(g, cg)| ColgroupStore::open_writable(dir, g, cg))
            .collect::<CoreResult<Vec<_>>>()?;
        let rows = stores.iter().map(ReadableStore::num_data_rows).min().unwrap_or(0);
        for store in &stores {
            let Some(writer) = store.as_writable() else {
                return Err(CoreError::segment_corruption("writable segment store is frozen"));
            };
            for extra in (rows..store.num_data_rows()).rev() {
                writer.remove(extra)?;
            }
        }
        let rows = u32::try_from(rows)
            .map_err(|_| CoreError::segment_corruption("writable segment row count overflow"))?;
        let deletion = DeletionBitmap::load(dir)?;
        let segment = Self::assemble(id, dir, schema, stores, rows, deletion);
        segment.rebuild_indexes()?;
        Ok(segment)
    }

    fn assemble(
        id: SegmentId,
        dir: &Path,
        schema: Arc<TableSchema>,
        stores: Vec<ColgroupStore>,
        rows: u32,
        deletion: DeletionBitmap,
    ) -> Self {
        let indexes = schema.indexes().iter().map(|_| RwLock::default()).collect();
        Self {
            id,
            dir: dir.to_path_buf(),
            schema,
            stores,
            indexes,
            meta: RwLock::new(WritableMeta {
                rows,
                deletion,
                booking: None,
            }),
            charge: Mutex::new(None),
            created: Instant::now(),
        }
    }

    fn rebuild_indexes(&self) -> CoreResult<()> {
        let meta = self.meta.read();
        for sub_id in 0..meta.rows {
            if meta.deletion.contains(sub_id) {
                continue;
            }
            let row = self.prepare_stored(sub_id)?;
            for (index, key) in self.indexes.iter().zip(row.keys) {
                index.write().insert(key, sub_id);
            }
        }
        Ok(())
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

    /// Returns how long ago the segment was created or opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Returns the number of rows, deleted ones included.
    #[must_use]
    pub fn num_rows(&self) -> u32 {
        self.meta.read().rows
    }

    /// Returns the number of deleted rows.
    #[must_use]
    pub fn num_deleted(&self) -> u64 {
        self.meta.read().deletion.len()
    }

    /// Returns true if `sub_id` is deleted or out of range.
    #[must_use]
    pub fn is_deleted(&self, sub_id: u32) -> bool {
        let meta = self.meta.read();
        sub_id >= meta.rows || meta.deletion.contains(sub_id)
    }

    /// Returns the bytes held by stores and indexes.
    #[must_use]
    pub fn data_size(&self) -> u64 {
        let stores: u64 = self.stores.iter().map(ReadableStore::data_storage_size).sum();
        let indexes: usize = self.indexes.iter().map(|i| i.read().mem_size()).sum();
        stores + indexes as u64
    }

    /// Charges the current [`data_size`](Self::data_size) to `limit`. The
    /// charge is released when the segment is dropped.
    pub fn charge_memory(&self, limit: &Arc<MemoryLimit>) {
        let size = self.data_size();
        let mut charge = self.charge.lock();
        match charge.as_mut() {
            Some(grant) => grant.resize(size),
            None => *charge = Some(limit.charge(size)),
        }
    }

    /// Truncates every store to the bytes in use. Called once the segment
    /// stops receiving appends.
    ///
    /// # Errors
    ///
    /// Returns an error if a store file cannot be resized.
    pub fn shrink_to_fit(&self) -> CoreResult<()> {
        for store in &self.stores {
            if let Some(writer) = store.as_writable() {
                writer.shrink_to_fit()?;
            }
        }
        Ok(())
    }

    /// Returns the stores, one per column group.
    #[must_use]
    pub fn stores(&self) -> &[ColgroupStore] {
        &self.stores
    }

    /// Read access to index `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    pub fn index(&self, i: usize) -> RwLockReadGuard<'_, MemIndex> {
        self.indexes[i].read()
    }

    fn writer(&self, g: usize) -> CoreResult<&dyn WritableStore> {
        self.stores[g].as_writable().ok_or_else(|| {
            CoreError::invalid_operation(format!("column group {g} of {} is frozen", self.id))
        })
    }

    fn check_live(meta: &WritableMeta, sub_id: u32) -> CoreResult<()> {
        let id = RecordId::new(u64::from(sub_id));
        if sub_id >= meta.rows {
            return Err(CoreError::RowNotFound { id });
        }
        if meta.deletion.contains(sub_id) {
            return Err(CoreError::RowDeleted { id });
        }
        Ok(())
    }

    fn duplicate(&self, i: usize, key: &[u8]) -> CoreError {
        CoreError::DuplicateKey {
            index: self.schema.index(i).name.clone(),
            key: key.to_vec(),
        }
    }

    /// Reads the column group values of `sub_id` without checking deletion.
    ///
    /// # Errors
    ///
    /// Returns an error if a stored value cannot be read.
    pub fn read_colgroups(&self, sub_id: u32) -> CoreResult<Vec<Vec<u8>>> {
        self.stores
            .iter()
            .map(|store| store.get_value(sub_id as usize))
            .collect()
    }

    fn prepare_stored(&self, sub_id: u32) -> CoreResult<PreparedRow> {
        let row = self.schema.combine_colgroups(&self.read_colgroups(sub_id)?)?;
        self.schema.prepare_row(&row)
    }

    /// Returns true if a live row holds `key` in index `i`.
    #[must_use]
    pub fn index_has_key(&self, i: usize, key: &[u8]) -> bool {
        self.indexes[i].read().contains_key(key)
    }

    /// Returns the live rows holding `key` in index `i`, ascending.
    #[must_use]
    pub fn index_lookup(&self, i: usize, key: &[u8]) -> Vec<u32> {
        self.indexes[i].read().ids_of(key)
    }

    /// Appends a row and returns its sub-id.
    ///
    /// Stores are written first, then unique indexes, then the rest. A
    /// duplicate unique key undoes everything written so far.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if a unique index already holds
    /// one of the row's keys, or an error if a store cannot grow.
    pub fn append(&self, row: &PreparedRow) -> CoreResult<u32> {
        let mut meta = self.meta.write();
        let sub_id = meta.rows;
        for (g, value) in row.colgroups.iter().enumerate() {
            let appended = self.writer(g).and_then(|w| w.append(value));
            match appended {
                Ok(id) => assert_eq!(id, sub_id, "store {g} out of step with segment rows"),
                Err(err) => {
                    self.rollback_stores(g, sub_id);
                    return Err(err);
                }
            }
        }

        let unique = self.schema.indexes().iter().map(|i| i.unique);
        let (unique, plain): (Vec<_>, Vec<_>) = (0..self.indexes.len())
            .zip(unique)
            .partition(|&(_, is_unique)| is_unique);
        let mut inserted: Vec<usize> = Vec::with_capacity(unique.len());
        for (i, _) in unique {
            let key = &row.keys[i];
            let mut index = self.indexes[i].write();
            if index.contains_key(key) {
                drop(index);
                for &done in &inserted {
                    self.indexes[done].write().remove(&row.keys[done], sub_id);
                }
                self.rollback_stores(row.colgroups.len(), sub_id);
                return Err(self.duplicate(i, key));
            }
            index.insert(key.clone(), sub_id);
            inserted.push(i);
        }
        for (i, _) in plain {
            self.indexes[i].write().insert(row.keys[i].clone(), sub_id);
        }
        meta.rows += 1;
        Ok(sub_id)
    }

    fn rollback_stores(&self, count: usize, sub_id: u32) {
        for g in 0..count {
            if let Err(err) = self.writer(g).and_then(|w| w.remove(sub_id as usize)) {
                warn!(segment = %self.id, colgroup = g, error = %err, "store rollback failed");
            }
        }
    }

    /// Overwrites a live row in place, keeping its sub-id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if a changed unique key is held by
    /// another row, [`CoreError::RowDeleted`] / [`CoreError::RowNotFound`] for
    /// a dead id, or [`CoreError::InvalidOperation`] while the segment is
    /// being compacted.
    pub fn update(&self, sub_id: u32, row: &PreparedRow) -> CoreResult<()> {
        let meta = self.meta.write();
        Self::check_live(&meta, sub_id)?;
        if meta.booking.is_some() {
            return Err(CoreError::invalid_operation(format!(
                "{} is being compacted; rows cannot be rewritten in place",
                self.id
            )));
        }
        let old = self.prepare_stored(sub_id)?;
        for (i, def) in self.schema.indexes().iter().enumerate() {
            let key = &row.keys[i];
            if def.unique && *key != old.keys[i] && self.index_has_key(i, key) {
                return Err(self.duplicate(i, key));
            }
        }

        for (g, value) in row.colgroups.iter().enumerate() {
            if *value == old.colgroups[g] {
                continue;
            }
            if let Err(err) = self.writer(g).and_then(|w| w.update(sub_id as usize, value)) {
                for (undo, previous) in old.colgroups.iter().enumerate().take(g) {
                    let restored =
                        self.writer(undo).and_then(|w| w.update(sub_id as usize, previous));
                    if let Err(e) = restored {
                        warn!(segment = %self.id, colgroup = undo, error = %e, "rollback failed");
                    }
                }
                return Err(err);
            }
        }
        for (i, index) in self.indexes.iter().enumerate() {
            if row.keys[i] != old.keys[i] {
                let mut index = index.write();
                index.remove(&old.keys[i], sub_id);
                index.insert(row.keys[i].clone(), sub_id);
            }
        }
        Ok(())
    }

    /// Overwrites the value of column group `g` of a live row.
    ///
    /// The caller guarantees no index covers the group.
    ///
    /// # Errors
    ///
    /// Returns an error for a dead id or a failed write.
    pub fn update_colgroup(&self, sub_id: u32, g: usize, value: &[u8]) -> CoreResult<()> {
        let mut meta = self.meta.write();
        Self::check_live(&meta, sub_id)?;
        self.writer(g)?.update(sub_id as usize, value)?;
        if let Some(booked) = meta.booking.as_mut() {
            booked.push(BookedOp::UpdateColgroup {
                sub_id,
                colgroup: g,
                value: value.to_vec(),
            });
        }
        Ok(())
    }

    /// Tombstones a live row and drops its index entries.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RowDeleted`] / [`CoreError::RowNotFound`] for a
    /// dead id.
    pub fn remove(&self, sub_id: u32) -> CoreResult<()> {
        let mut meta = self.meta.write();
        Self::check_live(&meta, sub_id)?;
        let old = self.prepare_stored(sub_id)?;
        for (index, key) in self.indexes.iter().zip(&old.keys) {
            index.write().remove(key, sub_id);
        }
        meta.deletion.set(sub_id);
        if let Some(booked) = meta.booking.as_mut() {
            booked.push(BookedOp::Remove(sub_id));
        }
        Ok(())
    }

    /// Reads column group `g` of a live row into `out`.
    ///
    /// # Errors
    ///
    /// Returns an error for a dead id or an unreadable value.
    pub fn get_colgroup_value(&self, sub_id: u32, g: usize, out: &mut Vec<u8>) -> CoreResult<()> {
        let meta = self.meta.read();
        Self::check_live(&meta, sub_id)?;
        self.stores[g].get_value_append(sub_id as usize, out)
    }

    /// Starts recording mutations and returns the row count and deletions
    /// a rebuild should work from.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if booking is already on.
    pub fn start_booking(&self) -> CoreResult<(u32, DeletionBitmap)> {
        let mut meta = self.meta.write();
        if meta.booking.is_some() {
            return Err(CoreError::invalid_operation(format!("{} is already booking", self.id)));
        }
        meta.booking = Some(Vec::new());
        Ok((meta.rows, meta.deletion.clone()))
    }

    /// Stops recording and returns the mutations made since booking started.
    pub fn finish_booking(&self) -> Vec<BookedOp> {
        self.meta.write().booking.take().unwrap_or_default()
    }

    /// Persists dirty pages and the deletion bitmap.
    ///
    /// # Errors
    ///
    /// Returns an error if a flush fails.
    pub fn flush(&self, sync: bool) -> CoreResult<()> {
        let meta = self.meta.read();
        for store in &self.stores {
            if let Some(writer) = store.as_writable() {
                writer.flush()?;
            }
        }
        meta.deletion.save(&self.dir, sync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchemaDef;
    use strata_codec::{ColumnMeta, ColumnType, RowCodec, Value};
    use tempfile::tempdir;

    fn schema() -> Arc<TableSchema> {
        Arc::new(
            TableSchemaDef::new(vec![
                ColumnMeta::new("id", ColumnType::Sint64),
                ColumnMeta::new("name", ColumnType::StrZero),
                ColumnMeta::new("hits", ColumnType::Uint32).inplace(),
            ])
            .index("pk", &["id"], true)
            .index("by_name", &["name"], false)
            .build()
            .unwrap(),
        )
    }

    fn row(schema: &TableSchema, id: i64, name: &str) -> PreparedRow {
        let record = vec![Value::Int(id), Value::from(name), Value::Uint(0)];
        schema.prepare_row(&schema.row().encode(&record).unwrap()).unwrap()
    }

    fn key(schema: &TableSchema, i: usize, value: Value) -> Vec<u8> {
        schema.index(i).encode_key(&[value]).unwrap()
    }

    fn dir_bytes(dir: &Path) -> u64 {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().metadata().unwrap().len())
            .sum()
    }

    #[test]
    fn shrink_to_fit_releases_spare_capacity() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let seg = WritableSegment::create(dir.path(), SegmentId::new(1), schema.clone()).unwrap();
        seg.append(&row(&schema, 1, "a")).unwrap();
        seg.append(&row(&schema, 2, "b")).unwrap();
        let before = dir_bytes(dir.path());
        let first = seg.read_colgroups(0).unwrap();

        seg.shrink_to_fit().unwrap();
        assert!(dir_bytes(dir.path()) < before);
        assert_eq!(seg.append(&row(&schema, 3, "c")).unwrap(), 2);
        assert_eq!(seg.index_lookup(0, &key(&schema, 0, Value::Int(2))), [1]);
        assert_eq!(seg.read_colgroups(0).unwrap(), first);
        assert_eq!(seg.num_rows(), 3);
    }

    #[test]
    fn append_and_lookup() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let seg = WritableSegment::create(dir.path(), SegmentId::new(1), schema.clone()).unwrap();
        assert_eq!(seg.append(&row(&schema, 10, "ann")).unwrap(), 0);
        assert_eq!(seg.append(&row(&schema, 11, "bob")).unwrap(), 1);
        assert_eq!(seg.append(&row(&schema, 12, "ann")).unwrap(), 2);
        assert_eq!(seg.num_rows(), 3);
        assert_eq!(seg.index_lookup(1, &key(&schema, 1, Value::from("ann"))), [0, 2]);

        let err = seg.append(&row(&schema, 11, "dup")).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKey { ref index, .. } if index == "pk"));
        assert_eq!(seg.num_rows(), 3);
        assert!(seg.stores().iter().all(|s| s.num_data_rows() == 3));
        assert!(!seg.index_has_key(1, &key(&schema, 1, Value::from("dup"))));
    }

    #[test]
    fn remove_frees_unique_key() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let seg = WritableSegment::create(dir.path(), SegmentId::new(1), schema.clone()).unwrap();
        seg.append(&row(&schema, 1, "a")).unwrap();
        seg.remove(0).unwrap();
        assert!(seg.is_deleted(0));
        assert!(matches!(seg.remove(0), Err(CoreError::RowDeleted { .. })));
        assert!(matches!(seg.remove(5), Err(CoreError::RowNotFound { .. })));
        assert_eq!(seg.append(&row(&schema, 1, "a")).unwrap(), 1);
        assert_eq!(seg.index_lookup(0, &key(&schema, 0, Value::Int(1))), [1]);
    }

    #[test]
    fn update_in_place() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let seg = WritableSegment::create(dir.path(), SegmentId::new(1), schema.clone()).unwrap();
        seg.append(&row(&schema, 1, "a")).unwrap();
        seg.append(&row(&schema, 2, "b")).unwrap();
        assert!(matches!(
            seg.update(0, &row(&schema, 2, "a")),
            Err(CoreError::DuplicateKey { .. })
        ));
        seg.update(0, &row(&schema, 3, "c")).unwrap();
        assert!(!seg.index_has_key(0, &key(&schema, 0, Value::Int(1))));
        assert_eq!(seg.index_lookup(0, &key(&schema, 0, Value::Int(3))), [0]);
        assert_eq!(seg.index_lookup(1, &key(&schema, 1, Value::from("c"))), [0]);
    }

    #[test]
    fn reopen_rebuilds_indexes() {
        let dir = tempdir().unwrap();
        let schema = schema();
        {
            let seg =
                WritableSegment::create(dir.path(), SegmentId::new(4), schema.clone()).unwrap();
            for i in 0..5 {
                seg.append(&row(&schema, i, "x")).unwrap();
            }
            seg.remove(2).unwrap();
            seg.flush(false).unwrap();
        }
        let seg = WritableSegment::open(dir.path(), SegmentId::new(4), schema.clone()).unwrap();
        assert_eq!(seg.num_rows(), 5);
        assert_eq!(seg.num_deleted(), 1);
        assert_eq!(seg.index_lookup(1, &key(&schema, 1, Value::from("x"))), [0, 1, 3, 4]);
        assert!(WritableSegment::open(dir.path(), SegmentId::new(5), schema).is_err());
    }

    #[test]
    fn booking_records_mutations() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let seg = WritableSegment::create(dir.path(), SegmentId::new(1), schema.clone()).unwrap();
        for i in 0..3 {
            seg.append(&row(&schema, i, "r")).unwrap();
        }
        let (rows, deleted) = seg.start_booking().unwrap();
        assert_eq!(rows, 3);
        assert!(deleted.is_empty());
        assert!(seg.start_booking().is_err());
        assert!(seg.update(0, &row(&schema, 0, "z")).is_err());

        let (hits_group, _) = schema.column_location(2);
        seg.update_colgroup(1, hits_group, &7u32.to_le_bytes()).unwrap();
        seg.remove(2).unwrap();
        let booked = seg.finish_booking();
        assert_eq!(booked.len(), 2);
        assert_eq!(booked[1], BookedOp::Remove(2));
        assert!(seg.finish_booking().is_empty());
    }
}
