//! The composite table: an ordered list of segments sharing one record id
//! space.
//!
//! Segment `i` owns the record ids `row_num_vec[i]..row_num_vec[i + 1]`,
//! where `row_num_vec` is the prefix sum of segment row counts. New rows
//! always go to the last segment, which is writable. Compaction replaces
//! segments with shorter readonly ones, shifting the ids of everything
//! after them; each swap bumps the table generation so cached ids can be
//! validated.
//!
//! # Locking
//!
//! Mutations are serialized by one table mutex. The segment list is behind
//! a read/write lock held only for lookups and swaps, never across I/O.

mod iter;

pub use iter::{IndexIter, TableScan};

use crate::compaction::{self, CompactionService};
use crate::config::TableConfig;
use crate::dir::TableDir;
use crate::error::{CoreError, CoreResult};
use crate::index::{KeyMatcher, MatchBudget};
use crate::manifest::{segment_dir_name, Manifest, SegmentEntry};
use crate::schema::{TableSchema, TableSchemaDef};
use crate::segment::{Segment, SegmentCursor};
use crate::size_storer::SizeStorer;
use crate::stats::TableStats;
use crate::types::{RecordId, RowRef, SegmentId, SegmentKind, SegmentState, VersionedId};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Segment list and id routing, swapped as a unit.
#[derive(Debug)]
pub(crate) struct TableState {
    pub(crate) segments: Vec<Arc<Segment>>,
    /// Prefix sums of segment row counts; one longer than `segments`.
    pub(crate) row_num_vec: Vec<u64>,
    pub(crate) generation: u64,
    pub(crate) next_segment_id: u64,
}

impl TableState {
    pub(crate) fn recompute_row_nums(&mut self) {
        let mut total = 0u64;
        self.row_num_vec.clear();
        self.row_num_vec.push(0);
        for seg in &self.segments {
            total += u64::from(seg.num_rows());
            self.row_num_vec.push(total);
        }
    }

    pub(crate) fn manifest(&self) -> Manifest {
        self.manifest_with(&self.segments, self.generation)
    }

    /// The manifest this state would have after publishing `segments` at
    /// `generation`.
    pub(crate) fn manifest_with(&self, segments: &[Arc<Segment>], generation: u64) -> Manifest {
        Manifest {
            segments: segments
                .iter()
                .map(|s| SegmentEntry {
                    kind: s.kind(),
                    id: s.id(),
                })
                .collect(),
            next_segment_id: self.next_segment_id,
            generation,
        }
    }

    pub(crate) fn allocate_segment_id(&mut self) -> SegmentId {
        let id = SegmentId::new(self.next_segment_id);
        self.next_segment_id += 1;
        id
    }

    /// Maps a record id to `(segment index, sub_id)`.
    fn resolve(&self, id: RecordId) -> CoreResult<(usize, u32)> {
        let raw = id.as_u64();
        let i = self.row_num_vec.partition_point(|&base| base <= raw);
        if i == 0 || i > self.segments.len() || raw >= self.row_num_vec[i] {
            return Err(CoreError::RowNotFound { id });
        }
        let seg = i - 1;
        Ok((seg, (raw - self.row_num_vec[seg]) as u32))
    }

    fn position_of(&self, id: SegmentId) -> Option<usize> {
        self.segments.iter().position(|s| s.id() == id)
    }
}

/// Segments and their base record ids at one generation.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub(crate) segments: Vec<Arc<Segment>>,
    pub(crate) bases: Vec<u64>,
    pub(crate) generation: u64,
}

/// State shared between a table handle and its compaction workers.
#[derive(Debug)]
pub(crate) struct TableShared {
    pub(crate) dir: TableDir,
    pub(crate) schema: Arc<TableSchema>,
    pub(crate) config: TableConfig,
    pub(crate) state: RwLock<TableState>,
    /// Serializes mutations and segment swaps.
    pub(crate) write_lock: Mutex<()>,
    pub(crate) stats: TableStats,
    pub(crate) sizes: SizeStorer,
    pub(crate) closed: AtomicBool,
}

impl TableShared {
    pub(crate) fn snapshot(&self) -> Snapshot {
        let state = self.state.read();
        Snapshot {
            segments: state.segments.clone(),
            bases: state.row_num_vec[..state.segments.len()].to_vec(),
            generation: state.generation,
        }
    }

    fn locate(&self, id: RecordId) -> CoreResult<(Arc<Segment>, u32)> {
        let state = self.state.read();
        let (seg, sub_id) = state.resolve(id)?;
        Ok((Arc::clone(&state.segments[seg]), sub_id))
    }

    fn current(&self) -> CoreResult<Arc<Segment>> {
        self.state
            .read()
            .segments
            .last()
            .cloned()
            .ok_or_else(|| CoreError::invalid_operation("table has no writable segment"))
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CoreError::TableClosed)
        } else {
            Ok(())
        }
    }

    fn should_roll(&self, seg: &Segment, force: bool) -> bool {
        let Some(w) = seg.as_writable() else {
            return false;
        };
        let rows = w.num_rows();
        if rows == 0 {
            return false;
        }
        let config = &self.config;
        let age = config.max_writable_segment_age;
        force
            || rows >= config.max_writable_segment_rows
            || w.data_size() >= config.max_writable_segment_bytes
            || (!age.is_zero() && w.age() >= age)
    }

    /// Starts a fresh writable segment if the current one is full, old, or
    /// `force` is set and it holds rows. Returns the segment rolled away.
    pub(crate) fn roll(&self, force: bool) -> CoreResult<Option<Arc<Segment>>> {
        let _guard = self.write_lock.lock();
        let current = self.current()?;
        if !self.should_roll(&current, force) {
            return Ok(None);
        }
        let id = self.state.write().allocate_segment_id();
        let path = self.dir.segment_path(SegmentKind::Writable, id);
        let fresh = Arc::new(Segment::create_writable(&path, id, Arc::clone(&self.schema))?);
        let manifest = {
            let state = self.state.read();
            let mut segments = state.segments.clone();
            segments.push(Arc::clone(&fresh));
            state.manifest_with(&segments, state.generation)
        };
        // The write lock keeps the segment list fixed until the push below.
        self.dir.save_manifest(&manifest)?;
        {
            let mut state = self.state.write();
            state.segments.push(fresh);
            state.recompute_row_nums();
        }
        if let Some(rolled) = current.as_writable() {
            if let Err(err) = rolled.shrink_to_fit() {
                warn!(segment = %current.id(), error = %err, "failed to trim rolled segment");
            }
        }
        self.stats.record_roll();
        debug!(
            rolled = %current.id(),
            current = %id,
            rows = current.num_rows(),
            "rolled writable segment"
        );
        Ok(Some(current))
    }

    /// Flushes every segment and persists the size cache and manifest.
    pub(crate) fn flush(&self) -> CoreResult<()> {
        let snapshot = self.snapshot();
        let sync = self.config.sync_on_flush;
        for seg in &snapshot.segments {
            seg.flush(sync)?;
            let name = segment_dir_name(seg.kind(), seg.id());
            self.sizes.store_to_cache(&name, seg.live_rows(), seg.data_size());
        }
        self.sizes.sync_cache(sync)?;
        let _guard = self.write_lock.lock();
        self.dir.save_manifest(&self.state.read().manifest())
    }
}

/// Public description of one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// Segment id.
    pub id: SegmentId,
    /// Physical kind.
    pub kind: SegmentKind,
    /// Lifecycle state.
    pub state: SegmentState,
    /// First record id of the segment.
    pub base: RecordId,
    /// Row span, deleted rows included.
    pub rows: u32,
    /// Deleted rows.
    pub deleted: u64,
    /// Bytes of data held.
    pub data_size: u64,
    /// Directory name inside the table directory.
    pub dir_name: String,
}

fn relabel(err: CoreError, id: RecordId) -> CoreError {
    match err {
        CoreError::RowDeleted { .. } => CoreError::RowDeleted { id },
        CoreError::RowNotFound { .. } => CoreError::RowNotFound { id },
        other => other,
    }
}

/// A table of rows split across writable and readonly segments.
///
/// Rows are flat byte rows in the layout of the table's row schema (see
/// [`strata_codec::RowCodec`]). Record ids are dense: a table's ids are
/// `0..num_rows()`, including deleted rows.
///
/// # Example
///
/// ```rust,ignore
/// use strata_core::{CompositeTable, TableConfig, TableSchemaDef};
///
/// let table = CompositeTable::create(path, def, TableConfig::default())?;
/// let id = table.insert_row(&row)?;
/// assert_eq!(table.get_row(id)?, row);
/// ```
pub struct CompositeTable {
    shared: Arc<TableShared>,
    compactor: CompactionService,
}

impl std::fmt::Debug for CompositeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeTable")
            .field("path", &self.shared.dir.path())
            .field("segments", &self.shared.state.read().segments.len())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl CompositeTable {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Creates a new table at `path` with the given schema.
    ///
    /// # Errors
    ///
    /// Returns an error if a table already exists there, the schema is
    /// invalid, or the directory cannot be set up.
    pub fn create(path: &Path, def: TableSchemaDef, config: TableConfig) -> CoreResult<Self> {
        let dir = TableDir::open(path, config.create_if_missing)?;
        if dir.schema_path().exists() {
            return Err(CoreError::invalid_operation(format!(
                "table already exists: {}",
                path.display()
            )));
        }
        let schema = TableSchema::new(def)?;
        schema.save(&dir.schema_path())?;
        Self::open_dir(dir, schema, config)
    }

    /// Opens an existing table.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is locked, the schema or manifest
    /// is missing or corrupted, or a segment fails to load.
    pub fn open(path: &Path, config: TableConfig) -> CoreResult<Self> {
        let dir = TableDir::open(path, false)?;
        let schema_path = dir.schema_path();
        if !schema_path.exists() {
            return Err(CoreError::invalid_format(format!(
                "no table schema at {}",
                schema_path.display()
            )));
        }
        let schema = TableSchema::load(&schema_path)?;
        Self::open_dir(dir, schema, config)
    }

    /// Opens the table at `path`, creating it with `def` if it does not
    /// exist yet and [`TableConfig::create_if_missing`] is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be opened or created.
    pub fn open_or_create(
        path: &Path,
        def: TableSchemaDef,
        config: TableConfig,
    ) -> CoreResult<Self> {
        if path.join(crate::dir::SCHEMA_FILE).exists() {
            Self::open(path, config)
        } else {
            Self::create(path, def, config)
        }
    }

    fn open_dir(dir: TableDir, schema: TableSchema, config: TableConfig) -> CoreResult<Self> {
        let schema = Arc::new(schema);
        let manifest = dir.load_manifest()?.unwrap_or_default();
        for orphan in dir.remove_orphans(&manifest)? {
            debug!(path = %orphan.display(), "removed orphan segment directory");
        }

        let mut segments = Vec::with_capacity(manifest.segments.len() + 1);
        for entry in &manifest.segments {
            let path = dir.segment_path(entry.kind, entry.id);
            let populate = config.populate_mappings;
            segments.push(Arc::new(Segment::open(&path, entry.kind, entry.id, &schema, populate)?));
        }
        let mut state = TableState {
            segments,
            row_num_vec: Vec::new(),
            generation: manifest.generation,
            next_segment_id: manifest.next_segment_id,
        };
        let needs_writable = state
            .segments
            .last()
            .map_or(true, |s| s.kind() != SegmentKind::Writable);
        if needs_writable {
            let id = state.allocate_segment_id();
            let path = dir.segment_path(SegmentKind::Writable, id);
            state
                .segments
                .push(Arc::new(Segment::create_writable(&path, id, Arc::clone(&schema))?));
        }
        state.recompute_row_nums();
        dir.save_manifest(&state.manifest())?;

        let sizes = SizeStorer::new(dir.sizes_path());
        if let Err(err) = sizes.fill_cache() {
            warn!(error = %err, "ignoring unreadable size cache");
        }

        let pending: Vec<SegmentId> = state.segments[..state.segments.len() - 1]
            .iter()
            .filter(|s| s.kind() == SegmentKind::Writable && s.num_rows() > 0)
            .map(|s| s.id())
            .collect();
        info!(
            path = %dir.path().display(),
            segments = state.segments.len(),
            rows = state.row_num_vec.last().copied().unwrap_or(0),
            generation = state.generation,
            "opened table"
        );

        let shared = Arc::new(TableShared {
            dir,
            schema,
            state: RwLock::new(state),
            write_lock: Mutex::new(()),
            stats: TableStats::new(),
            sizes,
            closed: AtomicBool::new(false),
            config,
        });
        let compactor = CompactionService::start(&shared);
        if shared.config.auto_compact {
            for id in pending {
                compactor.enqueue(id);
            }
        }
        Ok(Self { shared, compactor })
    }

    /// Flushes all segments and the size cache.
    ///
    /// # Errors
    ///
    /// Returns an error if a write fails.
    pub fn flush(&self) -> CoreResult<()> {
        self.shared.ensure_open()?;
        self.shared.flush()
    }

    /// Stops background compaction, letting the in-flight job finish.
    ///
    /// Queued jobs are dropped; their segments stay writable and are queued
    /// again when the table is reopened.
    pub fn safe_stop_and_wait_for_compress(&self) {
        self.compactor.shutdown();
    }

    /// Stops compaction, flushes and closes the table. Closing twice is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub fn close(&self) -> CoreResult<()> {
        self.safe_stop_and_wait_for_compress();
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.flush()?;
        info!(path = %self.shared.dir.path().display(), "closed table");
        Ok(())
    }

    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.shared.schema
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &TableConfig {
        &self.shared.config
    }

    /// Returns the operation counters.
    #[must_use]
    pub fn stats(&self) -> &TableStats {
        &self.shared.stats
    }

    /// Returns the table directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.shared.dir.path()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    fn check_unique(&self, keys: &[Vec<u8>], exclude: Option<(SegmentId, u32)>) -> CoreResult<()> {
        let snapshot = self.shared.snapshot();
        for (i, def) in self.shared.schema.indexes().iter().enumerate() {
            if !def.unique {
                continue;
            }
            for seg in &snapshot.segments {
                let skip = exclude.filter(|(s, _)| *s == seg.id()).map(|(_, sub)| sub);
                if seg.index_has_live(i, &keys[i], skip) {
                    self.shared.stats.record_duplicate_key();
                    return Err(CoreError::DuplicateKey {
                        index: def.name.clone(),
                        key: keys[i].clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn append_locked(&self, row: &crate::schema::PreparedRow) -> CoreResult<RecordId> {
        let current = self.shared.current()?;
        let Some(w) = current.as_writable() else {
            return Err(CoreError::invalid_operation("last segment is not writable"));
        };
        let sub_id = w.append(row)?;
        let mut state = self.shared.state.write();
        let n = state.segments.len();
        state.row_num_vec[n] += 1;
        Ok(RecordId::new(state.row_num_vec[n - 1] + u64::from(sub_id)))
    }

    /// Charges the current segment's growth to the memory gate and rolls
    /// it once it is full. The write that triggered the roll is already
    /// committed, so a failed roll is only logged; the segment stays
    /// writable and the next write retries.
    fn after_write(&self) {
        if let Ok(current) = self.shared.current() {
            if let Some(writable) = current.as_writable() {
                writable.charge_memory(&self.shared.config.memory_limit);
            }
        }
        match self.shared.roll(false) {
            Ok(Some(rolled)) => {
                if self.shared.config.auto_compact {
                    self.compactor.enqueue(rolled.id());
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to roll writable segment"),
        }
    }

    /// Inserts a row and returns its record id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateKey`] if a unique index of any segment
    /// already holds one of the row's keys for a live row.
    pub fn insert_row(&self, row: &[u8]) -> CoreResult<RecordId> {
        self.shared.ensure_open()?;
        let prepared = self.shared.schema.prepare_row(row)?;
        let id = {
            let _guard = self.shared.write_lock.lock();
            self.check_unique(&prepared.keys, None)?;
            self.append_locked(&prepared)?
        };
        self.shared.stats.record_insert(row.len() as u64);
        self.after_write();
        Ok(id)
    }

    /// Replaces a row.
    ///
    /// Rows of the current writable segment are rewritten in place and keep
    /// their id. Anything else is removed and reinserted, and the returned
    /// id is new.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RowDeleted`] / [`CoreError::RowNotFound`] for a
    /// dead id and [`CoreError::DuplicateKey`] on a unique conflict.
    pub fn update_row(&self, id: RecordId, row: &[u8]) -> CoreResult<RecordId> {
        self.shared.ensure_open()?;
        let prepared = self.shared.schema.prepare_row(row)?;
        let new_id = {
            let _guard = self.shared.write_lock.lock();
            let (seg, sub_id) = self.shared.locate(id)?;
            if seg.is_deleted(sub_id) {
                return Err(CoreError::RowDeleted { id });
            }
            self.check_unique(&prepared.keys, Some((seg.id(), sub_id)))?;
            let is_current = Arc::ptr_eq(&seg, &self.shared.current()?);
            match seg.as_writable() {
                Some(w) if is_current && seg.state() == SegmentState::Writable => {
                    w.update(sub_id, &prepared).map_err(|e| relabel(e, id))?;
                    id
                }
                _ => {
                    let new_id = self.append_locked(&prepared)?;
                    seg.remove(sub_id).map_err(|e| relabel(e, id))?;
                    new_id
                }
            }
        };
        self.shared.stats.record_update(row.len() as u64);
        self.after_write();
        Ok(new_id)
    }

    /// Overwrites one column of a row in place.
    ///
    /// `value` is the column payload (the bytes the row codec stores for
    /// the column).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotInplaceUpdatable`] unless the column sits in
    /// an inplace-updatable fixed-length group and no index covers it.
    ///
    /// # Panics
    ///
    /// Panics if `col` is out of range.
    pub fn update_column(&self, id: RecordId, col: usize, value: &[u8]) -> CoreResult<()> {
        self.shared.ensure_open()?;
        let schema = &self.shared.schema;
        let column = schema.row().column(col);
        let (g, pos) = schema.column_location(col);
        let cg = &schema.colgroups()[g];
        if !cg.inplace_updatable || schema.is_indexed(col) {
            return Err(CoreError::NotInplaceUpdatable {
                column: column.name.clone(),
            });
        }
        if Some(value.len()) != column.width() {
            return Err(CoreError::invalid_operation(format!(
                "column '{}' takes {:?} bytes, got {}",
                column.name,
                column.width(),
                value.len()
            )));
        }
        let _guard = self.shared.write_lock.lock();
        let (seg, sub_id) = self.shared.locate(id)?;
        let mut current = Vec::new();
        seg.get_colgroup_value(sub_id, g, &mut current)
            .map_err(|e| relabel(e, id))?;
        let mut payloads = cg.schema.parse_row(&current)?;
        payloads[pos] = value;
        let updated = cg.schema.combine_row(&payloads)?;
        seg.update_colgroup(sub_id, g, &updated)
            .map_err(|e| relabel(e, id))?;
        self.shared.stats.record_column_update();
        Ok(())
    }

    /// Removes a row. Its id stays allocated until compaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RowDeleted`] / [`CoreError::RowNotFound`] for a
    /// dead id.
    pub fn remove_row(&self, id: RecordId) -> CoreResult<()> {
        self.shared.ensure_open()?;
        let _guard = self.shared.write_lock.lock();
        let (seg, sub_id) = self.shared.locate(id)?;
        seg.remove(sub_id).map_err(|e| relabel(e, id))?;
        self.shared.stats.record_remove();
        Ok(())
    }

    // ========================================================================
    // Point reads
    // ========================================================================

    /// Fetches a row.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RowDeleted`] / [`CoreError::RowNotFound`] for a
    /// dead id.
    pub fn get_row(&self, id: RecordId) -> CoreResult<Vec<u8>> {
        self.shared.ensure_open()?;
        let (seg, sub_id) = self.shared.locate(id)?;
        let row = seg
            .get_row(&self.shared.schema, sub_id)
            .map_err(|e| relabel(e, id))?;
        self.shared.stats.record_read(row.len() as u64);
        Ok(row)
    }

    /// Fetches the columns `cols` of a row, encoded as a row of the
    /// projected schema. Only the column groups holding them are read.
    ///
    /// # Errors
    ///
    /// Returns an error for a dead id.
    ///
    /// # Panics
    ///
    /// Panics if a column index is out of range.
    pub fn select_columns(&self, id: RecordId, cols: &[usize]) -> CoreResult<Vec<u8>> {
        self.shared.ensure_open()?;
        let schema = &self.shared.schema;
        let (seg, sub_id) = self.shared.locate(id)?;
        let mut values: Vec<Option<Vec<u8>>> = vec![None; schema.colgroups().len()];
        for &col in cols {
            let (g, _) = schema.column_location(col);
            if values[g].is_none() {
                let mut value = Vec::new();
                seg.get_colgroup_value(sub_id, g, &mut value)
                    .map_err(|e| relabel(e, id))?;
                values[g] = Some(value);
            }
        }
        let row = schema.project_colgroups(cols, &values)?;
        self.shared.stats.record_read(row.len() as u64);
        Ok(row)
    }

    /// Fetches the payload of one column of a row.
    ///
    /// # Errors
    ///
    /// Returns an error for a dead id.
    ///
    /// # Panics
    ///
    /// Panics if `col` is out of range.
    pub fn select_one_column(&self, id: RecordId, col: usize) -> CoreResult<Vec<u8>> {
        self.shared.ensure_open()?;
        let schema = &self.shared.schema;
        let (seg, sub_id) = self.shared.locate(id)?;
        let (g, pos) = schema.column_location(col);
        let mut value = Vec::new();
        seg.get_colgroup_value(sub_id, g, &mut value)
            .map_err(|e| relabel(e, id))?;
        let payload = schema.colgroups()[g].schema.parse_row(&value)?[pos].to_vec();
        self.shared.stats.record_read(payload.len() as u64);
        Ok(payload)
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    /// Returns the position of the index called `name`.
    #[must_use]
    pub fn index_id(&self, name: &str) -> Option<usize> {
        self.shared.schema.index_id(name)
    }

    /// Returns the live rows holding an encoded `key` in index `index`,
    /// ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is closed.
    pub fn index_search_exact(&self, index: usize, key: &[u8]) -> CoreResult<Vec<RecordId>> {
        self.shared.ensure_open()?;
        self.shared.stats.record_index_lookup();
        let snapshot = self.shared.snapshot();
        let mut out = Vec::new();
        for (seg, base) in snapshot.segments.iter().zip(&snapshot.bases) {
            out.extend(
                seg.index_lookup(index, key)
                    .into_iter()
                    .map(|sub| RecordId::new(base + u64::from(sub))),
            );
        }
        Ok(out)
    }

    /// Returns true if a live row holds `key` in index `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is closed.
    pub fn index_key_exists(&self, index: usize, key: &[u8]) -> CoreResult<bool> {
        self.shared.ensure_open()?;
        self.shared.stats.record_index_lookup();
        let snapshot = self.shared.snapshot();
        Ok(snapshot
            .segments
            .iter()
            .any(|seg| seg.index_has_live(index, key, None)))
    }

    fn index_iter(&self, index: usize, forward: bool) -> CoreResult<IndexIter> {
        self.shared.ensure_open()?;
        assert!(index < self.shared.schema.indexes().len(), "index {index} out of range");
        self.shared.stats.record_index_lookup();
        let snapshot = self.shared.snapshot();
        let cursors = snapshot
            .segments
            .iter()
            .zip(snapshot.bases)
            .map(|(seg, base)| (base, SegmentCursor::new(Arc::clone(seg), index, forward)))
            .collect();
        Ok(IndexIter::new(cursors, forward, snapshot.generation))
    }

    /// Iterates over index `index` in ascending key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is closed.
    pub fn index_iter_forward(&self, index: usize) -> CoreResult<IndexIter> {
        self.index_iter(index, true)
    }

    /// Iterates over index `index` in descending key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is closed.
    pub fn index_iter_backward(&self, index: usize) -> CoreResult<IndexIter> {
        self.index_iter(index, false)
    }

    fn index_match(
        &self,
        index: usize,
        matcher: &KeyMatcher,
        budget: usize,
    ) -> CoreResult<Vec<RecordId>> {
        self.shared.stats.record_index_lookup();
        let snapshot = self.shared.snapshot();
        let mut budget = MatchBudget::new(budget);
        let mut out = Vec::new();
        for (seg, base) in snapshot.segments.iter().zip(&snapshot.bases) {
            let rows = seg.index_match(index, matcher, &mut budget)?;
            out.extend(rows.into_iter().map(|sub| RecordId::new(base + u64::from(sub))));
        }
        Ok(out)
    }

    /// Returns live rows whose leading string key field starts with
    /// `prefix`, in key order per segment.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MatchBudgetExceeded`] if expanding candidates
    /// takes more than `budget` bytes, or an error if the index is not
    /// string keyed.
    pub fn index_match_prefix(
        &self,
        index: usize,
        prefix: &str,
        budget: usize,
    ) -> CoreResult<Vec<RecordId>> {
        self.shared.ensure_open()?;
        let matcher = KeyMatcher::prefix(self.shared.schema.index(index), prefix)?;
        self.index_match(index, &matcher, budget)
    }

    /// Returns live rows whose leading string key field matches `pattern`.
    ///
    /// Only keys sharing the pattern's anchored literal prefix are examined.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MatchBudgetExceeded`] if expanding candidates
    /// takes more than `budget` bytes, [`CoreError::Pattern`] for an invalid
    /// pattern, or an error if the index is not string keyed.
    pub fn index_match_regex(
        &self,
        index: usize,
        pattern: &str,
        budget: usize,
    ) -> CoreResult<Vec<RecordId>> {
        self.shared.ensure_open()?;
        let matcher = KeyMatcher::regex(self.shared.schema.index(index), pattern)?;
        self.index_match(index, &matcher, budget)
    }

    // ========================================================================
    // Scans and introspection
    // ========================================================================

    /// Iterates over all live rows in record id order.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is closed.
    pub fn scan(&self) -> CoreResult<TableScan> {
        self.shared.ensure_open()?;
        self.shared.stats.record_scan();
        Ok(TableScan::new(self.shared.snapshot(), Arc::clone(&self.shared.schema)))
    }

    /// Returns the record id span, deleted rows included.
    #[must_use]
    pub fn num_rows(&self) -> u64 {
        self.shared.state.read().row_num_vec.last().copied().unwrap_or(0)
    }

    /// Returns the number of live rows.
    #[must_use]
    pub fn live_rows(&self) -> u64 {
        self.shared.snapshot().segments.iter().map(|s| s.live_rows()).sum()
    }

    /// Describes every segment in id order.
    #[must_use]
    pub fn segment_infos(&self) -> Vec<SegmentInfo> {
        let snapshot = self.shared.snapshot();
        snapshot
            .segments
            .iter()
            .zip(&snapshot.bases)
            .map(|(seg, &base)| SegmentInfo {
                id: seg.id(),
                kind: seg.kind(),
                state: seg.state(),
                base: RecordId::new(base),
                rows: seg.num_rows(),
                deleted: seg.num_deleted(),
                data_size: seg.data_size(),
                dir_name: segment_dir_name(seg.kind(), seg.id()),
            })
            .collect()
    }

    /// Returns the cumulative row count vector: segment `i` spans
    /// `v[i]..v[i + 1]`.
    #[must_use]
    pub fn row_num_vec(&self) -> Vec<u64> {
        self.shared.state.read().row_num_vec.clone()
    }

    // ========================================================================
    // Versioned ids
    // ========================================================================

    /// Returns the generation, bumped on every segment swap.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.state.read().generation
    }

    /// Maps a record id to its segment and sub-id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RowNotFound`] if the id is past the end.
    pub fn resolve(&self, id: RecordId) -> CoreResult<RowRef> {
        let (seg, sub_id) = self.shared.locate(id)?;
        Ok(RowRef {
            segment: seg.id(),
            sub_id,
        })
    }

    /// Maps a segment-relative reference back to a current record id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RowNotFound`] if the segment has been replaced
    /// or the sub-id is out of range.
    pub fn locate(&self, row: RowRef) -> CoreResult<RecordId> {
        let state = self.shared.state.read();
        let found = state.position_of(row.segment).and_then(|i| {
            let base = state.row_num_vec[i];
            let id = base + u64::from(row.sub_id);
            (id < state.row_num_vec[i + 1]).then_some(id)
        });
        found.map(RecordId::new).ok_or(CoreError::RowNotFound {
            id: RecordId::new(u64::from(row.sub_id)),
        })
    }

    /// Stamps a record id with the current generation.
    #[must_use]
    pub fn versioned(&self, id: RecordId) -> VersionedId {
        VersionedId {
            id,
            generation: self.generation(),
        }
    }

    /// Checks that a stamped id is still meaningful.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StaleRecordId`] if a segment swap happened since
    /// the id was stamped.
    pub fn validate(&self, id: VersionedId) -> CoreResult<RecordId> {
        let current = self.generation();
        if id.generation != current {
            return Err(CoreError::StaleRecordId {
                id: id.id,
                generation: id.generation,
                current,
            });
        }
        Ok(id.id)
    }

    // ========================================================================
    // Compaction
    // ========================================================================

    /// Rolls the current writable segment and synchronously compacts every
    /// eligible segment: writable segments other than the current one, and
    /// readonly segments whose deleted fraction exceeds
    /// [`TableConfig::purge_delete_ratio`]. Returns how many segments were
    /// rebuilt.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CompactionAborted`] if a rebuild fails; the
    /// segment being rebuilt stays in place.
    pub fn compact(&self) -> CoreResult<usize> {
        self.shared.ensure_open()?;
        self.shared.roll(true)?;
        let snapshot = self.shared.snapshot();
        let last = snapshot.segments.len() - 1;
        let mut done = 0;
        for seg in &snapshot.segments[..last] {
            if compaction::is_candidate(&self.shared, seg)
                && compaction::rebuild(&self.shared, &[Arc::clone(seg)])?
            {
                done += 1;
            }
        }
        Ok(done)
    }

    /// Merges every run of adjacent readonly segments into one segment.
    /// Returns how many segments were merged away.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CompactionAborted`] if a merge fails; the
    /// source segments stay in place.
    pub fn merge_readonly_segments(&self) -> CoreResult<usize> {
        self.shared.ensure_open()?;
        let snapshot = self.shared.snapshot();
        let mut merged = 0;
        for run in snapshot
            .segments
            .chunk_by(|a, b| a.kind() == b.kind())
            .filter(|run| run.len() > 1 && run[0].kind() == SegmentKind::Readonly)
        {
            if compaction::rebuild(&self.shared, run)? {
                merged += run.len() - 1;
            }
        }
        Ok(merged)
    }
}

impl Drop for CompositeTable {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(path = %self.shared.dir.path().display(), error = %err, "close on drop failed");
        }
    }
}
