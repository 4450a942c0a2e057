//! Bulk construction of readonly segments.

use super::SegmentMeta;
use crate::error::CoreResult;
use crate::index::ReadonlyIndex;
use crate::schema::{PreparedRow, TableSchema};
use crate::store::{BuildOptions, ColgroupStore};
use crate::types::{SegmentId, SegmentKind};
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use strata_storage::{publish_dir, sync_dir};
use tracing::warn;

/// Collects rows in id order and writes them as a readonly segment.
#[derive(Debug)]
pub struct SegmentBuilder {
    schema: Arc<TableSchema>,
    colgroups: Vec<Vec<Vec<u8>>>,
    keys: Vec<Vec<(Vec<u8>, u32)>>,
    rows: u32,
    bytes: u64,
}

impl SegmentBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(schema: Arc<TableSchema>) -> Self {
        let colgroups = vec![Vec::new(); schema.colgroups().len()];
        let keys = vec![Vec::new(); schema.indexes().len()];
        Self {
            schema,
            colgroups,
            keys,
            rows: 0,
            bytes: 0,
        }
    }

    /// Adds a row and returns its id in the new segment.
    pub fn push(&mut self, row: PreparedRow) -> u32 {
        let id = self.rows;
        for (values, value) in self.colgroups.iter_mut().zip(row.colgroups) {
            self.bytes += value.len() as u64;
            values.push(value);
        }
        for (keys, key) in self.keys.iter_mut().zip(row.keys) {
            self.bytes += key.len() as u64 + 4;
            keys.push((key, id));
        }
        self.rows += 1;
        id
    }

    /// Adds a row given as column group values.
    ///
    /// # Errors
    ///
    /// Returns an error if the values do not form a valid row.
    pub fn push_colgroups(&mut self, values: &[Vec<u8>]) -> CoreResult<u32> {
        let row = self.schema.combine_colgroups(values)?;
        let prepared = self.schema.prepare_row(&row)?;
        Ok(self.push(prepared))
    }

    /// Returns the rows added so far.
    #[must_use]
    pub fn num_rows(&self) -> u32 {
        self.rows
    }

    /// Returns the bytes buffered so far.
    #[must_use]
    pub fn buffered_bytes(&self) -> u64 {
        self.bytes
    }

    /// Writes the segment into `temp`, then publishes it at `dest`.
    ///
    /// A leftover directory at `temp` is cleared first. On failure nothing
    /// is published and the partial output is removed.
    ///
    /// # Errors
    ///
    /// Returns an error if any file cannot be written, including
    /// [`crate::CoreError::DuplicateKey`] for a unique index.
    pub fn finish(
        self,
        temp: &Path,
        dest: &Path,
        id: SegmentId,
        options: &BuildOptions,
        sync: bool,
    ) -> CoreResult<()> {
        if temp.is_dir() {
            fs::remove_dir_all(temp)?;
        }
        fs::create_dir(temp)?;
        if let Err(err) = self.write_into(temp, id, options, sync) {
            if let Err(e) = fs::remove_dir_all(temp) {
                warn!(path = %temp.display(), error = %e, "failed to remove partial segment");
            }
            return Err(err);
        }
        publish_dir(temp, dest)?;
        Ok(())
    }

    fn write_into(
        self,
        dir: &Path,
        id: SegmentId,
        options: &BuildOptions,
        sync: bool,
    ) -> CoreResult<()> {
        for (g, (cg, values)) in self.schema.colgroups().iter().zip(&self.colgroups).enumerate() {
            ColgroupStore::write_readonly(dir, g, cg, values, options)?;
        }
        for (i, (def, keys)) in self.schema.indexes().iter().zip(self.keys).enumerate() {
            ReadonlyIndex::write_file(dir, i, def, keys)?;
        }
        SegmentMeta {
            kind: SegmentKind::Readonly,
            id,
            rows: u64::from(self.rows),
        }
        .save(dir, false)?;
        if sync {
            for entry in fs::read_dir(dir)? {
                File::open(entry?.path())?.sync_all()?;
            }
            sync_dir(dir)?;
        }
        Ok(())
    }
}
