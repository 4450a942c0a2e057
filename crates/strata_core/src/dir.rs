//! Table directory management.
//!
//! This module handles the file system layout of one table:
//!
//! ```text
//! <table>/
//! ├─ LOCK              # Advisory lock for single-process access
//! ├─ MANIFEST          # Segment list, next segment id, generation
//! ├─ dbmeta.json       # Table schema
//! ├─ sizes.cbor        # Cached per-segment sizes
//! ├─ wr-000004/        # Writable segment
//! ├─ rd-000003/        # Readonly segment
//! └─ rd-000005.tmp/    # Segment being built (removed on open)
//! ```

use crate::error::{CoreError, CoreResult};
use crate::manifest::{segment_dir_name, Manifest};
use crate::types::{SegmentId, SegmentKind};
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use strata_storage::write_atomic;

const MANIFEST_FILE: &str = "MANIFEST";
const LOCK_FILE: &str = "LOCK";
pub(crate) const SCHEMA_FILE: &str = "dbmeta.json";
const SIZES_FILE: &str = "sizes.cbor";
const TEMP_SUFFIX: &str = ".tmp";

/// Manages the table directory structure and file locking.
///
/// # Thread Safety
///
/// The `TableDir` holds an exclusive lock on the directory. Only one
/// `TableDir` instance can exist per directory at a time, across processes.
#[derive(Debug)]
pub struct TableDir {
    path: PathBuf,
    _lock_file: File,
}

impl TableDir {
    /// Opens or creates a table directory and takes the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `TableLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "table directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::TableLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the table directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the schema file.
    #[must_use]
    pub fn schema_path(&self) -> PathBuf {
        self.path.join(SCHEMA_FILE)
    }

    /// Returns the path to the size cache.
    #[must_use]
    pub fn sizes_path(&self) -> PathBuf {
        self.path.join(SIZES_FILE)
    }

    /// Returns the path to the MANIFEST file.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// Returns the published directory of a segment.
    #[must_use]
    pub fn segment_path(&self, kind: SegmentKind, id: SegmentId) -> PathBuf {
        self.path.join(segment_dir_name(kind, id))
    }

    /// Returns the staging directory a segment is built in.
    #[must_use]
    pub fn segment_temp_path(&self, kind: SegmentKind, id: SegmentId) -> PathBuf {
        let mut name = segment_dir_name(kind, id);
        name.push_str(TEMP_SUFFIX);
        self.path.join(name)
    }

    /// Checks if this is a new (empty) table directory.
    #[must_use]
    pub fn is_new_table(&self) -> bool {
        !self.manifest_path().exists()
    }

    /// Loads the manifest from disk.
    ///
    /// Returns `None` if the manifest file doesn't exist (new table).
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest exists but cannot be decoded.
    pub fn load_manifest(&self) -> CoreResult<Option<Manifest>> {
        match fs::read(self.manifest_path()) {
            Ok(data) => Manifest::decode(&data).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Saves the manifest to disk atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or rename fails.
    pub fn save_manifest(&self, manifest: &Manifest) -> CoreResult<()> {
        write_atomic(&self.manifest_path(), &manifest.encode(), true)?;
        Ok(())
    }

    /// Removes staging directories and segment directories the manifest
    /// does not reference.
    ///
    /// Leftovers come from builds interrupted by a crash and from purged
    /// segments whose removal did not complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn remove_orphans(&self, manifest: &Manifest) -> CoreResult<Vec<PathBuf>> {
        let live: HashSet<String> = manifest.segments.iter().map(|s| s.dir_name()).collect();
        let mut removed = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_segment = name.starts_with("wr-") || name.starts_with("rd-");
            if is_segment && !live.contains(&name) {
                match fs::remove_dir_all(entry.path()) {
                    Ok(()) => removed.push(entry.path()),
                    Err(e) => tracing::warn!(dir = %name, error = %e, "failed to remove orphan"),
                }
            }
        }
        Ok(removed)
    }
}
