//! Persistent per-segment size cache.
//!
//! Row and byte counts of every segment are kept in `sizes.cbor` so that
//! tools and the compaction scheduler can see them without opening each
//! segment. The file is a CBOR map written atomically.

use crate::error::CoreResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use strata_storage::write_atomic;

/// Cached counts for one segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeEntry {
    /// Live rows.
    pub rows: u64,
    /// Data bytes across all column group stores.
    pub bytes: u64,
}

#[derive(Debug, Default)]
struct Cache {
    entries: BTreeMap<String, SizeEntry>,
    dirty: bool,
}

/// Segment-name keyed cache of [`SizeEntry`] values.
#[derive(Debug)]
pub struct SizeStorer {
    path: PathBuf,
    cache: Mutex<Cache>,
}

impl SizeStorer {
    /// Creates an empty storer backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(Cache::default()),
        }
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the backing file, replacing the in-memory entries.
    ///
    /// A missing file leaves the cache empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn fill_cache(&self) -> CoreResult<()> {
        let entries = match std::fs::read(&self.path) {
            Ok(data) => ciborium::from_reader::<BTreeMap<String, SizeEntry>, _>(data.as_slice())?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        let mut cache = self.cache.lock();
        cache.entries = entries;
        cache.dirty = false;
        Ok(())
    }

    /// Returns `(rows, bytes)` for `name`, or `(0, 0)` if unknown.
    pub fn load_from_cache(&self, name: &str) -> (u64, u64) {
        let cache = self.cache.lock();
        cache
            .entries
            .get(name)
            .map_or((0, 0), |e| (e.rows, e.bytes))
    }

    /// Records counts for `name` and marks the cache dirty.
    pub fn store_to_cache(&self, name: &str, rows: u64, bytes: u64) {
        let mut cache = self.cache.lock();
        let entry = SizeEntry { rows, bytes };
        if cache.entries.insert(name.to_string(), entry) != Some(entry) {
            cache.dirty = true;
        }
    }

    /// Forgets `name`.
    pub fn remove_from_cache(&self, name: &str) {
        let mut cache = self.cache.lock();
        if cache.entries.remove(name).is_some() {
            cache.dirty = true;
        }
    }

    /// Returns a copy of all entries.
    pub fn entries(&self) -> BTreeMap<String, SizeEntry> {
        self.cache.lock().entries.clone()
    }

    /// Persists the cache if anything changed since the last sync.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn sync_cache(&self, sync: bool) -> CoreResult<()> {
        let mut cache = self.cache.lock();
        if !cache.dirty {
            return Ok(());
        }
        let mut buf = Vec::new();
        ciborium::into_writer(&cache.entries, &mut buf)?;
        write_atomic(&self.path, &buf, sync)?;
        cache.dirty = false;
        Ok(())
    }
}
