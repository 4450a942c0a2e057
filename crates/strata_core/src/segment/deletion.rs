//! Per-segment tombstones.

use crate::error::{CoreError, CoreResult};
use roaring::RoaringBitmap;
use std::path::Path;
use strata_storage::write_atomic;

/// File holding the persisted bitmap inside a segment directory.
pub const DELETION_FILE: &str = "isdel";

/// Set of deleted sub-ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeletionBitmap {
    bits: RoaringBitmap,
}

impl DeletionBitmap {
    /// Creates an empty bitmap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` deleted; returns false if it already was.
    pub fn set(&mut self, id: u32) -> bool {
        self.bits.insert(id)
    }

    /// Returns true if `id` is deleted.
    #[must_use]
    pub fn contains(&self, id: u32) -> bool {
        self.bits.contains(id)
    }

    /// Returns the number of deleted ids.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.bits.len()
    }

    /// Returns true if nothing is deleted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Returns the largest deleted id.
    #[must_use]
    pub fn max(&self) -> Option<u32> {
        self.bits.max()
    }

    /// Returns how many deleted ids are smaller than `id`.
    #[must_use]
    pub fn deleted_before(&self, id: u32) -> u32 {
        match id.checked_sub(1) {
            Some(prev) => self.bits.rank(prev) as u32,
            None => 0,
        }
    }

    /// Maps a live id to its position once deleted ids are squeezed out.
    ///
    /// Returns `None` if `id` itself is deleted.
    #[must_use]
    pub fn compacted_id(&self, id: u32) -> Option<u32> {
        (!self.contains(id)).then(|| id - self.deleted_before(id))
    }

    /// Iterates over deleted ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.bits.iter()
    }

    /// Loads the bitmap of a segment directory; a missing file means none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be decoded.
    pub fn load(dir: &Path) -> CoreResult<Self> {
        let path = dir.join(DELETION_FILE);
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read(&path)?;
        let bits = RoaringBitmap::deserialize_from(data.as_slice()).map_err(|e| {
            CoreError::segment_corruption(format!("{}: {e}", path.display()))
        })?;
        Ok(Self { bits })
    }

    /// Persists the bitmap into a segment directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, dir: &Path, sync: bool) -> CoreResult<()> {
        let mut buf = Vec::with_capacity(self.bits.serialized_size());
        self.bits.serialize_into(&mut buf)?;
        write_atomic(&dir.join(DELETION_FILE), &buf, sync)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn compacted_ids_skip_tombstones() {
        let mut bitmap = DeletionBitmap::new();
        assert!(bitmap.set(1));
        assert!(bitmap.set(4));
        assert!(!bitmap.set(4));
        assert_eq!(bitmap.len(), 2);
        assert_eq!(bitmap.compacted_id(0), Some(0));
        assert_eq!(bitmap.compacted_id(1), None);
        assert_eq!(bitmap.compacted_id(2), Some(1));
        assert_eq!(bitmap.compacted_id(5), Some(3));
        assert_eq!(bitmap.deleted_before(0), 0);
    }

    #[test]
    fn persists() {
        let dir = tempdir().unwrap();
        assert!(DeletionBitmap::load(dir.path()).unwrap().is_empty());
        let mut bitmap = DeletionBitmap::new();
        bitmap.set(7);
        bitmap.set(70_000);
        bitmap.save(dir.path(), false).unwrap();
        let loaded = DeletionBitmap::load(dir.path()).unwrap();
        assert_eq!(loaded, bitmap);
        assert_eq!(loaded.iter().collect::<Vec<_>>(), [7, 70_000]);

        std::fs::write(dir.path().join(DELETION_FILE), b"junk").unwrap();
        assert!(DeletionBitmap::load(dir.path()).is_err());
    }
}
