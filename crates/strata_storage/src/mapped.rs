//! Static read-only mappings.

use crate::error::{StorageError, StorageResult};
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::ops::{Deref, Range};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A file mapped read-only for its whole length.
///
/// Readonly segment files are written once and then only read, so the
/// mapping is shared freely between threads without locking.
#[derive(Debug, Clone)]
pub struct MappedFile {
    path: PathBuf,
    map: Arc<Mmap>,
}

impl MappedFile {
    /// Maps the file at `path`.
    ///
    /// With `populate`, pages are prefaulted where the platform supports it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped.
    pub fn open(path: &Path, populate: bool) -> StorageResult<Self> {
        let file = File::open(path)?;
        let map = Self::map(&file, populate)?;
        Ok(Self {
            path: path.to_path_buf(),
            map: Arc::new(map),
        })
    }

    #[allow(unsafe_code)]
    fn map(file: &File, populate: bool) -> StorageResult<Mmap> {
        let mut options = MmapOptions::new();
        if populate {
            options.populate();
        }
        // Published segment files are never modified after the rename.
        let map = unsafe { options.map(file)? };
        Ok(map)
    }

    /// Returns the path of the mapped file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the mapped length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the whole file as a shareable view.
    #[must_use]
    pub fn bytes(&self) -> MappedBytes {
        MappedBytes {
            map: Arc::clone(&self.map),
            range: 0..self.map.len(),
        }
    }

    /// Returns a shareable view of `range`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfBounds`] if the range exceeds the file.
    pub fn slice(&self, range: Range<usize>) -> StorageResult<MappedBytes> {
        self.bytes().slice(range)
    }
}

/// A cheaply clonable view into a [`MappedFile`].
///
/// Keeps the mapping alive for as long as the view exists.
#[derive(Debug, Clone)]
pub struct MappedBytes {
    map: Arc<Mmap>,
    range: Range<usize>,
}

impl MappedBytes {
    /// Narrows the view to `range`, relative to the current view.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfBounds`] if the range exceeds the view.
    pub fn slice(&self, range: Range<usize>) -> StorageResult<Self> {
        let len = self.range.len();
        if range.start > range.end || range.end > len {
            return Err(StorageError::OutOfBounds {
                offset: range.start as u64,
                len: range.end.saturating_sub(range.start) as u64,
                size: len as u64,
            });
        }
        let start = self.range.start + range.start;
        Ok(Self {
            map: Arc::clone(&self.map),
            range: start..start + range.len(),
        })
    }
}

impl Deref for MappedBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.map[self.range.clone()]
    }
}

impl AsRef<[u8]> for MappedBytes {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn map_and_slice() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let file = MappedFile::open(&path, false).unwrap();
        assert_eq!(file.len(), 10);
        let view = file.slice(2..8).unwrap();
        assert_eq!(&*view, b"234567");
        let inner = view.slice(1..3).unwrap();
        assert_eq!(inner.as_ref(), b"34");
    }

    #[test]
    fn slice_out_of_bounds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.bin");
        std::fs::write(&path, b"abc").unwrap();

        let file = MappedFile::open(&path, true).unwrap();
        assert!(file.slice(1..5).is_err());
    }
}
