//! Growable read/write memory mapping over a single file.

use crate::error::{StorageError, StorageResult};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Geometric growth factor applied when a region runs out of room.
pub const GROWTH_FACTOR: f64 = 1.618;

/// Computes the new capacity for a region that must hold `required` bytes.
///
/// The result is at least `required`, at least `current * GROWTH_FACTOR`,
/// and rounded up to a multiple of `chunk`.
#[must_use]
pub fn growth_target(current: u64, required: u64, chunk: u64) -> u64 {
    let grown = (current as f64 * GROWTH_FACTOR) as u64;
    let want = required.max(grown).max(chunk);
    let chunk = chunk.max(1);
    want.div_ceil(chunk) * chunk
}

/// A file mapped read/write into memory that can grow in place.
///
/// Growth extends the backing file with `set_len` and installs a fresh
/// mapping. Callers must hold exclusive access (`&mut self`) while growing,
/// so slices handed out earlier can never observe the old mapping.
///
/// # Example
///
/// ```no_run
/// use strata_storage::MmapRegion;
/// use std::path::Path;
///
/// let mut region = MmapRegion::create(Path::new("data.bin"), 4096).unwrap();
/// region.as_mut_slice()[0] = 7;
/// region.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct MmapRegion {
    path: PathBuf,
    file: File,
    map: MmapMut,
}

impl MmapRegion {
    /// Creates (or truncates) the file at `path` with `initial_len` zeroed bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created, sized or mapped.
    pub fn create(path: &Path, initial_len: u64) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(initial_len.max(1))?;
        let map = Self::map(&file)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            map,
        })
    }

    /// Opens an existing file and maps its full length.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, empty or cannot be mapped.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(StorageError::corrupted(format!(
                "{} is empty",
                path.display()
            )));
        }
        let map = Self::map(&file)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            map,
        })
    }

    #[allow(unsafe_code)]
    fn map(file: &File) -> StorageResult<MmapMut> {
        // The file is owned by this region and is never truncated below the
        // mapped length while the mapping is alive.
        let map = unsafe { MmapOptions::new().map_mut(file)? };
        Ok(map)
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the mapped length in bytes.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.map.len() as u64
    }

    /// Returns the mapped bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    /// Returns the mapped bytes for writing.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map
    }

    /// Returns `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfBounds`] if the range exceeds the mapping.
    pub fn read(&self, offset: u64, len: u64) -> StorageResult<&[u8]> {
        let end = offset.saturating_add(len);
        if end > self.capacity() {
            return Err(StorageError::OutOfBounds {
                offset,
                len,
                size: self.capacity(),
            });
        }
        Ok(&self.map[offset as usize..end as usize])
    }

    /// Copies `data` into the mapping at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfBounds`] if the range exceeds the mapping.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let end = offset.saturating_add(data.len() as u64);
        if end > self.capacity() {
            return Err(StorageError::OutOfBounds {
                offset,
                len: data.len() as u64,
                size: self.capacity(),
            });
        }
        self.map[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    /// Extends the file to `new_len` bytes and remaps it.
    ///
    /// Does nothing if the region is already at least that large.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be extended or remapped.
    pub fn grow_to(&mut self, new_len: u64) -> StorageResult<()> {
        if new_len <= self.capacity() {
            return Ok(());
        }
        self.map.flush()?;
        self.file.set_len(new_len)?;
        self.map = Self::map(&self.file)?;
        tracing::trace!(path = %self.path.display(), new_len, "region grown");
        Ok(())
    }

    /// Shrinks the file to `new_len` bytes and remaps it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be truncated or remapped.
    pub fn shrink_to(&mut self, new_len: u64) -> StorageResult<()> {
        let new_len = new_len.max(1);
        if new_len >= self.capacity() {
            return Ok(());
        }
        self.map.flush()?;
        // Unmap before truncating; a mapping past EOF faults on access.
        self.map = MmapMut::map_anon(1)?;
        self.file.set_len(new_len)?;
        self.map = Self::map(&self.file)?;
        Ok(())
    }

    /// Flushes dirty pages to the backing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&self) -> StorageResult<()> {
        self.map.flush()?;
        Ok(())
    }
}
