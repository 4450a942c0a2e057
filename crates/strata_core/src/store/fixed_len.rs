//! Fixed-stride column group store.
//!
//! File layout:
//!
//! ```text
//! +--------------------+-----------------+
//! | header (24 bytes)  | capacity rows   |
//! | rows: u64          | of fixlen bytes |
//! | capacity: u64      |                 |
//! | fixlen: u32        |                 |
//! | version: u32       |                 |
//! +--------------------+-----------------+
//! ```

use super::{ReadableStore, WritableStore};
use crate::buf::Reader;
use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::path::Path;
use strata_storage::{growth_target, MappedBytes, MappedFile, MmapRegion};

/// Size of the file header.
pub const FIXED_HEADER_LEN: usize = 24;

const FIXED_VERSION: u32 = 1;
const GROW_CHUNK: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FixedLenHeader {
    rows: u64,
    capacity: u64,
    fixlen: u32,
    version: u32,
}

impl FixedLenHeader {
    fn encode(&self) -> [u8; FIXED_HEADER_LEN] {
        let mut out = [0u8; FIXED_HEADER_LEN];
        out[0..8].copy_from_slice(&self.rows.to_le_bytes());
        out[8..16].copy_from_slice(&self.capacity.to_le_bytes());
        out[16..20].copy_from_slice(&self.fixlen.to_le_bytes());
        out[20..24].copy_from_slice(&self.version.to_le_bytes());
        out
    }

    fn decode(data: &[u8], file_len: u64) -> CoreResult<Self> {
        let mut r = Reader::new(data, "fixed-length store header");
        let header = Self {
            rows: r.u64()?,
            capacity: r.u64()?,
            fixlen: r.u32()?,
            version: r.u32()?,
        };
        if header.version != FIXED_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported fixed-length store version: {}",
                header.version
            )));
        }
        let need = header
            .capacity
            .checked_mul(u64::from(header.fixlen))
            .and_then(|b| b.checked_add(FIXED_HEADER_LEN as u64));
        if header.rows > header.capacity || need.map_or(true, |n| n > file_len) {
            return Err(CoreError::segment_corruption(format!(
                "fixed-length store claims {} of {} rows x {} bytes in {file_len} bytes",
                header.rows, header.capacity, header.fixlen
            )));
        }
        Ok(header)
    }
}

#[derive(Debug)]
struct MutableArea {
    region: MmapRegion,
    rows: u64,
    capacity: u64,
}

impl MutableArea {
    fn write_header(&mut self, fixlen: usize) -> CoreResult<()> {
        let header = FixedLenHeader {
            rows: self.rows,
            capacity: self.capacity,
            fixlen: fixlen as u32,
            version: FIXED_VERSION,
        };
        self.region.write(0, &header.encode())?;
        Ok(())
    }
}

#[derive(Debug)]
enum Area {
    Mutable(RwLock<MutableArea>),
    Frozen { rows: usize, data: MappedBytes },
}

/// Rows of exactly `fixlen` bytes stored back to back.
///
/// A mutable store grows its file geometrically and remaps under its write
/// lock. A frozen store is a read-only mapping and takes no locks.
#[derive(Debug)]
pub struct FixedLenStore {
    fixlen: usize,
    area: Area,
}

impl FixedLenStore {
    /// Creates an empty mutable store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    ///
    /// # Panics
    ///
    /// Panics if `fixlen` is zero.
    pub fn create(path: &Path, fixlen: usize) -> CoreResult<Self> {
        assert!(fixlen > 0, "fixed-length store needs a non-zero width");
        let capacity = (GROW_CHUNK / fixlen as u64).max(16);
        let bytes = FIXED_HEADER_LEN as u64 + capacity * fixlen as u64;
        let mut area = MutableArea {
            region: MmapRegion::create(path, bytes)?,
            rows: 0,
            capacity,
        };
        area.write_header(fixlen)?;
        Ok(Self {
            fixlen,
            area: Area::Mutable(RwLock::new(area)),
        })
    }

    /// Opens an existing store; `mutable` selects a writable mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, its header is invalid or
    /// its width differs from `fixlen`.
    pub fn open(path: &Path, fixlen: usize, mutable: bool, populate: bool) -> CoreResult<Self> {
        let check = |header: &FixedLenHeader| {
            if header.fixlen as usize == fixlen {
                Ok(())
            } else {
                Err(CoreError::segment_corruption(format!(
                    "{} has width {}, schema expects {fixlen}",
                    path.display(),
                    header.fixlen
                )))
            }
        };
        let area = if mutable {
            let region = MmapRegion::open(path)?;
            let header = FixedLenHeader::decode(region.as_slice(), region.capacity())?;
            check(&header)?;
            Area::Mutable(RwLock::new(MutableArea {
                region,
                rows: header.rows,
                capacity: header.capacity,
            }))
        } else {
            let data = MappedFile::open(path, populate)?.bytes();
            let header = FixedLenHeader::decode(&data, data.len() as u64)?;
            check(&header)?;
            Area::Frozen {
                rows: header.rows as usize,
                data,
            }
        };
        Ok(Self { fixlen, area })
    }

    /// Writes a store file holding exactly `values`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    ///
    /// # Panics
    ///
    /// Panics if a value is not `fixlen` bytes long.
    pub fn write_file(path: &Path, fixlen: usize, values: &[Vec<u8>]) -> CoreResult<()> {
        let rows = values.len() as u64;
        let header = FixedLenHeader {
            rows,
            capacity: rows,
            fixlen: fixlen as u32,
            version: FIXED_VERSION,
        };
        let mut buf = Vec::with_capacity(FIXED_HEADER_LEN + values.len() * fixlen);
        buf.extend_from_slice(&header.encode());
        for value in values {
            assert_eq!(value.len(), fixlen, "row width mismatch");
            buf.extend_from_slice(value);
        }
        std::fs::write(path, buf)?;
        Ok(())
    }

    /// Returns the row width.
    #[must_use]
    pub fn fixlen(&self) -> usize {
        self.fixlen
    }

    /// Returns true if the store accepts writes.
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        matches!(self.area, Area::Mutable(_))
    }

    /// Returns the row capacity before the next growth.
    #[must_use]
    pub fn capacity(&self) -> usize {
        match &self.area {
            Area::Mutable(area) => area.read().capacity as usize,
            Area::Frozen { rows, .. } => *rows,
        }
    }

    fn offset(&self, id: usize) -> u64 {
        (FIXED_HEADER_LEN + id * self.fixlen) as u64
    }

    fn area_mut(&self) -> CoreResult<&RwLock<MutableArea>> {
        match &self.area {
            Area::Mutable(area) => Ok(area),
            Area::Frozen { .. } => Err(CoreError::invalid_operation(
                "fixed-length store is frozen",
            )),
        }
    }
}

impl ReadableStore for FixedLenStore {
    fn num_data_rows(&self) -> usize {
        match &self.area {
            Area::Mutable(area) => area.read().rows as usize,
            Area::Frozen { rows, .. } => *rows,
        }
    }

    fn data_storage_size(&self) -> u64 {
        (self.num_data_rows() * self.fixlen) as u64
    }

    fn get_value_append(&self, id: usize, out: &mut Vec<u8>) -> CoreResult<()> {
        match &self.area {
            Area::Mutable(area) => {
                let area = area.read();
                assert!((id as u64) < area.rows, "row {id} out of range");
                out.extend_from_slice(area.region.read(self.offset(id), self.fixlen as u64)?);
            }
            Area::Frozen { rows, data } => {
                assert!(id < *rows, "row {id} out of range");
                let start = self.offset(id) as usize;
                out.extend_from_slice(&data[start..start + self.fixlen]);
            }
        }
        Ok(())
    }
}

impl WritableStore for FixedLenStore {
    fn append(&self, value: &[u8]) -> CoreResult<u32> {
        assert_eq!(value.len(), self.fixlen, "row width mismatch");
        let mut area = self.area_mut()?.write();
        let id = area.rows;
        let id32 = u32::try_from(id)
            .map_err(|_| CoreError::invalid_operation("segment row limit reached"))?;
        if area.rows == area.capacity {
            let required = self.offset(id as usize + 1);
            let bytes = growth_target(area.region.capacity(), required, GROW_CHUNK);
            area.region.grow_to(bytes)?;
            area.capacity = (bytes - FIXED_HEADER_LEN as u64) / self.fixlen as u64;
        }
        area.region.write(self.offset(id as usize), value)?;
        area.rows += 1;
        area.write_header(self.fixlen)?;
        Ok(id32)
    }

    fn update(&self, id: usize, value: &[u8]) -> CoreResult<()> {
        assert_eq!(value.len(), self.fixlen, "row width mismatch");
        let mut area = self.area_mut()?.write();
        assert!((id as u64) < area.rows, "row {id} out of range");
        area.region.write(self.offset(id), value)?;
        Ok(())
    }

    fn remove(&self, id: usize) -> CoreResult<()> {
        let mut area = self.area_mut()?.write();
        if id as u64 + 1 == area.rows {
            area.rows -= 1;
            area.write_header(self.fixlen)?;
        }
        Ok(())
    }

    fn flush(&self) -> CoreResult<()> {
        if let Area::Mutable(area) = &self.area {
            area.read().region.flush()?;
        }
        Ok(())
    }

    fn shrink_to_fit(&self) -> CoreResult<()> {
        let mut area = self.area_mut()?.write();
        if area.capacity == area.rows {
            return Ok(());
        }
        // Header first: a smaller capacity over a larger file stays valid.
        area.capacity = area.rows;
        area.write_header(self.fixlen)?;
        let bytes = self.offset(area.rows as usize);
        area.region.shrink_to(bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_get_update() {
        let dir = tempdir().unwrap();
        let store = FixedLenStore::create(&dir.path().join("s.fix"), 4).unwrap();
        assert_eq!(store.append(b"aaaa").unwrap(), 0);
        assert_eq!(store.append(b"bbbb").unwrap(), 1);
        store.update(0, b"cccc").unwrap();

        assert_eq!(store.num_data_rows(), 2);
        assert_eq!(store.get_value(0).unwrap(), b"cccc");
        assert_eq!(store.get_value(1).unwrap(), b"bbbb");
        assert_eq!(store.data_storage_size(), 8);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let dir = tempdir().unwrap();
        let store = FixedLenStore::create(&dir.path().join("s.fix"), 1024).unwrap();
        let initial = store.capacity();
        for i in 0..(initial + 10) {
            let value = vec![(i % 251) as u8; 1024];
            assert_eq!(store.append(&value).unwrap() as usize, i);
        }
        assert!(store.capacity() as f64 >= initial as f64 * 1.6);
        assert_eq!(store.get_value(initial + 3).unwrap()[0], ((initial + 3) % 251) as u8);
    }

    #[test]
    fn remove_only_shrinks_last() {
        let dir = tempdir().unwrap();
        let store = FixedLenStore::create(&dir.path().join("s.fix"), 2).unwrap();
        for v in [b"00", b"11", b"22"] {
            store.append(v).unwrap();
        }
        store.remove(0).unwrap();
        assert_eq!(store.num_data_rows(), 3);
        store.remove(2).unwrap();
        assert_eq!(store.num_data_rows(), 2);
        assert_eq!(store.append(b"33").unwrap(), 2);
    }

    #[test]
    fn shrink_to_fit_trims_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.fix");
        let store = FixedLenStore::create(&path, 4).unwrap();
        store.append(b"aaaa").unwrap();
        store.append(b"bbbb").unwrap();
        assert!(store.capacity() > 2);

        store.shrink_to_fit().unwrap();
        assert_eq!(store.capacity(), 2);
        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, (FIXED_HEADER_LEN + 2 * 4) as u64);
        assert_eq!(store.get_value(1).unwrap(), b"bbbb");

        assert_eq!(store.append(b"cccc").unwrap(), 2);
        assert!(store.capacity() > 3);
        drop(store);
        let reopened = FixedLenStore::open(&path, 4, false, false).unwrap();
        assert_eq!(reopened.get_value(2).unwrap(), b"cccc");
        assert!(reopened.shrink_to_fit().is_err());
    }

    #[test]
    fn reopen_mutable_and_frozen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.fix");
        {
            let store = FixedLenStore::create(&path, 3).unwrap();
            store.append(b"abc").unwrap();
            store.append(b"def").unwrap();
            store.flush().unwrap();
        }
        let store = FixedLenStore::open(&path, 3, true, false).unwrap();
        assert_eq!(store.num_data_rows(), 2);
        store.append(b"ghi").unwrap();
        drop(store);

        let frozen = FixedLenStore::open(&path, 3, false, false).unwrap();
        assert_eq!(frozen.get_value(2).unwrap(), b"ghi");
        assert!(frozen.append(b"xyz").is_err());
        assert!(FixedLenStore::open(&path, 4, false, false).is_err());
    }

    #[test]
    fn write_file_exact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.fix");
        FixedLenStore::write_file(&path, 2, &[b"ab".to_vec(), b"cd".to_vec()]).unwrap();
        let store = FixedLenStore::open(&path, 2, false, false).unwrap();
        assert_eq!(store.capacity(), 2);
        assert_eq!(store.get_value(1).unwrap(), b"cd");

        FixedLenStore::write_file(&path, 2, &[]).unwrap();
        let empty = FixedLenStore::open(&path, 2, true, false).unwrap();
        assert_eq!(empty.num_data_rows(), 0);
    }

    #[test]
    fn corrupt_header_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.fix");
        FixedLenStore::write_file(&path, 2, &[b"ab".to_vec()]).unwrap();
        let mut data = std::fs::read(&path).unwrap();
        data[8] = 9; // capacity beyond file
        std::fs::write(&path, &data).unwrap();
        assert!(FixedLenStore::open(&path, 2, false, false).is_err());
    }
}
