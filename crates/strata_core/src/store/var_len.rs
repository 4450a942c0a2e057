//! Variable-length column group store: an offsets table plus a data heap.
//!
//! The offsets file is a [`FixedLenStore`] of 16-byte `(offset, len)`
//! entries. The heap file starts with a 16-byte header (`used: u64`,
//! `version: u32`, padding) and only grows: updates append the new value
//! and repoint the entry, so a reader holding an old entry still reads
//! consistent bytes.

use super::{FixedLenStore, ReadableStore, WritableStore};
use crate::buf::Reader;
use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::path::Path;
use strata_storage::{growth_target, MappedBytes, MappedFile, MmapRegion};

const HEAP_HEADER_LEN: u64 = 16;
const HEAP_VERSION: u32 = 1;
const HEAP_CHUNK: u64 = 256 * 1024;
const ENTRY_LEN: usize = 16;

#[derive(Debug)]
struct HeapArea {
    region: MmapRegion,
    used: u64,
}

impl HeapArea {
    fn write_header(&mut self) -> CoreResult<()> {
        let mut header = [0u8; HEAP_HEADER_LEN as usize];
        header[0..8].copy_from_slice(&self.used.to_le_bytes());
        header[8..12].copy_from_slice(&HEAP_VERSION.to_le_bytes());
        self.region.write(0, &header)?;
        Ok(())
    }

    fn push(&mut self, value: &[u8]) -> CoreResult<u64> {
        let offset = self.used;
        let required = offset + value.len() as u64;
        if required > self.region.capacity() {
            let bytes = growth_target(self.region.capacity(), required, HEAP_CHUNK);
            self.region.grow_to(bytes)?;
        }
        self.region.write(offset, value)?;
        self.used = required;
        self.write_header()?;
        Ok(offset)
    }
}

#[derive(Debug)]
enum Heap {
    Mutable(RwLock<HeapArea>),
    Frozen(MappedBytes),
}

fn decode_heap_header(data: &[u8]) -> CoreResult<u64> {
    let mut r = Reader::new(data, "heap header");
    let used = r.u64()?;
    let version = r.u32()?;
    if version != HEAP_VERSION {
        return Err(CoreError::invalid_format(format!(
            "unsupported heap version: {version}"
        )));
    }
    if used < HEAP_HEADER_LEN || used > data.len() as u64 {
        return Err(CoreError::segment_corruption(format!(
            "heap claims {used} bytes of {}",
            data.len()
        )));
    }
    Ok(used)
}

fn encode_entry(offset: u64, len: u64) -> [u8; ENTRY_LEN] {
    let mut entry = [0u8; ENTRY_LEN];
    entry[..8].copy_from_slice(&offset.to_le_bytes());
    entry[8..].copy_from_slice(&len.to_le_bytes());
    entry
}

fn decode_entry(entry: &[u8]) -> (u64, u64) {
    let mut offset = [0u8; 8];
    let mut len = [0u8; 8];
    offset.copy_from_slice(&entry[..8]);
    len.copy_from_slice(&entry[8..16]);
    (u64::from_le_bytes(offset), u64::from_le_bytes(len))
}

/// Store for column groups without a fixed width.
#[derive(Debug)]
pub struct VarLenStore {
    offsets: FixedLenStore,
    heap: Heap,
}

impl VarLenStore {
    /// Creates an empty mutable store.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be created.
    pub fn create(index_path: &Path, heap_path: &Path) -> CoreResult<Self> {
        let offsets = FixedLenStore::create(index_path, ENTRY_LEN)?;
        let mut area = HeapArea {
            region: MmapRegion::create(heap_path, HEAP_CHUNK)?,
            used: HEAP_HEADER_LEN,
        };
        area.write_header()?;
        Ok(Self {
            offsets,
            heap: Heap::Mutable(RwLock::new(area)),
        })
    }

    /// Opens an existing store.
    ///
    /// # Errors
    ///
    /// Returns an error if the files are missing or corrupted.
    pub fn open(
        index_path: &Path,
        heap_path: &Path,
        mutable: bool,
        populate: bool,
    ) -> CoreResult<Self> {
        let offsets = FixedLenStore::open(index_path, ENTRY_LEN, mutable, populate)?;
        let heap = if mutable {
            let region = MmapRegion::open(heap_path)?;
            let used = decode_heap_header(region.as_slice())?;
            Heap::Mutable(RwLock::new(HeapArea { region, used }))
        } else {
            let data = MappedFile::open(heap_path, populate)?.bytes();
            decode_heap_header(&data)?;
            Heap::Frozen(data)
        };
        Ok(Self { offsets, heap })
    }

    /// Writes store files holding exactly `values`.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be written.
    pub fn write_files(index_path: &Path, heap_path: &Path, values: &[Vec<u8>]) -> CoreResult<()> {
        let total: usize = values.iter().map(Vec::len).sum();
        let mut heap = Vec::with_capacity(HEAP_HEADER_LEN as usize + total);
        heap.extend_from_slice(&[0u8; HEAP_HEADER_LEN as usize]);
        let mut entries = Vec::with_capacity(values.len());
        for value in values {
            entries.push(encode_entry(heap.len() as u64, value.len() as u64).to_vec());
            heap.extend_from_slice(value);
        }
        let used = heap.len() as u64;
        heap[0..8].copy_from_slice(&used.to_le_bytes());
        heap[8..12].copy_from_slice(&HEAP_VERSION.to_le_bytes());

        FixedLenStore::write_file(index_path, ENTRY_LEN, &entries)?;
        std::fs::write(heap_path, heap)?;
        Ok(())
    }

    /// Returns true if the store accepts writes.
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        matches!(self.heap, Heap::Mutable(_))
    }

    fn entry(&self, id: usize) -> CoreResult<(u64, u64)> {
        let mut buf = Vec::with_capacity(ENTRY_LEN);
        self.offsets.get_value_append(id, &mut buf)?;
        Ok(decode_entry(&buf))
    }

    fn heap_mut(&self) -> CoreResult<&RwLock<HeapArea>> {
        match &self.heap {
            Heap::Mutable(area) => Ok(area),
            Heap::Frozen(_) => Err(CoreError::invalid_operation("variable-length store is frozen")),
        }
    }
}

impl ReadableStore for VarLenStore {
    fn num_data_rows(&self) -> usize {
        self.offsets.num_data_rows()
    }

    fn data_storage_size(&self) -> u64 {
        let heap = match &self.heap {
            Heap::Mutable(area) => area.read().used,
            Heap::Frozen(data) => data.len() as u64,
        };
        heap - HEAP_HEADER_LEN + self.offsets.data_storage_size()
    }

    fn get_value_append(&self, id: usize, out: &mut Vec<u8>) -> CoreResult<()> {
        let (offset, len) = self.entry(id)?;
        match &self.heap {
            Heap::Mutable(area) => out.extend_from_slice(area.read().region.read(offset, len)?),
            Heap::Frozen(data) => {
                let end = offset
                    .checked_add(len)
                    .filter(|&e| e <= data.len() as u64)
                    .ok_or_else(|| {
                        CoreError::segment_corruption(format!("heap entry {id} out of range"))
                    })?;
                out.extend_from_slice(&data[offset as usize..end as usize]);
            }
        }
        Ok(())
    }
}

impl WritableStore for VarLenStore {
    fn append(&self, value: &[u8]) -> CoreResult<u32> {
        let mut heap = self.heap_mut()?.write();
        let before = heap.used;
        let offset = heap.push(value)?;
        match self.offsets.append(&encode_entry(offset, value.len() as u64)) {
            Ok(id) => Ok(id),
            Err(e) => {
                heap.used = before;
                heap.write_header()?;
                Err(e)
            }
        }
    }

    fn update(&self, id: usize, value: &[u8]) -> CoreResult<()> {
        let mut heap = self.heap_mut()?.write();
        let offset = heap.push(value)?;
        self.offsets.update(id, &encode_entry(offset, value.len() as u64))
    }

    fn remove(&self, id: usize) -> CoreResult<()> {
        let mut heap = self.heap_mut()?.write();
        if id + 1 != self.offsets.num_data_rows() {
            return Ok(());
        }
        let (offset, len) = self.entry(id)?;
        self.offsets.remove(id)?;
        if offset + len == heap.used {
            heap.used = offset;
            heap.write_header()?;
        }
        Ok(())
    }

    fn flush(&self) -> CoreResult<()> {
        self.offsets.flush()?;
        if let Heap::Mutable(area) = &self.heap {
            area.read().region.flush()?;
        }
        Ok(())
    }
    fn shrink_to_fit(&self) -> CoreResult<()> {
        let mut heap = self.heap_mut()?.write();
        let used = heap.used;
        heap.region.shrink_to(used)?;
        self.offsets.shrink_to_fit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn paths(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        (dir.join("v.vidx"), dir.join("v.vdat"))
    }

    #[test]
    fn append_update_get() {
        let dir = tempdir().unwrap();
        let (idx, dat) = paths(dir.path());
        let store = VarLenStore::create(&idx, &dat).unwrap();
        assert_eq!(store.append(b"hello").unwrap(), 0);
        assert_eq!(store.append(b"").unwrap(), 1);
        assert_eq!(store.append(b"world!").unwrap(), 2);
        store.update(0, b"hi").unwrap();

        assert_eq!(store.get_value(0).unwrap(), b"hi");
        assert_eq!(store.get_value(1).unwrap(), b"");
        assert_eq!(store.get_value(2).unwrap(), b"world!");
    }

    #[test]
    fn grows_heap() {
        let dir = tempdir().unwrap();
        let (idx, dat) = paths(dir.path());
        let store = VarLenStore::create(&idx, &dat).unwrap();
        let big = vec![7u8; 100_000];
        for _ in 0..5 {
            store.append(&big).unwrap();
        }
        assert_eq!(store.get_value(4).unwrap(), big);
        assert_eq!(store.data_storage_size(), 5 * 100_000 + 5 * 16);
    }

    #[test]
    fn remove_last_reclaims_heap() {
        let dir = tempdir().unwrap();
        let (idx, dat) = paths(dir.path());
        let store = VarLenStore::create(&idx, &dat).unwrap();
        store.append(b"aaa").unwrap();
        store.append(b"bbbb").unwrap();
        store.remove(0).unwrap();
        assert_eq!(store.num_data_rows(), 2);
        store.remove(1).unwrap();
        assert_eq!(store.num_data_rows(), 1);
        assert_eq!(store.append(b"cc").unwrap(), 1);
        assert_eq!(store.data_storage_size(), 5 + 2 * 16);
    }

    #[test]
    fn shrink_to_fit_keeps_values() {
        let dir = tempdir().unwrap();
        let (idx, dat) = paths(dir.path());
        let store = VarLenStore::create(&idx, &dat).unwrap();
        store.append(b"abc").unwrap();
        store.append(b"de").unwrap();
        store.shrink_to_fit().unwrap();
        assert_eq!(std::fs::metadata(&dat).unwrap().len(), HEAP_HEADER_LEN + 5);

        store.append(b"fghi").unwrap();
        assert_eq!(store.get_value(0).unwrap(), b"abc");
        assert_eq!(store.get_value(2).unwrap(), b"fghi");
    }

    #[test]
    fn reopen_and_frozen_files() {
        let dir = tempdir().unwrap();
        let (idx, dat) = paths(dir.path());
        {
            let store = VarLenStore::create(&idx, &dat).unwrap();
            store.append(b"one").unwrap();
            store.append(b"two").unwrap();
            store.flush().unwrap();
        }
        let store = VarLenStore::open(&idx, &dat, true, false).unwrap();
        assert_eq!(store.get_value(1).unwrap(), b"two");
        drop(store);

        let values = vec![b"x".to_vec(), Vec::new(), b"zzz".to_vec()];
        VarLenStore::write_files(&idx, &dat, &values).unwrap();
        let frozen = VarLenStore::open(&idx, &dat, false, false).unwrap();
        assert!(!frozen.is_mutable());
        for (i, v) in values.iter().enumerate() {
            assert_eq!(&frozen.get_value(i).unwrap(), v);
        }
        assert!(frozen.append(b"no").is_err());
    }
}
