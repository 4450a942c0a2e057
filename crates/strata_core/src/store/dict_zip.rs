//! Dictionary-compressed column group store.
//!
//! Each value is compressed on its own with zstd against a dictionary
//! trained on a sample of the batch, which keeps random access cheap while
//! still exploiting redundancy between rows. Small batches, where training
//! fails, fall back to plain zstd frames.
//!
//! File layout:
//!
//! ```text
//! header (24 bytes)   magic "SDZP", version: u16, flags: u16,
//!                     rows: u64, dict_len: u32, padding: u32
//! dictionary bytes
//! frame offsets (packed, rows + 1 entries)
//! raw lengths   (packed, rows entries)
//! compressed frames
//! ```

use super::{BuildOptions, ReadableStore, UintVecMin0};
use crate::buf::{ByteView, Reader};
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::path::Path;
use strata_storage::MappedFile;
use zstd::bulk::{Compressor, Decompressor};

const DICT_ZIP_MAGIC: [u8; 4] = *b"SDZP";
const DICT_ZIP_VERSION: u16 = 1;
const HEADER_LEN: usize = 24;
const MIN_TRAINING_SAMPLES: usize = 8;

/// Random-access store of zstd frames sharing one dictionary.
pub struct DictZipStore {
    dict_len: usize,
    offsets: UintVecMin0,
    raw_lens: UintVecMin0,
    frames: ByteView,
    decoder: Mutex<Decompressor<'static>>,
}

impl std::fmt::Debug for DictZipStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictZipStore")
            .field("rows", &self.raw_lens.len())
            .field("dict_len", &self.dict_len)
            .field("frames", &self.frames.len())
            .finish_non_exhaustive()
    }
}

fn train_dictionary(values: &[Vec<u8>], options: &BuildOptions) -> Vec<u8> {
    let mut sampled = 0usize;
    let samples: Vec<&[u8]> = values
        .iter()
        .filter(|v| !v.is_empty())
        .take_while(|v| {
            sampled += v.len();
            sampled <= options.dict_sample_bytes
        })
        .map(Vec::as_slice)
        .collect();
    if samples.len() < MIN_TRAINING_SAMPLES {
        return Vec::new();
    }
    match zstd::dict::from_samples(&samples, options.dict_max_bytes) {
        Ok(dict) => dict,
        Err(e) => {
            tracing::debug!(samples = samples.len(), error = %e, "dictionary training skipped");
            Vec::new()
        }
    }
}

impl DictZipStore {
    /// Compresses `values` and writes the store to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if compression or the write fails.
    pub fn write_file(path: &Path, values: &[Vec<u8>], options: &BuildOptions) -> CoreResult<()> {
        let dict = train_dictionary(values, options);
        let mut compressor = if dict.is_empty() {
            Compressor::new(options.zstd_level)?
        } else {
            Compressor::with_dictionary(options.zstd_level, &dict)?
        };

        let mut frames = Vec::new();
        let mut offsets = Vec::with_capacity(values.len() + 1);
        let mut raw_lens = Vec::with_capacity(values.len());
        offsets.push(0u64);
        for value in values {
            let frame = compressor.compress(value)?;
            frames.extend_from_slice(&frame);
            offsets.push(frames.len() as u64);
            raw_lens.push(value.len() as u64);
        }

        let mut out = Vec::with_capacity(HEADER_LEN + dict.len() + frames.len() + 64);
        out.extend_from_slice(&DICT_ZIP_MAGIC);
        out.extend_from_slice(&DICT_ZIP_VERSION.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(values.len() as u64).to_le_bytes());
        out.extend_from_slice(&(dict.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&dict);
        UintVecMin0::build(&offsets).write_to(&mut out);
        UintVecMin0::build(&raw_lens).write_to(&mut out);
        out.extend_from_slice(&frames);

        tracing::trace!(
            rows = values.len(),
            dict = dict.len(),
            compressed = frames.len(),
            "dictionary store written"
        );
        std::fs::write(path, out)?;
        Ok(())
    }

    /// Parses a store from its serialized form.
    ///
    /// # Errors
    ///
    /// Returns an error if the header or a section is invalid.
    pub fn from_view(view: ByteView) -> CoreResult<Self> {
        let mut r = Reader::new(&view, "dictionary store header");
        r.magic_version(&DICT_ZIP_MAGIC, DICT_ZIP_VERSION)?;
        r.u16()?;
        let rows = r.u64()?;
        let dict_len = r.u32()? as usize;
        r.u32()?;
        let dict = r.bytes(dict_len)?.to_vec();
        let mut pos = r.position();

        let (offsets, used) = UintVecMin0::from_view(&view.slice(pos..view.len())?)?;
        pos += used;
        let (raw_lens, used) = UintVecMin0::from_view(&view.slice(pos..view.len())?)?;
        pos += used;
        let frames = view.slice(pos..view.len())?;

        if raw_lens.len() as u64 != rows || offsets.len() != raw_lens.len() + 1 {
            return Err(CoreError::segment_corruption(format!(
                "dictionary store section sizes disagree with {rows} rows"
            )));
        }
        if offsets.get(offsets.len() - 1) != frames.len() as u64 {
            return Err(CoreError::segment_corruption("dictionary store frames truncated"));
        }

        let decoder = if dict.is_empty() {
            Decompressor::new()?
        } else {
            Decompressor::with_dictionary(&dict)?
        };
        Ok(Self {
            dict_len,
            offsets,
            raw_lens,
            frames,
            decoder: Mutex::new(decoder),
        })
    }

    /// Maps the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or invalid.
    pub fn open(path: &Path, populate: bool) -> CoreResult<Self> {
        let file = MappedFile::open(path, populate)?;
        Self::from_view(ByteView::from(file.bytes()))
    }

    /// Returns true if a trained dictionary is in use.
    #[must_use]
    pub fn has_dictionary(&self) -> bool {
        self.dict_len > 0
    }

    /// Returns the compressed size of all frames.
    #[must_use]
    pub fn compressed_size(&self) -> usize {
        self.frames.len()
    }
}

impl ReadableStore for DictZipStore {
    fn num_data_rows(&self) -> usize {
        self.raw_lens.len()
    }

    fn data_storage_size(&self) -> u64 {
        (self.dict_len + self.offsets.mem_size() + self.raw_lens.mem_size() + self.frames.len())
            as u64
    }

    fn get_value_append(&self, id: usize, out: &mut Vec<u8>) -> CoreResult<()> {
        let raw_len = self.raw_lens.get(id) as usize;
        if raw_len == 0 {
            return Ok(());
        }
        let start = self.offsets.get(id) as usize;
        let end = self.offsets.get(id + 1) as usize;
        if start > end || end > self.frames.len() {
            return Err(CoreError::segment_corruption(format!("frame {id} out of range")));
        }
        let value = self.decoder.lock().decompress(&self.frames[start..end], raw_len)?;
        if value.len() != raw_len {
            return Err(CoreError::segment_corruption(format!(
                "frame {id} decoded to {} bytes, expected {raw_len}",
                value.len()
            )));
        }
        out.extend_from_slice(&value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options() -> BuildOptions {
        BuildOptions {
            zstd_level: 3,
            dict_sample_bytes: 1 << 20,
            dict_max_bytes: 16 * 1024,
        }
    }

    fn records(n: usize) -> Vec<Vec<u8>> {
        (0..n)
            .map(|i| {
                format!("{{\"user\":\"user-{i}\",\"city\":\"Lisbon\",\"active\":true}}\0")
                    .into_bytes()
            })
            .collect()
    }

    #[test]
    fn roundtrip_with_dictionary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cg0.dzip");
        let values = records(2000);
        DictZipStore::write_file(&path, &values, &options()).unwrap();

        let store = DictZipStore::open(&path, false).unwrap();
        assert_eq!(store.num_data_rows(), values.len());
        for i in [0, 1, 999, 1999] {
            assert_eq!(store.get_value(i).unwrap(), values[i]);
        }
        assert!(store.data_storage_size() > 0);
    }

    #[test]
    fn small_batch_without_dictionary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cg0.dzip");
        let values = vec![b"a\0".to_vec(), Vec::new(), b"ccc\0".to_vec()];
        DictZipStore::write_file(&path, &values, &options()).unwrap();

        let store = DictZipStore::open(&path, false).unwrap();
        assert!(!store.has_dictionary());
        for (i, v) in values.iter().enumerate() {
            assert_eq!(&store.get_value(i).unwrap(), v);
        }
    }

    #[test]
    fn empty_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cg0.dzip");
        DictZipStore::write_file(&path, &[], &options()).unwrap();
        let store = DictZipStore::open(&path, false).unwrap();
        assert_eq!(store.num_data_rows(), 0);
    }

    #[test]
    fn corrupt_magic_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cg0.dzip");
        DictZipStore::write_file(&path, &records(3), &options()).unwrap();
        let mut data = std::fs::read(&path).unwrap();
        data[0] = b'X';
        std::fs::write(&path, data).unwrap();
        assert!(DictZipStore::open(&path, false).is_err());
    }
}
