//! Column group stores.
//!
//! Every column group of a segment is held by one store. Stores share a
//! read contract ([`ReadableStore`]); the mutable encodings used by
//! writable segments also implement [`WritableStore`]. The encoding of a
//! group is fixed by its schema, so dispatch goes through the closed
//! [`ColgroupStore`] enum.

mod dict_zip;
mod fixed_len;
mod uint_vec;
mod var_len;
mod zip_int;

pub use dict_zip::DictZipStore;
pub use fixed_len::{FixedLenStore, FIXED_HEADER_LEN};
pub use uint_vec::{UintVecMin0, UINT_VEC_HEADER_LEN};
pub use var_len::VarLenStore;
pub use zip_int::{ZipIntStore, ZIP_INT_HEADER_LEN};

use crate::config::TableConfig;
use crate::error::{CoreError, CoreResult};
use crate::schema::{ColgroupSchema, StoreEncoding};
use std::path::{Path, PathBuf};

/// Read access to a store keyed by sub-id.
pub trait ReadableStore: Send + Sync {
    /// Returns the number of rows, deleted ones included.
    fn num_data_rows(&self) -> usize;

    /// Returns the bytes of row data held.
    fn data_storage_size(&self) -> u64;

    /// Appends the value of row `id` to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value cannot be decoded.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range.
    fn get_value_append(&self, id: usize, out: &mut Vec<u8>) -> CoreResult<()>;

    /// Returns the value of row `id`.
    ///
    /// # Errors
    ///
    /// Same as [`ReadableStore::get_value_append`].
    fn get_value(&self, id: usize) -> CoreResult<Vec<u8>> {
        let mut out = Vec::new();
        self.get_value_append(id, &mut out)?;
        Ok(out)
    }
}

/// Mutation of a store owned by a writable segment.
pub trait WritableStore: ReadableStore {
    /// Appends a row and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing file cannot grow.
    fn append(&self, value: &[u8]) -> CoreResult<u32>;

    /// Overwrites row `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is frozen or the write fails.
    fn update(&self, id: usize, value: &[u8]) -> CoreResult<()>;

    /// Drops row `id` if it is the last one; otherwise does nothing, as
    /// the segment's deletion bitmap is authoritative.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is frozen.
    fn remove(&self, id: usize) -> CoreResult<()>;

    /// Flushes dirty pages.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> CoreResult<()>;

    /// Truncates the backing files to the bytes in use. Later appends grow
    /// them again.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is frozen or a file cannot be resized.
    fn shrink_to_fit(&self) -> CoreResult<()>;
}

/// Compression settings for readonly stores.
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    /// zstd level.
    pub zstd_level: i32,
    /// Bytes of sample values used to train a dictionary.
    pub dict_sample_bytes: usize,
    /// Maximum dictionary size.
    pub dict_max_bytes: usize,
}

impl From<&TableConfig> for BuildOptions {
    fn from(config: &TableConfig) -> Self {
        Self {
            zstd_level: config.zstd_level,
            dict_sample_bytes: config.dict_sample_bytes,
            dict_max_bytes: config.dict_max_bytes,
        }
    }
}

/// A column group store of any encoding.
#[derive(Debug)]
pub enum ColgroupStore {
    /// Fixed-stride rows.
    FixedLen(FixedLenStore),
    /// Offsets plus heap.
    VarLen(VarLenStore),
    /// Bit-packed integers.
    ZipInt(ZipIntStore),
    /// Dictionary-compressed values.
    DictZip(DictZipStore),
}

fn file(dir: &Path, g: usize, ext: &str) -> PathBuf {
    dir.join(format!("cg{g}.{ext}"))
}

impl ColgroupStore {
    /// Creates the empty mutable store of group `g` in a writable segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be created.
    pub fn create_writable(dir: &Path, g: usize, cg: &ColgroupSchema) -> CoreResult<Self> {
        Ok(match cg.fixed_len() {
            Some(len) => Self::FixedLen(FixedLenStore::create(&file(dir, g, "fix"), len)?),
            None => Self::VarLen(VarLenStore::create(
                &file(dir, g, "vidx"),
                &file(dir, g, "vdat"),
            )?),
        })
    }

    /// Opens the mutable store of group `g` in a writable segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the files are missing or corrupted.
    pub fn open_writable(dir: &Path, g: usize, cg: &ColgroupSchema) -> CoreResult<Self> {
        Ok(match cg.fixed_len() {
            Some(len) => {
                Self::FixedLen(FixedLenStore::open(&file(dir, g, "fix"), len, true, false)?)
            }
            None => Self::VarLen(VarLenStore::open(
                &file(dir, g, "vidx"),
                &file(dir, g, "vdat"),
                true,
                false,
            )?),
        })
    }

    /// Writes group `g` of a readonly segment in its readonly encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn write_readonly(
        dir: &Path,
        g: usize,
        cg: &ColgroupSchema,
        values: &[Vec<u8>],
        options: &BuildOptions,
    ) -> CoreResult<()> {
        match cg.readonly_encoding() {
            StoreEncoding::ZipInt => {
                let ty = cg.single_integer_type().ok_or_else(|| {
                    CoreError::invalid_format("zipint group is not one integer")
                })?;
                ZipIntStore::build(ty, values)?.write_file(&file(dir, g, "zint"))
            }
            StoreEncoding::FixLen => match cg.fixed_len() {
                Some(len) => FixedLenStore::write_file(&file(dir, g, "fix"), len, values),
                None => Err(CoreError::invalid_format(
                    "fixlen group has variable-width columns",
                )),
            },
            StoreEncoding::Plain => {
                VarLenStore::write_files(&file(dir, g, "vidx"), &file(dir, g, "vdat"), values)
            }
            StoreEncoding::DictZip | StoreEncoding::Auto => {
                DictZipStore::write_file(&file(dir, g, "dzip"), values, options)
            }
        }
    }

    /// Opens group `g` of a readonly segment.
    ///
    /// Inplace-updatable groups are mapped writable; all others read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the files are missing or corrupted.
    pub fn open_readonly(
        dir: &Path,
        g: usize,
        cg: &ColgroupSchema,
        populate: bool,
    ) -> CoreResult<Self> {
        Ok(match cg.readonly_encoding() {
            StoreEncoding::ZipInt => {
                Self::ZipInt(ZipIntStore::open(&file(dir, g, "zint"), populate)?)
            }
            StoreEncoding::FixLen => {
                let len = cg.fixed_len().unwrap_or_default();
                let path = file(dir, g, "fix");
                Self::FixedLen(FixedLenStore::open(&path, len, cg.inplace_updatable, populate)?)
            }
            StoreEncoding::Plain => Self::VarLen(VarLenStore::open(
                &file(dir, g, "vidx"),
                &file(dir, g, "vdat"),
                false,
                populate,
            )?),
            StoreEncoding::DictZip | StoreEncoding::Auto => {
                Self::DictZip(DictZipStore::open(&file(dir, g, "dzip"), populate)?)
            }
        })
    }

    /// Returns the encoding of this store.
    #[must_use]
    pub fn encoding(&self) -> StoreEncoding {
        match self {
            Self::FixedLen(_) => StoreEncoding::FixLen,
            Self::VarLen(_) => StoreEncoding::Plain,
            Self::ZipInt(_) => StoreEncoding::ZipInt,
            Self::DictZip(_) => StoreEncoding::DictZip,
        }
    }

    /// Returns the store as writable if its encoding and mapping allow it.
    #[must_use]
    pub fn as_writable(&self) -> Option<&dyn WritableStore> {
        match self {
            Self::FixedLen(s) if s.is_mutable() => Some(s),
            Self::VarLen(s) if s.is_mutable() => Some(s),
            _ => None,
        }
    }

    fn inner(&self) -> &dyn ReadableStore {
        match self {
            Self::FixedLen(s) => s,
            Self::VarLen(s) => s,
            Self::ZipInt(s) => s,
            Self::DictZip(s) => s,
        }
    }
}

impl ReadableStore for ColgroupStore {
    fn num_data_rows(&self) -> usize {
        self.inner().num_data_rows()
    }

    fn data_storage_size(&self) -> u64 {
        self.inner().data_storage_size()
    }

    fn get_value_append(&self, id: usize, out: &mut Vec<u8>) -> CoreResult<()> {
        self.inner().get_value_append(id, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchemaDef;
    use strata_codec::{ColumnMeta, ColumnType};
    use tempfile::tempdir;

    fn groups() -> Vec<ColgroupSchema> {
        TableSchemaDef::new(vec![
            ColumnMeta::new("id", ColumnType::Sint64),
            ColumnMeta::new("name", ColumnType::StrZero),
            ColumnMeta::fixed("code", 3),
            ColumnMeta::new("note", ColumnType::Binary),
        ])
        .colgroup("id", &["id"], StoreEncoding::Auto)
        .colgroup("name", &["name"], StoreEncoding::Auto)
        .colgroup("code", &["code"], StoreEncoding::Auto)
        .colgroup("note", &["note"], StoreEncoding::Plain)
        .build()
        .unwrap()
        .colgroups()
        .to_vec()
    }

    fn sample(g: usize, i: usize) -> Vec<u8> {
        match g {
            0 => (i as i64 * 7 - 20).to_le_bytes().to_vec(),
            1 => format!("name-{i}\0").into_bytes(),
            2 => vec![i as u8, 1, 2],
            _ => vec![0xab; i % 5],
        }
    }

    #[test]
    fn writable_then_readonly_roundtrip() {
        let dir = tempdir().unwrap();
        let options = BuildOptions::from(&TableConfig::default());
        for (g, cg) in groups().iter().enumerate() {
            let store = ColgroupStore::create_writable(dir.path(), g, cg).unwrap();
            let writable = store.as_writable().unwrap();
            for i in 0..50 {
                assert_eq!(writable.append(&sample(g, i)).unwrap() as usize, i);
            }
            let values: Vec<Vec<u8>> = (0..store.num_data_rows())
                .map(|i| store.get_value(i).unwrap())
                .collect();

            ColgroupStore::write_readonly(dir.path(), g, cg, &values, &options).unwrap();
            let readonly = ColgroupStore::open_readonly(dir.path(), g, cg, false).unwrap();
            assert_eq!(readonly.encoding(), cg.readonly_encoding());
            assert!(readonly.as_writable().is_none());
            for (i, value) in values.iter().enumerate() {
                assert_eq!(&readonly.get_value(i).unwrap(), value, "group {g} row {i}");
            }
        }
    }
}
