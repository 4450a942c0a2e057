//! Bit-packed integer column group store.
//!
//! Values are stored as `value - min` in a [`UintVecMin0`] after a 16-byte
//! header:
//!
//! ```text
//! rows: u32 | int_bits: u8 | int_type: u8 | padding: u16 | min: i64
//! ```
//!
//! Signed and unsigned sources, variable-length ones included, are first
//! widened to their 64-bit two's complement pattern. The store is built
//! once from a complete batch.

use super::{ReadableStore, UintVecMin0};
use crate::buf::{ByteView, Reader};
use crate::error::{CoreError, CoreResult};
use std::path::Path;
use strata_codec::{bits_to_payload, payload_to_bits, ColumnType};
use strata_storage::MappedFile;

/// Size of the file header.
pub const ZIP_INT_HEADER_LEN: usize = 16;

/// Integer column stored relative to its minimum.
#[derive(Debug, Clone)]
pub struct ZipIntStore {
    ty: ColumnType,
    min: u64,
    values: UintVecMin0,
}

impl ZipIntStore {
    /// Builds a store from column payloads.
    ///
    /// # Errors
    ///
    /// Returns an error if `ty` is not an integer type, a payload is
    /// malformed, or there are more than `u32::MAX` rows.
    pub fn build(ty: ColumnType, payloads: &[Vec<u8>]) -> CoreResult<Self> {
        if !ty.is_integer() {
            return Err(CoreError::invalid_format(format!("{ty:?} is not an integer type")));
        }
        u32::try_from(payloads.len())
            .map_err(|_| CoreError::invalid_operation("too many rows for an integer store"))?;
        let bits = payloads
            .iter()
            .map(|p| payload_to_bits(ty, p))
            .collect::<Result<Vec<_>, _>>()?;

        let min = if ty.is_signed() {
            bits.iter().map(|&b| b as i64).min().unwrap_or(0) as u64
        } else {
            bits.iter().copied().min().unwrap_or(0)
        };
        let deltas: Vec<u64> = bits.iter().map(|b| b.wrapping_sub(min)).collect();
        Ok(Self {
            ty,
            min,
            values: UintVecMin0::build(&deltas),
        })
    }

    /// Serializes header and packed values.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ZIP_INT_HEADER_LEN + self.values.mem_size());
        out.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        out.push(self.values.bits());
        out.push(self.ty.tag());
        out.extend_from_slice(&[0u8; 2]);
        out.extend_from_slice(&self.min.to_le_bytes());
        self.values.write_raw_to(&mut out);
        out
    }

    /// Writes the store to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_file(&self, path: &Path) -> CoreResult<()> {
        std::fs::write(path, self.encode())?;
        Ok(())
    }

    /// Parses a store from its serialized form.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is invalid or the data is truncated.
    pub fn from_view(view: ByteView) -> CoreResult<Self> {
        let mut r = Reader::new(&view, "integer store header");
        let rows = r.u32()? as usize;
        let bits = r.u8()?;
        let tag = r.u8()?;
        r.u16()?;
        let min = r.i64()? as u64;
        let ty = ColumnType::from_tag(tag)
            .filter(|t| t.is_integer())
            .ok_or_else(|| CoreError::segment_corruption(format!("bad integer type tag {tag}")))?;
        let body = view.slice(ZIP_INT_HEADER_LEN..view.len())?;
        Ok(Self {
            ty,
            min,
            values: UintVecMin0::from_raw(bits, rows, body)?,
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

    /// Returns the minimum as a signed value.
    #[must_use]
    pub fn min_value(&self) -> i64 {
        self.min as i64
    }

    /// Returns the bits per packed value.
    #[must_use]
    pub fn int_bits(&self) -> u8 {
        self.values.bits()
    }

    /// Returns the source column type.
    #[must_use]
    pub fn int_type(&self) -> ColumnType {
        self.ty
    }

    /// Returns the 64-bit pattern of row `id`.
    #[must_use]
    pub fn get_bits(&self, id: usize) -> u64 {
        self.min.wrapping_add(self.values.get(id))
    }
}

impl ReadableStore for ZipIntStore {
    fn num_data_rows(&self) -> usize {
        self.values.len()
    }

    fn data_storage_size(&self) -> u64 {
        (ZIP_INT_HEADER_LEN + self.values.mem_size()) as u64
    }

    fn get_value_append(&self, id: usize, out: &mut Vec<u8>) -> CoreResult<()> {
        out.extend_from_slice(&bits_to_payload(self.ty, self.get_bits(id))?);
        Ok(())
    }
}
