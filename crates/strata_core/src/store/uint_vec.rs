//! Minimal-bit unsigned integer vector.

use crate::buf::{ByteView, Reader};
use crate::error::{CoreError, CoreResult};

/// Serialized header: `len: u64`, `bits: u8`, 7 bytes padding.
pub const UINT_VEC_HEADER_LEN: usize = 16;

// Reads load 16 bytes at the byte holding the first bit of a value.
const TAIL_PAD: usize = 16;

/// Packed vector of unsigned integers using `bits` bits per value, where
/// `bits` is the width of the largest value (zero if all values are zero).
///
/// Values are laid out little-endian bit by bit. The vector is immutable
/// and can live directly on a mapped file.
#[derive(Debug, Clone)]
pub struct UintVecMin0 {
    bits: u8,
    len: usize,
    data: ByteView,
}

impl UintVecMin0 {
    /// Number of bits needed for `max`.
    #[must_use]
    pub const fn bits_for(max: u64) -> u8 {
        (64 - max.leading_zeros()) as u8
    }

    /// Bytes of packed data for `len` values of `bits` bits, padding included.
    #[must_use]
    pub const fn data_len(len: usize, bits: u8) -> usize {
        (len * bits as usize).div_ceil(8) + TAIL_PAD
    }

    /// Packs `values` with the minimal width.
    #[must_use]
    pub fn build(values: &[u64]) -> Self {
        let max = values.iter().copied().max().unwrap_or(0);
        Self::build_with_bits(values, Self::bits_for(max))
    }

    /// Packs `values` with an explicit width.
    ///
    /// # Panics
    ///
    /// Panics if a value does not fit in `bits`.
    #[must_use]
    pub fn build_with_bits(values: &[u64], bits: u8) -> Self {
        assert!(bits <= 64, "bit width {bits} exceeds 64");
        let mut buf = vec![0u8; Self::data_len(values.len(), bits)];
        for (i, &v) in values.iter().enumerate() {
            assert!(v & !mask(bits) == 0, "value {v} does not fit in {bits} bits");
            put(&mut buf, bits, i, v);
        }
        Self {
            bits,
            len: values.len(),
            data: ByteView::owned(buf),
        }
    }

    /// Wraps packed data without a header.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is shorter than [`Self::data_len`].
    pub fn from_raw(bits: u8, len: usize, data: ByteView) -> CoreResult<Self> {
        if bits > 64 {
            return Err(CoreError::segment_corruption(format!("bit width {bits}")));
        }
        let need = len
            .checked_mul(bits as usize)
            .map(|b| b.div_ceil(8) + TAIL_PAD)
            .ok_or_else(|| CoreError::segment_corruption("packed vector too long"))?;
        if data.len() < need {
            return Err(CoreError::segment_corruption(format!(
                "packed vector needs {need} bytes, has {}",
                data.len()
            )));
        }
        Ok(Self {
            bits,
            len,
            data: data.slice(0..need)?,
        })
    }

    /// Reads a vector written by [`Self::write_to`] at the start of `view`,
    /// returning it and the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns an error if the header or data is truncated.
    pub fn from_view(view: &ByteView) -> CoreResult<(Self, usize)> {
        let mut r = Reader::new(view, "packed vector");
        let len = usize::try_from(r.u64()?)
            .map_err(|_| CoreError::segment_corruption("packed vector too long"))?;
        let bits = r.u8()?;
        r.bytes(7)?;
        let body = view.slice(UINT_VEC_HEADER_LEN..view.len())?;
        let vec = Self::from_raw(bits, len, body)?;
        let used = UINT_VEC_HEADER_LEN + vec.data.len();
        Ok((vec, used))
    }

    /// Appends header and data.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.len as u64).to_le_bytes());
        out.push(self.bits);
        out.extend_from_slice(&[0u8; 7]);
        out.extend_from_slice(&self.data);
    }

    /// Appends the packed data only.
    pub fn write_raw_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.data);
    }

    /// Returns value `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    #[must_use]
    pub fn get(&self, i: usize) -> u64 {
        assert!(i < self.len, "index {i} out of range for {}", self.len);
        if self.bits == 0 {
            return 0;
        }
        let bit = i * self.bits as usize;
        let byte = bit / 8;
        let mut word = [0u8; 16];
        word.copy_from_slice(&self.data[byte..byte + 16]);
        let word = u128::from_le_bytes(word) >> (bit % 8);
        (word as u64) & mask(self.bits)
    }

    /// Returns the number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the vector holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the bit width.
    #[must_use]
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Returns the packed size in bytes.
    #[must_use]
    pub fn mem_size(&self) -> usize {
        self.data.len()
    }

    /// For a non-decreasing vector, returns the first index whose value is
    /// greater than `value`.
    #[must_use]
    pub fn upper_bound(&self, value: u64) -> usize {
        let (mut lo, mut hi) = (0usize, self.len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.get(mid) <= value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Iterates over all values.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len).map(|i| self.get(i))
    }
}

const fn mask(bits: u8) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn put(buf: &mut [u8], bits: u8, i: usize, v: u64) {
    if bits == 0 {
        return;
    }
    let bit = i * bits as usize;
    let byte = bit / 8;
    let shift = bit % 8;
    let mut word = [0u8; 16];
    word.copy_from_slice(&buf[byte..byte + 16]);
    let mut word = u128::from_le_bytes(word);
    word &= !(u128::from(mask(bits)) << shift);
    word |= u128::from(v) << shift;
    buf[byte..byte + 16].copy_from_slice(&word.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn minimal_width() {
        let vec = UintVecMin0::build(&[0, 5, 3, 7]);
        assert_eq!(vec.bits(), 3);
        assert_eq!(vec.iter().collect::<Vec<_>>(), [0, 5, 3, 7]);

        let zeros = UintVecMin0::build(&[0, 0, 0]);
        assert_eq!(zeros.bits(), 0);
        assert_eq!(zeros.get(2), 0);
    }

    #[test]
    fn full_width_values() {
        let values = [u64::MAX, 1, u64::MAX - 1, 0];
        let vec = UintVecMin0::build(&values);
        assert_eq!(vec.bits(), 64);
        assert_eq!(vec.iter().collect::<Vec<_>>(), values);
    }

    #[test]
    fn serialized_form() {
        let vec = UintVecMin0::build(&[10, 20, 30]);
        let mut out = vec![0xee];
        vec.write_to(&mut out);
        out.extend_from_slice(b"tail");

        let len = out.len();
        let view = ByteView::owned(out).slice(1..len).unwrap();
        let (decoded, used) = UintVecMin0::from_view(&view).unwrap();
        assert_eq!(decoded.iter().collect::<Vec<_>>(), [10, 20, 30]);
        assert_eq!(&view[used..], b"tail");
    }

    #[test]
    fn truncated_data_rejected() {
        let vec = UintVecMin0::build(&[1, 2, 3]);
        let mut out = Vec::new();
        vec.write_to(&mut out);
        out.truncate(out.len() - 1);
        assert!(UintVecMin0::from_view(&ByteView::owned(out)).is_err());
    }

    #[test]
    fn upper_bound_on_sorted() {
        let vec = UintVecMin0::build(&[0, 2, 2, 5, 9]);
        assert_eq!(vec.upper_bound(0), 1);
        assert_eq!(vec.upper_bound(2), 3);
        assert_eq!(vec.upper_bound(8), 4);
        assert_eq!(vec.upper_bound(9), 5);
    }

    proptest! {
        #[test]
        fn packs_any_values(
            values in proptest::collection::vec(any::<u64>(), 0..64),
            shift in 0u32..64,
        ) {
            let values: Vec<u64> = values.into_iter().map(|v| v >> shift).collect();
            let vec = UintVecMin0::build(&values);
            prop_assert_eq!(vec.iter().collect::<Vec<_>>(), values);
        }
    }
}
