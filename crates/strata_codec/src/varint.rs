//! LEB128 variable-length integers with zig-zag mapping for signed values.

use crate::error::{CodecError, CodecResult};

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Appends `value` as an unsigned LEB128 integer.
pub fn write_var_u64(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Appends `value` zig-zag mapped and LEB128 encoded.
pub fn write_var_i64(out: &mut Vec<u8>, value: i64) {
    write_var_u64(out, zigzag_encode(value));
}

/// Reads an unsigned LEB128 integer, returning the value and bytes consumed.
///
/// # Errors
///
/// Returns an error on truncated input or a value wider than 64 bits.
pub fn read_var_u64(data: &[u8]) -> CodecResult<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in data.iter().enumerate().take(MAX_VARINT_LEN) {
        let low = u64::from(byte & 0x7f);
        if shift == 63 && low > 1 {
            return Err(CodecError::IntegerOverflow);
        }
        value |= low << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    if data.len() >= MAX_VARINT_LEN {
        Err(CodecError::IntegerOverflow)
    } else {
        Err(CodecError::UnexpectedEof)
    }
}

/// Reads a zig-zag LEB128 integer, returning the value and bytes consumed.
///
/// # Errors
///
/// Returns an error on truncated or overlong input.
pub fn read_var_i64(data: &[u8]) -> CodecResult<(i64, usize)> {
    let (raw, len) = read_var_u64(data)?;
    Ok((zigzag_decode(raw), len))
}

/// Maps signed integers onto unsigned ones so small magnitudes stay short.
#[must_use]
pub const fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[must_use]
pub const fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn small_values_are_one_byte() {
        let mut buf = Vec::new();
        write_var_u64(&mut buf, 127);
        assert_eq!(buf, [0x7f]);
        buf.clear();
        write_var_i64(&mut buf, -1);
        assert_eq!(buf, [0x01]);
    }

    #[test]
    fn truncated_input() {
        assert_eq!(read_var_u64(&[0x80, 0x80]), Err(CodecError::UnexpectedEof));
        assert_eq!(read_var_u64(&[]), Err(CodecError::UnexpectedEof));
    }

    #[test]
    fn overlong_input() {
        let data = [0xffu8; 11];
        assert_eq!(read_var_u64(&data), Err(CodecError::IntegerOverflow));
    }

    #[test]
    fn extremes() {
        for v in [0u64, 1, u64::MAX, u64::MAX / 2] {
            let mut buf = Vec::new();
            write_var_u64(&mut buf, v);
            assert_eq!(read_var_u64(&buf).unwrap(), (v, buf.len()));
        }
        for v in [i64::MIN, i64::MAX, 0, -64, 63] {
            let mut buf = Vec::new();
            write_var_i64(&mut buf, v);
            assert_eq!(read_var_i64(&buf).unwrap().0, v);
        }
    }

    proptest! {
        #[test]
        fn signed_roundtrip(v in any::<i64>()) {
            let mut buf = Vec::new();
            write_var_i64(&mut buf, v);
            prop_assert_eq!(read_var_i64(&buf).unwrap(), (v, buf.len()));
        }
    }
}
