//! Order-preserving index key encoding.
//!
//! Every field is written as `(type tag + 1)` followed by its value bytes,
//! chosen so that comparing two keys byte by byte gives the same order as
//! comparing the typed values field by field:
//!
//! - unsigned integers: big-endian
//! - signed integers: big-endian with the sign bit flipped
//! - variable-length integers: widened to 64 bits first
//! - floats: sign bit flipped for positives, all bits flipped for negatives;
//!   `-0.0` is stored as `0.0`
//! - `uuid` / `fixed`: raw bytes
//! - strings: raw bytes then `0x00`
//! - binary: `0x00` escaped as `0x00 0xff`, terminated by `0x00 0x00`
//!
//! Keys do not carry lengths or names, so decoding needs the schema of the
//! index as a side channel.

use crate::error::{CodecError, CodecResult};
use crate::row::decode_value;
use crate::schema::{ColumnMeta, ColumnType, Schema};
use crate::value::{Record, Value};

const SIGN64: u64 = 1 << 63;

/// Returns the encoded width of one key field, tag included, if it is fixed.
#[must_use]
pub fn key_field_width(col: &ColumnMeta) -> Option<usize> {
    let body = match col.ty {
        ColumnType::VarSint | ColumnType::VarUint => Some(8),
        ColumnType::StrZero | ColumnType::Binary => None,
        _ => col.width(),
    };
    body.map(|w| w + 1)
}

/// Returns the key length if every field of `schema` has a fixed key width.
#[must_use]
pub fn fixed_key_len(schema: &Schema) -> Option<usize> {
    schema.columns().iter().map(key_field_width).sum()
}

/// Encodes typed values into a key.
///
/// # Errors
///
/// Returns an error if the value count or a value type does not match.
pub fn encode_key(schema: &Schema, values: &[Value]) -> CodecResult<Vec<u8>> {
    if values.len() != schema.len() {
        return Err(CodecError::ColumnCount {
            expected: schema.len(),
            actual: values.len(),
        });
    }
    let mut out = Vec::with_capacity(fixed_key_len(schema).unwrap_or(32));
    for (col, value) in schema.columns().iter().zip(values) {
        encode_key_field(col, value, &mut out)?;
    }
    Ok(out)
}

/// Encodes row column payloads (as returned by [`Schema::parse_row`]) into
/// a key.
///
/// # Errors
///
/// Returns an error if a payload is malformed for its column.
pub fn encode_key_payloads(schema: &Schema, payloads: &[&[u8]]) -> CodecResult<Vec<u8>> {
    if payloads.len() != schema.len() {
        return Err(CodecError::ColumnCount {
            expected: schema.len(),
            actual: payloads.len(),
        });
    }
    let mut out = Vec::with_capacity(fixed_key_len(schema).unwrap_or(32));
    for (col, payload) in schema.columns().iter().zip(payloads) {
        let value = decode_value(col, payload)?;
        encode_key_field(col, &value, &mut out)?;
    }
    Ok(out)
}

/// Maps `-0.0` to `0.0` so equal floats encode to equal keys.
fn zero_normalized<F: PartialEq + Default>(v: F) -> F {
    if v == F::default() {
        F::default()
    } else {
        v
    }
}

/// Appends one encoded key field.
///
/// # Errors
///
/// Returns [`CodecError::TypeMismatch`] if the value does not fit the column.
pub fn encode_key_field(col: &ColumnMeta, value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
    let mismatch = || CodecError::type_mismatch(&col.name, format!("{:?}", col.ty));
    out.push(col.ty.tag() + 1);
    match (col.ty, value) {
        (ColumnType::Uint08, Value::Uint(v)) => {
            out.push(u8::try_from(*v).map_err(|_| mismatch())?);
        }
        (ColumnType::Uint16, Value::Uint(v)) => {
            out.extend_from_slice(&u16::try_from(*v).map_err(|_| mismatch())?.to_be_bytes());
        }
        (ColumnType::Uint32, Value::Uint(v)) => {
            out.extend_from_slice(&u32::try_from(*v).map_err(|_| mismatch())?.to_be_bytes());
        }
        (ColumnType::Uint64 | ColumnType::VarUint, Value::Uint(v)) => {
            out.extend_from_slice(&v.to_be_bytes());
        }
        (ColumnType::Sint08, Value::Int(v)) => {
            let v = i8::try_from(*v).map_err(|_| mismatch())?;
            out.push((v as u8) ^ 0x80);
        }
        (ColumnType::Sint16, Value::Int(v)) => {
            let v = i16::try_from(*v).map_err(|_| mismatch())?;
            out.extend_from_slice(&((v as u16) ^ 0x8000).to_be_bytes());
        }
        (ColumnType::Sint32, Value::Int(v)) => {
            let v = i32::try_from(*v).map_err(|_| mismatch())?;
            out.extend_from_slice(&((v as u32) ^ 0x8000_0000).to_be_bytes());
        }
        (ColumnType::Sint64 | ColumnType::VarSint, Value::Int(v)) => {
            out.extend_from_slice(&((*v as u64) ^ SIGN64).to_be_bytes());
        }
        (ColumnType::Float32, Value::Float(v)) => {
            let bits = zero_normalized(*v as f32).to_bits();
            let ordered = if bits & 0x8000_0000 != 0 {
                !bits
            } else {
                bits | 0x8000_0000
            };
            out.extend_from_slice(&ordered.to_be_bytes());
        }
        (ColumnType::Float64, Value::Float(v)) => {
            let bits = zero_normalized(*v).to_bits();
            let ordered = if bits & SIGN64 != 0 { !bits } else { bits | SIGN64 };
            out.extend_from_slice(&ordered.to_be_bytes());
        }
        (ColumnType::Uuid | ColumnType::Fixed, Value::Bytes(b)) => {
            if Some(b.len()) != col.width() {
                return Err(mismatch());
            }
            out.extend_from_slice(b);
        }
        (ColumnType::StrZero, Value::Text(s)) => {
            if s.as_bytes().contains(&0) {
                return Err(mismatch());
            }
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        (ColumnType::Binary, Value::Bytes(b)) => {
            for &byte in b {
                if byte == 0 {
                    out.extend_from_slice(&[0x00, 0xff]);
                } else {
                    out.push(byte);
                }
            }
            out.extend_from_slice(&[0x00, 0x00]);
        }
        _ => return Err(mismatch()),
    }
    Ok(())
}

/// Decodes a key back into typed values.
///
/// # Errors
///
/// Returns an error if a tag does not match the schema, the key is truncated
/// or has trailing bytes.
pub fn decode_key(schema: &Schema, key: &[u8]) -> CodecResult<Record> {
    let mut pos = 0usize;
    let mut out = Vec::with_capacity(schema.len());
    for (field, col) in schema.columns().iter().enumerate() {
        let tag = *key.get(pos).ok_or(CodecError::UnexpectedEof)?;
        if tag != col.ty.tag() + 1 {
            return Err(CodecError::KeyTagMismatch {
                field,
                expected: col.ty.tag() + 1,
                found: tag,
            });
        }
        pos += 1;
        let (value, used) = decode_key_field(col, &key[pos..])?;
        out.push(value);
        pos += used;
    }
    if pos != key.len() {
        return Err(CodecError::decoding_failed("trailing bytes after key"));
    }
    Ok(out)
}

/// Decodes a key into `(field name, value)` pairs.
///
/// # Errors
///
/// Same as [`decode_key`].
pub fn decode_key_named(schema: &Schema, key: &[u8]) -> CodecResult<Vec<(String, Value)>> {
    let values = decode_key(schema, key)?;
    Ok(schema.names().map(str::to_string).zip(values).collect())
}

fn decode_key_field(col: &ColumnMeta, data: &[u8]) -> CodecResult<(Value, usize)> {
    fn take<const N: usize>(data: &[u8]) -> CodecResult<[u8; N]> {
        data.get(..N)
            .and_then(|s| s.try_into().ok())
            .ok_or(CodecError::UnexpectedEof)
    }
    let decoded = match col.ty {
        ColumnType::Uint08 => (Value::Uint(u64::from(take::<1>(data)?[0])), 1),
        ColumnType::Uint16 => (Value::Uint(u64::from(u16::from_be_bytes(take(data)?))), 2),
        ColumnType::Uint32 => (Value::Uint(u64::from(u32::from_be_bytes(take(data)?))), 4),
        ColumnType::Uint64 | ColumnType::VarUint => {
            (Value::Uint(u64::from_be_bytes(take(data)?)), 8)
        }
        ColumnType::Sint08 => (Value::Int(i64::from((take::<1>(data)?[0] ^ 0x80) as i8)), 1),
        ColumnType::Sint16 => {
            let raw = u16::from_be_bytes(take(data)?) ^ 0x8000;
            (Value::Int(i64::from(raw as i16)), 2)
        }
        ColumnType::Sint32 => {
            let raw = u32::from_be_bytes(take(data)?) ^ 0x8000_0000;
            (Value::Int(i64::from(raw as i32)), 4)
        }
        ColumnType::Sint64 | ColumnType::VarSint => {
            let raw = u64::from_be_bytes(take(data)?) ^ SIGN64;
            (Value::Int(raw as i64), 8)
        }
        ColumnType::Float32 => {
            let ordered = u32::from_be_bytes(take(data)?);
            let bits = if ordered & 0x8000_0000 != 0 {
                ordered & !0x8000_0000
            } else {
                !ordered
            };
            (Value::Float(f64::from(f32::from_bits(bits))), 4)
        }
        ColumnType::Float64 => {
            let ordered = u64::from_be_bytes(take(data)?);
            let bits = if ordered & SIGN64 != 0 {
                ordered & !SIGN64
            } else {
                !ordered
            };
            (Value::Float(f64::from_bits(bits)), 8)
        }
        ColumnType::Uuid | ColumnType::Fixed => {
            let width = col.width().unwrap_or_default();
            let bytes = data.get(..width).ok_or(CodecError::UnexpectedEof)?;
            (Value::Bytes(bytes.to_vec()), width)
        }
        ColumnType::StrZero => {
            let end = data
                .iter()
                .position(|&b| b == 0)
                .ok_or(CodecError::UnexpectedEof)?;
            let text = std::str::from_utf8(&data[..end]).map_err(|_| CodecError::InvalidUtf8)?;
            (Value::Text(text.to_string()), end + 1)
        }
        ColumnType::Binary => {
            let mut bytes = Vec::new();
            let mut i = 0;
            loop {
                match (data.get(i), data.get(i + 1)) {
                    (Some(0x00), Some(0x00)) => break,
                    (Some(0x00), Some(0xff)) => {
                        bytes.push(0);
                        i += 2;
                    }
                    (Some(0x00), Some(other)) => {
                        return Err(CodecError::decoding_failed(format!(
                            "invalid escape 0x00 {other:#04x}"
                        )))
                    }
                    (Some(&b), _) if b != 0 => {
                        bytes.push(b);
                        i += 1;
                    }
                    _ => return Err(CodecError::UnexpectedEof),
                }
            }
            (Value::Bytes(bytes), i + 2)
        }
    };
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn single(ty: ColumnType) -> Schema {
        Schema::new(vec![ColumnMeta::new("k", ty)]).unwrap()
    }

    fn key(schema: &Schema, v: Value) -> Vec<u8> {
        encode_key(schema, &[v]).unwrap()
    }

    #[test]
    fn layout_matches_tag_plus_one() {
        let schema = single(ColumnType::Sint32);
        assert_eq!(key(&schema, Value::Int(0)), [6, 0x80, 0, 0, 0]);
        assert_eq!(key(&schema, Value::Int(-1)), [6, 0x7f, 0xff, 0xff, 0xff]);
        let schema = single(ColumnType::StrZero);
        assert_eq!(key(&schema, Value::from("ab")), [15, b'a', b'b', 0]);
    }

    #[test]
    fn composite_roundtrip_and_named() {
        let schema = Schema::new(vec![
            ColumnMeta::new("city", ColumnType::StrZero),
            ColumnMeta::new("age", ColumnType::Sint16),
            ColumnMeta::new("tag", ColumnType::Binary),
            ColumnMeta::new("id", ColumnType::Uuid),
        ])
        .unwrap();
        let values = vec![
            Value::from("Oslo"),
            Value::Int(-7),
            Value::Bytes(vec![0, 1, 0]),
            Value::Bytes(vec![3; 16]),
        ];
        let k = encode_key(&schema, &values).unwrap();
        assert_eq!(decode_key(&schema, &k).unwrap(), values);
        let named = decode_key_named(&schema, &k).unwrap();
        assert_eq!(named[1], ("age".to_string(), Value::Int(-7)));
    }

    #[test]
    fn fixed_lengths() {
        let schema = Schema::new(vec![
            ColumnMeta::new("a", ColumnType::Sint64),
            ColumnMeta::new("b", ColumnType::VarUint),
            ColumnMeta::fixed("c", 3),
        ])
        .unwrap();
        assert_eq!(fixed_key_len(&schema), Some(9 + 9 + 4));
        let values = vec![Value::Int(1), Value::Uint(2), Value::Bytes(vec![1, 2, 3])];
        assert_eq!(encode_key(&schema, &values).unwrap().len(), 22);
        assert_eq!(fixed_key_len(&single(ColumnType::StrZero)), None);
    }

    #[test]
    fn payloads_match_values() {
        let schema = Schema::new(vec![
            ColumnMeta::new("a", ColumnType::VarSint),
            ColumnMeta::new("b", ColumnType::StrZero),
        ])
        .unwrap();
        let record = vec![Value::Int(-3), Value::from("z")];
        let row = crate::RowCodec::encode(&schema, &record).unwrap();
        let payloads = schema.parse_row(&row).unwrap();
        assert_eq!(
            encode_key_payloads(&schema, &payloads).unwrap(),
            encode_key(&schema, &[Value::Int(-3), Value::from("z")]).unwrap()
        );
    }

    #[test]
    fn tag_mismatch_detected() {
        let k = key(&single(ColumnType::Uint32), Value::Uint(5));
        let err = decode_key(&single(ColumnType::Sint32), &k).unwrap_err();
        assert!(matches!(err, CodecError::KeyTagMismatch { field: 0, .. }));
    }

    #[test]
    fn negative_zero_matches_zero() {
        for ty in [ColumnType::Float32, ColumnType::Float64] {
            let s = single(ty);
            let zero = key(&s, Value::Float(0.0));
            assert_eq!(key(&s, Value::Float(-0.0)), zero);
            assert!(key(&s, Value::Float(-1e-3)) < zero);
            assert!(key(&s, Value::Float(1e-3)) > zero);
            match decode_key(&s, &zero).unwrap()[0] {
                Value::Float(v) => assert!(v == 0.0 && v.is_sign_positive()),
                ref other => panic!("decoded {other:?}"),
            }
        }
    }

    proptest! {
        #[test]
        fn sint64_order(a in any::<i64>(), b in any::<i64>()) {
            let s = single(ColumnType::Sint64);
            prop_assert_eq!(a.cmp(&b), key(&s, Value::Int(a)).cmp(&key(&s, Value::Int(b))));
        }

        #[test]
        fn sint16_order(a in any::<i16>(), b in any::<i16>()) {
            let s = single(ColumnType::Sint16);
            let (ka, kb) = (key(&s, Value::Int(a.into())), key(&s, Value::Int(b.into())));
            prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
        }

        #[test]
        fn uint32_order(a in any::<u32>(), b in any::<u32>()) {
            let s = single(ColumnType::Uint32);
            let (ka, kb) = (key(&s, Value::Uint(a.into())), key(&s, Value::Uint(b.into())));
            prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
        }

        #[test]
        fn float64_order(a in proptest::num::f64::NORMAL | proptest::num::f64::ZERO,
                         b in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
            let s = single(ColumnType::Float64);
            let (ka, kb) = (key(&s, Value::Float(a)), key(&s, Value::Float(b)));
            if a < b {
                prop_assert!(ka < kb);
            } else if a > b {
                prop_assert!(ka > kb);
            } else {
                prop_assert_eq!(&ka, &kb);
            }
            prop_assert_eq!(decode_key(&s, &ka).unwrap(), vec![Value::Float(a)]);
        }

        #[test]
        fn string_order(a in "[a-z0-9]{0,8}", b in "[a-z0-9]{0,8}") {
            let s = single(ColumnType::StrZero);
            let (ka, kb) = (key(&s, Value::from(a.as_str())), key(&s, Value::from(b.as_str())));
            prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
        }

        #[test]
        fn binary_order(a in proptest::collection::vec(any::<u8>(), 0..8),
                        b in proptest::collection::vec(any::<u8>(), 0..8)) {
            let s = single(ColumnType::Binary);
            let (ka, kb) = (key(&s, Value::Bytes(a.clone())), key(&s, Value::Bytes(b.clone())));
            prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
            prop_assert_eq!(decode_key(&s, &ka).unwrap(), vec![Value::Bytes(a)]);
        }

        #[test]
        fn composite_order(a in (any::<i32>(), "[a-c]{0,3}"), b in (any::<i32>(), "[a-c]{0,3}")) {
            let s = Schema::new(vec![
                ColumnMeta::new("x", ColumnType::Sint32),
                ColumnMeta::new("y", ColumnType::StrZero),
            ]).unwrap();
            let ka = encode_key(&s, &[Value::Int(a.0.into()), Value::from(a.1.as_str())]).unwrap();
            let kb = encode_key(&s, &[Value::Int(b.0.into()), Value::from(b.1.as_str())]).unwrap();
            prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
        }
    }
}
