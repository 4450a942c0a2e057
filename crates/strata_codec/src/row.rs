//! Conversion between typed records and flat byte rows.

use crate::error::{CodecError, CodecResult};
use crate::schema::{ColumnMeta, ColumnType, Schema};
use crate::value::{Record, Value};
use crate::varint::{read_var_i64, read_var_u64, write_var_i64, write_var_u64};

/// The collaborator that turns structured records into flat rows and back.
///
/// The storage core only ever stores the output of [`RowCodec::encode`].
pub trait RowCodec {
    /// The structured record type.
    type Record;

    /// Encodes a record into a flat byte row.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not fit the schema.
    fn encode(&self, record: &Self::Record) -> CodecResult<Vec<u8>>;

    /// Decodes a flat byte row into a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is malformed.
    fn decode(&self, row: &[u8]) -> CodecResult<Self::Record>;
}

impl RowCodec for Schema {
    type Record = Record;

    fn encode(&self, record: &Record) -> CodecResult<Vec<u8>> {
        if record.len() != self.len() {
            return Err(CodecError::ColumnCount {
                expected: self.len(),
                actual: record.len(),
            });
        }
        let payloads = self
            .columns()
            .iter()
            .zip(record)
            .map(|(col, value)| encode_value(col, value))
            .collect::<CodecResult<Vec<_>>>()?;
        let refs: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
        self.combine_row(&refs)
    }

    fn decode(&self, row: &[u8]) -> CodecResult<Record> {
        let payloads = self.parse_row(row)?;
        self.columns()
            .iter()
            .zip(payloads)
            .map(|(col, payload)| decode_value(col, payload))
            .collect()
    }
}

/// Encodes a single value into its column payload (no row framing).
///
/// # Errors
///
/// Returns [`CodecError::TypeMismatch`] if the value variant or range does
/// not fit the column.
pub fn encode_value(col: &ColumnMeta, value: &Value) -> CodecResult<Vec<u8>> {
    let mismatch = || {
        CodecError::type_mismatch(&col.name, format!("{:?}, got {}", col.ty, value.kind()))
    };
    let out = match (col.ty, value) {
        (ColumnType::Uint08, Value::Uint(v)) => {
            u8::try_from(*v).map_err(|_| mismatch())?.to_le_bytes().to_vec()
        }
        (ColumnType::Uint16, Value::Uint(v)) => {
            u16::try_from(*v).map_err(|_| mismatch())?.to_le_bytes().to_vec()
        }
        (ColumnType::Uint32, Value::Uint(v)) => {
            u32::try_from(*v).map_err(|_| mismatch())?.to_le_bytes().to_vec()
        }
        (ColumnType::Uint64, Value::Uint(v)) => v.to_le_bytes().to_vec(),
        (ColumnType::Sint08, Value::Int(v)) => {
            i8::try_from(*v).map_err(|_| mismatch())?.to_le_bytes().to_vec()
        }
        (ColumnType::Sint16, Value::Int(v)) => {
            i16::try_from(*v).map_err(|_| mismatch())?.to_le_bytes().to_vec()
        }
        (ColumnType::Sint32, Value::Int(v)) => {
            i32::try_from(*v).map_err(|_| mismatch())?.to_le_bytes().to_vec()
        }
        (ColumnType::Sint64, Value::Int(v)) => v.to_le_bytes().to_vec(),
        (ColumnType::Float32, Value::Float(v)) => (*v as f32).to_le_bytes().to_vec(),
        (ColumnType::Float64, Value::Float(v)) => v.to_le_bytes().to_vec(),
        (ColumnType::VarSint, Value::Int(v)) => {
            let mut buf = Vec::with_capacity(4);
            write_var_i64(&mut buf, *v);
            buf
        }
        (ColumnType::VarUint, Value::Uint(v)) => {
            let mut buf = Vec::with_capacity(4);
            write_var_u64(&mut buf, *v);
            buf
        }
        (ColumnType::Uuid | ColumnType::Fixed, Value::Bytes(b)) => {
            if Some(b.len()) != col.width() {
                return Err(mismatch());
            }
            b.clone()
        }
        (ColumnType::Binary, Value::Bytes(b)) => b.clone(),
        (ColumnType::StrZero, Value::Text(s)) => {
            if s.as_bytes().contains(&0) {
                return Err(mismatch());
            }
            s.as_bytes().to_vec()
        }
        _ => return Err(mismatch()),
    };
    Ok(out)
}

/// Decodes a column payload produced by [`encode_value`].
///
/// # Errors
///
/// Returns an error if the payload has the wrong width or is not valid for
/// the column type.
pub fn decode_value(col: &ColumnMeta, payload: &[u8]) -> CodecResult<Value> {
    if let Some(width) = col.width() {
        if payload.len() != width {
            return Err(CodecError::type_mismatch(
                &col.name,
                format!("{width} bytes, got {}", payload.len()),
            ));
        }
    }
    let value = match col.ty {
        ColumnType::Uint08 => Value::Uint(u64::from(payload[0])),
        ColumnType::Uint16 => Value::Uint(u64::from(u16::from_le_bytes(array(payload)?))),
        ColumnType::Uint32 => Value::Uint(u64::from(u32::from_le_bytes(array(payload)?))),
        ColumnType::Uint64 => Value::Uint(u64::from_le_bytes(array(payload)?)),
        ColumnType::Sint08 => Value::Int(i64::from(payload[0] as i8)),
        ColumnType::Sint16 => Value::Int(i64::from(i16::from_le_bytes(array(payload)?))),
        ColumnType::Sint32 => Value::Int(i64::from(i32::from_le_bytes(array(payload)?))),
        ColumnType::Sint64 => Value::Int(i64::from_le_bytes(array(payload)?)),
        ColumnType::Float32 => Value::Float(f64::from(f32::from_le_bytes(array(payload)?))),
        ColumnType::Float64 => Value::Float(f64::from_le_bytes(array(payload)?)),
        ColumnType::VarSint => Value::Int(read_var_i64(payload)?.0),
        ColumnType::VarUint => Value::Uint(read_var_u64(payload)?.0),
        ColumnType::Uuid | ColumnType::Fixed | ColumnType::Binary => {
            Value::Bytes(payload.to_vec())
        }
        ColumnType::StrZero => Value::Text(
            std::str::from_utf8(payload)
                .map_err(|_| CodecError::InvalidUtf8)?
                .to_string(),
        ),
    };
    Ok(value)
}

/// Reads an integer column payload as a sign-extended 64-bit pattern.
///
/// Signed types are sign-extended, unsigned types zero-extended; the result
/// is the two's complement bit pattern used by integer compression.
///
/// # Errors
///
/// Returns an error if the column is not an integer type or the payload
/// is malformed.
pub fn payload_to_bits(ty: ColumnType, payload: &[u8]) -> CodecResult<u64> {
    let col = ColumnMeta::new("int", ty);
    match decode_value(&col, payload)? {
        Value::Int(v) => Ok(v as u64),
        Value::Uint(v) => Ok(v),
        other => Err(CodecError::type_mismatch(
            "int",
            format!("integer, got {}", other.kind()),
        )),
    }
}

/// Inverse of [`payload_to_bits`].
///
/// # Errors
///
/// Returns an error if the column is not an integer type or the value does
/// not fit its width.
pub fn bits_to_payload(ty: ColumnType, bits: u64) -> CodecResult<Vec<u8>> {
    let col = ColumnMeta::new("int", ty);
    let value = if ty.is_signed() {
        Value::Int(bits as i64)
    } else {
        Value::Uint(bits)
    };
    encode_value(&col, &value)
}

fn array<const N: usize>(payload: &[u8]) -> CodecResult<[u8; N]> {
    payload.try_into().map_err(|_| CodecError::UnexpectedEof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn people() -> Schema {
        Schema::new(vec![
            ColumnMeta::new("id", ColumnType::Sint32),
            ColumnMeta::new("age", ColumnType::Uint08),
            ColumnMeta::new("score", ColumnType::Float64),
            ColumnMeta::new("name", ColumnType::StrZero),
            ColumnMeta::new("visits", ColumnType::VarUint),
            ColumnMeta::fixed("code", 2),
            ColumnMeta::new("photo", ColumnType::Binary),
        ])
        .unwrap()
    }

    #[test]
    fn record_roundtrip() {
        let schema = people();
        let record = vec![
            Value::Int(-42),
            Value::Uint(30),
            Value::Float(1.5),
            Value::from("Ada"),
            Value::Uint(100_000),
            Value::Bytes(vec![1, 2]),
            Value::Bytes(vec![0, 0, 7]),
        ];
        let row = schema.encode(&record).unwrap();
        assert_eq!(schema.decode(&row).unwrap(), record);
    }

    #[test]
    fn range_checks() {
        let col = ColumnMeta::new("a", ColumnType::Uint08);
        assert!(encode_value(&col, &Value::Uint(256)).is_err());
        assert!(encode_value(&col, &Value::Int(1)).is_err());
        let col = ColumnMeta::new("b", ColumnType::Sint16);
        assert!(encode_value(&col, &Value::Int(-32_769)).is_err());
        let col = ColumnMeta::fixed("c", 2);
        assert!(encode_value(&col, &Value::Bytes(vec![1])).is_err());
    }

    #[test]
    fn integer_bits() {
        let bits = payload_to_bits(ColumnType::Sint16, &(-5i16).to_le_bytes()).unwrap();
        assert_eq!(bits as i64, -5);
        assert_eq!(
            bits_to_payload(ColumnType::Sint16, bits).unwrap(),
            (-5i16).to_le_bytes()
        );
        let bits = payload_to_bits(ColumnType::Uint32, &u32::MAX.to_le_bytes()).unwrap();
        assert_eq!(bits, u64::from(u32::MAX));
        assert!(payload_to_bits(ColumnType::StrZero, b"x").is_err());
    }

    proptest! {
        #[test]
        fn encode_decode_encode(
            id in any::<i32>(),
            age in any::<u8>(),
            name in "[a-z]{0,12}",
            visits in any::<u64>(),
            photo in proptest::collection::vec(any::<u8>(), 0..32),
        ) {
            let schema = people();
            let record = vec![
                Value::Int(i64::from(id)),
                Value::Uint(u64::from(age)),
                Value::Float(0.25),
                Value::Text(name),
                Value::Uint(visits),
                Value::Bytes(vec![9, 9]),
                Value::Bytes(photo),
            ];
            let row = schema.encode(&record).unwrap();
            let decoded = schema.decode(&row).unwrap();
            prop_assert_eq!(&decoded, &record);
            prop_assert_eq!(schema.encode(&decoded).unwrap(), row);
        }
    }
}
