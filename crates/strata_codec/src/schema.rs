//! Column types and the flat row layout.
//!
//! A row is the concatenation of its column encodings in schema order:
//!
//! | Column type            | Encoding                                       |
//! |------------------------|------------------------------------------------|
//! | fixed-width numbers    | little-endian, exact width                     |
//! | `uuid`, `fixed`        | raw bytes, exact width                         |
//! | `varsint`, `varuint`   | LEB128 (zig-zag for signed)                    |
//! | `strzero`              | UTF-8 bytes followed by one NUL                |
//! | `binary`               | LEB128 length then bytes; the last column of a |
//! |                        | row omits the length and runs to the row end   |
//!
//! [`Schema::parse_row`] splits a row into per-column *payloads* (framing
//! removed) and [`Schema::combine_row`] puts the framing back, so a payload
//! vector can be recombined under any projection of the schema.

use crate::error::{CodecError, CodecResult};
use crate::varint::{read_var_u64, write_var_u64};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Physical type of a column.
///
/// The discriminant doubles as the type tag of the index key encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ColumnType {
    /// 8-bit unsigned integer.
    Uint08 = 0,
    /// 8-bit signed integer.
    Sint08 = 1,
    /// 16-bit unsigned integer.
    Uint16 = 2,
    /// 16-bit signed integer.
    Sint16 = 3,
    /// 32-bit unsigned integer.
    Uint32 = 4,
    /// 32-bit signed integer.
    Sint32 = 5,
    /// 64-bit unsigned integer.
    Uint64 = 6,
    /// 64-bit signed integer.
    Sint64 = 7,
    /// IEEE 754 single precision.
    Float32 = 8,
    /// IEEE 754 double precision.
    Float64 = 9,
    /// 16-byte identifier.
    Uuid = 10,
    /// Fixed-length blob; the length comes from the column definition.
    Fixed = 11,
    /// Variable-length signed integer.
    VarSint = 12,
    /// Variable-length unsigned integer.
    VarUint = 13,
    /// Zero-terminated string.
    StrZero = 14,
    /// Variable-length binary.
    Binary = 15,
}

impl ColumnType {
    const ALL: [ColumnType; 16] = [
        ColumnType::Uint08,
        ColumnType::Sint08,
        ColumnType::Uint16,
        ColumnType::Sint16,
        ColumnType::Uint32,
        ColumnType::Sint32,
        ColumnType::Uint64,
        ColumnType::Sint64,
        ColumnType::Float32,
        ColumnType::Float64,
        ColumnType::Uuid,
        ColumnType::Fixed,
        ColumnType::VarSint,
        ColumnType::VarUint,
        ColumnType::StrZero,
        ColumnType::Binary,
    ];

    /// Returns the type tag.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Looks up a type by tag.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(usize::from(tag)).copied()
    }

    /// Returns the encoded width for fixed-width types.
    ///
    /// `fixed_len` is only consulted for [`ColumnType::Fixed`].
    #[must_use]
    pub const fn fixed_width(self, fixed_len: u32) -> Option<usize> {
        match self {
            ColumnType::Uint08 | ColumnType::Sint08 => Some(1),
            ColumnType::Uint16 | ColumnType::Sint16 => Some(2),
            ColumnType::Uint32 | ColumnType::Sint32 | ColumnType::Float32 => Some(4),
            ColumnType::Uint64 | ColumnType::Sint64 | ColumnType::Float64 => Some(8),
            ColumnType::Uuid => Some(16),
            ColumnType::Fixed => Some(fixed_len as usize),
            ColumnType::VarSint
            | ColumnType::VarUint
            | ColumnType::StrZero
            | ColumnType::Binary => None,
        }
    }

    /// Returns true for all integer types, fixed or variable width.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            ColumnType::Uint08
                | ColumnType::Sint08
                | ColumnType::Uint16
                | ColumnType::Sint16
                | ColumnType::Uint32
                | ColumnType::Sint32
                | ColumnType::Uint64
                | ColumnType::Sint64
                | ColumnType::VarSint
                | ColumnType::VarUint
        )
    }

    /// Returns true for signed integer types.
    #[must_use]
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            ColumnType::Sint08
                | ColumnType::Sint16
                | ColumnType::Sint32
                | ColumnType::Sint64
                | ColumnType::VarSint
        )
    }
}

/// Definition of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name, unique within a schema.
    pub name: String,
    /// Physical type.
    #[serde(rename = "type")]
    pub ty: ColumnType,
    /// Byte length for [`ColumnType::Fixed`]; zero otherwise.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub length: u32,
    /// Whether the column may be overwritten in place.
    #[serde(default, rename = "inplaceUpdatable")]
    pub inplace_updatable: bool,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl ColumnMeta {
    /// Creates a column of the given type.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            length: 0,
            inplace_updatable: false,
        }
    }

    /// Creates a fixed-length blob column.
    pub fn fixed(name: impl Into<String>, length: u32) -> Self {
        Self {
            length,
            ..Self::new(name, ColumnType::Fixed)
        }
    }

    /// Marks the column inplace-updatable.
    #[must_use]
    pub fn inplace(mut self) -> Self {
        self.inplace_updatable = true;
        self
    }

    /// Returns the encoded width if the column is fixed-width.
    #[must_use]
    pub fn width(&self) -> Option<usize> {
        self.ty.fixed_width(self.length)
    }
}

/// An ordered, validated list of columns.
///
/// Immutable once built; projections produce new schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnMeta>,
    by_name: HashMap<String, usize>,
    fixed_row_len: Option<usize>,
}

impl Schema {
    /// Validates `columns` and builds a schema.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidSchema`] for empty or duplicate names and
    /// zero-length fixed columns.
    pub fn new(columns: Vec<ColumnMeta>) -> CodecResult<Self> {
        let mut by_name = HashMap::with_capacity(columns.len());
        for (i, col) in columns.iter().enumerate() {
            if col.name.is_empty() {
                return Err(CodecError::invalid_schema(format!("column {i} has no name")));
            }
            if col.ty == ColumnType::Fixed && col.length == 0 {
                return Err(CodecError::invalid_schema(format!(
                    "fixed column '{}' needs a length",
                    col.name
                )));
            }
            if by_name.insert(col.name.clone(), i).is_some() {
                return Err(CodecError::invalid_schema(format!(
                    "duplicate column '{}'",
                    col.name
                )));
            }
        }
        let fixed_row_len = columns
            .iter()
            .map(ColumnMeta::width)
            .sum::<Option<usize>>();
        Ok(Self {
            columns,
            by_name,
            fixed_row_len,
        })
    }

    /// Returns the columns in order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Returns column `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    #[must_use]
    pub fn column(&self, i: usize) -> &ColumnMeta {
        &self.columns[i]
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the schema has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Finds a column position by name.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Returns the column names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Returns the row length if every column is fixed-width.
    #[must_use]
    pub fn fixed_row_len(&self) -> Option<usize> {
        self.fixed_row_len
    }

    /// Builds the schema made of `positions`, in that order.
    ///
    /// # Errors
    ///
    /// Returns an error if a position repeats.
    ///
    /// # Panics
    ///
    /// Panics if a position is out of range.
    pub fn project(&self, positions: &[usize]) -> CodecResult<Schema> {
        Schema::new(positions.iter().map(|&i| self.columns[i].clone()).collect())
    }

    /// Splits `row` into column payloads.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is truncated, has trailing bytes or holds
    /// an unterminated string.
    pub fn parse_row<'a>(&self, row: &'a [u8]) -> CodecResult<Vec<&'a [u8]>> {
        let mut out = Vec::with_capacity(self.columns.len());
        let mut pos = 0usize;
        let last = self.columns.len().saturating_sub(1);
        for (i, col) in self.columns.iter().enumerate() {
            let rest = &row[pos..];
            let (payload, used) = match col.ty {
                ColumnType::VarSint | ColumnType::VarUint => {
                    let (_, len) = read_var_u64(rest)?;
                    (&rest[..len], len)
                }
                ColumnType::StrZero => {
                    let end = rest
                        .iter()
                        .position(|&b| b == 0)
                        .ok_or_else(|| CodecError::decoding_failed(format!(
                            "column '{}' is not NUL terminated",
                            col.name
                        )))?;
                    (&rest[..end], end + 1)
                }
                ColumnType::Binary if i == last => (rest, rest.len()),
                ColumnType::Binary => {
                    let (len, n) = read_var_u64(rest)?;
                    let len = usize::try_from(len).map_err(|_| CodecError::IntegerOverflow)?;
                    let end = n.checked_add(len).ok_or(CodecError::IntegerOverflow)?;
                    if end > rest.len() {
                        return Err(CodecError::UnexpectedEof);
                    }
                    (&rest[n..end], end)
                }
                _ => {
                    let width = col.width().unwrap_or_default();
                    if width > rest.len() {
                        return Err(CodecError::UnexpectedEof);
                    }
                    (&rest[..width], width)
                }
            };
            out.push(payload);
            pos += used;
        }
        if pos != row.len() {
            return Err(CodecError::decoding_failed(format!(
                "{} trailing bytes after last column",
                row.len() - pos
            )));
        }
        Ok(out)
    }

    /// Joins column payloads into a row.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload count or a fixed width is wrong, or a
    /// string contains NUL.
    pub fn combine_row(&self, cols: &[&[u8]]) -> CodecResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.fixed_row_len.unwrap_or(64));
        self.combine_row_into(cols, &mut out)?;
        Ok(out)
    }

    /// Appends the row made of `cols` to `out`.
    ///
    /// # Errors
    ///
    /// Same as [`Schema::combine_row`].
    pub fn combine_row_into(&self, cols: &[&[u8]], out: &mut Vec<u8>) -> CodecResult<()> {
        if cols.len() != self.columns.len() {
            return Err(CodecError::ColumnCount {
                expected: self.columns.len(),
                actual: cols.len(),
            });
        }
        let last = self.columns.len().saturating_sub(1);
        for (i, (col, payload)) in self.columns.iter().zip(cols).enumerate() {
            match col.ty {
                ColumnType::VarSint | ColumnType::VarUint => {
                    let (_, len) = read_var_u64(payload)?;
                    if len != payload.len() {
                        return Err(CodecError::type_mismatch(&col.name, "a single varint"));
                    }
                    out.extend_from_slice(payload);
                }
                ColumnType::StrZero => {
                    if payload.contains(&0) {
                        return Err(CodecError::type_mismatch(&col.name, "a string without NUL"));
                    }
                    out.extend_from_slice(payload);
                    out.push(0);
                }
                ColumnType::Binary => {
                    if i != last {
                        write_var_u64(out, payload.len() as u64);
                    }
                    out.extend_from_slice(payload);
                }
                _ => {
                    let width = col.width().unwrap_or_default();
                    if payload.len() != width {
                        return Err(CodecError::type_mismatch(
                            &col.name,
                            format!("{width} bytes, got {}", payload.len()),
                        ));
                    }
                    out.extend_from_slice(payload);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed() -> Schema {
        Schema::new(vec![
            ColumnMeta::new("id", ColumnType::Sint64),
            ColumnMeta::new("name", ColumnType::StrZero),
            ColumnMeta::new("n", ColumnType::VarUint),
            ColumnMeta::new("blob", ColumnType::Binary),
            ColumnMeta::fixed("tag", 3),
            ColumnMeta::new("tail", ColumnType::Binary),
        ])
        .unwrap()
    }

    #[test]
    fn parse_combine_roundtrip() {
        let schema = mixed();
        let id = 7i64.to_le_bytes();
        let cols: Vec<&[u8]> = vec![
            &id[..],
            &b"alice"[..],
            &[0x96, 0x01][..],
            &b"\x00\x01"[..],
            &b"abc"[..],
            &b"rest"[..],
        ];
        let row = schema.combine_row(&cols).unwrap();
        let parsed = schema.parse_row(&row).unwrap();
        assert_eq!(parsed, cols);
        assert_eq!(schema.combine_row(&parsed).unwrap(), row);
    }

    #[test]
    fn last_binary_has_no_length() {
        let schema = Schema::new(vec![
            ColumnMeta::new("a", ColumnType::Uint08),
            ColumnMeta::new("b", ColumnType::Binary),
        ])
        .unwrap();
        let row = schema.combine_row(&[&[9], b"xyz"]).unwrap();
        assert_eq!(row, b"\x09xyz");
    }

    #[test]
    fn fixed_row_len() {
        let schema = Schema::new(vec![
            ColumnMeta::new("a", ColumnType::Uint32),
            ColumnMeta::fixed("b", 5),
        ])
        .unwrap();
        assert_eq!(schema.fixed_row_len(), Some(9));
        assert_eq!(mixed().fixed_row_len(), None);
    }

    #[test]
    fn projection_changes_framing() {
        let schema = mixed();
        let sub = schema.project(&[3]).unwrap();
        let row = sub.combine_row(&[b"\x00\x01"]).unwrap();
        assert_eq!(row, b"\x00\x01");
    }

    #[test]
    fn rejects_bad_rows() {
        let schema = mixed();
        assert!(schema.parse_row(b"short").is_err());
        let err = schema.combine_row(&[b"x"]).unwrap_err();
        assert!(matches!(err, CodecError::ColumnCount { expected: 6, actual: 1 }));

        let s = Schema::new(vec![ColumnMeta::new("s", ColumnType::StrZero)]).unwrap();
        assert!(s.combine_row(&[b"a\0b"]).is_err());
        assert!(s.parse_row(b"abc").is_err());
        assert!(s.parse_row(b"a\0\0").is_err());
    }

    #[test]
    fn rejects_bad_schemas() {
        assert!(Schema::new(vec![ColumnMeta::fixed("f", 0)]).is_err());
        assert!(Schema::new(vec![
            ColumnMeta::new("a", ColumnType::Uint08),
            ColumnMeta::new("a", ColumnType::Uint16),
        ])
        .is_err());
    }

    #[test]
    fn tags_roundtrip() {
        for tag in 0..16u8 {
            assert_eq!(ColumnType::from_tag(tag).unwrap().tag(), tag);
        }
        assert!(ColumnType::from_tag(16).is_none());
    }

    #[test]
    fn column_meta_json() {
        let col = ColumnMeta::fixed("h", 4).inplace();
        let json = serde_json::to_string(&col).unwrap();
        assert_eq!(
            json,
            r#"{"name":"h","type":"fixed","length":4,"inplaceUpdatable":true}"#
        );
        let back: ColumnMeta = serde_json::from_str(r#"{"name":"x","type":"varsint"}"#).unwrap();
        assert_eq!(back, ColumnMeta::new("x", ColumnType::VarSint));
    }
}
