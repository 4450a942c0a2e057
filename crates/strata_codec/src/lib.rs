//! # StrataDB Codec
//!
//! Row schema, flat row codec and order-preserving key encoding.
//!
//! The storage engine never interprets structured records itself. It stores
//! flat byte rows laid out by a [`Schema`] and compares index keys produced
//! by [`encode_key`]. This crate owns both conversions:
//!
//! - [`RowCodec`] turns a typed [`Record`] into a flat row and back
//! - [`Schema::parse_row`] / [`Schema::combine_row`] split and join rows at
//!   column boundaries, which is how column groups are carved out of a row
//! - [`encode_key`] / [`decode_key`] produce byte-comparable index keys
//!
//! ## Usage
//!
//! ```
//! use strata_codec::{ColumnMeta, ColumnType, RowCodec, Schema, Value};
//!
//! let schema = Schema::new(vec![
//!     ColumnMeta::new("id", ColumnType::Sint64),
//!     ColumnMeta::new("name", ColumnType::StrZero),
//! ])
//! .unwrap();
//!
//! let record = vec![Value::Int(7), Value::from("seven")];
//! let row = schema.encode(&record).unwrap();
//! assert_eq!(schema.decode(&row).unwrap(), record);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod keycode;
mod row;
mod schema;
mod value;
pub mod varint;

pub use error::{CodecError, CodecResult};
pub use keycode::{
    decode_key, decode_key_named, encode_key, encode_key_field, encode_key_payloads,
    fixed_key_len, key_field_width,
};
pub use row::{bits_to_payload, decode_value, encode_value, payload_to_bits, RowCodec};
pub use schema::{ColumnMeta, ColumnType, Schema};
pub use value::{Record, Value};
