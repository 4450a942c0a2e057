//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding rows and keys.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// A value does not fit the declared column type.
    #[error("column '{column}' expects {expected}")]
    TypeMismatch {
        /// Column name.
        column: String,
        /// Human readable expectation.
        expected: String,
    },

    /// A row or key has the wrong number of columns.
    #[error("expected {expected} columns, got {actual}")]
    ColumnCount {
        /// Number of columns in the schema.
        expected: usize,
        /// Number of columns supplied.
        actual: usize,
    },

    /// A key field carries an unexpected type tag.
    #[error("key field {field}: expected tag {expected:#04x}, found {found:#04x}")]
    KeyTagMismatch {
        /// Field position inside the key.
        field: usize,
        /// Tag byte the schema requires.
        expected: u8,
        /// Tag byte found in the key.
        found: u8,
    },

    /// The schema definition is invalid.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Integer overflow during decoding.
    #[error("integer overflow")]
    IntegerOverflow,
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create a type mismatch error.
    pub fn type_mismatch(column: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::TypeMismatch {
            column: column.into(),
            expected: expected.into(),
        }
    }

    /// Create an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }
}
