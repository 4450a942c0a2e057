//! Error types for StrataDB core.

use crate::types::{RecordId, SegmentId};
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in table operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] strata_storage::StorageError),

    /// Row or key codec error.
    #[error("codec error: {0}")]
    Codec(#[from] strata_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Segment file is corrupted or invalid.
    #[error("segment corruption: {message}")]
    SegmentCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Invalid table format, schema or version.
    #[error("invalid table format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// A unique index already holds the key for another live row.
    #[error("duplicate key in unique index '{index}'")]
    DuplicateKey {
        /// Name of the index.
        index: String,
        /// The encoded key.
        key: Vec<u8>,
    },

    /// The record id is beyond the table's row span.
    #[error("record {id} not found")]
    RowNotFound {
        /// The requested id.
        id: RecordId,
    },

    /// The record has already been removed.
    #[error("record {id} is deleted")]
    RowDeleted {
        /// The requested id.
        id: RecordId,
    },

    /// The column cannot be overwritten in place.
    #[error("column '{column}' is not inplace-updatable")]
    NotInplaceUpdatable {
        /// Column name.
        column: String,
    },

    /// A versioned record id was issued under an older table generation.
    #[error("record {id} belongs to generation {generation}, table is at {current}")]
    StaleRecordId {
        /// The cached id.
        id: RecordId,
        /// Generation the id was issued under.
        generation: u64,
        /// Current table generation.
        current: u64,
    },

    /// A regex or prefix match exceeded its memory budget.
    #[error("match exceeded memory budget of {budget} bytes")]
    MatchBudgetExceeded {
        /// The budget in bytes.
        budget: usize,
    },

    /// Invalid regular expression.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Building a replacement segment failed; the original stays live.
    #[error("compaction of segment {segment} aborted: {message}")]
    CompactionAborted {
        /// Segment that was being compacted.
        segment: SegmentId,
        /// Cause of the abort.
        message: String,
    },

    /// Table directory is locked by another process.
    #[error("table locked: another process has exclusive access")]
    TableLocked,

    /// Table is closed.
    #[error("table is closed")]
    TableClosed,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a segment corruption error.
    pub fn segment_corruption(message: impl Into<String>) -> Self {
        Self::SegmentCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a compaction aborted error.
    pub fn compaction_aborted(segment: SegmentId, message: impl Into<String>) -> Self {
        Self::CompactionAborted {
            segment,
            message: message.into(),
        }
    }

    /// Returns true for errors the caller may handle and continue from.
    #[must_use]
    pub fn is_logical(&self) -> bool {
        matches!(
            self,
            Self::DuplicateKey { .. }
                | Self::RowNotFound { .. }
                | Self::RowDeleted { .. }
                | Self::NotInplaceUpdatable { .. }
                | Self::StaleRecordId { .. }
                | Self::MatchBudgetExceeded { .. }
        )
    }
}

impl From<ciborium::de::Error<io::Error>> for CoreError {
    fn from(err: ciborium::de::Error<io::Error>) -> Self {
        Self::invalid_format(err.to_string())
    }
}

impl From<ciborium::ser::Error<io::Error>> for CoreError {
    fn from(err: ciborium::ser::Error<io::Error>) -> Self {
        Self::invalid_format(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_format(err.to_string())
    }
}

impl From<fst::Error> for CoreError {
    fn from(err: fst::Error) -> Self {
        Self::segment_corruption(err.to_string())
    }
}
