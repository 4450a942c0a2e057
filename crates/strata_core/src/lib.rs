//! # StrataDB Core
//!
//! Segmented columnar table engine for StrataDB.
//!
//! This crate provides:
//! - Composite tables: one record id space over a list of segments
//! - Writable segments taking inserts, updates and deletes
//! - Readonly segments with compressed column groups and bulk-built indexes
//! - Background compaction from writable to readonly segments, with purge
//!   of deleted rows
//! - Secondary indexes with exact, ordered, prefix and regex lookup
//!
//! Rows are flat byte rows produced by a [`strata_codec::RowCodec`]; the
//! table schema decides how their columns are split into column groups and
//! which columns are indexed.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod buf;
pub mod compaction;
pub mod config;
pub mod dir;
pub mod error;
pub mod index;
pub mod limit;
pub mod manifest;
pub mod schema;
pub mod segment;
pub mod size_storer;
pub mod stats;
pub mod store;
pub mod table;
pub mod types;

pub use compaction::CancellationToken;
pub use config::TableConfig;
pub use error::{CoreError, CoreResult};
pub use limit::{MemoryGrant, MemoryLimit};
pub use schema::{ColgroupSchema, IndexSchema, StoreEncoding, TableSchema, TableSchemaDef};
pub use stats::{StatsSnapshot, TableStats};
pub use table::{CompositeTable, IndexIter, SegmentInfo, TableScan};
pub use types::{RecordId, RowRef, SeekResult, SegmentId, SegmentKind, SegmentState, VersionedId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
