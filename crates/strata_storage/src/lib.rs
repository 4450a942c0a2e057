//! # StrataDB Storage
//!
//! Memory-mapped regions and file publication helpers for StrataDB.
//!
//! This crate is the lowest layer of the engine. It knows nothing about
//! rows, schemas or segments; it only hands out byte regions backed by
//! files and publishes finished files atomically.
//!
//! ## Provided primitives
//!
//! - [`MmapRegion`] - a growable read/write mapping over one file, used by
//!   writable column stores
//! - [`MappedFile`] / [`MappedBytes`] - a static read-only mapping and cheap
//!   sub-slice views of it, used by readonly segments
//! - [`write_atomic`] / [`publish_dir`] - temp-then-rename publication
//!
//! ## Example
//!
//! ```no_run
//! use strata_storage::MmapRegion;
//! use std::path::Path;
//!
//! let mut region = MmapRegion::create(Path::new("col.fixlen"), 4096).unwrap();
//! region.as_mut_slice()[..5].copy_from_slice(b"hello");
//! region.grow_to(8192).unwrap();
//! assert_eq!(&region.as_slice()[..5], b"hello");
//! ```

#![warn(missing_docs)]

mod atomic;
mod error;
mod mapped;
mod region;

pub use atomic::{publish_dir, sync_dir, write_atomic};
pub use error::{StorageError, StorageResult};
pub use mapped::{MappedBytes, MappedFile};
pub use region::{growth_target, MmapRegion, GROWTH_FACTOR};
