//! # StrataDB Testkit
//!
//! Test utilities for StrataDB.
//!
//! This crate provides:
//! - Table fixtures with temporary directories
//! - Property-based test generators using proptest
//! - A model-tracking harness for scenario tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_table() {
//!     with_people_table(|fixture| {
//!         let id = fixture.table.insert_row(&fixture.person(1, "ada")).unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod harness;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
}
