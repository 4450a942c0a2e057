//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod verify;

use strata_core::{CompositeTable, TableConfig};
use std::path::Path;

/// Opens a table for maintenance: no background compaction, and nothing
/// created if the directory holds no table.
pub fn open_table(path: &Path) -> Result<CompositeTable, Box<dyn std::error::Error>> {
    let config = TableConfig::new()
        .create_if_missing(false)
        .compaction_threads(0)
        .auto_compact(false);
    Ok(CompositeTable::open(path, config)?)
}
