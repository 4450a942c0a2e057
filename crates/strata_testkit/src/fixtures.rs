//! Test fixtures and table helpers.
//!
//! Provides convenience functions for setting up test tables in temporary
//! directories.

use std::path::{Path, PathBuf};
use strata_codec::{ColumnMeta, ColumnType, RowCodec, Value};
use strata_core::{CompositeTable, RecordId, StoreEncoding, TableConfig, TableSchemaDef};
use tempfile::TempDir;

/// Column positions of the people schema.
pub mod people {
    /// Unique primary key, `Sint64`.
    pub const ID: usize = 0;
    /// Indexed name, `StrZero`.
    pub const NAME: usize = 1;
    /// Inplace-updatable counter, `Uint32`.
    pub const HITS: usize = 2;

    /// Index over [`ID`].
    pub const PK_INDEX: usize = 0;
    /// Index over [`NAME`].
    pub const NAME_INDEX: usize = 1;
}

/// Schema used by most fixtures: `id` (unique), `name` (indexed) and an
/// inplace-updatable `hits` counter.
pub fn people_def() -> TableSchemaDef {
    TableSchemaDef::new(vec![
        ColumnMeta::new("id", ColumnType::Sint64),
        ColumnMeta::new("name", ColumnType::StrZero),
        ColumnMeta::new("hits", ColumnType::Uint32).inplace(),
    ])
    .colgroup("id", &["id"], StoreEncoding::Auto)
    .index("pk", &["id"], true)
    .index("by_name", &["name"], false)
}

/// Deterministic configuration: no background threads, no auto compaction
/// and no fsync.
pub fn test_config() -> TableConfig {
    TableConfig::new()
        .compaction_threads(0)
        .auto_compact(false)
        .sync_on_flush(false)
}

/// A test table with automatic cleanup.
pub struct TestTable {
    /// The table instance.
    pub table: CompositeTable,
    path: PathBuf,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TestTable {
    /// Creates a table with the given schema and configuration.
    pub fn new(def: TableSchemaDef, config: TableConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("table");
        let table = CompositeTable::create(&path, def, config).expect("Failed to create table");
        Self {
            table,
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Creates a people table holding one row per name, with ids `0..`.
    pub fn people(names: &[&str]) -> Self {
        let fixture = Self::new(people_def(), test_config());
        for (i, name) in names.iter().enumerate() {
            fixture
                .table
                .insert_row(&fixture.person(i as i64, name))
                .expect("Failed to insert row");
        }
        fixture
    }

    /// Returns the table directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encodes a people row with zero hits.
    pub fn person(&self, id: i64, name: &str) -> Vec<u8> {
        self.encode(&[Value::Int(id), Value::from(name), Value::Uint(0)])
    }

    /// Encodes a record under the table's row schema.
    pub fn encode(&self, record: &[Value]) -> Vec<u8> {
        self.table
            .schema()
            .row()
            .encode(&record.to_vec())
            .expect("Failed to encode record")
    }

    /// Fetches and decodes a row.
    pub fn record(&self, id: RecordId) -> Vec<Value> {
        let row = self.table.get_row(id).expect("Failed to get row");
        self.table.schema().row().decode(&row).expect("Failed to decode row")
    }

    /// Encodes a key of index `index`.
    pub fn key(&self, index: usize, fields: &[Value]) -> Vec<u8> {
        self.table
            .schema()
            .index(index)
            .encode_key(fields)
            .expect("Failed to encode key")
    }

    /// Closes the table and opens it again with `config`.
    pub fn reopen(self, config: TableConfig) -> Self {
        let Self {
            table,
            path,
            _temp_dir,
        } = self;
        table.close().expect("Failed to close table");
        drop(table);
        let table = CompositeTable::open(&path, config).expect("Failed to reopen table");
        Self {
            table,
            path,
            _temp_dir,
        }
    }
}

impl std::ops::Deref for TestTable {
    type Target = CompositeTable;

    fn deref(&self) -> &Self::Target {
        &self.table
    }
}

/// Runs a test with an empty people table.
///
/// # Example
///
/// ```rust,ignore
/// use strata_testkit::with_people_table;
///
/// #[test]
/// fn my_test() {
///     with_people_table(|fixture| {
///         fixture.insert_row(&fixture.person(1, "ada")).unwrap();
///     });
/// }
/// ```
pub fn with_people_table<F, R>(f: F) -> R
where
    F: FnOnce(&TestTable) -> R,
{
    let fixture = TestTable::new(people_def(), test_config());
    f(&fixture)
}
