//! Model-tracking harness for scenario tests.
//!
//! Mirrors every write to a people table in an in-memory model keyed by
//! primary key, so tests can check the table against it at any point.
//! Record ids move when segments are compacted; the model therefore
//! locates rows through the unique primary key index.

use crate::fixtures::{people, people_def, TestTable};
use crate::generators::TableOp;
use std::collections::BTreeMap;
use strata_codec::Value;
use strata_core::{CoreError, CoreResult, RecordId, TableConfig};

/// Expected contents of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRow {
    /// Name column.
    pub name: String,
    /// Hits column.
    pub hits: u32,
}

/// A people table plus the model of what it should hold.
pub struct TableHarness {
    /// The table under test.
    pub fixture: TestTable,
    model: BTreeMap<i64, ModelRow>,
}

impl TableHarness {
    /// Creates a harness over an empty people table.
    pub fn new(config: TableConfig) -> Self {
        Self {
            fixture: TestTable::new(people_def(), config),
            model: BTreeMap::new(),
        }
    }

    /// Closes and reopens the table, keeping the model.
    pub fn reopen(self, config: TableConfig) -> Self {
        Self {
            fixture: self.fixture.reopen(config),
            model: self.model,
        }
    }

    /// Returns the model.
    pub fn model(&self) -> &BTreeMap<i64, ModelRow> {
        &self.model
    }

    fn row(&self, pk: i64, row: &ModelRow) -> Vec<u8> {
        self.fixture.encode(&[
            Value::Int(pk),
            Value::from(row.name.as_str()),
            Value::Uint(u64::from(row.hits)),
        ])
    }

    /// Returns the record id currently holding `pk`.
    pub fn locate(&self, pk: i64) -> Option<RecordId> {
        let key = self.fixture.key(people::PK_INDEX, &[Value::Int(pk)]);
        let ids = self
            .fixture
            .index_search_exact(people::PK_INDEX, &key)
            .expect("Failed to search index");
        assert!(ids.len() <= 1, "unique index holds {} rows for {pk}", ids.len());
        ids.first().copied()
    }

    fn nth_key(&self, n: usize) -> Option<i64> {
        if self.model.is_empty() {
            return None;
        }
        self.model.keys().nth(n % self.model.len()).copied()
    }

    /// Inserts a row; a duplicate primary key is rejected and not tracked.
    pub fn insert(&mut self, pk: i64, name: &str) -> CoreResult<RecordId> {
        let row = ModelRow {
            name: name.to_string(),
            hits: 0,
        };
        let result = self.fixture.insert_row(&self.row(pk, &row));
        match &result {
            Ok(_) => {
                assert!(self.model.insert(pk, row).is_none(), "duplicate {pk} accepted");
            }
            Err(CoreError::DuplicateKey { .. }) => {
                assert!(self.model.contains_key(&pk), "unique {pk} rejected");
            }
            Err(e) => panic!("insert failed: {e}"),
        }
        result
    }

    /// Removes the row holding `pk`.
    pub fn remove(&mut self, pk: i64) {
        let id = self.locate(pk).expect("row to remove is missing");
        self.fixture.remove_row(id).expect("Failed to remove row");
        self.model.remove(&pk);
    }

    /// Renames the row holding `pk`.
    pub fn rename(&mut self, pk: i64, name: &str) {
        let id = self.locate(pk).expect("row to rename is missing");
        let mut row = self.model[&pk].clone();
        row.name = name.to_string();
        let encoded = self.row(pk, &row);
        self.fixture.update_row(id, &encoded).expect("Failed to update row");
        self.model.insert(pk, row);
    }

    /// Overwrites the hits counter of the row holding `pk` in place.
    pub fn touch(&mut self, pk: i64, hits: u32) {
        let id = self.locate(pk).expect("row to touch is missing");
        self.fixture
            .update_column(id, people::HITS, &hits.to_le_bytes())
            .expect("Failed to update column");
        if let Some(row) = self.model.get_mut(&pk) {
            row.hits = hits;
        }
    }

    /// Applies one workload step.
    pub fn apply(&mut self, op: &TableOp) {
        match op {
            TableOp::Insert(pk, name) => {
                // Duplicates are checked against the model inside `insert`.
                let _ = self.insert(*pk, name);
            }
            TableOp::Remove(n) => {
                if let Some(pk) = self.nth_key(*n) {
                    self.remove(pk);
                }
            }
            TableOp::Update(n, name) => {
                if let Some(pk) = self.nth_key(*n) {
                    self.rename(pk, name);
                }
            }
            TableOp::Touch(n, hits) => {
                if let Some(pk) = self.nth_key(*n) {
                    self.touch(pk, *hits);
                }
            }
            TableOp::Compact => {
                self.fixture.compact().expect("Failed to compact");
            }
            TableOp::Merge => {
                self.fixture
                    .merge_readonly_segments()
                    .expect("Failed to merge segments");
            }
        }
    }

    /// Checks the table against the model: every modelled row is found
    /// through both indexes with the expected contents, and nothing else
    /// is live.
    pub fn verify(&self) {
        assert_eq!(self.fixture.live_rows(), self.model.len() as u64, "live row count");
        for (&pk, expected) in &self.model {
            let id = self.locate(pk).unwrap_or_else(|| panic!("{pk} missing from pk index"));
            let record = self.fixture.record(id);
            assert_eq!(
                record,
                [
                    Value::Int(pk),
                    Value::from(expected.name.as_str()),
                    Value::Uint(u64::from(expected.hits)),
                ],
                "row {id}"
            );
            let name_key = self
                .fixture
                .key(people::NAME_INDEX, &[Value::from(expected.name.as_str())]);
            let by_name = self
                .fixture
                .index_search_exact(people::NAME_INDEX, &name_key)
                .expect("Failed to search index");
            assert!(by_name.contains(&id), "{id} missing from name index");
        }
        let scanned = self.fixture.scan().expect("Failed to scan").count();
        assert_eq!(scanned, self.model.len(), "scan row count");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::test_config;

    #[test]
    fn harness_tracks_writes() {
        let mut harness = TableHarness::new(test_config());
        harness.insert(1, "ada").unwrap();
        harness.insert(2, "bob").unwrap();
        assert!(harness.insert(1, "dup").is_err());
        harness.rename(2, "bea");
        harness.touch(1, 5);
        harness.apply(&TableOp::Compact);
        harness.remove(1);
        harness.verify();
        assert_eq!(harness.model().len(), 1);
    }
}
