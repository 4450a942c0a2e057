//! Verify command implementation.

use std::path::Path;
use strata_core::CompositeTable;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of live rows checked.
    pub rows_checked: u64,
    /// Number of index entries checked.
    pub entries_checked: u64,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying table at {}", path.display());
    println!();

    let table = super::open_table(path)?;
    let result = verify(&table)?;
    table.close()?;

    println!("  Rows checked:          {}", result.rows_checked);
    println!("  Index entries checked: {}", result.entries_checked);
    for error in result.errors.iter().take(20) {
        println!("  ✗ {error}");
    }
    if result.errors.len() > 20 {
        println!("  ... and {} more errors", result.errors.len() - 20);
    }

    println!();
    if result.is_ok() {
        println!("✓ Table verification passed");
        Ok(())
    } else {
        println!("✗ Table verification failed");
        Err("Verification failed".into())
    }
}

/// Checks that every live row's index keys resolve back to it and that
/// every index entry points at a live row holding that key.
pub fn verify(table: &CompositeTable) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let schema = table.schema();
    let mut result = VerifyResult::default();

    for entry in table.scan()? {
        let (id, row) = match entry {
            Ok(entry) => entry,
            Err(e) => {
                result.errors.push(format!("scan failed: {e}"));
                break;
            }
        };
        result.rows_checked += 1;
        let prepared = match schema.prepare_row(&row) {
            Ok(prepared) => prepared,
            Err(e) => {
                result.errors.push(format!("{id}: undecodable row: {e}"));
                continue;
            }
        };
        for (i, key) in prepared.keys.iter().enumerate() {
            if !table.index_search_exact(i, key)?.contains(&id) {
                let name = &schema.index(i).name;
                result.errors.push(format!("{id}: missing from index '{name}'"));
            }
        }
    }

    for (i, def) in schema.indexes().iter().enumerate() {
        let mut entries = 0u64;
        let mut previous: Option<Vec<u8>> = None;
        for (id, key) in table.index_iter_forward(i)? {
            entries += 1;
            if previous.as_ref().is_some_and(|p| *p > key) {
                result.errors.push(format!("index '{}' out of order at {id}", def.name));
            }
            match table.get_row(id).map(|row| schema.prepare_row(&row)) {
                Ok(Ok(prepared)) if prepared.keys[i] == key => {}
                Ok(Ok(_)) => result
                    .errors
                    .push(format!("index '{}' entry for {id} has a stale key", def.name)),
                Ok(Err(e)) | Err(e) => result
                    .errors
                    .push(format!("index '{}' entry for {id}: {e}", def.name)),
            }
            previous = Some(key);
        }
        if entries != result.rows_checked {
            result.errors.push(format!(
                "index '{}' has {entries} entries for {} live rows",
                def.name, result.rows_checked
            ));
        }
        result.entries_checked += entries;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::RecordId;
    use strata_testkit::fixtures::TestTable;

    #[test]
    fn healthy_table_verifies() {
        let fixture = TestTable::people(&["ada", "bob", "cy", "bob"]);
        fixture.table.remove_row(RecordId::new(0)).unwrap();
        fixture.table.compact().unwrap();
        fixture.table.insert_row(&fixture.person(9, "dee")).unwrap();

        let result = verify(&fixture.table).unwrap();
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.rows_checked, 4);
        assert_eq!(result.entries_checked, 8);
    }
}
