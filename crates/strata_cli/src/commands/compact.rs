//! Compact command implementation.

use std::path::Path;
use strata_core::{CompositeTable, SegmentKind};

/// Compaction statistics.
#[derive(Debug, PartialEq, Eq)]
pub struct CompactStats {
    /// Segments before compaction.
    pub segments_before: usize,
    /// Segments after compaction.
    pub segments_after: usize,
    /// Record id span before compaction.
    pub rows_before: u64,
    /// Record id span after compaction.
    pub rows_after: u64,
    /// Data bytes before compaction.
    pub bytes_before: u64,
    /// Data bytes after compaction.
    pub bytes_after: u64,
}

/// Runs the compact command.
pub fn run(path: &Path, merge: bool, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting table at {}", path.display());
    println!();

    let table = super::open_table(path)?;
    if dry_run {
        let eligible = eligible_segments(&table);
        println!("Dry run - eligible segments:");
        if eligible.is_empty() {
            println!("  (none)");
        }
        for name in eligible {
            println!("  {name}");
        }
        table.close()?;
        return Ok(());
    }

    let stats = compact(&table, merge)?;
    table.close()?;

    println!("  Segments:  {} -> {}", stats.segments_before, stats.segments_after);
    println!("  Rows:      {} -> {}", stats.rows_before, stats.rows_after);
    println!("  Data size: {} -> {} bytes", stats.bytes_before, stats.bytes_after);
    println!();
    println!("✓ Compaction complete");
    Ok(())
}

/// Lists the segments a compaction would rebuild.
pub fn eligible_segments(table: &CompositeTable) -> Vec<String> {
    let ratio = table.config().purge_delete_ratio;
    table
        .segment_infos()
        .into_iter()
        .filter(|seg| match seg.kind {
            SegmentKind::Writable => seg.rows > 0,
            SegmentKind::Readonly => {
                seg.rows > 0 && seg.deleted as f64 / f64::from(seg.rows) > ratio
            }
        })
        .map(|seg| seg.dir_name)
        .collect()
}

/// Compacts every eligible segment, then merges adjacent readonly segments
/// if `merge` is set.
pub fn compact(
    table: &CompositeTable,
    merge: bool,
) -> Result<CompactStats, Box<dyn std::error::Error>> {
    let size = |t: &CompositeTable| t.segment_infos().iter().map(|s| s.data_size).sum::<u64>();
    let segments_before = table.segment_infos().len();
    let rows_before = table.num_rows();
    let bytes_before = size(table);

    table.compact()?;
    if merge {
        table.merge_readonly_segments()?;
    }
    table.flush()?;

    Ok(CompactStats {
        segments_before,
        segments_after: table.segment_infos().len(),
        rows_before,
        rows_after: table.num_rows(),
        bytes_before,
        bytes_after: size(table),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::RecordId;
    use strata_testkit::fixtures::TestTable;

    #[test]
    fn compact_drops_deleted_rows() {
        let fixture = TestTable::people(&["ada", "bob", "cy"]);
        fixture.table.remove_row(RecordId::new(1)).unwrap();
        assert_eq!(eligible_segments(&fixture.table), ["wr-000001"]);

        let stats = compact(&fixture.table, false).unwrap();
        assert_eq!(stats.rows_before, 3);
        assert_eq!(stats.rows_after, 2);
        assert_eq!(stats.segments_after, 2);
        assert!(eligible_segments(&fixture.table).is_empty());
    }

    #[test]
    fn merge_joins_readonly_segments() {
        let fixture = TestTable::people(&["ada"]);
        fixture.table.compact().unwrap();
        fixture.table.insert_row(&fixture.person(2, "bob")).unwrap();
        fixture.table.compact().unwrap();
        assert_eq!(fixture.table.segment_infos().len(), 3);

        let stats = compact(&fixture.table, true).unwrap();
        assert_eq!(stats.segments_after, 2);
        assert_eq!(stats.rows_after, 2);
    }
}
