//! Inspect command implementation.

use serde::Serialize;
use std::path::Path;
use strata_codec::RowCodec;
use strata_core::{CompositeTable, SegmentInfo};

/// Table inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Table path.
    pub path: String,
    /// Current generation.
    pub generation: u64,
    /// Record id span, deleted rows included.
    pub num_rows: u64,
    /// Live rows.
    pub live_rows: u64,
    /// Bytes of row data across all segments.
    pub data_size: u64,
    /// Column groups and their readonly encodings.
    pub colgroups: Vec<ColgroupSummary>,
    /// Index names and uniqueness.
    pub indexes: Vec<IndexSummary>,
    /// Per-segment details (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<SegmentSummary>>,
    /// Leading live rows, decoded (if requested).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sample: Vec<String>,
}

/// One column group.
#[derive(Debug, Serialize)]
pub struct ColgroupSummary {
    /// Group name.
    pub name: String,
    /// Member column names.
    pub columns: Vec<String>,
    /// Encoding used in readonly segments.
    pub encoding: String,
    /// Whether members can be overwritten in place.
    pub inplace: bool,
}

/// One index.
#[derive(Debug, Serialize)]
pub struct IndexSummary {
    /// Index name.
    pub name: String,
    /// Whether keys are unique.
    pub unique: bool,
}

/// One segment.
#[derive(Debug, Serialize)]
pub struct SegmentSummary {
    /// Directory name.
    pub dir: String,
    /// `writable` or `readonly`.
    pub kind: String,
    /// Lifecycle state.
    pub state: String,
    /// First record id.
    pub base: u64,
    /// Row span.
    pub rows: u32,
    /// Deleted rows.
    pub deleted: u64,
    /// Data bytes.
    pub data_size: u64,
}

impl From<&SegmentInfo> for SegmentSummary {
    fn from(info: &SegmentInfo) -> Self {
        Self {
            dir: info.dir_name.clone(),
            kind: info.kind.to_string(),
            state: format!("{:?}", info.state).to_lowercase(),
            base: info.base.as_u64(),
            rows: info.rows,
            deleted: info.deleted,
            data_size: info.data_size,
        }
    }
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    show_segments: bool,
    sample_rows: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let table = super::open_table(path)?;
    let result = inspect(&table, show_segments, sample_rows)?;
    table.close()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Collects the inspection result for an open table.
pub fn inspect(
    table: &CompositeTable,
    show_segments: bool,
    sample_rows: usize,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let schema = table.schema();
    let row = schema.row();
    let column_names =
        |cols: &[usize]| cols.iter().map(|&c| row.column(c).name.clone()).collect::<Vec<_>>();

    let infos = table.segment_infos();
    let mut sample = Vec::with_capacity(sample_rows);
    for entry in table.scan()?.take(sample_rows) {
        let (id, bytes) = entry?;
        let values = row.decode(&bytes)?;
        let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
        sample.push(format!("{id}: ({})", rendered.join(", ")));
    }

    Ok(InspectResult {
        path: table.path().display().to_string(),
        generation: table.generation(),
        num_rows: table.num_rows(),
        live_rows: table.live_rows(),
        data_size: infos.iter().map(|s| s.data_size).sum(),
        colgroups: schema
            .colgroups()
            .iter()
            .map(|cg| ColgroupSummary {
                name: cg.name.clone(),
                columns: column_names(&cg.columns),
                encoding: format!("{:?}", cg.readonly_encoding()).to_lowercase(),
                inplace: cg.inplace_updatable,
            })
            .collect(),
        indexes: schema
            .indexes()
            .iter()
            .map(|idx| IndexSummary {
                name: idx.name.clone(),
                unique: idx.unique,
            })
            .collect(),
        segments: show_segments.then(|| infos.iter().map(SegmentSummary::from).collect()),
        sample,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("StrataDB Table: {}", result.path);
    println!("─────────────────────────────────────");
    println!();
    println!("Rows:");
    println!("  Record ids:    {}", result.num_rows);
    println!("  Live rows:     {}", result.live_rows);
    println!("  Deleted:       {}", result.num_rows - result.live_rows);
    println!("  Data size:     {}", format_bytes(result.data_size));
    println!("  Generation:    {}", result.generation);
    println!();

    println!("Column groups:");
    for cg in &result.colgroups {
        let inplace = if cg.inplace { ", inplace" } else { "" };
        let columns = cg.columns.join(", ");
        println!("  {:<12} {:<10} [{columns}]{inplace}", cg.name, cg.encoding);
    }
    if !result.indexes.is_empty() {
        println!();
        println!("Indexes:");
        for idx in &result.indexes {
            let unique = if idx.unique { " (unique)" } else { "" };
            println!("  {}{unique}", idx.name);
        }
    }

    if let Some(segments) = &result.segments {
        println!();
        println!("Segments:");
        println!(
            "  {:<12} {:<9} {:<10} {:>10} {:>10} {:>10} {:>12}",
            "DIR", "KIND", "STATE", "BASE", "ROWS", "DELETED", "SIZE"
        );
        for seg in segments {
            println!(
                "  {:<12} {:<9} {:<10} {:>10} {:>10} {:>10} {:>12}",
                seg.dir,
                seg.kind,
                seg.state,
                seg.base,
                seg.rows,
                seg.deleted,
                format_bytes(seg.data_size)
            );
        }
    }

    if !result.sample.is_empty() {
        println!();
        println!("Sample:");
        for line in &result.sample {
            println!("  {line}");
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_testkit::fixtures::TestTable;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(100), "100 bytes");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn inspect_reports_segments_and_sample() {
        let fixture = TestTable::people(&["ada", "bob", "cy"]);
        fixture.table.remove_row(strata_core::RecordId::new(1)).unwrap();
        fixture.table.compact().unwrap();

        let result = inspect(&fixture.table, true, 5).unwrap();
        assert_eq!(result.num_rows, 2);
        assert_eq!(result.live_rows, 2);
        assert_eq!(result.sample.len(), 2);
        let segments = result.segments.unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].kind, "readonly");
        assert_eq!(result.indexes.len(), 2);
    }
}
