//! Table statistics and telemetry.
//!
//! Counters are updated by the table and the compaction workers and can be
//! read at any time without locking.
//!
//! # Usage
//!
//! ```rust,ignore
//! let stats = table.stats();
//! println!("inserts: {}", stats.inserts);
//! println!("compactions: {}", stats.compactions);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Table statistics and metrics.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct TableStats {
    // Operation counters
    /// Rows inserted.
    inserts: AtomicU64,
    /// Full-row updates.
    updates: AtomicU64,
    /// Single-column in-place updates.
    column_updates: AtomicU64,
    /// Rows removed.
    removes: AtomicU64,
    /// Point reads.
    reads: AtomicU64,
    /// Index searches and iterator creations.
    index_lookups: AtomicU64,
    /// Full store scans.
    scans: AtomicU64,

    // Bytes counters
    /// Row bytes written.
    bytes_written: AtomicU64,
    /// Row bytes read.
    bytes_read: AtomicU64,

    // Compaction counters
    /// Segments rolled over.
    segments_rolled: AtomicU64,
    /// Successful segment rebuilds.
    compactions: AtomicU64,
    /// Aborted segment rebuilds.
    compaction_failures: AtomicU64,
    /// Rows dropped by compaction because they were deleted.
    rows_purged: AtomicU64,

    /// Rejected unique-key writes.
    duplicate_keys: AtomicU64,
}

impl TableStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_insert(&self, bytes: u64) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_update(&self, bytes: u64) {
        self.updates.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_column_update(&self) {
        self.column_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_index_lookup(&self) {
        self.index_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_scan(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_roll(&self) {
        self.segments_rolled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self, rows_purged: u64) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
        self.rows_purged.fetch_add(rows_purged, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction_failure(&self) {
        self.compaction_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate_key(&self) {
        self.duplicate_keys.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of inserted rows.
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Returns the number of full-row updates.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Returns the number of removed rows.
    pub fn removes(&self) -> u64 {
        self.removes.load(Ordering::Relaxed)
    }

    /// Returns the number of completed compactions.
    pub fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }

    /// Returns the number of aborted compactions.
    pub fn compaction_failures(&self) -> u64 {
        self.compaction_failures.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            inserts: self.inserts(),
            updates: self.updates(),
            column_updates: self.column_updates.load(Ordering::Relaxed),
            removes: self.removes(),
            reads: self.reads.load(Ordering::Relaxed),
            index_lookups: self.index_lookups.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            segments_rolled: self.segments_rolled.load(Ordering::Relaxed),
            compactions: self.compactions(),
            compaction_failures: self.compaction_failures(),
            rows_purged: self.rows_purged.load(Ordering::Relaxed),
            duplicate_keys: self.duplicate_keys.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of table statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Rows inserted.
    pub inserts: u64,
    /// Full-row updates.
    pub updates: u64,
    /// Single-column in-place updates.
    pub column_updates: u64,
    /// Rows removed.
    pub removes: u64,
    /// Point reads.
    pub reads: u64,
    /// Index searches and iterator creations.
    pub index_lookups: u64,
    /// Full store scans.
    pub scans: u64,
    /// Row bytes written.
    pub bytes_written: u64,
    /// Row bytes read.
    pub bytes_read: u64,
    /// Segments rolled over.
    pub segments_rolled: u64,
    /// Successful segment rebuilds.
    pub compactions: u64,
    /// Aborted segment rebuilds.
    pub compaction_failures: u64,
    /// Rows dropped by compaction.
    pub rows_purged: u64,
    /// Rejected unique-key writes.
    pub duplicate_keys: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = TableStats::new();
        assert_eq!(stats.inserts(), 0);
        assert_eq!(stats.compactions(), 0);
    }

    #[test]
    fn snapshot() {
        let stats = TableStats::new();
        stats.record_insert(10);
        stats.record_insert(5);
        stats.record_read(3);
        stats.record_compaction(4);

        let snap = stats.snapshot();
        assert_eq!(snap.inserts, 2);
        assert_eq!(snap.bytes_written, 15);
        assert_eq!(snap.bytes_read, 3);
        assert_eq!(snap.compactions, 1);
        assert_eq!(snap.rows_purged, 4);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(TableStats::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_remove();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.removes(), 800);
    }
}
