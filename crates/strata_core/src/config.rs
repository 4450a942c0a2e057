//! Table configuration.

use crate::compaction::CancellationToken;
use crate::limit::MemoryLimit;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for opening a table.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Whether to create the table if it doesn't exist.
    pub create_if_missing: bool,

    /// Data bytes after which the current writable segment is rolled.
    pub max_writable_segment_bytes: u64,

    /// Row count after which the current writable segment is rolled.
    pub max_writable_segment_rows: u32,

    /// Age after which a non-empty writable segment is rolled (zero = never).
    pub max_writable_segment_age: Duration,

    /// Number of background compaction threads.
    pub compaction_threads: usize,

    /// Whether rolled segments are compacted in the background.
    pub auto_compact: bool,

    /// Deleted fraction above which a readonly segment is purged.
    pub purge_delete_ratio: f64,

    /// zstd level for dictionary-compressed column groups.
    pub zstd_level: i32,

    /// Maximum bytes of values sampled when training a zstd dictionary.
    pub dict_sample_bytes: usize,

    /// Maximum size of a trained zstd dictionary.
    pub dict_max_bytes: usize,

    /// Whether flushes fsync data files.
    pub sync_on_flush: bool,

    /// Whether readonly segment files are prefaulted on open.
    pub populate_mappings: bool,

    /// Shared memory gate for compaction builds and writable segment growth.
    pub memory_limit: Arc<MemoryLimit>,

    /// Token observed by background workers.
    pub cancel: CancellationToken,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            max_writable_segment_bytes: 64 * 1024 * 1024, // 64 MB
            max_writable_segment_rows: 1 << 20,
            max_writable_segment_age: Duration::ZERO, // disabled
            compaction_threads: 1,
            auto_compact: true,
            purge_delete_ratio: 0.25,
            zstd_level: 3,
            dict_sample_bytes: 4 * 1024 * 1024,
            dict_max_bytes: 64 * 1024,
            sync_on_flush: true,
            populate_mappings: false,
            memory_limit: Arc::new(MemoryLimit::default()),
            cancel: CancellationToken::new(),
        }
    }
}

impl TableConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the table if missing.
    #[must_use]
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the writable segment byte threshold.
    #[must_use]
    pub fn max_writable_segment_bytes(mut self, bytes: u64) -> Self {
        self.max_writable_segment_bytes = bytes;
        self
    }

    /// Sets the writable segment row threshold.
    #[must_use]
    pub fn max_writable_segment_rows(mut self, rows: u32) -> Self {
        self.max_writable_segment_rows = rows;
        self
    }

    /// Sets the writable segment age threshold.
    #[must_use]
    pub fn max_writable_segment_age(mut self, age: Duration) -> Self {
        self.max_writable_segment_age = age;
        self
    }

    /// Sets the number of compaction threads.
    #[must_use]
    pub fn compaction_threads(mut self, threads: usize) -> Self {
        self.compaction_threads = threads;
        self
    }

    /// Sets whether rolled segments are compacted in the background.
    #[must_use]
    pub fn auto_compact(mut self, value: bool) -> Self {
        self.auto_compact = value;
        self
    }

    /// Sets the purge threshold.
    #[must_use]
    pub fn purge_delete_ratio(mut self, ratio: f64) -> Self {
        self.purge_delete_ratio = ratio;
        self
    }

    /// Sets the zstd compression level.
    #[must_use]
    pub fn zstd_level(mut self, level: i32) -> Self {
        self.zstd_level = level;
        self
    }

    /// Sets the dictionary training sample size.
    #[must_use]
    pub fn dict_sample_bytes(mut self, bytes: usize) -> Self {
        self.dict_sample_bytes = bytes;
        self
    }

    /// Sets whether flushes fsync.
    #[must_use]
    pub fn sync_on_flush(mut self, value: bool) -> Self {
        self.sync_on_flush = value;
        self
    }

    /// Sets whether readonly mappings are prefaulted.
    #[must_use]
    pub fn populate_mappings(mut self, value: bool) -> Self {
        self.populate_mappings = value;
        self
    }

    /// Shares a memory gate with other tables.
    #[must_use]
    pub fn memory_limit(mut self, limit: Arc<MemoryLimit>) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Injects a cancellation token.
    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = TableConfig::new()
            .max_writable_segment_rows(10)
            .auto_compact(false)
            .zstd_level(9);
        assert_eq!(config.max_writable_segment_rows, 10);
        assert!(!config.auto_compact);
        assert_eq!(config.zstd_level, 9);
        assert!(config.create_if_missing);
    }
}
