//! Engine configuration.

use std::time::Duration;

use tessera_common::constants::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_CHECKPOINT_INTERVAL_MS, DEFAULT_FANOUT,
    DEFAULT_MAX_VERSIONS_PER_KEY, DEFAULT_RETENTION_LSNS, DEFAULT_WAL_BUFFER_BYTES,
    DEFAULT_WAL_SIZE_THRESHOLD, DEFAULT_WRITER_THREADS, MAX_FANOUT, MIN_FANOUT,
};
use tessera_common::error::{EngineError, EngineResult};

/// Configuration for a [`BPlusTree`](crate::BPlusTree).
#[derive(Debug, Clone)]
pub struct TreeOptions {
    /// Maximum number of keys per node (M). Children per internal node
    /// is M + 1.
    pub fanout: usize,
    /// Page cache capacity, in pages.
    pub cache_capacity: usize,
    /// Number of write-back worker threads.
    pub writer_threads: usize,
    /// Write-back queue capacity.
    pub writer_queue_capacity: usize,
    /// Maximum pages per write-back batch.
    pub writer_batch_size: usize,
    /// Idle wait for write-back workers; also bounds shutdown latency.
    pub writer_batch_timeout: Duration,
    /// Retries per page write before the queue reports unhealthy.
    pub writer_retries: usize,
    /// WAL in-memory buffer size in bytes.
    pub wal_buffer_bytes: usize,
    /// Interval between periodic checkpoints.
    pub checkpoint_interval: Duration,
    /// WAL size, in bytes, above which a checkpoint is triggered.
    pub wal_size_threshold_bytes: u64,
    /// Dirty page count above which a checkpoint is triggered.
    pub dirty_page_threshold: usize,
    /// Interval between periodic MVCC garbage collection sweeps.
    pub gc_interval: Duration,
    /// MVCC retention window in LSN units.
    pub mvcc_retention_lsns: u64,
    /// Maximum versions retained per key.
    pub mvcc_max_versions_per_key: usize,
    /// Whether to run the periodic checkpoint and GC jobs.
    ///
    /// Disabled in tests that need deterministic timing; the manual
    /// `checkpoint` and `collect_garbage` entry points still work.
    pub background_jobs: bool,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            fanout: DEFAULT_FANOUT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            writer_threads: DEFAULT_WRITER_THREADS,
            writer_queue_capacity: 1024,
            writer_batch_size: 32,
            writer_batch_timeout: Duration::from_millis(20),
            writer_retries: 3,
            wal_buffer_bytes: DEFAULT_WAL_BUFFER_BYTES,
            checkpoint_interval: Duration::from_millis(DEFAULT_CHECKPOINT_INTERVAL_MS),
            wal_size_threshold_bytes: DEFAULT_WAL_SIZE_THRESHOLD,
            dirty_page_threshold: 128,
            gc_interval: Duration::from_millis(DEFAULT_CHECKPOINT_INTERVAL_MS),
            mvcc_retention_lsns: DEFAULT_RETENTION_LSNS,
            mvcc_max_versions_per_key: DEFAULT_MAX_VERSIONS_PER_KEY,
            background_jobs: true,
        }
    }
}

impl TreeOptions {
    /// Sets the fanout (keys per node).
    #[must_use]
    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    /// Sets the page cache capacity.
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Sets the number of write-back worker threads.
    #[must_use]
    pub fn with_writer_threads(mut self, threads: usize) -> Self {
        self.writer_threads = threads;
        self
    }

    /// Sets the WAL buffer size.
    #[must_use]
    pub fn with_wal_buffer_bytes(mut self, bytes: usize) -> Self {
        self.wal_buffer_bytes = bytes;
        self
    }

    /// Sets the checkpoint interval.
    #[must_use]
    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Sets the WAL size threshold for triggered checkpoints.
    #[must_use]
    pub fn with_wal_size_threshold_bytes(mut self, bytes: u64) -> Self {
        self.wal_size_threshold_bytes = bytes;
        self
    }

    /// Sets the MVCC retention window in LSN units.
    #[must_use]
    pub fn with_mvcc_retention_lsns(mut self, retention: u64) -> Self {
        self.mvcc_retention_lsns = retention;
        self
    }

    /// Sets the per-key version cap.
    #[must_use]
    pub fn with_mvcc_max_versions_per_key(mut self, max: usize) -> Self {
        self.mvcc_max_versions_per_key = max;
        self
    }

    /// Enables or disables the background checkpoint and GC jobs.
    #[must_use]
    pub fn with_background_jobs(mut self, enabled: bool) -> Self {
        self.background_jobs = enabled;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.fanout < MIN_FANOUT || self.fanout > MAX_FANOUT {
            return Err(EngineError::invalid_config(format!(
                "fanout {} outside [{MIN_FANOUT}, {MAX_FANOUT}]",
                self.fanout
            )));
        }
        if self.cache_capacity == 0 {
            return Err(EngineError::invalid_config("cache capacity must be positive"));
        }
        if self.writer_threads == 0 {
            return Err(EngineError::invalid_config(
                "at least one writer thread is required",
            ));
        }
        if self.wal_buffer_bytes < 512 {
            return Err(EngineError::invalid_config(
                "WAL buffer must be at least 512 bytes",
            ));
        }
        if self.mvcc_max_versions_per_key == 0 {
            return Err(EngineError::invalid_config(
                "at least one version per key must be retained",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = TreeOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.fanout, 64);
        assert_eq!(options.cache_capacity, 4096);
        assert_eq!(options.writer_threads, 2);
    }

    #[test]
    fn test_fanout_bounds() {
        assert!(TreeOptions::default().with_fanout(2).validate().is_err());
        assert!(TreeOptions::default().with_fanout(3).validate().is_ok());
        assert!(TreeOptions::default().with_fanout(1024).validate().is_ok());
        assert!(TreeOptions::default().with_fanout(1025).validate().is_err());
    }

    #[test]
    fn test_builder() {
        let options = TreeOptions::default()
            .with_fanout(8)
            .with_cache_capacity(16)
            .with_background_jobs(false);
        assert_eq!(options.fanout, 8);
        assert_eq!(options.cache_capacity, 16);
        assert!(!options.background_jobs);
    }
}
