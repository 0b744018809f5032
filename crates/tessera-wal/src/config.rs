//! WAL configuration.

use std::path::PathBuf;

use tessera_common::constants::{DEFAULT_WAL_BUFFER_BYTES, MAX_WAL_RECORD_SIZE};

/// Configuration for the write-ahead log.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Path of the log file.
    pub path: PathBuf,

    /// In-memory append buffer limit; the buffer flushes to the file
    /// when it reaches this size.
    pub buffer_limit: usize,

    /// Maximum size of a single record (header + payload).
    pub max_record_size: usize,

    /// Whether commit records force an fsync before returning.
    ///
    /// Disabling this forfeits durability and exists for tests only.
    pub sync_on_commit: bool,
}

impl WalConfig {
    /// Creates a configuration for the given log file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer_limit: DEFAULT_WAL_BUFFER_BYTES,
            max_record_size: MAX_WAL_RECORD_SIZE,
            sync_on_commit: true,
        }
    }

    /// Sets the append buffer limit.
    #[must_use]
    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = limit;
        self
    }

    /// Sets the maximum record size.
    #[must_use]
    pub fn with_max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = size;
        self
    }

    /// Sets whether commits fsync.
    #[must_use]
    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_limit < 512 {
            return Err("WAL buffer limit must be at least 512 bytes".to_string());
        }
        if self.max_record_size < 4096 {
            return Err("WAL max record size must be at least 4 KB".to_string());
        }
        Ok(())
    }
}
