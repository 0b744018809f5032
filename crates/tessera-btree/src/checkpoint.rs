//! Checkpoint policy and statistics.
//!
//! A checkpoint makes the page store a durable, self-consistent
//! snapshot and then retires the WAL prefix that snapshot covers.
//! Checkpoints run quiesced: the engine only takes one with no active
//! transactions, so the persisted manifest never captures uncommitted
//! page state and recovery needs no undo pass.
//!
//! The coordinator owns the policy (periodic trigger plus WAL-size and
//! dirty-page thresholds) and the WAL half of the work; the engine
//! passes the flush half in as a closure, since only it can settle
//! tombstones and persist the manifest under its structure lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tessera_cache::PageCache;
use tessera_common::error::EngineResult;
use tessera_common::types::Lsn;
use tessera_wal::Wal;

/// Snapshot of checkpoint statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointStats {
    /// Checkpoints completed.
    pub completed: u64,
    /// Checkpoints that failed partway (retried on the next trigger).
    pub failed: u64,
    /// Checkpoints skipped because transactions were active.
    pub skipped: u64,
    /// LSN of the most recent checkpoint record.
    pub last_checkpoint_lsn: Lsn,
}

/// Periodic checkpoint policy: flush dirty pages, emit a checkpoint
/// record, truncate the WAL prefix.
pub struct CheckpointCoordinator {
    wal: Arc<Wal>,
    cache: Arc<PageCache>,
    wal_size_threshold: u64,
    dirty_page_threshold: usize,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl CheckpointCoordinator {
    /// Creates a coordinator with the given trigger thresholds.
    #[must_use]
    pub fn new(
        wal: Arc<Wal>,
        cache: Arc<PageCache>,
        wal_size_threshold: u64,
        dirty_page_threshold: usize,
    ) -> Self {
        Self {
            wal,
            cache,
            wal_size_threshold,
            dirty_page_threshold,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Returns true when the WAL size or dirty page count crosses its
    /// threshold.
    #[must_use]
    pub fn should_checkpoint(&self) -> bool {
        let wal_size = self.wal.size().unwrap_or(u64::MAX);
        wal_size >= self.wal_size_threshold
            || self.cache.dirty_count() >= self.dirty_page_threshold
    }

    /// Runs a checkpoint around the engine-supplied flush step.
    ///
    /// `flush` must leave the page store durably consistent (dirty
    /// pages persisted, manifest written); the coordinator then appends
    /// the checkpoint record, fsyncs, and truncates everything before
    /// it. A failure anywhere bumps the failure counter and falls
    /// through to the next trigger.
    pub fn run(&self, flush: impl FnOnce() -> EngineResult<usize>) -> EngineResult<Lsn> {
        let result = self.run_inner(flush);
        match &result {
            Ok(lsn) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                tracing::info!(lsn = %lsn, "checkpoint complete");
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %err, "checkpoint failed");
            }
        }
        result
    }

    fn run_inner(&self, flush: impl FnOnce() -> EngineResult<usize>) -> EngineResult<Lsn> {
        let flushed = flush()?;
        let lsn = self.wal.write_checkpoint()?;
        self.wal.truncate(lsn)?;
        tracing::debug!(pages_flushed = flushed, lsn = %lsn, "checkpoint flushed and truncated");
        Ok(lsn)
    }

    /// Records a checkpoint skipped for active transactions.
    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns checkpoint statistics.
    #[must_use]
    pub fn stats(&self) -> CheckpointStats {
        CheckpointStats {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            last_checkpoint_lsn: self.wal.last_checkpoint_lsn(),
        }
    }
}

impl std::fmt::Debug for CheckpointCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("CheckpointCoordinator")
            .field("completed", &stats.completed)
            .field("failed", &stats.failed)
            .field("skipped", &stats.skipped)
            .field("last_checkpoint_lsn", &stats.last_checkpoint_lsn)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tessera_storage::ContentStore;
    use tessera_wal::WalConfig;

    fn setup(tmp: &TempDir, wal_threshold: u64) -> CheckpointCoordinator {
        let wal = Arc::new(Wal::open(WalConfig::new(tmp.path().join("wal.log"))).unwrap());
        let store = Arc::new(ContentStore::in_memory());
        let cache = Arc::new(PageCache::new(store, 16));
        CheckpointCoordinator::new(wal, cache, wal_threshold, 8)
    }

    #[test]
    fn test_threshold_trigger() {
        let tmp = TempDir::new().unwrap();
        let relaxed = setup(&tmp, u64::MAX);
        assert!(!relaxed.should_checkpoint());

        let tmp = TempDir::new().unwrap();
        let eager = setup(&tmp, 0);
        assert!(eager.should_checkpoint());
    }

    #[test]
    fn test_run_counts_outcomes() {
        let tmp = TempDir::new().unwrap();
        let coordinator = setup(&tmp, u64::MAX);

        coordinator.run(|| Ok(0)).unwrap();
        assert_eq!(coordinator.stats().completed, 1);
        assert!(coordinator.stats().last_checkpoint_lsn.is_valid());

        let err = coordinator.run(|| {
            Err(tessera_common::error::EngineError::internal("flush broke"))
        });
        assert!(err.is_err());
        assert_eq!(coordinator.stats().failed, 1);

        coordinator.record_skip();
        assert_eq!(coordinator.stats().skipped, 1);
    }
}
