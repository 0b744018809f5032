//! The Tessera engine.
//!
//! [`BPlusTree`] exclusively owns its WAL, page cache, writer queue,
//! content store, and version store; none are shared across tree
//! instances.
//!
//! # Write path
//!
//! client → `insert` → WAL append → version store write → traversal
//! (pages through the cache, misses through the content store) →
//! mutated pages into the cache as dirty copies → writer queue persists
//! them off the request path. Commit appends a WAL commit record and
//! fsyncs before returning.
//!
//! # Lock order
//!
//! WAL append lock → version store (chains, then transaction table) →
//! page cache → writer queue. The tree-structure latch serializes
//! structural writers above all of them; no code path acquires these in
//! any other order.
//!
//! # Deletes
//!
//! `delete` writes an UNDO record and tombstones the visible version;
//! the key leaves the pages only when garbage collection (or the
//! pre-checkpoint settle pass) proves no snapshot can ever see it
//! again, at which point the underflow machinery (borrow, merge, root
//! collapse) runs.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::RwLock;

use tessera_cache::{PageCache, WriterQueue, WriterQueueConfig};
use tessera_common::constants::{MAX_KEY_SIZE, MAX_VALUE_SIZE};
use tessera_common::error::{EngineError, EngineResult};
use tessera_common::types::{Key, PageId, TxnId, Value};
use tessera_mvcc::{GcConfig, GcStats, VersionStats, VersionStore};
use tessera_storage::{ContentStore, Page, StoreStats};
use tessera_wal::{Wal, WalConfig};

use crate::checkpoint::{CheckpointCoordinator, CheckpointStats};
use crate::node::NodeManager;
use crate::options::TreeOptions;
use crate::recovery::RedoApplier;
use crate::scheduler::Scheduler;

/// Result of a structure verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeCheck {
    /// Tree depth (a lone root leaf has depth 1).
    pub depth: usize,
    /// Number of leaf pages.
    pub leaves: usize,
    /// Number of keys across all leaves.
    pub keys: usize,
}

/// Aggregated engine statistics.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Content store statistics.
    pub store: StoreStats,
    /// Version store statistics.
    pub versions: VersionStats,
    /// Checkpoint statistics.
    pub checkpoints: CheckpointStats,
    /// Current WAL size in bytes.
    pub wal_size: u64,
    /// Page cache hit ratio.
    pub cache_hit_ratio: f64,
    /// Pages persisted by the writer queue.
    pub pages_written_back: u64,
    /// Whether the writer queue is healthy.
    pub writer_healthy: bool,
}

/// An embedded, transactional B+Tree with content-addressed pages.
pub struct BPlusTree {
    options: TreeOptions,
    path: PathBuf,
    store: Arc<ContentStore>,
    cache: Arc<PageCache>,
    queue: Arc<WriterQueue>,
    wal: Arc<Wal>,
    versions: Arc<VersionStore>,
    nodes: NodeManager,
    coordinator: CheckpointCoordinator,
    gc_config: GcConfig,
    gc_stats: GcStats,
    /// Structural latch: writers hold it exclusively across their whole
    /// mutation, readers across their traversal. Guards the root handle.
    structure: RwLock<PageId>,
    scheduler: Scheduler,
    closed: AtomicBool,
}

impl BPlusTree {
    /// Opens (or creates) a tree at the given directory.
    ///
    /// Recovery runs before this returns: the manifest's page image is
    /// loaded and the WAL is replayed forward from the last checkpoint,
    /// so every committed write is visible and in-flight work from a
    /// crash is discarded.
    pub fn open(path: impl AsRef<Path>, options: TreeOptions) -> EngineResult<Arc<Self>> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        let store = Arc::new(ContentStore::open(&path)?);
        let cache = Arc::new(PageCache::new(Arc::clone(&store), options.cache_capacity));
        let queue = WriterQueue::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            WriterQueueConfig {
                capacity: options.writer_queue_capacity,
                workers: options.writer_threads,
                batch_size: options.writer_batch_size,
                batch_timeout: options.writer_batch_timeout,
                max_retries: options.writer_retries,
            },
        );
        let wal = Arc::new(Wal::open(
            WalConfig::new(path.join("wal.log")).with_buffer_limit(options.wal_buffer_bytes),
        )?);
        let versions = Arc::new(VersionStore::new());
        let nodes = NodeManager::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&queue),
            options.fanout,
        );

        // A fresh store starts as a single empty root leaf.
        let mut root = store.root();
        if !root.is_valid() {
            root = store.store(&Page::new_leaf())?;
            store.set_root(root);
            store.save_manifest()?;
        }

        // Recovery: seed from the checkpointed page image, then redo
        // committed work logged since.
        let recovery_txn = wal.reserve_txn_id();
        let mut applier = RedoApplier::new(&nodes, &versions, &mut root, recovery_txn);
        applier.seed_from_pages()?;
        let summary = wal.replay_from_last_checkpoint(&mut applier)?;
        if summary.records_scanned > 0 {
            tracing::info!(
                redone = summary.records_redone,
                committed = summary.committed_txns,
                discarded = summary.discarded_txns,
                "recovered from WAL"
            );
        }

        let coordinator = CheckpointCoordinator::new(
            Arc::clone(&wal),
            Arc::clone(&cache),
            options.wal_size_threshold_bytes,
            options.dirty_page_threshold,
        );
        let gc_config = GcConfig::default()
            .with_retention_lsns(options.mvcc_retention_lsns)
            .with_max_versions_per_key(options.mvcc_max_versions_per_key);

        queue.start();

        let tree = Arc::new(Self {
            options,
            path,
            store,
            cache,
            queue,
            wal,
            versions,
            nodes,
            coordinator,
            gc_config,
            gc_stats: GcStats::default(),
            structure: RwLock::new(root),
            scheduler: Scheduler::new(),
            closed: AtomicBool::new(false),
        });

        tree.start_background_jobs();
        Ok(tree)
    }

    /// Returns the directory this tree lives in.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Begins a transaction; its snapshot is the current log position.
    pub fn begin_txn(&self) -> EngineResult<TxnId> {
        self.check_open()?;
        let txn = self.wal.begin_txn()?;
        self.versions.begin(txn, self.wal.next_lsn());
        Ok(txn)
    }

    /// Commits a transaction.
    ///
    /// First-committer-wins validation runs first; on conflict the
    /// transaction is aborted and `TxnConflict` returned. The commit
    /// record is durable (fsynced) before the versions become visible
    /// to later snapshots and before this returns.
    pub fn commit_txn(&self, txn: TxnId) -> EngineResult<()> {
        self.check_open()?;

        if let Err(conflict) = self.versions.validate_commit(txn) {
            self.abort_internal(txn);
            return Err(conflict);
        }

        let commit_lsn = match self.wal.commit_txn(txn) {
            Ok(lsn) => lsn,
            Err(err) => {
                self.abort_internal(txn);
                return Err(err.into());
            }
        };
        self.versions.commit(txn, commit_lsn)?;

        self.maybe_checkpoint();
        Ok(())
    }

    /// Aborts a transaction, discarding its writes.
    pub fn abort_txn(&self, txn: TxnId) -> EngineResult<()> {
        self.check_open()?;
        self.versions.ensure_active(txn)?;
        self.abort_internal(txn);
        Ok(())
    }

    /// Abort bookkeeping: log the abort, mark the transaction, purge
    /// its versions, and physically unlink keys it alone introduced.
    fn abort_internal(&self, txn: TxnId) {
        let _ = self.wal.abort_txn(txn);
        if self.versions.abort(txn).is_ok() {
            let dead_keys = self.versions.purge_aborted_writes(txn);
            if !dead_keys.is_empty() {
                let mut root = self.structure.write();
                for key in &dead_keys {
                    if let Err(err) = self.nodes.remove_entry(&mut root, key) {
                        tracing::warn!(error = %err, "failed to unlink aborted key");
                    }
                }
            }
        }
    }

    // =========================================================================
    // Point Operations
    // =========================================================================

    /// Inserts a key-value pair.
    ///
    /// Fails with `KeyExists` if a live value is visible to the
    /// transaction. Pass `TxnId::INVALID` for an auto-committed
    /// single-operation transaction.
    pub fn insert(&self, txn: TxnId, key: &Key, value: &[u8]) -> EngineResult<()> {
        self.check_open()?;
        self.with_txn(txn, |txn| self.insert_in(txn, key, value))
    }

    fn insert_in(&self, txn: TxnId, key: &Key, value: &[u8]) -> EngineResult<()> {
        let value = Value::from_bytes(value);
        self.check_entry_size(key, &value)?;
        self.versions.ensure_active(txn)?;
        if self.versions.key_visible(txn, key)? {
            return Err(EngineError::KeyExists);
        }

        let mut root = self.structure.write();
        let leaf_pid = self.nodes.find_leaf_pid(*root, key)?;

        let lsn = match self
            .wal
            .log_insert(txn, leaf_pid, key, value.as_raw().clone())
        {
            Ok(lsn) => lsn,
            Err(err) => {
                drop(root);
                self.abort_internal(txn);
                return Err(err.into());
            }
        };

        // Past this point the operation is in the log; a failure to
        // apply it would let recovery diverge from the live state, so
        // the transaction aborts instead.
        let applied = self
            .versions
            .insert(txn, key, value.as_raw().clone(), lsn)
            // Overwrite at the page level: a physically-present key
            // with no visible version is a tombstone awaiting GC.
            .and_then(|()| {
                self.nodes
                    .insert_entry(&mut root, key, value.as_bytes(), true)
            });
        if let Err(err) = applied {
            drop(root);
            self.abort_internal(txn);
            return Err(err);
        }
        Ok(())
    }

    /// Replaces the value of an existing key (a logical new version).
    ///
    /// Fails with `KeyNotFound` if no live value is visible.
    pub fn update(&self, txn: TxnId, key: &Key, value: &[u8]) -> EngineResult<()> {
        self.check_open()?;
        self.with_txn(txn, |txn| self.update_in(txn, key, value))
    }

    fn update_in(&self, txn: TxnId, key: &Key, value: &[u8]) -> EngineResult<()> {
        let value = Value::from_bytes(value);
        self.check_entry_size(key, &value)?;
        self.versions.ensure_active(txn)?;
        let old = self
            .versions
            .read(txn, key)?
            .ok_or(EngineError::KeyNotFound)?;

        let mut root = self.structure.write();
        let leaf_pid = self.nodes.find_leaf_pid(*root, key)?;

        let lsn = match self
            .wal
            .log_update(txn, leaf_pid, key, old, value.as_raw().clone())
        {
            Ok(lsn) => lsn,
            Err(err) => {
                drop(root);
                self.abort_internal(txn);
                return Err(err.into());
            }
        };

        let applied = self
            .versions
            .update(txn, key, value.as_raw().clone(), lsn)
            .and_then(|()| {
                self.nodes
                    .insert_entry(&mut root, key, value.as_bytes(), true)
            });
        if let Err(err) = applied {
            drop(root);
            self.abort_internal(txn);
            return Err(err);
        }
        Ok(())
    }

    /// Deletes a key.
    ///
    /// The deletion is a version tombstone; pages keep the key until
    /// garbage collection proves no snapshot can see it. Fails with
    /// `KeyNotFound` if no live value is visible.
    pub fn delete(&self, txn: TxnId, key: &Key) -> EngineResult<()> {
        self.check_open()?;
        self.with_txn(txn, |txn| self.delete_in(txn, key))
    }

    fn delete_in(&self, txn: TxnId, key: &Key) -> EngineResult<()> {
        self.versions.ensure_active(txn)?;
        let old = self
            .versions
            .read(txn, key)?
            .ok_or(EngineError::KeyNotFound)?;

        let leaf_pid = {
            let root = self.structure.read();
            self.nodes.find_leaf_pid(*root, key)?
        };

        let lsn = match self.wal.log_delete(txn, leaf_pid, key, old) {
            Ok(lsn) => lsn,
            Err(err) => {
                self.abort_internal(txn);
                return Err(err.into());
            }
        };

        self.versions.remove(txn, key, lsn)?;
        Ok(())
    }

    /// Looks up the value visible to the transaction.
    ///
    /// The value is resolved through the version store, never the raw
    /// page, so the result respects transactional visibility. Pass
    /// `TxnId::INVALID` to read at a fresh snapshot.
    pub fn search(&self, txn: TxnId, key: &Key) -> EngineResult<Option<Bytes>> {
        self.check_open()?;
        if txn.is_valid() {
            return self.search_in(txn, key);
        }

        // Read-only snapshot transaction: writes nothing, so it never
        // touches the log at all.
        let txn = self.wal.reserve_txn_id();
        let snapshot = self.wal.next_lsn();
        self.versions.begin(txn, snapshot);
        let result = self.search_in(txn, key);
        let _ = self.versions.commit(txn, snapshot);
        result
    }

    fn search_in(&self, txn: TxnId, key: &Key) -> EngineResult<Option<Bytes>> {
        self.versions.ensure_active(txn)?;
        {
            let root = self.structure.read();
            // Standard descent; a broken handle surfaces as corruption
            // here rather than a silent miss.
            self.nodes.find_leaf_pid(*root, key)?;
        }
        self.versions.read(txn, key)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Drains every dirty page to the content store via the writer
    /// queue.
    pub fn flush(&self) -> EngineResult<()> {
        self.check_open()?;
        self.flush_dirty()?;
        Ok(())
    }

    fn flush_dirty(&self) -> EngineResult<usize> {
        let dirty = self.cache.dirty_pages();
        let count = dirty.len();
        for (pid, page) in dirty {
            if !self.queue.enqueue(pid, Arc::clone(&page)) {
                self.store.persist(pid, &page)?;
                self.cache.clear_dirty(pid);
            }
        }
        self.queue.wait_for_empty();
        Ok(count)
    }

    /// Takes a checkpoint: settle tombstones, flush dirty pages,
    /// persist the manifest, append a checkpoint record, truncate the
    /// WAL prefix.
    ///
    /// Checkpoints run quiesced; with transactions active this is a
    /// no-op returning false (the next trigger retries).
    pub fn checkpoint(&self) -> EngineResult<bool> {
        self.check_open()?;
        if self.versions.active_count() > 0 {
            self.coordinator.record_skip();
            tracing::debug!("checkpoint skipped, transactions active");
            return Ok(false);
        }

        let mut root = self.structure.write();

        // The manifest must not capture keys every possible reader
        // already sees as deleted, or they would resurrect on recovery.
        let dead_keys = self.versions.settle_tombstones();
        for key in &dead_keys {
            self.nodes.remove_entry(&mut root, key)?;
        }

        let root_pid = *root;
        self.coordinator.run(|| {
            let flushed = self.flush_dirty()?;
            self.store.set_root(root_pid);
            self.store.save_manifest()?;
            Ok(flushed)
        })?;
        Ok(true)
    }

    /// Runs one MVCC garbage collection sweep.
    ///
    /// Obsolete and aborted versions are trimmed; keys whose chains
    /// died are physically removed from the tree (with underflow
    /// rebalancing). Returns the number of versions collected.
    pub fn collect_garbage(&self) -> EngineResult<usize> {
        self.check_open()?;

        let aborted = self.versions.cleanup_aborted();
        let old = self.versions.cleanup_old(&self.gc_config, self.wal.next_lsn());
        self.gc_stats.record(&aborted);
        self.gc_stats.record(&old);

        let mut dead_keys = aborted.dead_keys;
        dead_keys.extend(old.dead_keys);
        if !dead_keys.is_empty() {
            let mut root = self.structure.write();
            for key in &dead_keys {
                self.nodes.remove_entry(&mut root, key)?;
            }
        }

        Ok(aborted.aborted_versions_removed + old.versions_removed)
    }

    /// Flushes, persists the manifest, syncs the WAL, and stops the
    /// background threads. Idempotent; further operations fail with
    /// `Closed`.
    ///
    /// Any still-active transaction is aborted first, so the persisted
    /// image contains only committed state.
    pub fn close(&self) -> EngineResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!(path = %self.path.display(), "closing tree");

        self.scheduler.shutdown();

        for txn in self.versions.active_txn_ids() {
            self.abort_internal(txn);
        }

        self.flush_dirty()?;
        self.queue.stop();

        self.store.set_root(*self.structure.read());
        self.store.save_manifest()?;

        self.wal.sync()?;
        self.wal.close()?;
        Ok(())
    }

    /// Verifies the structural invariants: strict in-node ordering,
    /// separator bounds, arity, occupancy, and uniform leaf depth.
    pub fn check_structure(&self) -> EngineResult<TreeCheck> {
        let root = self.structure.read();
        let (depth, leaves, keys) = self.nodes.check_structure(*root)?;
        Ok(TreeCheck {
            depth,
            leaves,
            keys,
        })
    }

    /// Returns aggregated engine statistics.
    pub fn stats(&self) -> EngineResult<EngineStats> {
        Ok(EngineStats {
            store: self.store.stats(),
            versions: self.versions.stats(),
            checkpoints: self.coordinator.stats(),
            wal_size: self.wal.size()?,
            cache_hit_ratio: self.cache.stats().hit_ratio(),
            pages_written_back: self.queue.pages_written(),
            writer_healthy: self.queue.healthy(),
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn check_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_entry_size(&self, key: &Key, value: &Value) -> EngineResult<()> {
        if key.is_empty() || !key.is_within_limit() {
            return Err(EngineError::KeyTooLarge {
                size: key.len(),
                max_size: MAX_KEY_SIZE,
            });
        }
        if !value.is_within_limit() {
            return Err(EngineError::ValueTooLarge {
                size: value.len(),
                max_size: MAX_VALUE_SIZE,
            });
        }
        Ok(())
    }

    /// Runs `op` inside the given transaction, or inside a fresh
    /// auto-committed one when `txn` is invalid.
    fn with_txn<T>(
        &self,
        txn: TxnId,
        op: impl FnOnce(TxnId) -> EngineResult<T>,
    ) -> EngineResult<T> {
        if txn.is_valid() {
            return op(txn);
        }

        let auto = self.begin_txn()?;
        match op(auto) {
            Ok(value) => {
                self.commit_txn(auto)?;
                Ok(value)
            }
            Err(err) => {
                if self.versions.ensure_active(auto).is_ok() {
                    self.abort_internal(auto);
                }
                Err(err)
            }
        }
    }

    /// Opportunistic checkpoint when a size threshold trips.
    fn maybe_checkpoint(&self) {
        if self.coordinator.should_checkpoint() {
            if let Err(err) = self.checkpoint() {
                tracing::warn!(error = %err, "threshold checkpoint failed");
            }
        }
    }

    fn start_background_jobs(self: &Arc<Self>) {
        if !self.options.background_jobs {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        self.scheduler.schedule_recurring(
            "checkpoint",
            self.options.checkpoint_interval,
            move || {
                if let Some(tree) = weak.upgrade() {
                    if let Err(err) = tree.checkpoint() {
                        tracing::warn!(error = %err, "periodic checkpoint failed");
                    }
                }
            },
        );

        let weak: Weak<Self> = Arc::downgrade(self);
        self.scheduler
            .schedule_recurring("mvcc-gc", self.options.gc_interval, move || {
                if let Some(tree) = weak.upgrade() {
                    if let Err(err) = tree.collect_garbage() {
                        tracing::warn!(error = %err, "periodic GC failed");
                    }
                }
            });
    }
}

impl Drop for BPlusTree {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "error closing tree on drop");
        }
    }
}

impl std::fmt::Debug for BPlusTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("path", &self.path)
            .field("fanout", &self.options.fanout)
            .field("root", &*self.structure.read())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(n: u64) -> Key {
        Key::from_u64(n)
    }

    fn test_options() -> TreeOptions {
        TreeOptions::default()
            .with_fanout(4)
            .with_cache_capacity(64)
            .with_background_jobs(false)
    }

    fn open_tree(dir: &TempDir) -> Arc<BPlusTree> {
        BPlusTree::open(dir.path(), test_options()).unwrap()
    }

    #[test]
    fn test_insert_and_search() {
        let tmp = TempDir::new().unwrap();
        let tree = open_tree(&tmp);

        let txn = tree.begin_txn().unwrap();
        tree.insert(txn, &key(1), b"one").unwrap();
        tree.insert(txn, &key(2), b"two").unwrap();
        tree.commit_txn(txn).unwrap();

        let txn = tree.begin_txn().unwrap();
        assert_eq!(tree.search(txn, &key(1)).unwrap(), Some(Bytes::from("one")));
        assert_eq!(tree.search(txn, &key(2)).unwrap(), Some(Bytes::from("two")));
        assert_eq!(tree.search(txn, &key(3)).unwrap(), None);
        tree.abort_txn(txn).unwrap();
    }

    #[test]
    fn test_auto_transactions() {
        let tmp = TempDir::new().unwrap();
        let tree = open_tree(&tmp);

        tree.insert(TxnId::INVALID, &key(7), b"auto").unwrap();
        assert_eq!(
            tree.search(TxnId::INVALID, &key(7)).unwrap(),
            Some(Bytes::from("auto"))
        );
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let tmp = TempDir::new().unwrap();
        let tree = open_tree(&tmp);

        tree.insert(TxnId::INVALID, &key(1), b"v").unwrap();
        let err = tree.insert(TxnId::INVALID, &key(1), b"v2").unwrap_err();
        assert!(matches!(err, EngineError::KeyExists));
    }

    #[test]
    fn test_update_and_delete() {
        let tmp = TempDir::new().unwrap();
        let tree = open_tree(&tmp);

        tree.insert(TxnId::INVALID, &key(1), b"v1").unwrap();
        tree.update(TxnId::INVALID, &key(1), b"v2").unwrap();
        assert_eq!(
            tree.search(TxnId::INVALID, &key(1)).unwrap(),
            Some(Bytes::from("v2"))
        );

        tree.delete(TxnId::INVALID, &key(1)).unwrap();
        assert_eq!(tree.search(TxnId::INVALID, &key(1)).unwrap(), None);

        assert!(matches!(
            tree.update(TxnId::INVALID, &key(1), b"v3").unwrap_err(),
            EngineError::KeyNotFound
        ));
        assert!(matches!(
            tree.delete(TxnId::INVALID, &key(1)).unwrap_err(),
            EngineError::KeyNotFound
        ));
    }

    #[test]
    fn test_abort_discards_writes() {
        let tmp = TempDir::new().unwrap();
        let tree = open_tree(&tmp);

        let txn = tree.begin_txn().unwrap();
        tree.insert(txn, &key(5), b"gone").unwrap();
        tree.abort_txn(txn).unwrap();

        assert_eq!(tree.search(TxnId::INVALID, &key(5)).unwrap(), None);
    }

    #[test]
    fn test_splits_keep_structure_valid() {
        let tmp = TempDir::new().unwrap();
        let tree = open_tree(&tmp);

        let txn = tree.begin_txn().unwrap();
        for n in 0..64 {
            tree.insert(txn, &key(n), format!("value-{n}").as_bytes())
                .unwrap();
        }
        tree.commit_txn(txn).unwrap();

        let check = tree.check_structure().unwrap();
        assert!(check.depth >= 2);
        assert_eq!(check.keys, 64);

        let txn = tree.begin_txn().unwrap();
        for n in 0..64 {
            assert_eq!(
                tree.search(txn, &key(n)).unwrap(),
                Some(Bytes::from(format!("value-{n}"))),
                "key {n}"
            );
        }
        tree.abort_txn(txn).unwrap();
    }

    #[test]
    fn test_closed_tree_rejects_operations() {
        let tmp = TempDir::new().unwrap();
        let tree = open_tree(&tmp);
        tree.close().unwrap();
        tree.close().unwrap(); // idempotent

        assert!(matches!(tree.begin_txn(), Err(EngineError::Closed)));
        assert!(matches!(
            tree.insert(TxnId::INVALID, &key(1), b"v"),
            Err(EngineError::Closed)
        ));
    }

    #[test]
    fn test_entry_size_limits() {
        let tmp = TempDir::new().unwrap();
        let tree = open_tree(&tmp);

        let long_key = Key::from_vec(vec![7u8; MAX_KEY_SIZE + 1]);
        assert!(matches!(
            tree.insert(TxnId::INVALID, &long_key, b"v"),
            Err(EngineError::KeyTooLarge { .. })
        ));

        let big_value = vec![0u8; MAX_VALUE_SIZE + 1];
        assert!(matches!(
            tree.insert(TxnId::INVALID, &key(1), &big_value),
            Err(EngineError::ValueTooLarge { .. })
        ));
    }

    #[test]
    fn test_gc_unlinks_settled_deletes() {
        let tmp = TempDir::new().unwrap();
        let tree = BPlusTree::open(
            tmp.path(),
            test_options().with_mvcc_retention_lsns(0),
        )
        .unwrap();

        tree.insert(TxnId::INVALID, &key(1), b"v").unwrap();
        tree.delete(TxnId::INVALID, &key(1)).unwrap();

        let collected = tree.collect_garbage().unwrap();
        assert!(collected >= 1);
        assert_eq!(tree.search(TxnId::INVALID, &key(1)).unwrap(), None);

        // The key can be inserted fresh afterwards
        tree.insert(TxnId::INVALID, &key(1), b"again").unwrap();
        assert_eq!(
            tree.search(TxnId::INVALID, &key(1)).unwrap(),
            Some(Bytes::from("again"))
        );
    }

    #[test]
    fn test_stats_surface() {
        let tmp = TempDir::new().unwrap();
        let tree = open_tree(&tmp);

        tree.insert(TxnId::INVALID, &key(1), b"v").unwrap();
        let stats = tree.stats().unwrap();

        assert!(stats.store.logical_writes > 0);
        assert!(stats.wal_size > 0);
        assert!(stats.writer_healthy);
    }
}
