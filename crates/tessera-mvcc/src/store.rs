//! The version store: chains, transaction table, and visibility.
//!
//! Two locks protect the store, always acquired in this order when
//! both are needed: the chain map first, the transaction table second.
//! No code path acquires them in reverse.
//!
//! # Visibility
//!
//! `read(txn, key)` returns the newest version whose creation is
//! visible to the transaction:
//! - created by the transaction itself, or
//! - created by a transaction that committed at or before the reader's
//!   start LSN.
//!
//! If that version carries a tombstone whose deleter is the reader
//! itself, or committed at or before the reader's start LSN, the key is
//! absent for this snapshot. A tombstone from a concurrent,
//! not-yet-committed (or later-committed) deleter is invisible and the
//! version still reads normally.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use tessera_common::error::{EngineError, EngineResult};
use tessera_common::types::{Key, Lsn, TxnId};

use crate::transaction::{Transaction, TxnState};
use crate::version::{VersionChain, VersionedRecord};

/// Snapshot of version store statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionStats {
    /// Total versions across all chains.
    pub total_versions: usize,
    /// Number of keys with at least one version.
    pub keys: usize,
    /// Active transactions.
    pub active_txns: usize,
    /// Committed transactions still in the table.
    pub committed_txns: usize,
    /// Aborted transactions still in the table.
    pub aborted_txns: usize,
    /// Versions created over the store's lifetime.
    pub versions_created: u64,
    /// Versions removed by garbage collection.
    pub versions_cleaned: u64,
}

/// Per-key version chains with snapshot-isolation visibility.
pub struct VersionStore {
    pub(crate) chains: RwLock<HashMap<Key, VersionChain>>,
    pub(crate) txns: RwLock<HashMap<TxnId, Transaction>>,
    pub(crate) versions_created: AtomicU64,
    pub(crate) versions_cleaned: AtomicU64,
}

impl VersionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chains: RwLock::new(HashMap::new()),
            txns: RwLock::new(HashMap::new()),
            versions_created: AtomicU64::new(0),
            versions_cleaned: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Transaction Lifecycle
    // =========================================================================

    /// Registers a new active transaction with its snapshot point.
    pub fn begin(&self, txn_id: TxnId, start_lsn: Lsn) {
        let mut txns = self.txns.write();
        txns.insert(txn_id, Transaction::new(txn_id, start_lsn));
    }

    /// Returns the state of a transaction, if known.
    #[must_use]
    pub fn txn_state(&self, txn_id: TxnId) -> Option<TxnState> {
        self.txns.read().get(&txn_id).map(|t| t.state)
    }

    /// Returns the start LSN of an active transaction, or
    /// `TxnNotActive`.
    pub fn ensure_active(&self, txn_id: TxnId) -> EngineResult<Lsn> {
        let txns = self.txns.read();
        match txns.get(&txn_id) {
            Some(txn) if txn.is_active() => Ok(txn.start_lsn),
            _ => Err(EngineError::TxnNotActive { txn_id }),
        }
    }

    /// Validates first-committer-wins for the transaction's write set.
    ///
    /// Fails with `TxnConflict` if any written key carries a version
    /// created or deleted by another transaction that committed after
    /// this transaction's snapshot point.
    pub fn validate_commit(&self, txn_id: TxnId) -> EngineResult<()> {
        let chains = self.chains.read();
        let txns = self.txns.read();

        let txn = txns
            .get(&txn_id)
            .filter(|t| t.is_active())
            .ok_or(EngineError::TxnNotActive { txn_id })?;

        for key in &txn.write_set {
            let Some(chain) = chains.get(key) else {
                continue;
            };
            for version in chain.iter() {
                if let Some(winner) = Self::committed_after(&txns, version.created_by, txn) {
                    return Err(EngineError::TxnConflict {
                        txn_id,
                        conflicting_txn_id: winner,
                    });
                }
                if let Some(deleter) = version.deleted_by {
                    if let Some(winner) = Self::committed_after(&txns, deleter, txn) {
                        return Err(EngineError::TxnConflict {
                            txn_id,
                            conflicting_txn_id: winner,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Marks the transaction committed at the given LSN.
    pub fn commit(&self, txn_id: TxnId, commit_lsn: Lsn) -> EngineResult<()> {
        let mut txns = self.txns.write();
        match txns.get_mut(&txn_id) {
            Some(txn) if txn.is_active() => {
                txn.mark_committed(commit_lsn);
                Ok(())
            }
            _ => Err(EngineError::TxnNotActive { txn_id }),
        }
    }

    /// Marks the transaction aborted; its versions become garbage.
    pub fn abort(&self, txn_id: TxnId) -> EngineResult<()> {
        let mut txns = self.txns.write();
        match txns.get_mut(&txn_id) {
            Some(txn) if txn.is_active() => {
                txn.mark_aborted();
                Ok(())
            }
            _ => Err(EngineError::TxnNotActive { txn_id }),
        }
    }

    /// Returns the smallest start LSN among active transactions.
    #[must_use]
    pub fn min_active_start_lsn(&self) -> Option<Lsn> {
        self.txns
            .read()
            .values()
            .filter(|t| t.is_active())
            .map(|t| t.start_lsn)
            .min()
    }

    /// Returns the number of active transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.txns.read().values().filter(|t| t.is_active()).count()
    }

    /// Returns the IDs of all active transactions.
    #[must_use]
    pub fn active_txn_ids(&self) -> Vec<TxnId> {
        self.txns
            .read()
            .values()
            .filter(|t| t.is_active())
            .map(|t| t.id)
            .collect()
    }

    // =========================================================================
    // MVCC Operations
    // =========================================================================

    /// Reads the value visible to the transaction, recording the key in
    /// its read set.
    pub fn read(&self, txn_id: TxnId, key: &Key) -> EngineResult<Option<Bytes>> {
        let start_lsn = self.ensure_active(txn_id)?;
        {
            let mut txns = self.txns.write();
            if let Some(txn) = txns.get_mut(&txn_id) {
                txn.read_set.insert(key.clone());
            }
        }

        let chains = self.chains.read();
        let txns = self.txns.read();
        Ok(Self::visible_value(&chains, &txns, txn_id, start_lsn, key))
    }

    /// Returns true if a live version of the key is visible to the
    /// transaction, without touching its read set.
    pub fn key_visible(&self, txn_id: TxnId, key: &Key) -> EngineResult<bool> {
        let start_lsn = self.ensure_active(txn_id)?;
        let chains = self.chains.read();
        let txns = self.txns.read();
        Ok(Self::visible_value(&chains, &txns, txn_id, start_lsn, key).is_some())
    }

    /// Prepends a new version for an insert.
    ///
    /// Fails with `KeyExists` if a live version is already visible to
    /// the transaction.
    pub fn insert(&self, txn_id: TxnId, key: &Key, data: Bytes, lsn: Lsn) -> EngineResult<()> {
        let start_lsn = self.ensure_active(txn_id)?;

        {
            let mut chains = self.chains.write();
            let txns = self.txns.read();
            if Self::visible_value(&chains, &txns, txn_id, start_lsn, key).is_some() {
                return Err(EngineError::KeyExists);
            }
            drop(txns);
            chains
                .entry(key.clone())
                .or_default()
                .push_front(VersionedRecord::new(key.clone(), data, txn_id, lsn));
        }
        self.versions_created.fetch_add(1, Ordering::Relaxed);

        let mut txns = self.txns.write();
        if let Some(txn) = txns.get_mut(&txn_id) {
            txn.write_set.insert(key.clone());
        }
        Ok(())
    }

    /// Prepends a new version for an update (a logical new version).
    ///
    /// Fails with `KeyNotFound` if no live version is visible.
    pub fn update(&self, txn_id: TxnId, key: &Key, data: Bytes, lsn: Lsn) -> EngineResult<()> {
        let start_lsn = self.ensure_active(txn_id)?;

        {
            let mut chains = self.chains.write();
            let txns = self.txns.read();
            if Self::visible_value(&chains, &txns, txn_id, start_lsn, key).is_none() {
                return Err(EngineError::KeyNotFound);
            }
            drop(txns);
            chains
                .entry(key.clone())
                .or_default()
                .push_front(VersionedRecord::new(key.clone(), data, txn_id, lsn));
        }
        self.versions_created.fetch_add(1, Ordering::Relaxed);

        let mut txns = self.txns.write();
        if let Some(txn) = txns.get_mut(&txn_id) {
            txn.write_set.insert(key.clone());
        }
        Ok(())
    }

    /// Tombstones the version visible to the transaction.
    ///
    /// Fails with `KeyNotFound` if no live version is visible.
    pub fn remove(&self, txn_id: TxnId, key: &Key, lsn: Lsn) -> EngineResult<()> {
        let start_lsn = self.ensure_active(txn_id)?;

        {
            let mut chains = self.chains.write();
            let txns = self.txns.read();

            let Some(chain) = chains.get_mut(key) else {
                return Err(EngineError::KeyNotFound);
            };
            let mut target = None;
            for (idx, version) in chain.iter().enumerate() {
                if Self::creation_visible(&txns, version, txn_id, start_lsn) {
                    if Self::deletion_visible(&txns, version, txn_id, start_lsn) {
                        return Err(EngineError::KeyNotFound);
                    }
                    target = Some(idx);
                    break;
                }
            }
            let Some(idx) = target else {
                return Err(EngineError::KeyNotFound);
            };
            drop(txns);
            if let Some(version) = chain.iter_mut().nth(idx) {
                version.mark_deleted(txn_id, lsn);
            };
        }

        let mut txns = self.txns.write();
        if let Some(txn) = txns.get_mut(&txn_id) {
            txn.write_set.insert(key.clone());
        }
        Ok(())
    }

    /// Removes an aborted transaction's versions and tombstones from
    /// its written chains.
    ///
    /// Returns the keys whose chains died: those keys never had a
    /// committed version, and the caller should physically unlink them.
    /// The transaction must already be marked aborted.
    pub fn purge_aborted_writes(&self, txn_id: TxnId) -> Vec<Key> {
        let write_set: Vec<Key> = {
            let txns = self.txns.read();
            match txns.get(&txn_id) {
                Some(txn) if txn.state == TxnState::Aborted => {
                    txn.write_set.iter().cloned().collect()
                }
                _ => return Vec::new(),
            }
        };

        let mut dead_keys = Vec::new();
        let mut chains = self.chains.write();
        let mut cleaned = 0u64;
        for key in write_set {
            let Some(chain) = chains.get_mut(&key) else {
                continue;
            };
            for version in chain.iter_mut() {
                if version.deleted_by == Some(txn_id) {
                    version.clear_tombstone();
                }
            }
            cleaned += chain.retain(|v| v.created_by != txn_id) as u64;
            if chain.is_empty() {
                chains.remove(&key);
                dead_keys.push(key);
            }
        }
        drop(chains);

        self.versions_cleaned.fetch_add(cleaned, Ordering::Relaxed);
        dead_keys
    }

    /// Drops every chain whose newest version carries a deletion
    /// committed at or before all active snapshots, regardless of the
    /// GC retention window.
    ///
    /// Used when quiescing for a checkpoint: the page image persisted
    /// by the checkpoint must not contain keys that every possible
    /// reader already observes as deleted, or they would resurrect on
    /// recovery. Returns the dead keys for physical unlinking.
    pub fn settle_tombstones(&self) -> Vec<Key> {
        let mut chains = self.chains.write();
        let txns = self.txns.read();

        let min_active = self
            .min_active_start_lsn_locked(&txns)
            .unwrap_or(Lsn::MAX);

        let mut dead_keys = Vec::new();
        for (key, chain) in chains.iter() {
            let Some(newest) = chain.newest() else {
                continue;
            };
            let created_settled = match txns.get(&newest.created_by) {
                Some(t) if t.state == TxnState::Committed => {
                    t.commit_lsn.is_some_and(|lsn| lsn <= min_active)
                }
                _ => false,
            };
            let deletion_settled = newest.deleted_by.is_some_and(|d| match txns.get(&d) {
                Some(t) if t.state == TxnState::Committed => {
                    t.commit_lsn.is_some_and(|lsn| lsn <= min_active)
                }
                _ => false,
            });
            if created_settled && deletion_settled {
                dead_keys.push(key.clone());
            }
        }

        let mut cleaned = 0u64;
        for key in &dead_keys {
            if let Some(chain) = chains.remove(key) {
                cleaned += chain.len() as u64;
            }
        }
        drop(txns);
        drop(chains);

        self.versions_cleaned.fetch_add(cleaned, Ordering::Relaxed);
        dead_keys
    }

    pub(crate) fn min_active_start_lsn_locked(
        &self,
        txns: &HashMap<TxnId, Transaction>,
    ) -> Option<Lsn> {
        txns.values()
            .filter(|t| t.is_active())
            .map(|t| t.start_lsn)
            .min()
    }

    // =========================================================================
    // Recovery Hooks
    // =========================================================================

    /// Installs a committed version directly (recovery redo path).
    ///
    /// Idempotent: re-applying the same (transaction, LSN) pair leaves
    /// the chain unchanged, so replaying the log twice yields the same
    /// state as replaying it once.
    pub fn insert_committed(&self, key: &Key, data: Bytes, txn_id: TxnId, lsn: Lsn) {
        self.register_recovered_commit(txn_id, lsn);
        let mut chains = self.chains.write();
        let chain = chains.entry(key.clone()).or_default();
        if chain
            .newest()
            .is_some_and(|v| v.created_by == txn_id && v.created_at == lsn)
        {
            return;
        }
        chain.push_front(VersionedRecord::new(key.clone(), data, txn_id, lsn));
        self.versions_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Tombstones the newest live version with a committed deleter
    /// (recovery redo path).
    pub fn remove_committed(&self, key: &Key, txn_id: TxnId, lsn: Lsn) {
        self.register_recovered_commit(txn_id, lsn);
        let mut chains = self.chains.write();
        if let Some(chain) = chains.get_mut(key) {
            if let Some(version) = chain.iter_mut().find(|v| !v.is_deleted()) {
                version.mark_deleted(txn_id, lsn);
            }
        }
    }

    /// Ensures a transaction recovered from the log is recorded as
    /// committed; the commit point advances with each replayed record.
    fn register_recovered_commit(&self, txn_id: TxnId, lsn: Lsn) {
        let mut txns = self.txns.write();
        let entry = txns.entry(txn_id).or_insert_with(|| {
            let mut txn = Transaction::new(txn_id, lsn);
            txn.mark_committed(lsn);
            txn
        });
        entry.state = TxnState::Committed;
        if entry.commit_lsn.is_none() || entry.commit_lsn < Some(lsn) {
            entry.commit_lsn = Some(lsn);
        }
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Returns a snapshot of store statistics.
    #[must_use]
    pub fn stats(&self) -> VersionStats {
        let chains = self.chains.read();
        let txns = self.txns.read();
        let mut stats = VersionStats {
            total_versions: chains.values().map(VersionChain::len).sum(),
            keys: chains.len(),
            versions_created: self.versions_created.load(Ordering::Relaxed),
            versions_cleaned: self.versions_cleaned.load(Ordering::Relaxed),
            ..Default::default()
        };
        for txn in txns.values() {
            match txn.state {
                TxnState::Active => stats.active_txns += 1,
                TxnState::Committed => stats.committed_txns += 1,
                TxnState::Aborted => stats.aborted_txns += 1,
            }
        }
        stats
    }

    /// Number of versions currently chained for a key.
    #[must_use]
    pub fn version_count(&self, key: &Key) -> usize {
        self.chains.read().get(key).map_or(0, VersionChain::len)
    }

    // =========================================================================
    // Visibility Internals
    // =========================================================================

    pub(crate) fn visible_value(
        chains: &HashMap<Key, VersionChain>,
        txns: &HashMap<TxnId, Transaction>,
        reader: TxnId,
        start_lsn: Lsn,
        key: &Key,
    ) -> Option<Bytes> {
        let chain = chains.get(key)?;
        for version in chain.iter() {
            if Self::creation_visible(txns, version, reader, start_lsn) {
                if Self::deletion_visible(txns, version, reader, start_lsn) {
                    return None;
                }
                return Some(version.data.clone());
            }
        }
        None
    }

    pub(crate) fn creation_visible(
        txns: &HashMap<TxnId, Transaction>,
        version: &VersionedRecord,
        reader: TxnId,
        start_lsn: Lsn,
    ) -> bool {
        if version.created_by == reader {
            return true;
        }
        match txns.get(&version.created_by) {
            Some(creator) if creator.state == TxnState::Committed => {
                creator.commit_lsn.is_some_and(|lsn| lsn <= start_lsn)
            }
            _ => false,
        }
    }

    pub(crate) fn deletion_visible(
        txns: &HashMap<TxnId, Transaction>,
        version: &VersionedRecord,
        reader: TxnId,
        start_lsn: Lsn,
    ) -> bool {
        let Some(deleter) = version.deleted_by else {
            return false;
        };
        if deleter == reader {
            return true;
        }
        match txns.get(&deleter) {
            Some(txn) if txn.state == TxnState::Committed => {
                txn.commit_lsn.is_some_and(|lsn| lsn <= start_lsn)
            }
            _ => false,
        }
    }

    /// Returns the id of `writer` when it is a different transaction
    /// that committed after `txn`'s snapshot point.
    fn committed_after(
        txns: &HashMap<TxnId, Transaction>,
        writer: TxnId,
        txn: &Transaction,
    ) -> Option<TxnId> {
        if writer == txn.id {
            return None;
        }
        match txns.get(&writer) {
            Some(other)
                if other.state == TxnState::Committed
                    && other.commit_lsn.is_some_and(|lsn| lsn > txn.start_lsn) =>
            {
                Some(writer)
            }
            _ => None,
        }
    }
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("VersionStore")
            .field("keys", &stats.keys)
            .field("total_versions", &stats.total_versions)
            .field("active_txns", &stats.active_txns)
            .finish()
    }
}
