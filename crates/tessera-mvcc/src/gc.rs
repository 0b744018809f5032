//! Garbage collection of obsolete versions.
//!
//! Two sweeps keep chains bounded:
//!
//! - [`cleanup_old`](VersionStore::cleanup_old) trims superseded
//!   committed versions past the retention window or the per-key cap,
//!   and drops chains whose newest version carries a deletion visible
//!   to every possible reader
//! - [`cleanup_aborted`](VersionStore::cleanup_aborted) removes
//!   versions created by aborted transactions and clears tombstones
//!   left by aborted deleters
//!
//! Safety invariant: no version visible to any active transaction is
//! ever removed. A version is only trimmed when a newer committed
//! version is visible to every active transaction, and a chain is only
//! dropped when its newest version's creation and deletion both
//! committed at or before the oldest active snapshot.
//!
//! Both sweeps report the keys whose chains died so the engine can
//! physically unlink them from the B+Tree; logical deletes are pure
//! tombstones until this point.

use std::sync::atomic::{AtomicU64, Ordering};

use tessera_common::constants::{DEFAULT_MAX_VERSIONS_PER_KEY, DEFAULT_RETENTION_LSNS};
use tessera_common::types::{Key, Lsn, TxnId};

use crate::store::VersionStore;
use crate::transaction::TxnState;

/// Garbage collection policy.
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// How long (in LSN units) superseded or deleted versions are
    /// retained.
    pub retention_lsns: u64,
    /// Maximum versions kept per key; excess trims from the old end
    /// when safe.
    pub max_versions_per_key: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            retention_lsns: DEFAULT_RETENTION_LSNS,
            max_versions_per_key: DEFAULT_MAX_VERSIONS_PER_KEY,
        }
    }
}

impl GcConfig {
    /// Sets the retention window in LSN units.
    #[must_use]
    pub fn with_retention_lsns(mut self, retention: u64) -> Self {
        self.retention_lsns = retention;
        self
    }

    /// Sets the per-key version cap.
    #[must_use]
    pub fn with_max_versions_per_key(mut self, max: usize) -> Self {
        self.max_versions_per_key = max.max(1);
        self
    }
}

/// Result of one GC sweep.
#[derive(Debug, Clone, Default)]
pub struct GcOutcome {
    /// Superseded committed versions removed.
    pub versions_removed: usize,
    /// Versions of aborted transactions removed.
    pub aborted_versions_removed: usize,
    /// Tombstones cleared because their deleter aborted.
    pub tombstones_cleared: usize,
    /// Keys whose chains died; the tree should physically unlink them.
    pub dead_keys: Vec<Key>,
}

/// Cumulative GC statistics.
#[derive(Debug, Default)]
pub struct GcStats {
    /// Number of sweeps run.
    pub runs: AtomicU64,
    /// Total versions collected across sweeps.
    pub versions_collected: AtomicU64,
    /// Total chains dropped across sweeps.
    pub chains_removed: AtomicU64,
}

impl GcStats {
    /// Records the outcome of one sweep.
    pub fn record(&self, outcome: &GcOutcome) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.versions_collected.fetch_add(
            (outcome.versions_removed + outcome.aborted_versions_removed) as u64,
            Ordering::Relaxed,
        );
        self.chains_removed
            .fetch_add(outcome.dead_keys.len() as u64, Ordering::Relaxed);
    }

    /// Number of sweeps run.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Total versions collected.
    #[must_use]
    pub fn versions_collected(&self) -> u64 {
        self.versions_collected.load(Ordering::Relaxed)
    }
}

impl VersionStore {
    /// Trims superseded committed versions and drops dead chains.
    ///
    /// `current_lsn` is the engine's current logical time, used for the
    /// retention window.
    pub fn cleanup_old(&self, config: &GcConfig, current_lsn: Lsn) -> GcOutcome {
        let mut chains = self.chains.write();
        let txns = self.txns.read();

        // With no active transaction, everything committed is visible
        // to every possible future reader.
        let min_active = self
            .min_active_start_lsn_locked(&txns)
            .unwrap_or(current_lsn);

        let mut outcome = GcOutcome::default();

        for (key, chain) in chains.iter_mut() {
            // A chain is dead when its newest version's creation and
            // deletion both committed at or before every active
            // snapshot: the key is absent for all current and future
            // readers.
            if let Some(newest) = chain.newest() {
                let created_settled = commit_lsn_of(&txns, newest.created_by)
                    .is_some_and(|lsn| lsn <= min_active);
                let deletion_settled = newest
                    .deleted_by
                    .and_then(|deleter| commit_lsn_of(&txns, deleter))
                    .is_some_and(|lsn| lsn <= min_active);
                let expired = newest
                    .deleted_at
                    .is_some_and(|at| current_lsn.diff(at) >= config.retention_lsns);

                if created_settled && deletion_settled && expired {
                    outcome.versions_removed += chain.len();
                    outcome.dead_keys.push(key.clone());
                    continue;
                }
            }

            // Otherwise trim the old end: a version may go once a newer
            // committed version is visible to every active transaction
            // and it is past the retention window or the per-key cap.
            let mut shadowed_for_all = false;
            let mut remove = Vec::new();
            for (idx, version) in chain.iter().enumerate() {
                let committed = txn_state_of(&txns, version.created_by)
                    == Some(TxnState::Committed);

                if idx > 0 && committed && shadowed_for_all {
                    let over_cap = idx >= config.max_versions_per_key;
                    let expired =
                        current_lsn.diff(version.created_at) >= config.retention_lsns;
                    if over_cap || expired {
                        remove.push(idx);
                    }
                }

                if committed
                    && commit_lsn_of(&txns, version.created_by)
                        .is_some_and(|lsn| lsn <= min_active)
                {
                    shadowed_for_all = true;
                }
            }
            outcome.versions_removed += chain.remove_positions(&remove);
        }

        for key in &outcome.dead_keys {
            chains.remove(key);
        }

        drop(txns);
        drop(chains);

        self.versions_cleaned
            .fetch_add(outcome.versions_removed as u64, Ordering::Relaxed);
        if outcome.versions_removed > 0 || !outcome.dead_keys.is_empty() {
            tracing::debug!(
                removed = outcome.versions_removed,
                dead_keys = outcome.dead_keys.len(),
                "version GC sweep"
            );
        }
        outcome
    }

    /// Removes versions created by aborted transactions and clears
    /// tombstones whose deleter aborted.
    pub fn cleanup_aborted(&self) -> GcOutcome {
        let mut chains = self.chains.write();
        let txns = self.txns.read();

        let mut outcome = GcOutcome::default();

        for (key, chain) in chains.iter_mut() {
            for version in chain.iter_mut() {
                let deleter_aborted = version
                    .deleted_by
                    .is_some_and(|d| txn_state_of(&txns, d) == Some(TxnState::Aborted));
                if deleter_aborted {
                    version.clear_tombstone();
                    outcome.tombstones_cleared += 1;
                }
            }

            let removed = chain.retain(|v| {
                txn_state_of(&txns, v.created_by) != Some(TxnState::Aborted)
            });
            outcome.aborted_versions_removed += removed;

            if chain.is_empty() {
                outcome.dead_keys.push(key.clone());
            }
        }

        for key in &outcome.dead_keys {
            chains.remove(key);
        }

        drop(txns);
        drop(chains);

        self.versions_cleaned
            .fetch_add(outcome.aborted_versions_removed as u64, Ordering::Relaxed);
        outcome
    }

}

fn txn_state_of(
    txns: &std::collections::HashMap<TxnId, crate::transaction::Transaction>,
    id: TxnId,
) -> Option<TxnState> {
    txns.get(&id).map(|t| t.state)
}

fn commit_lsn_of(
    txns: &std::collections::HashMap<TxnId, crate::transaction::Transaction>,
    id: TxnId,
) -> Option<Lsn> {
    txns.get(&id)
        .filter(|t| t.state == TxnState::Committed)
        .and_then(|t| t.commit_lsn)
}
