//! Recovery: re-applying committed log records on open.
//!
//! Opening a tree reconstructs state in two steps:
//!
//! 1. **Seed** from the page store: the manifest written by the last
//!    quiesced checkpoint is a consistent, committed-only snapshot, so
//!    every leaf entry becomes a committed version attributed to a
//!    synthetic recovery transaction.
//! 2. **Replay** the WAL from the record after that checkpoint,
//!    redoing committed inserts, updates, and deletes through the
//!    normal tree machinery (without re-logging). Transactions with no
//!    commit before end-of-log are discarded by the replay pass, so no
//!    partial effects are ever applied.

use bytes::Bytes;

use tessera_common::error::EngineResult;
use tessera_common::types::{Key, Lsn, PageId, TxnId};
use tessera_mvcc::VersionStore;
use tessera_wal::RedoHandler;

use crate::node::NodeManager;

/// Applies redo records into the tree and the version store.
///
/// All recovered versions are attributed to one synthetic committed
/// transaction. Seeded entries sit at the first LSN; each replayed
/// record takes the next value of a private sequence, which keeps
/// replayed versions newer than the seed while never exceeding the
/// real log positions they correspond to, so every recovered commit
/// point stays at or below any post-recovery snapshot.
pub(crate) struct RedoApplier<'a> {
    nodes: &'a NodeManager,
    versions: &'a VersionStore,
    root: &'a mut PageId,
    recovery_txn: TxnId,
    seq: u64,
}

impl<'a> RedoApplier<'a> {
    pub(crate) fn new(
        nodes: &'a NodeManager,
        versions: &'a VersionStore,
        root: &'a mut PageId,
        recovery_txn: TxnId,
    ) -> Self {
        Self {
            nodes,
            versions,
            root,
            recovery_txn,
            seq: 1,
        }
    }

    /// Seeds the version store from the persisted tree image.
    pub(crate) fn seed_from_pages(&mut self) -> EngineResult<usize> {
        let entries = self.nodes.scan_leaves(*self.root)?;
        let seeded = entries.len();
        for (key, payload) in entries {
            self.versions.insert_committed(
                &key,
                Bytes::from(payload),
                self.recovery_txn,
                Lsn::FIRST,
            );
        }
        if seeded > 0 {
            tracing::debug!(entries = seeded, "seeded version store from page image");
        }
        Ok(seeded)
    }

    fn next_seq(&mut self) -> Lsn {
        self.seq += 1;
        Lsn::new(self.seq)
    }
}

impl RedoHandler for RedoApplier<'_> {
    fn on_insert(&mut self, _page_id: PageId, key: &Key, bytes: &[u8]) -> EngineResult<()> {
        // The logged page is advisory; the tree may have reorganized,
        // so redo locates the leaf through normal traversal.
        self.nodes.insert_entry(self.root, key, bytes, true)?;
        let lsn = self.next_seq();
        self.versions
            .insert_committed(key, Bytes::copy_from_slice(bytes), self.recovery_txn, lsn);
        Ok(())
    }

    fn on_update(&mut self, _page_id: PageId, key: &Key, bytes: &[u8]) -> EngineResult<()> {
        self.nodes.insert_entry(self.root, key, bytes, true)?;
        let lsn = self.next_seq();
        self.versions
            .insert_committed(key, Bytes::copy_from_slice(bytes), self.recovery_txn, lsn);
        Ok(())
    }

    fn on_delete(&mut self, _page_id: PageId, key: &Key) -> EngineResult<()> {
        let lsn = self.next_seq();
        self.versions.remove_committed(key, self.recovery_txn, lsn);
        self.nodes.remove_entry(self.root, key)?;
        Ok(())
    }
}
