//! Forward replay of the log.
//!
//! Recovery replays the WAL from the record following the most recent
//! valid checkpoint. Replay makes two passes over the scanned records:
//!
//! 1. Collect the terminal outcome (commit or abort) of every
//!    transaction seen.
//! 2. Redo the insert/update/delete records of committed transactions,
//!    in LSN order, through a [`RedoHandler`].
//!
//! Records of transactions with no commit before end-of-log are
//! discarded (an implicit abort), so no partial effects are ever
//! re-applied and no undo pass is required. A checksum failure or torn
//! record terminates the scan at that point; everything before it is
//! replayed normally. Replay is idempotent: running it twice produces
//! the same state as running it once, because redo handlers overwrite
//! rather than accumulate.

use std::collections::HashSet;

use tessera_common::error::{EngineError, EngineResult};
use tessera_common::types::{Key, Lsn, PageId, TxnId};

use crate::log::Wal;
use crate::record::{RecordType, WalPayload};

/// Callbacks that re-apply committed operations during recovery.
///
/// Handlers receive the page the operation targeted when it was logged;
/// the page is advisory (the tree may have reorganized since) and
/// implementations locate the key through normal traversal.
pub trait RedoHandler {
    /// Re-applies a committed insert.
    fn on_insert(&mut self, page_id: PageId, key: &Key, bytes: &[u8]) -> EngineResult<()>;

    /// Re-applies a committed update.
    fn on_update(&mut self, page_id: PageId, key: &Key, bytes: &[u8]) -> EngineResult<()>;

    /// Re-applies a committed delete.
    fn on_delete(&mut self, page_id: PageId, key: &Key) -> EngineResult<()>;
}

/// Outcome of a replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Records scanned, including control records.
    pub records_scanned: usize,
    /// Data records re-applied.
    pub records_redone: usize,
    /// Transactions whose effects were replayed.
    pub committed_txns: usize,
    /// Transactions discarded (aborted or missing a commit).
    pub discarded_txns: usize,
}

impl Wal {
    /// Replays committed work from `from` through the given handler.
    pub fn replay(&self, from: Lsn, handler: &mut dyn RedoHandler) -> EngineResult<ReplaySummary> {
        let records = self.iter_from(from)?;

        // Pass 1: terminal outcome per transaction.
        let mut committed: HashSet<TxnId> = HashSet::new();
        let mut seen: HashSet<TxnId> = HashSet::new();
        for record in &records {
            let txn_id = record.txn_id();
            if txn_id.is_valid() {
                seen.insert(txn_id);
            }
            if record.record_type() == RecordType::Commit {
                committed.insert(txn_id);
            }
        }

        // Pass 2: redo committed data records in log order.
        let mut summary = ReplaySummary {
            records_scanned: records.len(),
            committed_txns: committed.len(),
            discarded_txns: seen.len() - committed.len(),
            ..Default::default()
        };

        for record in &records {
            if !committed.contains(&record.txn_id()) {
                continue;
            }
            let WalPayload::Data(ref payload) = record.payload else {
                continue;
            };

            let key = Key::from_raw(payload.key.clone());
            match record.record_type() {
                RecordType::Insert => {
                    let bytes = payload.new_bytes.as_ref().ok_or_else(|| {
                        EngineError::WalCorrupted {
                            lsn: record.lsn(),
                            reason: "insert record missing redo image".to_string(),
                        }
                    })?;
                    handler.on_insert(payload.page_id, &key, bytes)?;
                }
                RecordType::Update => {
                    let bytes = payload.new_bytes.as_ref().ok_or_else(|| {
                        EngineError::WalCorrupted {
                            lsn: record.lsn(),
                            reason: "update record missing redo image".to_string(),
                        }
                    })?;
                    handler.on_update(payload.page_id, &key, bytes)?;
                }
                RecordType::Delete => {
                    handler.on_delete(payload.page_id, &key)?;
                }
                _ => continue,
            }
            summary.records_redone += 1;
        }

        tracing::info!(
            scanned = summary.records_scanned,
            redone = summary.records_redone,
            committed = summary.committed_txns,
            discarded = summary.discarded_txns,
            "WAL replay complete"
        );
        Ok(summary)
    }

    /// Replays from the record following the most recent checkpoint.
    pub fn replay_from_last_checkpoint(
        &self,
        handler: &mut dyn RedoHandler,
    ) -> EngineResult<ReplaySummary> {
        let from = self.last_checkpoint_lsn().next();
        self.replay(from, handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WalConfig;
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    /// A redo handler that applies operations to a plain map.
    #[derive(Default)]
    struct MapHandler {
        state: BTreeMap<Vec<u8>, Vec<u8>>,
    }

    impl RedoHandler for MapHandler {
        fn on_insert(&mut self, _pid: PageId, key: &Key, bytes: &[u8]) -> EngineResult<()> {
            self.state.insert(key.as_bytes().to_vec(), bytes.to_vec());
            Ok(())
        }

        fn on_update(&mut self, _pid: PageId, key: &Key, bytes: &[u8]) -> EngineResult<()> {
            self.state.insert(key.as_bytes().to_vec(), bytes.to_vec());
            Ok(())
        }

        fn on_delete(&mut self, _pid: PageId, key: &Key) -> EngineResult<()> {
            self.state.remove(key.as_bytes());
            Ok(())
        }
    }

    fn test_wal(dir: &TempDir) -> Wal {
        Wal::open(WalConfig::new(dir.path().join("wal.log"))).unwrap()
    }

    #[test]
    fn test_committed_work_is_redone() {
        let tmp = TempDir::new().unwrap();
        let wal = test_wal(&tmp);

        let txn = wal.begin_txn().unwrap();
        wal.log_insert(txn, PageId::new(1), &Key::from_bytes(b"a"), Bytes::from("1"))
            .unwrap();
        wal.log_insert(txn, PageId::new(1), &Key::from_bytes(b"b"), Bytes::from("2"))
            .unwrap();
        wal.commit_txn(txn).unwrap();

        let mut handler = MapHandler::default();
        let summary = wal.replay(Lsn::FIRST, &mut handler).unwrap();

        assert_eq!(summary.records_redone, 2);
        assert_eq!(summary.committed_txns, 1);
        assert_eq!(handler.state.get(b"a".as_ref()), Some(&b"1".to_vec()));
        assert_eq!(handler.state.get(b"b".as_ref()), Some(&b"2".to_vec()));
    }

    #[test]
    fn test_uncommitted_work_is_discarded() {
        let tmp = TempDir::new().unwrap();
        let wal = test_wal(&tmp);

        let committed = wal.begin_txn().unwrap();
        wal.log_insert(
            committed,
            PageId::new(1),
            &Key::from_bytes(b"keep"),
            Bytes::from("v"),
        )
        .unwrap();
        wal.commit_txn(committed).unwrap();

        let in_flight = wal.begin_txn().unwrap();
        wal.log_insert(
            in_flight,
            PageId::new(1),
            &Key::from_bytes(b"drop"),
            Bytes::from("v"),
        )
        .unwrap();
        // No commit for in_flight.

        let aborted = wal.begin_txn().unwrap();
        wal.log_insert(
            aborted,
            PageId::new(1),
            &Key::from_bytes(b"also-drop"),
            Bytes::from("v"),
        )
        .unwrap();
        wal.abort_txn(aborted).unwrap();
        wal.sync().unwrap();

        let mut handler = MapHandler::default();
        let summary = wal.replay(Lsn::FIRST, &mut handler).unwrap();

        assert_eq!(summary.committed_txns, 1);
        assert_eq!(summary.discarded_txns, 2);
        assert!(handler.state.contains_key(b"keep".as_ref()));
        assert!(!handler.state.contains_key(b"drop".as_ref()));
        assert!(!handler.state.contains_key(b"also-drop".as_ref()));
    }

    #[test]
    fn test_update_and_delete_redo() {
        let tmp = TempDir::new().unwrap();
        let wal = test_wal(&tmp);

        let txn = wal.begin_txn().unwrap();
        let k1 = Key::from_bytes(b"a");
        let k2 = Key::from_bytes(b"b");
        wal.log_insert(txn, PageId::new(1), &k1, Bytes::from("old"))
            .unwrap();
        wal.log_insert(txn, PageId::new(1), &k2, Bytes::from("x"))
            .unwrap();
        wal.log_update(txn, PageId::new(1), &k1, Bytes::from("old"), Bytes::from("new"))
            .unwrap();
        wal.log_delete(txn, PageId::new(1), &k2, Bytes::from("x"))
            .unwrap();
        wal.commit_txn(txn).unwrap();

        let mut handler = MapHandler::default();
        wal.replay(Lsn::FIRST, &mut handler).unwrap();

        assert_eq!(handler.state.get(b"a".as_ref()), Some(&b"new".to_vec()));
        assert!(!handler.state.contains_key(b"b".as_ref()));
    }

    #[test]
    fn test_replay_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let wal = test_wal(&tmp);

        let txn = wal.begin_txn().unwrap();
        wal.log_insert(txn, PageId::new(1), &Key::from_bytes(b"a"), Bytes::from("1"))
            .unwrap();
        wal.log_update(
            txn,
            PageId::new(1),
            &Key::from_bytes(b"a"),
            Bytes::from("1"),
            Bytes::from("2"),
        )
        .unwrap();
        wal.commit_txn(txn).unwrap();

        let mut once = MapHandler::default();
        wal.replay(Lsn::FIRST, &mut once).unwrap();

        let mut twice = MapHandler::default();
        wal.replay(Lsn::FIRST, &mut twice).unwrap();
        wal.replay(Lsn::FIRST, &mut twice).unwrap();

        assert_eq!(once.state, twice.state);
    }

    #[test]
    fn test_replay_from_checkpoint_skips_prefix() {
        let tmp = TempDir::new().unwrap();
        let wal = test_wal(&tmp);

        let txn = wal.begin_txn().unwrap();
        wal.log_insert(
            txn,
            PageId::new(1),
            &Key::from_bytes(b"before"),
            Bytes::from("v"),
        )
        .unwrap();
        wal.commit_txn(txn).unwrap();
        wal.write_checkpoint().unwrap();

        let txn2 = wal.begin_txn().unwrap();
        wal.log_insert(
            txn2,
            PageId::new(1),
            &Key::from_bytes(b"after"),
            Bytes::from("v"),
        )
        .unwrap();
        wal.commit_txn(txn2).unwrap();

        let mut handler = MapHandler::default();
        let summary = wal.replay_from_last_checkpoint(&mut handler).unwrap();

        assert_eq!(summary.records_redone, 1);
        assert!(handler.state.contains_key(b"after".as_ref()));
        assert!(!handler.state.contains_key(b"before".as_ref()));
    }
}
