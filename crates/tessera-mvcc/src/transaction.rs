//! Transaction state for MVCC.

use std::collections::HashSet;
use std::fmt;

use tessera_common::types::{Key, Lsn, TxnId};

/// The lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Transaction is running.
    Active,
    /// Transaction committed; its versions are visible to later
    /// snapshots.
    Committed,
    /// Transaction aborted; its versions are garbage.
    Aborted,
}

impl TxnState {
    /// Returns true for `Active`.
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns true for `Committed` or `Aborted`.
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::Committed => "COMMITTED",
            Self::Aborted => "ABORTED",
        };
        write!(f, "{s}")
    }
}

/// A transaction as the version store tracks it.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Transaction identifier.
    pub id: TxnId,
    /// Current state.
    pub state: TxnState,
    /// Snapshot point: the LSN at which this transaction started.
    pub start_lsn: Lsn,
    /// Commit point, set when the transaction commits.
    pub commit_lsn: Option<Lsn>,
    /// Keys this transaction has read.
    pub read_set: HashSet<Key>,
    /// Keys this transaction has written (inserted, updated, deleted).
    pub write_set: HashSet<Key>,
}

impl Transaction {
    /// Creates a new active transaction.
    #[must_use]
    pub fn new(id: TxnId, start_lsn: Lsn) -> Self {
        Self {
            id,
            state: TxnState::Active,
            start_lsn,
            commit_lsn: None,
            read_set: HashSet::new(),
            write_set: HashSet::new(),
        }
    }

    /// Returns true while the transaction is running.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Marks the transaction committed at the given LSN.
    pub fn mark_committed(&mut self, commit_lsn: Lsn) {
        self.state = TxnState::Committed;
        self.commit_lsn = Some(commit_lsn);
    }

    /// Marks the transaction aborted.
    pub fn mark_aborted(&mut self) {
        self.state = TxnState::Aborted;
    }
}
