//! Version records and per-key chains.
//!
//! # Chain Structure
//!
//! ```text
//! Key: "user:1"
//! ┌────────────────────────────────────────────────┐
//! │ Version 3 (newest)                             │
//! │ created_by: txn 9, created_at: lsn 150         │
//! │ data: "Alice (updated)"                        │
//! │                     ↓                          │
//! │ Version 2                                      │
//! │ created_by: txn 5, created_at: lsn 100         │
//! │ deleted_by: txn 9, deleted_at: lsn 150         │
//! │                     ↓                          │
//! │ Version 1 (oldest)                             │
//! │ created_by: txn 1, created_at: lsn 40          │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! Chains are ordered newest-first. Whether a version is visible to a
//! reader depends on the commit state of its creator (and deleter)
//! relative to the reader's start LSN; that logic lives in the store,
//! which owns the transaction table.

use bytes::Bytes;

use tessera_common::types::{Key, Lsn, TxnId};

/// A single version of a record.
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    /// The key this version belongs to.
    pub key: Key,
    /// The value payload.
    pub data: Bytes,
    /// Transaction that created this version.
    pub created_by: TxnId,
    /// LSN of the WAL record that created this version.
    pub created_at: Lsn,
    /// Transaction that tombstoned this version, if any.
    pub deleted_by: Option<TxnId>,
    /// LSN of the WAL record that tombstoned this version.
    pub deleted_at: Option<Lsn>,
}

impl VersionedRecord {
    /// Creates a new live version.
    #[must_use]
    pub fn new(key: Key, data: Bytes, created_by: TxnId, created_at: Lsn) -> Self {
        Self {
            key,
            data,
            created_by,
            created_at,
            deleted_by: None,
            deleted_at: None,
        }
    }

    /// Returns true if this version carries a tombstone.
    #[inline]
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_by.is_some()
    }

    /// Tombstones this version.
    pub fn mark_deleted(&mut self, deleted_by: TxnId, deleted_at: Lsn) {
        self.deleted_by = Some(deleted_by);
        self.deleted_at = Some(deleted_at);
    }

    /// Clears a tombstone (the deleting transaction aborted).
    pub fn clear_tombstone(&mut self) {
        self.deleted_by = None;
        self.deleted_at = None;
    }

    /// Approximate memory footprint in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        std::mem::size_of::<Self>() + self.key.len() + self.data.len()
    }
}

/// A chain of versions for one key, newest first.
#[derive(Debug, Clone, Default)]
pub struct VersionChain {
    versions: Vec<VersionedRecord>,
}

impl VersionChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of versions in the chain.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Returns true if the chain holds no versions.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Prepends a version (it becomes the newest).
    pub fn push_front(&mut self, version: VersionedRecord) {
        self.versions.insert(0, version);
    }

    /// Returns the newest version.
    #[must_use]
    pub fn newest(&self) -> Option<&VersionedRecord> {
        self.versions.first()
    }

    /// Iterates the chain newest-first.
    pub fn iter(&self) -> impl Iterator<Item = &VersionedRecord> {
        self.versions.iter()
    }

    /// Iterates the chain newest-first, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut VersionedRecord> {
        self.versions.iter_mut()
    }

    /// Keeps only versions satisfying the predicate; returns how many
    /// were dropped.
    pub fn retain(&mut self, keep: impl FnMut(&VersionedRecord) -> bool) -> usize {
        let before = self.versions.len();
        self.versions.retain(keep);
        before - self.versions.len()
    }

    /// Removes the versions at the given positions (newest-first
    /// indices); returns how many were dropped.
    pub fn remove_positions(&mut self, positions: &[usize]) -> usize {
        if positions.is_empty() {
            return 0;
        }
        let before = self.versions.len();
        let mut idx = 0;
        self.versions.retain(|_| {
            let drop = positions.contains(&idx);
            idx += 1;
            !drop
        });
        before - self.versions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(created_by: u64, created_at: u64) -> VersionedRecord {
        VersionedRecord::new(
            Key::from_bytes(b"k"),
            Bytes::from("v"),
            TxnId::new(created_by),
            Lsn::new(created_at),
        )
    }

    #[test]
    fn test_tombstone() {
        let mut v = version(1, 10);
        assert!(!v.is_deleted());

        v.mark_deleted(TxnId::new(2), Lsn::new(20));
        assert!(v.is_deleted());
        assert_eq!(v.deleted_by, Some(TxnId::new(2)));

        v.clear_tombstone();
        assert!(!v.is_deleted());
        assert_eq!(v.deleted_at, None);
    }

    #[test]
    fn test_chain_newest_first() {
        let mut chain = VersionChain::new();
        chain.push_front(version(1, 10));
        chain.push_front(version(2, 20));

        assert_eq!(chain.len(), 2);
        assert_eq!(chain.newest().unwrap().created_by, TxnId::new(2));

        let orders: Vec<_> = chain.iter().map(|v| v.created_at.as_u64()).collect();
        assert_eq!(orders, vec![20, 10]);
    }

    #[test]
    fn test_remove_positions() {
        let mut chain = VersionChain::new();
        chain.push_front(version(1, 10));
        chain.push_front(version(2, 20));
        chain.push_front(version(3, 30));

        let removed = chain.remove_positions(&[1]);
        assert_eq!(removed, 1);
        let orders: Vec<_> = chain.iter().map(|v| v.created_at.as_u64()).collect();
        assert_eq!(orders, vec![30, 10]);
    }
}
