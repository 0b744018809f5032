//! Engine error types.
//!
//! Covers the full public error surface: local, recoverable conditions
//! (missing keys, conflicts, backpressure) and fatal ones (corruption,
//! I/O failure).

use std::io;
use thiserror::Error;

use crate::types::{Lsn, PageId, TxnId};

/// The main error type for Tessera.
///
/// # Example
///
/// ```rust
/// use tessera_common::error::{EngineError, EngineResult};
/// use tessera_common::types::PageId;
///
/// fn read_page(page_id: PageId) -> EngineResult<Vec<u8>> {
///     Err(EngineError::PageNotFound { page_id })
/// }
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// The engine has been closed.
    #[error("engine is closed")]
    Closed,

    // ==========================================================================
    // I/O and Corruption
    // ==========================================================================
    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// Data corruption detected.
    #[error("data corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    // ==========================================================================
    // Storage Errors
    // ==========================================================================
    /// Page not found.
    #[error("page {page_id} not found")]
    PageNotFound {
        /// The missing page ID.
        page_id: PageId,
    },

    /// Key not found.
    #[error("key not found")]
    KeyNotFound,

    /// Key already exists.
    #[error("key already exists")]
    KeyExists,

    /// Key is too large.
    #[error("key size {size} exceeds maximum {max_size}")]
    KeyTooLarge {
        /// Actual key size.
        size: usize,
        /// Maximum allowed size.
        max_size: usize,
    },

    /// Value is too large.
    #[error("value size {size} exceeds maximum {max_size}")]
    ValueTooLarge {
        /// Actual value size.
        size: usize,
        /// Maximum allowed size.
        max_size: usize,
    },

    /// Writer queue is full (backpressure).
    #[error("writer queue is full")]
    QueueFull,

    // ==========================================================================
    // Transaction Errors
    // ==========================================================================
    /// Transaction is not active.
    #[error("transaction {txn_id} is not active")]
    TxnNotActive {
        /// The transaction.
        txn_id: TxnId,
    },

    /// Write-write conflict detected at commit (first committer wins).
    #[error("transaction {txn_id} conflicts with committed transaction {conflicting_txn_id}")]
    TxnConflict {
        /// The losing transaction.
        txn_id: TxnId,
        /// The transaction that committed first.
        conflicting_txn_id: TxnId,
    },

    /// Transaction was aborted.
    #[error("transaction {txn_id} aborted: {reason}")]
    TxnAborted {
        /// The aborted transaction.
        txn_id: TxnId,
        /// Reason for abort.
        reason: String,
    },

    // ==========================================================================
    // WAL Errors
    // ==========================================================================
    /// WAL is corrupted.
    #[error("WAL corrupted at LSN {lsn}: {reason}")]
    WalCorrupted {
        /// The LSN where corruption was detected.
        lsn: Lsn,
        /// Reason for corruption.
        reason: String,
    },

    /// WAL write failed.
    #[error("WAL write failed: {reason}")]
    WalWriteFailed {
        /// Reason for failure.
        reason: String,
    },
}

impl EngineError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Returns true if this error is recoverable by the caller.
    ///
    /// Recoverable errors are local to one operation or transaction; the
    /// database remains usable.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::KeyNotFound
                | Self::KeyExists
                | Self::KeyTooLarge { .. }
                | Self::ValueTooLarge { .. }
                | Self::QueueFull
                | Self::TxnNotActive { .. }
                | Self::TxnConflict { .. }
                | Self::TxnAborted { .. }
        )
    }

    /// Returns true if this error indicates data corruption.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Corruption { .. } | Self::ChecksumMismatch { .. } | Self::WalCorrupted { .. }
        )
    }

    /// Returns true if this error represents a transaction conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::TxnConflict { .. } | Self::TxnAborted { .. })
    }
}
