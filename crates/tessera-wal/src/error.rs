//! WAL error types.

use std::io;
use thiserror::Error;

use tessera_common::error::EngineError;
use tessera_common::types::Lsn;

/// Result type for WAL operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// I/O error during WAL operations.
    #[error("WAL I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// WAL record checksum mismatch.
    #[error("WAL record checksum mismatch at LSN {lsn}: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// LSN of the bad record.
        lsn: Lsn,
        /// Checksum stored in the record.
        expected: u32,
        /// Checksum computed over the record.
        computed: u32,
    },

    /// WAL content is corrupted.
    #[error("WAL corrupted at LSN {lsn}: {reason}")]
    Corrupted {
        /// LSN where corruption was detected.
        lsn: Lsn,
        /// Description of the corruption.
        reason: String,
    },

    /// WAL record too large.
    #[error("WAL record too large: {size} bytes exceeds maximum {max} bytes")]
    RecordTooLarge {
        /// Actual record size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Unknown record type byte.
    #[error("unknown WAL record type: {value}")]
    UnknownRecordType {
        /// The unrecognized type byte.
        value: u8,
    },

    /// Record payload does not match its type.
    #[error("malformed WAL record at LSN {lsn}: {reason}")]
    MalformedRecord {
        /// LSN of the bad record.
        lsn: Lsn,
        /// Description of the mismatch.
        reason: String,
    },

    /// The WAL has been closed.
    #[error("WAL is closed")]
    Closed,

    /// Configuration error.
    #[error("WAL configuration error: {reason}")]
    ConfigError {
        /// Description of the problem.
        reason: String,
    },
}

impl WalError {
    /// Creates a corruption error.
    pub fn corrupted(lsn: Lsn, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            lsn,
            reason: reason.into(),
        }
    }

    /// Creates a malformed-record error.
    pub fn malformed(lsn: Lsn, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            lsn,
            reason: reason.into(),
        }
    }

    /// Creates a config error.
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::ConfigError {
            reason: reason.into(),
        }
    }

    /// Returns true if this is a corruption error.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::Corrupted { .. }
                | Self::UnknownRecordType { .. }
                | Self::MalformedRecord { .. }
        )
    }
}

impl From<WalError> for EngineError {
    fn from(err: WalError) -> Self {
        match err {
            WalError::Io { source } => EngineError::Io { source },
            WalError::ChecksumMismatch { lsn, expected, computed } => EngineError::WalCorrupted {
                lsn,
                reason: format!(
                    "checksum mismatch: expected {expected:#010x}, computed {computed:#010x}"
                ),
            },
            WalError::Corrupted { lsn, reason } => EngineError::WalCorrupted { lsn, reason },
            WalError::UnknownRecordType { value } => EngineError::WalCorrupted {
                lsn: Lsn::INVALID,
                reason: format!("unknown record type {value}"),
            },
            WalError::MalformedRecord { lsn, reason } => EngineError::WalCorrupted { lsn, reason },
            WalError::Closed => EngineError::Closed,
            other => EngineError::WalWriteFailed {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corruption_classification() {
        assert!(WalError::corrupted(Lsn::new(5), "bad").is_corruption());
        assert!(WalError::UnknownRecordType { value: 99 }.is_corruption());
        assert!(!WalError::Closed.is_corruption());
    }

    #[test]
    fn test_conversion_to_engine_error() {
        let err: EngineError = WalError::corrupted(Lsn::new(7), "torn record").into();
        assert!(err.is_corruption());

        let err: EngineError = WalError::Closed.into();
        assert!(matches!(err, EngineError::Closed));
    }
}
