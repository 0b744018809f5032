//! # tessera-wal
//!
//! Write-ahead logging for Tessera.
//!
//! This crate implements a single-file, append-only binary log:
//! - Record-level operations (insert/update/delete) with UNDO and REDO
//!   payloads, plus transaction control records (begin/commit/abort) and
//!   checkpoints
//! - CRC32 checksums on every record; a corrupt or torn record
//!   terminates a scan at that point
//! - Buffered appends with a mandatory fsync before a commit is
//!   acknowledged
//! - Checkpointing, prefix truncation, and forward replay driven by
//!   redo handlers

#![warn(missing_docs)]
#![warn(clippy::all)]

/// WAL configuration
pub mod config;

/// WAL error types
pub mod error;

/// The log manager
pub mod log;

/// Log record types and binary codec
pub mod record;

/// Forward replay with redo handlers
pub mod replay;

pub use config::WalConfig;
pub use error::{WalError, WalResult};
pub use log::Wal;
pub use record::{DataPayload, RecordHeader, RecordType, WalPayload, WalRecord};
pub use replay::{RedoHandler, ReplaySummary};
