//! # tessera-mvcc
//!
//! Multi-version concurrency control for Tessera.
//!
//! This crate implements snapshot isolation over per-key version
//! chains:
//! - Each write prepends a new [`VersionedRecord`] to its key's chain
//! - Deletes are tombstones on the visible version
//! - A transaction reads the consistent snapshot at its start LSN;
//!   writes from concurrent transactions stay invisible until they
//!   commit and the reader re-snapshots
//! - Write-write conflicts resolve first-committer-wins at commit
//! - Garbage collection trims obsolete and aborted versions, reporting
//!   keys whose chains died so the tree can physically unlink them
//!
//! Logical time is the WAL's LSN; there is no wall clock anywhere in
//! the visibility rules.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Garbage collection of obsolete versions
pub mod gc;

/// The version store
pub mod store;

/// Transaction state
pub mod transaction;

/// Version records and chains
pub mod version;

pub use gc::{GcConfig, GcOutcome, GcStats};
pub use store::{VersionStats, VersionStore};
pub use transaction::{Transaction, TxnState};
pub use version::{VersionChain, VersionedRecord};
