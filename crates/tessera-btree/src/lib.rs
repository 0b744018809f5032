//! # tessera-btree
//!
//! The Tessera storage engine: an embedded, transactional, indexed
//! key-value store built around a disk-resident B+Tree with
//! content-addressed pages.
//!
//! [`BPlusTree`] is the root of the public API. It ties together:
//! - the page format and deduplicating content store (`tessera-storage`)
//! - the page cache and asynchronous write-back queue (`tessera-cache`)
//! - the write-ahead log with checkpointing and replay (`tessera-wal`)
//! - snapshot-isolation MVCC with garbage collection (`tessera-mvcc`)
//!
//! ## Example
//!
//! ```no_run
//! use tessera_btree::{BPlusTree, TreeOptions};
//! use tessera_common::types::Key;
//!
//! # fn main() -> tessera_common::error::EngineResult<()> {
//! let tree = BPlusTree::open("/tmp/db", TreeOptions::default())?;
//!
//! let txn = tree.begin_txn()?;
//! tree.insert(txn, &Key::from_bytes(b"hello"), b"world")?;
//! tree.commit_txn(txn)?;
//!
//! let txn = tree.begin_txn()?;
//! assert!(tree.search(txn, &Key::from_bytes(b"hello"))?.is_some());
//! tree.abort_txn(txn)?;
//!
//! tree.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Checkpoint policy and statistics
pub mod checkpoint;

/// Tree node algorithms (split, borrow, merge)
mod node;

/// Engine configuration
pub mod options;

/// Recovery redo handler
mod recovery;

/// Minimal periodic-job scheduler
pub mod scheduler;

/// The engine
pub mod tree;

pub use checkpoint::{CheckpointCoordinator, CheckpointStats};
pub use options::TreeOptions;
pub use scheduler::Scheduler;
pub use tree::{BPlusTree, EngineStats, TreeCheck};
