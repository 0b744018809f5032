//! # tessera-common
//!
//! Common types, errors, and constants for the Tessera storage engine.
//!
//! This crate provides the foundational types used across all Tessera
//! components:
//!
//! - **Types**: core identifiers (`PageId`, `TxnId`, `Lsn`) and the
//!   `Key`/`Value` byte wrappers
//! - **Errors**: unified error handling with `EngineError`
//! - **Constants**: system-wide constants and limits
//!
//! ## Example
//!
//! ```rust
//! use tessera_common::types::{Key, Lsn, PageId, TxnId, Value};
//! use tessera_common::error::EngineResult;
//!
//! fn example() -> EngineResult<()> {
//!     let page_id = PageId::new(42);
//!     let txn_id = TxnId::new(1);
//!     let key = Key::from_bytes(b"hello");
//!     let value = Value::from_bytes(b"world");
//!     assert!(page_id.is_valid() && txn_id.is_valid());
//!     assert!(key < Key::from_bytes(b"world") && !value.is_empty());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use error::{EngineError, EngineResult};
pub use types::{Key, Lsn, PageId, TxnId, Value};
