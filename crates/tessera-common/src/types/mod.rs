//! Core types for Tessera.

mod ids;
mod keys;

pub use ids::{Lsn, PageId, TxnId};
pub use keys::{Key, Value};
