//! # tessera-storage
//!
//! Page format and content-addressed page store for Tessera.
//!
//! This crate implements:
//! - The on-disk page format: a self-describing header plus either a
//!   sorted key / child-pointer layout (internal nodes) or a slot
//!   directory over a byte arena (leaf nodes)
//! - Canonical binary encoding with CRC32 checksums and a 64-bit
//!   content hash
//! - The [`ContentStore`]: a page repository keyed by content hash that
//!   deduplicates identical pages and assigns stable page IDs

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Page layout and canonical encoding
pub mod page;

/// Content-addressed page repository
pub mod store;

pub use page::{Page, PageFlags, PageHeader, PageType, SlotEntry};
pub use store::{ContentStore, StoreStats};
