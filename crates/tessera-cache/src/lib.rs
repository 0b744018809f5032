//! # tessera-cache
//!
//! Page caching and asynchronous write-back for Tessera.
//!
//! This crate sits between the B+Tree and the content store:
//!
//! - [`PageCache`]: a bounded LRU cache of loaded pages with dirty
//!   tracking; dirty pages are written through on eviction
//! - [`WriterQueue`]: a bounded multi-producer write-back queue whose
//!   worker threads batch dirty pages into the content store off the
//!   request path
//! - [`CacheStats`]: hit/miss/eviction counters

#![warn(missing_docs)]
#![warn(clippy::all)]

mod page_cache;
mod stats;
mod writeback;

pub use page_cache::PageCache;
pub use stats::CacheStats;
pub use writeback::{WriterQueue, WriterQueueConfig};
