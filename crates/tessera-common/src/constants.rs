//! System-wide constants for Tessera.
//!
//! These values are shared by the page format, cache, WAL, and engine
//! configuration defaults.

// =============================================================================
// Page Constants
// =============================================================================

/// Logical page size in bytes (4 KB).
///
/// The canonical encoding of a page must fit within this size.
pub const PAGE_SIZE: usize = 4 * 1024;

/// Size of the encoded page header in bytes.
///
/// Contains: page_type (1), reserved (1), page_id (2), slot_count (2),
/// free_space_offset (2), free_space_size (2), flags (2), checksum (4),
/// content_hash (8) = 24 bytes, rounded up to 32 for alignment.
pub const PAGE_HEADER_SIZE: usize = 32;

/// Size of each encoded slot directory entry in bytes.
///
/// Contains: id (2), offset (2), length (2), tombstone (1), reserved (1).
pub const SLOT_ENTRY_SIZE: usize = 8;

/// Magic bytes for page file validation.
pub const PAGE_MAGIC: u16 = 0x5453; // "TS"

// =============================================================================
// Key and Value Limits
// =============================================================================

/// Maximum key size in bytes.
///
/// This is the limit the engine enforces on insert. It is bounded well
/// below the page size so that a worst-case (key, value) entry always
/// fits an empty leaf and splits stay possible.
pub const MAX_KEY_SIZE: usize = 512;

/// Maximum value size in bytes (half a page).
///
/// This is the limit the engine enforces on insert; a larger payload
/// would make a page's canonical encoding exceed [`PAGE_SIZE`] with
/// even a single occupant.
pub const MAX_VALUE_SIZE: usize = PAGE_SIZE / 2;

// =============================================================================
// WAL Constants
// =============================================================================

/// WAL record header size.
///
/// Contains: type (1), flags (1), reserved (2), record_size (4),
/// txn_id (8), lsn (8), checksum (4), ts (8) = 36 bytes, rounded to 40.
pub const WAL_RECORD_HEADER_SIZE: usize = 40;

/// Maximum size of a single WAL record (header + payload).
pub const MAX_WAL_RECORD_SIZE: usize = 4 * 1024 * 1024;

/// Magic number for the manifest file header.
pub const MANIFEST_MAGIC: u32 = 0x5453_4D46; // "TSMF"

/// Manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

// =============================================================================
// Engine Defaults
// =============================================================================

/// Default maximum number of keys per B+Tree node.
pub const DEFAULT_FANOUT: usize = 64;

/// Smallest permitted fanout.
pub const MIN_FANOUT: usize = 3;

/// Largest permitted fanout.
pub const MAX_FANOUT: usize = 1024;

/// Default page cache capacity, in pages.
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Default number of write-back worker threads.
pub const DEFAULT_WRITER_THREADS: usize = 2;

/// Default WAL write buffer size in bytes.
pub const DEFAULT_WAL_BUFFER_BYTES: usize = 8 * 1024;

/// Default checkpoint interval in milliseconds.
pub const DEFAULT_CHECKPOINT_INTERVAL_MS: u64 = 60_000;

/// Default WAL size, in bytes, above which a checkpoint is triggered.
pub const DEFAULT_WAL_SIZE_THRESHOLD: u64 = 1024 * 1024;

/// Default number of versions retained per key before GC trims the chain.
pub const DEFAULT_MAX_VERSIONS_PER_KEY: usize = 64;

/// Default MVCC retention window, in LSN units.
///
/// Committed versions younger than this many log positions are kept even
/// when superseded, matching the original engine's one-hour wall-clock
/// retention at its nominal write rate.
pub const DEFAULT_RETENTION_LSNS: u64 = 3600;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_constants() {
        assert!(PAGE_SIZE.is_power_of_two());
        assert!(PAGE_HEADER_SIZE < PAGE_SIZE);
        assert!(MAX_VALUE_SIZE < PAGE_SIZE);
        // A worst-case entry must fit an empty leaf
        assert!(MAX_KEY_SIZE + MAX_VALUE_SIZE < PAGE_SIZE - PAGE_HEADER_SIZE);
    }

    #[test]
    fn test_fanout_bounds() {
        assert!(MIN_FANOUT <= DEFAULT_FANOUT);
        assert!(DEFAULT_FANOUT <= MAX_FANOUT);
    }

    #[test]
    fn test_wal_constants() {
        assert_eq!(WAL_RECORD_HEADER_SIZE, 40);
        assert!(MAX_WAL_RECORD_SIZE > MAX_VALUE_SIZE);
    }
}
