//! Cache statistics for monitoring and debugging.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for page cache operations.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Total number of cache accesses.
    accesses: AtomicU64,
    /// Number of cache hits.
    hits: AtomicU64,
    /// Number of cache misses.
    misses: AtomicU64,
    /// Number of cache insertions.
    inserts: AtomicU64,
    /// Number of cache evictions.
    evictions: AtomicU64,
    /// Number of dirty pages written back on eviction.
    eviction_writebacks: AtomicU64,
}

impl CacheStats {
    /// Creates new statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an access.
    #[inline]
    pub fn record_access(&self) {
        self.accesses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a cache hit.
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a cache miss.
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an insertion.
    #[inline]
    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an eviction.
    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a dirty-page write-back triggered by eviction.
    #[inline]
    pub fn record_eviction_writeback(&self) {
        self.eviction_writebacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns total accesses.
    #[must_use]
    pub fn accesses(&self) -> u64 {
        self.accesses.load(Ordering::Relaxed)
    }

    /// Returns cache hits.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns cache misses.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns insertions.
    #[must_use]
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Returns evictions.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Returns dirty-page write-backs on eviction.
    #[must_use]
    pub fn eviction_writebacks(&self) -> u64 {
        self.eviction_writebacks.load(Ordering::Relaxed)
    }

    /// Returns the hit ratio (0.0 to 1.0).
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let accesses = self.accesses();
        if accesses == 0 {
            0.0
        } else {
            self.hits() as f64 / accesses as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = CacheStats::new();
        stats.record_access();
        stats.record_hit();
        stats.record_access();
        stats.record_miss();
        stats.record_insert();
        stats.record_eviction();

        assert_eq!(stats.accesses(), 2);
        assert_eq!(stats.hits(), 1);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.inserts(), 1);
        assert_eq!(stats.evictions(), 1);
    }

    #[test]
    fn test_hit_ratio() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_ratio(), 0.0);

        stats.record_access();
        stats.record_hit();
        stats.record_access();
        stats.record_miss();

        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }
}
