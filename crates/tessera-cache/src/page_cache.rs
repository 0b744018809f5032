//! Bounded LRU page cache with dirty tracking.
//!
//! The cache sits between the B+Tree and the [`ContentStore`]: reads
//! fill the cache through the store, writes land in the cache as dirty
//! copies and reach the store via the writer queue (or directly on
//! flush/eviction).
//!
//! Cached pages are immutable once inserted; mutation is replacement.
//! Callers clone a page, modify the clone, and `put` it back, which
//! marks the entry dirty.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use tessera_common::error::EngineResult;
use tessera_common::types::PageId;
use tessera_storage::{ContentStore, Page};

use crate::stats::CacheStats;

/// A cache entry: the page plus bookkeeping.
struct CachedPage {
    page: Arc<Page>,
    dirty: bool,
    last_accessed: u64,
}

struct CacheInner {
    map: HashMap<PageId, CachedPage>,
    /// Logical access clock for LRU ordering.
    clock: u64,
}

impl CacheInner {
    fn touch(&mut self, pid: PageId) {
        self.clock += 1;
        let clock = self.clock;
        if let Some(entry) = self.map.get_mut(&pid) {
            entry.last_accessed = clock;
        }
    }
}

/// Fixed-capacity LRU cache of loaded pages.
///
/// All operations are linearizable under a single lock guarding the map
/// and the access clock.
pub struct PageCache {
    store: Arc<ContentStore>,
    capacity: usize,
    inner: Mutex<CacheInner>,
    stats: CacheStats,
}

impl PageCache {
    /// Creates a cache holding at most `capacity` pages.
    #[must_use]
    pub fn new(store: Arc<ContentStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                map: HashMap::with_capacity(capacity.max(1)),
                clock: 0,
            }),
            stats: CacheStats::new(),
        }
    }

    /// Returns the configured capacity in pages.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of cached pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    /// Fetches a page, filling the cache from the content store on miss.
    ///
    /// Returns `Ok(None)` if the page ID is unknown to the store.
    pub fn get(&self, pid: PageId) -> EngineResult<Option<Arc<Page>>> {
        self.stats.record_access();

        {
            let mut inner = self.inner.lock();
            if let Some(entry) = inner.map.get(&pid) {
                let page = Arc::clone(&entry.page);
                inner.touch(pid);
                self.stats.record_hit();
                return Ok(Some(page));
            }
        }

        // Miss: load outside the lock, then insert clean.
        self.stats.record_miss();
        let Some(page) = self.store.get(pid)? else {
            return Ok(None);
        };

        let mut inner = self.inner.lock();
        // Another thread may have filled the entry while we were loading;
        // its copy may already be dirty, so keep it.
        if !inner.map.contains_key(&pid) {
            inner.clock += 1;
            let clock = inner.clock;
            inner.map.insert(
                pid,
                CachedPage {
                    page: Arc::clone(&page),
                    dirty: false,
                    last_accessed: clock,
                },
            );
            self.evict_if_needed(&mut inner)?;
        }
        let page = Arc::clone(&inner.map[&pid].page);
        Ok(Some(page))
    }

    /// Inserts or replaces a page, marking it dirty.
    pub fn put(&self, pid: PageId, page: Arc<Page>) -> EngineResult<()> {
        self.stats.record_insert();
        let mut inner = self.inner.lock();
        inner.clock += 1;
        let clock = inner.clock;
        inner.map.insert(
            pid,
            CachedPage {
                page,
                dirty: true,
                last_accessed: clock,
            },
        );
        self.evict_if_needed(&mut inner)
    }

    /// Marks a cached page dirty. Returns false if it is not resident.
    pub fn mark_dirty(&self, pid: PageId) -> bool {
        let mut inner = self.inner.lock();
        match inner.map.get_mut(&pid) {
            Some(entry) => {
                entry.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Clears the dirty flag on a cached page.
    ///
    /// Called by the writer queue after the page reaches the store.
    pub fn clear_dirty(&self, pid: PageId) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.map.get_mut(&pid) {
            entry.dirty = false;
        }
    }

    /// Returns true if the page is resident and dirty.
    #[must_use]
    pub fn is_dirty(&self, pid: PageId) -> bool {
        self.inner.lock().map.get(&pid).is_some_and(|e| e.dirty)
    }

    /// Returns all dirty pages.
    #[must_use]
    pub fn dirty_pages(&self) -> Vec<(PageId, Arc<Page>)> {
        let inner = self.inner.lock();
        inner
            .map
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(pid, entry)| (*pid, Arc::clone(&entry.page)))
            .collect()
    }

    /// Returns the number of dirty pages.
    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.inner.lock().map.values().filter(|e| e.dirty).count()
    }

    /// Writes every dirty page through to the content store and clears
    /// the flags. Returns the number of pages written.
    pub fn flush_all(&self) -> EngineResult<usize> {
        let dirty = self.dirty_pages();
        let flushed = dirty.len();
        for (pid, page) in dirty {
            self.store.persist(pid, &page)?;
            self.clear_dirty(pid);
        }
        Ok(flushed)
    }

    /// Drops a page from the cache without write-back.
    ///
    /// Used when physical removal has already persisted elsewhere.
    pub fn remove(&self, pid: PageId) {
        self.inner.lock().map.remove(&pid);
    }

    /// Returns cache statistics.
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Evicts least-recently-used entries until within capacity.
    ///
    /// A dirty victim is written back to the content store before
    /// removal.
    fn evict_if_needed(&self, inner: &mut CacheInner) -> EngineResult<()> {
        while inner.map.len() > self.capacity {
            let victim = inner
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(pid, _)| *pid);
            let Some(pid) = victim else { break };

            let entry = inner.map.remove(&pid).expect("victim is resident");
            if entry.dirty {
                self.stats.record_eviction_writeback();
                self.store.persist(pid, &entry.page)?;
            }
            self.stats.record_eviction();
            tracing::debug!(page_id = %pid, dirty = entry.dirty, "evicted page");
        }
        Ok(())
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("dirty", &self.dirty_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::types::Key;

    fn leaf_with(entries: &[(&str, &str)]) -> Page {
        let mut page = Page::new_leaf();
        for (k, v) in entries {
            page.leaf_insert(&Key::from_bytes(k.as_bytes()), v.as_bytes())
                .unwrap();
        }
        page
    }

    fn setup(capacity: usize) -> (Arc<ContentStore>, PageCache) {
        let store = Arc::new(ContentStore::in_memory());
        let cache = PageCache::new(Arc::clone(&store), capacity);
        (store, cache)
    }

    #[test]
    fn test_miss_fills_from_store() {
        let (store, cache) = setup(4);
        let pid = store.store(&leaf_with(&[("a", "1")])).unwrap();

        let page = cache.get(pid).unwrap().unwrap();
        assert_eq!(
            page.leaf_find(&Key::from_bytes(b"a")),
            Some(b"1".as_ref())
        );
        assert_eq!(cache.stats().misses(), 1);

        // Second access is a hit
        cache.get(pid).unwrap().unwrap();
        assert_eq!(cache.stats().hits(), 1);
    }

    #[test]
    fn test_unknown_page_is_none() {
        let (_store, cache) = setup(4);
        assert!(cache.get(PageId::new(42)).unwrap().is_none());
    }

    #[test]
    fn test_put_marks_dirty() {
        let (_store, cache) = setup(4);
        let pid = PageId::new(1);
        cache.put(pid, Arc::new(leaf_with(&[("a", "1")]))).unwrap();

        assert!(cache.is_dirty(pid));
        assert_eq!(cache.dirty_pages().len(), 1);

        cache.clear_dirty(pid);
        assert!(!cache.is_dirty(pid));
    }

    #[test]
    fn test_lru_eviction() {
        let (store, cache) = setup(2);
        let pid1 = store.store(&leaf_with(&[("a", "1")])).unwrap();
        let pid2 = store.store(&leaf_with(&[("b", "2")])).unwrap();
        let pid3 = store.store(&leaf_with(&[("c", "3")])).unwrap();

        cache.get(pid1).unwrap();
        cache.get(pid2).unwrap();
        // Touch pid1 so pid2 is the LRU victim
        cache.get(pid1).unwrap();
        cache.get(pid3).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_eviction_writes_back_dirty_page() {
        let (store, cache) = setup(1);
        let pid = store.store(&leaf_with(&[("a", "1")])).unwrap();

        // Replace with a dirty modified copy
        cache.put(pid, Arc::new(leaf_with(&[("a", "2")]))).unwrap();

        // Force eviction by inserting another page
        cache
            .put(PageId::new(50), Arc::new(leaf_with(&[("z", "9")])))
            .unwrap();

        assert_eq!(cache.stats().eviction_writebacks(), 1);
        let persisted = store.get(pid).unwrap().unwrap();
        assert_eq!(
            persisted.leaf_find(&Key::from_bytes(b"a")),
            Some(b"2".as_ref())
        );
    }

    #[test]
    fn test_flush_all() {
        let (store, cache) = setup(8);
        let pid1 = PageId::new(1);
        let pid2 = PageId::new(2);
        cache.put(pid1, Arc::new(leaf_with(&[("a", "1")]))).unwrap();
        cache.put(pid2, Arc::new(leaf_with(&[("b", "2")]))).unwrap();

        let flushed = cache.flush_all().unwrap();
        assert_eq!(flushed, 2);
        assert_eq!(cache.dirty_count(), 0);
        assert!(store.get(pid1).unwrap().is_some());
        assert!(store.get(pid2).unwrap().is_some());
    }
}
