//! Content-addressed page repository.
//!
//! The [`ContentStore`] is the only durable writer in the engine: every
//! persistent page mutation goes through it. Pages are keyed by the
//! 64-bit hash of their canonical content, so identical pages are stored
//! once; page IDs are small stable handles mapped onto that content.
//!
//! Two layouts are supported:
//! - **In-memory**: all content lives in the map; `store` is infallible
//! - **Directory-backed**: each unique content is written to
//!   `pages/<hash:016x>.page` and an atomically-rewritten `manifest`
//!   carries the `page_id -> hash` table, the next page ID, and the
//!   tree root

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut};
use parking_lot::Mutex;

use tessera_common::constants::{MANIFEST_MAGIC, MANIFEST_VERSION};
use tessera_common::error::{EngineError, EngineResult};
use tessera_common::types::PageId;

use crate::page::{self, Page};

/// Snapshot of content store statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    /// Number of unique content blocks stored.
    pub unique_pages: usize,
    /// Number of page IDs assigned.
    pub assigned_ids: usize,
    /// Total logical page writes (store + persist calls).
    pub logical_writes: u64,
    /// Writes that were satisfied by already-resident content.
    pub dedup_hits: u64,
}

struct StoreInner {
    /// Content hash to canonical page.
    content: HashMap<u64, Arc<Page>>,
    /// Page ID to the hash of its current content.
    page_to_hash: HashMap<PageId, u64>,
    /// First page ID assigned to each resident content.
    hash_to_pid: HashMap<u64, PageId>,
    /// Next available page ID.
    next_page_id: PageId,
    /// Root page of the tree persisted in this store.
    root: PageId,
}

/// Persistent page repository keyed by content hash.
pub struct ContentStore {
    inner: Mutex<StoreInner>,
    dir: Option<PathBuf>,
    logical_writes: AtomicU64,
    dedup_hits: AtomicU64,
}

impl ContentStore {
    /// Creates a purely in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                content: HashMap::new(),
                page_to_hash: HashMap::new(),
                hash_to_pid: HashMap::new(),
                next_page_id: PageId::FIRST,
                root: PageId::INVALID,
            }),
            dir: None,
            logical_writes: AtomicU64::new(0),
            dedup_hits: AtomicU64::new(0),
        }
    }

    /// Opens a directory-backed store, loading the manifest if present.
    pub fn open(dir: impl AsRef<Path>) -> EngineResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join("pages"))?;

        let store = Self {
            inner: Mutex::new(StoreInner {
                content: HashMap::new(),
                page_to_hash: HashMap::new(),
                hash_to_pid: HashMap::new(),
                next_page_id: PageId::FIRST,
                root: PageId::INVALID,
            }),
            dir: Some(dir.clone()),
            logical_writes: AtomicU64::new(0),
            dedup_hits: AtomicU64::new(0),
        };

        let manifest_path = dir.join("manifest");
        if manifest_path.exists() {
            let bytes = fs::read(&manifest_path)?;
            store.load_manifest(&bytes)?;
        }

        Ok(store)
    }

    /// Stores a page, deduplicating identical content.
    ///
    /// If a page with the same canonical content is already resident,
    /// its existing page ID is returned; otherwise a fresh page ID is
    /// assigned.
    pub fn store(&self, page: &Page) -> EngineResult<PageId> {
        self.logical_writes.fetch_add(1, Ordering::Relaxed);
        let hash = page::content_hash(page);

        let mut inner = self.inner.lock();
        // Dedup only against a page ID that still holds this content;
        // a stale hash owner whose ID has been re-pointed at newer
        // content must not be aliased into the tree twice.
        if let Some(&pid) = inner.hash_to_pid.get(&hash) {
            if inner.page_to_hash.get(&pid) == Some(&hash) {
                self.dedup_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(hash = format_args!("{hash:016x}"), page_id = %pid,
                    "dedup hit, reusing existing page id");
                return Ok(pid);
            }
        }

        let pid = inner.next_page_id;
        if !pid.is_valid() {
            return Err(EngineError::internal("page id space exhausted"));
        }
        inner.next_page_id = pid.next();

        let mut canonical = page.clone();
        canonical.header.page_id = pid;
        let bytes = page::seal(&mut canonical);
        self.write_page_file(hash, &bytes)?;

        inner.content.insert(hash, Arc::new(canonical));
        inner.hash_to_pid.insert(hash, pid);
        inner.page_to_hash.insert(pid, hash);

        Ok(pid)
    }

    /// Re-points an existing page ID at new content.
    ///
    /// This is the write-back path: the tree keeps its page ID while the
    /// store swaps the content behind it. Content identical to something
    /// already resident is not stored again.
    pub fn persist(&self, pid: PageId, page: &Page) -> EngineResult<()> {
        self.logical_writes.fetch_add(1, Ordering::Relaxed);
        let hash = page::content_hash(page);

        let mut inner = self.inner.lock();
        if inner.content.contains_key(&hash) {
            self.dedup_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            let mut canonical = page.clone();
            canonical.header.page_id = pid;
            let bytes = page::seal(&mut canonical);
            self.write_page_file(hash, &bytes)?;

            inner.content.insert(hash, Arc::new(canonical));
            inner.hash_to_pid.entry(hash).or_insert(pid);
        }
        inner.page_to_hash.insert(pid, hash);

        // A persist can arrive for an id the store has not handed out
        // (recovery re-applies pages by id); keep the allocator ahead.
        if pid.as_u16() >= inner.next_page_id.as_u16() {
            inner.next_page_id = pid.next();
        }

        Ok(())
    }

    /// Retrieves a page by its page ID.
    ///
    /// Returns `Ok(None)` for an unknown page ID. A known ID whose
    /// content cannot be loaded or fails its checksum is a corruption
    /// error.
    pub fn get(&self, pid: PageId) -> EngineResult<Option<Arc<Page>>> {
        let mut inner = self.inner.lock();
        let Some(&hash) = inner.page_to_hash.get(&pid) else {
            return Ok(None);
        };

        if let Some(page) = inner.content.get(&hash) {
            return Ok(Some(Self::with_id(page, pid)));
        }

        // Directory-backed stores load content lazily.
        let Some(ref dir) = self.dir else {
            return Err(EngineError::corruption(format!(
                "content {hash:016x} for page {pid} missing from in-memory store"
            )));
        };
        let path = Self::page_path(dir, hash);
        let bytes = fs::read(&path).map_err(|e| {
            EngineError::corruption(format!(
                "content {hash:016x} for page {pid} unreadable: {e}"
            ))
        })?;
        let page = Arc::new(page::decode(&bytes)?);
        inner.content.insert(hash, Arc::clone(&page));
        Ok(Some(Self::with_id(&page, pid)))
    }

    /// Returns true if a page with identical content is already stored.
    #[must_use]
    pub fn has_content(&self, page: &Page) -> bool {
        let hash = page::content_hash(page);
        self.inner.lock().content.contains_key(&hash)
    }

    /// Returns true if the page ID has been assigned.
    #[must_use]
    pub fn contains(&self, pid: PageId) -> bool {
        self.inner.lock().page_to_hash.contains_key(&pid)
    }

    /// Returns the number of unique content blocks stored.
    #[must_use]
    pub fn unique_pages(&self) -> usize {
        self.inner.lock().content.len()
    }

    /// Returns the tree root recorded in this store.
    #[must_use]
    pub fn root(&self) -> PageId {
        self.inner.lock().root
    }

    /// Records the tree root (persisted with the manifest).
    pub fn set_root(&self, root: PageId) {
        self.inner.lock().root = root;
    }

    /// Returns a snapshot of store statistics.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        StoreStats {
            unique_pages: inner.content.len(),
            assigned_ids: inner.page_to_hash.len(),
            logical_writes: self.logical_writes.load(Ordering::Relaxed),
            dedup_hits: self.dedup_hits.load(Ordering::Relaxed),
        }
    }

    /// Persists the manifest (page table, allocator state, root).
    ///
    /// No-op for in-memory stores. The manifest is rewritten through a
    /// temp file and renamed into place.
    pub fn save_manifest(&self) -> EngineResult<()> {
        let Some(ref dir) = self.dir else {
            return Ok(());
        };

        let inner = self.inner.lock();
        let mut buf = Vec::with_capacity(16 + inner.page_to_hash.len() * 10);
        buf.put_u32(MANIFEST_MAGIC);
        buf.put_u32(MANIFEST_VERSION);
        buf.put_u16(inner.next_page_id.as_u16());
        buf.put_u16(inner.root.as_u16());
        buf.put_u32(inner.page_to_hash.len() as u32);

        let mut entries: Vec<_> = inner.page_to_hash.iter().collect();
        entries.sort_by_key(|(pid, _)| **pid);
        for (pid, hash) in entries {
            buf.put_u16(pid.as_u16());
            buf.put_u64(*hash);
        }
        drop(inner);

        let checksum = crc32fast::hash(&buf);
        buf.put_u32(checksum);

        let tmp = dir.join("manifest.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        fs::rename(&tmp, dir.join("manifest"))?;
        Ok(())
    }

    fn load_manifest(&self, bytes: &[u8]) -> EngineResult<()> {
        if bytes.len() < 20 {
            return Err(EngineError::corruption("manifest truncated"));
        }
        let (body, tail) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_be_bytes(tail.try_into().expect("4 byte tail"));
        let actual = crc32fast::hash(body);
        if stored != actual {
            return Err(EngineError::ChecksumMismatch {
                expected: stored,
                actual,
            });
        }

        let mut buf = body;
        let magic = buf.get_u32();
        if magic != MANIFEST_MAGIC {
            return Err(EngineError::corruption(format!(
                "bad manifest magic: {magic:#010x}"
            )));
        }
        let version = buf.get_u32();
        if version != MANIFEST_VERSION {
            return Err(EngineError::corruption(format!(
                "unsupported manifest version {version}"
            )));
        }

        let mut inner = self.inner.lock();
        inner.next_page_id = PageId::new(buf.get_u16());
        inner.root = PageId::new(buf.get_u16());

        let count = buf.get_u32() as usize;
        if buf.remaining() < count * 10 {
            return Err(EngineError::corruption("manifest entry table truncated"));
        }
        for _ in 0..count {
            let pid = PageId::new(buf.get_u16());
            let hash = buf.get_u64();
            inner.page_to_hash.insert(pid, hash);
            // The smallest id wins as the canonical owner of the content.
            inner
                .hash_to_pid
                .entry(hash)
                .and_modify(|existing| {
                    if pid < *existing {
                        *existing = pid;
                    }
                })
                .or_insert(pid);
        }

        tracing::debug!(pages = count, root = %inner.root, "loaded content store manifest");
        Ok(())
    }

    fn write_page_file(&self, hash: u64, bytes: &[u8]) -> EngineResult<()> {
        let Some(ref dir) = self.dir else {
            return Ok(());
        };
        let path = Self::page_path(dir, hash);
        if path.exists() {
            // Content-addressed: an existing file already holds the bytes.
            return Ok(());
        }
        let mut file = fs::File::create(&path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    }

    fn page_path(dir: &Path, hash: u64) -> PathBuf {
        dir.join("pages").join(format!("{hash:016x}.page"))
    }

    /// Returns the page with its header's id corrected to `pid`.
    ///
    /// Deduplicated content is shared by several ids; the canonical copy
    /// carries the id of its first owner.
    fn with_id(page: &Arc<Page>, pid: PageId) -> Arc<Page> {
        if page.header.page_id == pid {
            Arc::clone(page)
        } else {
            let mut copy = Page::clone(page);
            copy.header.page_id = pid;
            Arc::new(copy)
        }
    }
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("ContentStore")
            .field("dir", &self.dir)
            .field("unique_pages", &stats.unique_pages)
            .field("assigned_ids", &stats.assigned_ids)
            .field("dedup_hits", &stats.dedup_hits)
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

    #[test]
    fn test_store_and_get() {
        let store = ContentStore::in_memory();
        let page = leaf_with(&[("a", "1")]);

        let pid = store.store(&page).unwrap();
        assert!(pid.is_valid());

        let loaded = store.get(pid).unwrap().unwrap();
        assert_eq!(loaded.header.page_id, pid);
        assert_eq!(
            loaded.leaf_find(&Key::from_bytes(b"a")),
            Some(b"1".as_ref())
        );

        assert!(store.get(PageId::new(999)).unwrap().is_none());
    }

    #[test]
    fn test_dedup_returns_same_id() {
        let store = ContentStore::in_memory();
        let page = leaf_with(&[("a", "1")]);

        let pid1 = store.store(&page).unwrap();
        let pid2 = store.store(&page.clone()).unwrap();

        assert_eq!(pid1, pid2);
        assert_eq!(store.unique_pages(), 1);
        assert_eq!(store.stats().dedup_hits, 1);
    }

    #[test]
    fn test_distinct_content_distinct_ids() {
        let store = ContentStore::in_memory();
        let pid1 = store.store(&leaf_with(&[("a", "1")])).unwrap();
        let pid2 = store.store(&leaf_with(&[("b", "2")])).unwrap();

        assert_ne!(pid1, pid2);
        assert_eq!(store.unique_pages(), 2);
    }

    #[test]
    fn test_persist_repoints_id() {
        let store = ContentStore::in_memory();
        let pid = store.store(&leaf_with(&[("a", "1")])).unwrap();

        store.persist(pid, &leaf_with(&[("a", "2")])).unwrap();

        let loaded = store.get(pid).unwrap().unwrap();
        assert_eq!(
            loaded.leaf_find(&Key::from_bytes(b"a")),
            Some(b"2".as_ref())
        );
    }

    #[test]
    fn test_persist_dedups_against_resident_content() {
        let store = ContentStore::in_memory();
        let page = leaf_with(&[("a", "1")]);
        let pid1 = store.store(&page).unwrap();
        let pid2 = store.store(&leaf_with(&[("b", "2")])).unwrap();

        // Rewrite pid2 with pid1's exact content
        store.persist(pid2, &page).unwrap();

        assert_eq!(store.unique_pages(), 2);
        assert!(store.stats().dedup_hits >= 1);
        let loaded = store.get(pid2).unwrap().unwrap();
        assert_eq!(loaded.header.page_id, pid2);
        assert_eq!(
            loaded.leaf_find(&Key::from_bytes(b"a")),
            Some(b"1".as_ref())
        );
    }

    #[test]
    fn test_has_content() {
        let store = ContentStore::in_memory();
        let page = leaf_with(&[("a", "1")]);

        assert!(!store.has_content(&page));
        store.store(&page).unwrap();
        assert!(store.has_content(&page));
    }

    #[test]
    fn test_directory_persistence() {
        let tmp = tempfile::TempDir::new().unwrap();

        let pid;
        {
            let store = ContentStore::open(tmp.path()).unwrap();
            pid = store.store(&leaf_with(&[("k", "v")])).unwrap();
            store.set_root(pid);
            store.save_manifest().unwrap();
        }

        let store = ContentStore::open(tmp.path()).unwrap();
        assert_eq!(store.root(), pid);
        let loaded = store.get(pid).unwrap().unwrap();
        assert_eq!(
            loaded.leaf_find(&Key::from_bytes(b"k")),
            Some(b"v".as_ref())
        );
    }

    #[test]
    fn test_reopened_store_does_not_reuse_ids() {
        let tmp = tempfile::TempDir::new().unwrap();

        let pid1;
        {
            let store = ContentStore::open(tmp.path()).unwrap();
            pid1 = store.store(&leaf_with(&[("a", "1")])).unwrap();
            store.save_manifest().unwrap();
        }

        let store = ContentStore::open(tmp.path()).unwrap();
        let pid2 = store.store(&leaf_with(&[("b", "2")])).unwrap();
        assert!(pid2 > pid1);
    }

    #[test]
    fn test_corrupt_manifest_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        {
            let store = ContentStore::open(tmp.path()).unwrap();
            store.store(&leaf_with(&[("a", "1")])).unwrap();
            store.save_manifest().unwrap();
        }

        let manifest = tmp.path().join("manifest");
        let mut bytes = fs::read(&manifest).unwrap();
        bytes[12] ^= 0xFF;
        fs::write(&manifest, bytes).unwrap();

        assert!(ContentStore::open(tmp.path()).is_err());
    }
}
