//! Asynchronous write-back queue.
//!
//! Dirty pages are enqueued by the tree and drained by worker threads
//! that batch them into the content store, clearing the cache's dirty
//! flags as they go. The queue is bounded: a full queue is backpressure
//! the caller must handle (block, retry, or surface `QueueFull`).
//!
//! Guarantees:
//! - Every successfully enqueued write is eventually persisted or
//!   counted as a failure against the health signal
//! - Writes to the same page ID are applied in enqueue order (the queue
//!   holds at most one pending entry per page, newest content wins, and
//!   a page is never processed by two workers at once)
//! - No ordering across distinct page IDs; cross-page atomicity is the
//!   WAL's job

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use tessera_common::types::PageId;
use tessera_storage::{ContentStore, Page};

use crate::page_cache::PageCache;

/// Configuration for the write-back queue.
#[derive(Debug, Clone)]
pub struct WriterQueueConfig {
    /// Maximum queued requests before `enqueue` reports backpressure.
    pub capacity: usize,
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum items a worker drains per batch.
    pub batch_size: usize,
    /// How long an idle worker sleeps before rechecking the queue; also
    /// bounds how long shutdown takes to be observed.
    pub batch_timeout: Duration,
    /// Store retries per item before counting a failure.
    pub max_retries: usize,
}

impl Default for WriterQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            workers: 2,
            batch_size: 32,
            batch_timeout: Duration::from_millis(20),
            max_retries: 3,
        }
    }
}

impl WriterQueueConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("writer queue capacity must be positive".to_string());
        }
        if self.workers == 0 {
            return Err("writer queue needs at least one worker".to_string());
        }
        if self.batch_size == 0 {
            return Err("writer batch size must be positive".to_string());
        }
        Ok(())
    }
}

/// A pending write-back request.
struct WriteRequest {
    pid: PageId,
    page: Arc<Page>,
    enqueued_at: Instant,
}

struct QueueState {
    queue: VecDeque<WriteRequest>,
    /// Pages currently being persisted by a worker.
    in_flight: HashSet<PageId>,
    running: bool,
}

/// Bounded multi-producer write-back queue with worker threads.
pub struct WriterQueue {
    store: Arc<ContentStore>,
    cache: Arc<PageCache>,
    config: WriterQueueConfig,
    state: Mutex<QueueState>,
    /// Signalled when work arrives or shutdown begins.
    work_available: Condvar,
    /// Signalled when the queue and in-flight set drain.
    drained: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pages_written: AtomicU64,
    failures: AtomicU64,
    healthy: AtomicBool,
}

impl WriterQueue {
    /// Creates a stopped queue; call [`start`](Self::start) to spawn
    /// workers.
    #[must_use]
    pub fn new(
        store: Arc<ContentStore>,
        cache: Arc<PageCache>,
        config: WriterQueueConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            cache,
            config,
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                in_flight: HashSet::new(),
                running: false,
            }),
            work_available: Condvar::new(),
            drained: Condvar::new(),
            workers: Mutex::new(Vec::new()),
            pages_written: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
        })
    }

    /// Spawns the worker threads. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.running {
            return;
        }
        state.running = true;
        drop(state);

        let mut workers = self.workers.lock();
        for worker_id in 0..self.config.workers {
            let queue = Arc::clone(self);
            let handle = std::thread::Builder::new()
                .name(format!("tessera-writer-{worker_id}"))
                .spawn(move || queue.worker_loop(worker_id))
                .expect("spawn writer thread");
            workers.push(handle);
        }
    }

    /// Enqueues a dirty page for write-back.
    ///
    /// Returns false when the queue is full. A page already queued is
    /// coalesced: its pending entry is replaced with the newer content.
    pub fn enqueue(&self, pid: PageId, page: Arc<Page>) -> bool {
        let mut state = self.state.lock();

        if let Some(pending) = state.queue.iter_mut().find(|req| req.pid == pid) {
            pending.page = page;
            pending.enqueued_at = Instant::now();
            return true;
        }

        if state.queue.len() >= self.config.capacity {
            return false;
        }

        state.queue.push_back(WriteRequest {
            pid,
            page,
            enqueued_at: Instant::now(),
        });
        self.work_available.notify_one();
        true
    }

    /// Blocks until the queue and all in-flight writes drain.
    pub fn wait_for_empty(&self) {
        let mut state = self.state.lock();
        while !(state.queue.is_empty() && state.in_flight.is_empty()) {
            self.drained
                .wait_for(&mut state, self.config.batch_timeout);
        }
    }

    /// Stops the workers, draining any remaining queued writes first.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            self.work_available.notify_all();
        }

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }

    /// Number of requests currently queued (excluding in-flight).
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns true if nothing is queued or in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.queue.is_empty() && state.in_flight.is_empty()
    }

    /// Component health: false once any write exhausted its retries.
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Total pages successfully written back.
    #[must_use]
    pub fn pages_written(&self) -> u64 {
        self.pages_written.load(Ordering::Relaxed)
    }

    /// Total writes that exhausted their retries.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn worker_loop(&self, worker_id: usize) {
        loop {
            let batch = {
                let mut state = self.state.lock();
                loop {
                    let batch = self.take_batch(&mut state);
                    if !batch.is_empty() {
                        break batch;
                    }
                    if !state.running {
                        return;
                    }
                    self.work_available
                        .wait_for(&mut state, self.config.batch_timeout);
                }
            };

            self.process_batch(worker_id, batch);
        }
    }

    /// Pops up to `batch_size` requests whose pages are not already
    /// being persisted by another worker, claiming their page IDs.
    fn take_batch(&self, state: &mut QueueState) -> Vec<WriteRequest> {
        let mut batch = Vec::new();
        let mut skipped = VecDeque::new();

        while batch.len() < self.config.batch_size {
            let Some(req) = state.queue.pop_front() else {
                break;
            };
            if state.in_flight.contains(&req.pid) {
                skipped.push_back(req);
            } else {
                state.in_flight.insert(req.pid);
                batch.push(req);
            }
        }

        // Conflicting requests keep their relative order at the front.
        while let Some(req) = skipped.pop_back() {
            state.queue.push_front(req);
        }

        batch
    }

    fn process_batch(&self, worker_id: usize, batch: Vec<WriteRequest>) {
        for req in &batch {
            self.process_one(worker_id, req);
        }

        let mut state = self.state.lock();
        for req in &batch {
            state.in_flight.remove(&req.pid);
        }
        if state.queue.is_empty() && state.in_flight.is_empty() {
            self.drained.notify_all();
        } else if !state.queue.is_empty() {
            // A skipped same-page request may now be processable.
            self.work_available.notify_one();
        }
    }

    fn process_one(&self, worker_id: usize, req: &WriteRequest) {
        for attempt in 0..=self.config.max_retries {
            match self.store.persist(req.pid, &req.page) {
                Ok(()) => {
                    self.cache.clear_dirty(req.pid);
                    self.pages_written.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        worker = worker_id,
                        page_id = %req.pid,
                        queued_for_ms = req.enqueued_at.elapsed().as_millis() as u64,
                        "persisted page"
                    );
                    return;
                }
                Err(err) if attempt < self.config.max_retries => {
                    tracing::warn!(
                        worker = worker_id,
                        page_id = %req.pid,
                        attempt,
                        error = %err,
                        "page write-back failed, retrying"
                    );
                }
                Err(err) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    self.healthy.store(false, Ordering::Release);
                    tracing::error!(
                        worker = worker_id,
                        page_id = %req.pid,
                        error = %err,
                        "page write-back failed permanently"
                    );
                }
            }
        }
    }
}

impl Drop for WriterQueue {
    fn drop(&mut self) {
        // Workers hold an Arc to the queue, so by the time Drop runs
        // they have already been joined by stop(); this is a backstop
        // for queues that were never started.
        let mut state = self.state.lock();
        state.running = false;
    }
}

impl std::fmt::Debug for WriterQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterQueue")
            .field("queued", &self.len())
            .field("healthy", &self.healthy())
            .field("pages_written", &self.pages_written())
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

    fn setup(config: WriterQueueConfig) -> (Arc<ContentStore>, Arc<PageCache>, Arc<WriterQueue>) {
        let store = Arc::new(ContentStore::in_memory());
        let cache = Arc::new(PageCache::new(Arc::clone(&store), 64));
        let queue = WriterQueue::new(Arc::clone(&store), Arc::clone(&cache), config);
        (store, cache, queue)
    }

    #[test]
    fn test_enqueued_pages_reach_store() {
        let (store, cache, queue) = setup(WriterQueueConfig::default());
        queue.start();

        let pid = PageId::new(1);
        let page = Arc::new(leaf_with(&[("a", "1")]));
        cache.put(pid, Arc::clone(&page)).unwrap();
        assert!(queue.enqueue(pid, page));

        queue.wait_for_empty();
        queue.stop();

        assert!(store.get(pid).unwrap().is_some());
        assert!(!cache.is_dirty(pid));
        assert_eq!(queue.pages_written(), 1);
        assert!(queue.healthy());
    }

    #[test]
    fn test_backpressure_when_full() {
        let (_store, _cache, queue) = setup(WriterQueueConfig {
            capacity: 2,
            ..Default::default()
        });
        // Workers not started: nothing drains.

        assert!(queue.enqueue(PageId::new(1), Arc::new(leaf_with(&[("a", "1")]))));
        assert!(queue.enqueue(PageId::new(2), Arc::new(leaf_with(&[("b", "2")]))));
        assert!(!queue.enqueue(PageId::new(3), Arc::new(leaf_with(&[("c", "3")]))));
    }

    #[test]
    fn test_same_page_coalesces() {
        let (store, _cache, queue) = setup(WriterQueueConfig {
            capacity: 4,
            ..Default::default()
        });

        let pid = PageId::new(1);
        assert!(queue.enqueue(pid, Arc::new(leaf_with(&[("a", "old")]))));
        assert!(queue.enqueue(pid, Arc::new(leaf_with(&[("a", "new")]))));
        assert_eq!(queue.len(), 1);

        queue.start();
        queue.wait_for_empty();
        queue.stop();

        let page = store.get(pid).unwrap().unwrap();
        assert_eq!(
            page.leaf_find(&Key::from_bytes(b"a")),
            Some(b"new".as_ref())
        );
    }

    #[test]
    fn test_stop_drains_queue() {
        let (store, _cache, queue) = setup(WriterQueueConfig::default());
        queue.start();

        for i in 1..=8u16 {
            assert!(queue.enqueue(
                PageId::new(i),
                Arc::new(leaf_with(&[(&format!("k{i}"), "v")])),
            ));
        }
        queue.wait_for_empty();
        queue.stop();

        for i in 1..=8u16 {
            assert!(store.get(PageId::new(i)).unwrap().is_some());
        }
    }

    #[test]
    fn test_start_is_idempotent() {
        let (_store, _cache, queue) = setup(WriterQueueConfig::default());
        queue.start();
        queue.start();
        queue.stop();
        queue.stop();
    }

    #[test]
    fn test_config_validation() {
        assert!(WriterQueueConfig::default().validate().is_ok());
        assert!(WriterQueueConfig {
            capacity: 0,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(WriterQueueConfig {
            workers: 0,
            ..Default::default()
        }
        .validate()
        .is_err());
    }
}
