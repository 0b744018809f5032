//! Minimal periodic-job scheduler.
//!
//! The engine needs exactly two kinds of background work: "run this
//! closure periodically" (checkpoint, MVCC GC) and "run this closure
//! once after a delay". Each job gets a named thread; shutdown is
//! observed within one interval via a condvar timeout.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct Shutdown {
    flag: Mutex<bool>,
    signal: Condvar,
}

/// Named timer threads driving recurring and one-shot closures.
pub struct Scheduler {
    shutdown: Arc<Shutdown>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Creates an idle scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(Shutdown {
                flag: Mutex::new(false),
                signal: Condvar::new(),
            }),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Runs `job` every `interval` until shutdown.
    ///
    /// The first run happens one interval after scheduling.
    pub fn schedule_recurring(
        &self,
        name: &str,
        interval: Duration,
        job: impl Fn() + Send + 'static,
    ) {
        let shutdown = Arc::clone(&self.shutdown);
        let handle = std::thread::Builder::new()
            .name(format!("tessera-{name}"))
            .spawn(move || loop {
                let mut stopped = shutdown.flag.lock();
                if !*stopped {
                    shutdown.signal.wait_for(&mut stopped, interval);
                }
                if *stopped {
                    return;
                }
                drop(stopped);
                job();
            })
            .expect("spawn scheduler thread");
        self.handles.lock().push(handle);
    }

    /// Runs `job` once after `delay`, unless shutdown comes first.
    pub fn schedule_once(
        &self,
        name: &str,
        delay: Duration,
        job: impl FnOnce() + Send + 'static,
    ) {
        let shutdown = Arc::clone(&self.shutdown);
        let handle = std::thread::Builder::new()
            .name(format!("tessera-{name}"))
            .spawn(move || {
                let mut stopped = shutdown.flag.lock();
                if !*stopped {
                    shutdown.signal.wait_for(&mut stopped, delay);
                }
                if *stopped {
                    return;
                }
                drop(stopped);
                job();
            })
            .expect("spawn scheduler thread");
        self.handles.lock().push(handle);
    }

    /// Stops all jobs and joins their threads. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut stopped = self.shutdown.flag.lock();
            if *stopped {
                return;
            }
            *stopped = true;
            self.shutdown.signal.notify_all();
        }
        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_recurring_job_fires() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));

        let job_count = Arc::clone(&count);
        scheduler.schedule_recurring("tick", Duration::from_millis(5), move || {
            job_count.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(60));
        scheduler.shutdown();

        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_once_job_fires_once() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));

        let job_count = Arc::clone(&count);
        scheduler.schedule_once("one-shot", Duration::from_millis(5), move || {
            job_count.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(50));
        scheduler.shutdown();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_cancels_pending_jobs() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));

        let job_count = Arc::clone(&count);
        scheduler.schedule_once("slow", Duration::from_secs(60), move || {
            job_count.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let scheduler = Scheduler::new();
        scheduler.schedule_recurring("noop", Duration::from_millis(10), || {});
        scheduler.shutdown();
        scheduler.shutdown();
    }
}
