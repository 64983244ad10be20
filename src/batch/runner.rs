//! Worker pool collaborator
//!
//! The coordinator only needs somewhere to run closures. [`ThrottledTaskRunner`]
//! is a tokio-backed implementation: ordinary work waits for a semaphore
//! permit and then runs on the blocking pool, so each closure keeps its
//! thread for its whole duration.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::{BatchFlowError, Result};

/// A closure handed to the worker pool
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Bounded-concurrency worker pool
pub trait TaskRunner: Send + Sync + 'static {
    /// Run `work` at some point on a pool thread
    fn schedule_work(&self, work: Work);

    /// Run long-lived maintenance work such as a completion monitor.
    ///
    /// Implementations with a hard concurrency cap should not let this
    /// work occupy a slot that the tasks it waits for need.
    fn schedule_monitor(&self, work: Work) {
        self.schedule_work(work);
    }
}

/// Semaphore-throttled runner on top of tokio's blocking pool
#[derive(Debug, Clone)]
pub struct ThrottledTaskRunner {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_threads: usize,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ThrottledTaskRunner {
    /// Create a runner on the current tokio runtime
    pub fn new(max_threads: usize) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| BatchFlowError::Config(format!("no tokio runtime available: {e}")))?;
        Ok(Self::with_handle(handle, max_threads))
    }

    /// Create a runner sized to the number of CPUs
    pub fn with_default_threads() -> Result<Self> {
        Self::new(num_cpus::get())
    }

    /// Create a runner on an explicit runtime
    pub fn with_handle(handle: Handle, max_threads: usize) -> Self {
        let max_threads = max_threads.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_threads)),
            max_threads,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Concurrency cap on dispatched tasks
    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Throttled closures currently running
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of throttled closures that ran at once
    pub fn peak_active(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl TaskRunner for ThrottledTaskRunner {
    fn schedule_work(&self, work: Work) {
        let permits = Arc::clone(&self.permits);
        let active = Arc::clone(&self.active);
        let peak = Arc::clone(&self.peak);

        self.handle.spawn(async move {
            let permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Worker pool is closed, dropping work");
                    return;
                }
            };

            let running = tokio::task::spawn_blocking(move || {
                let _slot = ActiveSlot::enter(active, &peak);
                work();
            });
            if let Err(e) = running.await {
                error!(error = %e, "Worker closure terminated abnormally");
            }
            drop(permit);
        });
    }

    fn schedule_monitor(&self, work: Work) {
        debug!("Scheduling monitor outside of the throttle");
        let running = self.handle.spawn_blocking(work);
        self.handle.spawn(async move {
            if let Err(e) = running.await {
                error!(error = %e, "Monitor closure terminated abnormally");
            }
        });
    }
}

/// Counts a running closure, also when it unwinds
struct ActiveSlot {
    active: Arc<AtomicUsize>,
}

impl ActiveSlot {
    fn enter(active: Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
