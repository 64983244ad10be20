//! Thread-affine resource handles
//!
//! Each worker thread lazily gets one handle per batch, keyed by its
//! [`ThreadId`]. A handle collects the items written since its last
//! successful commit and force-commits once that pending count reaches the
//! save interval, so a failed commit can be attributed to those items.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::resource::{ResourceProvider, TransactionalResource};
use crate::{BatchFlowError, Result};

/// A handle shared between its owning thread and batch teardown
pub type SharedHandle<R> = Arc<Mutex<ResourceHandle<R>>>;

/// A commit that failed, together with the items it was meant to persist
#[derive(Debug)]
pub struct CommitFailure {
    /// Items pending on the handle when the commit failed
    pub items: Vec<String>,
    /// Error returned by the resource
    pub source: anyhow::Error,
}

impl From<CommitFailure> for BatchFlowError {
    fn from(failure: CommitFailure) -> Self {
        BatchFlowError::Commit {
            items: failure.items,
            message: format!("{:#}", failure.source),
        }
    }
}

/// One live transactional resource with its pending-commit buffer
#[derive(Debug)]
pub struct ResourceHandle<R> {
    id: u64,
    resource: R,
    pending: Vec<String>,
    save_interval: usize,
    commits: u64,
}

impl<R: TransactionalResource> ResourceHandle<R> {
    /// Wrap `resource`, committing every `save_interval` pending items
    pub fn new(id: u64, resource: R, save_interval: usize) -> Self {
        Self {
            id,
            resource,
            pending: Vec::new(),
            save_interval: save_interval.max(1),
            commits: 0,
        }
    }

    /// Pool-assigned id, unique within a batch
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The wrapped resource
    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// The wrapped resource, mutably
    pub fn resource_mut(&mut self) -> &mut R {
        &mut self.resource
    }

    /// Whether the wrapped resource can still be used
    pub fn is_live(&self) -> bool {
        self.resource.is_live()
    }

    /// Remember an item whose writes are not committed yet
    pub fn mark_pending(&mut self, item: impl Into<String>) {
        self.pending.push(item.into());
    }

    /// Items written since the last successful commit
    pub fn pending_items(&self) -> &[String] {
        &self.pending
    }

    /// Successful commits made through this handle
    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// End of one dispatched task; commits once the pending count reaches the save interval
    pub fn release(&mut self) -> std::result::Result<(), CommitFailure> {
        if self.pending.len() >= self.save_interval {
            self.commit()
        } else {
            Ok(())
        }
    }

    /// Commit now; on failure the pending items are handed back to the caller
    pub fn commit(&mut self) -> std::result::Result<(), CommitFailure> {
        match self.resource.commit() {
            Ok(()) => {
                self.commits += 1;
                self.pending.clear();
                Ok(())
            }
            Err(source) => Err(CommitFailure {
                items: std::mem::take(&mut self.pending),
                source,
            }),
        }
    }

    /// Close the underlying resource unless it already went stale
    pub fn close(&mut self) {
        if self.resource.is_live() {
            self.resource.close();
        }
    }
}

/// Per-thread handles of one batch, minted from the batch's base resource
pub struct ResourceHandlePool<P: ResourceProvider> {
    provider: P,
    save_interval: usize,
    by_thread: DashMap<ThreadId, SharedHandle<P::Resource>>,
    created: Mutex<Vec<SharedHandle<P::Resource>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl<P: ResourceProvider> ResourceHandlePool<P> {
    /// Create an empty pool over `provider`
    pub fn new(provider: P, save_interval: usize) -> Self {
        Self {
            provider,
            save_interval,
            by_thread: DashMap::new(),
            created: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// The base resource handles are minted from
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The calling thread's handle, minting a new one if missing or stale
    pub fn acquire(&self) -> Result<SharedHandle<P::Resource>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BatchFlowError::Resource(
                "resource pool is closed".to_string(),
            ));
        }

        let thread_id = thread::current().id();
        let cached = self.by_thread.get(&thread_id).map(|entry| entry.value().clone());
        if let Some(handle) = cached {
            let guard = handle.lock();
            if guard.is_live() {
                drop(guard);
                return Ok(handle);
            }
            warn!(
                handle_id = guard.id(),
                pending = guard.pending_items().len(),
                "Cached handle is no longer live, minting a fresh one"
            );
        }

        let resource = self
            .provider
            .derive()
            .map_err(|e| BatchFlowError::Resource(format!("failed to derive handle: {e:#}")))?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = Arc::new(Mutex::new(ResourceHandle::new(
            id,
            resource,
            self.save_interval,
        )));

        self.created.lock().push(Arc::clone(&handle));
        self.by_thread.insert(thread_id, Arc::clone(&handle));
        debug!(handle_id = id, thread = ?thread_id, "Minted resource handle");

        Ok(handle)
    }

    /// Number of handles minted so far, stale ones included
    pub fn handle_count(&self) -> usize {
        self.created.lock().len()
    }

    /// Commit every live handle, returning the commits that failed
    pub fn commit_all(&self) -> Vec<CommitFailure> {
        let handles = self.created.lock().clone();
        let mut failures = Vec::new();
        for handle in handles {
            let mut guard = handle.lock();
            if !guard.is_live() {
                continue;
            }
            if let Err(failure) = guard.commit() {
                error!(
                    handle_id = guard.id(),
                    items = failure.items.len(),
                    error = %failure.source,
                    "Final commit failed"
                );
                failures.push(failure);
            }
        }
        failures
    }

    /// Close every handle in creation order, then the base resource.
    ///
    /// Only the first call has any effect.
    pub fn close_all(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let handles = std::mem::take(&mut *self.created.lock());
        let count = handles.len();
        for handle in handles {
            handle.lock().close();
        }
        self.by_thread.clear();
        self.provider.close();

        info!(handles = count, "Closed all resource handles");
    }

    /// Whether `close_all` has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
