//! Batch coordinator
//!
//! The facade callers use to run a batch:
//! - Tasks are dispatched onto a [`TaskRunner`] and run against the worker
//!   thread's own resource handle
//! - Atomic counters track added, completed, filtered, successful and
//!   errored work
//! - Query results fan out into one task per item
//! - Success, failure and finish handlers run exactly once after quiescence

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::completion::{CompletionRunner, HandlerSet};
use super::context::{self, ResourceScope};
use super::handle_pool::{CommitFailure, ResourceHandle, ResourceHandlePool};
use super::ledger::FailureLedger;
use super::quiescence::QuiescenceDetector;
use super::resource::{ResourceProvider, TransactionalResource};
use super::runner::TaskRunner;
use super::stats::{BatchClock, BatchCounters};
use super::types::{
    BatchConfig, BatchStatistics, Failure, FailureReport, ItemFilter, Task, TaskBody, TaskOutcome,
};
use crate::metrics::{BatchMetrics, TaskEvent};
use crate::{BatchFlowError, Result};

/// State shared between the coordinator, its dispatched tasks and the completion monitor
pub(crate) struct BatchInner<P: ResourceProvider> {
    pub(crate) name: String,
    pub(crate) id: Uuid,
    pub(crate) config: BatchConfig,
    pub(crate) runner: Arc<dyn TaskRunner>,
    pub(crate) counters: BatchCounters,
    pub(crate) clock: BatchClock,
    pub(crate) ledger: FailureLedger,
    pub(crate) handles: ResourceHandlePool<P>,
    pub(crate) handlers: HandlerSet<P::Resource>,
    pub(crate) quiescence: QuiescenceDetector,
    pub(crate) monitor_registered: AtomicBool,
    pub(crate) completion: watch::Sender<bool>,
    pub(crate) metrics: BatchMetrics,
}

/// How a handle is given back at the end of a resource scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    /// Commit only once the pending items reach the save interval
    Interval,
    /// Always attempt a commit
    Commit,
}

impl<P: ResourceProvider> BatchInner<P> {
    /// Run `work` with the calling thread's handle, then release the handle
    fn scoped<T, F>(&self, release: Release, work: F) -> Result<T>
    where
        F: FnOnce(&mut ResourceHandle<P::Resource>) -> T,
    {
        let _scope = ResourceScope::enter()?;
        let handle = self.handles.acquire()?;
        let mut guard = handle.lock();
        let value = work(&mut guard);
        let released = match release {
            Release::Interval => guard.release(),
            Release::Commit => guard.commit(),
        };
        drop(guard);

        match released {
            Ok(()) => Ok(value),
            Err(failure) => {
                self.absorb_commit_failure(&failure);
                Err(failure.into())
            }
        }
    }

    pub(crate) fn with_resource<T, F>(&self, action: F) -> Result<T>
    where
        F: FnOnce(&mut P::Resource) -> anyhow::Result<T>,
    {
        let outcome = self.scoped(Release::Commit, |handle| {
            panic::catch_unwind(AssertUnwindSafe(|| action(handle.resource_mut())))
        })?;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(BatchFlowError::Action(e)),
            Err(panic) => panic::resume_unwind(panic),
        }
    }

    /// Body of every dispatched closure
    fn execute(self: &Arc<Self>, item: Option<String>, body: TaskBody<P::Resource>) {
        if self.clock.mark_started() {
            self.metrics.record_started();
            info!(batch = %self.name, batch_id = %self.id, "Batch started");
        }

        let _binding = context::bind_item(item.clone());
        let result = self.scoped(Release::Interval, |handle| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(handle.resource_mut())))
                .unwrap_or_else(|panic| Err(anyhow!("task panicked: {}", panic_message(&*panic))));

            match outcome {
                Ok(TaskOutcome::Done) => {
                    self.counters.record_success();
                    self.metrics.record_task(TaskEvent::Succeeded);
                    if let Some(item) = &item {
                        handle.mark_pending(item.clone());
                    }
                    debug!(batch = %self.name, item = ?item, "Task completed");
                }
                Ok(TaskOutcome::Filtered) => {
                    self.counters.record_filtered();
                    self.metrics.record_task(TaskEvent::Filtered);
                    info!(batch = %self.name, item = ?item, "Filtered out");
                }
                Err(e) => self.record_task_failure(item.clone(), format!("{e:#}")),
            }
        });

        match result {
            // Pending items were already converted into failures
            Ok(()) | Err(BatchFlowError::Commit { .. }) => {}
            Err(e) => self.record_task_failure(item, e.to_string()),
        }

        self.counters.record_completed();
        self.maybe_register_completion();
    }

    fn record_task_failure(&self, item: Option<String>, message: String) {
        error!(
            batch = %self.name,
            item = item.as_deref().unwrap_or("<none>"),
            error = %message,
            "Caught exception in task"
        );
        self.ledger.record(item, message);
        self.counters.record_error();
        self.metrics.record_task(TaskEvent::Failed);
    }

    /// Turn every item of a failed commit into a failure
    pub(crate) fn absorb_commit_failure(&self, failure: &CommitFailure) {
        let message = format!("{:#}", failure.source);
        for item in &failure.items {
            self.ledger.record(Some(item.clone()), message.clone());
        }
        self.counters.convert_to_errors(failure.items.len());
        self.metrics
            .record_tasks(TaskEvent::CommitFailed, failure.items.len());

        error!(
            batch = %self.name,
            items = %failure.items.join("; "),
            error = %message,
            "Commit error prevented saving changes"
        );
    }

    pub(crate) fn maybe_register_completion(self: &Arc<Self>) {
        if self.quiescence.is_settled(&self.counters) {
            CompletionRunner::register(self);
        }
    }

    pub(crate) fn statistics(&self) -> BatchStatistics {
        BatchStatistics {
            name: self.name.clone(),
            added: self.counters.added(),
            completed: self.counters.completed(),
            filtered: self.counters.filtered(),
            successful: self.counters.successful(),
            errored: self.counters.errored(),
            runtime_ms: self.clock.runtime_ms(),
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Keeps a batch from being declared complete while a producer is still adding work
pub struct ProducerGuard<P: ResourceProvider> {
    batch: Arc<BatchInner<P>>,
}

impl<P: ResourceProvider> Drop for ProducerGuard<P> {
    fn drop(&mut self) {
        if self.batch.counters.exit_producer() == 0 {
            self.batch.maybe_register_completion();
        }
    }
}

/// Coordinates one named batch of tasks.
///
/// Cloning is cheap; all clones refer to the same batch.
pub struct BatchCoordinator<P: ResourceProvider> {
    inner: Arc<BatchInner<P>>,
}

impl<P: ResourceProvider> Clone for BatchCoordinator<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: ResourceProvider> std::fmt::Debug for BatchCoordinator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("statistics", &self.inner.statistics())
            .finish()
    }
}

impl<P: ResourceProvider> BatchCoordinator<P> {
    /// Create a coordinator for the batch `name`.
    ///
    /// The coordinator takes ownership of `provider` and closes it when the
    /// batch is torn down.
    pub fn new(
        name: impl Into<String>,
        runner: Arc<dyn TaskRunner>,
        provider: P,
        config: BatchConfig,
    ) -> Result<Self> {
        config.validate()?;
        let name = name.into();
        let (completion, _) = watch::channel(false);

        info!(
            batch = %name,
            save_interval = config.save_interval,
            hesitation_ms = config.hesitation_delay_ms,
            "Creating batch coordinator"
        );

        Ok(Self {
            inner: Arc::new(BatchInner {
                id: Uuid::new_v4(),
                runner,
                counters: BatchCounters::new(),
                clock: BatchClock::new(),
                ledger: FailureLedger::new(config.failure_report_limit),
                handles: ResourceHandlePool::new(provider, config.save_interval),
                handlers: HandlerSet::new(),
                quiescence: QuiescenceDetector::new(config.hesitation_delay()),
                monitor_registered: AtomicBool::new(false),
                completion,
                metrics: BatchMetrics::new(name.clone()),
                config,
                name,
            }),
        })
    }

    /// Batch name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Unique id of this batch run
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Validated configuration
    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    /// Dispatch a task onto the worker pool.
    ///
    /// Fails only when the batch has already finished; the task's own
    /// errors are recorded in the failure ledger.
    pub fn schedule(&self, task: Task<P::Resource>) -> Result<()> {
        let inner = &self.inner;
        if inner.clock.is_finished() {
            warn!(batch = %inner.name, item = ?task.item(), "Refusing work for a finished batch");
            return Err(BatchFlowError::BatchFinished(inner.name.clone()));
        }

        let added = inner.counters.record_added();
        inner.metrics.record_task(TaskEvent::Added);
        debug!(batch = %inner.name, item = ?task.item(), added, "Task scheduled");

        let (item, body) = task.into_parts();
        let batch = Arc::clone(inner);
        inner.runner.schedule_work(Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| batch.execute(item, body)));
            if let Err(panic) = outcome {
                error!(
                    batch = %batch.name,
                    panic = %panic_message(&*panic),
                    "Unexpected failure at dispatch boundary"
                );
            }
        }));

        Ok(())
    }

    /// Dispatch an action that is not attributed to any item
    pub fn schedule_fn<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce(&mut P::Resource) -> anyhow::Result<()> + Send + 'static,
    {
        self.schedule(Task::new(action))
    }

    /// Run `action` synchronously with the calling thread's handle.
    ///
    /// The handle is committed on every exit path, so writes made by
    /// `action` persist even when it fails. A failed commit turns the
    /// handle's pending items into failures and is returned in place of
    /// the action's result. Calling this again from inside `action` fails
    /// with [`BatchFlowError::NestedResourceScope`].
    pub fn with_resource<T, F>(&self, action: F) -> Result<T>
    where
        F: FnOnce(&mut P::Resource) -> anyhow::Result<T>,
    {
        self.inner.with_resource(action)
    }

    /// Run a query and dispatch one task per result.
    ///
    /// The query runs inside one resource scope; tasks are dispatched after
    /// that scope ends, so runners that execute work on the calling thread
    /// can take the same handle. Filters run in order inside each task; the
    /// first rejection counts the item as filtered and skips `callback`.
    /// Results read before an iteration error are still dispatched before
    /// the error is returned. Returns the added count observed right after
    /// dispatch, a lower bound while tasks are running.
    #[instrument(skip(self, callback, filters), fields(batch = %self.inner.name))]
    pub fn schedule_for_each_query_result<C>(
        &self,
        statement: &str,
        language: &str,
        callback: C,
        filters: Vec<ItemFilter<P::Resource>>,
    ) -> Result<usize>
    where
        C: Fn(&mut P::Resource, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let _producer = self.producer();
        let callback = Arc::new(callback);
        let filters = Arc::new(filters);

        let (items, interrupted) = self.with_resource(|resource| {
            let mut items = Vec::new();
            for item in resource.query(statement, language)? {
                match item {
                    Ok(item) => items.push(item),
                    Err(e) => return Ok((items, Some(e))),
                }
            }
            Ok((items, None))
        })?;

        let dispatched = items.len();
        for item in items {
            info!(item = %item, "Processing found result");

            let callback = Arc::clone(&callback);
            let filters = Arc::clone(&filters);
            let task_item = item.clone();
            self.schedule(Task::with_outcome(Some(item), move |resource: &mut P::Resource| {
                context::set_current_item(Some(task_item.clone()));
                for filter in filters.iter() {
                    if !filter(&mut *resource, &task_item)? {
                        return Ok(TaskOutcome::Filtered);
                    }
                }
                callback(resource, &task_item)?;
                Ok(TaskOutcome::Done)
            }))?;
        }

        let added = self.inner.counters.added();
        info!(dispatched, added, "Query results dispatched");
        match interrupted {
            Some(e) => Err(BatchFlowError::Action(e)),
            None => Ok(added),
        }
    }

    /// Hold off completion until the returned guard is dropped
    pub fn producer(&self) -> ProducerGuard<P> {
        self.inner.counters.enter_producer();
        ProducerGuard {
            batch: Arc::clone(&self.inner),
        }
    }

    /// Register a handler run when the batch finishes without errors
    pub fn on_success<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&mut P::Resource) -> anyhow::Result<()> + Send + 'static,
    {
        self.inner.handlers.add_success(Box::new(handler));
        self
    }

    /// Register a handler run with all failures when the batch finishes with errors
    pub fn on_failure<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&[Failure], &mut P::Resource) -> anyhow::Result<()> + Send + 'static,
    {
        self.inner.handlers.add_failure(Box::new(handler));
        self
    }

    /// Register a handler run when the batch finishes, whatever the outcome
    pub fn on_finish<F>(&self, handler: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.handlers.add_finish(Box::new(handler));
        self
    }

    /// Whether all added work has completed and stayed that way through the
    /// hesitation delay. Blocks for the delay when the counts match.
    pub fn is_complete(&self) -> bool {
        self.inner.quiescence.is_complete(&self.inner.counters)
    }

    /// Whether completion handlers have been started
    pub fn is_finished(&self) -> bool {
        self.inner.clock.is_finished()
    }

    /// Tasks scheduled so far
    pub fn added_count(&self) -> usize {
        self.inner.counters.added()
    }

    /// Tasks ended so far, filtered ones included
    pub fn completed_count(&self) -> usize {
        self.inner.counters.completed()
    }

    /// Tasks rejected by a filter
    pub fn filtered_count(&self) -> usize {
        self.inner.counters.filtered()
    }

    /// Successful tasks not undone by a failed commit
    pub fn success_count(&self) -> usize {
        self.inner.counters.successful()
    }

    /// Failed tasks plus items lost to failed commits
    pub fn error_count(&self) -> usize {
        self.inner.counters.errored()
    }

    /// Tasks added but not completed yet
    pub fn remaining_count(&self) -> usize {
        self.added_count().saturating_sub(self.completed_count())
    }

    /// Every recorded failure, in order
    pub fn failure_list(&self) -> Vec<Failure> {
        self.inner.ledger.list()
    }

    /// Failure report capped at the configured limit
    pub fn failures(&self) -> Vec<FailureReport> {
        self.inner.ledger.report(&self.inner.name)
    }

    /// Snapshot of the counters
    pub fn statistics(&self) -> BatchStatistics {
        self.inner.statistics()
    }

    /// Time the first task was added
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner.clock.started_at()
    }

    /// Time completion ran
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.inner.clock.finished_at()
    }

    /// Handles minted so far
    pub fn handle_count(&self) -> usize {
        self.inner.handles.handle_count()
    }

    /// Close every handle and the base resource
    pub fn close_all(&self) {
        self.inner.handles.close_all();
    }

    /// Receiver that flips to `true` once teardown is done
    pub fn completion_receiver(&self) -> watch::Receiver<bool> {
        self.inner.completion.subscribe()
    }

    /// Wait until completion handlers have run and resources are closed
    pub async fn wait_for_completion(&self) {
        let mut receiver = self.completion_receiver();
        // The sender lives as long as the batch, so this only ends on completion
        let _ = receiver.wait_for(|done| *done).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::memory::{MemoryRepository, MemorySession};
    use crate::batch::runner::Work;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Collects work instead of running it, so tests drive execution by hand
    #[derive(Default)]
    struct ManualRunner {
        queue: Mutex<Vec<Work>>,
    }

    impl ManualRunner {
        fn run_all(&self) -> usize {
            let mut ran = 0;
            loop {
                let batch: Vec<Work> = std::mem::take(&mut *self.queue.lock());
                if batch.is_empty() {
                    return ran;
                }
                for work in batch {
                    work();
                    ran += 1;
                }
            }
        }
    }

    impl TaskRunner for ManualRunner {
        fn schedule_work(&self, work: Work) {
            self.queue.lock().push(work);
        }
    }

    /// Runs work on the calling thread as soon as it is scheduled
    struct InlineRunner;

    impl TaskRunner for InlineRunner {
        fn schedule_work(&self, work: Work) {
            work();
        }
    }

    fn run_queued(runner: &ManualRunner) {
        let work: Vec<Work> = std::mem::take(&mut *runner.queue.lock());
        for w in work {
            w();
        }
    }

    fn coordinator(
        runner: Arc<ManualRunner>,
        repo: MemoryRepository,
        config: BatchConfig,
    ) -> BatchCoordinator<MemoryRepository> {
        BatchCoordinator::new("unit", runner, repo, config).unwrap()
    }

    fn fast_config() -> BatchConfig {
        BatchConfig::default()
            .with_hesitation_delay(std::time::Duration::from_millis(1))
            .with_completion_check_interval(std::time::Duration::from_millis(1))
    }

    #[test]
    fn test_counts_success_and_failure() {
        let runner = Arc::new(ManualRunner::default());
        let batch = coordinator(runner.clone(), MemoryRepository::new(), fast_config());

        batch
            .schedule(Task::for_item("/ok", |s: &mut MemorySession| {
                s.put("/ok", json!(1));
                Ok(())
            }))
            .unwrap();
        batch
            .schedule(Task::for_item("/bad", |_| Err(anyhow!("broken"))))
            .unwrap();

        assert_eq!(batch.added_count(), 2);
        assert_eq!(batch.remaining_count(), 2);

        // Two tasks plus the completion monitor
        assert_eq!(runner.run_all(), 3);

        assert_eq!(batch.success_count(), 1);
        assert_eq!(batch.error_count(), 1);
        assert_eq!(batch.completed_count(), 2);
        let failures = batch.failure_list();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].item.as_deref(), Some("/bad"));
        assert!(batch.is_finished());
    }

    #[test]
    fn test_panicking_task_is_a_failure() {
        let runner = Arc::new(ManualRunner::default());
        let batch = coordinator(runner.clone(), MemoryRepository::new(), fast_config());

        batch
            .schedule(Task::for_item("/boom", |_| panic!("kaboom")))
            .unwrap();
        runner.run_all();

        assert_eq!(batch.error_count(), 1);
        assert_eq!(batch.completed_count(), 1);
        assert!(batch.failure_list()[0].message.contains("kaboom"));
    }

    #[test]
    fn test_current_item_bound_during_task() {
        let runner = Arc::new(ManualRunner::default());
        let batch = coordinator(runner.clone(), MemoryRepository::new(), fast_config());
        let seen = Arc::new(Mutex::new(None));

        let seen_in_task = Arc::clone(&seen);
        batch
            .schedule(Task::for_item("/bound", move |_| {
                *seen_in_task.lock() = context::current_item();
                Ok(())
            }))
            .unwrap();
        runner.run_all();

        assert_eq!(seen.lock().as_deref(), Some("/bound"));
        assert_eq!(context::current_item(), None);
    }

    #[test]
    fn test_schedule_refused_after_finish() {
        let runner = Arc::new(ManualRunner::default());
        let batch = coordinator(runner.clone(), MemoryRepository::new(), fast_config());
        batch.schedule_fn(|_| Ok(())).unwrap();
        runner.run_all();

        let err = batch.schedule_fn(|_| Ok(())).unwrap_err();
        assert!(matches!(err, BatchFlowError::BatchFinished(name) if name == "unit"));
        assert_eq!(batch.added_count(), 1);
    }

    #[test]
    fn test_nested_with_resource_rejected() {
        let runner = Arc::new(ManualRunner::default());
        let batch = coordinator(runner, MemoryRepository::new(), fast_config());

        let result = batch.with_resource(|_| {
            let nested = batch.with_resource(|_| Ok(()));
            assert!(matches!(nested, Err(BatchFlowError::NestedResourceScope)));
            Ok(())
        });
        assert!(result.is_ok());
    }

    #[test]
    fn test_commit_failure_converts_pending_items() {
        let runner = Arc::new(ManualRunner::default());
        let repo = MemoryRepository::new();
        let batch = coordinator(runner.clone(), repo.clone(), fast_config().with_save_interval(3));

        for i in 0..2 {
            let path = format!("/item/{i}");
            batch
                .schedule(Task::for_item(path.clone(), move |s: &mut MemorySession| {
                    s.put(&path, json!(i));
                    Ok(())
                }))
                .unwrap();
        }
        // Run the two tasks without letting the monitor in
        run_queued(&runner);
        assert_eq!(batch.success_count(), 2);
        assert_eq!(repo.commit_count(), 0);

        // with_resource always commits, taking this thread's pending items with it
        repo.fail_next_commits(1);
        let err = batch.with_resource(|_| Ok(())).unwrap_err();
        match err {
            BatchFlowError::Commit { items, .. } => {
                assert_eq!(items, vec!["/item/0".to_string(), "/item/1".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(batch.success_count(), 0);
        assert_eq!(batch.error_count(), 2);
        assert_eq!(batch.completed_count(), 2);
        assert_eq!(batch.failure_list().len(), 2);
    }

    #[test]
    fn test_with_resource_commits_below_save_interval() {
        let runner = Arc::new(ManualRunner::default());
        let repo = MemoryRepository::new();
        let batch = coordinator(runner, repo.clone(), fast_config());

        batch
            .with_resource(|s| {
                s.put("/x", json!(1));
                Ok(())
            })
            .unwrap();

        assert_eq!(repo.commit_count(), 1);
        assert_eq!(repo.committed("/x"), Some(json!(1)));
    }

    #[test]
    fn test_save_interval_counts_pending_items() {
        let runner = Arc::new(ManualRunner::default());
        let repo = MemoryRepository::new();
        let batch = coordinator(runner.clone(), repo.clone(), fast_config().with_save_interval(2));
        let _producer = batch.producer();

        let write = |path: &'static str| {
            Task::for_item(path, move |s: &mut MemorySession| {
                s.put(path, json!(true));
                Ok(())
            })
        };

        // A failed task and a filtered task leave nothing pending
        batch.schedule(Task::for_item("/bad", |_| Err(anyhow!("broken")))).unwrap();
        batch
            .schedule(Task::with_outcome(Some("/skipped".to_string()), |_| {
                Ok(TaskOutcome::Filtered)
            }))
            .unwrap();
        batch.schedule(write("/a")).unwrap();
        run_queued(&runner);
        assert_eq!(repo.commit_count(), 0);
        assert_eq!(repo.committed("/a"), None);

        batch.schedule(write("/b")).unwrap();
        run_queued(&runner);
        assert_eq!(repo.commit_count(), 1);
        assert_eq!(repo.committed("/a"), Some(json!(true)));
        assert_eq!(repo.committed("/b"), Some(json!(true)));
    }

    #[test]
    fn test_fan_out_on_caller_runs_runner() {
        let repo = MemoryRepository::new();
        for path in ["/content/a", "/content/b", "/content/c"] {
            repo.insert(path, json!({}));
        }
        let batch =
            BatchCoordinator::new("inline", Arc::new(InlineRunner), repo.clone(), fast_config())
                .unwrap();

        let dispatched = batch
            .schedule_for_each_query_result(
                "/content/",
                crate::batch::memory::PREFIX_LANGUAGE,
                |s, item| {
                    s.put(&format!("{item}/seen"), json!(true));
                    Ok(())
                },
                Vec::new(),
            )
            .unwrap();

        assert_eq!(dispatched, 3);
        assert_eq!(batch.success_count(), 3);
        assert_eq!(batch.error_count(), 0);
        assert!(batch.is_finished());
        assert_eq!(repo.committed("/content/b/seen"), Some(json!(true)));
    }

    #[test]
    fn test_producer_guard_defers_completion() {
        let runner = Arc::new(ManualRunner::default());
        let batch = coordinator(runner.clone(), MemoryRepository::new(), fast_config());

        let guard = batch.producer();
        batch.schedule_fn(|_| Ok(())).unwrap();
        assert_eq!(runner.run_all(), 1);
        assert!(!batch.is_complete());
        assert!(!batch.is_finished());

        drop(guard);
        assert_eq!(runner.run_all(), 1);
        assert!(batch.is_finished());
    }
}
