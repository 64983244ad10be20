//! One-shot completion of a batch
//!
//! The first worker that observes a settled batch registers a monitor. The
//! monitor waits for quiescence, flushes every handle and then runs the
//! registered handlers. Success handlers run only when nothing failed;
//! failure handlers receive the full failure list. Finish handlers always
//! run, and teardown closes every handle before completion is signalled.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument};

use super::coordinator::{panic_message, BatchInner};
use super::resource::ResourceProvider;
use super::types::{FailureHandler, FinishHandler, SuccessHandler};
use crate::Result;

/// Handlers registered on a batch, each taken out exactly once
pub(crate) struct HandlerSet<R> {
    success: Mutex<Vec<SuccessHandler<R>>>,
    failure: Mutex<Vec<FailureHandler<R>>>,
    finish: Mutex<Vec<FinishHandler>>,
}

impl<R> HandlerSet<R> {
    pub(crate) fn new() -> Self {
        Self {
            success: Mutex::new(Vec::new()),
            failure: Mutex::new(Vec::new()),
            finish: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add_success(&self, handler: SuccessHandler<R>) {
        self.success.lock().push(handler);
    }

    pub(crate) fn add_failure(&self, handler: FailureHandler<R>) {
        self.failure.lock().push(handler);
    }

    pub(crate) fn add_finish(&self, handler: FinishHandler) {
        self.finish.lock().push(handler);
    }

    fn take_all(
        &self,
    ) -> (
        Vec<SuccessHandler<R>>,
        Vec<FailureHandler<R>>,
        Vec<FinishHandler>,
    ) {
        (
            std::mem::take(&mut *self.success.lock()),
            std::mem::take(&mut *self.failure.lock()),
            std::mem::take(&mut *self.finish.lock()),
        )
    }
}

/// Waits for a batch to quiesce and runs its completion sequence
pub(crate) struct CompletionRunner<P: ResourceProvider> {
    batch: Arc<BatchInner<P>>,
}

impl<P: ResourceProvider> CompletionRunner<P> {
    /// Schedule the monitor unless one is already registered
    pub(crate) fn register(batch: &Arc<BatchInner<P>>) {
        if batch.monitor_registered.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(batch = %batch.name, "Registering completion monitor");
        let monitor = Self {
            batch: Arc::clone(batch),
        };
        batch.runner.schedule_monitor(Box::new(move || monitor.run()));
    }

    fn run(self) {
        let interval = self.batch.config.completion_check_interval();
        while !self.batch.quiescence.is_complete(&self.batch.counters) {
            std::thread::sleep(interval);
        }
        self.finish();
    }

    #[instrument(skip(self), fields(batch = %self.batch.name))]
    fn finish(&self) {
        let batch = &self.batch;
        batch.clock.mark_finished();

        for failure in batch.handles.commit_all() {
            batch.absorb_commit_failure(&failure);
        }

        let stats = batch.statistics();
        info!(
            added = stats.added,
            successful = stats.successful,
            errored = stats.errored,
            filtered = stats.filtered,
            runtime_ms = stats.runtime_ms,
            "Batch complete, running handlers"
        );

        let (success, failure, finish) = batch.handlers.take_all();
        if stats.errored == 0 {
            for handler in success {
                self.isolate("success", || batch.with_resource(handler));
            }
        } else {
            let failures = batch.ledger.list();
            for handler in failure {
                self.isolate("failure", || {
                    batch.with_resource(|resource| handler(&failures, resource))
                });
            }
        }

        for handler in finish {
            self.isolate("finish", || {
                handler();
                Ok(())
            });
        }

        batch.handles.close_all();
        batch
            .metrics
            .record_finished(batch.clock.is_started(), batch.clock.runtime_ms());
        batch.completion.send_replace(true);
        info!(batch_id = %batch.id, "Batch torn down");
    }

    /// Run one handler, logging its error or panic instead of propagating it
    fn isolate<F>(&self, kind: &'static str, handler: F)
    where
        F: FnOnce() -> Result<()>,
    {
        let ok = match panic::catch_unwind(AssertUnwindSafe(handler)) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(kind, error = %e, "Completion handler failed");
                false
            }
            Err(panic) => {
                error!(kind, panic = %panic_message(&*panic), "Completion handler panicked");
                false
            }
        };
        self.batch.metrics.record_handler(kind, ok);
    }
}
