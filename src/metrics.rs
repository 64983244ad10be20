//! Metrics collection for batch execution
//!
//! Provides Prometheus-compatible counters that mirror each batch's
//! statistics, plus the runtime of finished batches.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

use crate::{BatchFlowError, Result};

lazy_static! {
    /// Task events per batch and outcome
    static ref BATCH_TASKS: IntCounterVec = register_int_counter_vec!(
        "batchflow_tasks_total",
        "Task events per batch",
        &["batch", "event"]
    ).expect("batchflow_tasks_total registers once");

    /// Handler invocations per batch, kind and status
    static ref BATCH_HANDLERS: IntCounterVec = register_int_counter_vec!(
        "batchflow_handlers_total",
        "Completion handler invocations",
        &["batch", "kind", "status"]
    ).expect("batchflow_handlers_total registers once");

    /// Batches that have dispatched work and not finished yet
    static ref ACTIVE_BATCHES: IntGauge = register_int_gauge!(
        "batchflow_active_batches",
        "Number of batches currently running"
    ).expect("batchflow_active_batches registers once");

    /// Runtime of finished batches
    static ref BATCH_RUNTIME: HistogramVec = register_histogram_vec!(
        "batchflow_batch_runtime_seconds",
        "Batch runtime from first dispatch to completion",
        &["batch"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]
    ).expect("batchflow_batch_runtime_seconds registers once");
}

/// Task event label values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    /// Task scheduled
    Added,
    /// Task body returned `Ok`
    Succeeded,
    /// Task body or release failed
    Failed,
    /// Item rejected by a filter
    Filtered,
    /// Item lost to a failed commit
    CommitFailed,
}

impl TaskEvent {
    fn as_label(self) -> &'static str {
        match self {
            TaskEvent::Added => "added",
            TaskEvent::Succeeded => "succeeded",
            TaskEvent::Failed => "failed",
            TaskEvent::Filtered => "filtered",
            TaskEvent::CommitFailed => "commit_failed",
        }
    }
}

/// Metrics recorder bound to one batch name
#[derive(Debug, Clone)]
pub struct BatchMetrics {
    batch: String,
}

impl BatchMetrics {
    /// Create a recorder for `batch`
    pub fn new(batch: impl Into<String>) -> Self {
        Self {
            batch: batch.into(),
        }
    }

    /// Record `count` task events
    pub fn record_tasks(&self, event: TaskEvent, count: usize) {
        BATCH_TASKS
            .with_label_values(&[self.batch.as_str(), event.as_label()])
            .inc_by(count as u64);
    }

    /// Record one task event
    pub fn record_task(&self, event: TaskEvent) {
        self.record_tasks(event, 1);
    }

    /// Record a completion handler run
    pub fn record_handler(&self, kind: &str, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        BATCH_HANDLERS
            .with_label_values(&[self.batch.as_str(), kind, status])
            .inc();
    }

    /// Record the first dispatch of the batch
    pub fn record_started(&self) {
        ACTIVE_BATCHES.inc();
    }

    /// Record batch completion
    pub fn record_finished(&self, started: bool, runtime_ms: i64) {
        if started {
            ACTIVE_BATCHES.dec();
        }
        BATCH_RUNTIME
            .with_label_values(&[self.batch.as_str()])
            .observe(runtime_ms.max(0) as f64 / 1000.0);
    }
}

/// Export all registered metrics in Prometheus text format
pub fn export_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| BatchFlowError::Metrics(e.to_string()))?;

    String::from_utf8(buffer).map_err(|e| BatchFlowError::Metrics(e.to_string()))
}
