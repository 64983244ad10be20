//! Batch value types and configuration

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BatchFlowError, Result};

/// Number of failure rows exposed through reporting interfaces by default
pub const DEFAULT_FAILURE_REPORT_LIMIT: usize = 5000;

/// How a task body ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// The task did its work
    Done,
    /// A filter rejected the item; counted as filtered, not as success
    Filtered,
}

/// Boxed task body
pub type TaskBody<R> = Box<dyn FnOnce(&mut R) -> anyhow::Result<TaskOutcome> + Send + 'static>;

/// A unit of work run against a worker's resource handle
pub struct Task<R> {
    item: Option<String>,
    body: TaskBody<R>,
}

impl<R: 'static> Task<R> {
    /// Create a task without an item identifier
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(&mut R) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            item: None,
            body: Box::new(move |resource| body(resource).map(|()| TaskOutcome::Done)),
        }
    }

    /// Create a task attributed to `item`
    pub fn for_item<F>(item: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(&mut R) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            item: Some(item.into()),
            ..Self::new(body)
        }
    }

    /// Create a task whose body reports its own outcome
    pub fn with_outcome<F>(item: Option<String>, body: F) -> Self
    where
        F: FnOnce(&mut R) -> anyhow::Result<TaskOutcome> + Send + 'static,
    {
        Self {
            item,
            body: Box::new(body),
        }
    }

    /// Item identifier used for failure attribution
    pub fn item(&self) -> Option<&str> {
        self.item.as_deref()
    }

    pub(crate) fn into_parts(self) -> (Option<String>, TaskBody<R>) {
        (self.item, self.body)
    }
}

impl<R> std::fmt::Debug for Task<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("item", &self.item)
            .field("body", &"FnOnce")
            .finish()
    }
}

/// Per-item filter used by query fan-out; `Ok(false)` rejects the item
pub type ItemFilter<R> = Box<dyn Fn(&mut R, &str) -> anyhow::Result<bool> + Send + Sync + 'static>;

/// Handler run once when a batch finishes without errors
pub type SuccessHandler<R> = Box<dyn FnOnce(&mut R) -> anyhow::Result<()> + Send + 'static>;

/// Handler run once when a batch finishes with errors
pub type FailureHandler<R> =
    Box<dyn FnOnce(&[Failure], &mut R) -> anyhow::Result<()> + Send + 'static>;

/// Handler run once when a batch finishes, regardless of outcome
pub type FinishHandler = Box<dyn FnOnce() + Send + 'static>;

/// A recorded failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// Item the failure is attributed to, if any
    pub item: Option<String>,
    /// Error message
    pub message: String,
    /// When the failure was recorded
    pub recorded_at: DateTime<Utc>,
}

impl Failure {
    /// Create a failure stamped with the current time
    pub fn new(item: Option<String>, message: impl Into<String>) -> Self {
        Self {
            item,
            message: message.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// One row of a failure report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Batch name
    pub name: String,
    /// 1-based position in the ledger
    pub index: usize,
    /// Item identifier, `None` when the failure could not be attributed
    pub item: Option<String>,
    /// Error message
    pub message: String,
}

/// Snapshot of batch statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStatistics {
    /// Batch name
    pub name: String,
    /// Tasks scheduled
    pub added: usize,
    /// Tasks that ended, whatever the outcome
    pub completed: usize,
    /// Tasks rejected by a filter
    pub filtered: usize,
    /// Tasks that succeeded and were not converted by a failed commit
    pub successful: usize,
    /// Failed tasks, including items lost to failed commits
    pub errored: usize,
    /// Milliseconds between first dispatch and finish (or now, while running)
    pub runtime_ms: i64,
}

/// Batch coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Releases of a handle between forced commits
    pub save_interval: usize,

    /// Wait before re-checking that a quiet batch is really finished
    pub hesitation_delay_ms: u64,

    /// Poll interval of the completion monitor
    pub completion_check_interval_ms: u64,

    /// Maximum rows returned by failure reports
    pub failure_report_limit: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            save_interval: 1000,
            hesitation_delay_ms: 50,
            completion_check_interval_ms: 100,
            failure_report_limit: DEFAULT_FAILURE_REPORT_LIMIT,
        }
    }
}

impl BatchConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the save interval
    pub fn with_save_interval(mut self, interval: usize) -> Self {
        self.save_interval = interval;
        self
    }

    /// Set the hesitation delay
    pub fn with_hesitation_delay(mut self, delay: Duration) -> Self {
        self.hesitation_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the completion monitor poll interval
    pub fn with_completion_check_interval(mut self, interval: Duration) -> Self {
        self.completion_check_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the failure report limit
    pub fn with_failure_report_limit(mut self, limit: usize) -> Self {
        self.failure_report_limit = limit;
        self
    }

    /// Hesitation delay as a `Duration`
    pub fn hesitation_delay(&self) -> Duration {
        Duration::from_millis(self.hesitation_delay_ms)
    }

    /// Completion monitor polling interval as a `Duration`
    pub fn completion_check_interval(&self) -> Duration {
        Duration::from_millis(self.completion_check_interval_ms)
    }

    /// Reject configurations the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.save_interval == 0 {
            return Err(BatchFlowError::Config(
                "save_interval must be at least 1".to_string(),
            ));
        }
        if self.completion_check_interval_ms == 0 {
            return Err(BatchFlowError::Config(
                "completion_check_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
