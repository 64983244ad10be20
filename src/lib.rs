//! # batchflow
//!
//! A concurrent batch-task execution engine. A [`batch::BatchCoordinator`]
//! accepts many independent units of work, dispatches them onto a throttled
//! worker pool, gives every worker thread its own periodically-committed
//! transactional resource handle, tracks per-batch statistics, collects
//! failures and runs one-time completion callbacks once the batch quiesces.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use batchflow::batch::{
//!     BatchConfig, BatchCoordinator, MemoryRepository, MemorySession, Task, ThrottledTaskRunner,
//! };
//! use serde_json::json;
//!
//! # async fn example() -> batchflow::Result<()> {
//! let runner = Arc::new(ThrottledTaskRunner::new(4)?);
//! let repository = MemoryRepository::new();
//! let batch = BatchCoordinator::new("touch-pages", runner, repository, BatchConfig::default())?;
//!
//! batch.on_success(|_session| {
//!     tracing::info!("all pages touched");
//!     Ok(())
//! });
//!
//! for i in 0..100 {
//!     let path = format!("/content/page-{i}");
//!     batch.schedule(Task::for_item(path.clone(), move |session: &mut MemorySession| {
//!         session.put(&path, json!({ "touched": true }));
//!         Ok(())
//!     }))?;
//! }
//!
//! batch.wait_for_completion().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`batch`]: the coordinator, its collaborators and the in-memory repository
//! - [`metrics`]: Prometheus counters mirroring batch statistics

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for batchflow operations
pub type Result<T> = std::result::Result<T, BatchFlowError>;

/// Main error type for batchflow operations
#[derive(Error, Debug)]
pub enum BatchFlowError {
    /// A resource handle could not be minted or used
    #[error("Resource error: {0}")]
    Resource(String),

    /// A commit failed; the listed items were converted into failures
    #[error("Commit failed for {} pending item(s): {message}", items.len())]
    Commit {
        /// Items that were pending on the handle when the commit failed
        items: Vec<String>,
        /// Message of the underlying commit error
        message: String,
    },

    /// The action passed to `with_resource` returned an error
    #[error("Action failed: {0}")]
    Action(anyhow::Error),

    /// `with_resource` was entered again on a thread that already holds its handle
    #[error("Resource scope already active on this thread")]
    NestedResourceScope,

    /// Work was offered to a batch that has already finished
    #[error("Batch '{0}' has already finished")]
    BatchFinished(String),

    /// A batch with this name is already registered
    #[error("Batch '{0}' already exists")]
    DuplicateBatch(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics encoding error
    #[error("Metrics error: {0}")]
    Metrics(String),
}

/// Batch coordination, worker pool and resource collaborators
pub mod batch;

/// Prometheus metrics for batch execution
pub mod metrics;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_error_display() {
        let err = BatchFlowError::Commit {
            items: vec!["/a".to_string(), "/b".to_string()],
            message: "disk full".to_string(),
        };

        assert_eq!(err.to_string(), "Commit failed for 2 pending item(s): disk full");
    }

    #[test]
    fn test_serialization_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: BatchFlowError = parse.unwrap_err().into();

        assert!(matches!(err, BatchFlowError::Serialization(_)));
    }
}
