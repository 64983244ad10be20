pub mod completion;
pub mod context;
pub mod coordinator;
pub mod handle_pool;
pub mod ledger;
pub mod memory;
pub mod quiescence;
pub mod registry;
pub mod resource;
pub mod runner;
pub mod stats;
pub mod types;

pub use context::{current_item, set_current_item};
pub use coordinator::*;
pub use handle_pool::{CommitFailure, ResourceHandle, ResourceHandlePool};
pub use ledger::FailureLedger;
pub use memory::{MemoryRepository, MemorySession, PREFIX_LANGUAGE, REGEX_LANGUAGE};
pub use quiescence::QuiescenceDetector;
pub use registry::BatchRegistry;
pub use resource::{ResourceProvider, TransactionalResource};
pub use runner::{TaskRunner, ThrottledTaskRunner, Work};
pub use stats::{BatchClock, BatchCounters};
pub use types::*;
