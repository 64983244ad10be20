//! Failure ledger
//!
//! Failures are kept in full for handlers; reports are capped.

use parking_lot::Mutex;

use super::types::{Failure, FailureReport};

/// Append-only, ordered record of batch failures
#[derive(Debug)]
pub struct FailureLedger {
    entries: Mutex<Vec<Failure>>,
    report_limit: usize,
}

impl FailureLedger {
    /// Create a ledger whose reports are capped at `report_limit` rows
    pub fn new(report_limit: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            report_limit,
        }
    }

    /// Append a failure and return the ledger length
    pub fn record(&self, item: Option<String>, message: impl Into<String>) -> usize {
        let mut entries = self.entries.lock();
        entries.push(Failure::new(item, message));
        entries.len()
    }

    /// Every failure, in recording order
    pub fn list(&self) -> Vec<Failure> {
        self.entries.lock().clone()
    }

    /// At most `report_limit` rows, numbered from 1
    pub fn report(&self, batch_name: &str) -> Vec<FailureReport> {
        self.entries
            .lock()
            .iter()
            .take(self.report_limit)
            .enumerate()
            .map(|(i, failure)| FailureReport {
                name: batch_name.to_string(),
                index: i + 1,
                item: failure.item.clone(),
                message: failure.message.clone(),
            })
            .collect()
    }

    /// Failures recorded so far
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True until the first failure is recorded
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum rows returned by `report`
    pub fn report_limit(&self) -> usize {
        self.report_limit
    }
}
