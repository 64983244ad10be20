//! Atomic batch counters and the batch clock

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// Counters shared by every task of a batch.
///
/// `added`, `completed`, `filtered` and `errored` only grow. `successful`
/// shrinks only when a commit failure moves items into `errored`.
#[derive(Debug, Default)]
pub struct BatchCounters {
    added: AtomicUsize,
    completed: AtomicUsize,
    filtered: AtomicUsize,
    successful: AtomicUsize,
    errored: AtomicUsize,
    producers: AtomicUsize,
}

impl BatchCounters {
    /// Zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new added count
    pub fn record_added(&self) -> usize {
        self.added.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the new completed count
    pub fn record_completed(&self) -> usize {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Count a task as a success
    pub fn record_success(&self) {
        self.successful.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a task as an error
    pub fn record_error(&self) {
        self.errored.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a task as filtered
    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::SeqCst);
    }

    /// Move `count` previously successful items into the error column
    pub fn convert_to_errors(&self, count: usize) {
        if count == 0 {
            return;
        }
        // Never wrap below zero if a caller converts items it did not count
        let _ = self
            .successful
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(count))
            });
        self.errored.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn enter_producer(&self) {
        self.producers.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the number of producers still active
    pub(crate) fn exit_producer(&self) -> usize {
        self.producers.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Added count
    pub fn added(&self) -> usize {
        self.added.load(Ordering::SeqCst)
    }

    /// Completed count
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Filtered count
    pub fn filtered(&self) -> usize {
        self.filtered.load(Ordering::SeqCst)
    }

    /// Successful count
    pub fn successful(&self) -> usize {
        self.successful.load(Ordering::SeqCst)
    }

    /// Errored count
    pub fn errored(&self) -> usize {
        self.errored.load(Ordering::SeqCst)
    }

    /// Producer guards still alive
    pub fn producers(&self) -> usize {
        self.producers.load(Ordering::SeqCst)
    }
}

/// Start and finish timestamps of a batch, in Unix milliseconds (0 = unset)
#[derive(Debug, Default)]
pub struct BatchClock {
    started_ms: AtomicI64,
    finished_ms: AtomicI64,
}

impl BatchClock {
    /// Unset clock
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp the start time; true only for the first caller
    pub fn mark_started(&self) -> bool {
        self.started_ms
            .compare_exchange(0, now_ms(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Stamp the finish time; true only for the first caller
    pub fn mark_finished(&self) -> bool {
        self.finished_ms
            .compare_exchange(0, now_ms(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Whether the start time has been stamped
    pub fn is_started(&self) -> bool {
        self.started_ms.load(Ordering::SeqCst) != 0
    }

    /// Whether the finish time has been stamped
    pub fn is_finished(&self) -> bool {
        self.finished_ms.load(Ordering::SeqCst) != 0
    }

    /// Start time, if stamped
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        to_datetime(self.started_ms.load(Ordering::SeqCst))
    }

    /// Finish time, if stamped
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        to_datetime(self.finished_ms.load(Ordering::SeqCst))
    }

    /// finish - start once finished, 0 before the first dispatch, otherwise now - start
    pub fn runtime_ms(&self) -> i64 {
        let started = self.started_ms.load(Ordering::SeqCst);
        let finished = self.finished_ms.load(Ordering::SeqCst);
        if started == 0 {
            0
        } else if finished != 0 {
            (finished - started).max(0)
        } else {
            (now_ms() - started).max(0)
        }
    }
}

fn now_ms() -> i64 {
    // Keep 0 reserved for "unset"
    Utc::now().timestamp_millis().max(1)
}

fn to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    if ms == 0 {
        return None;
    }
    Utc.timestamp_millis_opt(ms).single()
}
