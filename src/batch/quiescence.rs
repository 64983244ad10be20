//! Batch quiescence detection
//!
//! A producer may still be adding work while workers drain the queue, so a
//! single `completed == added` snapshot can report a finish too early. The
//! detector re-checks after a short hesitation delay and also refuses while
//! any [`ProducerGuard`](super::coordinator::ProducerGuard) is alive.
//! Producers that add work without a guard after observing completion are
//! not covered; the delay only narrows that window.

use std::time::Duration;

use tracing::trace;

use super::stats::BatchCounters;

/// Decides when a batch has settled for good
#[derive(Debug, Clone)]
pub struct QuiescenceDetector {
    hesitation: Duration,
}

impl QuiescenceDetector {
    /// Detector that waits `hesitation` before confirming quiescence
    pub fn new(hesitation: Duration) -> Self {
        Self { hesitation }
    }

    /// Settle delay between the first and second check
    pub fn hesitation(&self) -> Duration {
        self.hesitation
    }

    /// Non-blocking check: everything added has completed and no producer is active
    pub fn is_settled(&self, counters: &BatchCounters) -> bool {
        counters.producers() == 0 && counters.completed() == counters.added()
    }

    /// Settled now and still settled after the hesitation delay
    pub fn is_complete(&self, counters: &BatchCounters) -> bool {
        if !self.is_settled(counters) {
            return false;
        }
        let observed = counters.added();
        std::thread::sleep(self.hesitation);
        let settled = self.is_settled(counters);
        trace!(observed, added = counters.added(), settled, "Re-checked quiescence");
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_incomplete_returns_without_waiting() {
        let detector = QuiescenceDetector::new(Duration::from_secs(5));
        let counters = BatchCounters::new();
        counters.record_added();

        let start = std::time::Instant::now();
        assert!(!detector.is_complete(&counters));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_work_added_during_hesitation_is_seen() {
        let detector = QuiescenceDetector::new(Duration::from_millis(100));
        let counters = Arc::new(BatchCounters::new());
        counters.record_added();
        counters.record_completed();

        let producer = {
            let counters = Arc::clone(&counters);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                counters.record_added();
            })
        };

        assert!(!detector.is_complete(&counters));
        producer.join().unwrap();

        counters.record_completed();
        assert!(detector.is_complete(&counters));
    }

    #[test]
    fn test_active_producer_blocks_completion() {
        let detector = QuiescenceDetector::new(Duration::from_millis(1));
        let counters = BatchCounters::new();
        counters.enter_producer();
        assert!(!detector.is_settled(&counters));

        counters.exit_producer();
        assert!(detector.is_complete(&counters));
    }
}
