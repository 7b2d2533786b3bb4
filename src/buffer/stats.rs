use serde::Serialize;

/// Point-in-time view of the queue counters.
///
/// Counters are monotonic; `depth` is the buffer length at snapshot time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub rejected: u64,
    pub depth: usize,
}

impl QueueStats {
    /// Fraction of finished events that were delivered. `1.0` before any outcome.
    pub fn success_rate(&self) -> f64 {
        let finished = self.processed + self.failed;
        if finished == 0 {
            return 1.0;
        }
        self.processed as f64 / finished as f64
    }
}

/// Mutable counter block kept under the queue's state lock.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub total_enqueued: u64,
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub rejected: u64,
}

impl Counters {
    pub fn snapshot(&self, depth: usize) -> QueueStats {
        QueueStats {
            total_enqueued: self.total_enqueued,
            processed: self.processed,
            failed: self.failed,
            retried: self.retried,
            rejected: self.rejected,
            depth,
        }
    }
}
