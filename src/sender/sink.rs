use crate::domain::LogEvent;
use std::future::Future;

/// Result of handing one batch to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Rejected,
    /// The first `n` events were delivered; the rest were not.
    Partial(usize),
}

impl DeliveryOutcome {
    /// Number of events from a batch of `len` confirmed delivered.
    pub fn delivered_of(self, len: usize) -> usize {
        match self {
            DeliveryOutcome::Delivered => len,
            DeliveryOutcome::Rejected => 0,
            DeliveryOutcome::Partial(n) => n.min(len),
        }
    }
}

/// Destination the dispatcher hands batches to.
pub trait BatchSink: Send + Sync + 'static {
    fn deliver(&self, batch: &[LogEvent]) -> impl Future<Output = DeliveryOutcome> + Send;
}
