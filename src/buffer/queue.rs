use super::stats::{Counters, QueueStats};
use crate::domain::LogEvent;
use crate::reliability::deadline_after;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueState {
    paused: bool,
    counters: Counters,
}

/// Bounded buffer between synchronous producers and the async dispatcher.
///
/// `put` never blocks: it returns `false` when the queue is paused or full.
/// The pause flag and counters share one lock, the events another; callers
/// always take them in that order.
pub struct DeliveryQueue {
    max_size: usize,
    state: Mutex<QueueState>,
    buffer: Mutex<VecDeque<LogEvent>>,
    available: Notify,
    resumed: Notify,
}

impl DeliveryQueue {
    /// `max_size == 0` means unbounded.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            state: Mutex::new(QueueState::default()),
            buffer: Mutex::new(VecDeque::with_capacity(max_size.min(4096))),
            available: Notify::new(),
            resumed: Notify::new(),
        }
    }

    /// Starts in the paused state, as the orchestrator does before the
    /// transport reports `Connected`.
    pub fn new_paused(max_size: usize) -> Self {
        let queue = Self::new(max_size);
        queue.state.lock().paused = true;
        queue
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    fn has_room(&self, len: usize) -> bool {
        self.max_size == 0 || len < self.max_size
    }

    /// Adds a fresh event. Returns `false` if paused or at capacity.
    pub fn put(&self, event: LogEvent) -> bool {
        let mut state = self.state.lock();
        if state.paused {
            state.counters.rejected += 1;
            return false;
        }

        let mut buffer = self.buffer.lock();
        if !self.has_room(buffer.len()) {
            state.counters.rejected += 1;
            return false;
        }
        buffer.push_back(event);
        state.counters.total_enqueued += 1;
        drop(buffer);
        drop(state);

        self.available.notify_waiters();
        true
    }

    /// Puts a failed event back for another attempt.
    ///
    /// Ignores the pause flag so retries survive an outage; still bounded by
    /// capacity. The dispatcher does not pull while the queue is paused.
    pub fn requeue(&self, event: LogEvent) -> bool {
        let state = self.state.lock();
        let mut buffer = self.buffer.lock();
        if !self.has_room(buffer.len()) {
            return false;
        }
        buffer.push_back(event);
        drop(buffer);
        drop(state);

        self.available.notify_waiters();
        true
    }

    /// Removes up to `max` events without waiting.
    pub fn try_get_batch(&self, max: usize) -> Vec<LogEvent> {
        let mut buffer = self.buffer.lock();
        let take = max.min(buffer.len());
        buffer.drain(..take).collect()
    }

    /// Waits until `max` events are buffered or `max_wait` elapses, then
    /// returns whatever is there, never more than `max`.
    pub async fn get_batch(&self, max: usize, max_wait: Duration) -> Vec<LogEvent> {
        if max == 0 {
            return Vec::new();
        }

        let deadline = deadline_after(max_wait);
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking so a put between the check and the
            // await is not missed.
            notified.as_mut().enable();

            if self.buffer.lock().len() >= max {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        self.try_get_batch(max)
    }

    pub fn pause(&self) {
        self.state.lock().paused = true;
    }

    pub fn resume(&self) {
        self.state.lock().paused = false;
        self.resumed.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Completes once the queue is not paused.
    pub async fn wait_resumed(&self) {
        loop {
            let notified = self.resumed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_paused() {
                return;
            }
            notified.await;
        }
    }

    /// Drops everything buffered and returns how many events were discarded.
    pub fn clear(&self) -> usize {
        let mut buffer = self.buffer.lock();
        let discarded = buffer.len();
        buffer.clear();
        discarded
    }

    pub fn mark_processed(&self, n: usize) {
        self.state.lock().counters.processed += n as u64;
    }

    pub fn mark_failed(&self, n: usize) {
        self.state.lock().counters.failed += n as u64;
    }

    pub fn mark_retried(&self, n: usize) {
        self.state.lock().counters.retried += n as u64;
    }

    /// Consistent snapshot: counters and depth are read under both locks.
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        let depth = self.buffer.lock().len();
        state.counters.snapshot(depth)
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("max_size", &self.max_size)
            .field("len", &self.len())
            .field("paused", &self.is_paused())
            .finish()
    }
}
