use crate::buffer::DeliveryQueue;
use crate::domain::LogEvent;
use crate::reliability::{capped_deadline, deadline_after};
use crate::sender::{BatchSink, DeliveryOutcome};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    pub batch_size: usize,
    pub batch_interval: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_interval: Duration::from_secs(1),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// What happened to one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub delivered: usize,
    pub requeued: usize,
    pub dropped: usize,
}

impl BatchResult {
    pub fn is_failure(&self) -> bool {
        self.requeued + self.dropped > 0
    }
}

/// Outcome of the shutdown drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Events delivered after `stop()` was requested.
    pub drained: usize,
    /// Events still buffered when the drain ended.
    pub residual: usize,
    pub timed_out: bool,
    /// The dispatch loop died before it could drain.
    pub loop_failed: bool,
}

struct DispatchCore<S> {
    queue: Arc<DeliveryQueue>,
    sink: Arc<S>,
    config: DispatcherConfig,
    last_batch_at: parking_lot::Mutex<Option<Instant>>,
    drain_deadline: parking_lot::Mutex<Option<Instant>>,
    drained: AtomicUsize,
    drain_timed_out: AtomicBool,
    crashed: AtomicBool,
}

/// Moves batches from the queue to a sink until stopped.
///
/// Failed events are retried one by one: each gets `retry_count + 1` and is
/// requeued until it exceeds `max_retries`, then dropped and counted.
pub struct BatchDispatcher<S: BatchSink> {
    core: Arc<DispatchCore<S>>,
    running: AtomicBool,
    cancel: parking_lot::Mutex<CancellationToken>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<S: BatchSink> BatchDispatcher<S> {
    pub fn new(queue: Arc<DeliveryQueue>, sink: Arc<S>, config: DispatcherConfig) -> Self {
        Self {
            core: Arc::new(DispatchCore {
                queue,
                sink,
                config,
                last_batch_at: parking_lot::Mutex::new(None),
                drain_deadline: parking_lot::Mutex::new(None),
                drained: AtomicUsize::new(0),
                drain_timed_out: AtomicBool::new(false),
                crashed: AtomicBool::new(false),
            }),
            running: AtomicBool::new(false),
            cancel: parking_lot::Mutex::new(CancellationToken::new()),
            handle: parking_lot::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.core.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// When the last batch was (at least partly) delivered.
    pub fn last_batch_at(&self) -> Option<Instant> {
        *self.core.last_batch_at.lock()
    }

    /// Spawns the dispatch loop. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        if self.running.swap(true, Ordering::AcqRel) {
            return false;
        }
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        *self.core.drain_deadline.lock() = None;
        self.core.drained.store(0, Ordering::Release);
        self.core.drain_timed_out.store(false, Ordering::Release);
        self.core.crashed.store(false, Ordering::Release);

        let core = Arc::clone(&self.core);
        let handle = tokio::spawn(async move {
            if AssertUnwindSafe(core.run(token)).catch_unwind().await.is_err() {
                error!("Dispatch loop panicked, delivery has stopped");
                core.crashed.store(true, Ordering::Release);
            }
        });
        *self.handle.lock() = Some(handle);
        info!(
            batch_size = self.core.config.batch_size,
            "Batch dispatcher started"
        );
        true
    }

    /// Stops the loop after draining what it can within `shutdown_timeout`.
    pub async fn stop(&self) -> DrainReport {
        self.stop_until(deadline_after(self.core.config.shutdown_timeout))
            .await
    }

    /// Stops the loop, draining until `deadline` at the latest.
    pub async fn stop_until(&self, deadline: Instant) -> DrainReport {
        if !self.running.swap(false, Ordering::AcqRel) {
            return DrainReport {
                residual: self.core.queue.len(),
                ..DrainReport::default()
            };
        }

        *self.core.drain_deadline.lock() = Some(deadline);
        self.cancel.lock().cancel();

        let handle = self.handle.lock().take();
        if let Some(mut handle) = handle {
            match timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "Dispatch loop ended abnormally");
                    self.core.crashed.store(true, Ordering::Release);
                }
                Err(_) => {
                    warn!("Dispatcher did not finish draining in time, aborting");
                    handle.abort();
                    // Wait for the cancelled loop to drop its in-flight delivery.
                    let _ = handle.await;
                    self.core.drain_timed_out.store(true, Ordering::Release);
                }
            }
        }

        let report = DrainReport {
            drained: self.core.drained.load(Ordering::Acquire),
            residual: self.core.queue.len(),
            timed_out: self.core.drain_timed_out.load(Ordering::Acquire),
            loop_failed: self.core.crashed.load(Ordering::Acquire),
        };
        info!(
            drained = report.drained,
            residual = report.residual,
            timed_out = report.timed_out,
            loop_failed = report.loop_failed,
            "Batch dispatcher stopped"
        );
        report
    }

    /// Runs one cycle by hand: wait for a batch, then deliver it.
    pub async fn run_cycle(&self) -> BatchResult {
        self.core.cycle().await
    }
}

impl<S: BatchSink> DispatchCore<S> {
    async fn run(&self, cancel: CancellationToken) {
        let interval = self.config.batch_interval;
        while !cancel.is_cancelled() {
            if self.queue.is_paused() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.queue.wait_resumed() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
                continue;
            }

            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                batch = self.queue.get_batch(self.config.batch_size, interval) => batch,
            };
            if batch.is_empty() {
                continue;
            }

            let result = self.dispatch(batch).await;
            if result.is_failure() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.retry_delay) => {}
                }
            }
        }

        self.drain().await;
    }

    async fn cycle(&self) -> BatchResult {
        let batch = self
            .queue
            .get_batch(self.config.batch_size, self.config.batch_interval)
            .await;
        if batch.is_empty() {
            return BatchResult::default();
        }
        self.dispatch(batch).await
    }

    /// Delivers what is left, ignoring the pause flag, until the queue is
    /// empty or the deadline set by `stop()` passes.
    async fn drain(&self) {
        let requested = *self.drain_deadline.lock();
        let deadline = requested.unwrap_or_else(|| deadline_after(self.config.shutdown_timeout));

        loop {
            if Instant::now() >= deadline {
                if !self.queue.is_empty() {
                    self.drain_timed_out.store(true, Ordering::Release);
                }
                return;
            }
            let batch = self.queue.try_get_batch(self.config.batch_size);
            if batch.is_empty() {
                return;
            }

            let result = self.dispatch(batch).await;
            self.drained.fetch_add(result.delivered, Ordering::AcqRel);
            if result.is_failure() {
                let wake = capped_deadline(Instant::now(), self.config.retry_delay, deadline);
                sleep_until(wake).await;
            }
        }
    }

    async fn dispatch(&self, mut batch: Vec<LogEvent>) -> BatchResult {
        let batch_id = Uuid::new_v4().to_string();
        for event in &mut batch {
            event.batch_id = Some(batch_id.clone());
        }

        let outcome = AssertUnwindSafe(self.sink.deliver(&batch))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(%batch_id, "Sink panicked while delivering batch");
                DeliveryOutcome::Rejected
            });

        let delivered = outcome.delivered_of(batch.len());
        if delivered > 0 {
            self.queue.mark_processed(delivered);
            *self.last_batch_at.lock() = Some(Instant::now());
        }

        let mut result = BatchResult {
            delivered,
            ..BatchResult::default()
        };
        for mut event in batch.into_iter().skip(delivered) {
            event.record_failed_attempt();
            if event.exceeds(self.config.max_retries) {
                result.dropped += 1;
            } else if self.queue.requeue(event) {
                result.requeued += 1;
            } else {
                result.dropped += 1;
            }
        }
        self.queue.mark_retried(result.requeued);
        self.queue.mark_failed(result.dropped);

        if result.dropped > 0 {
            warn!(
                %batch_id,
                dropped = result.dropped,
                "Dropped events after exhausting retries"
            );
        }
        debug!(
            %batch_id,
            delivered = result.delivered,
            requeued = result.requeued,
            "Batch dispatched"
        );
        result
    }
}
