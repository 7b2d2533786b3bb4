use crate::buffer::QueueStats;
use crate::sender::ConnectionState;
use chrono::{DateTime, Utc};
#[cfg(feature = "metrics")]
use prometheus::{IntGauge, Registry};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[cfg(feature = "metrics")]
    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
    #[error("Metrics reporter already running")]
    AlreadyRunning,
}

/// Connection counters, fed from the transport's state-change callback.
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    state: parking_lot::Mutex<ConnectionCounters>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionCounters {
    pub state_changes: u64,
    pub connect_attempts: u64,
    pub successful_connects: u64,
    pub connection_losses: u64,
    pub failures: u64,
    pub last_transition_at: Option<DateTime<Utc>>,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, old: ConnectionState, new: ConnectionState) {
        let mut counters = self.state.lock();
        counters.state_changes += 1;
        counters.last_transition_at = Some(Utc::now());
        match new {
            ConnectionState::Connecting => counters.connect_attempts += 1,
            ConnectionState::Connected => counters.successful_connects += 1,
            ConnectionState::Reconnecting if old == ConnectionState::Connected => {
                counters.connection_losses += 1;
            }
            ConnectionState::Failed => counters.failures += 1,
            _ => {}
        }
    }

    pub fn snapshot(&self) -> ConnectionCounters {
        *self.state.lock()
    }
}

/// Everything the reporter publishes on one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub captured_at: DateTime<Utc>,
    pub connection_state: ConnectionState,
    pub queue: QueueStats,
    pub connection: ConnectionCounters,
    pub success_rate: f64,
}

impl MetricsSnapshot {
    pub fn new(
        connection_state: ConnectionState,
        queue: QueueStats,
        connection: ConnectionCounters,
    ) -> Self {
        Self {
            captured_at: Utc::now(),
            connection_state,
            success_rate: queue.success_rate(),
            queue,
            connection,
        }
    }
}

/// Receives periodic snapshots. Implementations must not block.
#[cfg_attr(test, mockall::automock)]
pub trait MetricsSink: Send + Sync {
    fn record(&self, snapshot: &MetricsSnapshot);
}

/// Writes each snapshot as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&self, snapshot: &MetricsSnapshot) {
        info!(
            state = %snapshot.connection_state,
            depth = snapshot.queue.depth,
            enqueued = snapshot.queue.total_enqueued,
            processed = snapshot.queue.processed,
            failed = snapshot.queue.failed,
            retried = snapshot.queue.retried,
            rejected = snapshot.queue.rejected,
            reconnects = snapshot.connection.connection_losses,
            success_rate = snapshot.success_rate,
            "Shipper metrics"
        );
    }
}

/// Periodically pushes snapshots from `source` into a sink.
pub struct MetricsReporter {
    sink: Arc<dyn MetricsSink>,
    interval: Duration,
    running: parking_lot::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl MetricsReporter {
    pub fn new(sink: Arc<dyn MetricsSink>, interval: Duration) -> Self {
        Self {
            sink,
            interval,
            running: parking_lot::Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn start<F>(&self, source: F) -> Result<(), MetricsError>
    where
        F: Fn() -> MetricsSnapshot + Send + Sync + 'static,
    {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(MetricsError::AlreadyRunning);
        }

        let token = CancellationToken::new();
        let cancel = token.clone();
        let sink = Arc::clone(&self.sink);
        let period = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => sink.record(&source()),
                }
            }
            // Final snapshot so the last interval is not lost.
            sink.record(&source());
        });
        *running = Some((token, handle));
        Ok(())
    }

    /// Returns `false` if the reporting task panicked.
    pub async fn stop(&self) -> bool {
        let Some((token, handle)) = self.running.lock().take() else {
            return true;
        };
        token.cancel();
        handle.await.is_ok()
    }
}

/// Exposes snapshots as gauges on a Prometheus registry.
#[cfg(feature = "metrics")]
pub struct PrometheusSink {
    registry: Registry,
    queue_depth: IntGauge,
    enqueued: IntGauge,
    processed: IntGauge,
    failed: IntGauge,
    retried: IntGauge,
    rejected: IntGauge,
    connection_state: IntGauge,
    connection_losses: IntGauge,
}

#[cfg(feature = "metrics")]
impl PrometheusSink {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let gauge = |name: &str, help: &str| -> Result<IntGauge, MetricsError> {
            let gauge = IntGauge::new(name, help)?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };

        Ok(Self {
            queue_depth: gauge("watchman_queue_depth", "Events currently buffered")?,
            enqueued: gauge("watchman_events_enqueued", "Events accepted by the queue")?,
            processed: gauge("watchman_events_processed", "Events delivered")?,
            failed: gauge("watchman_events_failed", "Events dropped after retries")?,
            retried: gauge("watchman_events_retried", "Events requeued for retry")?,
            rejected: gauge("watchman_events_rejected", "Events refused at enqueue")?,
            connection_state: gauge(
                "watchman_connection_state",
                "0=disconnected 1=connecting 2=connected 3=reconnecting 4=failed",
            )?,
            connection_losses: gauge("watchman_connection_losses", "Connections lost")?,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(feature = "metrics")]
impl MetricsSink for PrometheusSink {
    fn record(&self, snapshot: &MetricsSnapshot) {
        let queue = &snapshot.queue;
        self.queue_depth.set(queue.depth as i64);
        self.enqueued.set(queue.total_enqueued as i64);
        self.processed.set(queue.processed as i64);
        self.failed.set(queue.failed as i64);
        self.retried.set(queue.retried as i64);
        self.rejected.set(queue.rejected as i64);
        self.connection_state.set(snapshot.connection_state.code());
        self.connection_losses
            .set(snapshot.connection.connection_losses as i64);
    }
}
