use super::config::{Config, ConfigError};
use super::dispatcher::{BatchDispatcher, DrainReport};
use crate::buffer::error::json_kind;
use crate::buffer::{DeliveryQueue, EnqueueError, QueueStats};
use crate::domain::{LogEvent, Payload, Severity};
use crate::reliability::{
    ConnectionMetrics, MetricsReporter, MetricsSink, MetricsSnapshot, deadline_after,
};
use crate::sender::{ConnectionState, Connector, Transport, TransportError, WsConnector};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result of `Orchestrator::stop`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShutdownReport {
    pub drain: DrainReport,
    /// Events discarded from the queue after the drain.
    pub cleared: usize,
    pub errors: Vec<String>,
}

/// Wires queue, transport and dispatcher together and couples transport
/// health to queue acceptance: the queue only accepts new events while the
/// transport is `Connected`.
pub struct Orchestrator<C: Connector = WsConnector> {
    queue: Arc<DeliveryQueue>,
    transport: Arc<Transport<C>>,
    dispatcher: BatchDispatcher<Transport<C>>,
    connection_metrics: Arc<ConnectionMetrics>,
    reporter: Option<MetricsReporter>,
    running: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
}

impl Orchestrator<WsConnector> {
    pub fn new(config: &Config) -> Result<Self, OrchestratorError> {
        Self::with_connector(config, WsConnector::new())
    }
}

impl<C: Connector> Orchestrator<C> {
    pub fn with_connector(config: &Config, connector: C) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let queue = Arc::new(DeliveryQueue::new_paused(config.queue_capacity()));
        let transport = Arc::new(Transport::with_connector(
            config.transport_config()?,
            connector,
        ));

        let gate = Arc::clone(&queue);
        transport.on_state_change(move |_, new| match new {
            ConnectionState::Connected => gate.resume(),
            ConnectionState::Disconnected
            | ConnectionState::Reconnecting
            | ConnectionState::Failed => gate.pause(),
            ConnectionState::Connecting => {}
        });

        let connection_metrics = Arc::new(ConnectionMetrics::new());
        let observer = Arc::clone(&connection_metrics);
        transport.on_state_change(move |old, new| observer.observe(old, new));

        let dispatcher = BatchDispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&transport),
            config.dispatcher_config(),
        );

        Ok(Self {
            queue,
            transport,
            dispatcher,
            connection_metrics,
            reporter: None,
            running: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    /// Publishes a snapshot to `sink` every `interval` while running.
    /// A zero interval disables reporting.
    pub fn with_metrics_sink(
        mut self,
        sink: Arc<dyn MetricsSink>,
        interval: std::time::Duration,
    ) -> Self {
        self.reporter = (!interval.is_zero()).then(|| MetricsReporter::new(sink, interval));
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn is_queue_paused(&self) -> bool {
        self.queue.is_paused()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn transport(&self) -> &Transport<C> {
        &self.transport
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::new(
            self.transport.state(),
            self.queue.stats(),
            self.connection_metrics.snapshot(),
        )
    }

    /// Connects and starts background work.
    ///
    /// A connect attempt that fails transiently is not an error: the
    /// transport keeps reconnecting and the queue stays paused meanwhile.
    pub async fn start(&self) -> Result<(), OrchestratorError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_running() {
            return Ok(());
        }

        if self.transport.state() == ConnectionState::Failed {
            info!("Resetting failed transport before restart");
            self.transport.disconnect().await;
        }
        match self.transport.connect().await {
            Ok(true) => {}
            Ok(false) => warn!(
                state = %self.transport.state(),
                "Collector not reachable yet, continuing in the background"
            ),
            Err(e) => return Err(e.into()),
        }

        self.dispatcher.start();
        if let Some(reporter) = &self.reporter {
            let queue = Arc::clone(&self.queue);
            let transport = Arc::clone(&self.transport);
            let metrics = Arc::clone(&self.connection_metrics);
            let started = reporter.start(move || {
                MetricsSnapshot::new(transport.state(), queue.stats(), metrics.snapshot())
            });
            if let Err(e) = started {
                warn!(error = %e, "Metrics reporter not started");
            }
        }

        self.running.store(true, Ordering::Release);
        info!("Log shipper started");
        Ok(())
    }

    /// Stops everything in order: pause the queue, drain the dispatcher,
    /// stop reporting, disconnect, then clear what is left.
    ///
    /// The drain and the disconnect share one `shutdown_timeout` deadline.
    pub async fn stop(&self) -> ShutdownReport {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.running.swap(false, Ordering::AcqRel) {
            return ShutdownReport::default();
        }
        info!("Stopping log shipper");
        let deadline = deadline_after(self.dispatcher.config().shutdown_timeout);

        let mut report = ShutdownReport::default();
        self.queue.pause();

        report.drain = self.dispatcher.stop_until(deadline).await;
        if report.drain.timed_out {
            report.errors.push(format!(
                "drain timed out with {} events left",
                report.drain.residual
            ));
        }
        if report.drain.loop_failed {
            report
                .errors
                .push("dispatch loop ended abnormally".to_string());
        }

        if let Some(reporter) = &self.reporter
            && !reporter.stop().await
        {
            report
                .errors
                .push("metrics reporter ended abnormally".to_string());
        }

        self.transport.disconnect_until(deadline).await;
        let state = self.transport.state();
        if state != ConnectionState::Disconnected {
            report
                .errors
                .push(format!("transport ended in state {state}"));
        }

        report.cleared = self.queue.clear();
        info!(
            drained = report.drain.drained,
            cleared = report.cleared,
            "Log shipper stopped"
        );
        report
    }

    /// Queues one record. Returns `false` when not running, paused or full.
    pub fn enqueue(
        &self,
        level: Severity,
        message: impl Into<String>,
        payload: Option<Payload>,
    ) -> bool {
        if !self.is_running() {
            return false;
        }
        self.queue
            .put(LogEvent::new(level, message).with_payload(payload))
    }

    /// `enqueue` for dynamically typed input. Malformed input is an error;
    /// capacity and pause still surface as `Ok(false)`.
    pub fn try_enqueue(
        &self,
        level: &str,
        message: Value,
        payload: Option<Value>,
    ) -> Result<bool, EnqueueError> {
        let level: Severity = level
            .parse()
            .map_err(|_| EnqueueError::InvalidLevel(level.to_string()))?;
        let message = match message {
            Value::String(text) => text,
            other => {
                return Err(EnqueueError::NonTextMessage {
                    kind: json_kind(&other),
                });
            }
        };
        let payload = match payload {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(other) => {
                return Err(EnqueueError::InvalidPayload {
                    kind: json_kind(&other),
                });
            }
        };
        Ok(self.enqueue(level, message, payload))
    }
}
