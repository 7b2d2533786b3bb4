pub mod config;
pub mod dispatcher;
pub mod logger;
pub mod logging_system;
pub mod orchestrator;
pub mod shutdown;

pub use config::{Config, ConfigError, LogFormat, LogLevel};
pub use dispatcher::{BatchDispatcher, BatchResult, DispatcherConfig, DrainReport};
pub use logger::Logger;
pub use logging_system::{LoggingError, LoggingSystem, setup_logging};
pub use orchestrator::{Orchestrator, OrchestratorError, ShutdownReport};
pub use shutdown::{ShutdownSignal, wait_for_signal};

use crate::buffer::EnqueueError;
use crate::reliability::TracingSink;
use crate::sender::Connector;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// Counts for one run of the line pump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpSummary {
    pub lines: u64,
    pub accepted: u64,
    pub refused: u64,
    pub malformed: u64,
}

/// Parses one input line. A JSON object supplies `level`, `message` and
/// `payload`; anything else is shipped verbatim at the logger's minimum
/// level.
fn ship_line<C: Connector>(logger: &Logger<C>, line: &str) -> Result<bool, EnqueueError> {
    if let Ok(Value::Object(mut record)) = serde_json::from_str::<Value>(line) {
        let level = match record.remove("level") {
            Some(Value::String(level)) => level,
            Some(other) => other.to_string(),
            None => logger.min_level().name().to_string(),
        };
        let message = record.remove("message").unwrap_or(Value::Null);
        let payload = record.remove("payload");
        return logger.log_value(&level, message, payload);
    }
    Ok(logger.log(logger.min_level(), line, None))
}

/// Ships every line from `input` until EOF.
pub async fn pump_lines<C, R>(logger: &Logger<C>, input: R) -> std::io::Result<PumpSummary>
where
    C: Connector,
    R: AsyncBufRead + Unpin,
{
    let mut summary = PumpSummary::default();
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        summary.lines += 1;
        match ship_line(logger, line) {
            Ok(true) => summary.accepted += 1,
            Ok(false) => {
                summary.refused += 1;
                debug!("Record not accepted (filtered, paused or queue full)");
            }
            Err(e) => {
                summary.malformed += 1;
                warn!(error = %e, "Skipping malformed record");
            }
        }
    }
    Ok(summary)
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

// Main entry point for the application
pub async fn main() -> anyhow::Result<()> {
    let config = Config::from_args(std::env::args_os())?;
    setup_logging(config.log_level, config.log_format)?;

    info!("Starting watchman-ship v{}", get_version());
    info!(
        "Configuration: server_url={}, batch_size={}, queue_size={}",
        config.server_url, config.batch_size, config.max_size
    );

    let orchestrator = Arc::new(
        Orchestrator::new(&config)?
            .with_metrics_sink(Arc::new(TracingSink), config.metrics_interval()),
    );
    orchestrator.start().await?;
    let logger = Logger::new(Arc::clone(&orchestrator), config.min_level);

    let pumped = tokio::select! {
        summary = pump_lines(&logger, BufReader::new(tokio::io::stdin())) => Some(summary),
        _ = wait_for_signal() => None,
    };

    let report = orchestrator.stop().await;
    match pumped {
        Some(Ok(summary)) => info!(
            lines = summary.lines,
            accepted = summary.accepted,
            refused = summary.refused,
            malformed = summary.malformed,
            "Input exhausted"
        ),
        Some(Err(e)) => warn!(error = %e, "Reading input failed"),
        None => {}
    }
    for error in &report.errors {
        warn!("Shutdown: {}", error);
    }
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
