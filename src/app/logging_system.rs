use super::config::{LogFormat, LogLevel};
use parking_lot::RwLock;
use std::sync::OnceLock;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoggingError {
    #[error("Invalid log directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },
    #[error("Failed to build log filter '{filter}': {reason}")]
    FilterFailed { filter: String, reason: String },
    #[error("Failed to install global subscriber: {0}")]
    InstallFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LogDirective {
    target: String,
    level: LogLevel,
}

impl LogDirective {
    fn parse(directive: &str) -> Result<Self, LoggingError> {
        let invalid = |reason: &str| LoggingError::InvalidDirective {
            directive: directive.to_string(),
            reason: reason.to_string(),
        };
        let (target, level) = directive
            .split_once('=')
            .ok_or_else(|| invalid("expected target=level"))?;
        let target = target.trim();
        if target.is_empty() {
            return Err(invalid("empty target"));
        }
        let level = level
            .trim()
            .parse::<LogLevel>()
            .map_err(|e| invalid(&e))?;
        Ok(Self {
            target: target.to_string(),
            level,
        })
    }

    fn to_filter_string(&self) -> String {
        format!("{}={}", self.target, self.level.as_str())
    }
}

/// Builds the `tracing` filter for the shipper's own diagnostics and
/// installs the global subscriber.
pub struct LoggingSystem {
    directives: RwLock<Vec<LogDirective>>,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: RwLock::new(Vec::new()),
        }
    }

    /// Adds a `target=level` directive.
    pub fn add_directive(&self, directive: &str) -> Result<(), LoggingError> {
        let parsed = LogDirective::parse(directive)?;
        self.directives.write().push(parsed);
        Ok(())
    }

    /// Quietens the WebSocket stack, which is chatty at debug level.
    pub fn add_default_directives(&self) {
        let mut directives = self.directives.write();
        for target in ["tungstenite", "tokio_tungstenite", "rustls"] {
            directives.push(LogDirective {
                target: target.to_string(),
                level: LogLevel::Warn,
            });
        }
    }

    pub fn directive_count(&self) -> usize {
        self.directives.read().len()
    }

    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let directives = self.directives.read();
        let mut parts = Vec::with_capacity(directives.len() + 1);
        parts.push(default_level.as_str().to_string());
        parts.extend(directives.iter().map(LogDirective::to_filter_string));
        parts.join(",")
    }

    pub fn initialize_tracing(
        &self,
        default_level: LogLevel,
        format: LogFormat,
    ) -> Result<(), LoggingError> {
        let filter = self.build_filter_string(default_level);
        let env_filter = EnvFilter::try_new(&filter).map_err(|e| LoggingError::FilterFailed {
            filter: filter.clone(),
            reason: e.to_string(),
        })?;

        let registry = tracing_subscriber::registry().with(env_filter);
        let installed = match format {
            LogFormat::Compact => tracing::subscriber::set_global_default(
                registry.with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .compact(),
                ),
            ),
            LogFormat::Json => tracing::subscriber::set_global_default(
                registry.with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .json()
                        .with_current_span(false),
                ),
            ),
        };
        installed.map_err(|e| LoggingError::InstallFailed(e.to_string()))
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the global subscriber once per process; later calls return the
/// first outcome.
pub fn setup_logging(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    static INIT: OnceLock<Result<(), LoggingError>> = OnceLock::new();
    INIT.get_or_init(|| {
        let system = LoggingSystem::new();
        system.add_default_directives();
        system.initialize_tracing(level, format)
    })
    .clone()
}
