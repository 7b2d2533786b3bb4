use super::orchestrator::Orchestrator;
use crate::buffer::EnqueueError;
use crate::domain::{Payload, Severity};
use crate::sender::{Connector, WsConnector};
use serde_json::Value;
use std::sync::Arc;

/// Call-site handle for emitting records.
///
/// Every method returns whether the record was accepted. Records below
/// `min_level` are filtered here and report `false`, as do records refused
/// by a paused or full queue.
pub struct Logger<C: Connector = WsConnector> {
    orchestrator: Arc<Orchestrator<C>>,
    min_level: Severity,
}

impl<C: Connector> Clone for Logger<C> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            min_level: self.min_level,
        }
    }
}

impl<C: Connector> Logger<C> {
    pub fn new(orchestrator: Arc<Orchestrator<C>>, min_level: Severity) -> Self {
        Self {
            orchestrator,
            min_level,
        }
    }

    pub fn min_level(&self) -> Severity {
        self.min_level
    }

    pub fn enabled(&self, level: Severity) -> bool {
        level >= self.min_level
    }

    pub fn log(&self, level: Severity, message: impl Into<String>, payload: Option<Payload>) -> bool {
        self.enabled(level) && self.orchestrator.enqueue(level, message, payload)
    }

    /// Accepts untyped input such as a decoded JSON line.
    pub fn log_value(
        &self,
        level: &str,
        message: Value,
        payload: Option<Value>,
    ) -> Result<bool, EnqueueError> {
        let severity: Severity = level
            .parse()
            .map_err(|_| EnqueueError::InvalidLevel(level.to_string()))?;
        if !self.enabled(severity) {
            return Ok(false);
        }
        self.orchestrator.try_enqueue(level, message, payload)
    }

    pub fn debug(&self, message: impl Into<String>) -> bool {
        self.log(Severity::Debug, message, None)
    }

    pub fn info(&self, message: impl Into<String>) -> bool {
        self.log(Severity::Info, message, None)
    }

    pub fn success(&self, message: impl Into<String>) -> bool {
        self.log(Severity::Success, message, None)
    }

    pub fn warning(&self, message: impl Into<String>) -> bool {
        self.log(Severity::Warning, message, None)
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.log(Severity::Error, message, None)
    }

    pub fn failure(&self, message: impl Into<String>) -> bool {
        self.log(Severity::Failure, message, None)
    }

    pub fn critical(&self, message: impl Into<String>) -> bool {
        self.log(Severity::Critical, message, None)
    }
}
