use super::log_level::Severity;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Structured extra data attached to a record; serialized as a JSON object.
pub type Payload = Map<String, Value>;

/// One log record plus its delivery metadata.
///
/// Created when the caller logs and then owned by exactly one pipeline stage
/// at a time (queue, dispatcher, back to the queue on retry).
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub level: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Option<Payload>,
    pub retry_count: u32,
    pub batch_id: Option<String>,
}

impl LogEvent {
    pub fn new(level: Severity, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
            payload: None,
            retry_count: 0,
            batch_id: None,
        }
    }

    pub fn with_payload(mut self, payload: Option<Payload>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Bumps the retry counter after a failed delivery and returns the new value.
    pub fn record_failed_attempt(&mut self) -> u32 {
        self.retry_count = self.retry_count.saturating_add(1);
        self.retry_count
    }

    /// True once the record has used up its retry budget.
    pub fn exceeds(&self, max_retries: u32) -> bool {
        self.retry_count > max_retries
    }
}
