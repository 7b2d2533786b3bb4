use thiserror::Error;

/// Malformed dynamically-typed input handed to `Orchestrator::try_enqueue`.
///
/// Capacity and pause rejections are not errors; they surface as `Ok(false)`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnqueueError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("Message must be text, got {kind}")]
    NonTextMessage { kind: &'static str },

    #[error("Payload must be a JSON object, got {kind}")]
    InvalidPayload { kind: &'static str },
}

/// JSON type name used in error messages.
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
