use thiserror::Error;

/// Top-level error type for embedding applications that want a single error.
#[derive(Error, Debug)]
pub enum ShipperError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::app::ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::sender::TransportError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] crate::app::OrchestratorError),

    #[error("Rejected record: {0}")]
    Enqueue(#[from] crate::buffer::EnqueueError),

    #[error("Logging setup error: {0}")]
    Logging(#[from] crate::app::LoggingError),
}
