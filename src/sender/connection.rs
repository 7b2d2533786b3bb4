//! The seam between the connection state machine and the network.
//!
//! `Transport` only talks to a [`Connector`] and the writer/reader halves it
//! hands back, so tests can script outages without a real socket.

use super::serialization::SerializationError;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid handshake request: {0}")]
    InvalidRequest(String),
    #[error("Handshake rejected with HTTP status {status}")]
    Rejected { status: u16 },
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Receive failed: {0}")]
    Receive(String),
    #[error("Connection closed")]
    Closed,
    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),
}

impl TransportError {
    /// Whether another connect attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::InvalidUrl(_)
            | TransportError::InvalidRequest(_)
            | TransportError::Serialization(_) => false,
            TransportError::Rejected { status } => !matches!(status, 401 | 403),
            _ => true,
        }
    }
}

/// One WebSocket-level frame as seen by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Validated collector address plus the credentials sent on handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
    project_id: String,
    project_secret: String,
}

impl Endpoint {
    pub fn new(
        url: &str,
        project_id: impl Into<String>,
        project_secret: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let parsed =
            Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("'{url}': {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl(format!(
                "'{url}': scheme must be ws or wss"
            )));
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(TransportError::InvalidUrl(format!("'{url}': missing host")));
        }
        Ok(Self {
            url: parsed,
            project_id: project_id.into(),
            project_secret: project_secret.into(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn project_secret(&self) -> &str {
        &self.project_secret
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url.as_str())
            .field("project_id", &self.project_id)
            .field("project_secret", &"<redacted>")
            .finish()
    }
}

pub trait FrameWriter: Send + 'static {
    fn send(&mut self, frame: Frame) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

pub trait FrameReader: Send + 'static {
    /// `None` once the peer is gone.
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<Frame, TransportError>>> + Send;
}

/// Opens one connection and splits it into writer and reader halves.
pub trait Connector: Send + Sync + 'static {
    type Writer: FrameWriter;
    type Reader: FrameReader;

    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<(Self::Writer, Self::Reader), TransportError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_accepts_ws_and_wss() {
        assert!(Endpoint::new("ws://localhost:8080/logs", "p", "s").is_ok());
        assert!(Endpoint::new("wss://api.example.com/v1/logs", "p", "s").is_ok());
    }

    #[test]
    fn endpoint_rejects_other_schemes_and_garbage() {
        for url in ["http://example.com", "https://example.com", "not a url", "ws://"] {
            let err = Endpoint::new(url, "p", "s").unwrap_err();
            assert!(matches!(err, TransportError::InvalidUrl(_)), "{url}");
        }
    }

    #[test]
    fn debug_output_redacts_secret() {
        let endpoint = Endpoint::new("ws://localhost/logs", "proj", "hunter2").unwrap();
        let rendered = format!("{endpoint:?}");
        assert!(rendered.contains("proj"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn auth_rejection_is_permanent() {
        assert!(!TransportError::Rejected { status: 401 }.is_retryable());
        assert!(!TransportError::Rejected { status: 403 }.is_retryable());
        assert!(TransportError::Rejected { status: 503 }.is_retryable());
        assert!(TransportError::Connect("refused".into()).is_retryable());
    }
}
