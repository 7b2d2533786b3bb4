use super::connection::{Connector, Endpoint, Frame, FrameReader, FrameWriter, TransportError};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue, USER_AGENT};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tracing::debug;

const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production connector: a tokio-tungstenite client carrying the project
/// credentials as handshake headers.
#[derive(Debug, Clone)]
pub struct WsConnector {
    user_agent: String,
    max_message_size: usize,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            user_agent: format!("watchman-log-shipper/{}", env!("CARGO_PKG_VERSION")),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl WsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    fn request(
        &self,
        endpoint: &Endpoint,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, TransportError> {
        let mut request = endpoint
            .url()
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        let headers = request.headers_mut();
        for (name, value) in [
            ("x-project-id", endpoint.project_id()),
            ("x-project-secret", endpoint.project_secret()),
        ] {
            let value = HeaderValue::from_str(value)
                .map_err(|_| TransportError::InvalidRequest(format!("invalid {name} header")))?;
            headers.insert(HeaderName::from_static(name), value);
        }
        let agent = HeaderValue::from_str(&self.user_agent)
            .map_err(|_| TransportError::InvalidRequest("invalid user-agent".to_string()))?;
        headers.insert(USER_AGENT, agent);
        Ok(request)
    }
}

fn map_connect_error(err: WsError) -> TransportError {
    match err {
        WsError::Http(response) => TransportError::Rejected {
            status: response.status().as_u16(),
        },
        WsError::Url(e) => TransportError::InvalidRequest(e.to_string()),
        other => TransportError::Connect(other.to_string()),
    }
}

impl Connector for WsConnector {
    type Writer = WsWriter;
    type Reader = WsReader;

    async fn connect(&self, endpoint: &Endpoint) -> Result<(WsWriter, WsReader), TransportError> {
        let request = self.request(endpoint)?;

        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);

        let (stream, response) = connect_async_with_config(request, Some(config), true)
            .await
            .map_err(map_connect_error)?;
        debug!(status = %response.status(), url = %endpoint.url(), "WebSocket handshake complete");

        let (sink, stream) = stream.split();
        Ok((WsWriter { sink }, WsReader { stream }))
    }
}

pub struct WsWriter {
    sink: SplitSink<WsStream, Message>,
}

impl FrameWriter for WsWriter {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Ping(payload) => Message::Ping(payload),
            Frame::Pong(payload) => Message::Pong(payload),
            Frame::Close => Message::Close(None),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Send(e.to_string())),
        }
    }
}

pub struct WsReader {
    stream: SplitStream<WsStream>,
}

impl FrameReader for WsReader {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(WsError::ConnectionClosed) => return None,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            };
            let frame = match message {
                Message::Text(text) => Frame::Text(text),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => Frame::Text(text),
                    Err(_) => {
                        debug!("Ignoring non-UTF-8 binary frame");
                        continue;
                    }
                },
                Message::Ping(payload) => Frame::Ping(payload),
                Message::Pong(payload) => Frame::Pong(payload),
                Message::Close(_) => Frame::Close,
                Message::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_credentials() {
        let endpoint = Endpoint::new("ws://127.0.0.1:9/logs", "proj-1", "s3cret").unwrap();
        let request = WsConnector::new().request(&endpoint).unwrap();
        let headers = request.headers();
        assert_eq!(headers["x-project-id"], "proj-1");
        assert_eq!(headers["x-project-secret"], "s3cret");
        assert!(
            headers[USER_AGENT]
                .to_str()
                .unwrap()
                .starts_with("watchman-log-shipper/")
        );
    }

    #[test]
    fn credential_with_newline_is_invalid_request() {
        let endpoint = Endpoint::new("ws://127.0.0.1:9/logs", "proj", "bad\nsecret").unwrap();
        let err = WsConnector::new().request(&endpoint).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_retryable() {
        let endpoint = Endpoint::new("ws://127.0.0.1:9/logs", "p", "s").unwrap();
        let err = WsConnector::new().connect(&endpoint).await.err().unwrap();
        assert!(err.is_retryable(), "{err}");
    }
}
