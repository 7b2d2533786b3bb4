mod common;

use common::{TransitionLog, eventually};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use watchman_log_shipper::domain::{LogEvent, Severity};
use watchman_log_shipper::sender::{
    ConnectionState, Endpoint, Transport, TransportConfig, TransportError, decode_batch,
};

const SECRET: &str = "collector-secret";

#[derive(Debug)]
struct Handshake {
    path: String,
    project_id: String,
    project_secret: String,
    user_agent: String,
}

struct Collector {
    addr: SocketAddr,
    handshakes: mpsc::UnboundedReceiver<Handshake>,
    frames: mpsc::UnboundedReceiver<String>,
    server: JoinHandle<()>,
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Spawns a collector that checks `x-project-secret`, records text frames
/// and answers pings. With `hang_up` it closes every connection right after
/// the handshake.
async fn spawn_collector(hang_up: bool) -> Collector {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (handshake_tx, handshakes) = mpsc::unbounded_channel();
    let (frame_tx, frames) = mpsc::unbounded_channel();

    let server = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let handshake_tx = handshake_tx.clone();
            let frame_tx = frame_tx.clone();
            tokio::spawn(async move {
                let callback = move |req: &Request, resp: Response| {
                    let header = |name: &str| {
                        req.headers()
                            .get(name)
                            .and_then(|value| value.to_str().ok())
                            .unwrap_or_default()
                            .to_string()
                    };
                    let seen = Handshake {
                        path: req.uri().path().to_string(),
                        project_id: header("x-project-id"),
                        project_secret: header("x-project-secret"),
                        user_agent: header("user-agent"),
                    };
                    let authorized = seen.project_secret == SECRET;
                    let _ = handshake_tx.send(seen);
                    if authorized {
                        Ok(resp)
                    } else {
                        let rejection: ErrorResponse = Response::builder()
                            .status(StatusCode::UNAUTHORIZED)
                            .body(Some("bad credentials".to_string()))
                            .unwrap();
                        Err(rejection)
                    }
                };

                let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
                    return;
                };
                if hang_up {
                    let _ = ws.close(None).await;
                    return;
                }
                while let Some(Ok(message)) = ws.next().await {
                    match message {
                        Message::Text(text) => {
                            let _ = frame_tx.send(text);
                        }
                        Message::Ping(payload) => {
                            let _ = ws.send(Message::Pong(payload)).await;
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            });
        }
    });

    Collector {
        addr,
        handshakes,
        frames,
        server,
    }
}

fn config_for(addr: SocketAddr, secret: &str) -> TransportConfig {
    let endpoint = Endpoint::new(&format!("ws://{addr}/v1/logs"), "proj-ws", secret).unwrap();
    let mut config = TransportConfig::new(endpoint);
    config.ping_interval = Duration::ZERO;
    config.connect_timeout = Duration::from_secs(2);
    config.shutdown_timeout = Duration::from_secs(1);
    config.backoff.initial_delay = Duration::from_millis(20);
    config.backoff.max_delay = Duration::from_millis(50);
    config.backoff.max_attempts = Some(3);
    config
}

#[tokio::test(flavor = "multi_thread")]
async fn test_handshake_carries_credentials() {
    let mut collector = spawn_collector(false).await;
    let transport = Transport::new(config_for(collector.addr, SECRET));

    assert!(transport.connect().await.unwrap());
    let handshake = tokio::time::timeout(Duration::from_secs(2), collector.handshakes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handshake.path, "/v1/logs");
    assert_eq!(handshake.project_id, "proj-ws");
    assert_eq!(handshake.project_secret, SECRET);
    assert!(handshake.user_agent.starts_with("watchman-log-shipper/"));

    transport.disconnect().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_batch_arrives_as_one_text_frame() {
    let mut collector = spawn_collector(false).await;
    let transport = Transport::new(config_for(collector.addr, SECRET));
    assert!(transport.connect().await.unwrap());

    let payload = serde_json::json!({"host": "web-1"}).as_object().cloned();
    let batch = vec![
        LogEvent::new(Severity::Info, "service started"),
        LogEvent::new(Severity::Warning, "slow query").with_payload(payload),
        LogEvent::new(Severity::Critical, "out of memory"),
    ];
    assert!(transport.send(&batch).await);

    let frame = tokio::time::timeout(Duration::from_secs(2), collector.frames.recv())
        .await
        .unwrap()
        .unwrap();
    let records = decode_batch(&frame).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].message, "service started");
    assert_eq!(records[1].payload["host"], "web-1");
    assert!(records[0].payload.is_empty());
    assert_eq!(records[2].level, Severity::Critical);
    assert!(records.iter().all(|r| r.metadata.retry_count == 0));

    transport.disconnect().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wrong_secret_is_rejected_permanently() {
    let collector = spawn_collector(false).await;
    let transport = Transport::new(config_for(collector.addr, "wrong-secret"));

    let err = transport.connect().await.unwrap_err();
    assert!(
        matches!(err, TransportError::Rejected { status: 401 }),
        "{err}"
    );
    assert!(!err.is_retryable());
    assert_eq!(transport.state(), ConnectionState::Failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_heartbeat_against_live_collector() {
    let collector = spawn_collector(false).await;
    let mut config = config_for(collector.addr, SECRET);
    config.ping_interval = Duration::from_millis(30);
    config.ping_timeout = Duration::from_millis(500);
    let transport = Transport::new(config);
    assert!(transport.connect().await.unwrap());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(transport.state(), ConnectionState::Connected);

    transport.disconnect().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_hang_up_triggers_reconnect() {
    let collector = spawn_collector(true).await;
    let transport = Transport::new(config_for(collector.addr, SECRET));
    let log = TransitionLog::default();
    let recorder = log.clone();
    transport.on_state_change(move |old, new| recorder.record(old, new));

    assert!(transport.connect().await.unwrap());
    assert!(
        eventually(Duration::from_secs(2), || {
            log.all()
                .contains(&(ConnectionState::Connected, ConnectionState::Reconnecting))
        })
        .await
    );

    transport.disconnect().await;
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_port_fails_after_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = Transport::new(config_for(addr, SECRET));
    assert!(!transport.connect().await.unwrap());
    assert!(
        transport
            .wait_for_state(ConnectionState::Failed, Duration::from_secs(3))
            .await
    );
    assert_eq!(transport.failed_attempts(), 3);
}
