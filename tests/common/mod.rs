#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use watchman_log_shipper::Config;
use watchman_log_shipper::sender::{
    ConnectionState, Connector, DecodedRecord, Endpoint, Frame, FrameReader, FrameWriter,
    TransportError, decode_batch,
};

/// What the next connect attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Accept,
    Refuse,
    Reject(u16),
}

#[derive(Default)]
pub struct Shared {
    pub attempts: AtomicU32,
    script: Mutex<VecDeque<Step>>,
    fallback: Mutex<Option<Step>>,
    pub sent: Mutex<Vec<Frame>>,
    pub auto_pong: AtomicBool,
    pub fail_sends: AtomicBool,
    pub hang: AtomicBool,
    peer: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

/// In-memory collector. Each connect consumes one scripted `Step`, falling
/// back to a fixed step once the script runs out.
#[derive(Clone)]
pub struct ScriptedConnector {
    pub shared: Arc<Shared>,
}

impl ScriptedConnector {
    pub fn new(fallback: Step) -> Self {
        let shared = Shared {
            fallback: Mutex::new(Some(fallback)),
            ..Shared::default()
        };
        shared.auto_pong.store(true, Ordering::SeqCst);
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn accepting() -> Self {
        Self::new(Step::Accept)
    }

    pub fn refusing() -> Self {
        Self::new(Step::Refuse)
    }

    pub fn script(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.shared.script.lock().extend(steps);
        self
    }

    pub fn set_fallback(&self, step: Step) {
        *self.shared.fallback.lock() = Some(step);
    }

    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn set_auto_pong(&self, enabled: bool) {
        self.shared.auto_pong.store(enabled, Ordering::SeqCst);
    }

    pub fn set_fail_sends(&self, enabled: bool) {
        self.shared.fail_sends.store(enabled, Ordering::SeqCst);
    }

    /// With `enabled`, sends and closes never complete, like a stalled peer.
    pub fn set_hang(&self, enabled: bool) {
        self.shared.hang.store(enabled, Ordering::SeqCst);
    }

    /// Delivers a frame to the client side of the current connection.
    pub fn push(&self, frame: Frame) -> bool {
        self.shared
            .peer
            .lock()
            .as_ref()
            .is_some_and(|peer| peer.send(frame).is_ok())
    }

    pub fn sent_frames(&self) -> Vec<Frame> {
        self.shared.sent.lock().clone()
    }

    pub fn ping_count(&self) -> usize {
        self.sent_frames()
            .iter()
            .filter(|frame| matches!(frame, Frame::Ping(_)))
            .count()
    }

    /// Every record carried by text frames so far, in send order.
    pub fn records(&self) -> Vec<DecodedRecord> {
        self.sent_frames()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Text(text) => Some(decode_batch(&text).expect("valid batch frame")),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl Connector for ScriptedConnector {
    type Writer = ScriptedWriter;
    type Reader = ScriptedReader;

    async fn connect(
        &self,
        _endpoint: &Endpoint,
    ) -> Result<(ScriptedWriter, ScriptedReader), TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self
            .shared
            .script
            .lock()
            .pop_front()
            .or(*self.shared.fallback.lock())
            .unwrap_or(Step::Refuse);

        match step {
            Step::Refuse => Err(TransportError::Connect("connection refused".to_string())),
            Step::Reject(status) => Err(TransportError::Rejected { status }),
            Step::Accept => {
                let (tx, rx) = mpsc::unbounded_channel();
                *self.shared.peer.lock() = Some(tx.clone());
                Ok((
                    ScriptedWriter {
                        shared: Arc::clone(&self.shared),
                        to_client: tx,
                    },
                    ScriptedReader { from_peer: rx },
                ))
            }
        }
    }
}

pub struct ScriptedWriter {
    shared: Arc<Shared>,
    to_client: mpsc::UnboundedSender<Frame>,
}

impl FrameWriter for ScriptedWriter {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.shared.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("broken pipe".to_string()));
        }
        if let Frame::Ping(payload) = &frame
            && self.shared.auto_pong.load(Ordering::SeqCst)
        {
            let _ = self.to_client.send(Frame::Pong(payload.clone()));
        }
        self.shared.sent.lock().push(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.shared.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

pub struct ScriptedReader {
    from_peer: mpsc::UnboundedReceiver<Frame>,
}

impl FrameReader for ScriptedReader {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.from_peer.recv().await.map(Ok)
    }
}

/// Valid configuration with timings short enough for tests.
pub fn test_config() -> Config {
    Config {
        server_url: "ws://collector.test/v1/logs".to_string(),
        project_id: "proj-test".to_string(),
        project_secret: "secret-test".to_string(),
        max_size: 100,
        batch_size: 10,
        batch_interval: 0.02,
        max_retries: 3,
        retry_delay: 0.01,
        initial_retry_delay: 0.01,
        max_retry_delay: 0.05,
        max_retry_attempts: 3,
        ping_interval: 0.0,
        ping_timeout: 0.0,
        connect_timeout: 1.0,
        send_timeout: 1.0,
        shutdown_timeout: 0.5,
        metrics_interval: 0.0,
        ..Config::default()
    }
}

/// Records every `(old, new)` transition it is attached to.
#[derive(Clone, Default)]
pub struct TransitionLog {
    seen: Arc<Mutex<Vec<(ConnectionState, ConnectionState)>>>,
}

impl TransitionLog {
    pub fn record(&self, old: ConnectionState, new: ConnectionState) {
        self.seen.lock().push((old, new));
    }

    pub fn all(&self) -> Vec<(ConnectionState, ConnectionState)> {
        self.seen.lock().clone()
    }
}

/// Polls `condition` until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
