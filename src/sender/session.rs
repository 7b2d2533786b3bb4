//! Per-connection background work: heartbeat and inbound listener.
//!
//! Both tasks are tied to one connection generation and stop when their
//! token is cancelled. Either one reports a dead link back to the transport.

use super::connection::{Connector, Frame, FrameReader, FrameWriter};
use super::transport::Inner;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(super) struct Session {
    token: CancellationToken,
    listener: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
}

impl Session {
    pub(super) fn new(
        token: CancellationToken,
        listener: JoinHandle<()>,
        heartbeat: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            token,
            listener,
            heartbeat,
        }
    }

    pub(super) fn cancel(&self) {
        self.token.cancel();
    }

    pub(super) fn into_tasks(self) -> Vec<(&'static str, JoinHandle<()>)> {
        self.token.cancel();
        let mut tasks = vec![("listener", self.listener)];
        if let Some(heartbeat) = self.heartbeat {
            tasks.push(("heartbeat", heartbeat));
        }
        tasks
    }
}

pub(super) async fn listen<C: Connector>(
    inner: Arc<Inner<C>>,
    mut reader: C::Reader,
    generation: u64,
    token: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => return,
            frame = reader.next_frame() => frame,
        };
        match frame {
            Some(Ok(Frame::Pong(payload))) => inner.acknowledge_pong(&payload),
            Some(Ok(Frame::Text(text))) => {
                // No subscribers is fine.
                let _ = inner.inbound.send(text);
            }
            Some(Ok(Frame::Ping(_))) => {}
            Some(Ok(Frame::Close)) | None => {
                debug!("Collector closed the connection");
                Inner::on_link_failure(&inner, generation, "closed by peer").await;
                return;
            }
            Some(Err(e)) => {
                Inner::on_link_failure(&inner, generation, &e.to_string()).await;
                return;
            }
        }
    }
}

pub(super) async fn heartbeat<C: Connector>(
    inner: Arc<Inner<C>>,
    generation: u64,
    token: CancellationToken,
) {
    let ping_timeout = inner.config.ping_timeout;
    let send_timeout = inner.config.send_timeout;
    let mut ticker = interval(inner.config.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let seq = inner.next_ping();
        let sent = {
            let mut link = inner.link.lock().await;
            let Some(writer) = link.as_mut() else {
                return;
            };
            timeout(send_timeout, writer.send(Frame::Ping(seq.to_be_bytes().to_vec()))).await
        };
        if !matches!(sent, Ok(Ok(()))) {
            Inner::on_link_failure(&inner, generation, "ping could not be sent").await;
            return;
        }

        let acked = tokio::select! {
            _ = token.cancelled() => return,
            acked = timeout(ping_timeout, inner.wait_for_ack(seq)) => acked.is_ok(),
        };
        if !acked {
            warn!(timeout_ms = ping_timeout.as_millis() as u64, "No pong received");
            Inner::on_link_failure(&inner, generation, "heartbeat timeout").await;
            return;
        }
    }
}
