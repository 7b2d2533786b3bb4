use super::connection::{Connector, Endpoint, Frame, FrameWriter, TransportError};
use super::serialization::encode_batch;
use super::session::{self, Session};
use super::sink::{BatchSink, DeliveryOutcome};
use super::state::ConnectionState;
use super::websocket::WsConnector;
use crate::domain::LogEvent;
use crate::reliability::{BackoffPolicy, deadline_after};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const INBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: Endpoint,
    pub backoff: BackoffPolicy,
    /// Zero disables the heartbeat.
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl TransportConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            backoff: BackoffPolicy::default(),
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

type StateCallback = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

/// One logical connection to the collector.
///
/// Owns the connection state machine, the reconnect loop and, while
/// connected, a heartbeat and a listener task. Cloning shares the same
/// connection.
pub struct Transport<C: Connector = WsConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for Transport<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(super) struct Inner<C: Connector> {
    connector: C,
    pub(super) config: TransportConfig,
    state: watch::Sender<ConnectionState>,
    transition_lock: parking_lot::Mutex<()>,
    callbacks: parking_lot::RwLock<Vec<StateCallback>>,
    /// Held for connect attempts, sends, pings and close.
    pub(super) link: tokio::sync::Mutex<Option<C::Writer>>,
    attempts: AtomicU32,
    generation: AtomicU64,
    halt: parking_lot::Mutex<CancellationToken>,
    reconnect_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    session: parking_lot::Mutex<Option<Session>>,
    ping_seq: AtomicU64,
    last_ack: AtomicU64,
    ack: Notify,
    pub(super) inbound: broadcast::Sender<String>,
}

impl Transport<WsConnector> {
    pub fn new(config: TransportConfig) -> Self {
        Self::with_connector(config, WsConnector::new())
    }
}

impl<C: Connector> Transport<C> {
    pub fn with_connector(config: TransportConfig, connector: C) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                state,
                transition_lock: parking_lot::Mutex::new(()),
                callbacks: parking_lot::RwLock::new(Vec::new()),
                link: tokio::sync::Mutex::new(None),
                attempts: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                halt: parking_lot::Mutex::new(CancellationToken::new()),
                reconnect_task: parking_lot::Mutex::new(None),
                session: parking_lot::Mutex::new(None),
                ping_seq: AtomicU64::new(0),
                last_ack: AtomicU64::new(0),
                ack: Notify::new(),
                inbound,
            }),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Consecutive failed connect attempts since the last successful connect.
    pub fn failed_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::Acquire)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Text frames received from the collector.
    pub fn subscribe_inbound(&self) -> broadcast::Receiver<String> {
        self.inner.inbound.subscribe()
    }

    /// Registers a callback invoked with `(old, new)` on every transition.
    ///
    /// Callbacks run synchronously while the transition lock is held, so they
    /// must not call back into `connect` or `disconnect`.
    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().push(Arc::new(callback));
    }

    /// Waits until the state equals `target`. Returns `false` on timeout.
    pub async fn wait_for_state(&self, target: ConnectionState, limit: Duration) -> bool {
        let mut receiver = self.subscribe_state();
        matches!(
            timeout(limit, receiver.wait_for(|state| *state == target)).await,
            Ok(Ok(_))
        )
    }

    /// Starts connecting. Returns whether the transport is now `Connected`.
    ///
    /// A retryable failure schedules background reconnects and returns
    /// `Ok(false)`. A permanent failure moves to `Failed` and is returned.
    /// From `Failed` nothing happens until `disconnect()` resets the state.
    pub async fn connect(&self) -> Result<bool, TransportError> {
        let inner = &self.inner;
        match inner.state() {
            ConnectionState::Connected => return Ok(true),
            ConnectionState::Connecting
            | ConnectionState::Reconnecting
            | ConnectionState::Failed => return Ok(false),
            ConnectionState::Disconnected => {}
        }
        if !inner.transition(&[ConnectionState::Disconnected], ConnectionState::Connecting) {
            return Ok(inner.state() == ConnectionState::Connected);
        }

        info!(url = %inner.config.endpoint.url(), "Connecting to collector");
        match Inner::attempt(inner).await {
            Ok(()) => Ok(true),
            Err(err) => {
                if Inner::record_failure(inner, &err) {
                    Inner::spawn_reconnect(inner);
                }
                if err.is_retryable() { Ok(false) } else { Err(err) }
            }
        }
    }

    /// Tears the connection down and returns to `Disconnected`.
    ///
    /// Also resets a transport that is reconnecting or `Failed`.
    pub async fn disconnect(&self) {
        self.disconnect_until(deadline_after(self.inner.config.shutdown_timeout))
            .await;
    }

    /// `disconnect` bounded by `deadline`. Background tasks still running at
    /// the deadline are aborted and a close that has not finished is
    /// abandoned by dropping the connection.
    pub async fn disconnect_until(&self, deadline: Instant) {
        let inner = &self.inner;
        let Some(previous) = inner.force_transition(ConnectionState::Disconnected) else {
            return;
        };
        debug!(from = %previous, "Disconnecting transport");

        inner.generation.fetch_add(1, Ordering::AcqRel);
        let halted = std::mem::take(&mut *inner.halt.lock());
        halted.cancel();

        let mut tasks = Vec::new();
        if let Some(task) = inner.reconnect_task.lock().take() {
            tasks.push(("reconnect", task));
        }
        if let Some(session) = inner.session.lock().take() {
            tasks.extend(session.into_tasks());
        }

        for (name, mut task) in tasks {
            if timeout_at(deadline, &mut task).await.is_err() {
                warn!(task = name, "Transport task did not stop in time, aborting");
                task.abort();
                // Releases anything the task held, the connection lock included.
                let _ = task.await;
            }
        }

        let writer = match timeout_at(deadline, inner.link.lock()).await {
            Ok(mut link) => link.take(),
            Err(_) => {
                warn!("Connection lock still held at shutdown deadline");
                None
            }
        };
        if let Some(mut writer) = writer {
            match timeout_at(deadline, writer.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Error while closing connection"),
                Err(_) => warn!("Close did not finish by the shutdown deadline, dropping connection"),
            }
        }

        inner.attempts.store(0, Ordering::Release);
        info!("Transport disconnected");
    }

    /// Sends one batch as a single text frame. Only succeeds while `Connected`.
    pub async fn send(&self, batch: &[LogEvent]) -> bool {
        if batch.is_empty() {
            return true;
        }
        let inner = &self.inner;
        if inner.state() != ConnectionState::Connected {
            return false;
        }

        let frame = match encode_batch(batch) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, size = batch.len(), "Failed to encode batch");
                return false;
            }
        };

        let (generation, result) = {
            let mut link = inner.link.lock().await;
            let generation = inner.generation.load(Ordering::Acquire);
            let Some(writer) = link.as_mut() else {
                return false;
            };
            let result = timeout(inner.config.send_timeout, writer.send(Frame::Text(frame))).await;
            (generation, result)
        };

        match result {
            Ok(Ok(())) => {
                debug!(size = batch.len(), "Batch sent");
                true
            }
            Ok(Err(e)) => {
                Inner::on_link_failure(inner, generation, &e.to_string()).await;
                false
            }
            Err(_) => {
                Inner::on_link_failure(inner, generation, "send timed out").await;
                false
            }
        }
    }
}

impl<C: Connector> BatchSink for Transport<C> {
    async fn deliver(&self, batch: &[LogEvent]) -> DeliveryOutcome {
        if self.send(batch).await {
            DeliveryOutcome::Delivered
        } else {
            DeliveryOutcome::Rejected
        }
    }
}

impl<C: Connector> Inner<C> {
    pub(super) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Moves to `to` if the current state is one of `from`. Callbacks see
    /// transitions in the order they happen.
    fn transition(&self, from: &[ConnectionState], to: ConnectionState) -> bool {
        let _guard = self.transition_lock.lock();
        let current = self.state();
        if current == to || !from.contains(&current) {
            return false;
        }
        self.commit(current, to);
        true
    }

    /// Moves to `to` from any other state; returns the previous state.
    fn force_transition(&self, to: ConnectionState) -> Option<ConnectionState> {
        let _guard = self.transition_lock.lock();
        let current = self.state();
        if current == to {
            return None;
        }
        self.commit(current, to);
        Some(current)
    }

    fn commit(&self, old: ConnectionState, new: ConnectionState) {
        self.state.send_replace(new);
        debug!(%old, %new, "Connection state changed");

        let callbacks = self.callbacks.read().clone();
        for callback in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(old, new))).is_err() {
                error!(%old, %new, "State change callback panicked");
            }
        }
    }

    /// One connect attempt from `Connecting`. On success the state is
    /// `Connected` and a session is running.
    async fn attempt(this: &Arc<Self>) -> Result<(), TransportError> {
        let token = this.halt.lock().clone();
        let mut link = this.link.lock().await;
        if token.is_cancelled() || this.state() != ConnectionState::Connecting {
            return Err(TransportError::Closed);
        }

        let limit = this.config.connect_timeout;
        let connected = tokio::select! {
            _ = token.cancelled() => return Err(TransportError::Closed),
            result = timeout(limit, this.connector.connect(&this.config.endpoint)) => result,
        };
        let (mut writer, reader) = match connected {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(TransportError::Timeout {
                    operation: "connect",
                    timeout: limit,
                });
            }
        };

        if !this.transition(&[ConnectionState::Connecting], ConnectionState::Connected) {
            drop(link);
            let _ = writer.close().await;
            return Err(TransportError::Closed);
        }
        // Bumped before the writer is published so a send on the new link
        // never reports its failure under the previous generation.
        let generation = this.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *link = Some(writer);
        drop(link);

        this.attempts.store(0, Ordering::Release);
        info!(url = %this.config.endpoint.url(), "Connected to collector");
        Self::start_session(this, reader, generation, &token);
        Ok(())
    }

    /// Counts a failed attempt and moves out of `Connecting`. Returns `true`
    /// when another attempt should be scheduled.
    fn record_failure(&self, err: &TransportError) -> bool {
        if self.state() != ConnectionState::Connecting {
            return false;
        }
        let failures = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;

        if !err.is_retryable() {
            error!(error = %err, "Permanent connection failure");
            self.transition(&[ConnectionState::Connecting], ConnectionState::Failed);
            return false;
        }
        if self.config.backoff.is_exhausted(failures) {
            error!(error = %err, attempts = failures, "Reconnect attempts exhausted");
            self.transition(&[ConnectionState::Connecting], ConnectionState::Failed);
            return false;
        }
        warn!(error = %err, attempt = failures, "Connection attempt failed");
        self.transition(&[ConnectionState::Connecting], ConnectionState::Reconnecting)
    }

    fn spawn_reconnect(this: &Arc<Self>) {
        let token = this.halt.lock().clone();
        let task = tokio::spawn(Self::reconnect_loop(Arc::clone(this), token));
        if let Some(previous) = this.reconnect_task.lock().replace(task) {
            previous.abort();
        }
    }

    async fn reconnect_loop(this: Arc<Self>, token: CancellationToken) {
        loop {
            let attempt = this.attempts.load(Ordering::Acquire).saturating_sub(1);
            let delay = this.config.backoff.delay_for(attempt);
            debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            if !this.transition(&[ConnectionState::Reconnecting], ConnectionState::Connecting) {
                return;
            }
            match Self::attempt(&this).await {
                Ok(()) => return,
                Err(err) => {
                    if !this.record_failure(&err) {
                        return;
                    }
                }
            }
        }
    }

    fn start_session(
        this: &Arc<Self>,
        reader: C::Reader,
        generation: u64,
        parent: &CancellationToken,
    ) {
        let token = parent.child_token();
        let listener = tokio::spawn(session::listen(
            Arc::clone(this),
            reader,
            generation,
            token.clone(),
        ));
        let heartbeat = (!this.config.ping_interval.is_zero()).then(|| {
            tokio::spawn(session::heartbeat(
                Arc::clone(this),
                generation,
                token.clone(),
            ))
        });

        let fresh = Session::new(token, listener, heartbeat);
        if let Some(stale) = this.session.lock().replace(fresh) {
            stale.cancel();
        }
    }

    /// Heartbeat timeout, send error or peer close on connection
    /// `generation`. Stale generations are ignored.
    pub(super) async fn on_link_failure(this: &Arc<Self>, generation: u64, reason: &str) {
        if this.generation.load(Ordering::Acquire) != generation {
            return;
        }
        if !this.transition(&[ConnectionState::Connected], ConnectionState::Reconnecting) {
            return;
        }
        warn!(reason, "Connection lost, reconnecting");

        if let Some(session) = this.session.lock().take() {
            session.cancel();
        }
        let writer = this.link.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = timeout(this.config.send_timeout, writer.close()).await;
        }

        this.attempts.store(0, Ordering::Release);
        Self::spawn_reconnect(this);
    }

    pub(super) fn next_ping(&self) -> u64 {
        self.ping_seq.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Acknowledges pings up to the sequence number echoed in `payload`.
    /// Pongs that do not carry one of our sequence numbers are ignored.
    pub(super) fn acknowledge_pong(&self, payload: &[u8]) {
        let Ok(bytes) = <[u8; 8]>::try_from(payload) else {
            debug!(len = payload.len(), "Ignoring unsolicited pong");
            return;
        };
        let seq = u64::from_be_bytes(bytes).min(self.ping_seq.load(Ordering::Acquire));
        self.last_ack.fetch_max(seq, Ordering::AcqRel);
        self.ack.notify_waiters();
    }

    pub(super) async fn wait_for_ack(&self, seq: u64) {
        loop {
            let notified = self.ack.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.last_ack.load(Ordering::Acquire) >= seq {
                return;
            }
            notified.await;
        }
    }
}
