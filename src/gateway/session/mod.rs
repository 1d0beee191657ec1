use futures::{SinkExt, StreamExt};
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    common::errors::GatewayError,
    configs::GatewayConfig,
    gateway::{
        ConnectionStatus, Connector, EventSink, GatewayCommand, TungsteniteConnector,
        constants::{CLOSE_NORMAL, RECONNECT_DELAY_FRESH_MS, WRITE_TASK_SHUTDOWN_MS},
    },
};

pub mod backoff;
pub mod handler;
pub mod heartbeat;
pub mod types;

use self::{
    backoff::Backoff,
    handler::SessionState,
    types::{SequenceCursor, Session, SessionOutcome, is_fatal_close, is_reidentify_close},
};

/// State shared between the handle and the run task.
struct ConnectionInner {
    config: GatewayConfig,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn EventSink>,
    status: watch::Sender<ConnectionStatus>,
    latency_nanos: AtomicU64,
    outbound: parking_lot::Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl ConnectionInner {
    fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!("Gateway status {} -> {}", previous, status);
        }
    }
}

struct RunControl {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// One control connection to the gateway.
///
/// The connection is driven by a background task started with [`open`]. The
/// task reconnects on its own after transient failures and resumes the
/// session when the remote allows it.
///
/// [`open`]: GatewayConnection::open
pub struct GatewayConnection {
    inner: Arc<ConnectionInner>,
    control: parking_lot::Mutex<Option<RunControl>>,
}

impl Drop for GatewayConnection {
    fn drop(&mut self) {
        if let Some(control) = self.control.get_mut().take() {
            control.cancel.cancel();
        }
    }
}

impl GatewayConnection {
    pub fn new(config: GatewayConfig, sink: impl EventSink) -> Self {
        Self::with_connector(config, TungsteniteConnector, sink)
    }

    pub fn with_connector(
        config: GatewayConfig,
        connector: impl Connector,
        sink: impl EventSink,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Unconnected);
        Self {
            inner: Arc::new(ConnectionInner {
                config,
                connector: Arc::new(connector),
                sink: Arc::new(sink),
                status,
                latency_nanos: AtomicU64::new(0),
                outbound: parking_lot::Mutex::new(None),
            }),
            control: parking_lot::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Round trip of the most recent acknowledged heartbeat.
    pub fn latency(&self) -> Duration {
        Duration::from_nanos(self.inner.latency_nanos.load(Ordering::Relaxed))
    }

    /// Connects and waits until the connection is ready.
    ///
    /// Returns immediately if a run task is already alive and ready. Fails
    /// when the remote rejects the handshake, when every reconnect attempt
    /// failed, or when [`close`](Self::close) is called first.
    pub async fn open(&self) -> Result<(), GatewayError> {
        let ready_rx = {
            let mut control = self.control.lock();
            match control.as_ref() {
                Some(running) if !running.handle.is_finished() => None,
                _ => {
                    let cancel = CancellationToken::new();
                    let (ready_tx, ready_rx) = oneshot::channel();
                    let runner = Runner::new(self.inner.clone(), cancel.clone(), ready_tx);
                    // Later callers must not see a stale Disconnected.
                    self.inner.set_status(ConnectionStatus::Connecting);
                    let handle = tokio::spawn(runner.run());
                    *control = Some(RunControl { cancel, handle });
                    Some(ready_rx)
                }
            }
        };

        match ready_rx {
            Some(rx) => rx.await.unwrap_or(Err(GatewayError::Shutdown)),
            None => {
                let mut status = self.subscribe_status();
                let reached = status
                    .wait_for(|s| matches!(s, ConnectionStatus::Ready | ConnectionStatus::Disconnected))
                    .await
                    .map(|s| *s);
                match reached {
                    Ok(ConnectionStatus::Ready) => Ok(()),
                    _ => Err(GatewayError::Shutdown),
                }
            }
        }
    }

    /// Closes the socket and stops reconnecting. Safe to call repeatedly.
    pub async fn close(&self) {
        let control = self.control.lock().take();
        let Some(RunControl { cancel, handle }) = control else {
            return;
        };

        cancel.cancel();
        let abort = handle.abort_handle();
        if tokio::time::timeout(Duration::from_millis(WRITE_TASK_SHUTDOWN_MS * 4), handle)
            .await
            .is_err()
        {
            warn!("Gateway run task did not stop in time; aborting");
            abort.abort();
        }
        self.inner.outbound.lock().take();
        self.inner.set_status(ConnectionStatus::Disconnected);
    }

    /// Queues a command. Fails without side effects unless the status is
    /// `WaitingForGuilds` or `Ready`.
    pub fn send(&self, command: &GatewayCommand) -> Result<(), GatewayError> {
        let status = self.status();
        if !status.is_connected() {
            return Err(GatewayError::NotConnected(status));
        }

        let msg = command.to_payload()?.to_message()?;
        let outbound = self.inner.outbound.lock();
        match outbound.as_ref() {
            Some(tx) if tx.send(msg).is_ok() => Ok(()),
            _ => Err(GatewayError::NotConnected(self.status())),
        }
    }
}

/// The run task. Owns the session and the sequence cursor.
pub(super) struct Runner {
    inner: Arc<ConnectionInner>,
    cancel: CancellationToken,
    session: Option<Session>,
    sequence: SequenceCursor,
    backoff: Backoff,
    ready_tx: Option<oneshot::Sender<Result<(), GatewayError>>>,
}

impl Runner {
    fn new(
        inner: Arc<ConnectionInner>,
        cancel: CancellationToken,
        ready_tx: oneshot::Sender<Result<(), GatewayError>>,
    ) -> Self {
        let backoff = Backoff::new(inner.config.reconnect.clone());
        Self {
            inner,
            cancel,
            session: None,
            sequence: SequenceCursor::new(),
            backoff,
            ready_tx: Some(ready_tx),
        }
    }

    async fn run(mut self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.inner.set_status(ConnectionStatus::Connecting);
            let outcome = self.connect().await;

            let delay = match outcome {
                SessionOutcome::Shutdown => {
                    debug!("Gateway shutting down cleanly");
                    break;
                }
                SessionOutcome::Fatal(e) => {
                    error!("Gateway connection failed permanently: {}", e);
                    self.finish(Err(e));
                    return;
                }
                SessionOutcome::Resume => {
                    if self.backoff.is_exhausted() {
                        self.give_up();
                        return;
                    }
                    let delay = self.backoff.next();
                    debug!(
                        "Reconnecting in {:?} (resume={})",
                        delay,
                        self.session.is_some()
                    );
                    delay
                }
                SessionOutcome::Identify => {
                    if self.backoff.is_exhausted() {
                        self.give_up();
                        return;
                    }
                    self.session = None;
                    self.sequence.reset();
                    let delay = self
                        .backoff
                        .next()
                        .max(Duration::from_millis(RECONNECT_DELAY_FRESH_MS));
                    debug!("Session invalid; identifying fresh in {:?}", delay);
                    delay
                }
            };

            self.inner.set_status(ConnectionStatus::Reconnecting);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.finish(Err(GatewayError::Shutdown));
    }

    fn give_up(&mut self) {
        let attempts = self.backoff.attempts();
        error!("Max reconnect attempts ({}) reached", attempts);
        self.finish(Err(GatewayError::ReconnectsExhausted { attempts }));
    }

    fn finish(&mut self, result: Result<(), GatewayError>) {
        self.inner.outbound.lock().take();
        self.inner.set_status(ConnectionStatus::Disconnected);
        if let Some(tx) = self.ready_tx.take() {
            let _ = tx.send(result);
        }
    }

    /// Marks the connection ready and releases a pending `open`.
    fn mark_ready(&mut self) {
        self.inner.set_status(ConnectionStatus::Ready);
        self.backoff.reset();
        if let Some(tx) = self.ready_tx.take() {
            let _ = tx.send(Ok(()));
        }
    }

    async fn connect(&mut self) -> SessionOutcome {
        let base = self
            .session
            .as_ref()
            .and_then(|s| s.resume_url.clone())
            .unwrap_or_else(|| self.inner.config.url.clone());
        let url = self.inner.config.connect_url(&base);
        debug!("Connecting to gateway: {}", url);

        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return SessionOutcome::Shutdown,
            res = self.inner.connector.connect(&url) => res,
        };
        let (mut write, mut read) = match connected {
            Ok(halves) => halves,
            Err(e) => {
                warn!("Failed to connect to gateway: {}", e);
                return SessionOutcome::Resume;
            }
        };
        self.inner.set_status(ConnectionStatus::WaitingForHello);

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.inner.outbound.lock() = Some(tx.clone());

        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    warn!("WS write error: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let cancel = self.cancel.clone();
        let zombie = CancellationToken::new();
        let mut state = SessionState::new(self, tx.clone(), zombie.clone());

        let outcome = loop {
            let guild_deadline = state.guild_deadline();
            let hello_deadline = state.hello_deadline();
            tokio::select! {
                _ = cancel.cancelled() => {
                    state.send_close(CLOSE_NORMAL, "Shutting down");
                    break SessionOutcome::Shutdown;
                }
                _ = zombie.cancelled() => {
                    state.close_for_resume();
                    break SessionOutcome::Resume;
                }
                _ = tokio::time::sleep_until(
                    guild_deadline.unwrap_or_else(tokio::time::Instant::now)
                ), if guild_deadline.is_some() => {
                    state.guild_wait_elapsed();
                }
                _ = tokio::time::sleep_until(
                    hello_deadline.unwrap_or_else(tokio::time::Instant::now)
                ), if hello_deadline.is_some() => {
                    break state.hello_wait_elapsed();
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => {
                            warn!("WS read error: {}", e);
                            break SessionOutcome::Resume;
                        }
                        None => {
                            debug!("WS stream ended");
                            break SessionOutcome::Resume;
                        }
                    };

                    match msg {
                        Message::Text(text) => {
                            if let Some(outcome) = state.handle_text(text.as_str()) {
                                break outcome;
                            }
                        }
                        Message::Close(frame) => {
                            let (code, reason) = frame
                                .map(|cf| (cf.code.into(), cf.reason.to_string()))
                                .unwrap_or((1000u16, "No reason".into()));

                            info!("WS closed: code={}, reason='{}'", code, reason);

                            if is_fatal_close(code) {
                                break SessionOutcome::Fatal(GatewayError::Closed { code, reason });
                            }
                            if is_reidentify_close(code) {
                                break SessionOutcome::Identify;
                            }
                            break SessionOutcome::Resume;
                        }
                        Message::Binary(bin) => {
                            debug!("Ignoring {} byte binary frame", bin.len());
                        }
                        _ => {}
                    }
                }
            }
        };

        drop(state);
        self.inner.outbound.lock().take();
        drop(tx);
        let abort = write_task.abort_handle();
        if tokio::time::timeout(Duration::from_millis(WRITE_TASK_SHUTDOWN_MS), write_task)
            .await
            .is_err()
        {
            abort.abort();
        }

        outcome
    }
}
