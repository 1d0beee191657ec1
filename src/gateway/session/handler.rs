use std::{collections::HashSet, sync::Arc, sync::atomic::Ordering, time::Duration};

use serde_json::value::RawValue;
use tokio::{sync::mpsc::UnboundedSender, time::Instant};
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    Runner,
    heartbeat::{HeartbeatMonitor, spawn_heartbeat},
    types::{Session, SessionOutcome},
};
use crate::{
    common::types::GuildId,
    gateway::{
        ConnectionStatus, GatewayEventType,
        constants::{CLOSE_NORMAL, CLOSE_RESUME, DEFAULT_HEARTBEAT_INTERVAL_MS, HELLO_TIMEOUT_MS},
        events::{GuildCreateEvent, ReadyEvent},
        payloads::{GatewayPayload, Hello, Identify, InboundFrame, Opcode, Resume},
    },
};

/// Per-socket protocol state. Lives for one websocket connection.
pub(super) struct SessionState<'a> {
    runner: &'a mut Runner,
    tx: UnboundedSender<Message>,
    zombie: CancellationToken,
    monitor: Arc<HeartbeatMonitor>,
    heartbeat_handle: Option<tokio::task::JoinHandle<()>>,
    pending_guilds: HashSet<GuildId>,
    guild_deadline: Option<Instant>,
    hello_deadline: Option<Instant>,
}

impl<'a> SessionState<'a> {
    pub(super) fn new(
        runner: &'a mut Runner,
        tx: UnboundedSender<Message>,
        zombie: CancellationToken,
    ) -> Self {
        Self {
            runner,
            tx,
            zombie,
            monitor: Arc::new(HeartbeatMonitor::default()),
            heartbeat_handle: None,
            pending_guilds: HashSet::new(),
            guild_deadline: None,
            hello_deadline: Some(Instant::now() + Duration::from_millis(HELLO_TIMEOUT_MS)),
        }
    }

    pub(super) fn guild_deadline(&self) -> Option<Instant> {
        self.guild_deadline
    }

    pub(super) fn hello_deadline(&self) -> Option<Instant> {
        self.hello_deadline
    }

    /// The socket opened but the remote never said Hello.
    pub(super) fn hello_wait_elapsed(&mut self) -> SessionOutcome {
        warn!("No Hello within {}ms; reconnecting", HELLO_TIMEOUT_MS);
        self.hello_deadline = None;
        self.close_for_resume();
        SessionOutcome::Resume
    }

    pub(super) fn handle_text(&mut self, text: &str) -> Option<SessionOutcome> {
        let frame: InboundFrame<'_> = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to parse gateway payload: {} - Text: {}", e, text);
                return None;
            }
        };

        match Opcode::from_u8(frame.op) {
            Some(Opcode::Dispatch) => self.handle_dispatch(frame),
            Some(Opcode::Heartbeat) => {
                self.send_heartbeat();
                None
            }
            Some(Opcode::Reconnect) => {
                info!("Gateway requested a reconnect");
                self.close_for_resume();
                Some(SessionOutcome::Resume)
            }
            Some(Opcode::InvalidSession) => self.handle_invalid_session(frame.d),
            Some(Opcode::Hello) => self.handle_hello(frame.d),
            Some(Opcode::HeartbeatAck) => self.handle_heartbeat_ack(),
            _ => {
                debug!("Received unexpected gateway op {}", frame.op);
                None
            }
        }
    }

    fn handle_dispatch(&mut self, frame: InboundFrame<'_>) -> Option<SessionOutcome> {
        let Some(seq) = frame.s else {
            warn!("Dispatch {:?} arrived without a sequence number", frame.t);
            return None;
        };
        if !self.runner.sequence.advance(seq) {
            debug!(
                "Dropping stale dispatch seq {} (last {:?})",
                seq,
                self.runner.sequence.get()
            );
            return None;
        }

        let event_type = GatewayEventType::from(frame.t.as_deref().unwrap_or_default());
        let payload = frame.d.unwrap_or(RawValue::NULL);

        // The sink sees every dispatch before the state machine reacts to it.
        self.runner.inner.sink.dispatch(&event_type, seq, payload);

        match event_type {
            GatewayEventType::Ready => self.handle_ready(payload),
            GatewayEventType::Resumed => {
                info!("Gateway session resumed at seq {}", seq);
                self.runner.mark_ready();
            }
            GatewayEventType::GuildCreate => self.handle_guild_create(payload),
            _ => {}
        }
        None
    }

    fn handle_hello(&mut self, d: Option<&RawValue>) -> Option<SessionOutcome> {
        let interval = d
            .and_then(|d| serde_json::from_str::<Hello>(d.get()).ok())
            .map(|h| h.heartbeat_interval)
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
        self.hello_deadline = None;
        if let Some(h) = self.heartbeat_handle.take() {
            h.abort();
        }

        debug!("Heartbeat interval set to {}ms", interval);
        self.heartbeat_handle = Some(spawn_heartbeat(
            self.tx.clone(),
            self.runner.sequence.clone(),
            self.monitor.clone(),
            Duration::from_millis(interval),
            self.runner.inner.config.max_missed_heartbeats,
            self.zombie.clone(),
        ));

        if self.runner.session.is_some() && self.runner.sequence.get().is_none() {
            warn!("Session has no sequence to resume from; identifying fresh");
            self.runner.session = None;
        }

        match (self.runner.session.clone(), self.runner.sequence.get()) {
            (Some(session), Some(seq)) => {
                self.runner.inner.set_status(ConnectionStatus::Resuming);
                let resume = Resume {
                    token: self.runner.inner.config.token.clone(),
                    session_id: session.id.0,
                    seq,
                };
                debug!("Resuming session at seq {}", seq);
                self.send_payload(GatewayPayload::new(Opcode::Resume, &resume));
            }
            _ => {
                self.runner.inner.set_status(ConnectionStatus::Identifying);
                let identify = Identify::from_config(&self.runner.inner.config);
                self.send_payload(GatewayPayload::new(Opcode::Identify, &identify));
                self.runner.inner.set_status(ConnectionStatus::WaitingForReady);
            }
        }
        None
    }

    fn handle_ready(&mut self, payload: &RawValue) {
        let ready: ReadyEvent = match serde_json::from_str(payload.get()) {
            Ok(r) => r,
            Err(e) => {
                warn!("Failed to parse READY: {}", e);
                return;
            }
        };

        info!(
            "Gateway ready: session {}, {} guilds",
            ready.session_id,
            ready.guilds.len()
        );
        self.runner.session = Some(Session {
            id: ready.session_id,
            resume_url: ready.resume_gateway_url,
        });

        self.pending_guilds = ready.guilds.into_iter().map(|g| g.id).collect();
        if self.pending_guilds.is_empty() {
            self.runner.mark_ready();
        } else {
            self.runner.inner.set_status(ConnectionStatus::WaitingForGuilds);
            self.guild_deadline = Some(Instant::now() + self.runner.inner.config.guild_ready_timeout());
        }
    }

    fn handle_guild_create(&mut self, payload: &RawValue) {
        if self.guild_deadline.is_none() {
            return;
        }
        match serde_json::from_str::<GuildCreateEvent>(payload.get()) {
            Ok(guild) => {
                if self.pending_guilds.remove(&guild.id) && self.pending_guilds.is_empty() {
                    debug!("All guilds received");
                    self.guild_deadline = None;
                    self.runner.mark_ready();
                }
            }
            Err(e) => warn!("Failed to parse GUILD_CREATE: {}", e),
        }
    }

    /// Gives up on the guilds still missing from READY.
    pub(super) fn guild_wait_elapsed(&mut self) {
        warn!(
            "Timed out waiting for {} guilds; marking ready",
            self.pending_guilds.len()
        );
        self.pending_guilds.clear();
        self.guild_deadline = None;
        self.runner.mark_ready();
    }

    fn handle_invalid_session(&mut self, d: Option<&RawValue>) -> Option<SessionOutcome> {
        let resumable = d
            .and_then(|d| serde_json::from_str::<bool>(d.get()).ok())
            .unwrap_or(false);
        info!("Gateway invalidated the session (resumable={})", resumable);

        if resumable {
            self.close_for_resume();
            Some(SessionOutcome::Resume)
        } else {
            self.send_close(CLOSE_NORMAL, "Session invalidated");
            Some(SessionOutcome::Identify)
        }
    }

    fn handle_heartbeat_ack(&self) -> Option<SessionOutcome> {
        if let Some(latency) = self.monitor.acknowledge() {
            self.runner
                .inner
                .latency_nanos
                .store(latency.as_nanos() as u64, Ordering::Relaxed);
        }
        None
    }

    fn send_heartbeat(&self) {
        let payload = GatewayPayload::heartbeat(self.runner.sequence.get());
        self.monitor.mark_sent();
        self.send_payload(Ok(payload));
    }

    /// Closes with a non-1000 code so the session stays resumable.
    pub(super) fn close_for_resume(&self) {
        self.send_close(CLOSE_RESUME, "Reconnecting");
    }

    pub(super) fn send_close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        })));
    }

    fn send_payload(&self, payload: Result<GatewayPayload, serde_json::Error>) {
        match payload.and_then(|p| p.to_message()) {
            Ok(msg) => {
                let _ = self.tx.send(msg);
            }
            Err(e) => warn!("Failed to encode gateway payload: {}", e),
        }
    }
}

impl<'a> Drop for SessionState<'a> {
    fn drop(&mut self) {
        if let Some(h) = self.heartbeat_handle.take() {
            h.abort();
        }
    }
}
