use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::Serialize;
use serde_json::json;
use tokio::{
    net::UdpSocket,
    sync::{Mutex, mpsc::UnboundedSender},
};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info};

use crate::{
    common::{errors::VoiceError, types::GuildId},
    voice::{
        SpeakingFlags,
        constants::OP_SPEAKING,
        udp::{UdpTransport, VoiceTransport, discover_ip},
    },
};

/// Body of a voice op 5 update.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Speaking {
    pub speaking: SpeakingFlags,
    pub delay: u32,
    pub ssrc: u32,
}

/// Carries speaking updates to the voice control socket.
pub trait VoiceSignaling: Send + Sync + 'static {
    fn send_speaking(&self, speaking: &Speaking) -> Result<(), VoiceError>;
}

/// Writes `{"op":5,"d":...}` to the voice control socket's writer queue.
impl VoiceSignaling for UnboundedSender<Message> {
    fn send_speaking(&self, speaking: &Speaking) -> Result<(), VoiceError> {
        let payload = json!({ "op": OP_SPEAKING, "d": speaking });
        self.send(Message::Text(serde_json::to_string(&payload)?.into()))
            .map_err(|_| VoiceError::Signaling("voice control socket is gone".into()))
    }
}

/// One active voice-channel membership.
pub struct VoiceSession {
    guild_id: GuildId,
    ssrc: u32,
    signaling: Box<dyn VoiceSignaling>,
    transport: Mutex<Box<dyn VoiceTransport>>,
    /// Last flags put on the wire; `None` until the first update.
    speaking: parking_lot::Mutex<Option<SpeakingFlags>>,
    open: AtomicBool,
}

impl VoiceSession {
    pub fn new(
        guild_id: GuildId,
        ssrc: u32,
        signaling: impl VoiceSignaling,
        transport: impl VoiceTransport,
    ) -> Self {
        Self {
            guild_id,
            ssrc,
            signaling: Box::new(signaling),
            transport: Mutex::new(Box::new(transport)),
            speaking: parking_lot::Mutex::new(None),
            open: AtomicBool::new(true),
        }
    }

    /// Binds a UDP socket and runs IP discovery against `server_addr`.
    ///
    /// Returns the session and the external address to announce in
    /// Select Protocol.
    pub async fn open_udp(
        guild_id: GuildId,
        ssrc: u32,
        server_addr: SocketAddr,
        signaling: impl VoiceSignaling,
    ) -> Result<(Arc<Self>, SocketAddr), VoiceError> {
        let bind_addr = if server_addr.is_ipv6() {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        };
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        let external = discover_ip(&socket, server_addr, ssrc).await?;
        info!(
            "[{}] Voice UDP ready: server={}, external={}",
            guild_id, server_addr, external
        );

        let transport = UdpTransport::new(socket, server_addr, ssrc);
        Ok((
            Arc::new(Self::new(guild_id, ssrc, signaling, transport)),
            external,
        ))
    }

    pub fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Flags most recently signaled; empty before the first update.
    pub fn speaking_flags(&self) -> SpeakingFlags {
        (*self.speaking.lock()).unwrap_or_default()
    }

    /// Signals a speaking change. Repeating the current flags is a no-op.
    pub fn speaking(&self, flags: SpeakingFlags) -> Result<(), VoiceError> {
        let mut current = self.speaking.lock();
        if *current == Some(flags) {
            return Ok(());
        }
        self.signaling.send_speaking(&Speaking {
            speaking: flags,
            delay: 0,
            ssrc: self.ssrc,
        })?;
        debug!("[{}] Speaking set to {:?}", self.guild_id, flags);
        *current = Some(flags);
        Ok(())
    }

    /// Writes one encoded frame to the transport.
    pub async fn write_frame(&self, frame: &[u8]) -> Result<(), VoiceError> {
        if !self.is_open() {
            return Err(VoiceError::Closed);
        }
        self.transport.lock().await.send(frame).await
    }

    pub async fn close(&self) -> Result<(), VoiceError> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("[{}] Closing voice session", self.guild_id);
        self.transport.lock().await.close().await
    }
}
