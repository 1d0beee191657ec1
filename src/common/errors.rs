use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::gateway::ConnectionStatus;

/// Errors surfaced by a [`GatewayConnection`](crate::gateway::GatewayConnection).
///
/// Transient transport failures never leave the connection's run task; they
/// only reach a caller of `open` when every reconnect attempt was used up.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A command was issued while the connection cannot carry it.
    #[error("gateway is not connected (status: {0:?})")]
    NotConnected(ConnectionStatus),

    #[error("websocket error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The remote closed the socket with a code that forbids reconnecting.
    #[error("gateway closed the connection: code={code}, reason='{reason}'")]
    Closed { code: u16, reason: String },

    #[error("gave up after {attempts} reconnect attempts")]
    ReconnectsExhausted { attempts: u32 },

    /// `close` was called before the connection became ready.
    #[error("gateway connection was shut down")]
    Shutdown,
}

/// Errors surfaced by a [`VoiceSession`](crate::voice::VoiceSession).
#[derive(Debug, Error)]
pub enum VoiceError {
    /// The session's transport was already closed.
    #[error("voice transport is closed")]
    Closed,

    #[error("udp error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to signal speaking state: {0}")]
    Signaling(String),

    #[error("ip discovery failed: {0}")]
    Discovery(String),

    #[error("failed to seal packet: {0}")]
    Seal(String),
}
