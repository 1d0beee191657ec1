/// How far along a gateway connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    #[default]
    Unconnected,
    Connecting,
    Reconnecting,
    Identifying,
    WaitingForHello,
    WaitingForReady,
    WaitingForGuilds,
    Ready,
    Disconnected,
    Resuming,
}

impl ConnectionStatus {
    pub const ALL: [ConnectionStatus; 10] = [
        Self::Unconnected,
        Self::Connecting,
        Self::Reconnecting,
        Self::Identifying,
        Self::WaitingForHello,
        Self::WaitingForReady,
        Self::WaitingForGuilds,
        Self::Ready,
        Self::Disconnected,
        Self::Resuming,
    ];

    /// Whether application commands may be sent in this state.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::WaitingForGuilds | Self::Ready)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
