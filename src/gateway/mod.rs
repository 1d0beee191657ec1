//! Gateway control connection: handshake, heartbeat, resume and reconnect.

pub mod connector;
pub mod constants;
pub mod events;
pub mod intents;
pub mod payloads;
pub mod session;
pub mod status;


pub use connector::{Connector, MessageSink, MessageStream, TungsteniteConnector};
pub use events::{DispatchedEvent, EventSink, GatewayEvent, GatewayEventType, Tee};
pub use intents::GatewayIntents;
pub use payloads::{
    Activity, GatewayCommand, OnlineStatus, PresenceUpdate, RequestGuildMembers, VoiceStateUpdate,
};
pub use session::GatewayConnection;
pub use status::ConnectionStatus;
