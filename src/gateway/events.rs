use serde::{Deserialize, de::DeserializeOwned};
use serde_json::value::RawValue;
use tokio::sync::mpsc::UnboundedSender;

use crate::common::types::{GuildId, SessionId};

macro_rules! event_types {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Dispatch event names (`t`) known to this crate.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum GatewayEventType {
            $($variant,)*
            Unknown(String),
        }

        impl GatewayEventType {
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $name,)*
                    Self::Unknown(name) => name,
                }
            }
        }

        impl From<&str> for GatewayEventType {
            fn from(name: &str) -> Self {
                match name {
                    $($name => Self::$variant,)*
                    other => Self::Unknown(other.to_string()),
                }
            }
        }
    };
}

event_types! {
    Ready => "READY",
    Resumed => "RESUMED",
    GuildCreate => "GUILD_CREATE",
    GuildUpdate => "GUILD_UPDATE",
    GuildDelete => "GUILD_DELETE",
    GuildMemberAdd => "GUILD_MEMBER_ADD",
    GuildMemberUpdate => "GUILD_MEMBER_UPDATE",
    GuildMemberRemove => "GUILD_MEMBER_REMOVE",
    GuildMembersChunk => "GUILD_MEMBERS_CHUNK",
    GuildRoleCreate => "GUILD_ROLE_CREATE",
    GuildRoleUpdate => "GUILD_ROLE_UPDATE",
    GuildRoleDelete => "GUILD_ROLE_DELETE",
    GuildStickersUpdate => "GUILD_STICKERS_UPDATE",
    ChannelCreate => "CHANNEL_CREATE",
    ChannelUpdate => "CHANNEL_UPDATE",
    ChannelDelete => "CHANNEL_DELETE",
    MessageCreate => "MESSAGE_CREATE",
    MessageUpdate => "MESSAGE_UPDATE",
    MessageDelete => "MESSAGE_DELETE",
    MessageReactionAdd => "MESSAGE_REACTION_ADD",
    MessageReactionRemove => "MESSAGE_REACTION_REMOVE",
    InteractionCreate => "INTERACTION_CREATE",
    PresenceUpdate => "PRESENCE_UPDATE",
    TypingStart => "TYPING_START",
    VoiceStateUpdate => "VOICE_STATE_UPDATE",
    VoiceServerUpdate => "VOICE_SERVER_UPDATE",
}

impl std::fmt::Display for GatewayEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UnavailableGuild {
    pub id: GuildId,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ReadyEvent {
    #[serde(rename = "v", default)]
    pub version: u8,
    pub session_id: SessionId,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}

/// The fields of GUILD_CREATE the connection itself needs.
#[derive(Deserialize, Debug, Clone)]
pub struct GuildCreateEvent {
    pub id: GuildId,
    #[serde(default)]
    pub unavailable: Option<bool>,
    #[serde(default)]
    pub member_count: Option<u64>,
    #[serde(default)]
    pub large: Option<bool>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoiceServerUpdateEvent {
    pub token: String,
    pub guild_id: GuildId,
    pub endpoint: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VoiceStateEvent {
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub channel_id: Option<String>,
    pub user_id: String,
    pub session_id: String,
}

/// A decoded dispatch. Kinds without a struct here stay raw.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Ready(ReadyEvent),
    Resumed,
    GuildCreate(GuildCreateEvent),
    GuildDelete(UnavailableGuild),
    VoiceServerUpdate(VoiceServerUpdateEvent),
    VoiceStateUpdate(VoiceStateEvent),
    Raw {
        event_type: GatewayEventType,
        payload: Box<RawValue>,
    },
}

impl GatewayEvent {
    pub fn decode(
        event_type: &GatewayEventType,
        payload: &RawValue,
    ) -> Result<Self, serde_json::Error> {
        let json = payload.get();
        Ok(match event_type {
            GatewayEventType::Ready => Self::Ready(serde_json::from_str(json)?),
            GatewayEventType::Resumed => Self::Resumed,
            GatewayEventType::GuildCreate => Self::GuildCreate(serde_json::from_str(json)?),
            GatewayEventType::GuildDelete => Self::GuildDelete(serde_json::from_str(json)?),
            GatewayEventType::VoiceServerUpdate => {
                Self::VoiceServerUpdate(serde_json::from_str(json)?)
            }
            GatewayEventType::VoiceStateUpdate => {
                Self::VoiceStateUpdate(serde_json::from_str(json)?)
            }
            other => Self::Raw {
                event_type: other.clone(),
                payload: payload.to_owned(),
            },
        })
    }
}

/// Receives every dispatch, in arrival order, before the connection acts on it.
///
/// Called from the connection's read loop; implementations must not block.
pub trait EventSink: Send + Sync + 'static {
    fn dispatch(&self, event_type: &GatewayEventType, sequence: u64, payload: &RawValue);
}

/// An owned copy of one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchedEvent {
    pub event_type: GatewayEventType,
    pub sequence: u64,
    pub payload: Box<RawValue>,
}

impl DispatchedEvent {
    pub fn decode(&self) -> Result<GatewayEvent, serde_json::Error> {
        GatewayEvent::decode(&self.event_type, &self.payload)
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.payload.get())
    }
}

impl EventSink for UnboundedSender<DispatchedEvent> {
    fn dispatch(&self, event_type: &GatewayEventType, sequence: u64, payload: &RawValue) {
        let _ = self.send(DispatchedEvent {
            event_type: event_type.clone(),
            sequence,
            payload: payload.to_owned(),
        });
    }
}

impl<F> EventSink for F
where
    F: Fn(&GatewayEventType, u64, &RawValue) + Send + Sync + 'static,
{
    fn dispatch(&self, event_type: &GatewayEventType, sequence: u64, payload: &RawValue) {
        self(event_type, sequence, payload)
    }
}

/// Forwards each dispatch to two sinks, `.0` first.
pub struct Tee<A, B>(pub A, pub B);

impl<A: EventSink, B: EventSink> EventSink for Tee<A, B> {
    fn dispatch(&self, event_type: &GatewayEventType, sequence: u64, payload: &RawValue) {
        self.0.dispatch(event_type, sequence, payload);
        self.1.dispatch(event_type, sequence, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> Box<RawValue> {
        RawValue::from_string(json.to_string()).unwrap()
    }

    #[test]
    fn event_names_round_trip() {
        assert_eq!(GatewayEventType::from("READY"), GatewayEventType::Ready);
        assert_eq!(GatewayEventType::MessageCreate.as_str(), "MESSAGE_CREATE");
        let unknown = GatewayEventType::from("ENTITLEMENT_CREATE");
        assert_eq!(
            unknown,
            GatewayEventType::Unknown("ENTITLEMENT_CREATE".into())
        );
        assert_eq!(unknown.to_string(), "ENTITLEMENT_CREATE");
    }

    #[test]
    fn decodes_ready() {
        let payload = raw(
            r#"{"v":10,"session_id":"abc","resume_gateway_url":"wss://resume.example",
                "guilds":[{"id":"1","unavailable":true},{"id":"2","unavailable":true}],
                "user":{"id":"9"}}"#,
        );
        let GatewayEvent::Ready(ready) =
            GatewayEvent::decode(&GatewayEventType::Ready, &payload).unwrap()
        else {
            panic!("expected READY");
        };
        assert_eq!(ready.session_id.0, "abc");
        assert_eq!(ready.resume_gateway_url.as_deref(), Some("wss://resume.example"));
        assert_eq!(ready.guilds.len(), 2);
        assert!(ready.guilds[0].unavailable);
    }

    #[test]
    fn unknown_kinds_stay_raw() {
        let payload = raw(r#"{"content":"hello"}"#);
        match GatewayEvent::decode(&GatewayEventType::MessageCreate, &payload).unwrap() {
            GatewayEvent::Raw { event_type, payload } => {
                assert_eq!(event_type, GatewayEventType::MessageCreate);
                assert_eq!(payload.get(), r#"{"content":"hello"}"#);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn tee_feeds_both_sinks_in_order() {
        let (tx_a, mut rx_a) = tokio::sync::mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = tokio::sync::mpsc::unbounded_channel();
        let tee = Tee(tx_a, tx_b);

        tee.dispatch(&GatewayEventType::TypingStart, 1, &raw("{}"));
        tee.dispatch(&GatewayEventType::TypingStart, 2, &raw("{}"));

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.try_recv().unwrap().sequence, 1);
            assert_eq!(rx.try_recv().unwrap().sequence, 2);
        }
    }

    #[test]
    fn closures_are_sinks() {
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            move |event_type: &GatewayEventType, sequence: u64, _: &RawValue| {
                seen.lock().push((event_type.clone(), sequence));
            }
        };
        let tee = Tee(sink, |_: &GatewayEventType, _: u64, _: &RawValue| {});

        tee.dispatch(&GatewayEventType::GuildCreate, 4, &raw("{}"));
        assert_eq!(*seen.lock(), vec![(GatewayEventType::GuildCreate, 4)]);
    }

    #[test]
    fn voice_server_update_parses() {
        let event = DispatchedEvent {
            event_type: GatewayEventType::VoiceServerUpdate,
            sequence: 3,
            payload: raw(r#"{"token":"t","guild_id":"41771983423143937","endpoint":"smart.loyal.discord.gg"}"#),
        };
        let parsed: VoiceServerUpdateEvent = event.parse().unwrap();
        assert_eq!(parsed.endpoint.as_deref(), Some("smart.loyal.discord.gg"));
        assert!(matches!(event.decode().unwrap(), GatewayEvent::VoiceServerUpdate(_)));
    }
}
