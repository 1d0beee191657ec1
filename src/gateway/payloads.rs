use serde::{Deserialize, Serialize};
use serde_json::{Value, value::RawValue};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::{common::types::GuildId, configs::GatewayConfig, gateway::GatewayIntents};

/// Gateway opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    PresenceUpdate = 3,
    VoiceStateUpdate = 4,
    Resume = 6,
    Reconnect = 7,
    RequestGuildMembers = 8,
    InvalidSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
}

impl Opcode {
    pub fn from_u8(op: u8) -> Option<Self> {
        Some(match op {
            0 => Self::Dispatch,
            1 => Self::Heartbeat,
            2 => Self::Identify,
            3 => Self::PresenceUpdate,
            4 => Self::VoiceStateUpdate,
            6 => Self::Resume,
            7 => Self::Reconnect,
            8 => Self::RequestGuildMembers,
            9 => Self::InvalidSession,
            10 => Self::Hello,
            11 => Self::HeartbeatAck,
            _ => return None,
        })
    }
}

/// Outbound `{op, d}` envelope.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GatewayPayload {
    pub op: u8,
    pub d: Value,
}

impl GatewayPayload {
    pub fn new<T: Serialize>(op: Opcode, d: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            op: op as u8,
            d: serde_json::to_value(d)?,
        })
    }

    pub fn heartbeat(sequence: Option<u64>) -> Self {
        Self {
            op: Opcode::Heartbeat as u8,
            d: sequence.map(Value::from).unwrap_or(Value::Null),
        }
    }

    pub fn to_message(&self) -> Result<Message, serde_json::Error> {
        Ok(Message::Text(serde_json::to_string(self)?.into()))
    }
}

/// Inbound envelope with the `d` field left unparsed.
#[derive(Deserialize, Debug)]
pub struct InboundFrame<'a> {
    pub op: u8,
    #[serde(borrow, default)]
    pub d: Option<&'a RawValue>,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Serialize, Debug, Clone)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct Identify {
    pub token: String,
    pub intents: GatewayIntents,
    pub properties: IdentifyProperties,
    pub large_threshold: u32,
}

impl Identify {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            token: config.token.clone(),
            intents: config.intents,
            properties: IdentifyProperties {
                os: config.os.clone(),
                browser: config.browser.clone(),
                device: config.device.clone(),
            },
            large_threshold: config.large_threshold,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OnlineStatus {
    Online,
    Dnd,
    Idle,
    Invisible,
    Offline,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub since: Option<u64>,
    pub activities: Vec<Activity>,
    pub status: OnlineStatus,
    pub afk: bool,
}

/// Joins, moves or leaves a voice channel. `channel_id: None` leaves.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VoiceStateUpdate {
    pub guild_id: GuildId,
    pub channel_id: Option<String>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RequestGuildMembers {
    pub guild_id: GuildId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub limit: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub presences: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Commands an application may send once the connection is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCommand {
    PresenceUpdate(PresenceUpdate),
    VoiceStateUpdate(VoiceStateUpdate),
    RequestGuildMembers(RequestGuildMembers),
}

impl GatewayCommand {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::PresenceUpdate(_) => Opcode::PresenceUpdate,
            Self::VoiceStateUpdate(_) => Opcode::VoiceStateUpdate,
            Self::RequestGuildMembers(_) => Opcode::RequestGuildMembers,
        }
    }

    pub fn to_payload(&self) -> Result<GatewayPayload, serde_json::Error> {
        match self {
            Self::PresenceUpdate(d) => GatewayPayload::new(self.opcode(), d),
            Self::VoiceStateUpdate(d) => GatewayPayload::new(self.opcode(), d),
            Self::RequestGuildMembers(d) => GatewayPayload::new(self.opcode(), d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_carries_sequence_or_null() {
        assert_eq!(
            serde_json::to_string(&GatewayPayload::heartbeat(Some(42))).unwrap(),
            r#"{"op":1,"d":42}"#
        );
        assert_eq!(
            serde_json::to_string(&GatewayPayload::heartbeat(None)).unwrap(),
            r#"{"op":1,"d":null}"#
        );
    }

    #[test]
    fn identify_uses_config() {
        let mut config = GatewayConfig::new("token");
        config.os = "linux".into();
        config.large_threshold = 100;
        let payload = GatewayPayload::new(Opcode::Identify, &Identify::from_config(&config)).unwrap();

        assert_eq!(payload.op, 2);
        assert_eq!(payload.d["token"], "token");
        assert_eq!(payload.d["intents"], GatewayIntents::NON_PRIVILEGED.bits());
        assert_eq!(payload.d["properties"]["os"], "linux");
        assert_eq!(payload.d["properties"]["browser"], "gatelink");
        assert_eq!(payload.d["large_threshold"], 100);
    }

    #[test]
    fn inbound_frame_keeps_raw_data() {
        let text = r#"{"op":0,"s":7,"t":"MESSAGE_CREATE","d":{"content":"hi"}}"#;
        let frame: InboundFrame<'_> = serde_json::from_str(text).unwrap();
        assert_eq!(frame.op, 0);
        assert_eq!(frame.s, Some(7));
        assert_eq!(frame.t.as_deref(), Some("MESSAGE_CREATE"));
        assert_eq!(frame.d.map(|d| d.get()), Some(r#"{"content":"hi"}"#));
    }

    #[test]
    fn inbound_frame_null_fields() {
        let frame: InboundFrame<'_> =
            serde_json::from_str(r#"{"op":11,"d":null,"s":null,"t":null}"#).unwrap();
        assert_eq!(Opcode::from_u8(frame.op), Some(Opcode::HeartbeatAck));
        assert!(frame.d.is_none());
        assert!(frame.s.is_none());
    }

    #[test]
    fn voice_state_command_encoding() {
        let command = GatewayCommand::VoiceStateUpdate(VoiceStateUpdate {
            guild_id: GuildId::from("81384788765712384"),
            channel_id: Some("127121515262115840".into()),
            self_mute: false,
            self_deaf: true,
        });
        let payload = command.to_payload().unwrap();
        assert_eq!(payload.op, 4);
        assert_eq!(payload.d["guild_id"], "81384788765712384");
        assert_eq!(payload.d["self_deaf"], true);
    }

    #[test]
    fn member_request_skips_empty_fields() {
        let command = GatewayCommand::RequestGuildMembers(RequestGuildMembers {
            guild_id: GuildId::from("1"),
            query: Some(String::new()),
            limit: 0,
            presences: false,
            user_ids: None,
            nonce: None,
        });
        let encoded = serde_json::to_string(&command.to_payload().unwrap()).unwrap();
        assert_eq!(
            encoded,
            r#"{"op":8,"d":{"guild_id":"1","limit":0,"query":""}}"#
        );
    }
}
