use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gateway::GatewayIntents;

/// Connection parameters fixed at construction of a gateway connection.
#[derive(Deserialize, Serialize, Clone)]
pub struct GatewayConfig {
    /// Bot token. May be left empty in the file and supplied through the
    /// environment instead.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_version")]
    pub version: u8,
    /// Member count above which a guild is considered large (0..=250).
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u32,
    #[serde(default)]
    pub intents: GatewayIntents,
    #[serde(default = "default_os")]
    pub os: String,
    #[serde(default = "default_identity")]
    pub browser: String,
    #[serde(default = "default_identity")]
    pub device: String,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    /// How long to wait for the guilds announced in READY before reporting
    /// the connection as ready anyway.
    #[serde(default = "default_guild_ready_timeout_ms")]
    pub guild_ready_timeout_ms: u64,
    /// Consecutive unacknowledged heartbeats that mark the socket as dead.
    #[serde(default = "default_max_missed_heartbeats")]
    pub max_missed_heartbeats: u32,
}

/// Delay schedule between reconnect attempts.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// `None` retries forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
}

fn default_url() -> String {
    "wss://gateway.discord.gg".to_string()
}

fn default_version() -> u8 {
    10
}

fn default_large_threshold() -> u32 {
    50
}

fn default_os() -> String {
    std::env::consts::OS.to_string()
}

fn default_identity() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_guild_ready_timeout_ms() -> u64 {
    10_000
}

fn default_max_missed_heartbeats() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> Option<u32> {
    Some(10)
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            url: default_url(),
            version: default_version(),
            large_threshold: default_large_threshold(),
            intents: GatewayIntents::default(),
            os: default_os(),
            browser: default_identity(),
            device: default_identity(),
            reconnect: ReconnectPolicy::default(),
            guild_ready_timeout_ms: default_guild_ready_timeout_ms(),
            max_missed_heartbeats: default_max_missed_heartbeats(),
        }
    }
}

impl GatewayConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    pub fn with_intents(mut self, intents: GatewayIntents) -> Self {
        self.intents = intents;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Full websocket URL for a base gateway address.
    pub fn connect_url(&self, base: &str) -> String {
        format!(
            "{}/?v={}&encoding=json",
            base.trim_end_matches('/'),
            self.version
        )
    }

    pub fn guild_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.guild_ready_timeout_ms)
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"<redacted>")
            .field("url", &self.url)
            .field("version", &self.version)
            .field("large_threshold", &self.large_threshold)
            .field("intents", &self.intents)
            .field("os", &self.os)
            .field("browser", &self.browser)
            .field("device", &self.device)
            .field("reconnect", &self.reconnect)
            .field("guild_ready_timeout_ms", &self.guild_ready_timeout_ms)
            .field("max_missed_heartbeats", &self.max_missed_heartbeats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.url, "wss://gateway.discord.gg");
        assert_eq!(config.version, 10);
        assert_eq!(config.large_threshold, 50);
        assert_eq!(config.intents, GatewayIntents::NON_PRIVILEGED);
        assert_eq!(config.browser, "gatelink");
        assert_eq!(config.max_missed_heartbeats, 2);
        assert_eq!(config.reconnect, ReconnectPolicy::default());
    }

    #[test]
    fn overrides_are_read() {
        let config: GatewayConfig = toml::from_str(
            r#"
            token = "abc"
            large_threshold = 250
            intents = 513

            [reconnect]
            base_delay_ms = 250
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.token, "abc");
        assert_eq!(config.large_threshold, 250);
        assert_eq!(config.intents.bits(), 513);
        assert_eq!(config.reconnect.base_delay_ms, 250);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
        assert_eq!(config.reconnect.max_attempts, Some(3));
    }

    #[test]
    fn connect_url_appends_query() {
        let config = GatewayConfig::default();
        assert_eq!(
            config.connect_url("wss://gateway.discord.gg/"),
            "wss://gateway.discord.gg/?v=10&encoding=json"
        );
    }

    #[test]
    fn debug_hides_token() {
        let config = GatewayConfig::new("super-secret");
        assert!(!format!("{:?}", config).contains("super-secret"));
    }
}
