use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{common::types::AnyResult, configs::*};

/// Environment variable that overrides `gateway.token`.
pub const TOKEN_ENV: &str = "GATELINK_TOKEN";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    /// Loads `config.toml`, falling back to `config.default.toml`.
    pub fn load() -> AnyResult<Self> {
        let config_path = if Path::new("config.toml").exists() {
            "config.toml"
        } else if Path::new("config.default.toml").exists() {
            "config.default.toml"
        } else {
            return Err("config.toml or config.default.toml not found".into());
        };

        Self::load_from(config_path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> AnyResult<Self> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)?;
        if config_str.trim().is_empty() {
            return Err(format!("{} is empty", path.display()).into());
        }

        let mut config = Self::from_toml_str(&config_str)?;
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.is_empty() {
                config.gateway.token = token;
            }
        }
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> AnyResult<Self> {
        Ok(toml::from_str(s)?)
    }
}
