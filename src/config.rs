//! relayclaw configuration management

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main relayclaw configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Gateway configuration
    pub gateway: GatewayConfig,

    /// Channel declarations seeded into the in-memory store
    #[serde(default)]
    pub channels: Vec<ChannelSeed>,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Server-initiated WebSocket ping interval in seconds
    pub ping_interval_secs: u64,

    /// How long a human session may stay unauthenticated, in seconds
    pub auth_timeout_secs: u64,

    /// Maximum in-band authentication attempts per human session
    pub max_auth_attempts: u32,

    /// Human session rate ceiling (messages per second)
    pub human_rate_limit: u32,

    /// Agent session rate ceiling (messages per second)
    pub agent_rate_limit: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18800,
            ping_interval_secs: 30,
            auth_timeout_secs: 30,
            max_auth_attempts: 3,
            human_rate_limit: 10,
            agent_rate_limit: 50,
        }
    }
}

/// One channel entry for the in-memory store.
///
/// `secret_hash` is a PBKDF2 hash produced by `relayclaw hash-secret`;
/// `agent_token` is the bearer credential the agent presents on
/// `/api/channel/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSeed {
    /// Channel identifier (URL path segment)
    pub id: String,

    /// PBKDF2 hash of the shared channel secret
    pub secret_hash: String,

    /// Bearer token bound to this channel's agent
    pub agent_token: String,

    /// Whether the channel accepts connections
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gateway.port, 18800);
        assert_eq!(config.gateway.ping_interval_secs, 30);
        assert_eq!(config.gateway.auth_timeout_secs, 30);
        assert_eq!(config.gateway.max_auth_attempts, 3);
        assert_eq!(config.gateway.human_rate_limit, 10);
        assert_eq!(config.gateway.agent_rate_limit, 50);
        assert!(config.channels.is_empty());
    }

    #[test]
    fn test_parse_channel_seeds() {
        let toml = r#"
            [gateway]
            host = "0.0.0.0"
            port = 9000
            ping_interval_secs = 30
            auth_timeout_secs = 30
            max_auth_attempts = 3
            human_rate_limit = 10
            agent_rate_limit = 50

            [[channels]]
            id = "ch1"
            secret_hash = "pbkdf2$100000$c2FsdA$aGFzaA"
            agent_token = "tok-abc"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.gateway.host, "0.0.0.0");
        assert_eq!(config.channels.len(), 1);
        assert_eq!(config.channels[0].id, "ch1");
        // enabled defaults to true when omitted
        assert!(config.channels[0].enabled);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relayclaw.toml");
        std::fs::write(
            &path,
            "[gateway]\n\
             port = 4000\n\
             ping_interval_secs = 15\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.gateway.port, 4000);
        assert_eq!(config.gateway.ping_interval_secs, 15);
        // Omitted tunables fall back to their defaults
        assert_eq!(config.gateway.auth_timeout_secs, 30);

        assert!(Config::load(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_config_round_trip() {
        let config = Config {
            gateway: GatewayConfig::default(),
            channels: vec![ChannelSeed {
                id: "support".to_string(),
                secret_hash: "h".to_string(),
                agent_token: "t".to_string(),
                enabled: false,
            }],
        };
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.channels[0].id, "support");
        assert!(!parsed.channels[0].enabled);
    }
}
