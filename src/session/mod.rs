//! Per-socket session state machines
//!
//! Each accepted socket runs one session on its own task: humans go
//! through in-band authentication, agents are pre-authenticated and
//! bind exclusively. Both speak the raw frame codec and meet only in
//! the [`crate::bridge::ChannelBridge`].

pub mod agent;
pub mod human;
pub mod limiter;

#[cfg(test)]
pub(crate) mod testutil;

pub use agent::AgentSession;
pub use human::HumanSession;
pub use limiter::RateLimiter;

use crate::config::GatewayConfig;
use std::time::Duration;

/// Upper bound on a human chat message, in bytes
pub const MAX_MESSAGE_BYTES: usize = 4096;

/// Upper bound on a history request
pub const MAX_HISTORY_LIMIT: u32 = 100;

/// Session timing and limits, derived from the gateway config
#[derive(Debug, Clone)]
pub struct SessionTuning {
    /// Server-initiated keepalive ping interval
    pub ping_interval: Duration,
    /// How long a human session may stay unauthenticated
    pub auth_timeout: Duration,
    /// In-band authentication attempts before the session is closed
    pub max_auth_attempts: u32,
    /// Human rate ceiling (messages per window)
    pub human_rate_limit: u32,
    /// Agent rate ceiling (messages per window)
    pub agent_rate_limit: u32,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for SessionTuning {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            auth_timeout: Duration::from_secs(config.auth_timeout_secs),
            max_auth_attempts: config.max_auth_attempts,
            human_rate_limit: config.human_rate_limit,
            agent_rate_limit: config.agent_rate_limit,
        }
    }
}

/// Generate a connection id for a human socket
pub(crate) fn new_conn_id() -> String {
    format!("human_{:08x}", rand::random::<u32>())
}

/// Generate a chat message id
pub(crate) fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

/// RFC3339 timestamp for outbound messages
pub(crate) fn now_timestamp() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Whether the session loop should keep running after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_formats() {
        let conn_id = new_conn_id();
        assert!(conn_id.starts_with("human_"));
        assert_eq!(conn_id.len(), "human_".len() + 8);

        let msg_id = new_message_id();
        assert!(msg_id.starts_with("msg_"));
        assert_eq!(msg_id.len(), "msg_".len() + 32);
    }

    #[test]
    fn test_tuning_from_config() {
        let tuning = SessionTuning::default();
        assert_eq!(tuning.ping_interval, Duration::from_secs(30));
        assert_eq!(tuning.auth_timeout, Duration::from_secs(30));
        assert_eq!(tuning.max_auth_attempts, 3);
        assert_eq!(tuning.human_rate_limit, 10);
        assert_eq!(tuning.agent_rate_limit, 50);
    }
}
