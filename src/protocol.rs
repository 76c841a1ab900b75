//! In-band JSON message schema
//!
//! All channel traffic rides in single-frame UTF-8 text frames carrying
//! one JSON object with a `type` discriminator. Field names follow the
//! existing browser clients (camelCase where they expect it).

use serde::{Deserialize, Serialize};

/// Messages a human client sends to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HumanMessage {
    /// In-band authentication attempt
    Auth {
        /// Channel shared secret
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        /// Admin one-time token
        #[serde(default, rename = "adminToken", skip_serializing_if = "Option::is_none")]
        admin_token: Option<String>,
    },
    /// Chat message for the agent
    Message { text: String },
    /// Application-level liveness probe
    Ping,
    /// Chat history request
    History {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<String>,
    },
}

/// Messages an agent sends to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Finalized reply; persisted
    Message {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        id: Option<String>,
        #[serde(default, rename = "connId")]
        conn_id: Option<String>,
        #[serde(default, rename = "replyTo")]
        reply_to: Option<String>,
    },
    /// Incremental streaming text; not persisted
    Chunk {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        id: Option<String>,
        #[serde(default, rename = "connId")]
        conn_id: Option<String>,
        #[serde(default, rename = "replyTo")]
        reply_to: Option<String>,
    },
    /// End of a stream; final text persisted when present
    Done {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        id: Option<String>,
        #[serde(default, rename = "connId")]
        conn_id: Option<String>,
        #[serde(default, rename = "replyTo")]
        reply_to: Option<String>,
    },
    /// Ephemeral typing indicator; not persisted
    Typing {
        #[serde(default, rename = "connId")]
        conn_id: Option<String>,
    },
    /// Error forwarded to the addressed human; not persisted
    Error {
        #[serde(default)]
        error: Option<String>,
        #[serde(default, rename = "connId")]
        conn_id: Option<String>,
    },
    /// Application-level liveness probe
    Ping,
}

impl AgentMessage {
    /// Target connection for routing: `connId` wins, `replyTo` is the
    /// fallback alias some agent clients send.
    pub fn target(&self) -> Option<&str> {
        match self {
            AgentMessage::Message { conn_id, reply_to, .. }
            | AgentMessage::Chunk { conn_id, reply_to, .. }
            | AgentMessage::Done { conn_id, reply_to, .. } => {
                conn_id.as_deref().or(reply_to.as_deref())
            }
            AgentMessage::Typing { conn_id } | AgentMessage::Error { conn_id, .. } => {
                conn_id.as_deref()
            }
            AgentMessage::Ping => None,
        }
    }
}

/// Messages the gateway sends to clients (humans and agents)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication outcome
    Auth {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(
            default,
            rename = "attemptsRemaining",
            skip_serializing_if = "Option::is_none"
        )]
        attempts_remaining: Option<u32>,
    },
    /// Sent to a freshly bound agent: channel roster
    Connected {
        #[serde(rename = "channelId")]
        channel_id: String,
        humans: Vec<String>,
    },
    /// Chat message (either direction after persistence)
    Message {
        from: String,
        text: String,
        id: String,
        timestamp: String,
        #[serde(default, rename = "connId", skip_serializing_if = "Option::is_none")]
        conn_id: Option<String>,
    },
    /// Streaming text fragment
    Chunk { text: String, id: String },
    /// Stream end marker
    Done { id: String, timestamp: String },
    /// Typing indicator
    Typing,
    /// Application-level ping/pong
    Ping,
    Pong,
    /// In-band error
    Error { error: String },
    /// Chat history reply
    History { messages: Vec<ChatMessage> },
    /// The channel's agent went away
    AgentDisconnected,
    /// A human attached (agent-only notification)
    HumanConnected {
        #[serde(rename = "connId")]
        conn_id: String,
    },
    /// A human detached (agent-only notification)
    HumanDisconnected {
        #[serde(rename = "connId")]
        conn_id: String,
    },
}

/// One persisted chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub from: String,
    pub text: String,
    pub timestamp: String,
    #[serde(default, rename = "connId", skip_serializing_if = "Option::is_none")]
    pub conn_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_auth_parses() {
        let msg: HumanMessage =
            serde_json::from_str(r#"{"type":"auth","key":"s3cret"}"#).unwrap();
        assert!(matches!(msg, HumanMessage::Auth { key: Some(k), admin_token: None } if k == "s3cret"));

        let msg: HumanMessage =
            serde_json::from_str(r#"{"type":"auth","adminToken":"tok"}"#).unwrap();
        assert!(matches!(msg, HumanMessage::Auth { admin_token: Some(t), .. } if t == "tok"));
    }

    #[test]
    fn test_human_history_defaults() {
        let msg: HumanMessage = serde_json::from_str(r#"{"type":"history"}"#).unwrap();
        assert!(matches!(msg, HumanMessage::History { limit: None, before: None }));
    }

    #[test]
    fn test_agent_message_target_fallback() {
        let msg: AgentMessage =
            serde_json::from_str(r#"{"type":"message","text":"hi","replyTo":"human_1"}"#).unwrap();
        assert_eq!(msg.target(), Some("human_1"));

        let msg: AgentMessage = serde_json::from_str(
            r#"{"type":"chunk","text":"h","id":"m1","connId":"human_2","replyTo":"human_3"}"#,
        )
        .unwrap();
        assert_eq!(msg.target(), Some("human_2"));

        let msg: AgentMessage = serde_json::from_str(r#"{"type":"typing"}"#).unwrap();
        assert_eq!(msg.target(), None);
    }

    #[test]
    fn test_server_message_wire_names() {
        let json = serde_json::to_string(&ServerMessage::Connected {
            channel_id: "ch1".to_string(),
            humans: vec!["human_ab12".to_string()],
        })
        .unwrap();
        assert!(json.contains(r#""type":"connected""#));
        assert!(json.contains(r#""channelId":"ch1""#));

        let json = serde_json::to_string(&ServerMessage::Auth {
            success: false,
            error: Some("invalid credentials".to_string()),
            attempts_remaining: Some(2),
        })
        .unwrap();
        assert!(json.contains(r#""attemptsRemaining":2"#));

        let json = serde_json::to_string(&ServerMessage::HumanConnected {
            conn_id: "human_ab12".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"human_connected""#));
        assert!(json.contains(r#""connId":"human_ab12""#));
    }

    #[test]
    fn test_server_message_omits_absent_conn_id() {
        let json = serde_json::to_string(&ServerMessage::Message {
            from: "agent".to_string(),
            text: "hi".to_string(),
            id: "msg_1".to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            conn_id: None,
        })
        .unwrap();
        assert!(!json.contains("connId"));
    }

    #[test]
    fn test_unknown_type_is_parse_error() {
        assert!(serde_json::from_str::<HumanMessage>(r#"{"type":"exec"}"#).is_err());
        assert!(serde_json::from_str::<AgentMessage>(r#"{"type":"shutdown"}"#).is_err());
    }
}
