//! Per-channel message bridge between the agent and human viewers
//!
//! The only cross-session state in the process. Each channel entry holds
//! the human sinks, at most one agent sink, and a bounded queue of
//! agent-bound messages buffered while no agent is attached.

use crate::protocol::ServerMessage;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{mpsc, RwLock};

/// Outbound sink for one connection. Sends never block: the owning
/// session drains the channel and writes frames at its own pace.
pub type MessageSink = mpsc::UnboundedSender<String>;

/// Agent-bound messages buffered past this count are dropped, not
/// rotated.
pub const PENDING_QUEUE_LIMIT: usize = 100;

/// Per-channel routing table
pub struct ChannelBridge {
    channels: RwLock<HashMap<String, ChannelEntry>>,
}

/// Internal per-channel state
struct ChannelEntry {
    /// conn_id → human sink
    humans: HashMap<String, MessageSink>,
    /// At most one agent sink; `None` means no agent attached
    agent: Option<MessageSink>,
    /// FIFO queue of serialized messages awaiting an agent
    pending: VecDeque<String>,
}

impl ChannelEntry {
    fn new() -> Self {
        Self {
            humans: HashMap::new(),
            agent: None,
            pending: VecDeque::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.humans.is_empty() && self.agent.is_none()
    }
}

fn send_json(sink: &MessageSink, msg: &ServerMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = sink.send(json);
        }
        Err(e) => tracing::warn!("Failed to serialize bridge message: {}", e),
    }
}

impl ChannelBridge {
    /// Create an empty bridge
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Register a human sink. The agent (if attached) is notified;
    /// other humans are not.
    pub async fn attach_human(&self, channel_id: &str, conn_id: &str, sink: MessageSink) {
        let mut channels = self.channels.write().await;
        let entry = channels
            .entry(channel_id.to_string())
            .or_insert_with(ChannelEntry::new);
        entry.humans.insert(conn_id.to_string(), sink);
        if let Some(ref agent) = entry.agent {
            send_json(
                agent,
                &ServerMessage::HumanConnected {
                    conn_id: conn_id.to_string(),
                },
            );
        }
        tracing::info!(channel_id, conn_id, "Human attached to bridge");
    }

    /// Remove a human sink; the entry is garbage collected when neither
    /// humans nor an agent remain.
    pub async fn detach_human(&self, channel_id: &str, conn_id: &str) {
        let mut channels = self.channels.write().await;
        if let Some(entry) = channels.get_mut(channel_id) {
            entry.humans.remove(conn_id);
            if let Some(ref agent) = entry.agent {
                send_json(
                    agent,
                    &ServerMessage::HumanDisconnected {
                        conn_id: conn_id.to_string(),
                    },
                );
            }
            if entry.is_empty() {
                channels.remove(channel_id);
            }
        }
        tracing::info!(channel_id, conn_id, "Human detached from bridge");
    }

    /// Bind the channel's agent sink. Returns false without touching the
    /// existing sink when an agent is already attached; a later bind
    /// never takes over an earlier one. On success the pending backlog
    /// is flushed in enqueue order, then the roster message is sent.
    pub async fn attach_agent(&self, channel_id: &str, sink: MessageSink) -> bool {
        let mut channels = self.channels.write().await;
        let entry = channels
            .entry(channel_id.to_string())
            .or_insert_with(ChannelEntry::new);

        if entry.agent.is_some() {
            // Entry may have been created just now; undo that
            if entry.is_empty() {
                channels.remove(channel_id);
            }
            tracing::warn!(channel_id, "Agent bind rejected: already attached");
            return false;
        }

        let backlog: Vec<String> = entry.pending.drain(..).collect();
        let flushed = backlog.len();
        for json in backlog {
            let _ = sink.send(json);
        }

        let humans: Vec<String> = entry.humans.keys().cloned().collect();
        send_json(
            &sink,
            &ServerMessage::Connected {
                channel_id: channel_id.to_string(),
                humans,
            },
        );
        entry.agent = Some(sink);

        tracing::info!(channel_id, flushed, "Agent attached to bridge");
        true
    }

    /// Clear the agent slot and tell every human; garbage collect the
    /// entry when no humans remain.
    pub async fn detach_agent(&self, channel_id: &str) {
        let mut channels = self.channels.write().await;
        if let Some(entry) = channels.get_mut(channel_id) {
            entry.agent = None;
            for sink in entry.humans.values() {
                send_json(sink, &ServerMessage::AgentDisconnected);
            }
            if entry.is_empty() {
                channels.remove(channel_id);
            }
        }
        tracing::info!(channel_id, "Agent detached from bridge");
    }

    /// Deliver to the agent if attached, otherwise buffer. Beyond the
    /// queue limit the message is silently dropped.
    pub async fn route_to_agent(&self, channel_id: &str, msg: &ServerMessage) {
        let mut channels = self.channels.write().await;
        let entry = match channels.get_mut(channel_id) {
            Some(e) => e,
            None => {
                // Nothing attached to this channel; nothing to buffer for
                tracing::debug!(channel_id, "Dropping agent-bound message for idle channel");
                return;
            }
        };

        if let Some(ref agent) = entry.agent {
            send_json(agent, msg);
        } else if entry.pending.len() < PENDING_QUEUE_LIMIT {
            match serde_json::to_string(msg) {
                Ok(json) => entry.pending.push_back(json),
                Err(e) => tracing::warn!("Failed to serialize queued message: {}", e),
            }
        } else {
            tracing::debug!(channel_id, "Pending queue full, dropping message");
        }
    }

    /// Deliver to one human; a detached conn_id is an expected race and
    /// a silent no-op.
    pub async fn route_to_human(&self, channel_id: &str, conn_id: &str, msg: &ServerMessage) {
        let channels = self.channels.read().await;
        if let Some(sink) = channels
            .get(channel_id)
            .and_then(|entry| entry.humans.get(conn_id))
        {
            send_json(sink, msg);
        } else {
            tracing::debug!(channel_id, conn_id, "Routing miss, human detached");
        }
    }

    /// Deliver to every attached human
    pub async fn broadcast_to_humans(&self, channel_id: &str, msg: &ServerMessage) {
        let channels = self.channels.read().await;
        if let Some(entry) = channels.get(channel_id) {
            for sink in entry.humans.values() {
                send_json(sink, msg);
            }
        }
    }

    /// Whether a bridge entry exists for the channel
    pub async fn has_channel(&self, channel_id: &str) -> bool {
        self.channels.read().await.contains_key(channel_id)
    }

    /// Number of attached humans for a channel
    pub async fn human_count(&self, channel_id: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel_id)
            .map(|entry| entry.humans.len())
            .unwrap_or(0)
    }

    /// Whether an agent is attached to the channel
    pub async fn agent_attached(&self, channel_id: &str) -> bool {
        self.channels
            .read()
            .await
            .get(channel_id)
            .map(|entry| entry.agent.is_some())
            .unwrap_or(false)
    }

    /// Number of buffered agent-bound messages for a channel
    pub async fn pending_count(&self, channel_id: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel_id)
            .map(|entry| entry.pending.len())
            .unwrap_or(0)
    }
}

impl Default for ChannelBridge {
    fn default() -> Self {
        Self::new()
    }
}
