//! In-memory `ChannelStore` implementation
//!
//! Backs the stand-alone binary (seeded from config) and the tests.
//! Admin tokens are one-time: consumed on first successful validation.

use super::{AgentIdentity, Channel, ChannelStore};
use crate::config::ChannelSeed;
use crate::protocol::ChatMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    channels: HashMap<String, Channel>,
    /// token → channel_id; removed on first use
    admin_tokens: HashMap<String, String>,
    /// bearer token → identity
    bearers: HashMap<String, AgentIdentity>,
    /// channel_id → messages in insertion order
    history: HashMap<String, Vec<ChatMessage>>,
}

/// In-memory channel/credential/history store
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from the config's channel seeds
    pub fn from_seeds(seeds: &[ChannelSeed]) -> Self {
        let mut inner = Inner::default();
        for seed in seeds {
            inner.channels.insert(
                seed.id.clone(),
                Channel {
                    channel_id: seed.id.clone(),
                    enabled: seed.enabled,
                    key_hash: seed.secret_hash.clone(),
                },
            );
            inner.bearers.insert(
                seed.agent_token.clone(),
                AgentIdentity {
                    channel_id: seed.id.clone(),
                    enabled: seed.enabled,
                },
            );
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Register a channel
    pub async fn insert_channel(&self, channel: Channel) {
        let mut inner = self.inner.write().await;
        inner.channels.insert(channel.channel_id.clone(), channel);
    }

    /// Register an agent bearer credential
    pub async fn insert_bearer(&self, token: &str, identity: AgentIdentity) {
        let mut inner = self.inner.write().await;
        inner.bearers.insert(token.to_string(), identity);
    }

    /// Register an admin one-time token for a channel
    pub async fn insert_admin_token(&self, token: &str, channel_id: &str) {
        let mut inner = self.inner.write().await;
        inner
            .admin_tokens
            .insert(token.to_string(), channel_id.to_string());
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn get_channel(&self, channel_id: &str) -> Option<Channel> {
        self.inner.read().await.channels.get(channel_id).cloned()
    }

    async fn validate_one_time_token(&self, token: &str, channel_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.admin_tokens.get(token) {
            Some(bound) if bound == channel_id => {
                inner.admin_tokens.remove(token);
                true
            }
            _ => false,
        }
    }

    async fn validate_bearer(&self, token: &str) -> Option<AgentIdentity> {
        self.inner.read().await.bearers.get(token).cloned()
    }

    async fn save_chat_message(&self, channel_id: &str, message: &ChatMessage) {
        let mut inner = self.inner.write().await;
        inner
            .history
            .entry(channel_id.to_string())
            .or_default()
            .push(message.clone());
    }

    async fn get_chat_history(
        &self,
        channel_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Vec<ChatMessage> {
        let inner = self.inner.read().await;
        let messages = match inner.history.get(channel_id) {
            Some(m) => m,
            None => return Vec::new(),
        };
        let end = match before {
            Some(id) => messages
                .iter()
                .position(|m| m.id == id)
                .unwrap_or(messages.len()),
            None => messages.len(),
        };
        let start = end.saturating_sub(limit);
        messages[start..end].to_vec()
    }
}
