//! Collaborator interfaces for the channel core
//!
//! Channel identity, credentials, and chat history are owned by the
//! surrounding application; the core consumes them through the
//! `ChannelStore` trait. An in-memory implementation backs the binary
//! and the tests.

pub mod memory;
pub mod secret;

pub use memory::MemoryStore;
pub use secret::{hash_secret, verify_secret};

use crate::protocol::ChatMessage;
use async_trait::async_trait;

/// A channel as the persistence layer sees it. Immutable for the
/// lifetime of a connection; the core never mutates it.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Opaque channel identifier
    pub channel_id: String,
    /// Whether the channel accepts connections
    pub enabled: bool,
    /// PBKDF2 hash of the shared secret
    pub key_hash: String,
}

/// Identity recovered from a pre-validated agent bearer credential
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    /// Channel the credential is bound to
    pub channel_id: String,
    /// Whether the binding is enabled
    pub enabled: bool,
}

/// Storage seam consumed by the channel core
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Look up a channel by id
    async fn get_channel(&self, channel_id: &str) -> Option<Channel>;

    /// Validate (and consume) an admin one-time token for a channel
    async fn validate_one_time_token(&self, token: &str, channel_id: &str) -> bool;

    /// Validate an agent bearer credential
    async fn validate_bearer(&self, token: &str) -> Option<AgentIdentity>;

    /// Persist one chat message
    async fn save_chat_message(&self, channel_id: &str, message: &ChatMessage);

    /// Fetch up to `limit` messages, newest-first, optionally only those
    /// older than the message id `before`
    async fn get_chat_history(
        &self,
        channel_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Vec<ChatMessage>;
}
