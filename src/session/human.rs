//! Human viewer session state machine
//!
//! HANDSHAKING → AUTHENTICATING → AUTHENTICATED → CLOSED. The gateway
//! completes the upgrade before calling [`HumanSession::run`]; this
//! module owns everything after the 101 response: the in-band auth
//! window, the message loop, and bridge teardown.

use crate::bridge::ChannelBridge;
use crate::error::Result;
use crate::protocol::{ChatMessage, HumanMessage, ServerMessage};
use crate::session::{
    new_conn_id, new_message_id, now_timestamp, Flow, RateLimiter, SessionTuning,
    MAX_HISTORY_LIMIT, MAX_MESSAGE_BYTES,
};
use crate::store::{verify_secret, Channel, ChannelStore};
use crate::wire::frame::{self, Opcode};
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time;

/// One human viewer socket
pub struct HumanSession {
    channel_id: String,
    conn_id: String,
    key_hash: String,
    bridge: Arc<ChannelBridge>,
    store: Arc<dyn ChannelStore>,
    tuning: SessionTuning,
    limiter: RateLimiter,
    authenticated: bool,
    auth_attempts: u32,
}

impl HumanSession {
    /// Create a session for an already-upgraded socket on an enabled
    /// channel
    pub fn new(
        channel: Channel,
        bridge: Arc<ChannelBridge>,
        store: Arc<dyn ChannelStore>,
        tuning: SessionTuning,
    ) -> Self {
        let limiter = RateLimiter::new(tuning.human_rate_limit);
        Self {
            channel_id: channel.channel_id,
            conn_id: new_conn_id(),
            key_hash: channel.key_hash,
            bridge,
            store,
            tuning,
            limiter,
            authenticated: false,
            auth_attempts: 0,
        }
    }

    /// This session's connection id
    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Drive the session to completion. `leftover` holds bytes read
    /// past the upgrade request head.
    pub async fn run<S>(mut self, stream: S, leftover: BytesMut) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let mut buf = leftover;

        let mut ping = time::interval_at(
            time::Instant::now() + self.tuning.ping_interval,
            self.tuning.ping_interval,
        );
        let auth_deadline = time::sleep(self.tuning.auth_timeout);
        tokio::pin!(auth_deadline);

        let result = async {
            // The client may have pipelined frames behind the request head
            if self.drain_frames(&mut buf, &mut writer, &out_tx).await? == Flow::Close {
                return Ok(());
            }

            loop {
                tokio::select! {
                    read = reader.read_buf(&mut buf) => {
                        match read {
                            Ok(0) => return Ok(()),
                            Ok(_) => {
                                if self.drain_frames(&mut buf, &mut writer, &out_tx).await? == Flow::Close {
                                    return Ok(());
                                }
                            }
                            Err(e) => {
                                tracing::debug!(conn_id = %self.conn_id, "Socket read error: {}", e);
                                return Ok(());
                            }
                        }
                    }
                    Some(json) = out_rx.recv() => {
                        writer.write_all(&frame::encode_text_frame(json.as_bytes())).await?;
                    }
                    _ = ping.tick(), if self.authenticated => {
                        writer.write_all(&frame::encode_ping_frame(b"")).await?;
                    }
                    _ = &mut auth_deadline, if !self.authenticated => {
                        self.send(&mut writer, &ServerMessage::Error {
                            error: "authentication timed out".to_string(),
                        }).await?;
                        writer.write_all(&frame::encode_close_frame()).await?;
                        return Ok(());
                    }
                }
            }
        }
        .await;

        if self.authenticated {
            self.bridge
                .detach_human(&self.channel_id, &self.conn_id)
                .await;
        }
        tracing::info!(
            channel_id = %self.channel_id,
            conn_id = %self.conn_id,
            "Human session closed"
        );
        result
    }

    /// Decode and handle every complete frame in the buffer
    async fn drain_frames<W>(
        &mut self,
        buf: &mut BytesMut,
        writer: &mut W,
        out_tx: &mpsc::UnboundedSender<String>,
    ) -> Result<Flow>
    where
        W: AsyncWrite + Unpin,
    {
        for decoded in frame::decode_frames(buf)? {
            match decoded.opcode {
                Opcode::Close => {
                    writer.write_all(&frame::encode_close_frame()).await?;
                    return Ok(Flow::Close);
                }
                Opcode::Ping => {
                    writer
                        .write_all(&frame::encode_pong_frame(&decoded.payload))
                        .await?;
                }
                // Single-frame text messages only; everything else is
                // tolerated and dropped
                Opcode::Pong | Opcode::Continuation | Opcode::Binary => {}
                Opcode::Text => {
                    if self.handle_text(&decoded.payload, writer, out_tx).await? == Flow::Close {
                        return Ok(Flow::Close);
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle_text<W>(
        &mut self,
        payload: &[u8],
        writer: &mut W,
        out_tx: &mpsc::UnboundedSender<String>,
    ) -> Result<Flow>
    where
        W: AsyncWrite + Unpin,
    {
        if !self.authenticated {
            return self.handle_auth(payload, writer, out_tx).await;
        }

        let msg: HumanMessage = match serde_json::from_slice(payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(conn_id = %self.conn_id, "Unparseable message: {}", e);
                self.send(writer, &ServerMessage::Error {
                    error: "invalid message".to_string(),
                })
                .await?;
                return Ok(Flow::Continue);
            }
        };

        if !self.limiter.check() {
            self.send(writer, &ServerMessage::Error {
                error: "rate limit exceeded".to_string(),
            })
            .await?;
            return Ok(Flow::Continue);
        }

        match msg {
            HumanMessage::Auth { .. } => {
                self.send(writer, &ServerMessage::Error {
                    error: "already authenticated".to_string(),
                })
                .await?;
            }
            HumanMessage::Message { text } => {
                if text.len() > MAX_MESSAGE_BYTES {
                    self.send(writer, &ServerMessage::Error {
                        error: "message too large".to_string(),
                    })
                    .await?;
                    return Ok(Flow::Continue);
                }
                let id = new_message_id();
                let timestamp = now_timestamp();
                let record = ChatMessage {
                    id: id.clone(),
                    from: "human".to_string(),
                    text: text.clone(),
                    timestamp: timestamp.clone(),
                    conn_id: Some(self.conn_id.clone()),
                };
                self.store.save_chat_message(&self.channel_id, &record).await;
                self.bridge
                    .route_to_agent(
                        &self.channel_id,
                        &ServerMessage::Message {
                            from: "human".to_string(),
                            text,
                            id,
                            timestamp,
                            conn_id: Some(self.conn_id.clone()),
                        },
                    )
                    .await;
            }
            HumanMessage::Ping => {
                self.send(writer, &ServerMessage::Pong).await?;
            }
            HumanMessage::History { limit, before } => {
                let limit = limit.unwrap_or(50).min(MAX_HISTORY_LIMIT) as usize;
                let messages = self
                    .store
                    .get_chat_history(&self.channel_id, limit, before.as_deref())
                    .await;
                self.send(writer, &ServerMessage::History { messages }).await?;
            }
        }
        Ok(Flow::Continue)
    }

    /// One authentication attempt. Anything other than an `auth`
    /// message before authentication is a protocol violation.
    async fn handle_auth<W>(
        &mut self,
        payload: &[u8],
        writer: &mut W,
        out_tx: &mpsc::UnboundedSender<String>,
    ) -> Result<Flow>
    where
        W: AsyncWrite + Unpin,
    {
        let (key, admin_token) = match serde_json::from_slice::<HumanMessage>(payload) {
            Ok(HumanMessage::Auth { key, admin_token }) => (key, admin_token),
            _ => {
                self.send(writer, &ServerMessage::Error {
                    error: "authentication required".to_string(),
                })
                .await?;
                writer.write_all(&frame::encode_close_frame()).await?;
                return Ok(Flow::Close);
            }
        };

        let mut accepted = false;
        if let Some(token) = admin_token {
            accepted = self
                .store
                .validate_one_time_token(&token, &self.channel_id)
                .await;
        }
        if !accepted {
            if let Some(key) = key {
                accepted = verify_secret(&self.key_hash, &key);
            }
        }

        if accepted {
            self.authenticated = true;
            self.send(writer, &ServerMessage::Auth {
                success: true,
                error: None,
                attempts_remaining: None,
            })
            .await?;
            self.bridge
                .attach_human(&self.channel_id, &self.conn_id, out_tx.clone())
                .await;
            return Ok(Flow::Continue);
        }

        self.auth_attempts += 1;
        let remaining = self.tuning.max_auth_attempts.saturating_sub(self.auth_attempts);
        if remaining == 0 {
            self.send(writer, &ServerMessage::Auth {
                success: false,
                error: Some("too many failed attempts".to_string()),
                attempts_remaining: Some(0),
            })
            .await?;
            writer.write_all(&frame::encode_close_frame()).await?;
            tracing::info!(
                channel_id = %self.channel_id,
                conn_id = %self.conn_id,
                "Authentication attempts exhausted"
            );
            return Ok(Flow::Close);
        }
        self.send(writer, &ServerMessage::Auth {
            success: false,
            error: Some("invalid credentials".to_string()),
            attempts_remaining: Some(remaining),
        })
        .await?;
        Ok(Flow::Continue)
    }

    async fn send<W>(&self, writer: &mut W, msg: &ServerMessage) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let json = serde_json::to_string(msg)?;
        writer
            .write_all(&frame::encode_text_frame(json.as_bytes()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testutil::TestClient;
    use crate::store::{hash_secret, MemoryStore};
    use tokio::sync::mpsc::error::TryRecvError;

    const SECRET: &str = "s3cret";

    struct Harness {
        client: TestClient,
        bridge: Arc<ChannelBridge>,
        store: Arc<MemoryStore>,
        conn_id: String,
        handle: tokio::task::JoinHandle<Result<()>>,
    }

    async fn spawn_session_with(tuning: SessionTuning) -> Harness {
        let bridge = Arc::new(ChannelBridge::new());
        let store = Arc::new(MemoryStore::new());
        let channel = Channel {
            channel_id: "ch1".to_string(),
            enabled: true,
            key_hash: hash_secret(SECRET),
        };
        store.insert_channel(channel.clone()).await;

        let session = HumanSession::new(channel, bridge.clone(), store.clone(), tuning);
        let conn_id = session.conn_id().to_string();
        let (client, server) = tokio::io::duplex(64 * 1024);
        let handle = tokio::spawn(session.run(server, BytesMut::new()));

        Harness {
            client: TestClient::new(client),
            bridge,
            store,
            conn_id,
            handle,
        }
    }

    async fn spawn_session() -> Harness {
        spawn_session_with(SessionTuning::default()).await
    }

    async fn authenticate(harness: &mut Harness) {
        harness
            .client
            .send_json(&format!(r#"{{"type":"auth","key":"{}"}}"#, SECRET))
            .await;
        let reply = harness.client.next_json().await;
        assert_eq!(reply["type"], "auth");
        assert_eq!(reply["success"], true);
    }

    #[tokio::test]
    async fn test_auth_with_channel_secret() {
        let mut harness = spawn_session().await;
        authenticate(&mut harness).await;
        assert_eq!(harness.bridge.human_count("ch1").await, 1);

        harness.client.send_close().await;
        harness.client.wait_closed().await;
        harness.handle.await.unwrap().unwrap();
        assert_eq!(harness.bridge.human_count("ch1").await, 0);
    }

    #[tokio::test]
    async fn test_auth_with_admin_token() {
        let mut harness = spawn_session().await;
        harness.store.insert_admin_token("one-shot", "ch1").await;

        harness
            .client
            .send_json(r#"{"type":"auth","adminToken":"one-shot"}"#)
            .await;
        let reply = harness.client.next_json().await;
        assert_eq!(reply["success"], true);
    }

    #[tokio::test]
    async fn test_three_bad_attempts_close_the_session() {
        let mut harness = spawn_session().await;

        for remaining in [2, 1] {
            harness
                .client
                .send_json(r#"{"type":"auth","key":"wrong"}"#)
                .await;
            let reply = harness.client.next_json().await;
            assert_eq!(reply["success"], false);
            assert_eq!(reply["attemptsRemaining"], remaining);
        }

        harness
            .client
            .send_json(r#"{"type":"auth","key":"wrong"}"#)
            .await;
        let reply = harness.client.next_json().await;
        assert_eq!(reply["success"], false);
        assert_eq!(reply["attemptsRemaining"], 0);

        // No fourth attempt is accepted, the session is gone
        harness.client.wait_closed().await;
        harness.handle.await.unwrap().unwrap();
        assert_eq!(harness.bridge.human_count("ch1").await, 0);
    }

    #[tokio::test]
    async fn test_first_message_must_be_auth() {
        let mut harness = spawn_session().await;
        harness
            .client
            .send_json(r#"{"type":"message","text":"hi"}"#)
            .await;
        let reply = harness.client.next_json().await;
        assert_eq!(reply["type"], "error");
        harness.client.wait_closed().await;
        harness.handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_timeout_closes_the_session() {
        let mut harness = spawn_session().await;
        // No auth message; the 30s deadline fires under paused time
        let reply = harness.client.next_json().await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["error"], "authentication timed out");
        harness.client.wait_closed().await;
        harness.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_message_persisted_and_routed_to_agent() {
        let mut harness = spawn_session().await;
        authenticate(&mut harness).await;

        let (agent_tx, mut agent_rx) = mpsc::unbounded_channel();
        assert!(harness.bridge.attach_agent("ch1", agent_tx).await);
        let roster = agent_rx.recv().await.unwrap();
        assert!(roster.contains(&harness.conn_id));

        harness
            .client
            .send_json(r#"{"type":"message","text":"hi"}"#)
            .await;

        let routed = agent_rx.recv().await.unwrap();
        let routed: serde_json::Value = serde_json::from_str(&routed).unwrap();
        assert_eq!(routed["type"], "message");
        assert_eq!(routed["from"], "human");
        assert_eq!(routed["text"], "hi");
        assert_eq!(routed["connId"], harness.conn_id.as_str());
        assert!(routed["id"].as_str().unwrap().starts_with("msg_"));

        // Wait for persistence to be visible
        let mut history = Vec::new();
        for _ in 0..50 {
            history = harness.store.get_chat_history("ch1", 10, None).await;
            if !history.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "hi");
    }

    #[tokio::test]
    async fn test_oversize_message_rejected() {
        let mut harness = spawn_session().await;
        authenticate(&mut harness).await;

        let (agent_tx, mut agent_rx) = mpsc::unbounded_channel();
        assert!(harness.bridge.attach_agent("ch1", agent_tx).await);
        agent_rx.recv().await.unwrap(); // roster

        let big = "x".repeat(MAX_MESSAGE_BYTES + 1);
        harness
            .client
            .send_json(&format!(r#"{{"type":"message","text":"{}"}}"#, big))
            .await;
        let reply = harness.client.next_json().await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["error"], "message too large");
        assert_eq!(agent_rx.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn test_application_ping_pong() {
        let mut harness = spawn_session().await;
        authenticate(&mut harness).await;

        harness.client.send_json(r#"{"type":"ping"}"#).await;
        let reply = harness.client.next_json().await;
        assert_eq!(reply["type"], "pong");
    }

    #[tokio::test]
    async fn test_protocol_ping_echoed_as_pong() {
        let mut harness = spawn_session().await;
        harness.client.send_ping(b"beat-7").await;
        let frame = harness.client.next_frame().await.unwrap();
        assert_eq!(frame.opcode, Opcode::Pong);
        assert_eq!(frame.payload, b"beat-7");
    }

    #[tokio::test]
    async fn test_history_request() {
        let mut harness = spawn_session().await;
        for i in 0..3 {
            harness
                .store
                .save_chat_message(
                    "ch1",
                    &ChatMessage {
                        id: format!("m{}", i),
                        from: "human".to_string(),
                        text: format!("old {}", i),
                        timestamp: now_timestamp(),
                        conn_id: None,
                    },
                )
                .await;
        }
        authenticate(&mut harness).await;

        harness
            .client
            .send_json(r#"{"type":"history","limit":2}"#)
            .await;
        let reply = harness.client.next_json().await;
        assert_eq!(reply["type"], "history");
        assert_eq!(reply["messages"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_returns_error_not_close() {
        let tuning = SessionTuning {
            human_rate_limit: 2,
            ..SessionTuning::default()
        };
        let mut harness = spawn_session_with(tuning).await;
        authenticate(&mut harness).await;

        harness.client.send_json(r#"{"type":"ping"}"#).await;
        harness.client.send_json(r#"{"type":"ping"}"#).await;
        harness.client.send_json(r#"{"type":"ping"}"#).await;

        assert_eq!(harness.client.next_json().await["type"], "pong");
        assert_eq!(harness.client.next_json().await["type"], "pong");
        let third = harness.client.next_json().await;
        assert_eq!(third["type"], "error");
        assert_eq!(third["error"], "rate limit exceeded");

        // Session is still alive after the limiter rejection
        harness.client.send_close().await;
        harness.client.wait_closed().await;
        harness.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_detaches_from_bridge() {
        let mut harness = spawn_session().await;
        authenticate(&mut harness).await;
        assert_eq!(harness.bridge.human_count("ch1").await, 1);

        // Text frame header advertising a u64::MAX payload
        let mut raw = vec![0x81, 0xFF];
        raw.extend_from_slice(&u64::MAX.to_be_bytes());
        raw.extend_from_slice(&[1, 2, 3, 4]);
        harness.client.send_raw(&raw).await;

        // The session ends with a protocol error and still detaches
        assert!(harness.handle.await.unwrap().is_err());
        assert_eq!(harness.bridge.human_count("ch1").await, 0);
    }

    #[tokio::test]
    async fn test_auth_after_authenticated_is_error() {
        let mut harness = spawn_session().await;
        authenticate(&mut harness).await;

        harness
            .client
            .send_json(&format!(r#"{{"type":"auth","key":"{}"}}"#, SECRET))
            .await;
        let reply = harness.client.next_json().await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["error"], "already authenticated");
    }
}
