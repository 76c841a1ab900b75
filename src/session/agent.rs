//! Agent session state machine
//!
//! Agents authenticate with a bearer credential before the upgrade, so
//! there is no in-band auth window here. A session binds the channel's
//! single agent slot on entry; if the slot is taken the socket is
//! turned away immediately.

use crate::bridge::ChannelBridge;
use crate::error::Result;
use crate::protocol::{AgentMessage, ChatMessage, ServerMessage};
use crate::session::{new_message_id, now_timestamp, Flow, RateLimiter, SessionTuning};
use crate::store::ChannelStore;
use crate::wire::frame::{self, Opcode};
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time;

/// One agent socket, pre-authenticated by the gateway
pub struct AgentSession {
    channel_id: String,
    bridge: Arc<ChannelBridge>,
    store: Arc<dyn ChannelStore>,
    tuning: SessionTuning,
    limiter: RateLimiter,
}

impl AgentSession {
    pub fn new(
        channel_id: impl Into<String>,
        bridge: Arc<ChannelBridge>,
        store: Arc<dyn ChannelStore>,
        tuning: SessionTuning,
    ) -> Self {
        let limiter = RateLimiter::new(tuning.agent_rate_limit);
        Self {
            channel_id: channel_id.into(),
            bridge,
            store,
            tuning,
            limiter,
        }
    }

    /// Drive the session to completion. `leftover` holds bytes read
    /// past the upgrade request head.
    pub async fn run<S>(self, stream: S, leftover: BytesMut) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let mut buf = leftover;
        let mut session = self;

        // Exactly one agent per channel; a second socket is refused
        // without disturbing the bound one.
        if !session
            .bridge
            .attach_agent(&session.channel_id, out_tx)
            .await
        {
            session
                .send(&mut writer, &ServerMessage::Error {
                    error: "agent already connected".to_string(),
                })
                .await?;
            writer.write_all(&frame::encode_close_frame()).await?;
            tracing::warn!(
                channel_id = %session.channel_id,
                "Refused second agent for channel"
            );
            return Ok(());
        }
        tracing::info!(channel_id = %session.channel_id, "Agent bound");

        let mut ping = time::interval_at(
            time::Instant::now() + session.tuning.ping_interval,
            session.tuning.ping_interval,
        );

        let result = async {
            if session.drain_frames(&mut buf, &mut writer).await? == Flow::Close {
                return Ok(());
            }

            loop {
                tokio::select! {
                    read = reader.read_buf(&mut buf) => {
                        match read {
                            Ok(0) => return Ok(()),
                            Ok(_) => {
                                if session.drain_frames(&mut buf, &mut writer).await? == Flow::Close {
                                    return Ok(());
                                }
                            }
                            Err(e) => {
                                tracing::debug!(channel_id = %session.channel_id, "Socket read error: {}", e);
                                return Ok(());
                            }
                        }
                    }
                    Some(json) = out_rx.recv() => {
                        writer.write_all(&frame::encode_text_frame(json.as_bytes())).await?;
                    }
                    _ = ping.tick() => {
                        writer.write_all(&frame::encode_ping_frame(b"")).await?;
                    }
                }
            }
        }
        .await;

        session.bridge.detach_agent(&session.channel_id).await;
        tracing::info!(channel_id = %session.channel_id, "Agent session closed");
        result
    }

    async fn drain_frames<W>(&mut self, buf: &mut BytesMut, writer: &mut W) -> Result<Flow>
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
                Opcode::Pong | Opcode::Continuation | Opcode::Binary => {}
                Opcode::Text => self.handle_text(&decoded.payload, writer).await?,
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle_text<W>(&mut self, payload: &[u8], writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let msg: AgentMessage = match serde_json::from_slice(payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(channel_id = %self.channel_id, "Unparseable agent message: {}", e);
                self.send(writer, &ServerMessage::Error {
                    error: "invalid message".to_string(),
                })
                .await?;
                return Ok(());
            }
        };

        if !self.limiter.check() {
            self.send(writer, &ServerMessage::Error {
                error: "rate limit exceeded".to_string(),
            })
            .await?;
            return Ok(());
        }

        let target = msg.target().map(str::to_string);
        match msg {
            AgentMessage::Message { text, id, .. } => {
                let text = text.unwrap_or_default();
                let id = id.unwrap_or_else(new_message_id);
                let timestamp = now_timestamp();
                let record = ChatMessage {
                    id: id.clone(),
                    from: "agent".to_string(),
                    text: text.clone(),
                    timestamp: timestamp.clone(),
                    conn_id: target.clone(),
                };
                self.store.save_chat_message(&self.channel_id, &record).await;
                self.deliver(
                    target.as_deref(),
                    &ServerMessage::Message {
                        from: "agent".to_string(),
                        text,
                        id,
                        timestamp,
                        conn_id: None,
                    },
                )
                .await;
            }
            AgentMessage::Chunk { text, id, .. } => {
                self.deliver(
                    target.as_deref(),
                    &ServerMessage::Chunk {
                        text: text.unwrap_or_default(),
                        id: id.unwrap_or_default(),
                    },
                )
                .await;
            }
            AgentMessage::Done { text, id, .. } => {
                let id = id.unwrap_or_else(new_message_id);
                let timestamp = now_timestamp();
                // Only a stream that carried its final text is persisted
                if let Some(text) = text {
                    let record = ChatMessage {
                        id: id.clone(),
                        from: "agent".to_string(),
                        text,
                        timestamp: timestamp.clone(),
                        conn_id: target.clone(),
                    };
                    self.store.save_chat_message(&self.channel_id, &record).await;
                }
                self.deliver(target.as_deref(), &ServerMessage::Done { id, timestamp })
                    .await;
            }
            AgentMessage::Typing { .. } => {
                self.deliver(target.as_deref(), &ServerMessage::Typing).await;
            }
            AgentMessage::Error { error, .. } => {
                self.deliver(
                    target.as_deref(),
                    &ServerMessage::Error {
                        error: error.unwrap_or_default(),
                    },
                )
                .await;
            }
            AgentMessage::Ping => {
                self.send(writer, &ServerMessage::Pong).await?;
            }
        }
        Ok(())
    }

    /// Route to the addressed human, or to everybody on the channel
    /// when no target was given
    async fn deliver(&self, target: Option<&str>, msg: &ServerMessage) {
        match target {
            Some(conn_id) => {
                self.bridge
                    .route_to_human(&self.channel_id, conn_id, msg)
                    .await;
            }
            None => self.bridge.broadcast_to_humans(&self.channel_id, msg).await,
        }
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
