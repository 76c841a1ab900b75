//! Per-connection upgrade handling
//!
//! Reads the HTTP request head off a fresh socket, applies the
//! pre-upgrade checks for the requested endpoint, completes the
//! upgrade, and runs the matching session to completion. All rejection
//! paths answer with a plain HTTP error and drop the socket.

use crate::bridge::ChannelBridge;
use crate::error::{Error, Result};
use crate::session::{AgentSession, HumanSession, SessionTuning};
use crate::store::ChannelStore;
use crate::wire::handshake::{compute_accept_key, switching_protocols};
use crate::wire::http::{error_response, UpgradeRequest};
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Request heads larger than this are refused outright
const MAX_REQUEST_HEAD: usize = 8 * 1024;

const HUMAN_PREFIX: &str = "/channel/";
const AGENT_PREFIX: &str = "/api/channel/";

/// Serve one accepted socket: upgrade it and run its session until the
/// peer goes away.
pub async fn handle_connection<S>(
    mut stream: S,
    bridge: Arc<ChannelBridge>,
    store: Arc<dyn ChannelStore>,
    tuning: SessionTuning,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (head, leftover) = match read_request_head(&mut stream).await {
        Ok(parts) => parts,
        Err(e) => {
            tracing::debug!("Unreadable request head: {}", e);
            reject(&mut stream, 400, "Bad Request").await?;
            return Ok(());
        }
    };

    let request = match UpgradeRequest::parse(&head) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!("Malformed upgrade request: {}", e);
            reject(&mut stream, 400, "Bad Request").await?;
            return Ok(());
        }
    };

    if request.method != "GET" {
        reject(&mut stream, 400, "Bad Request").await?;
        return Ok(());
    }

    if let Some(channel_id) = request.path.strip_prefix(AGENT_PREFIX) {
        serve_agent(stream, leftover, &request, channel_id, bridge, store, tuning).await
    } else if let Some(channel_id) = request.path.strip_prefix(HUMAN_PREFIX) {
        serve_human(stream, leftover, &request, channel_id, bridge, store, tuning).await
    } else {
        reject(&mut stream, 404, "Not Found").await?;
        Ok(())
    }
}

async fn serve_human<S>(
    mut stream: S,
    leftover: BytesMut,
    request: &UpgradeRequest,
    channel_id: &str,
    bridge: Arc<ChannelBridge>,
    store: Arc<dyn ChannelStore>,
    tuning: SessionTuning,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let channel = match store.get_channel(channel_id).await {
        Some(channel) if channel.enabled => channel,
        _ => {
            tracing::debug!(channel_id, "Human upgrade for unknown or disabled channel");
            reject(&mut stream, 404, "Not Found").await?;
            return Ok(());
        }
    };

    let nonce = match request.websocket_key() {
        Some(nonce) => nonce,
        None => {
            reject(&mut stream, 400, "Bad Request").await?;
            return Ok(());
        }
    };

    let accept = compute_accept_key(nonce);
    stream
        .write_all(switching_protocols(&accept).as_bytes())
        .await?;

    let session = HumanSession::new(channel, bridge, store, tuning);
    tracing::info!(channel_id, conn_id = %session.conn_id(), "Human connected");
    session.run(stream, leftover).await
}

async fn serve_agent<S>(
    mut stream: S,
    leftover: BytesMut,
    request: &UpgradeRequest,
    channel_id: &str,
    bridge: Arc<ChannelBridge>,
    store: Arc<dyn ChannelStore>,
    tuning: SessionTuning,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let token = match request.bearer_token() {
        Some(token) => token,
        None => {
            reject(&mut stream, 401, "Unauthorized").await?;
            return Ok(());
        }
    };

    let identity = match store.validate_bearer(token).await {
        Some(identity) => identity,
        None => {
            tracing::warn!(channel_id, "Agent upgrade with unknown bearer");
            reject(&mut stream, 401, "Unauthorized").await?;
            return Ok(());
        }
    };

    // The credential binds the agent to exactly one channel
    if identity.channel_id != channel_id || !identity.enabled {
        tracing::warn!(
            channel_id,
            bound_channel = %identity.channel_id,
            "Agent bearer does not match requested channel"
        );
        reject(&mut stream, 403, "Forbidden").await?;
        return Ok(());
    }

    let nonce = match request.websocket_key() {
        Some(nonce) => nonce,
        None => {
            reject(&mut stream, 400, "Bad Request").await?;
            return Ok(());
        }
    };

    let accept = compute_accept_key(nonce);
    stream
        .write_all(switching_protocols(&accept).as_bytes())
        .await?;

    let session = AgentSession::new(channel_id, bridge, store, tuning);
    session.run(stream, leftover).await
}

/// Read up to the header/body separator. Returns the head as text and
/// any bytes read past it (pipelined frames).
async fn read_request_head<S>(stream: &mut S) -> Result<(String, BytesMut)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if let Some(end) = find_head_end(&buf) {
            let head_bytes = buf.split_to(end + 4);
            let head = String::from_utf8(head_bytes[..end].to_vec())
                .map_err(|_| Error::Handshake("request head is not UTF-8".to_string()))?;
            return Ok((head, buf));
        }
        if buf.len() > MAX_REQUEST_HEAD {
            return Err(Error::Handshake("request head too large".to_string()));
        }
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(Error::Handshake(
                "connection closed before request head".to_string(),
            ));
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn reject<S>(stream: &mut S, status: u16, reason: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(error_response(status, reason).as_bytes())
        .await?;
    Ok(())
}
