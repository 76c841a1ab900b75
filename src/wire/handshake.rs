//! WebSocket upgrade handshake

use base64::Engine;

/// Fixed GUID appended to the client nonce, per the wire protocol
const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Compute the `Sec-WebSocket-Accept` value for a client nonce:
/// base64(SHA1(nonce + GUID)).
pub fn compute_accept_key(client_nonce: &str) -> String {
    let input = format!("{}{}", client_nonce.trim(), ACCEPT_GUID);
    let digest = ring::digest::digest(
        &ring::digest::SHA1_FOR_LEGACY_USE_ONLY,
        input.as_bytes(),
    );
    base64::engine::general_purpose::STANDARD.encode(digest.as_ref())
}

/// Build the `101 Switching Protocols` response for an accepted upgrade
pub fn switching_protocols(accept_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key
    )
}
