//! WebSocket frame codec
//!
//! Server-to-client frames are never masked; client-to-server frames
//! carry a 4-byte masking key after the length field. An unmasked client
//! frame is accepted and its payload treated as already in the clear.

use crate::error::{Error, Result};
use bytes::BytesMut;

/// Upper bound on a single frame's advertised payload length. A header
/// claiming more is a protocol error, not a request to buffer.
pub const MAX_PAYLOAD_LEN: usize = 1 << 24;

/// Frame opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation of a fragmented message (ignored by sessions)
    Continuation,
    /// UTF-8 text payload
    Text,
    /// Binary payload
    Binary,
    /// Peer requested close
    Close,
    /// Liveness probe
    Ping,
    /// Liveness reply
    Pong,
}

impl Opcode {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }
}

/// One decoded frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// FIN bit
    pub fin: bool,
    /// Frame opcode
    pub opcode: Opcode,
    /// Whether the client set the mask bit (payload is already unmasked)
    pub masked: bool,
    /// Unmasked payload bytes
    pub payload: Vec<u8>,
}

/// Encode a server-to-client frame. Never masked.
fn encode_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 10);
    out.push(0x80 | opcode.bits());
    let len = payload.len();
    if len <= 125 {
        out.push(len as u8);
    } else if len <= 65535 {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}

/// Encode a single-frame TEXT message
pub fn encode_text_frame(payload: &[u8]) -> Vec<u8> {
    encode_frame(Opcode::Text, payload)
}

/// Encode a PING frame
pub fn encode_ping_frame(payload: &[u8]) -> Vec<u8> {
    encode_frame(Opcode::Ping, payload)
}

/// Encode a PONG frame echoing a received PING payload
pub fn encode_pong_frame(payload: &[u8]) -> Vec<u8> {
    encode_frame(Opcode::Pong, payload)
}

/// Encode an empty CLOSE frame
pub fn encode_close_frame() -> Vec<u8> {
    encode_frame(Opcode::Close, &[])
}

/// Decode as many complete frames as the buffer holds.
///
/// Complete frames are consumed from the front of `buf`; the unconsumed
/// tail stays in place for the next read. An unrecognized opcode is a
/// protocol error.
pub fn decode_frames(buf: &mut BytesMut) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    while let Some(frame) = decode_one(buf)? {
        frames.push(frame);
    }
    Ok(frames)
}

/// Decode one frame from the front of the buffer, or `None` if more
/// bytes are needed.
fn decode_one(buf: &mut BytesMut) -> Result<Option<Frame>> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & 0x80 != 0;
    let opcode_bits = buf[0] & 0x0F;
    let masked = buf[1] & 0x80 != 0;
    let len7 = (buf[1] & 0x7F) as usize;

    let mut header_len = 2;
    let payload_len = match len7 {
        126 => {
            if buf.len() < header_len + 2 {
                return Ok(None);
            }
            header_len += 2;
            u16::from_be_bytes([buf[2], buf[3]]) as usize
        }
        127 => {
            if buf.len() < header_len + 8 {
                return Ok(None);
            }
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[2..10]);
            let advertised = u64::from_be_bytes(bytes);
            if advertised > MAX_PAYLOAD_LEN as u64 {
                return Err(Error::Protocol(format!(
                    "frame payload of {} bytes exceeds the {} byte limit",
                    advertised, MAX_PAYLOAD_LEN
                )));
            }
            header_len += 8;
            advertised as usize
        }
        n => n,
    };
    // payload_len is capped well below usize::MAX, so the length
    // arithmetic below cannot overflow

    let masking_key = if masked {
        if buf.len() < header_len + 4 {
            return Ok(None);
        }
        let key = [
            buf[header_len],
            buf[header_len + 1],
            buf[header_len + 2],
            buf[header_len + 3],
        ];
        header_len += 4;
        Some(key)
    } else {
        None
    };

    if buf.len() < header_len + payload_len {
        return Ok(None);
    }

    let opcode = Opcode::from_bits(opcode_bits)
        .ok_or_else(|| Error::Protocol(format!("unknown opcode 0x{:X}", opcode_bits)))?;

    let _ = buf.split_to(header_len);
    let mut payload = buf.split_to(payload_len).to_vec();
    if let Some(key) = masking_key {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    Ok(Some(Frame {
        fin,
        opcode,
        masked,
        payload,
    }))
}

/// Client-side encoder for in-crate tests: masked frame as a browser
/// would send it.
#[cfg(test)]
pub(crate) fn encode_masked_frame(opcode: Opcode, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push(0x80 | opcode.bits());
    let len = payload.len();
    if len <= 125 {
        out.push(0x80 | len as u8);
    } else if len <= 65535 {
        out.push(0x80 | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(0x80 | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
    out.extend_from_slice(&key);
    out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
    out
}
