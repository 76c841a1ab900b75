//! Test-side WebSocket client over an in-memory duplex stream

use crate::wire::frame::{decode_frames, encode_masked_frame, Frame, Opcode};
use bytes::BytesMut;
use std::collections::VecDeque;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Drives the client side of a session: masked frames out, decoded
/// frames in.
pub(crate) struct TestClient {
    stream: DuplexStream,
    buf: BytesMut,
    pending: VecDeque<Frame>,
}

impl TestClient {
    pub(crate) fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
            pending: VecDeque::new(),
        }
    }

    /// Send a masked TEXT frame carrying one JSON message
    pub(crate) async fn send_json(&mut self, json: &str) {
        let frame = encode_masked_frame(Opcode::Text, json.as_bytes(), [0x11, 0x22, 0x33, 0x44]);
        self.stream.write_all(&frame).await.unwrap();
    }

    /// Send a masked CLOSE frame
    pub(crate) async fn send_close(&mut self) {
        let frame = encode_masked_frame(Opcode::Close, &[], [0x11, 0x22, 0x33, 0x44]);
        self.stream.write_all(&frame).await.unwrap();
    }

    /// Send a masked PING frame
    pub(crate) async fn send_ping(&mut self, payload: &[u8]) {
        let frame = encode_masked_frame(Opcode::Ping, payload, [0x11, 0x22, 0x33, 0x44]);
        self.stream.write_all(&frame).await.unwrap();
    }

    /// Write raw bytes, bypassing the frame encoder
    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Next server frame, or `None` once the stream is closed
    pub(crate) async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(frame);
            }
            let n = self.stream.read_buf(&mut self.buf).await.ok()?;
            if n == 0 {
                return None;
            }
            self.pending.extend(decode_frames(&mut self.buf).unwrap());
        }
    }

    /// Next TEXT frame as JSON, skipping control frames
    pub(crate) async fn next_json(&mut self) -> serde_json::Value {
        loop {
            let frame = self
                .next_frame()
                .await
                .expect("stream closed while waiting for a text frame");
            if frame.opcode == Opcode::Text {
                return serde_json::from_slice(&frame.payload).unwrap();
            }
        }
    }

    /// Wait for the server to close the stream, skipping any frames
    /// still in flight
    pub(crate) async fn wait_closed(&mut self) {
        while self.next_frame().await.is_some() {}
    }
}
