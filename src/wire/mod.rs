//! Raw WebSocket wire protocol
//!
//! Hand-rolled RFC6455 subset: frame codec, upgrade handshake, and the
//! minimal HTTP request parsing the upgrade path needs. No extensions,
//! no sub-protocols, single-frame text messages only.

pub mod frame;
pub mod handshake;
pub mod http;

pub use frame::{
    decode_frames, encode_close_frame, encode_ping_frame, encode_pong_frame, encode_text_frame,
    Frame, Opcode,
};
pub use handshake::compute_accept_key;
pub use http::UpgradeRequest;
