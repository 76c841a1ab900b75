//! Gateway module
//!
//! Owns the TCP accept loop: reads the HTTP request head, dispatches on
//! path (`/channel/{id}` for humans, `/api/channel/{id}` for agents),
//! applies the pre-upgrade checks, and hands the upgraded socket to a
//! session task.

pub mod handler;
pub mod server;

pub use handler::handle_connection;
pub use server::{Gateway, GatewayBuilder, GatewayState};
