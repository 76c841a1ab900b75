//! relayclaw - Real-time channel relay between humans and AI agents
//!
//! relayclaw is the live-channel core of an agent gateway: browsers join
//! a channel over a raw WebSocket and talk to the one AI agent bound to
//! that channel, with streamed replies, typing indicators, and an
//! offline backlog for the agent.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     relayclaw Gateway                     │
//! │  ┌───────────────────────────────────────────────────┐   │
//! │  │              TCP accept / HTTP upgrade             │   │
//! │  │   /channel/{id} (human)   /api/channel/{id} (agent)│   │
//! │  └───────────┬────────────────────────┬──────────────┘   │
//! │              │                        │                  │
//! │  ┌───────────▼──────────┐  ┌──────────▼───────────┐      │
//! │  │    Human sessions    │  │    Agent session     │      │
//! │  │  - in-band auth      │  │  - bearer pre-auth   │      │
//! │  │  - message/history   │  │  - stream chunks     │      │
//! │  └───────────┬──────────┘  └──────────┬───────────┘      │
//! │              │                        │                  │
//! │  ┌───────────▼────────────────────────▼──────────────┐   │
//! │  │                 Channel bridge                     │   │
//! │  │  - humans map + single agent slot per channel      │   │
//! │  │  - offline backlog (100, drop-newest)              │   │
//! │  └───────────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`gateway`]: accept loop, upgrade dispatch, lifecycle
//! - [`wire`]: hand-rolled WebSocket frame codec and handshake
//! - [`session`]: human and agent session state machines
//! - [`bridge`]: per-channel routing state
//! - [`protocol`]: the JSON message vocabulary
//! - [`store`]: persistence seam and in-memory implementation
//! - [`config`]: configuration management

pub mod bridge;
pub mod config;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod session;
pub mod store;
pub mod wire;

pub use config::Config;
pub use error::{Error, Result};
