//! WebSocket relay for per-channel pub/sub with bounded history.
//!
//! This service:
//! - Accepts WebSocket connections on `/_ws/` and `/socket.io/`
//! - Manages per-connection subscriptions to (domain, channel) topics
//! - Stores every broadcast in a bounded per-channel log
//! - Fans broadcasts out to subscribers, never echoing to the sender
//! - Answers catch-up queries against the log
//!
//! ## Architecture
//!
//! ```text
//! WebSocket frame / POST /broadcast
//!         ↓
//! dispatch (decode + validate)
//!         ↓
//! ConnectionManager ── MessageStore (bounded logs)
//!         ↓
//! per-connection outbound queue → WebSocket writer
//! ```

pub mod api;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod subscription;
pub mod ws_server;

pub use api::{create_router, serve, AppState};
pub use config::RelayConfig;
pub use connection::{Connection, ConnectionId, ConnectionManager};
pub use error::{RelayError, Result};
pub use protocol::{ClientCommand, QueryKind, QueryReply, ServerFrame};
pub use subscription::SubscriptionSet;
