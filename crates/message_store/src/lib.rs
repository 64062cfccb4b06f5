//! Bounded in-memory message history.
//!
//! Keeps a per-(domain, channel) append-only log capped at a fixed length.
//! Once a log is full, each append evicts the oldest message (strict FIFO).
//!
//! # Architecture
//!
//! - **Sharded storage**: DashMap keyed by domain, each holding a DashMap of
//!   channel logs
//! - **Lazy creation**: domains and channels appear on first `add` and are
//!   never removed
//! - **Total reads**: every query over an unknown domain or channel returns
//!   an empty result instead of an error
//!
//! # Example
//!
//! ```ignore
//! use message_store::MessageStore;
//! use serde_json::json;
//!
//! let store = MessageStore::new();
//! let msg = store.add("example.com", "news", json!("hello"), "conn1");
//! assert_eq!(store.get_latest("example.com", "news"), Some(msg));
//! ```

pub mod channel;
pub mod store;

pub use channel::ChannelLog;
pub use store::{MessageStore, StoreConfig, StoreStats, DEFAULT_MAX_MESSAGES_PER_CHANNEL};
