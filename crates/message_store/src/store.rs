//! Sharded in-memory message store using DashMap.
//!
//! Structure: domain -> channel -> ChannelLog
//!
//! Each `add` appends and evicts while holding the domain's shard lock, so
//! concurrent appends to one channel never interleave mid-eviction. Reads
//! clone the matching messages out and never create entries.

use crate::channel::ChannelLog;
use chrono::{DateTime, Utc};
use common::{generate_id, time, Message, Result, SinceDate};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Default bound on messages kept per channel.
pub const DEFAULT_MAX_MESSAGES_PER_CHANNEL: usize = 100;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum messages retained per (domain, channel).
    pub max_messages_per_channel: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_messages_per_channel: DEFAULT_MAX_MESSAGES_PER_CHANNEL,
        }
    }
}

/// Bounded per-channel message history.
///
/// Cloning is cheap and yields a handle to the same store.
#[derive(Debug, Clone)]
pub struct MessageStore {
    inner: Arc<MessageStoreInner>,
}

#[derive(Debug)]
struct MessageStoreInner {
    /// domain -> (channel -> ChannelLog)
    domains: DashMap<String, DashMap<String, ChannelLog>>,
    config: StoreConfig,
    /// Statistics
    total_added: AtomicU64,
    total_evicted: AtomicU64,
}

impl MessageStore {
    /// Create a new empty store with the default bound.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create a new empty store with a custom configuration.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(MessageStoreInner {
                domains: DashMap::new(),
                config,
                total_added: AtomicU64::new(0),
                total_evicted: AtomicU64::new(0),
            }),
        }
    }

    /// Create and append a message, evicting the oldest entries once the
    /// channel is over its bound. Creates the domain and channel if needed.
    pub fn add(&self, domain: &str, channel: &str, data: Value, sender: &str) -> Message {
        let channels = self
            .inner
            .domains
            .entry(domain.to_string())
            .or_default();

        let mut log = channels
            .entry(channel.to_string())
            .or_insert_with(|| ChannelLog::new(self.inner.config.max_messages_per_channel));

        let timestamp = log.next_timestamp(time::now_millis());
        let message = Message::new(generate_id(), data, timestamp, domain, channel, sender);
        let evicted = log.push(message.clone());

        self.inner.total_added.fetch_add(1, Ordering::Relaxed);
        if evicted > 0 {
            self.inner
                .total_evicted
                .fetch_add(evicted as u64, Ordering::Relaxed);
            debug!("Evicted {} message(s) from {}/{}", evicted, domain, channel);
        }

        message
    }

    /// Run `f` against a channel log if it exists.
    fn with_log<R>(&self, domain: &str, channel: &str, f: impl FnOnce(&ChannelLog) -> R) -> Option<R> {
        let channels = self.inner.domains.get(domain)?;
        let log = channels.get(channel)?;
        Some(f(log.value()))
    }

    /// Full history for a channel, oldest first.
    pub fn get(&self, domain: &str, channel: &str) -> Vec<Message> {
        self.with_log(domain, channel, ChannelLog::to_vec)
            .unwrap_or_default()
    }

    /// Messages with a timestamp strictly after `since`.
    pub fn get_since(&self, domain: &str, channel: &str, since: DateTime<Utc>) -> Vec<Message> {
        self.with_log(domain, channel, |log| log.since(since))
            .unwrap_or_default()
    }

    /// Messages strictly after the message with `since_id`.
    ///
    /// An id that is not in the log (never existed, or already evicted)
    /// yields the whole log, so a client that fell too far behind still
    /// receives everything retained.
    pub fn get_since_id(&self, domain: &str, channel: &str, since_id: &str) -> Vec<Message> {
        self.with_log(domain, channel, |log| log.after_id(since_id))
            .unwrap_or_default()
    }

    /// Like [`get_since`](Self::get_since), but normalizes a client-supplied
    /// date first. Fails only if the date cannot be normalized.
    pub fn get_since_date(&self, domain: &str, channel: &str, since: &SinceDate) -> Result<Vec<Message>> {
        let since = since.to_timestamp()?;
        Ok(self.get_since(domain, channel, since))
    }

    /// Messages whose id matches exactly (zero or one element).
    pub fn get_one(&self, domain: &str, channel: &str, id: &str) -> Vec<Message> {
        self.with_log(domain, channel, |log| log.filtered(|m| m.id == id))
            .unwrap_or_default()
    }

    /// The message at `index` in arrival order.
    pub fn get_by_index(&self, domain: &str, channel: &str, index: usize) -> Option<Message> {
        self.with_log(domain, channel, |log| log.get(index).cloned())
            .flatten()
    }

    /// The most recently appended message.
    pub fn get_latest(&self, domain: &str, channel: &str) -> Option<Message> {
        self.with_log(domain, channel, |log| log.latest().cloned())
            .flatten()
    }

    /// Full history minus messages sent by `sender`.
    pub fn get_excluding_sender(&self, domain: &str, channel: &str, sender: &str) -> Vec<Message> {
        self.with_log(domain, channel, |log| log.filtered(|m| !m.is_from(sender)))
            .unwrap_or_default()
    }

    /// The message with `id`, unless it was sent by `sender`.
    pub fn get_one_excluding_sender(
        &self,
        domain: &str,
        channel: &str,
        id: &str,
        sender: &str,
    ) -> Vec<Message> {
        self.with_log(domain, channel, |log| {
            log.filtered(|m| m.id == id && !m.is_from(sender))
        })
        .unwrap_or_default()
    }

    /// Total messages currently retained across all channels.
    pub fn message_count(&self) -> usize {
        self.inner
            .domains
            .iter()
            .map(|channels| channels.value().iter().map(|log| log.len()).sum::<usize>())
            .sum()
    }

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        let mut channel_count = 0;
        let mut message_count = 0;

        for channels in self.inner.domains.iter() {
            channel_count += channels.value().len();
            for log in channels.value().iter() {
                message_count += log.value().len();
            }
        }

        StoreStats {
            domain_count: self.inner.domains.len(),
            channel_count,
            message_count,
            total_added: self.inner.total_added.load(Ordering::Relaxed),
            total_evicted: self.inner.total_evicted.load(Ordering::Relaxed),
        }
    }

    /// Check if no channel holds a message.
    pub fn is_empty(&self) -> bool {
        self.inner
            .domains
            .iter()
            .all(|channels| channels.value().iter().all(|log| log.is_empty()))
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Store statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub domain_count: usize,
    pub channel_count: usize,
    pub message_count: usize,
    pub total_added: u64,
    pub total_evicted: u64,
}

// ============================================================================
// Tests
// ============================================================================
