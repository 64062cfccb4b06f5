//! Message and topic types.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// Topic
// ============================================================================

/// A (domain, channel) pair. The unit of subscription and broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub domain: String,
    pub channel: String,
}

impl Topic {
    /// Build a topic, rejecting empty domain or channel names.
    pub fn new(domain: impl Into<String>, channel: impl Into<String>) -> Result<Self> {
        let domain = domain.into();
        let channel = channel.into();
        if domain.is_empty() {
            return Err(Error::InvalidTopic("domain is empty".to_string()));
        }
        if channel.is_empty() {
            return Err(Error::InvalidTopic("channel is empty".to_string()));
        }
        Ok(Self { domain, channel })
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.channel)
    }
}

// ============================================================================
// Message
// ============================================================================

/// A stored message.
///
/// Created once by the message store and never mutated afterwards. The
/// `data` payload is opaque; `sender` is only compared for echo suppression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub domain: String,
    pub channel: String,
    pub sender: String,
}

impl Message {
    pub fn new(
        id: String,
        data: Value,
        timestamp: DateTime<Utc>,
        domain: &str,
        channel: &str,
        sender: &str,
    ) -> Self {
        Self {
            id,
            data,
            timestamp,
            domain: domain.to_string(),
            channel: channel.to_string(),
            sender: sender.to_string(),
        }
    }

    /// Whether this message was sent by the given connection/sender id.
    pub fn is_from(&self, sender: &str) -> bool {
        self.sender == sender
    }
}
