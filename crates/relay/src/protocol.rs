//! WebSocket protocol message types.
//!
//! Every frame is a JSON object with an `event` discriminator.

use crate::error::{RelayError, Result};
use common::{Message, SinceDate, Topic};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Client → Server Messages
// ============================================================================

/// Command sent from client to server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Start receiving broadcasts for a topic.
    Subscribe { domain: String, channel: String },
    /// Stop receiving broadcasts for a topic.
    Unsubscribe { domain: String, channel: String },
    /// Store a message and fan it out to other subscribers.
    #[serde(alias = "message")]
    Broadcast {
        domain: String,
        channel: String,
        message: Value,
    },
    /// Full history.
    Get {
        domain: String,
        channel: String,
        /// Skip messages this connection sent itself.
        #[serde(default)]
        exclude_own: bool,
    },
    /// History after an epoch-millis timestamp.
    GetSince {
        domain: String,
        channel: String,
        since: i64,
    },
    /// History after a client-formatted date.
    GetSinceDate {
        domain: String,
        channel: String,
        since: SinceDate,
    },
    /// History after a message id.
    GetSinceId {
        domain: String,
        channel: String,
        since_id: String,
    },
    /// A single message by id.
    GetById {
        domain: String,
        channel: String,
        id: String,
        #[serde(default)]
        exclude_own: bool,
    },
    /// A single message by arrival index.
    GetByIndex {
        domain: String,
        channel: String,
        index: i64,
    },
    /// The newest message.
    GetLatest { domain: String, channel: String },
    /// Any other `event` value. Ignored.
    #[serde(other)]
    Unknown,
}

impl ClientCommand {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self> {
        let command: ClientCommand = serde_json::from_str(text)?;
        command.validate()?;
        Ok(command)
    }

    /// The event name, as sent by the client.
    pub fn event(&self) -> &'static str {
        match self {
            ClientCommand::Subscribe { .. } => "subscribe",
            ClientCommand::Unsubscribe { .. } => "unsubscribe",
            ClientCommand::Broadcast { .. } => "broadcast",
            ClientCommand::Get { .. } => "get",
            ClientCommand::GetSince { .. } => "get_since",
            ClientCommand::GetSinceDate { .. } => "get_since_date",
            ClientCommand::GetSinceId { .. } => "get_since_id",
            ClientCommand::GetById { .. } => "get_by_id",
            ClientCommand::GetByIndex { .. } => "get_by_index",
            ClientCommand::GetLatest { .. } => "get_latest",
            ClientCommand::Unknown => "unknown",
        }
    }

    /// The topic this command targets, validated to be non-empty.
    pub fn topic(&self) -> Option<Result<Topic>> {
        let (domain, channel) = match self {
            ClientCommand::Subscribe { domain, channel }
            | ClientCommand::Unsubscribe { domain, channel }
            | ClientCommand::Broadcast { domain, channel, .. }
            | ClientCommand::Get { domain, channel, .. }
            | ClientCommand::GetSince { domain, channel, .. }
            | ClientCommand::GetSinceDate { domain, channel, .. }
            | ClientCommand::GetSinceId { domain, channel, .. }
            | ClientCommand::GetById { domain, channel, .. }
            | ClientCommand::GetByIndex { domain, channel, .. }
            | ClientCommand::GetLatest { domain, channel } => (domain, channel),
            ClientCommand::Unknown => return None,
        };
        Some(Topic::new(domain.as_str(), channel.as_str()).map_err(RelayError::from))
    }

    fn validate(&self) -> Result<()> {
        if let Some(topic) = self.topic() {
            topic?;
        }
        if let ClientCommand::Broadcast { message, .. } = self {
            if message.is_null() {
                return Err(RelayError::MissingField("message"));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Server → Client Messages
// ============================================================================

/// Frame pushed from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Sent once, right after the handshake.
    Connected {
        message: String,
        /// The connection id; matches `sender` on this client's broadcasts.
        uid: String,
    },
    /// Confirmation of subscription.
    Subscribed { domain: String, channel: String },
    /// Confirmation of unsubscription.
    Unsubscribed { domain: String, channel: String },
    /// A message fanned out to a subscriber.
    Broadcast(Message),
}

impl ServerFrame {
    pub fn subscribed(topic: &Topic) -> Self {
        ServerFrame::Subscribed {
            domain: topic.domain.clone(),
            channel: topic.channel.clone(),
        }
    }

    pub fn unsubscribed(topic: &Topic) -> Self {
        ServerFrame::Unsubscribed {
            domain: topic.domain.clone(),
            channel: topic.channel.clone(),
        }
    }
}

/// Which catch-up query a reply answers. Serialized as the request's event
/// name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Get,
    GetSince,
    GetSinceDate,
    GetSinceId,
    GetById,
    GetByIndex,
    GetLatest,
}

/// Result payload of a catch-up query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryData {
    Many(Vec<Message>),
    One(Option<Message>),
}

/// Reply to a catch-up query, sent to the requesting connection only.
#[derive(Debug, Clone, Serialize)]
pub struct QueryReply {
    pub event: QueryKind,
    pub domain: String,
    pub channel: String,
    pub data: QueryData,
}

impl QueryReply {
    pub fn many(event: QueryKind, topic: &Topic, messages: Vec<Message>) -> Self {
        Self {
            event,
            domain: topic.domain.clone(),
            channel: topic.channel.clone(),
            data: QueryData::Many(messages),
        }
    }

    pub fn one(event: QueryKind, topic: &Topic, message: Option<Message>) -> Self {
        Self {
            event,
            domain: topic.domain.clone(),
            channel: topic.channel.clone(),
            data: QueryData::One(message),
        }
    }
}
