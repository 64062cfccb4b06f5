//! Connection state and the connection manager.
//!
//! The manager owns every live connection and its subscription set. It never
//! touches a transport object: each connection is an id plus an unbounded
//! channel of pre-serialized text frames, drained by the transport adapter.
//!
//! Locking:
//! - `connections` is a single RwLock. Fan-out holds the read lock, so
//!   connects/disconnects are never observed mid-fan-out.
//! - `publish_gate` serializes store append + fan-out, so every recipient
//!   sees broadcasts in store append order.
//! - Order is always gate → store (released) → connections.

use crate::error::{RelayError, Result};
use crate::protocol::ServerFrame;
use crate::subscription::SubscriptionSet;
use chrono::{DateTime, Utc};
use common::{generate_id, Message, Topic};
use message_store::MessageStore;
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Human text carried by the `connected` frame.
pub const CONNECTED_MESSAGE: &str = "Connected to relay";

/// Unique connection identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(generate_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// State for a single live connection.
pub struct Connection {
    /// Unique connection identifier.
    pub id: ConnectionId,
    /// Outbound text frames, drained by the transport's writer task.
    tx: mpsc::UnboundedSender<String>,
    /// Topics this connection receives broadcasts for.
    subscriptions: SubscriptionSet,
    /// When the connection opened.
    pub connected_at: DateTime<Utc>,
}

impl Connection {
    fn new(id: ConnectionId, tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id,
            tx,
            subscriptions: SubscriptionSet::new(),
            connected_at: Utc::now(),
        }
    }

    /// Whether the transport side is still draining frames.
    pub fn is_writable(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a raw text frame. Returns false if the transport is gone.
    pub fn send_text(&self, text: String) -> bool {
        self.tx.send(text).is_ok()
    }

    /// Broadcast eligibility: writable, subscribed to the exact topic, and
    /// not the message's own sender.
    pub fn should_receive(&self, message: &Message) -> bool {
        self.is_writable()
            && !self.subscriptions.is_empty()
            && !message.is_from(self.id.as_str())
            && self.subscriptions.matches(&message.domain, &message.channel)
    }
}

/// Registry of live connections and entry point for publishing.
pub struct ConnectionManager {
    /// Connection ID → Connection.
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    /// Shared message history.
    store: MessageStore,
    /// Held across store append + fan-out.
    publish_gate: Mutex<()>,
}

impl ConnectionManager {
    /// Create a manager backed by the given store.
    pub fn new(store: MessageStore) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            store,
            publish_gate: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Register a new connection and queue its `connected` frame.
    ///
    /// Returns the assigned id and the receiver the transport drains.
    pub fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        let connection = Connection::new(id.clone(), tx);

        let ack = ServerFrame::Connected {
            message: CONNECTED_MESSAGE.to_string(),
            uid: id.to_string(),
        };
        match serde_json::to_string(&ack) {
            Ok(json) => {
                connection.send_text(json);
            }
            Err(e) => warn!("Failed to serialize connected frame: {}", e),
        }

        self.connections.write().insert(id.clone(), connection);
        info!("Connection {} registered", id);
        (id, rx)
    }

    /// Remove a connection and discard its subscriptions.
    pub fn unregister(&self, id: &ConnectionId) {
        if let Some(connection) = self.connections.write().remove(id) {
            info!(
                "Connection {} unregistered ({} subscriptions dropped)",
                id,
                connection.subscriptions.len()
            );
        }
    }

    /// Add a topic to a connection's subscriptions.
    /// Returns false if it was already subscribed.
    pub fn subscribe(&self, id: &ConnectionId, topic: Topic) -> Result<bool> {
        let mut connections = self.connections.write();
        let connection = connections
            .get_mut(id)
            .ok_or_else(|| RelayError::ConnectionNotFound(id.to_string()))?;

        debug!("Connection {} subscribing to {}", id, topic);
        Ok(connection.subscriptions.insert(topic))
    }

    /// Remove a topic from a connection's subscriptions.
    /// Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: &ConnectionId, topic: &Topic) -> Result<bool> {
        let mut connections = self.connections.write();
        let connection = connections
            .get_mut(id)
            .ok_or_else(|| RelayError::ConnectionNotFound(id.to_string()))?;

        debug!("Connection {} unsubscribing from {}", id, topic);
        Ok(connection.subscriptions.remove(topic))
    }

    /// Serialize a frame and queue it for one connection.
    pub fn send_to(&self, id: &ConnectionId, frame: &impl Serialize) -> Result<()> {
        let json = serde_json::to_string(frame)?;
        let connections = self.connections.read();
        let connection = connections
            .get(id)
            .ok_or_else(|| RelayError::ConnectionNotFound(id.to_string()))?;

        if connection.send_text(json) {
            Ok(())
        } else {
            Err(RelayError::ChannelSend)
        }
    }

    /// Store a message and fan it out to every eligible subscriber.
    pub fn publish(&self, domain: &str, channel: &str, data: Value, sender: &str) -> Message {
        let _gate = self.publish_gate.lock();
        let message = self.store.add(domain, channel, data, sender);
        let delivered = self.fan_out(&message);

        counter!("relay_broadcasts_total").increment(1);
        debug!(
            "Broadcast {} on {}/{} from {} delivered to {} connection(s)",
            message.id, domain, channel, sender, delivered
        );
        message
    }

    /// Deliver an already-stored message. Returns the number of recipients.
    fn fan_out(&self, message: &Message) -> usize {
        // Pre-serialize the frame once
        let json = match serde_json::to_string(&ServerFrame::Broadcast(message.clone())) {
            Ok(j) => j,
            Err(e) => {
                warn!("Failed to serialize broadcast {}: {}", message.id, e);
                return 0;
            }
        };

        let connections = self.connections.read();
        let mut delivered = 0;
        for connection in connections.values() {
            if !connection.should_receive(message) {
                continue;
            }
            if connection.send_text(json.clone()) {
                delivered += 1;
            } else {
                debug!("Failed to send to connection {}", connection.id);
            }
        }

        counter!("relay_deliveries_total").increment(delivered as u64);
        delivered
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether a connection is live and subscribed to a topic.
    pub fn is_subscribed(&self, id: &ConnectionId, topic: &Topic) -> bool {
        self.connections
            .read()
            .get(id)
            .is_some_and(|c| c.subscriptions.contains(topic))
    }
}
