//! Inbound command dispatch.
//!
//! Decode failures and invalid commands are logged and dropped. The
//! connection stays open and the client gets no error frame.

use crate::connection::{ConnectionId, ConnectionManager};
use crate::error::Result;
use crate::protocol::{ClientCommand, QueryKind, QueryReply, ServerFrame};
use common::time;
use metrics::counter;
use tracing::{debug, warn};

/// Decode and handle one inbound text frame.
pub fn handle_frame(manager: &ConnectionManager, id: &ConnectionId, text: &str) {
    let command = match ClientCommand::decode(text) {
        Ok(command) => command,
        Err(e) => {
            counter!("relay_malformed_commands_total").increment(1);
            warn!("Ignoring malformed frame from {}: {}", id, e);
            return;
        }
    };

    let event = command.event();
    if let Err(e) = handle_command(manager, id, command) {
        counter!("relay_malformed_commands_total").increment(1);
        warn!("Error handling {} from {}: {}", event, id, e);
    }
}

/// Handle a decoded client command.
pub fn handle_command(manager: &ConnectionManager, id: &ConnectionId, command: ClientCommand) -> Result<()> {
    let topic = match command.topic() {
        Some(topic) => topic?,
        None => {
            debug!("Ignoring unknown event from {}", id);
            return Ok(());
        }
    };
    let store = manager.store();

    match command {
        ClientCommand::Subscribe { .. } => {
            if !manager.subscribe(id, topic.clone())? {
                debug!("Connection {} already subscribed to {}", id, topic);
            }
            manager.send_to(id, &ServerFrame::subscribed(&topic))
        }
        ClientCommand::Unsubscribe { .. } => {
            manager.unsubscribe(id, &topic)?;
            manager.send_to(id, &ServerFrame::unsubscribed(&topic))
        }
        ClientCommand::Broadcast { message, .. } => {
            manager.publish(&topic.domain, &topic.channel, message, id.as_str());
            Ok(())
        }
        ClientCommand::Get { exclude_own, .. } => {
            let messages = if exclude_own {
                store.get_excluding_sender(&topic.domain, &topic.channel, id.as_str())
            } else {
                store.get(&topic.domain, &topic.channel)
            };
            manager.send_to(id, &QueryReply::many(QueryKind::Get, &topic, messages))
        }
        ClientCommand::GetSince { since, .. } => {
            let since = time::from_millis(since)?;
            let messages = store.get_since(&topic.domain, &topic.channel, since);
            manager.send_to(id, &QueryReply::many(QueryKind::GetSince, &topic, messages))
        }
        ClientCommand::GetSinceDate { since, .. } => {
            let messages = store.get_since_date(&topic.domain, &topic.channel, &since)?;
            manager.send_to(id, &QueryReply::many(QueryKind::GetSinceDate, &topic, messages))
        }
        ClientCommand::GetSinceId { since_id, .. } => {
            let messages = store.get_since_id(&topic.domain, &topic.channel, &since_id);
            manager.send_to(id, &QueryReply::many(QueryKind::GetSinceId, &topic, messages))
        }
        ClientCommand::GetById { id: message_id, exclude_own, .. } => {
            let messages = if exclude_own {
                store.get_one_excluding_sender(&topic.domain, &topic.channel, &message_id, id.as_str())
            } else {
                store.get_one(&topic.domain, &topic.channel, &message_id)
            };
            manager.send_to(id, &QueryReply::many(QueryKind::GetById, &topic, messages))
        }
        ClientCommand::GetByIndex { index, .. } => {
            let message = usize::try_from(index)
                .ok()
                .and_then(|i| store.get_by_index(&topic.domain, &topic.channel, i));
            manager.send_to(id, &QueryReply::one(QueryKind::GetByIndex, &topic, message))
        }
        ClientCommand::GetLatest { .. } => {
            let message = store.get_latest(&topic.domain, &topic.channel);
            manager.send_to(id, &QueryReply::one(QueryKind::GetLatest, &topic, message))
        }
        // Carries no topic, so it returned above
        ClientCommand::Unknown => Ok(()),
    }
}
