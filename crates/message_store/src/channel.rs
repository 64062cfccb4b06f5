//! A single bounded channel log.

use chrono::{DateTime, Utc};
use common::Message;
use std::collections::VecDeque;

/// Append-only log of messages for one (domain, channel), capped at
/// `max_len`. Insertion order is preserved and eviction is oldest-first.
#[derive(Debug, Clone)]
pub struct ChannelLog {
    messages: VecDeque<Message>,
    max_len: usize,
}

impl ChannelLog {
    /// Create an empty log. A `max_len` of zero is treated as one.
    pub fn new(max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            messages: VecDeque::with_capacity(max_len.min(128)),
            max_len,
        }
    }

    /// Timestamp for the next appended message.
    ///
    /// Never earlier than the current newest entry, so timestamps stay
    /// non-decreasing even if the wall clock steps back.
    pub fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.messages.back() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        }
    }

    /// Append a message, then evict from the front until within bounds.
    /// Returns the number of evicted messages.
    pub fn push(&mut self, message: Message) -> usize {
        self.messages.push_back(message);
        let mut evicted = 0;
        while self.messages.len() > self.max_len {
            self.messages.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn latest(&self) -> Option<&Message> {
        self.messages.back()
    }

    /// Messages with a timestamp strictly after `since`.
    pub fn since(&self, since: DateTime<Utc>) -> Vec<Message> {
        self.filtered(|m| m.timestamp > since)
    }

    /// Messages strictly after the one with `id`. An unknown id yields the
    /// whole log.
    pub fn after_id(&self, id: &str) -> Vec<Message> {
        let start = self
            .messages
            .iter()
            .position(|m| m.id == id)
            .map_or(0, |index| index + 1);
        self.messages.iter().skip(start).cloned().collect()
    }

    pub fn filtered(&self, predicate: impl Fn(&Message) -> bool) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| predicate(m))
            .cloned()
            .collect()
    }
}
