//! Per-connection subscription registry.
//!
//! A set of exact (domain, channel) pairs. No wildcards: a broadcast to
//! `example.com/news` only reaches connections holding that exact pair.

use common::Topic;
use std::collections::{HashMap, HashSet};

/// The topics one connection wants to receive, keyed by domain.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    domains: HashMap<String, HashSet<String>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a topic. Returns false if it was already present.
    pub fn insert(&mut self, topic: Topic) -> bool {
        self.domains
            .entry(topic.domain)
            .or_default()
            .insert(topic.channel)
    }

    /// Remove a topic. Returns false if it was not present.
    pub fn remove(&mut self, topic: &Topic) -> bool {
        let Some(channels) = self.domains.get_mut(&topic.domain) else {
            return false;
        };
        let removed = channels.remove(&topic.channel);
        if channels.is_empty() {
            self.domains.remove(&topic.domain);
        }
        removed
    }

    /// Check for an exact (domain, channel) entry.
    pub fn matches(&self, domain: &str, channel: &str) -> bool {
        self.domains
            .get(domain)
            .is_some_and(|channels| channels.contains(channel))
    }

    pub fn contains(&self, topic: &Topic) -> bool {
        self.matches(&topic.domain, &topic.channel)
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn len(&self) -> usize {
        self.domains.values().map(HashSet::len).sum()
    }
}
