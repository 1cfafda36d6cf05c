use std::collections::{HashMap, HashSet, VecDeque};

use shared::domain::Message;

use crate::merge::{retain_unseen, Edge};

/// Ordered, duplicate-free message history of one channel.
#[derive(Debug, Default, Clone)]
pub struct ChannelHistory {
    messages: VecDeque<Message>,
    known: HashSet<String>,
}

impl ChannelHistory {
    pub fn oldest(&self) -> Option<&Message> {
        self.messages.front()
    }

    pub fn latest(&self) -> Option<&Message> {
        self.messages.back()
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    /// Attaches the unseen part of `batch` at `edge` and returns how many
    /// messages were added.
    pub fn merge(&mut self, batch: Vec<Message>, edge: Edge) -> usize {
        let fresh = retain_unseen(&mut self.known, batch);
        let added = fresh.len();
        match edge {
            Edge::Newer => self.messages.extend(fresh),
            Edge::Older => {
                for message in fresh.into_iter().rev() {
                    self.messages.push_front(message);
                }
            }
        }
        added
    }
}

/// Per-channel histories. A channel with no entry has never been loaded.
#[derive(Debug, Default)]
pub struct ChannelMessageCache {
    channels: HashMap<String, ChannelHistory>,
}

/// What a merge did to the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub added: usize,
    pub created: bool,
    pub messages: Vec<Message>,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.added > 0 || self.created
    }
}

impl ChannelMessageCache {
    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn latest(&self, channel: &str) -> Option<&Message> {
        self.channels.get(channel).and_then(ChannelHistory::latest)
    }

    pub fn oldest(&self, channel: &str) -> Option<&Message> {
        self.channels.get(channel).and_then(ChannelHistory::oldest)
    }

    /// Cached sequence, or `None` if the channel has never been loaded.
    pub fn get(&self, channel: &str) -> Option<Vec<Message>> {
        self.channels.get(channel).map(ChannelHistory::snapshot)
    }

    pub fn ensure(&mut self, channel: &str) -> &mut ChannelHistory {
        self.channels.entry(channel.to_string()).or_default()
    }

    pub fn merge(&mut self, channel: &str, batch: Vec<Message>, edge: Edge) -> MergeOutcome {
        let created = !self.channels.contains_key(channel);
        let history = self.ensure(channel);
        let added = history.merge(batch, edge);
        MergeOutcome {
            added,
            created,
            messages: history.snapshot(),
        }
    }

    pub fn remove(&mut self, channel: &str) -> Option<ChannelHistory> {
        self.channels.remove(channel)
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }
}
