use std::collections::HashSet;

use shared::{domain::MessageId, protocol::Message};

/// Ordered, id-deduplicated messages of the active room.
///
/// Order is ascending `created_at`; equal timestamps keep arrival order.
#[derive(Debug, Clone)]
pub struct MessageCache {
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    max_items: usize,
}

impl MessageCache {
    /// Create a cache with an item cap (`max_items >= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            messages: Vec::new(),
            ids: HashSet::new(),
            max_items: max_items.max(1),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.messages.iter().map(|m| m.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// Drops everything and loads `messages` in timestamp order. Later
    /// duplicates of an id are discarded.
    pub fn replace(&mut self, mut messages: Vec<Message>) {
        self.clear();
        messages.sort_by_key(|m| m.created_at);
        for message in messages {
            if self.ids.insert(message.id.clone()) {
                self.messages.push(message);
            }
        }
        self.trim_to_max();
    }

    /// Returns false when the id is already present, or when the cache is
    /// full and the message is older than everything retained.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.ids.contains(&message.id) {
            return false;
        }
        if self.messages.len() >= self.max_items
            && self
                .messages
                .first()
                .is_some_and(|oldest| message.created_at < oldest.created_at)
        {
            return false;
        }

        let position = self
            .messages
            .partition_point(|existing| existing.created_at <= message.created_at);
        self.ids.insert(message.id.clone());
        self.messages.insert(position, message);
        self.trim_to_max();
        true
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
    }

    fn trim_to_max(&mut self) {
        if self.messages.len() <= self.max_items {
            return;
        }

        let excess = self.messages.len() - self.max_items;
        for removed in self.messages.drain(0..excess) {
            self.ids.remove(&removed.id);
        }
    }
}
