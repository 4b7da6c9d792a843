//! Ephemeral "who is looking at this message" tracking. Never persisted;
//! a message's entry disappears as soon as its last viewer leaves.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

use super::scope::{MessageId, UserId};

#[derive(Debug, Clone, Default)]
pub struct MessageViewSet {
    /// message_id -> viewers
    views: Arc<DashMap<MessageId, HashSet<UserId>>>,
}

impl MessageViewSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `user_id` was not already viewing.
    pub fn add_viewer(&self, message_id: MessageId, user_id: UserId) -> bool {
        self.views.entry(message_id).or_default().insert(user_id)
    }

    /// Returns true if `user_id` was viewing.
    pub fn remove_viewer(&self, message_id: MessageId, user_id: UserId) -> bool {
        let mut removed = false;
        if let Some(mut viewers) = self.views.get_mut(&message_id) {
            removed = viewers.remove(&user_id);
        }
        // Re-checked under the shard lock so a concurrent add is never lost.
        self.views.remove_if(&message_id, |_, viewers| viewers.is_empty());
        removed
    }

    /// Drop `user_id` from every view set. Returns the affected messages.
    pub fn remove_user_everywhere(&self, user_id: UserId) -> Vec<MessageId> {
        let message_ids: Vec<MessageId> = self
            .views
            .iter()
            .filter(|entry| entry.value().contains(&user_id))
            .map(|entry| *entry.key())
            .collect();

        message_ids
            .into_iter()
            .filter(|message_id| self.remove_viewer(*message_id, user_id))
            .collect()
    }

    pub fn viewers(&self, message_id: MessageId) -> HashSet<UserId> {
        self.views
            .get(&message_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn is_tracked(&self, message_id: MessageId) -> bool {
        self.views.contains_key(&message_id)
    }
}
