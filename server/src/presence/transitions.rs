//! Per-user serialization of presence transitions.
//!
//! The registry entry changes atomically, but a transition also writes the
//! store and broadcasts. Holding the user's transition lock across all three
//! keeps a late offline transition from landing after a newer admission.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::chat::scope::UserId;

#[derive(Debug, Clone, Default)]
pub struct TransitionLocks {
    locks: Arc<DashMap<UserId, Arc<Mutex<()>>>>,
}

impl TransitionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user_id`'s transitions. Released when
    /// the guard drops.
    pub async fn acquire(&self, user_id: UserId) -> TransitionGuard {
        let lock = self.locks.entry(user_id).or_default().clone();
        TransitionGuard {
            guard: Some(lock.lock_owned().await),
            user_id,
            locks: self.locks.clone(),
        }
    }

    /// Number of users with a lock allocated. Idle users hold none.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct TransitionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    user_id: UserId,
    locks: Arc<DashMap<UserId, Arc<Mutex<()>>>>,
}

impl Drop for TransitionGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map still references an idle lock; waiters hold a clone.
        self.locks
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
