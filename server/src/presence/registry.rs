//! Connection registry: at most one live connection per user.
//!
//! Every mutation of a user's slot goes through a single DashMap entry
//! operation, so two racing admissions for the same user serialize and
//! exactly one of them ends up owning the slot.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::chat::scope::UserId;
use crate::presence::PresenceState;
use crate::ws::ConnectionSender;

pub type ConnectionId = u64;

/// A live, authenticated socket owned by the registry.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub session_id: String,
    pub location: String,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub sender: ConnectionSender,
}

impl Connection {
    /// Presence derived from this connection being alive.
    pub fn presence(&self) -> PresenceState {
        PresenceState {
            user_id: self.user_id,
            is_online: true,
            last_seen_at: Some(self.last_heartbeat_at),
            location: Some(self.location.clone()),
            session_id: Some(self.session_id.clone()),
        }
    }

    /// Presence after this connection goes away at `at`.
    pub fn offline_presence(&self, at: DateTime<Utc>) -> PresenceState {
        PresenceState {
            user_id: self.user_id,
            is_online: false,
            last_seen_at: Some(at),
            location: Some(self.location.clone()),
            session_id: Some(self.session_id.clone()),
        }
    }
}

/// Result of admitting a new connection.
#[derive(Debug)]
pub struct Admission {
    pub connection_id: ConnectionId,
    /// The connection that previously held the user's slot, if any. The
    /// caller is responsible for closing its socket.
    pub superseded: Option<Connection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// No current connection matches; the caller has been superseded or swept.
    Unknown,
    Refreshed,
    LocationChanged { previous: String },
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<UserId, Connection>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sender` as the user's only connection. Whatever held the
    /// slot before, at the same or a different location, is superseded.
    pub fn admit(
        &self,
        user_id: UserId,
        location: &str,
        session_id: &str,
        sender: ConnectionSender,
        now: DateTime<Utc>,
    ) -> Admission {
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let connection = Connection {
            id: connection_id,
            user_id,
            session_id: session_id.to_string(),
            location: location.to_string(),
            connected_at: now,
            last_heartbeat_at: now,
            sender,
        };

        let superseded = self.connections.insert(user_id, connection);

        tracing::debug!(
            user_id,
            conn_id = connection_id,
            location,
            superseded = superseded.as_ref().map(|c| c.id),
            "Connection admitted"
        );

        Admission {
            connection_id,
            superseded,
        }
    }

    /// Refresh the heartbeat clock of `connection_id`, switching its location
    /// when the heartbeat declares a different one.
    pub fn heartbeat(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        location: Option<&str>,
        now: DateTime<Utc>,
    ) -> HeartbeatOutcome {
        let Some(mut entry) = self.connections.get_mut(&user_id) else {
            return HeartbeatOutcome::Unknown;
        };
        let conn = entry.value_mut();
        if conn.id != connection_id {
            return HeartbeatOutcome::Unknown;
        }

        conn.last_heartbeat_at = now;
        match location {
            Some(location) if location != conn.location => {
                let previous = std::mem::replace(&mut conn.location, location.to_string());
                HeartbeatOutcome::LocationChanged { previous }
            }
            _ => HeartbeatOutcome::Refreshed,
        }
    }

    /// Whether `connection_id` still holds `user_id`'s slot.
    pub fn is_current(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        self.connections
            .get(&user_id)
            .is_some_and(|conn| conn.id == connection_id)
    }

    /// Drop the user's connection, whichever it is. Removing an absent user
    /// is a no-op.
    pub fn remove(&self, user_id: UserId, now: DateTime<Utc>) -> Option<PresenceState> {
        self.take(user_id).map(|conn| conn.offline_presence(now))
    }

    /// Like `remove`, but hands back the connection so its socket can be closed.
    pub fn take(&self, user_id: UserId) -> Option<Connection> {
        self.connections.remove(&user_id).map(|(_, conn)| conn)
    }

    /// Drop the user's connection only if it is still `connection_id`.
    ///
    /// Socket teardown uses this so that a superseded or swept socket never
    /// removes its successor.
    pub fn remove_connection(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        now: DateTime<Utc>,
    ) -> Option<PresenceState> {
        self.connections
            .remove_if(&user_id, |_, conn| conn.id == connection_id)
            .map(|(_, conn)| conn.offline_presence(now))
    }

    /// Remove every connection whose last heartbeat is older than `timeout`
    /// and return them. A connection is returned by at most one sweep.
    pub fn remove_stale(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<Connection> {
        let is_stale = |conn: &Connection| now - conn.last_heartbeat_at > timeout;

        let candidates: Vec<(UserId, ConnectionId)> = self
            .connections
            .iter()
            .filter(|entry| is_stale(entry.value()))
            .map(|entry| (*entry.key(), entry.value().id))
            .collect();

        candidates
            .into_iter()
            .filter_map(|(user_id, connection_id)| {
                // Re-check under the shard lock: a heartbeat or a new admission
                // may have landed since the scan.
                self.connections
                    .remove_if(&user_id, |_, conn| conn.id == connection_id && is_stale(conn))
                    .map(|(_, conn)| conn)
            })
            .collect()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.connections.contains_key(&user_id)
    }

    pub fn presence(&self, user_id: UserId) -> Option<PresenceState> {
        self.connections.get(&user_id).map(|c| c.presence())
    }

    pub fn get(&self, user_id: UserId) -> Option<Connection> {
        self.connections.get(&user_id).map(|c| c.value().clone())
    }

    /// Copy of every live connection. Broadcast loops iterate this snapshot,
    /// never the live map.
    pub fn snapshot(&self) -> Vec<Connection> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Senders for whichever of `user_ids` are currently connected.
    pub fn senders_for(&self, user_ids: &HashSet<UserId>) -> Vec<(UserId, ConnectionSender)> {
        user_ids
            .iter()
            .filter_map(|id| {
                self.connections
                    .get(id)
                    .map(|conn| (*id, conn.sender.clone()))
            })
            .collect()
    }

    pub fn online_count(&self, user_ids: &HashSet<UserId>) -> usize {
        user_ids
            .iter()
            .filter(|id| self.connections.contains_key(id))
            .count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
