//! Presence lifecycle: admission, heartbeats, and the offline transition.
//!
//! These functions are the only way the registry changes in production; each
//! one feeds its transition to the broadcaster.

pub mod broadcaster;
pub mod handlers;
pub mod registry;
pub mod sweeper;
pub mod transitions;
pub mod visibility;

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::chat::scope::UserId;
use crate::error::CoreError;
use crate::state::AppState;
use crate::ws::broadcast::force_close;
use crate::ws::{close_code, ConnectionSender};
use registry::{ConnectionId, HeartbeatOutcome};

/// Location assumed when a client does not declare one.
pub const DEFAULT_LOCATION: &str = "web";

const OFFLINE_WRITE_ATTEMPTS: u32 = 3;
const OFFLINE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A user's presence, derived from whether the registry holds a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceState {
    pub user_id: UserId,
    pub is_online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub session_id: Option<String>,
}

impl PresenceState {
    pub fn offline(user_id: UserId, last_seen_at: Option<DateTime<Utc>>) -> Self {
        Self {
            user_id,
            is_online: false,
            last_seen_at,
            location: None,
            session_id: None,
        }
    }
}

/// Admit an authenticated socket.
///
/// Persists the online state first; if that fails nothing is registered and
/// nothing is broadcast. Any previous connection of the user is closed.
pub async fn connect(
    state: &AppState,
    user_id: UserId,
    location: Option<String>,
    session_id: Option<String>,
    sender: ConnectionSender,
) -> Result<ConnectionId, CoreError> {
    let location = location
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| DEFAULT_LOCATION.to_string());
    let session_id = session_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

    let _transition = state.transitions.acquire(user_id).await;

    {
        let location = location.clone();
        let session_id = session_id.clone();
        state
            .blocking(move |store| {
                store.set_user_online(user_id, Some(&location), Some(&session_id))
            })
            .await?;
    }

    let now = Utc::now();
    let admission = state
        .connections
        .admit(user_id, &location, &session_id, sender.clone(), now);

    if let Some(previous) = &admission.superseded {
        tracing::info!(
            user_id,
            old_conn_id = previous.id,
            old_location = %previous.location,
            new_location = %location,
            "Superseding previous connection"
        );
        force_close(
            &previous.sender,
            user_id,
            close_code::SUPERSEDED,
            "Superseded by a newer connection",
        );
    }

    let presence = PresenceState {
        user_id,
        is_online: true,
        last_seen_at: Some(now),
        location: Some(location),
        session_id: Some(session_id),
    };

    broadcaster::on_transition(state, &presence).await;
    broadcaster::send_snapshot(state, user_id, &sender).await;

    Ok(admission.connection_id)
}

/// Refresh a connection's heartbeat. A location switch is persisted, then
/// applied to the registry and broadcast like a fresh connect, without
/// touching the socket. If the switch cannot be persisted the heartbeat
/// still counts and the old location stays.
pub async fn heartbeat(
    state: &AppState,
    user_id: UserId,
    connection_id: ConnectionId,
    location: Option<String>,
) -> HeartbeatOutcome {
    let switch_to = location.filter(|l| !l.is_empty()).filter(|l| {
        state
            .connections
            .get(user_id)
            .is_some_and(|conn| conn.id == connection_id && conn.location != *l)
    });
    let Some(next) = switch_to else {
        return state
            .connections
            .heartbeat(user_id, connection_id, None, Utc::now());
    };

    let _transition = state.transitions.acquire(user_id).await;
    let Some(current) = state
        .connections
        .get(user_id)
        .filter(|conn| conn.id == connection_id)
    else {
        return HeartbeatOutcome::Unknown;
    };

    let persisted = {
        let location = next.clone();
        let session_id = current.session_id.clone();
        state
            .blocking(move |store| {
                store.set_user_online(user_id, Some(&location), Some(&session_id))
            })
            .await
    };
    if let Err(e) = persisted {
        tracing::error!(user_id, to = %next, error = %e, "Failed to persist location switch");
        return state
            .connections
            .heartbeat(user_id, connection_id, None, Utc::now());
    }

    let outcome = state
        .connections
        .heartbeat(user_id, connection_id, Some(&next), Utc::now());
    if let HeartbeatOutcome::LocationChanged { previous } = &outcome {
        if let Some(presence) = state.connections.presence(user_id) {
            tracing::info!(user_id, from = %previous, to = %next, "Location switched");
            broadcaster::on_transition(state, &presence).await;
        }
    }
    outcome
}

/// Socket teardown. Only removes the registry entry if it still belongs to
/// `connection_id`; returns whether an offline transition was broadcast.
pub async fn disconnect(state: &AppState, user_id: UserId, connection_id: ConnectionId) -> bool {
    match state
        .connections
        .remove_connection(user_id, connection_id, Utc::now())
    {
        Some(prior) => go_offline(state, prior).await,
        None => {
            tracing::debug!(
                user_id,
                conn_id = connection_id,
                "Connection already replaced or swept"
            );
            false
        }
    }
}

/// Explicitly take a user offline (sign-out), closing their socket.
pub async fn remove_user(state: &AppState, user_id: UserId) -> Option<PresenceState> {
    let now = Utc::now();
    let connection = state.connections.take(user_id)?;
    force_close(
        &connection.sender,
        user_id,
        close_code::NORMAL,
        "Signed out",
    );
    let prior = connection.offline_presence(now);
    go_offline(state, prior.clone()).await;
    Some(prior)
}

/// The offline transition shared by disconnect, sign-out and the sweeper.
///
/// Runs under the user's transition lock. If a newer connection took the
/// slot meanwhile, nothing is written or broadcast. The offline write is
/// retried a few times; if it still fails, no broadcast goes out and peers
/// keep the last state they were told until the next transition.
pub async fn go_offline(state: &AppState, prior: PresenceState) -> bool {
    let user_id = prior.user_id;
    let _transition = state.transitions.acquire(user_id).await;

    if state.connections.is_online(user_id) {
        tracing::debug!(user_id, "Newer connection present, skipping offline transition");
        return false;
    }

    let last_seen = prior.last_seen_at.unwrap_or_else(Utc::now);

    let left = state.viewers.remove_user_everywhere(user_id);
    if !left.is_empty() {
        tracing::debug!(user_id, messages = left.len(), "Cleared message views");
    }

    if !persist_offline(state, user_id, last_seen).await {
        return false;
    }

    let offline = PresenceState {
        is_online: false,
        last_seen_at: Some(last_seen),
        ..prior
    };
    broadcaster::on_transition(state, &offline).await;

    tracing::info!(user_id, "User went offline");
    true
}

async fn persist_offline(state: &AppState, user_id: UserId, last_seen: DateTime<Utc>) -> bool {
    for attempt in 1..=OFFLINE_WRITE_ATTEMPTS {
        match state
            .blocking(move |store| store.set_user_offline(user_id, last_seen))
            .await
        {
            Ok(()) => return true,
            Err(e) if attempt < OFFLINE_WRITE_ATTEMPTS => {
                tracing::warn!(user_id, attempt, error = %e, "Retrying offline write");
                tokio::time::sleep(OFFLINE_RETRY_DELAY).await;
            }
            Err(e) => {
                tracing::error!(
                    user_id,
                    error = %e,
                    "Failed to persist offline state, not broadcasting"
                );
            }
        }
    }
    false
}
