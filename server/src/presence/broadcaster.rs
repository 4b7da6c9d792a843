//! Presence fanout.
//!
//! Every connected client hears about every transition; privacy rules decide
//! what the payload says, not who receives it.

use chrono::Utc;
use std::collections::HashMap;

use super::visibility::{self, PresenceView, VisibilitySettings};
use super::PresenceState;
use crate::chat::fanout;
use crate::chat::scope::{ChatRef, ChatScope, UserId};
use crate::error::StoreError;
use crate::state::AppState;
use crate::ws::broadcast::send_event;
use crate::ws::events::ServerEvent;
use crate::ws::ConnectionSender;

/// Deliveries made for one transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionReport {
    pub status_updates: usize,
    pub group_updates: usize,
}

pub fn status_event(user_id: UserId, view: &PresenceView) -> ServerEvent {
    ServerEvent::UserStatusUpdate {
        user_id,
        is_online: view.exposed_online,
        last_seen: view.exposed_last_seen,
        location: view.exposed_location.clone(),
    }
}

/// Broadcast a presence transition of `presence.user_id`.
///
/// Sends a scrubbed `userStatusUpdate` to every other connected client, then
/// a `groupOnlineCountUpdate` to the members of each group the user is in.
/// If the user's privacy settings cannot be read, nothing is sent.
pub async fn on_transition(state: &AppState, presence: &PresenceState) -> TransitionReport {
    let user_id = presence.user_id;
    let settings = match state
        .blocking(move |store| store.get_visibility_settings(user_id))
        .await
    {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(user_id, error = %e, "Skipping presence broadcast");
            return TransitionReport::default();
        }
    };

    let mut report = TransitionReport::default();
    for conn in state.connections.snapshot() {
        if conn.user_id == user_id {
            continue;
        }
        let view = visibility::resolve(conn.user_id, presence, &settings);
        if send_event(&conn.sender, conn.user_id, &status_event(user_id, &view)) {
            report.status_updates += 1;
        }
    }

    report.group_updates = broadcast_group_counts(state, presence).await;

    tracing::debug!(
        user_id,
        is_online = presence.is_online,
        status_updates = report.status_updates,
        group_updates = report.group_updates,
        "Presence transition broadcast"
    );
    report
}

/// Recompute the online count of every group `presence.user_id` belongs to
/// and send it to that group's connected members.
async fn broadcast_group_counts(state: &AppState, presence: &PresenceState) -> usize {
    let user_id = presence.user_id;
    let scopes = state
        .blocking(move |store| {
            let mut scopes = Vec::new();
            for group_id in store.get_user_group_ids(user_id)? {
                if let Some(scope) = store.load_scope(ChatRef::group(group_id))? {
                    scopes.push(scope);
                }
            }
            Ok(scopes)
        })
        .await;

    let scopes = match scopes {
        Ok(scopes) => scopes,
        Err(e) => {
            tracing::error!(user_id, error = %e, "Skipping group online counts");
            return 0;
        }
    };

    let timestamp = Utc::now();
    scopes
        .iter()
        .map(|scope| {
            let ChatScope::Group { group_id, member_ids } = scope else {
                return 0;
            };
            let event = ServerEvent::GroupOnlineCountUpdate {
                group_id: *group_id,
                online_count: state.connections.online_count(member_ids),
                updated_user_id: user_id,
                is_online: presence.is_online,
                timestamp,
            };
            fanout::broadcast(&state.connections, scope, &event, None)
        })
        .sum()
}

/// Send a freshly admitted client the filtered presence of everyone else
/// who is online.
pub async fn send_snapshot(state: &AppState, viewer_id: UserId, sender: &ConnectionSender) -> usize {
    let online: Vec<PresenceState> = state
        .connections
        .snapshot()
        .into_iter()
        .filter(|conn| conn.user_id != viewer_id)
        .map(|conn| conn.presence())
        .collect();
    if online.is_empty() {
        return 0;
    }

    let ids: Vec<UserId> = online.iter().map(|p| p.user_id).collect();
    let settings = state
        .blocking(move |store| {
            ids.into_iter()
                .map(|id| Ok((id, store.get_visibility_settings(id)?)))
                .collect::<Result<HashMap<UserId, VisibilitySettings>, StoreError>>()
        })
        .await;

    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(user_id = viewer_id, error = %e, "Skipping presence snapshot");
            return 0;
        }
    };

    online
        .iter()
        .filter(|presence| {
            let Some(target_settings) = settings.get(&presence.user_id) else {
                return false;
            };
            let view = visibility::resolve(viewer_id, presence, target_settings);
            send_event(sender, viewer_id, &status_event(presence.user_id, &view))
        })
        .count()
}
