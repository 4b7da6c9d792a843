use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use super::visibility;
use super::PresenceState;
use crate::auth::middleware::AuthUser;
use crate::chat::fanout::load_member_scope;
use crate::chat::scope::{ChatRef, ChatType, UserId};
use crate::error::CoreError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub user_id: UserId,
    pub is_online: bool,
    pub last_seen: Option<chrono::DateTime<chrono::Utc>>,
    pub location: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupOnlineResponse {
    pub group_id: i64,
    pub online_count: usize,
    pub member_count: usize,
}

/// GET /api/presence/{user_id}
/// The target's presence as the caller is allowed to see it.
pub async fn get_presence(
    State(state): State<AppState>,
    AuthUser(viewer_id): AuthUser,
    Path(user_id): Path<UserId>,
) -> Result<Json<PresenceResponse>, CoreError> {
    let live = state.connections.presence(user_id);
    let (settings, presence) = state
        .blocking(move |store| {
            let settings = store.get_visibility_settings(user_id)?;
            let presence = match live {
                Some(presence) => presence,
                None => PresenceState::offline(user_id, store.get_last_seen(user_id)?),
            };
            Ok((settings, presence))
        })
        .await?;

    let view = visibility::resolve(viewer_id, &presence, &settings);
    Ok(Json(PresenceResponse {
        user_id,
        is_online: view.exposed_online,
        last_seen: view.exposed_last_seen,
        location: view.exposed_location,
    }))
}

/// GET /api/groups/{group_id}/online
/// Members only.
pub async fn group_online(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(group_id): Path<i64>,
) -> Result<Json<GroupOnlineResponse>, CoreError> {
    let scope = load_member_scope(&state, ChatRef::new(ChatType::Group, group_id), user_id).await?;
    let members = scope.member_ids();

    Ok(Json(GroupOnlineResponse {
        group_id,
        online_count: state.connections.online_count(&members),
        member_count: members.len(),
    }))
}

/// POST /api/presence/offline
/// Sign-out: closes the caller's socket and broadcasts the offline
/// transition. Idempotent.
pub async fn sign_out(State(state): State<AppState>, AuthUser(user_id): AuthUser) -> StatusCode {
    match super::remove_user(&state, user_id).await {
        Some(_) => tracing::info!(user_id, "Signed out"),
        None => tracing::debug!(user_id, "Sign-out without a live connection"),
    }
    StatusCode::NO_CONTENT
}
