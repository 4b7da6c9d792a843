//! Membership-scoped fanout for chat events.
//!
//! Recipients are resolved from the chat's membership at event time and
//! intersected with a snapshot of the live connections; the snapshot is
//! taken before the first send so concurrent joins, leaves and disconnects
//! cannot disturb the loop.

use std::collections::HashSet;

use super::scope::{ChatRef, ChatScope, UserId};
use crate::error::CoreError;
use crate::presence::registry::ConnectionRegistry;
use crate::state::AppState;
use crate::ws::broadcast::send_to_all;
use crate::ws::events::ServerEvent;

/// Deliver `event` to every connected member of `scope`, leaving out
/// `exclude`. Roles are not consulted: channel posting rights are checked
/// before the event exists. Returns the number of connections reached.
pub fn broadcast(
    registry: &ConnectionRegistry,
    scope: &ChatScope,
    event: &ServerEvent,
    exclude: Option<UserId>,
) -> usize {
    let recipients = scope.recipients(exclude);
    let targets = registry.senders_for(&recipients);
    let delivered = send_to_all(&targets, event);

    tracing::debug!(
        chat = %scope.chat_ref(),
        event = event.name(),
        members = recipients.len(),
        online = targets.len(),
        delivered,
        "Chat fanout"
    );
    delivered
}

/// Deliver `event` to whichever of `user_ids` are connected.
pub fn send_to_users(
    registry: &ConnectionRegistry,
    user_ids: &HashSet<UserId>,
    event: &ServerEvent,
) -> usize {
    let targets = registry.senders_for(user_ids);
    send_to_all(&targets, event)
}

/// Resolve `chat` fresh from the store.
pub async fn load_scope(state: &AppState, chat: ChatRef) -> Result<ChatScope, CoreError> {
    state
        .blocking(move |store| store.load_scope(chat))
        .await?
        .ok_or(CoreError::ChatNotFound(chat))
}

/// Resolve `chat` and require `user_id` to be one of its members.
pub async fn load_member_scope(
    state: &AppState,
    chat: ChatRef,
    user_id: UserId,
) -> Result<ChatScope, CoreError> {
    let scope = load_scope(state, chat).await?;
    if !scope.is_member(user_id) {
        return Err(CoreError::NotAMember { user_id, chat });
    }
    Ok(scope)
}

/// Resolve `chat` and fan `event` out to its members.
pub async fn broadcast_to_chat(
    state: &AppState,
    chat: ChatRef,
    event: &ServerEvent,
    exclude: Option<UserId>,
) -> Result<usize, CoreError> {
    let scope = load_scope(state, chat).await?;
    Ok(broadcast(&state.connections, &scope, event, exclude))
}
