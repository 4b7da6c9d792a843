//! Ephemeral chat activity: typing indicators and live message views.

use chrono::Utc;

use super::fanout::{broadcast, load_member_scope};
use super::scope::{ChatRef, MessageId, UserId};
use crate::error::CoreError;
use crate::state::AppState;
use crate::ws::events::{ServerEvent, UserRef};

/// Tell the other members of `chat` that `user_id` started or stopped typing.
pub async fn typing(
    state: &AppState,
    user_id: UserId,
    chat: ChatRef,
    started: bool,
) -> Result<usize, CoreError> {
    let scope = load_member_scope(state, chat, user_id).await?;
    let username = state
        .blocking(move |store| store.get_username(user_id))
        .await?
        .unwrap_or_else(|| "Unknown".to_string());

    let user = UserRef {
        id: user_id,
        username,
    };
    let timestamp = Utc::now();
    let event = if started {
        ServerEvent::TypingStart {
            chat_type: chat.chat_type,
            chat_id: chat.chat_id,
            user,
            timestamp,
        }
    } else {
        ServerEvent::TypingStop {
            chat_type: chat.chat_type,
            chat_id: chat.chat_id,
            user,
            timestamp,
        }
    };

    Ok(broadcast(&state.connections, &scope, &event, Some(user_id)))
}

/// Record that `viewer_id` is looking at `message_id`. When the chat is
/// known, its other members are told; a repeated view is not re-announced.
pub async fn message_viewed(
    state: &AppState,
    viewer_id: UserId,
    message_id: MessageId,
    chat: Option<ChatRef>,
) -> Result<usize, CoreError> {
    let scope = match chat {
        Some(chat) => Some(load_member_scope(state, chat, viewer_id).await?),
        None => None,
    };

    if !state.viewers.add_viewer(message_id, viewer_id) {
        return Ok(0);
    }
    let Some(scope) = scope else {
        return Ok(0);
    };

    let event = ServerEvent::MessageViewed {
        message_id,
        viewer_id,
        timestamp: Utc::now(),
    };
    Ok(broadcast(&state.connections, &scope, &event, Some(viewer_id)))
}

/// Counterpart of `message_viewed`. Ending a view that was never started is
/// a no-op.
pub async fn message_view_ended(
    state: &AppState,
    viewer_id: UserId,
    message_id: MessageId,
    chat: Option<ChatRef>,
) -> Result<usize, CoreError> {
    let scope = match chat {
        Some(chat) => Some(load_member_scope(state, chat, viewer_id).await?),
        None => None,
    };

    if !state.viewers.remove_viewer(message_id, viewer_id) {
        return Ok(0);
    }
    let Some(scope) = scope else {
        return Ok(0);
    };

    let event = ServerEvent::MessageViewEnded {
        message_id,
        viewer_id,
        timestamp: Utc::now(),
    };
    Ok(broadcast(&state.connections, &scope, &event, Some(viewer_id)))
}
