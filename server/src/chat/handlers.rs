use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::fanout::{broadcast, load_member_scope};
use super::receipts::{self, MarkReadOutcome};
use super::scope::{ChatId, ChatRef, ChatType, MessageId};
use crate::auth::middleware::AuthUser;
use crate::error::CoreError;
use crate::state::AppState;
use crate::ws::events::ServerEvent;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    /// Omitted means "everything unread in the chat".
    #[serde(default)]
    pub message_ids: Option<Vec<MessageId>>,
}

/// A chat mutation committed elsewhere, to be fanned out to members.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChatMutation {
    NewMessage {
        message: serde_json::Value,
    },
    MessageEdited {
        message: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    MessageDeleted {
        message_id: MessageId,
    },
    ChatUpdated {
        action: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

impl ChatMutation {
    fn into_event(self, chat: ChatRef) -> ServerEvent {
        let ChatRef { chat_type, chat_id } = chat;
        match self {
            Self::NewMessage { message } => ServerEvent::NewMessage {
                chat_type,
                chat_id,
                message,
            },
            Self::MessageEdited { message } => ServerEvent::MessageEdited {
                chat_type,
                chat_id,
                message,
            },
            Self::MessageDeleted { message_id } => ServerEvent::MessageDeleted {
                chat_type,
                chat_id,
                message_id,
            },
            Self::ChatUpdated { action, data } => ServerEvent::ChatUpdated {
                chat_type,
                chat_id,
                action,
                data,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub event: ChatMutation,
    /// Deliver to the actor's own socket too.
    #[serde(default)]
    pub include_actor: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub delivered: usize,
}

/// POST /api/chats/{chat_type}/{chat_id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    AuthUser(reader_id): AuthUser,
    Path((chat_type, chat_id)): Path<(ChatType, ChatId)>,
    Json(body): Json<MarkReadRequest>,
) -> Result<Json<MarkReadOutcome>, CoreError> {
    let chat = ChatRef::new(chat_type, chat_id);
    let outcome = match body.message_ids {
        Some(ids) => receipts::mark_read(&state, reader_id, chat, ids).await?,
        None => receipts::mark_chat_read(&state, reader_id, chat).await?,
    };
    Ok(Json(outcome))
}

/// POST /api/chats/{chat_type}/{chat_id}/events
/// Only members may publish; in channels only the creator and admins may
/// post new messages.
pub async fn publish_event(
    State(state): State<AppState>,
    AuthUser(actor_id): AuthUser,
    Path((chat_type, chat_id)): Path<(ChatType, ChatId)>,
    Json(body): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, CoreError> {
    let chat = ChatRef::new(chat_type, chat_id);
    let scope = load_member_scope(&state, chat, actor_id).await?;

    if matches!(body.event, ChatMutation::NewMessage { .. }) && !scope.can_post(actor_id) {
        return Err(CoreError::PostingNotAllowed {
            user_id: actor_id,
            chat,
        });
    }

    let exclude = (!body.include_actor).then_some(actor_id);
    let event = body.event.into_event(chat);
    let delivered = broadcast(&state.connections, &scope, &event, exclude);

    Ok(Json(PublishResponse { delivered }))
}
