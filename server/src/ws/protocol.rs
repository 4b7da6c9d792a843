use serde::Deserialize;

use crate::chat::scope::{ChatId, ChatRef, ChatType, MessageId, UserId};
use crate::chat::{activity, receipts};
use crate::error::CoreError;
use crate::presence::{self, registry::ConnectionId, registry::HeartbeatOutcome};
use crate::state::AppState;
use crate::ws::broadcast::send_event;
use crate::ws::events::ServerEvent;
use crate::ws::ConnectionSender;

/// Inbound client frames, JSON text tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Auth {
        user_id: UserId,
        location: Option<String>,
        session_id: Option<String>,
    },
    Ping {
        location: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ChatViewed {
        chat_type: ChatType,
        chat_id: ChatId,
        #[serde(default)]
        skip_auto_read: bool,
    },
    #[serde(rename_all = "camelCase")]
    TypingStart { chat_type: ChatType, chat_id: ChatId },
    #[serde(rename_all = "camelCase")]
    TypingStop { chat_type: ChatType, chat_id: ChatId },
    #[serde(rename_all = "camelCase")]
    MessageViewed {
        message_id: MessageId,
        chat_type: Option<ChatType>,
        chat_id: Option<ChatId>,
    },
    #[serde(rename_all = "camelCase")]
    MessageViewEnded {
        message_id: MessageId,
        chat_type: Option<ChatType>,
        chat_id: Option<ChatId>,
    },
}

/// The admitted identity of one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
}

/// Whether the reader loop should keep going after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Decode a text frame. Malformed frames are logged and dropped.
pub fn parse(text: &str, user_id: Option<UserId>) -> Option<ClientMessage> {
    match serde_json::from_str(text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::debug!(
                user_id = ?user_id,
                error = %e,
                "Ignoring malformed client frame: {}",
                text.chars().take(100).collect::<String>()
            );
            None
        }
    }
}

fn optional_chat(chat_type: Option<ChatType>, chat_id: Option<ChatId>) -> Option<ChatRef> {
    chat_type.zip(chat_id).map(|(t, id)| ChatRef::new(t, id))
}

/// Handle one decoded frame from an admitted connection.
pub async fn dispatch(
    state: &AppState,
    session: &Session,
    tx: &ConnectionSender,
    msg: ClientMessage,
) -> Flow {
    let user_id = session.user_id;

    // A superseded or swept socket may still have frames in flight.
    if !state.connections.is_current(user_id, session.connection_id) {
        tracing::info!(
            user_id,
            conn_id = session.connection_id,
            "Frame from a connection no longer registered"
        );
        return Flow::Stop;
    }

    let result: Result<(), CoreError> = match msg {
        ClientMessage::Auth { .. } => {
            tracing::debug!(user_id, "Ignoring repeated auth frame");
            Ok(())
        }
        ClientMessage::Ping { location } => {
            match presence::heartbeat(state, user_id, session.connection_id, location).await {
                HeartbeatOutcome::Unknown => {
                    tracing::info!(
                        user_id,
                        conn_id = session.connection_id,
                        "Heartbeat for a connection no longer registered"
                    );
                    return Flow::Stop;
                }
                HeartbeatOutcome::Refreshed | HeartbeatOutcome::LocationChanged { .. } => {
                    send_event(
                        tx,
                        user_id,
                        &ServerEvent::Pong {
                            timestamp: chrono::Utc::now(),
                        },
                    );
                    Ok(())
                }
            }
        }
        ClientMessage::ChatViewed {
            chat_type,
            chat_id,
            skip_auto_read,
        } => {
            if skip_auto_read {
                Ok(())
            } else {
                receipts::mark_chat_read(state, user_id, ChatRef::new(chat_type, chat_id))
                    .await
                    .map(|_| ())
            }
        }
        ClientMessage::TypingStart { chat_type, chat_id } => {
            activity::typing(state, user_id, ChatRef::new(chat_type, chat_id), true)
                .await
                .map(|_| ())
        }
        ClientMessage::TypingStop { chat_type, chat_id } => {
            activity::typing(state, user_id, ChatRef::new(chat_type, chat_id), false)
                .await
                .map(|_| ())
        }
        ClientMessage::MessageViewed {
            message_id,
            chat_type,
            chat_id,
        } => activity::message_viewed(state, user_id, message_id, optional_chat(chat_type, chat_id))
            .await
            .map(|_| ()),
        ClientMessage::MessageViewEnded {
            message_id,
            chat_type,
            chat_id,
        } => activity::message_view_ended(
            state,
            user_id,
            message_id,
            optional_chat(chat_type, chat_id),
        )
        .await
        .map(|_| ()),
    };

    if let Err(e) = result {
        if e.status().is_server_error() {
            tracing::error!(user_id, error = %e, "Failed to handle client frame");
        } else {
            tracing::warn!(user_id, error = %e, "Rejected client frame");
        }
    }
    Flow::Continue
}
