//! Low-level delivery to connection queues.
//!
//! Every send is a `try_send`: a full or closed queue drops the frame and
//! logs, it never blocks the caller or aborts the surrounding loop.

use axum::extract::ws::{CloseFrame, Message};
use tokio::sync::mpsc::error::TrySendError;

use super::events::ServerEvent;
use super::ConnectionSender;
use crate::chat::scope::UserId;

/// Serialize an event once so it can be cloned into many queues.
pub fn encode_event(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(event = event.name(), error = %e, "Failed to encode event");
            None
        }
    }
}

/// Push an already-encoded frame to one connection. Returns whether it was
/// queued.
pub fn deliver(sender: &ConnectionSender, user_id: UserId, msg: Message) -> bool {
    match sender.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!(user_id, "Outbound queue full, dropping frame");
            false
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(user_id, "Connection already closed, dropping frame");
            false
        }
    }
}

/// Encode and push one event to one connection.
pub fn send_event(sender: &ConnectionSender, user_id: UserId, event: &ServerEvent) -> bool {
    match encode_event(event) {
        Some(msg) => deliver(sender, user_id, msg),
        None => false,
    }
}

/// Deliver the same event to every `(user, sender)` pair. Returns the number
/// of queues that accepted it.
pub fn send_to_all(recipients: &[(UserId, ConnectionSender)], event: &ServerEvent) -> usize {
    let Some(msg) = encode_event(event) else {
        return 0;
    };
    recipients
        .iter()
        .filter(|(user_id, sender)| deliver(sender, *user_id, msg.clone()))
        .count()
}

/// Ask a connection's writer to close the socket with `code`.
pub fn force_close(sender: &ConnectionSender, user_id: UserId, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if !deliver(sender, user_id, Message::Close(Some(frame))) {
        tracing::debug!(user_id, code, "Close frame not queued");
    }
}
