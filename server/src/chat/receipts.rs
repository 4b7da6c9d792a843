//! Read receipts: idempotent upserts plus one batched notification per
//! affected sender.
//!
//! Persistence and broadcast are not atomic together. A receipt is written
//! at most once; its notification is sent at least once per successful
//! write and is not retried.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

use super::fanout::{load_member_scope, send_to_users};
use super::scope::{ChatRef, MessageId, UserId};
use crate::error::CoreError;
use crate::state::AppState;
use crate::ws::events::{ReadStatus, ServerEvent, UserRef, READ_RECEIPT_ICON};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadOutcome {
    /// Messages that had no receipt from the reader before this call.
    pub newly_marked: Vec<MessageId>,
    /// Senders that were sent a `messageReadReceipt`.
    #[serde(skip)]
    pub notified_senders: Vec<UserId>,
}

/// Mark specific messages of `chat` as read by `reader_id`.
///
/// Ids that are not in `chat`, or that the reader wrote, are ignored.
/// Re-reading a message refreshes its `read_at` but does not list it in
/// `newly_marked` and does not notify anyone again.
pub async fn mark_read(
    state: &AppState,
    reader_id: UserId,
    chat: ChatRef,
    message_ids: Vec<MessageId>,
) -> Result<MarkReadOutcome, CoreError> {
    load_member_scope(state, chat, reader_id).await?;
    apply_reads(state, reader_id, chat, message_ids, false).await
}

/// Mark everything in `chat` the reader has not read yet. A no-op, with no
/// broadcast, when nothing is unread.
pub async fn mark_chat_read(
    state: &AppState,
    reader_id: UserId,
    chat: ChatRef,
) -> Result<MarkReadOutcome, CoreError> {
    load_member_scope(state, chat, reader_id).await?;

    let unread = state
        .blocking(move |store| store.get_unread_message_ids(chat, reader_id))
        .await?;
    if unread.is_empty() {
        tracing::debug!(user_id = reader_id, chat = %chat, "Chat already read");
        return Ok(MarkReadOutcome::default());
    }

    apply_reads(state, reader_id, chat, unread, true).await
}

async fn apply_reads(
    state: &AppState,
    reader_id: UserId,
    chat: ChatRef,
    message_ids: Vec<MessageId>,
    is_chat_read: bool,
) -> Result<MarkReadOutcome, CoreError> {
    if message_ids.is_empty() {
        return Ok(MarkReadOutcome::default());
    }

    let at = Utc::now();
    let (senders, username, newly_marked) = state
        .blocking(move |store| {
            let senders: HashMap<MessageId, UserId> = store
                .get_message_senders(chat, &message_ids)?
                .into_iter()
                .collect();
            let candidates: Vec<MessageId> = message_ids
                .iter()
                .copied()
                .filter(|id| senders.get(id).is_some_and(|sender| *sender != reader_id))
                .collect();
            if candidates.is_empty() {
                return Ok((senders, None, Vec::new()));
            }

            let username = store.get_username(reader_id)?;
            let newly = store.upsert_read_receipts(&candidates, reader_id, at)?;
            Ok((senders, username, newly))
        })
        .await?;

    if newly_marked.is_empty() {
        return Ok(MarkReadOutcome::default());
    }

    let recipients: BTreeSet<UserId> = newly_marked
        .iter()
        .filter_map(|id| senders.get(id).copied())
        .filter(|sender| *sender != reader_id)
        .collect();

    let event = ServerEvent::MessageReadReceipt {
        message_ids: newly_marked.clone(),
        chat_type: chat.chat_type,
        chat_id: chat.chat_id,
        reader: UserRef {
            id: reader_id,
            username: username.unwrap_or_else(|| "Unknown".to_string()),
        },
        timestamp: at,
        read_status: ReadStatus::Read,
        icon: READ_RECEIPT_ICON,
        is_chat_read: is_chat_read.then_some(true),
    };

    let recipient_set: HashSet<UserId> = recipients.iter().copied().collect();
    let delivered = send_to_users(&state.connections, &recipient_set, &event);

    tracing::debug!(
        user_id = reader_id,
        chat = %chat,
        newly_marked = newly_marked.len(),
        senders = recipients.len(),
        delivered,
        is_chat_read,
        "Read receipts recorded"
    );

    Ok(MarkReadOutcome {
        newly_marked,
        notified_senders: recipients.into_iter().collect(),
    })
}
