//! Outbound JSON events. Field names are part of the client contract.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::chat::scope::{ChatId, ChatType, MessageId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRef {
    pub id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStatus {
    Read,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    UserStatusUpdate {
        user_id: UserId,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
        location: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    GroupOnlineCountUpdate {
        group_id: ChatId,
        online_count: usize,
        updated_user_id: UserId,
        is_online: bool,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    MessageReadReceipt {
        message_ids: Vec<MessageId>,
        chat_type: ChatType,
        chat_id: ChatId,
        reader: UserRef,
        timestamp: DateTime<Utc>,
        read_status: ReadStatus,
        icon: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_chat_read: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    TypingStart {
        chat_type: ChatType,
        chat_id: ChatId,
        user: UserRef,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    TypingStop {
        chat_type: ChatType,
        chat_id: ChatId,
        user: UserRef,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    MessageViewed {
        message_id: MessageId,
        viewer_id: UserId,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    MessageViewEnded {
        message_id: MessageId,
        viewer_id: UserId,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    NewMessage {
        chat_type: ChatType,
        chat_id: ChatId,
        message: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    MessageEdited {
        chat_type: ChatType,
        chat_id: ChatId,
        message: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    MessageDeleted {
        chat_type: ChatType,
        chat_id: ChatId,
        message_id: MessageId,
    },
    /// Group or channel lifecycle change (created, renamed, member joined...).
    #[serde(rename_all = "camelCase")]
    ChatUpdated {
        chat_type: ChatType,
        chat_id: ChatId,
        action: String,
        data: serde_json::Value,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
}

pub const READ_RECEIPT_ICON: &str = "double-check";

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserStatusUpdate { .. } => "userStatusUpdate",
            Self::GroupOnlineCountUpdate { .. } => "groupOnlineCountUpdate",
            Self::MessageReadReceipt { .. } => "messageReadReceipt",
            Self::TypingStart { .. } => "typingStart",
            Self::TypingStop { .. } => "typingStop",
            Self::MessageViewed { .. } => "messageViewed",
            Self::MessageViewEnded { .. } => "messageViewEnded",
            Self::NewMessage { .. } => "newMessage",
            Self::MessageEdited { .. } => "messageEdited",
            Self::MessageDeleted { .. } => "messageDeleted",
            Self::ChatUpdated { .. } => "chatUpdated",
            Self::Pong { .. } => "pong",
        }
    }
}
