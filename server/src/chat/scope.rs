//! Chat addressing: the kind of chat, a reference to one, and its resolved
//! membership (the authorization boundary for every chat-scoped event).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub type UserId = i64;
pub type MessageId = i64;
pub type ChatId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Private,
    Group,
    Channel,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Self::Private),
            "group" => Some(Self::Group),
            "channel" => Some(Self::Channel),
            _ => None,
        }
    }
}

impl fmt::Display for ChatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unresolved reference to a chat, as it arrives from clients and HTTP paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRef {
    pub chat_type: ChatType,
    pub chat_id: ChatId,
}

impl ChatRef {
    pub fn new(chat_type: ChatType, chat_id: ChatId) -> Self {
        Self { chat_type, chat_id }
    }

    pub fn private(chat_id: ChatId) -> Self {
        Self::new(ChatType::Private, chat_id)
    }

    pub fn group(chat_id: ChatId) -> Self {
        Self::new(ChatType::Group, chat_id)
    }

    pub fn channel(chat_id: ChatId) -> Self {
        Self::new(ChatType::Channel, chat_id)
    }
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chat_type, self.chat_id)
    }
}

/// A chat with its membership resolved at event time.
///
/// Never cache one of these past the event that loaded it: joins, leaves and
/// promotions must take effect on the very next event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatScope {
    Private {
        chat_id: ChatId,
        participant1: UserId,
        participant2: UserId,
    },
    Group {
        group_id: ChatId,
        member_ids: HashSet<UserId>,
    },
    Channel {
        channel_id: ChatId,
        member_ids: HashSet<UserId>,
        /// Members holding the creator or admin role.
        poster_ids: HashSet<UserId>,
    },
}

impl ChatScope {
    pub fn chat_ref(&self) -> ChatRef {
        match self {
            Self::Private { chat_id, .. } => ChatRef::private(*chat_id),
            Self::Group { group_id, .. } => ChatRef::group(*group_id),
            Self::Channel { channel_id, .. } => ChatRef::channel(*channel_id),
        }
    }

    pub fn member_ids(&self) -> HashSet<UserId> {
        match self {
            Self::Private {
                participant1,
                participant2,
                ..
            } => [*participant1, *participant2].into_iter().collect(),
            Self::Group { member_ids, .. } | Self::Channel { member_ids, .. } => {
                member_ids.clone()
            }
        }
    }

    pub fn is_member(&self, user_id: UserId) -> bool {
        match self {
            Self::Private {
                participant1,
                participant2,
                ..
            } => *participant1 == user_id || *participant2 == user_id,
            Self::Group { member_ids, .. } | Self::Channel { member_ids, .. } => {
                member_ids.contains(&user_id)
            }
        }
    }

    /// Whether `user_id` may publish content into this chat. Only channels
    /// restrict posting; private chats and groups accept any member.
    pub fn can_post(&self, user_id: UserId) -> bool {
        match self {
            Self::Channel { poster_ids, .. } => poster_ids.contains(&user_id),
            _ => self.is_member(user_id),
        }
    }

    /// Recipient ids for a fanout, with the actor optionally left out.
    pub fn recipients(&self, exclude: Option<UserId>) -> HashSet<UserId> {
        let mut ids = self.member_ids();
        if let Some(actor) = exclude {
            ids.remove(&actor);
        }
        ids
    }
}
