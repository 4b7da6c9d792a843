//! Error types for the persistence layer and the core operations.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::chat::scope::{ChatRef, UserId};

/// Failures raised by the data-access layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    LockPoisoned,
    #[error("invalid stored value: {0}")]
    Decode(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures surfaced to the caller of a core operation.
///
/// Send failures are not represented; they are logged at the send site.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("chat {0} not found")]
    ChatNotFound(ChatRef),
    #[error("user {user_id} is not a member of chat {chat}")]
    NotAMember { user_id: UserId, chat: ChatRef },
    #[error("user {user_id} may not post to chat {chat}")]
    PostingNotAllowed { user_id: UserId, chat: ChatRef },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("blocking task failed: {0}")]
    Join(String),
}

impl CoreError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ChatNotFound(_) => StatusCode::NOT_FOUND,
            Self::NotAMember { .. } | Self::PostingNotAllowed { .. } => StatusCode::FORBIDDEN,
            Self::Store(_) | Self::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Core operation failed");
        }
        (status, self.to_string()).into_response()
    }
}
