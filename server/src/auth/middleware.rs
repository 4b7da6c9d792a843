use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use crate::chat::scope::UserId;

/// Header carrying the caller's user id. Token validation happens upstream;
/// this server trusts the gateway that sets it.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity for the HTTP surface.
/// Implements axum's FromRequestParts for use as an extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub UserId);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<UserId>().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(AuthUser(user_id))
    }
}
