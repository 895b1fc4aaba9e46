use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const VERIFY_USER_PATH: &str = "/api/user/verify-user";

/// Authenticated user record as returned by the API.
///
/// Only the fields the console reads are typed; everything else is kept in
/// `extra` so the persisted copy round-trips unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuthUser {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VerifyUserResponse {
    pub user: AuthUser,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("token rejected by verify-user (status {status})")]
    Unauthorized { status: u16 },
    #[error("verify-user request failed: {0}")]
    Network(String),
    #[error("verify-user returned status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("verify-user response could not be decoded: {0}")]
    Decode(String),
}

impl VerifyError {
    #[must_use]
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Transport for `GET /api/user/verify-user`.
#[async_trait]
pub trait UserVerifier: Send + Sync {
    async fn verify_user(&self, token: &str) -> Result<AuthUser, VerifyError>;
}

/// Source of the bearer token attached to outgoing API requests.
pub trait TokenSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

pub fn normalize_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("Bearer ")
        .map_or(trimmed, str::trim);
    if trimmed.is_empty() || trimmed == "null" || trimmed == "undefined" {
        return None;
    }
    Some(trimmed.to_string())
}

pub fn bearer_header_value(token: &str) -> Option<String> {
    normalize_token(token).map(|token| format!("Bearer {token}"))
}
