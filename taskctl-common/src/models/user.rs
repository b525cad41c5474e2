use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a caller (spec.md §3). `expires_at` is present only while the
/// user is pending a claim; it is removed on successful `ClaimAPIKey`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub revoked: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub expires_at: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateUserResponse {
    pub user: User,
    pub claim_token: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub api_key: String,
    pub user_email: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RevokeUserRequest {
    pub email: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevokeUserResponse {
    pub email: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListUsersResponse {
    pub users: Vec<User>,
}

/// One-shot claim ticket (spec.md §3). `api_key` is the plaintext, shown only
/// once, at claim time. `ip_address` is unset until claimed, then recorded
/// atomically alongside `viewed`.
#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct PendingApiKey {
    pub secret_token: String,
    pub api_key: String,
    pub user_email: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: i64,
    pub viewed: bool,
    pub ip_address: Option<String>,
}
