use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Enum of push-channel functionalities; `LogStreaming` is the sole value in
/// scope (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, strum::Display)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Functionality {
    LogStreaming,
}

/// A live or pending subscription to an execution's log stream (spec.md §3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StreamConnection {
    pub connection_id: String,
    pub execution_id: String,
    pub functionality: Functionality,
    pub user_email: String,
    pub client_ip_at_creation: String,
    pub created_at: DateTime<Utc>,
}

/// Frames sent down an open push channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Hello {
        execution_id: String,
        status: super::execution::Status,
    },
    Log(super::execution::LogEvent),
    ExecutionComplete {
        execution_id: String,
        status: super::execution::Status,
        exit_code: Option<i32>,
    },
    Error {
        message: String,
    },
}
