use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{Error, ErrorKind, Result};

/// Parses a user-supplied execution timeout (spec.md §8 boundary behaviors).
/// `""` defaults to 10 minutes; `"0"` disables the timeout; a bare integer is
/// seconds; a `s`/`m`/`h`-suffixed integer scales accordingly. `None` means
/// no deadline is enforced.
pub fn parse_timeout(raw: &str) -> Result<Option<Duration>> {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return Ok(Some(Duration::from_secs(600)));
    }
    if trimmed == "0" {
        return Ok(None);
    }
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Some(Duration::from_secs(secs)));
    }

    let (digits, unit) = trimmed.split_at(trimmed.len() - 1);
    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => {
            return Err(Error::custom(
                ErrorKind::InvalidRequest,
                format!("invalid timeout: {raw}"),
            ))
        }
    };
    let value: u64 = digits.parse().map_err(|_| {
        Error::custom(ErrorKind::InvalidRequest, format!("invalid timeout: {raw}"))
    })?;
    Ok(Some(Duration::from_secs(value * multiplier)))
}

/// The execution status state machine (spec.md §3, §4.1).
///
/// `Running` is the only non-terminal state; the rest are terminal and,
/// once observed, monotone (invariant 4 of spec.md §8).
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Display, Serialize, EnumString, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[strum(ascii_case_insensitive)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Running)
    }
}

/// A request to run a command in an isolated container (spec.md §4.1).
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RunRequest {
    pub command: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub env: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub task_role: Option<String>,
    #[serde(default)]
    pub exec_role: Option<String>,
    #[serde(default)]
    pub cpu: Option<i32>,
    #[serde(default)]
    pub memory: Option<i32>,
    #[serde(default)]
    pub runtime_platform: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    /// Raw timeout string, parsed by [`parse_timeout`]; empty means the
    /// default 10-minute deadline.
    #[serde(default)]
    pub timeout: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub execution_id: String,
    pub status: Status,
}

/// One launch of a user command on the runtime (spec.md §3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Execution {
    pub execution_id: String,
    pub user_email: String,
    pub command: String,
    pub status: Status,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub request_id: Option<String>,
    pub compute_platform: String,
}

impl Execution {
    pub fn duration_seconds(&self) -> i64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_seconds().max(0)
    }
}

/// Public snapshot returned by `GetExecutionStatus`/`ListExecutions`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub execution_id: String,
    pub user_email: String,
    pub command: String,
    pub status: Status,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub request_id: Option<String>,
    pub compute_platform: String,
    pub duration_seconds: i64,
}

impl From<Execution> for ExecutionResponse {
    fn from(e: Execution) -> Self {
        Self {
            duration_seconds: e.duration_seconds(),
            execution_id: e.execution_id,
            user_email: e.user_email,
            command: e.command,
            status: e.status,
            started_at: e.started_at,
            completed_at: e.completed_at,
            // exit_code is only meaningful once completed_at is set (spec.md §3 invariant).
            exit_code: e.exit_code.filter(|_| e.completed_at.is_some()),
            request_id: e.request_id,
            compute_platform: e.compute_platform,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogsResponse {
    pub execution_id: String,
    pub status: Status,
    pub events: Vec<LogEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket_url: Option<String>,
}

/// One line emitted by a running task (spec.md §6 Runner capability).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp_ms: i64,
    pub message: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KillResponse {
    pub execution_id: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!(Status::Running, Status::from_str("running").unwrap());
        assert_eq!(Status::Succeeded, Status::from_str("SUCCEEDED").unwrap());
        assert!(!Status::Running.is_terminal());
        assert!(Status::Stopped.is_terminal());
    }

    #[test]
    fn parse_timeout_boundary_cases() {
        assert_eq!(parse_timeout("").unwrap(), Some(Duration::from_secs(600)));
        assert_eq!(parse_timeout("0").unwrap(), None);
        assert_eq!(parse_timeout("600").unwrap(), Some(Duration::from_secs(600)));
        assert_eq!(parse_timeout("1h").unwrap(), Some(Duration::from_secs(3600)));
        assert_eq!(parse_timeout("invalid").unwrap_err().kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn exit_code_hidden_until_completed() {
        let exec = Execution {
            execution_id: "e1".into(),
            user_email: "a@x.io".into(),
            command: "ls".into(),
            status: Status::Running,
            started_at: Utc::now(),
            completed_at: None,
            exit_code: Some(0),
            request_id: None,
            compute_platform: "fake".into(),
        };
        let resp: ExecutionResponse = exec.into();
        assert_eq!(resp.exit_code, None);
    }
}
