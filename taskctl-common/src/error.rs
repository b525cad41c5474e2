use std::error::Error as StdError;
use std::fmt::{self, Formatter};
use std::io;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// The closed set of caller-visible error kinds.
///
/// Every component returns one of these; the request surface is the sole
/// layer that turns a kind into an HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidRequest,
    InvalidApiKey,
    ApiKeyRevoked,
    NotFound,
    Conflict,
    ServiceUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::InvalidApiKey => StatusCode::UNAUTHORIZED,
            ErrorKind::ApiKeyRevoked => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a client-visible error of this kind should be logged at error
    /// level. Only unexpected/dependency failures are (spec.md §7).
    pub fn is_loud(&self) -> bool {
        matches!(self, ErrorKind::Internal | ErrorKind::ServiceUnavailable)
    }
}

/// A kind-tagged error, safe to expose to callers: its [`IntoResponse`]
/// implementation never leaks the source's `Display` text for internal
/// kinds.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl Error {
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    pub fn custom<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            message: Some(message.into()),
            source: None,
        }
    }

    pub fn source<E: StdError + Send + Sync + 'static>(kind: ErrorKind, err: E) -> Self {
        Self {
            kind,
            message: None,
            source: Some(Box::new(err)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::from_kind(kind)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if matches!(err, sqlx::Error::RowNotFound) {
            Self::from_kind(ErrorKind::NotFound)
        } else {
            Self::source(ErrorKind::Internal, err)
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::source(ErrorKind::Internal, err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(message) = self.message.as_ref() {
            write!(f, ": {message}")?;
        } else if let Some(source) = self.source.as_ref() {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|err| err.as_ref() as &(dyn StdError + 'static))
    }
}

/// Wire shape for every error response, shared by both services.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub status_code: u16,
}

impl From<&Error> for ApiError {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind,
            message: err.to_string(),
            status_code: err.kind.status_code().as_u16(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if self.kind.is_loud() {
            tracing::error!(error = %self, kind = %self.kind, "request failed");
        }

        let status = self.kind.status_code();
        let body: ApiError = (&self).into();

        (
            status,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            Json(body),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
