//! Error taxonomy and the wire envelope.
//!
//! Two families of error live here and they never mix:
//!
//! - [`AppError`] and [`Failure`] describe what went wrong with *one request*.
//!   Handlers return or record them; they ride on the [`Response`](crate::Response)
//!   until [`middleware::Recover`](crate::middleware::Recover) renders them as an
//!   [`ErrorResponse`].
//! - [`Error`] surfaces infrastructure failures: binding a port, reading
//!   configuration. It never reaches a client.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ConfigError;
use crate::context::TraceId;

/// A type-erased error, as accepted by [`AppError::internal`] and [`Failure::other`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Message sent for every fault the pipeline cannot describe safely.
pub const UNEXPECTED_MESSAGE: &str = "An unexpected error occurred";

// ── ErrorCode ─────────────────────────────────────────────────────────────────

/// Machine-readable error category. Clients branch on this, never on messages.
///
/// Each code owns exactly one HTTP status, so a code and its status cannot
/// drift apart.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError, // 400
    NotFound,        // 404
    Conflict,        // 409
    Unauthorized,    // 401
    InternalError,   // 500
}

impl ErrorCode {
    /// Wire representation, e.g. `"NOT_FOUND"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::NotFound        => "NOT_FOUND",
            Self::Conflict        => "CONFLICT",
            Self::Unauthorized    => "UNAUTHORIZED",
            Self::InternalError   => "INTERNAL_ERROR",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            Self::ValidationError => StatusCode::BAD_REQUEST,
            Self::NotFound        => StatusCode::NOT_FOUND,
            Self::Conflict        => StatusCode::CONFLICT,
            Self::Unauthorized    => StatusCode::UNAUTHORIZED,
            Self::InternalError   => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── AppError ──────────────────────────────────────────────────────────────────

/// An application error: the vocabulary handlers use to signal failure.
///
/// Build one with the constructor for its kind and return it from a handler
/// as `Err(..)`, or propagate it with `?`. The message is always
/// safe to show a caller; anything that is not goes into
/// [`AppError::internal`]'s cause, which is logged and never serialized.
///
/// ```rust
/// use platform_api::{AppError, ErrorCode};
///
/// let err = AppError::not_found("widget");
/// assert_eq!(err.code(), ErrorCode::NotFound);
/// assert_eq!(err.status().as_u16(), 404);
/// assert_eq!(err.message(), "widget not found");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {}", or_default(.reason, "invalid input"))]
    Validation { field: String, reason: String },

    #[error("{} not found", or_default(.resource, "resource"))]
    NotFound { resource: String },

    #[error("{}", or_default(.0, "resource conflict"))]
    Conflict(String),

    #[error("{}", or_default(.0, "unauthorized"))]
    Unauthorized(String),

    #[error("An internal error occurred")]
    Internal(#[source] BoxError),
}

impl AppError {
    /// `400 VALIDATION_ERROR`. `field` is reported back in `details.field`.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), reason: reason.into() }
    }

    /// `404 NOT_FOUND` with message `"{resource} not found"`.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into() }
    }

    /// `409 CONFLICT`.
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict(reason.into())
    }

    /// `401 UNAUTHORIZED`.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized(reason.into())
    }

    /// `500 INTERNAL_ERROR` with a fixed generic message. `cause` is kept as
    /// the error source for server-side logging only.
    pub fn internal(cause: impl Into<BoxError>) -> Self {
        Self::Internal(cause.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::NotFound { .. }   => ErrorCode::NotFound,
            Self::Conflict(_)       => ErrorCode::Conflict,
            Self::Unauthorized(_)   => ErrorCode::Unauthorized,
            Self::Internal(_)       => ErrorCode::InternalError,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.code().status()
    }

    /// The client-facing message. Never empty.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Structured context rendered as the envelope's `details` object.
    pub fn details(&self) -> Map<String, Value> {
        let mut details = Map::new();
        if let Self::Validation { field, .. } = self {
            details.insert("field".to_owned(), Value::String(field.clone()));
        }
        details
    }
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() { default } else { value }
}

// ── Failure ───────────────────────────────────────────────────────────────────

/// Whatever a handler recorded against its response.
///
/// Either a typed [`AppError`], rendered with its own code and status, or an
/// error of unrecognized shape, which the pipeline treats as an internal fault
/// and never describes to the client.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    #[error(transparent)]
    App(#[from] AppError),

    #[error("{0}")]
    Other(BoxError),
}

impl Failure {
    pub fn other(err: impl Into<BoxError>) -> Self {
        Self::Other(err.into())
    }

    /// The status the response will carry once this failure is rendered.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::App(err) => err.status(),
            Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<serde_json::Error> for Failure {
    fn from(e: serde_json::Error) -> Self {
        Self::other(e)
    }
}

/// Network and IO faults are internal errors with their cause kept.
impl From<std::io::Error> for Failure {
    fn from(e: std::io::Error) -> Self {
        Self::App(AppError::internal(e))
    }
}

// ── ErrorResponse ─────────────────────────────────────────────────────────────

/// The JSON error envelope.
///
/// Field order is part of the wire contract:
/// `error`, `message`, `statusCode`, `traceId`, `details`. The last two are
/// omitted when empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: ErrorCode,
    pub message: String,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl ErrorResponse {
    pub fn from_app_error(err: &AppError, trace_id: Option<&TraceId>) -> Self {
        Self {
            error: err.code(),
            message: err.message(),
            status_code: err.status().as_u16(),
            trace_id: trace_id.map(ToString::to_string).unwrap_or_default(),
            details: err.details(),
        }
    }

    /// The fixed `INTERNAL_ERROR`/500 envelope used for panics and
    /// unrecognized errors.
    pub fn unexpected(trace_id: Option<&TraceId>) -> Self {
        Self {
            error: ErrorCode::InternalError,
            message: UNEXPECTED_MESSAGE.to_owned(),
            status_code: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            trace_id: trace_id.map(ToString::to_string).unwrap_or_default(),
            details: Map::new(),
        }
    }
}

// ── Error ─────────────────────────────────────────────────────────────────────

/// The error type returned by the crate's fallible infrastructure operations.
///
/// Per-request problems are [`AppError`]s carried on a response, not `Error`s.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config: {0}")]
    Config(#[from] ConfigError),
}
