//! Centralized error types for the voice bridge core.
//!
//! Mirrors the error taxonomy in the bridge's error-handling design: transport
//! errors, protocol errors, invariant violations and fatal errors all
//! resolve to one typed enum with a machine-readable `code()`, so that
//! observer-facing `error { code, message }` replies and any ancillary HTTP
//! surface share a single source of truth.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type for the voice bridge.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum BridgeError {
    /// No live session exists for the given `callId`.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A command or frame payload failed to parse or validate.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// An observer command type is not part of the closed command set.
    #[error("unknown command type: {0}")]
    UnknownType(String),

    /// The first observer message was not `auth`, or `auth` failed.
    #[error("authentication failed")]
    AuthFailed,

    /// A session-config field violated a documented bound.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An invariant was violated (e.g. `media` before `start`, duplicate `start`).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A WebSocket peer failed to open, closed unexpectedly, or timed out.
    #[error("transport error: {0}")]
    Transport(String),

    /// The AI peer signalled an unrecoverable error, or a disk write failed
    /// during a header patch. Fatal: the session tears down.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Persistence-sink failure. Never propagated past the session boundary;
    /// recorded as a `persistence.error` event instead.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Missing or malformed configuration at bootstrap.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required credential (AI bearer token, telephony auth) is absent.
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// Catch-all for conditions with no more specific variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Returns a machine-readable error code, identical to the string used
    /// on the wire for observer `error.code` replies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::UnknownType(_) => "UNKNOWN_TYPE",
            Self::AuthFailed => "AUTH_FAILED",
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::Transport(_) => "transport_error",
            Self::Fatal(_) => "fatal_error",
            Self::Persistence(_) => "persistence_error",
            Self::Configuration(_) => "configuration_error",
            Self::MissingCredential(_) => "missing_credential",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an HTTP status code, for any ancillary HTTP surface.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidPayload(_) | Self::InvalidRequest(_) | Self::UnknownType(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::AuthFailed => StatusCode::UNAUTHORIZED,
            Self::Configuration(_) | Self::MissingCredential(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for the fatal-error taxonomy bucket: the session must tear down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Convenient Result alias for core operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_not_found_returns_correct_code_and_status() {
        let err = BridgeError::SessionNotFound("CA1".into());
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn auth_failed_returns_correct_code() {
        assert_eq!(BridgeError::AuthFailed.code(), "AUTH_FAILED");
        assert_eq!(BridgeError::AuthFailed.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn fatal_is_recognised() {
        assert!(BridgeError::Fatal("boom".into()).is_fatal());
        assert!(!BridgeError::Transport("closed".into()).is_fatal());
    }
}
