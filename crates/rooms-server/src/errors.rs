//! Server error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rooms_engine::EngineError;
use rooms_protocol::ErrorPayload;
use thiserror::Error;

/// Admission failure, answered with an HTTP status before the upgrade.
#[derive(Debug, Clone, Error)]
pub enum HandshakeError {
    /// No route pattern matched the request path.
    #[error("Not found")]
    RouteNotFound {
        /// Requested path.
        path: String,
    },
    /// The route's auth hook rejected the request.
    #[error("{message}")]
    Unauthorized {
        /// HTTP status code.
        code: u16,
        /// Response body.
        message: String,
    },
}

impl HandshakeError {
    /// HTTP status for the rejection.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Unauthorized { code, .. } => {
                StatusCode::from_u16(*code).unwrap_or(StatusCode::UNAUTHORIZED)
            }
        }
    }
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Failure raised by a room listener while handling a command.
///
/// Reported back to the originating participant as an ERROR frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{code}] {message}")]
pub struct HandlerError {
    /// Numeric code, HTTP-like.
    pub code: u16,
    /// Human-readable message.
    pub message: String,
}

impl HandlerError {
    /// Error with the default code (400).
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: ErrorPayload::DEFAULT_CODE,
            message: message.into(),
        }
    }

    /// Override the code.
    #[must_use]
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    /// Wire payload.
    pub fn into_payload(self) -> ErrorPayload {
        ErrorPayload {
            code: self.code,
            message: self.message,
        }
    }
}

impl Default for HandlerError {
    fn default() -> Self {
        Self::new(ErrorPayload::DEFAULT_MESSAGE)
    }
}

impl From<ErrorPayload> for HandlerError {
    fn from(payload: ErrorPayload) -> Self {
        Self {
            code: payload.code,
            message: payload.message,
        }
    }
}

impl From<EngineError> for HandlerError {
    fn from(error: EngineError) -> Self {
        Self::new(error.to_string()).with_code(500)
    }
}

/// Room-level error, delivered to `error` listeners rather than raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// JOIN or LEAVE with an empty participant id.
    #[error("Invalid id")]
    InvalidId,
}

/// Route registration failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The pattern could not be parsed.
    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// Offending pattern.
        pattern: String,
        /// What was wrong.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_not_found_is_404() {
        let err = HandshakeError::RouteNotFound { path: "/x".into() };
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Not found");
    }

    #[test]
    fn unauthorized_uses_hook_code() {
        let err = HandshakeError::Unauthorized {
            code: 403,
            message: "Forbidden".into(),
        };
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn bogus_code_falls_back_to_401() {
        let err = HandshakeError::Unauthorized {
            code: 42,
            message: "?".into(),
        };
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn handler_error_defaults() {
        let err = HandlerError::default();
        assert_eq!(err.code, 400);
        assert_eq!(err.message, "Unknown error");
        assert_eq!(err.into_payload(), ErrorPayload::default());
    }

    #[test]
    fn engine_error_maps_to_500() {
        let err = HandlerError::from(EngineError::Closed);
        assert_eq!(err.code, 500);
        assert_eq!(err.message, "engine closed");
    }
}
