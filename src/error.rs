//! # Error Handling
//!
//! Defines the application-level error taxonomy and how each variant maps to
//! an HTTP response and a WebSocket error code.
//!
//! ## Error Categories:
//! - **SessionNotFound**: action addressed to a missing or destroyed session (404)
//! - **SessionLimitReached**: registry is at its concurrent-session cap (429)
//! - **BufferLimitExceeded**: a per-session pending buffer hit its cap (413)
//! - **UpstreamModel**: the external model call failed or returned garbage (502)
//! - **BadRequest / ValidationError**: client sent invalid data (400)
//! - **ConfigError / Internal**: server-side problems (500)
//!
//! All of these are non-fatal to the registry: the session (where it still
//! exists) remains usable for subsequent operations.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

use crate::model::ModelError;

/// Custom error types for the application.
#[derive(Debug)]
pub enum AppError {
    /// Action addressed to a session id that is absent or already destroyed
    SessionNotFound(String),

    /// The registry refused to create another session
    SessionLimitReached(usize),

    /// A pending text/audio buffer is full; the fragment was rejected
    BufferLimitExceeded(String),

    /// The external model call failed; the session stays usable
    UpstreamModel(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// User input failed validation rules
    ValidationError(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Internal server errors
    Internal(String),
}

impl AppError {
    /// Machine-readable code used both in HTTP bodies and WebSocket error events.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::SessionLimitReached(_) => "session_limit_reached",
            AppError::BufferLimitExceeded(_) => "buffer_limit_exceeded",
            AppError::UpstreamModel(_) => "upstream_model_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::ValidationError(_) => "validation_error",
            AppError::ConfigError(_) => "config_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::SessionNotFound(id) => write!(f, "Session not found: {}", id),
            AppError::SessionLimitReached(max) => {
                write!(f, "Maximum concurrent sessions ({}) reached", max)
            }
            AppError::BufferLimitExceeded(msg) => write!(f, "Buffer limit exceeded: {}", msg),
            AppError::UpstreamModel(msg) => write!(f, "Upstream model error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let status = match self {
            AppError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::SessionLimitReached(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::BufferLimitExceeded(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UpstreamModel(_) => StatusCode::BAD_GATEWAY,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::ConfigError(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": self.code(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Model-client failures surface to callers as turn-level upstream errors.
impl From<ModelError> for AppError {
    fn from(err: ModelError) -> Self {
        AppError::UpstreamModel(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::SessionNotFound("abc".into()).code(),
            "session_not_found"
        );
        assert_eq!(
            AppError::UpstreamModel("boom".into()).code(),
            "upstream_model_error"
        );
    }

    #[test]
    fn test_http_status_mapping() {
        let resp = AppError::SessionNotFound("abc".into()).error_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = AppError::SessionLimitReached(5).error_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

        let resp = AppError::UpstreamModel("http 500".into()).error_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_model_error_conversion() {
        let err: AppError = ModelError::RateLimited.into();
        assert!(matches!(err, AppError::UpstreamModel(_)));
    }
}
