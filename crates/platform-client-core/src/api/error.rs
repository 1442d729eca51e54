use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::SessionError;

/// Message surfaced when the token endpoint rejects a username/password pair.
pub const INVALID_CREDENTIALS_MESSAGE: &str =
    "Invalid credentials. Please check your username/password combination";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Unauthorized - token may be expired or revoked")]
    Unauthorized,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error ({status}): {body}")]
    ServerError { status: StatusCode, body: String },

    #[error("Unexpected status {status}: {body}")]
    Unexpected { status: StatusCode, body: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Session storage error: {0}")]
    Session(#[from] SessionError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError { status, body: truncated },
            _ => ApiError::Unexpected { status, body: truncated },
        }
    }

    /// HTTP status behind this error, when it came from a response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            ApiError::AccessDenied(_) => Some(StatusCode::FORBIDDEN),
            ApiError::NotFound(_) => Some(StatusCode::NOT_FOUND),
            ApiError::RateLimited => Some(StatusCode::TOO_MANY_REQUESTS),
            ApiError::ServerError { status, .. } | ApiError::Unexpected { status, .. } => {
                Some(*status)
            }
            ApiError::NetworkError(e) => e.status(),
            _ => None,
        }
    }

    /// True for failures that a fresh `log_in` could resolve.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ApiError::InvalidCredentials(_) | ApiError::NotLoggedIn | ApiError::Unauthorized
        )
    }
}
