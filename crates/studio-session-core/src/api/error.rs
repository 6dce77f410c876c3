use thiserror::Error;

use crate::errors::{ErrorKind, Severity};
use crate::utils::truncate_string;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    #[error("Session expired - sign in again")]
    TokenExpired,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            format!(
                "{} (truncated, {} total bytes)",
                truncate_string(body, MAX_ERROR_BODY_LENGTH),
                body.len()
            )
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Unauthorized | ApiError::AccessDenied(_) => ErrorKind::Auth,
            ApiError::TokenExpired => ErrorKind::TokenExpired,
            ApiError::ServerError(_) | ApiError::RateLimited => ErrorKind::Server,
            ApiError::NetworkError(_) => ErrorKind::Network,
            ApiError::NotFound(_) | ApiError::InvalidRequest(_) | ApiError::InvalidResponse(_) => {
                ErrorKind::Unknown
            }
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ApiError::TokenExpired | ApiError::ServerError(_) => Severity::High,
            ApiError::Unauthorized
            | ApiError::AccessDenied(_)
            | ApiError::NetworkError(_)
            | ApiError::InvalidResponse(_) => Severity::Medium,
            ApiError::RateLimited | ApiError::NotFound(_) | ApiError::InvalidRequest(_) => {
                Severity::Low
            }
        }
    }

    /// Failures worth another attempt under the retry ledger.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::RateLimited | ApiError::NetworkError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_from_status() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, ""),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimited
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "upstream"),
            ApiError::ServerError(ref body) if body == "upstream"
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::IM_A_TEAPOT, ""),
            ApiError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_body_truncation() {
        let body = "x".repeat(2000);
        match ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body) {
            ApiError::ServerError(msg) => {
                assert!(msg.len() < 600);
                assert!(msg.ends_with("(truncated, 2000 total bytes)"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_kind_and_severity() {
        assert_eq!(ApiError::Unauthorized.kind(), ErrorKind::Auth);
        assert_eq!(ApiError::TokenExpired.kind(), ErrorKind::TokenExpired);
        assert_eq!(ApiError::TokenExpired.severity(), Severity::High);
        assert_eq!(ApiError::ServerError(String::new()).kind(), ErrorKind::Server);
        assert!(ApiError::RateLimited.is_retryable());
        assert!(!ApiError::Unauthorized.is_retryable());
    }
}
