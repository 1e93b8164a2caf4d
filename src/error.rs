use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors surfaced by the client data layer.
///
/// Errors are `Clone` because deduplicated callers of the same in-flight
/// request all receive the same rejection.
#[derive(Debug, Clone, Error, Serialize)]
pub enum ApiError {
    /// The backend answered with a non-success HTTP status.
    #[error("request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The request exceeded the configured timeout and was abandoned.
    #[error("request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the error represents a server rate-limit response (HTTP 429).
    pub fn is_rate_limit(&self) -> bool {
        self.status() == Some(429)
    }

    /// Convenience constructor for a 429 response.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        ApiError::Http {
            status: 429,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_detection() {
        assert!(ApiError::rate_limited("slow down").is_rate_limit());
        assert!(!ApiError::Http {
            status: 503,
            message: "unavailable".to_string()
        }
        .is_rate_limit());
        assert!(!ApiError::Network("connection reset".to_string()).is_rate_limit());
    }

    #[test]
    fn status_extraction() {
        let err = ApiError::Http {
            status: 404,
            message: "not found".to_string(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(ApiError::Timeout { after_ms: 30000 }.status(), None);
    }
}
