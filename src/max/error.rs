//! Transport error types

use std::time::Duration;
use thiserror::Error;

/// Failed call to the MAX Bot API, classified for retry decisions
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl DeliveryError {
    pub fn new(kind: DeliveryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::InvalidRequest, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(DeliveryErrorKind::Unknown, message)
    }

    /// Classify a non-success HTTP response
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 | 403 => Self::auth(format!("Authentication failed: {body}")),
            429 => Self::rate_limit(format!("Rate limited: {body}")),
            400 | 404 => Self::invalid_request(format!("Invalid request: {body}")),
            500..=599 => Self::server_error(format!("Server error: {body}")),
            _ => Self::unknown(format!("HTTP {status}: {body}")),
        }
    }

    /// Classify a failure to complete the HTTP exchange
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network(format!("Request timeout: {err}"))
        } else if err.is_connect() {
            Self::network(format!("Connection failed: {err}"))
        } else if err.is_decode() {
            Self::invalid_request(format!("Malformed response: {err}"))
        } else {
            Self::unknown(format!("Request failed: {err}"))
        }
    }
}

/// Error classification for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// Network issues, timeouts - retryable
    Network,
    /// Rate limited (429) - retryable with backoff
    RateLimit,
    /// Server error (5xx) - retryable
    ServerError,
    /// Bad or revoked token (401, 403) - not retryable
    Auth,
    /// Rejected by the API, e.g. the user blocked the bot - not retryable
    InvalidRequest,
    Unknown,
}

impl DeliveryErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::ServerError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        let cases = [
            (StatusCode::UNAUTHORIZED, DeliveryErrorKind::Auth),
            (StatusCode::FORBIDDEN, DeliveryErrorKind::Auth),
            (StatusCode::TOO_MANY_REQUESTS, DeliveryErrorKind::RateLimit),
            (StatusCode::BAD_REQUEST, DeliveryErrorKind::InvalidRequest),
            (StatusCode::BAD_GATEWAY, DeliveryErrorKind::ServerError),
            (StatusCode::IM_A_TEAPOT, DeliveryErrorKind::Unknown),
        ];
        for (status, kind) in cases {
            assert_eq!(DeliveryError::from_status(status, "{}").kind, kind, "{status}");
        }
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(DeliveryErrorKind::Network.is_retryable());
        assert!(DeliveryErrorKind::RateLimit.is_retryable());
        assert!(!DeliveryErrorKind::Auth.is_retryable());
        assert!(!DeliveryErrorKind::InvalidRequest.is_retryable());
    }
}
