//! Gateway error types.

use thiserror::Error;

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway errors.
///
/// The taxonomy mirrors how failures propagate: `Auth` is handled centrally
/// by the refresh coordinator and only surfaces when refresh itself fails;
/// `Network` and `Server` are retried before escalating; `Client`,
/// `Validation`, and `Decode` never retry and propagate immediately.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing, expired, or irrecoverable credential.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// No response received (connection failure or timeout).
    #[error("network error: {0}")]
    Network(String),

    /// Server-side failure (5xx, or 429 throttling) after retries exhausted.
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body or failure description.
        message: String,
    },

    /// Terminal client error (4xx other than auth failures).
    #[error("client error ({status}): {message}")]
    Client {
        /// HTTP status code.
        status: u16,
        /// Response body or failure description.
        message: String,
    },

    /// Caller-supplied malformed descriptor.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Check if this error is transient: no response received, or a
    /// server-side failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server { .. })
    }

    /// Check if this is an authentication error.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Get the HTTP status code if one was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } | Self::Client { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Network(format!("request timed out: {e}"))
        } else if e.is_connect() {
            Self::Network(format!("connection failed: {e}"))
        } else if e.is_builder() || e.is_request() {
            Self::Validation(e.to_string())
        } else if e.is_decode() || e.is_body() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(e: url::ParseError) -> Self {
        Self::Validation(format!("invalid URL: {e}"))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
