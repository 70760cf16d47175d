use std::fmt;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Typed description of a non-2xx outcome.
///
/// `message` is always human readable. `raw_response` is only populated when
/// the caller asked for the error detail to be preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub message: String,
    pub status: StatusCode,
    pub code: Option<String>,
    pub raw_response: Option<String>,
}

impl ApiError {
    #[must_use]
    pub fn new(message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            message: message.into(),
            status,
            code: None,
            raw_response: None,
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_raw_response(mut self, raw: impl Into<String>) -> Self {
        self.raw_response = Some(raw.into());
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status {})", self.message, self.status.as_u16())
    }
}

/// Every failure the client can surface to a caller.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a non-2xx status (or an unparseable 2xx body).
    #[error("API error: {0}")]
    Api(ApiError),

    /// The server rejected the session (401/403).
    #[error("Authentication error: {0}")]
    Authentication(ApiError),

    /// The internal timer expired before the exchange finished.
    #[error("Timeout: request did not complete within {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation token fired.
    #[error("Request cancelled")]
    Cancelled,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Request build error: {0}")]
    BuildError(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// HTTP status of the response behind this error, if there was one.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.api_error().map(|e| e.status)
    }

    #[must_use]
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(e) | Self::Authentication(e) => Some(e),
            _ => None,
        }
    }

    /// Transport failures and 5xx responses are worth another attempt.
    /// Client errors, auth failures, cancellation and body-parse failures are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Api(e) => e.status.is_server_error(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// `true` for both timer expiry and caller-initiated cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Cancelled)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

impl From<figment::Error> for ClientError {
    fn from(err: figment::Error) -> Self {
        ClientError::Config(err.to_string())
    }
}
