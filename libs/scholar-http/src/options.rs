use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Which parser a successful response body goes through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedContentType {
    /// Pick from the response `Content-Type`.
    #[default]
    Auto,
    Json,
    Text,
    Blob,
}

/// Per-call options.
///
/// Every field is optional; unset fields are filled from the client's
/// [`ClientConfig`] exactly once when the call starts. When deserialized from
/// configuration, unknown keys are rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestOptions {
    pub retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    /// External cancellation. When present no internal timer is armed.
    #[serde(skip)]
    pub signal: Option<CancellationToken>,
    #[serde(default)]
    pub skip_auth_check: bool,
    #[serde(default)]
    pub expected_content_type: ExpectedContentType,
    pub preserve_error_detail: Option<bool>,
    /// Merged over the default `Content-Type: application/json`.
    #[serde(skip)]
    pub headers: HeaderMap,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn with_signal(mut self, token: CancellationToken) -> Self {
        self.signal = Some(token);
        self
    }

    /// Treat 401/403 as ordinary API errors. Used by login/logout endpoints.
    #[must_use]
    pub fn skip_auth_check(mut self) -> Self {
        self.skip_auth_check = true;
        self
    }

    #[must_use]
    pub fn expect(mut self, content_type: ExpectedContentType) -> Self {
        self.expected_content_type = content_type;
        self
    }

    #[must_use]
    pub fn preserve_error_detail(mut self) -> Self {
        self.preserve_error_detail = Some(true);
        self
    }

    /// Add a header sent with this call only.
    ///
    /// # Errors
    /// Returns [`ClientError::BuildError`] for an invalid header name or value.
    pub fn with_header<K, V>(mut self, key: K, value: V) -> Result<Self, ClientError>
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
        K::Error: std::fmt::Display,
        V::Error: std::fmt::Display,
    {
        let key = key
            .try_into()
            .map_err(|e| ClientError::BuildError(format!("Invalid header name: {e}")))?;
        let value = value
            .try_into()
            .map_err(|e| ClientError::BuildError(format!("Invalid header value: {e}")))?;
        self.headers.insert(key, value);
        Ok(self)
    }

    pub(crate) fn resolve(self, config: &ClientConfig) -> ResolvedOptions {
        ResolvedOptions {
            retries: self.retries.unwrap_or(config.retries),
            timeout: Duration::from_millis(self.timeout_ms.unwrap_or(config.timeout_ms)),
            signal: self.signal,
            skip_auth_check: self.skip_auth_check,
            expected_content_type: self.expected_content_type,
            preserve_error_detail: self.preserve_error_detail.unwrap_or(false),
            headers: self.headers,
        }
    }
}

/// Options with every default applied.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub(crate) retries: u32,
    pub(crate) timeout: Duration,
    pub(crate) signal: Option<CancellationToken>,
    pub(crate) skip_auth_check: bool,
    pub(crate) expected_content_type: ExpectedContentType,
    pub(crate) preserve_error_detail: bool,
    pub(crate) headers: HeaderMap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_uses_client_defaults() {
        let config = ClientConfig::default().with_retries(2);
        let resolved = RequestOptions::new().resolve(&config);
        assert_eq!(resolved.retries, 2);
        assert_eq!(resolved.timeout, Duration::from_secs(30));
        assert!(resolved.signal.is_none());
        assert!(!resolved.skip_auth_check);
        assert_eq!(resolved.expected_content_type, ExpectedContentType::Auto);
        assert!(!resolved.preserve_error_detail);
    }

    #[test]
    fn test_resolve_prefers_call_values() {
        let resolved = RequestOptions::new()
            .with_retries(0)
            .with_timeout(Duration::from_millis(250))
            .skip_auth_check()
            .expect(ExpectedContentType::Text)
            .preserve_error_detail()
            .resolve(&ClientConfig::default());
        assert_eq!(resolved.retries, 0);
        assert_eq!(resolved.timeout, Duration::from_millis(250));
        assert!(resolved.skip_auth_check);
        assert_eq!(resolved.expected_content_type, ExpectedContentType::Text);
        assert!(resolved.preserve_error_detail);
    }

    #[test]
    fn test_deserialize_known_keys() {
        let opts: RequestOptions = serde_json::from_str(
            r#"{"retries": 1, "timeout_ms": 500, "expected_content_type": "blob"}"#,
        )
        .unwrap();
        assert_eq!(opts.retries, Some(1));
        assert_eq!(opts.timeout_ms, Some(500));
        assert_eq!(opts.expected_content_type, ExpectedContentType::Blob);
    }

    #[test]
    fn test_deserialize_rejects_unknown_keys() {
        let result = serde_json::from_str::<RequestOptions>(r#"{"retry": 1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_header_is_build_error() {
        let err = RequestOptions::new()
            .with_header("bad header", "v")
            .unwrap_err();
        assert!(matches!(err, ClientError::BuildError(_)));
    }
}
