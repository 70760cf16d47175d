use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ClientError;

/// Environment variable prefix read by [`ClientConfig::from_env`].
pub const ENV_PREFIX: &str = "SCHOLAR_API_";

const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Client-wide settings. Per-call [`RequestOptions`](crate::RequestOptions)
/// fall back to these when a field is left unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Prefix for every relative request path.
    pub base_url: String,
    /// Extra attempts after the first one for retryable failures.
    pub retries: u32,
    /// Per-attempt deadline when the caller supplies no cancellation token.
    pub timeout_ms: u64,
    /// Keep session cookies between calls.
    pub cookie_store: bool,
    pub user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            retries: DEFAULT_RETRIES,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            cookie_store: true,
            user_agent: None,
        }
    }
}

impl ClientConfig {
    /// Configuration pointing at `base_url` with every other field defaulted.
    #[must_use]
    pub fn remote(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from `SCHOLAR_API_*` environment variables on top of
    /// the defaults.
    ///
    /// Recognised variables:
    /// - `SCHOLAR_API_BASE_URL`
    /// - `SCHOLAR_API_RETRIES`
    /// - `SCHOLAR_API_TIMEOUT_MS`
    /// - `SCHOLAR_API_COOKIE_STORE`
    /// - `SCHOLAR_API_USER_AGENT`
    ///
    /// # Errors
    /// Returns [`ClientError::Config`] when a variable has the wrong type, an
    /// unknown `SCHOLAR_API_*` variable is set, or the base URL is invalid.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::load(None)
    }

    /// Layered load: defaults, then the optional YAML file, then environment.
    ///
    /// # Errors
    /// Returns [`ClientError::Config`] when a layer cannot be read or
    /// extracted, or the resulting base URL is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ClientError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.is_file() {
                return Err(ClientError::Config(format!(
                    "config file {} not found",
                    path.display()
                )));
            }
            figment = figment.merge(Yaml::file(path));
        }
        let config: Self = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns [`ClientError::Config`] if `base_url` is not an absolute
    /// http(s) URL.
    pub fn validate(&self) -> Result<(), ClientError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::Config(format!("invalid base_url '{}': {e}", self.base_url)))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(ClientError::Config(format!(
                "unsupported base_url scheme '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.retries, 3);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.cookie_store);
    }

    #[test]
    fn test_config_remote_with_overrides() {
        let config = ClientConfig::remote("https://scholar.example.org/api")
            .with_timeout(Duration::from_secs(5))
            .with_retries(1);
        assert_eq!(config.base_url, "https://scholar.example.org/api");
        assert_eq!(config.timeout_ms, 5_000);
        assert_eq!(config.retries, 1);
    }

    #[test]
    fn test_from_env() {
        temp_env::with_vars(
            [
                ("SCHOLAR_API_BASE_URL", Some("https://api.example.org")),
                ("SCHOLAR_API_RETRIES", Some("5")),
                ("SCHOLAR_API_TIMEOUT_MS", Some("1500")),
            ],
            || {
                let config = ClientConfig::from_env().unwrap();
                assert_eq!(config.base_url, "https://api.example.org");
                assert_eq!(config.retries, 5);
                assert_eq!(config.timeout_ms, 1500);
            },
        );
    }

    #[test]
    fn test_from_env_rejects_bad_base_url() {
        temp_env::with_var("SCHOLAR_API_BASE_URL", Some("ftp://files.example.org"), || {
            let err = ClientConfig::from_env().unwrap_err();
            assert!(matches!(err, ClientError::Config(_)));
        });
    }

    #[test]
    fn test_validate_rejects_relative_base() {
        let config = ClientConfig::remote("/api");
        assert!(config.validate().is_err());
    }
}
