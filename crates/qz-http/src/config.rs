//! HTTP adapter configuration

use crate::error::HttpError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the backing services live and how long to wait for them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Service root, e.g. `https://quiz.example.com/api`
    pub base_url: String,
    /// Per-request deadline
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl HttpConfig {
    /// Create configuration for `base_url` with the default timeout
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_secs: default_timeout_secs(),
        }
    }

    /// With request timeout
    #[inline]
    #[must_use]
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Request timeout as a duration
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check the base URL scheme and the timeout
    ///
    /// # Errors
    /// - `HttpError::InvalidBaseUrl` unless the URL is http or https
    /// - `HttpError::ZeroTimeout` for a zero timeout
    pub fn validate(&self) -> Result<(), HttpError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(HttpError::InvalidBaseUrl(self.base_url.clone()));
        }
        if self.request_timeout_secs == 0 {
            return Err(HttpError::ZeroTimeout);
        }
        Ok(())
    }

    /// Join `path` onto the base URL
    pub(crate) fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slashes() {
        let config = HttpConfig::new("https://quiz.example.com/api/");
        assert_eq!(config.url("/views/"), "https://quiz.example.com/api/views/");
        assert_eq!(
            config.url("questions/9/stats/"),
            "https://quiz.example.com/api/questions/9/stats/"
        );
    }

    #[test]
    fn validate_rejects_bad_scheme_and_zero_timeout() {
        assert!(HttpConfig::new("https://quiz.example.com").validate().is_ok());
        assert!(matches!(
            HttpConfig::new("ftp://quiz.example.com").validate(),
            Err(HttpError::InvalidBaseUrl(_))
        ));
        assert!(matches!(
            HttpConfig::new("http://localhost")
                .with_request_timeout_secs(0)
                .validate(),
            Err(HttpError::ZeroTimeout)
        ));
    }

    #[test]
    fn timeout_defaults_when_missing() {
        let config: HttpConfig =
            serde_json::from_str(r#"{"base_url":"http://localhost:8000"}"#).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }
}
