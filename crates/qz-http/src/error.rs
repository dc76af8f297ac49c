//! Adapter construction errors and transport error mapping

use qz_engagement::ServiceError;

/// Errors building an HTTP backend
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// Base URL is not http or https
    #[error("base url must be http or https: {0}")]
    InvalidBaseUrl(String),

    /// A zero request timeout would fail every call
    #[error("request timeout must be at least one second")]
    ZeroTimeout,

    /// The HTTP client could not be built
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Classify a `reqwest` failure
pub(crate) fn transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout
    } else if err.is_decode() {
        ServiceError::Decode(err.to_string())
    } else {
        ServiceError::Transport(err.to_string())
    }
}
