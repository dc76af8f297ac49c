//! Error types for the engagement engine
//!
//! Covers:
//! - Network failures from the views, reactions and answers services
//! - Rejected reaction kinds
//! - Credential decoding (never surfaced through the store API)
//! - Configuration validation

/// Main engagement error type
#[derive(Debug, thiserror::Error)]
pub enum EngagementError {
    /// A backing service call failed; local state was left unchanged
    #[error("network failure: {0}")]
    Network(#[from] ServiceError),

    /// Reaction kind is not part of the closed enumeration
    #[error("unknown reaction kind: '{0}'")]
    UnknownReactionKind(String),

    /// The session or the entity was torn down while the operation was in flight
    #[error("torn down while operation was in flight")]
    TornDown,
}

impl EngagementError {
    /// Check if the operation may be retried by a later user action
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(err) => err.is_transient(),
            Self::UnknownReactionKind(_) | Self::TornDown => false,
        }
    }
}

/// Errors reported by a backing service
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// Connection or transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Server answered with a non-success status
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body did not match the expected shape
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Request exceeded its deadline
    #[error("request timed out")]
    Timeout,
}

impl ServiceError {
    /// Create a status error
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// Transport failures, timeouts and 5xx answers are worth retrying
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

/// Credential decoding failures
///
/// The resolver collapses all of these to an anonymous viewer.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// No credential is stored
    #[error("no credential stored")]
    Missing,

    /// Token is not made of three dot-separated segments
    #[error("malformed token: expected 3 segments, found {0}")]
    Malformed(usize),

    /// Payload segment is not valid base64url
    #[error("payload is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// Payload is not a JSON object
    #[error("payload is not a JSON object: {0}")]
    Payload(String),

    /// Payload carries neither a username nor a user id
    #[error("payload carries no username or user id")]
    NoSubject,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Value outside its accepted range
    #[error("{field} out of range: {value} (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: u64,
        expected: &'static str,
    },

    /// TOML could not be parsed
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engagement_error_display() {
        let err = EngagementError::UnknownReactionKind("meh".to_string());
        assert!(err.to_string().contains("unknown reaction kind"));
    }

    #[test]
    fn network_errors_are_retryable() {
        assert!(EngagementError::Network(ServiceError::Timeout).is_retryable());
        assert!(EngagementError::Network(ServiceError::status(503, "busy")).is_retryable());
        assert!(!EngagementError::Network(ServiceError::status(400, "bad")).is_retryable());
        assert!(!EngagementError::UnknownReactionKind("x".into()).is_retryable());
        assert!(!EngagementError::TornDown.is_retryable());
    }

    #[test]
    fn service_error_converts() {
        let err: EngagementError = ServiceError::Transport("refused".into()).into();
        assert!(matches!(err, EngagementError::Network(ServiceError::Transport(_))));
    }
}
