//! Error types for gemini-caption
//!
//! Errors come in two layers:
//! - [`Error`] is the run-level error. Any variant returned from
//!   [`BatchRunner::run`](crate::batch::BatchRunner::run) aborts the whole batch.
//! - Collaborator signals ([`CaptionError`], [`FetchError`], [`PersistError`]) are
//!   per-task. They never abort the run; the pipeline folds them into a
//!   [`TaskOutcome::Failed`](crate::types::TaskOutcome::Failed) tagged with an [`ErrorKind`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for gemini-caption operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gemini-caption
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrency")
        key: Option<String>,
    },

    /// Range request whose start lies after its end
    #[error("invalid range: start_id {start} is greater than end_id {end}")]
    InvalidRange {
        /// Requested first ID
        start: u64,
        /// Requested last ID
        end: u64,
    },

    /// Bucket key outside the ID space
    #[error("invalid key: {0} (keys must be non-negative)")]
    InvalidKey(i64),

    /// The bulk lookup round trip failed, so no reliable worklist can be formed
    #[error("bulk lookup unavailable: {0}")]
    LookupUnavailable(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error belongs to the configuration family (bad request shape)
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Error::Config { .. } | Error::InvalidRange { .. } | Error::InvalidKey(_)
        )
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Failure signal from the captioning service
///
/// The variant decides retry eligibility (see [`IsRetryable`](crate::retry::IsRetryable)):
/// rate limits, timeouts, transport failures and 5xx responses are transient,
/// everything else is permanent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptionError {
    /// Service asked us to slow down (HTTP 429)
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The attempt did not complete in time
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure before a response arrived
    #[error("transport error: {0}")]
    Network(String),

    /// Service reported a temporary outage (HTTP 5xx)
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The request itself was rejected (bad image, bad prompt)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Credentials were rejected
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Quota is exhausted and will not recover within this run
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Content was blocked by the service's safety filter
    #[error("response blocked: {0}")]
    Blocked(String),

    /// The response could not be interpreted, even after repair
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Failure signal from the image source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The image no longer exists at the source
    #[error("image not found: {0}")]
    NotFound(String),

    /// Transport failure or unexpected HTTP status
    #[error("image fetch failed: {0}")]
    Network(String),
}

/// Failure signal from the document store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("persistence failed: {0}")]
pub struct PersistError(pub String);

impl From<Error> for PersistError {
    fn from(e: Error) -> Self {
        PersistError(e.to_string())
    }
}

/// Classification of a failed task, as shown in the batch report
///
/// `PersistenceError` is kept apart from the service kinds: a caption was
/// generated but could not be stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Image bytes could not be acquired
    FetchError,
    /// Captioning kept failing with transient errors until the retry limit
    TransientServiceError,
    /// Captioning failed with a non-retryable error
    PermanentServiceError,
    /// Caption generated but the store write failed
    PersistenceError,
    /// The task died unexpectedly (panic)
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable name
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FetchError => "fetch_error",
            ErrorKind::TransientServiceError => "transient_service_error",
            ErrorKind::PermanentServiceError => "permanent_service_error",
            ErrorKind::PersistenceError => "persistence_error",
            ErrorKind::Internal => "internal",
        }
    }

    /// Parse the name produced by [`ErrorKind::as_str`]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fetch_error" => Some(ErrorKind::FetchError),
            "transient_service_error" => Some(ErrorKind::TransientServiceError),
            "permanent_service_error" => Some(ErrorKind::PermanentServiceError),
            "persistence_error" => Some(ErrorKind::PersistenceError),
            "internal" => Some(ErrorKind::Internal),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&CaptionError> for ErrorKind {
    fn from(e: &CaptionError) -> Self {
        use crate::retry::IsRetryable;
        if e.is_retryable() {
            ErrorKind::TransientServiceError
        } else {
            ErrorKind::PermanentServiceError
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_family_is_grouped() {
        assert!(Error::InvalidKey(-1).is_configuration_error());
        assert!(Error::InvalidRange { start: 5, end: 1 }.is_configuration_error());
        assert!(Error::config("max_concurrency", "must be at least 1").is_configuration_error());
        assert!(!Error::LookupUnavailable("down".to_string()).is_configuration_error());
        assert!(!Error::Other("x".to_string()).is_configuration_error());
    }

    #[test]
    fn error_kind_names_round_trip() {
        for kind in [
            ErrorKind::FetchError,
            ErrorKind::TransientServiceError,
            ErrorKind::PermanentServiceError,
            ErrorKind::PersistenceError,
            ErrorKind::Internal,
        ] {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::parse("bogus"), None);
    }

    #[test]
    fn caption_error_maps_to_report_kind() {
        assert_eq!(
            ErrorKind::from(&CaptionError::RateLimited("429".into())),
            ErrorKind::TransientServiceError
        );
        assert_eq!(
            ErrorKind::from(&CaptionError::Blocked("SAFETY".into())),
            ErrorKind::PermanentServiceError
        );
    }

    #[test]
    fn invalid_range_message_names_both_ends() {
        let msg = Error::InvalidRange { start: 10, end: 3 }.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains('3'));
    }
}
