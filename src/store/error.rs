//! Error types for object store calls

use conveyor_core_resilience::{Classify, ErrorClass};
use std::io;
use thiserror::Error;

/// Result type alias for object store calls
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by an [`ObjectStore`](super::ObjectStore) implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Object (or multipart session) does not exist
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// Service error with a protocol error code
    #[error("Storage service error ({code}): {message}")]
    Service { code: String, message: String },

    /// Access denied
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// The call did not answer in time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Throttled by the service
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Local I/O failure while producing or consuming a body
    #[error("I/O error: {0}")]
    Io(String),

    /// Opaque SDK failure
    #[error("SDK error: {0}")]
    Sdk(String),

    /// Store was constructed with an unusable configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Shorthand for a not-found error
    pub fn not_found(key: impl Into<String>) -> Self {
        StoreError::NotFound { key: key.into() }
    }

    /// Whether the target is simply absent
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound { .. } => true,
            StoreError::Service { code, .. } => is_absent_code(code),
            _ => false,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Network(_)
            | StoreError::Timeout(_)
            | StoreError::RateLimited(_)
            | StoreError::Io(_) => true,
            StoreError::Sdk(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("connection reset")
                    || lower.contains("connection timed out")
                    || lower.contains("broken pipe")
                    || lower.contains("connection refused")
                    || lower.contains("temporarily unavailable")
            }
            StoreError::Service { code, .. } => is_retryable_code(code),
            StoreError::NotFound { .. }
            | StoreError::AccessDenied(_)
            | StoreError::InvalidConfig(_) => false,
        }
    }
}

impl Classify for StoreError {
    fn classify(&self) -> ErrorClass {
        if self.is_not_found() {
            ErrorClass::Absent
        } else if self.is_retryable() {
            ErrorClass::Transient
        } else {
            ErrorClass::Permanent
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound {
                key: err.to_string(),
            },
            io::ErrorKind::TimedOut => StoreError::Timeout(err.to_string()),
            _ => StoreError::Io(err.to_string()),
        }
    }
}

/// Service codes that signal a retryable condition
pub(crate) fn is_retryable_code(code: &str) -> bool {
    matches!(
        code,
        "RequestTimeout"
            | "ServiceUnavailable"
            | "InternalError"
            | "SlowDown"
            | "RequestTimeTooSkewed"
    )
}

/// Service codes that mean "nothing there"
pub(crate) fn is_absent_code(code: &str) -> bool {
    matches!(code, "NoSuchKey" | "NotFound" | "NoSuchUpload")
}
