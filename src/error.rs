//! Error types for transfer orchestration

use crate::store::StoreError;
use conveyor_core_resilience::{LimiterClosed, RetryError};
use std::io;
use thiserror::Error;

pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

/// Errors surfaced by the transfer engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Target object does not exist
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Every attempt failed with a transient error
    #[error("{operation} failed after {attempts} attempts: {source}")]
    ExhaustedRetries {
        operation: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// The store refused the request; retrying would not help
    #[error("{operation} rejected: {source}")]
    Rejected {
        operation: String,
        #[source]
        source: StoreError,
    },

    /// The payload could not be turned into chunks
    #[error("Payload preparation failed: {0}")]
    Preparation(String),

    /// Cleanup of a multipart session failed
    #[error("Failed to abort multipart session {session_id}: {message}")]
    SessionAbort { session_id: String, message: String },

    /// Object is larger than the caller allowed to buffer
    #[error("Object {key} is {size} bytes, above the buffer ceiling of {limit} bytes")]
    TooLarge { key: String, size: u64, limit: u64 },

    /// Malformed key or name
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Local I/O failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A limiter stopped admitting work
    #[error("Transfer cancelled: {0}")]
    Cancelled(String),
}

impl TransferError {
    /// Convert the failure of a retried store call
    pub fn from_retry(operation: &str, err: RetryError<StoreError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => TransferError::ExhaustedRetries {
                operation: operation.to_string(),
                attempts,
                source: last,
            },
            RetryError::Permanent(source) => TransferError::Rejected {
                operation: operation.to_string(),
                source,
            },
        }
    }

    /// Whether the failure means the target is simply absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransferError::NotFound(_))
    }

    /// Whether the failure is the result of running out of attempts
    pub fn is_exhausted(&self) -> bool {
        matches!(self, TransferError::ExhaustedRetries { .. })
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            TransferError::NotFound(_) | TransferError::ExhaustedRetries { .. } => EXIT_PARTIAL,
            _ => EXIT_FATAL,
        }
    }
}

impl From<io::Error> for TransferError {
    fn from(err: io::Error) -> Self {
        TransferError::Io(err.to_string())
    }
}

impl From<LimiterClosed> for TransferError {
    fn from(err: LimiterClosed) -> Self {
        TransferError::Cancelled(err.to_string())
    }
}

impl From<toml::de::Error> for TransferError {
    fn from(err: toml::de::Error) -> Self {
        TransferError::Config(format!("Failed to parse TOML: {}", err))
    }
}

impl From<toml::ser::Error> for TransferError {
    fn from(err: toml::ser::Error) -> Self {
        TransferError::Config(format!("Failed to serialize TOML: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_retry_exhausted() {
        let err = TransferError::from_retry(
            "upload_part",
            RetryError::Exhausted {
                attempts: 3,
                last: StoreError::Network("reset".to_string()),
            },
        );
        assert!(err.is_exhausted());
        assert_eq!(
            err.to_string(),
            "upload_part failed after 3 attempts: Network error: reset"
        );
        assert_eq!(err.exit_code(), EXIT_PARTIAL);
    }

    #[test]
    fn test_from_retry_permanent() {
        let err = TransferError::from_retry(
            "put_object",
            RetryError::Permanent(StoreError::AccessDenied("no".to_string())),
        );
        assert!(matches!(err, TransferError::Rejected { .. }));
        assert_eq!(err.exit_code(), EXIT_FATAL);
    }

    #[test]
    fn test_limiter_closed_is_cancelled() {
        let err: TransferError = LimiterClosed.into();
        assert!(matches!(err, TransferError::Cancelled(_)));
    }
}
