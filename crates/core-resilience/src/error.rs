//! Error classification shared by the retry and admission primitives

use std::fmt;
use thiserror::Error;

/// How a failed attempt should be treated by [`RetryPolicy`](crate::RetryPolicy)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The target is simply not there ("not found"). Ends the loop at once
    /// with a non-error outcome.
    Absent,

    /// Temporary failure (network, throttling, 5xx). Retried.
    Transient,

    /// Will fail the same way every time (bad credentials, invalid request).
    /// Surfaced immediately without retrying.
    Permanent,
}

/// Implemented by any error type that can be driven through a retry loop
pub trait Classify {
    /// Classify this error
    fn classify(&self) -> ErrorClass;
}

/// Failure of a retried operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a transient error; carries the last cause
    Exhausted { attempts: u32, last: E },

    /// A permanent error stopped the loop early
    Permanent(E),
}

impl<E> RetryError<E> {
    /// The underlying cause, whichever way the loop ended
    pub fn cause(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Permanent(e) => e,
        }
    }

    /// Consume and return the underlying cause
    pub fn into_cause(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Permanent(e) => e,
        }
    }

    /// Whether the loop ran out of attempts
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "retries exhausted after {} attempts: {}", attempts, last)
            }
            RetryError::Permanent(e) => write!(f, "permanent failure: {}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// The limiter was closed while a task was waiting for admission
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("concurrency limiter is closed")]
pub struct LimiterClosed;
