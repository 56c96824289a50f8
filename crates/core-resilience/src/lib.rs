//! Conveyor Core Resilience: pure-logic retry and admission primitives
//!
//! # Overview
//!
//! Two building blocks used by the transfer engine for every storage call:
//!
//! - **RetryPolicy**: exponential backoff (`min(cap, base * 2^(n-1))`) with
//!   jitter drawn from `[delay/2, delay]`, bounded attempt count, and a
//!   three-way classification of failures (absent / transient / permanent).
//! - **ConcurrencyLimiter**: FIFO counting semaphore bounding in-flight
//!   operations; clones share permits.
//!
//! # Key Principles
//!
//! This crate has zero knowledge of storage protocols, payloads or files.
//! Error types participate by implementing [`Classify`]; callers observe
//! non-final failures through [`RetryObserver`].
//!
//! ```text
//!   caller ──► ConcurrencyLimiter::schedule ──► RetryPolicy::execute ──► operation
//!                 (FIFO admission)                (backoff + jitter)
//! ```

pub mod error;
pub mod limiter;
pub mod retry;

pub use error::{Classify, ErrorClass, LimiterClosed, RetryError};
pub use limiter::{ConcurrencyLimiter, DEFAULT_DOWNLOAD_CONCURRENCY, DEFAULT_UPLOAD_CONCURRENCY};
pub use retry::{Outcome, RetryNotice, RetryObserver, RetryPolicy, SilentObserver};

/// Prelude module for convenient imports
pub mod prelude {
    pub use super::error::{Classify, ErrorClass, RetryError};
    pub use super::limiter::ConcurrencyLimiter;
    pub use super::retry::{Outcome, RetryObserver, RetryPolicy};
}
