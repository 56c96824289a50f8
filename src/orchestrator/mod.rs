//! Transfer orchestration
//!
//! # Overview
//!
//! [`TransferOrchestrator`] is the entry point for every transfer. It owns an
//! `Arc<TransferContext>` and never builds wire requests itself; each store
//! call goes through the [`ObjectStore`](crate::store::ObjectStore)
//! capability, wrapped in the context's retry policy and instrumented with a
//! span from the context's tracer.
//!
//! # Upload state machine
//!
//! ```text
//! Classifying ──► SingleOp ───────────────────────────────► Completed
//!      │
//!      └────────► Chunking ──► Finalizing ──► Completed
//!                     │             │
//!                     └─────────────┴──► Aborted (session aborted, error surfaced)
//! ```
//!
//! - Payloads at or below the multipart threshold are sent with one retried
//!   put; a zero-length payload is a single empty put.
//! - Larger payloads, and incremental payloads of unknown size, are split by
//!   [`ChunkSource`](crate::chunk::ChunkSource) into threshold-sized parts.
//!   Parts are submitted in order through the upload limiter and may finish
//!   in any order; the completion call lists them sorted by part number.
//! - Any unrecoverable failure after the session is open aborts the session
//!   (best effort) before the original error is returned.
//!
//! # Modules
//!
//! - `upload`: single and chunked uploads
//! - `download`: buffered and streamed downloads
//! - `objects`: existence, metadata, delete, copy, move, rename, presign
//! - `bulk`: multi-file operations returning a [`BatchResult`](crate::batch::BatchResult)

mod bulk;
mod download;
mod objects;
mod upload;

pub use download::DownloadReceipt;
pub use objects::{DeleteOutcome, MoveOutcome, MAX_PRESIGN_EXPIRY};
pub use upload::{TransferStrategy, UploadReceipt};

use crate::context::TransferContext;
use crate::error::{TransferError, TransferResult};
use crate::observability::{with_span, LogObserver};
use crate::store::{StoreError, StoreResult};
use conveyor_core_resilience::Outcome;
use std::future::Future;
use std::sync::Arc;

/// Drives uploads, downloads and object operations against one store
#[derive(Debug, Clone)]
pub struct TransferOrchestrator {
    pub(crate) ctx: Arc<TransferContext>,
}

impl TransferOrchestrator {
    pub fn new(ctx: Arc<TransferContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &TransferContext {
        &self.ctx
    }

    /// Run one store call under the retry policy, inside a span.
    /// Absence is reported as [`Outcome::Absent`].
    pub(crate) async fn retried<T, F, Fut>(
        &self,
        operation: &'static str,
        key: &str,
        call: F,
    ) -> TransferResult<Outcome<T, StoreError>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let observer = LogObserver::new(self.ctx.logger());
        let label = format!("{} {}", operation, key);
        let work = self.ctx.retry_policy().execute(&label, &observer, call);

        with_span(self.ctx.tracer(), operation, &[("key", key)], work)
            .await
            .map_err(|e| TransferError::from_retry(operation, e))
    }

    /// Like [`retried`](Self::retried), with absence turned into
    /// [`TransferError::NotFound`]
    pub(crate) async fn retried_required<T, F, Fut>(
        &self,
        operation: &'static str,
        key: &str,
        call: F,
    ) -> TransferResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        match self.retried(operation, key, call).await? {
            Outcome::Completed(value) => Ok(value),
            Outcome::Absent(_) => Err(TransferError::NotFound(key.to_string())),
        }
    }
}

/// Join a key prefix and a name with exactly one `/`
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Everything up to and including the last `/` of a key
pub fn parent_prefix(key: &str) -> &str {
    match key.rfind('/') {
        Some(idx) => &key[..=idx],
        None => "",
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::TransferConfig;
    use crate::observability::CapturingLogger;
    use crate::store::{InMemoryStore, ObjectStore};

    /// Engine over `store` with millisecond backoff and a capturing logger
    pub(crate) fn engine(
        store: &InMemoryStore,
        config: TransferConfig,
    ) -> (TransferOrchestrator, CapturingLogger) {
        engine_over(Arc::new(store.clone()), config)
    }

    /// Same as [`engine`], for any store
    pub(crate) fn engine_over(
        store: Arc<dyn ObjectStore>,
        config: TransferConfig,
    ) -> (TransferOrchestrator, CapturingLogger) {
        let logger = CapturingLogger::new();
        let config = TransferConfig {
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 4,
            ..config
        };
        let ctx = TransferContext::builder(store)
            .config(config)
            .logger(Arc::new(logger.clone()))
            .build();
        (TransferOrchestrator::new(ctx), logger)
    }
}
