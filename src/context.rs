//! Shared, immutable transfer context
//!
//! Everything the engine needs is collected once into a [`TransferContext`]:
//! configuration, the object store, the filesystem, logging and tracing
//! capabilities, the retry policy and the two concurrency limiters. The
//! context is shared through an `Arc`; nothing in it changes after
//! [`TransferContextBuilder::build`].

use crate::config::TransferConfig;
use crate::fs::{Filesystem, LocalFs};
use crate::observability::{Logger, NoopTracer, Tracer, TracingLogger};
use crate::store::ObjectStore;
use conveyor_core_resilience::{ConcurrencyLimiter, RetryPolicy};
use std::fmt;
use std::sync::Arc;

/// Capabilities and policies for one engine instance
pub struct TransferContext {
    config: TransferConfig,
    store: Arc<dyn ObjectStore>,
    fs: Arc<dyn Filesystem>,
    logger: Arc<dyn Logger>,
    tracer: Arc<dyn Tracer>,
    retry: RetryPolicy,
    upload_limiter: ConcurrencyLimiter,
    download_limiter: ConcurrencyLimiter,
}

impl TransferContext {
    /// Start building a context around `store`
    pub fn builder(store: Arc<dyn ObjectStore>) -> TransferContextBuilder {
        TransferContextBuilder {
            store,
            config: TransferConfig::default(),
            fs: None,
            logger: None,
            tracer: None,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn fs(&self) -> &dyn Filesystem {
        self.fs.as_ref()
    }

    pub fn logger(&self) -> &dyn Logger {
        self.logger.as_ref()
    }

    pub fn tracer(&self) -> &dyn Tracer {
        self.tracer.as_ref()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Limiter shared by every part upload and single put
    pub fn upload_limiter(&self) -> &ConcurrencyLimiter {
        &self.upload_limiter
    }

    /// Limiter for folder-download fan-out
    pub fn download_limiter(&self) -> &ConcurrencyLimiter {
        &self.download_limiter
    }
}

impl fmt::Debug for TransferContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferContext")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .field("upload_limiter", &self.upload_limiter)
            .field("download_limiter", &self.download_limiter)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TransferContext`]
///
/// # Example
///
/// ```
/// use conveyor::context::TransferContext;
/// use conveyor::config::TransferConfig;
/// use conveyor::store::InMemoryStore;
/// use std::sync::Arc;
///
/// let ctx = TransferContext::builder(Arc::new(InMemoryStore::new()))
///     .config(TransferConfig::network())
///     .build();
/// assert_eq!(ctx.retry_policy().max_attempts, 5);
/// ```
pub struct TransferContextBuilder {
    store: Arc<dyn ObjectStore>,
    config: TransferConfig,
    fs: Option<Arc<dyn Filesystem>>,
    logger: Option<Arc<dyn Logger>>,
    tracer: Option<Arc<dyn Tracer>>,
}

impl TransferContextBuilder {
    pub fn config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to [`LocalFs`]
    pub fn filesystem(mut self, fs: Arc<dyn Filesystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// Defaults to [`TracingLogger`] with the configured verbosity
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Defaults to [`NoopTracer`]
    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn build(self) -> Arc<TransferContext> {
        let config = self.config;
        let verbose = config.verbose_logging;
        Arc::new(TransferContext {
            retry: config.retry_policy(),
            upload_limiter: ConcurrencyLimiter::new("uploads", config.max_concurrent_transfers),
            download_limiter: ConcurrencyLimiter::new(
                "downloads",
                config.max_concurrent_downloads,
            ),
            store: self.store,
            fs: self.fs.unwrap_or_else(|| Arc::new(LocalFs)),
            logger: self
                .logger
                .unwrap_or_else(|| Arc::new(TracingLogger::new(verbose))),
            tracer: self.tracer.unwrap_or_else(|| Arc::new(NoopTracer)),
            config,
        })
    }
}
