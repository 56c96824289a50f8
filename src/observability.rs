//! Injected logging and tracing capabilities
//!
//! The engine never talks to a logging backend directly. It reports through
//! a [`Logger`] and wraps every retried group of store calls in a span
//! obtained from a [`Tracer`]. Both are supplied when the
//! [`TransferContext`](crate::context::TransferContext) is built; the no-op
//! implementations are used when the caller does not care.

use conveyor_core_resilience::{RetryNotice, RetryObserver};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{Instrument, Span};

/// Structured logger consumed by the engine
pub trait Logger: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Span factory consumed by the engine
pub trait Tracer: Send + Sync {
    /// Create a span for a group of retried store calls
    fn span(&self, name: &str, attributes: &[(&str, &str)]) -> Span;
}

/// Forwards to `tracing`
///
/// Warnings (retries, skipped batch items) are emitted at WARN in verbose
/// mode and at DEBUG otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger {
    pub verbose: bool,
}

impl TracingLogger {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warn(&self, message: &str) {
        if self.verbose {
            tracing::warn!("{}", message);
        } else {
            tracing::debug!("{}", message);
        }
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// Severity of a captured log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// Keeps every line in memory; handy in tests and for post-run reports
#[derive(Debug, Clone, Default)]
pub struct CapturingLogger {
    entries: Arc<Mutex<Vec<(Severity, String)>>>,
}

impl CapturingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, level: Severity, message: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((level, message.to_string()));
    }

    /// All captured lines, in order
    pub fn entries(&self) -> Vec<(Severity, String)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages captured at one level
    pub fn messages(&self, level: Severity) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    /// Number of warnings captured
    pub fn warning_count(&self) -> usize {
        self.messages(Severity::Warn).len()
    }
}

impl Logger for CapturingLogger {
    fn info(&self, message: &str) {
        self.push(Severity::Info, message);
    }

    fn warn(&self, message: &str) {
        self.push(Severity::Warn, message);
    }

    fn error(&self, message: &str) {
        self.push(Severity::Error, message);
    }
}

/// Creates `tracing` spans at INFO level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracer;

impl Tracer for TracingTracer {
    fn span(&self, name: &str, attributes: &[(&str, &str)]) -> Span {
        tracing::info_span!(
            "store_op",
            op = name,
            attributes = %Attributes(attributes)
        )
    }
}

/// Returns disabled spans
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn span(&self, _name: &str, _attributes: &[(&str, &str)]) -> Span {
        Span::none()
    }
}

struct Attributes<'a>(&'a [(&'a str, &'a str)]);

impl fmt::Display for Attributes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Run `work` inside a span obtained from `tracer`
pub async fn with_span<F: Future>(
    tracer: &dyn Tracer,
    name: &str,
    attributes: &[(&str, &str)],
    work: F,
) -> F::Output {
    work.instrument(tracer.span(name, attributes)).await
}

/// Reports retry notices as logger warnings
pub struct LogObserver<'a> {
    logger: &'a dyn Logger,
}

impl<'a> LogObserver<'a> {
    pub fn new(logger: &'a dyn Logger) -> Self {
        Self { logger }
    }
}

impl RetryObserver for LogObserver<'_> {
    fn on_retry(&self, notice: &RetryNotice<'_>) {
        self.logger.warn(&format!(
            "{} attempt {}/{} failed: {}; retrying in {:?}",
            notice.label, notice.attempt, notice.max_attempts, notice.cause, notice.delay
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_capturing_logger_levels() {
        let logger = CapturingLogger::new();
        logger.info("started");
        logger.warn("slow");
        logger.warn("slower");
        logger.error("failed");

        assert_eq!(logger.warning_count(), 2);
        assert_eq!(logger.messages(Severity::Error), vec!["failed"]);
        assert_eq!(logger.entries().len(), 4);
    }

    #[test]
    fn test_log_observer_formats_notice() {
        let logger = CapturingLogger::new();
        let observer = LogObserver::new(&logger);
        let cause = "connection reset";
        observer.on_retry(&RetryNotice {
            label: "upload_part",
            attempt: 1,
            max_attempts: 3,
            delay: Duration::from_millis(80),
            cause: &cause,
        });

        let warnings = logger.messages(Severity::Warn);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("upload_part attempt 1/3 failed: connection reset"));
    }

    #[test]
    fn test_attribute_rendering() {
        let attrs = [("key", "a/b.txt"), ("part", "2")];
        assert_eq!(Attributes(&attrs).to_string(), "key=a/b.txt part=2");
    }

    #[tokio::test]
    async fn test_noop_tracer_runs_work() {
        let value = with_span(&NoopTracer, "put_object", &[("key", "k")], async { 7 }).await;
        assert_eq!(value, 7);
        assert!(NoopTracer.span("x", &[]).is_disabled());
    }
}
