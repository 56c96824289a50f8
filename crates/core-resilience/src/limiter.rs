//! FIFO concurrency limiting for in-flight transfer operations
//!
//! A counting semaphore: at most `max_concurrent` scheduled tasks run at a
//! time, the rest wait in arrival order. Clones share the same permits, so
//! one limiter can bound every chunk of every file in a batch.
//!
//! # Example
//!
//! ```
//! use conveyor_core_resilience::ConcurrencyLimiter;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let limiter = ConcurrencyLimiter::new("uploads", 4);
//! let value = limiter.schedule(async { 2 + 2 }).await.unwrap();
//! assert_eq!(value, 4);
//! # }
//! ```

use crate::error::LimiterClosed;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Default cap for upload chunk/file operations
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

/// Default cap for folder-download fan-out
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 6;

/// Bounds the number of simultaneously running tasks.
///
/// Admission is FIFO (tokio's semaphore is fair); there is no priority and no
/// preemption.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    name: Arc<str>,
    semaphore: Arc<Semaphore>,
    max: usize,
}

impl ConcurrencyLimiter {
    /// Create a limiter admitting at most `max_concurrent` tasks (minimum 1)
    pub fn new(name: impl Into<Arc<str>>, max_concurrent: usize) -> Self {
        let max = max_concurrent.max(1);
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Run `task` once a slot is free, releasing the slot when it finishes
    /// (or is dropped).
    pub async fn schedule<F>(&self, task: F) -> Result<F::Output, LimiterClosed>
    where
        F: Future,
    {
        let _permit = self.semaphore.acquire().await.map_err(|_| LimiterClosed)?;
        tracing::trace!(limiter = %self.name, in_flight = self.in_flight(), "admitted");
        Ok(task.await)
    }

    /// Refuse further admissions; queued tasks fail with [`LimiterClosed`]
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Configured maximum
    pub fn max_concurrent(&self) -> usize {
        self.max
    }

    /// Free slots right now
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Tasks currently running
    pub fn in_flight(&self) -> usize {
        self.max.saturating_sub(self.available())
    }

    /// Name used in diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn test_zero_is_clamped_to_one() {
        let limiter = ConcurrencyLimiter::new("test", 0);
        assert_eq!(limiter.max_concurrent(), 1);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_max() {
        let limiter = ConcurrencyLimiter::new("test", 4);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..32).map(|_| {
            let limiter = limiter.clone();
            let running = running.clone();
            let peak = peak.clone();
            async move {
                limiter
                    .schedule(async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            }
        });
        join_all(tasks).await;

        assert_eq!(peak.load(Ordering::SeqCst), 4);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_fifo_admission() {
        let limiter = ConcurrencyLimiter::new("test", 1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let tasks = (0..8).map(|i| {
            let limiter = limiter.clone();
            let order = order.clone();
            async move {
                limiter
                    .schedule(async {
                        order.lock().unwrap().push(i);
                        tokio::task::yield_now().await;
                    })
                    .await
                    .unwrap();
            }
        });
        join_all(tasks).await;

        assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_closed_limiter_rejects() {
        let limiter = ConcurrencyLimiter::new("test", 2);
        limiter.close();
        assert!(limiter.is_closed());
        assert_eq!(limiter.schedule(async { 1 }).await, Err(LimiterClosed));
    }
}
