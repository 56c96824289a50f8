//! Partial-failure batches
//!
//! [`BatchCoordinator::run_all`] runs one operation per item concurrently and
//! records every failure instead of stopping at the first one. Concurrency is
//! bounded by the limiters the operations themselves go through.
//!
//! A [`BatchResult`] counts as a success unless every item failed; an empty
//! batch is a success.

use crate::error::{TransferError, TransferResult, EXIT_FATAL, EXIT_PARTIAL, EXIT_SUCCESS};
use crate::observability::Logger;
use futures::future::join_all;
use serde::{Serialize, Serializer};
use std::future::Future;

/// An item that failed, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    /// Path or key identifying the item
    pub identifier: String,

    #[serde(serialize_with = "as_text")]
    pub cause: TransferError,
}

fn as_text<S: Serializer>(cause: &TransferError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(cause)
}

/// Aggregate outcome of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    AllSucceeded,
    PartialFailure,
    AllFailed,
}

/// Per-item results of a batch operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub succeeded_paths: Vec<String>,
    pub failed_items: Vec<FailedItem>,
}

impl BatchResult {
    /// Number of items attempted
    pub fn total(&self) -> usize {
        self.succeeded_paths.len() + self.failed_items.len()
    }

    pub fn outcome(&self) -> BatchOutcome {
        if self.failed_items.is_empty() {
            BatchOutcome::AllSucceeded
        } else if self.succeeded_paths.is_empty() {
            BatchOutcome::AllFailed
        } else {
            BatchOutcome::PartialFailure
        }
    }

    /// `true` unless every item failed
    pub fn success(&self) -> bool {
        self.outcome() != BatchOutcome::AllFailed
    }

    /// Human-readable summary
    pub fn message(&self) -> String {
        match self.outcome() {
            BatchOutcome::AllSucceeded => {
                format!("All {} items succeeded", self.total())
            }
            BatchOutcome::PartialFailure => format!(
                "{} of {} items failed",
                self.failed_items.len(),
                self.total()
            ),
            BatchOutcome::AllFailed => format!("All {} items failed", self.total()),
        }
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self.outcome() {
            BatchOutcome::AllSucceeded => EXIT_SUCCESS,
            BatchOutcome::PartialFailure => EXIT_PARTIAL,
            BatchOutcome::AllFailed => EXIT_FATAL,
        }
    }

    /// JSON report including the aggregate outcome and message
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&serde_json::json!({
            "success": self.success(),
            "outcome": self.outcome(),
            "message": self.message(),
            "succeeded_paths": self.succeeded_paths,
            "failed_items": self.failed_items,
        }))
    }
}

/// Runs per-item operations and collects a [`BatchResult`]
pub struct BatchCoordinator<'a> {
    logger: &'a dyn Logger,
}

impl<'a> BatchCoordinator<'a> {
    pub fn new(logger: &'a dyn Logger) -> Self {
        Self { logger }
    }

    /// Run `operation` on every `(identifier, item)` concurrently.
    ///
    /// Never fails: each error is recorded against its identifier and the
    /// rest of the batch carries on. Result order follows input order.
    pub async fn run_all<I, T, F, Fut>(&self, items: Vec<(String, I)>, operation: F) -> BatchResult
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = TransferResult<T>>,
    {
        let runs = items.into_iter().map(|(identifier, item)| {
            let run = operation(item);
            async move { (identifier, run.await) }
        });

        let mut result = BatchResult::default();
        for (identifier, outcome) in join_all(runs).await {
            match outcome {
                Ok(_) => result.succeeded_paths.push(identifier),
                Err(cause) => self.skip(&mut result, identifier, cause),
            }
        }

        tracing::debug!(
            succeeded = result.succeeded_paths.len(),
            failed = result.failed_items.len(),
            "batch finished"
        );
        result
    }

    /// Record a failed item and warn about it
    pub fn skip(&self, result: &mut BatchResult, identifier: String, cause: TransferError) {
        self.logger
            .warn(&format!("skipping {}: {}", identifier, cause));
        result.failed_items.push(FailedItem { identifier, cause });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::{CapturingLogger, NoopLogger};

    fn items(n: usize) -> Vec<(String, usize)> {
        (0..n).map(|i| (format!("item-{}", i), i)).collect()
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_rest() {
        let logger = CapturingLogger::new();
        let result = BatchCoordinator::new(&logger)
            .run_all(items(5), |i| async move {
                if i == 2 {
                    Err(TransferError::Io("disk".to_string()))
                } else {
                    Ok(i)
                }
            })
            .await;

        assert_eq!(result.succeeded_paths, vec!["item-0", "item-1", "item-3", "item-4"]);
        assert_eq!(result.failed_items.len(), 1);
        assert_eq!(result.failed_items[0].identifier, "item-2");
        assert_eq!(result.outcome(), BatchOutcome::PartialFailure);
        assert!(result.success());
        assert_eq!(result.message(), "1 of 5 items failed");
        assert_eq!(logger.warning_count(), 1);
    }

    #[tokio::test]
    async fn test_all_failed() {
        let result = BatchCoordinator::new(&NoopLogger)
            .run_all(items(3), |_| async {
                Err::<(), _>(TransferError::Io("disk".to_string()))
            })
            .await;

        assert_eq!(result.outcome(), BatchOutcome::AllFailed);
        assert!(!result.success());
        assert_eq!(result.message(), "All 3 items failed");
        assert_eq!(result.exit_code(), EXIT_FATAL);
    }

    #[tokio::test]
    async fn test_empty_batch_is_success() {
        let result = BatchCoordinator::new(&NoopLogger)
            .run_all(Vec::<(String, ())>::new(), |_| async { Ok(()) })
            .await;

        assert_eq!(result.outcome(), BatchOutcome::AllSucceeded);
        assert!(result.success());
        assert_eq!(result.message(), "All 0 items succeeded");
    }

    #[test]
    fn test_json_report() {
        let result = BatchResult {
            succeeded_paths: vec!["a".to_string()],
            failed_items: vec![FailedItem {
                identifier: "b".to_string(),
                cause: TransferError::NotFound("b".to_string()),
            }],
        };

        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["outcome"], "partial_failure");
        assert_eq!(json["failed_items"][0]["cause"], "Object not found: b");
        assert_eq!(json["succeeded_paths"][0], "a");
    }
}
