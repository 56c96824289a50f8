//! Single-object operations: existence, metadata, delete, copy, move,
//! rename and pre-signed URLs

use super::{parent_prefix, TransferOrchestrator};
use crate::error::{TransferError, TransferResult};
use crate::store::{ObjectMetadata, PresignMethod};
use conveyor_core_resilience::Outcome;
use serde::Serialize;
use std::time::Duration;

/// Longest validity accepted for a pre-signed URL
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Result of [`TransferOrchestrator::delete_file`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,

    /// Nothing was there; nothing was done
    NotFound,
}

/// Result of a move or rename
///
/// The copy is never rolled back: when the delete half fails the object
/// exists at both keys and `original_deleted` is `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveOutcome {
    pub destination: String,
    pub original_deleted: bool,
}

impl TransferOrchestrator {
    /// Whether an object exists
    pub async fn exists(&self, key: &str) -> TransferResult<bool> {
        Ok(self.metadata(key).await?.is_some())
    }

    /// Object metadata, `None` when absent
    pub async fn metadata(&self, key: &str) -> TransferResult<Option<ObjectMetadata>> {
        let store = self.ctx.store();
        let outcome = self
            .retried("head_object", key, move |_| store.head_object(key))
            .await?;
        Ok(outcome.completed())
    }

    /// Delete one object; a missing key is reported, not raised
    pub async fn delete_file(&self, key: &str) -> TransferResult<DeleteOutcome> {
        let store = self.ctx.store();
        let outcome = self
            .retried("delete_object", key, move |_| store.delete_object(key))
            .await?;

        Ok(match outcome {
            Outcome::Completed(()) => DeleteOutcome::Deleted,
            Outcome::Absent(_) => {
                tracing::debug!(key, "delete of missing key");
                DeleteOutcome::NotFound
            }
        })
    }

    /// Server-side copy
    pub async fn copy_file(&self, source_key: &str, dest_key: &str) -> TransferResult<()> {
        let store = self.ctx.store();
        self.retried_required("copy_object", source_key, move |_| {
            store.copy_object(source_key, dest_key)
        })
        .await
    }

    /// Copy then delete the original
    pub async fn move_file(&self, source_key: &str, dest_key: &str) -> TransferResult<MoveOutcome> {
        if source_key == dest_key {
            return Err(TransferError::InvalidKey(format!(
                "cannot move {} onto itself",
                source_key
            )));
        }

        self.copy_file(source_key, dest_key).await?;

        let store = self.ctx.store();
        let deleted = self
            .retried("delete_object", source_key, move |_| {
                store.delete_object(source_key)
            })
            .await;

        let original_deleted = match deleted {
            // already gone counts as deleted
            Ok(_) => true,
            Err(e) => {
                self.ctx.logger().warn(&format!(
                    "copied {} to {} but could not delete the original: {}",
                    source_key, dest_key, e
                ));
                false
            }
        };

        Ok(MoveOutcome {
            destination: dest_key.to_string(),
            original_deleted,
        })
    }

    /// Move an object to a new name under the same parent prefix
    pub async fn rename_file(&self, key: &str, new_name: &str) -> TransferResult<MoveOutcome> {
        if new_name.is_empty() || new_name.contains('/') {
            return Err(TransferError::InvalidKey(format!(
                "new name must be non-empty and contain no '/': {:?}",
                new_name
            )));
        }
        let destination = format!("{}{}", parent_prefix(key), new_name);
        self.move_file(key, &destination).await
    }

    /// Pre-signed URL; `expires_in` is clamped to 1 second..=7 days
    pub async fn presigned_url(
        &self,
        key: &str,
        method: PresignMethod,
        expires_in: Duration,
    ) -> TransferResult<String> {
        let expires_in = expires_in.clamp(Duration::from_secs(1), MAX_PRESIGN_EXPIRY);
        let store = self.ctx.store();
        self.retried_required("presign", key, move |_| {
            store.presign(key, method, expires_in)
        })
        .await
    }
}
