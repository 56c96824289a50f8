//! Multi-file operations
//!
//! Each of these returns a [`BatchResult`]: one item failing never fails the
//! call. Only problems that stop the batch from starting at all (the folder
//! cannot be walked, the prefix cannot be listed) are returned as errors.

use super::{join_key, TransferOrchestrator};
use crate::batch::{BatchCoordinator, BatchResult};
use crate::error::{TransferError, TransferResult};
use crate::payload::Payload;
use crate::store::StoreError;
use conveyor_core_resilience::ConcurrencyLimiter;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Most keys the store accepts in one batch delete
pub const DELETE_BATCH_SIZE: usize = 1000;

impl TransferOrchestrator {
    /// Upload every `(payload, key)` pair
    pub async fn upload_files(&self, items: Vec<(Payload, String)>) -> BatchResult {
        let items = items
            .into_iter()
            .map(|(payload, key)| (key.clone(), (payload, key)))
            .collect();

        BatchCoordinator::new(self.ctx.logger())
            .run_all(items, |(payload, key)| async move {
                self.upload(payload, &key).await
            })
            .await
    }

    /// Upload every file below `dir` to `prefix/<relative path>`
    pub async fn upload_folder(
        &self,
        dir: impl AsRef<Path>,
        prefix: &str,
    ) -> TransferResult<BatchResult> {
        let dir = dir.as_ref();
        let files = self.ctx.fs().walk_files(dir).await.map_err(|e| {
            TransferError::Preparation(format!("cannot walk {}: {}", dir.display(), e))
        })?;

        // bounds how many files are read at once; parts still share the upload limiter
        let limiter = ConcurrencyLimiter::new("folder-upload", self.ctx.config().max_concurrent_transfers);
        let fan_out = &limiter;

        let items = files
            .into_iter()
            .map(|path| {
                let key = join_key(prefix, &relative_key(dir, &path));
                (path.display().to_string(), (path, key))
            })
            .collect();

        Ok(BatchCoordinator::new(self.ctx.logger())
            .run_all(items, |(path, key)| async move {
                match fan_out.schedule(self.upload_file(&path, &key)).await {
                    Ok(uploaded) => uploaded,
                    Err(closed) => Err(closed.into()),
                }
            })
            .await)
    }

    /// Download every object under `prefix` into `dest_dir`, mirroring the
    /// key layout below the prefix
    pub async fn download_folder(
        &self,
        prefix: &str,
        dest_dir: impl AsRef<Path>,
    ) -> TransferResult<BatchResult> {
        let dest_dir = dest_dir.as_ref();
        let keys = self.list_files(prefix).await?;
        let limiter = self.ctx.download_limiter();

        let items = keys
            .into_iter()
            // zero-byte "folder" markers
            .filter(|key| !key.ends_with('/'))
            .map(|key| {
                let path = local_path(dest_dir, prefix, &key);
                (key.clone(), (key, path))
            })
            .collect();

        Ok(BatchCoordinator::new(self.ctx.logger())
            .run_all(items, |(key, path)| async move {
                match limiter.schedule(self.download_file(&key, &path)).await {
                    Ok(downloaded) => downloaded,
                    Err(closed) => Err(closed.into()),
                }
            })
            .await)
    }

    /// Delete keys using the store's batch delete, 1000 keys per request
    pub async fn delete_files(&self, keys: &[String]) -> BatchResult {
        let coordinator = BatchCoordinator::new(self.ctx.logger());
        let store = self.ctx.store();
        let mut result = BatchResult::default();

        for group in keys.chunks(DELETE_BATCH_SIZE) {
            let label = group.first().map(String::as_str).unwrap_or_default();
            let deleted = self
                .retried_required("delete_objects", label, move |_| {
                    store.delete_objects(group)
                })
                .await;

            match deleted {
                Ok(failures) => {
                    let refused: HashMap<&str, &str> = failures
                        .iter()
                        .map(|f| (f.key.as_str(), f.message.as_str()))
                        .collect();
                    for key in group {
                        match refused.get(key.as_str()) {
                            None => result.succeeded_paths.push(key.clone()),
                            Some(message) => coordinator.skip(
                                &mut result,
                                key.clone(),
                                TransferError::Rejected {
                                    operation: "delete_objects".to_string(),
                                    source: StoreError::Service {
                                        code: "DeleteRefused".to_string(),
                                        message: message.to_string(),
                                    },
                                },
                            ),
                        }
                    }
                }
                Err(err) => {
                    for key in group {
                        coordinator.skip(&mut result, key.clone(), err.clone());
                    }
                }
            }
        }

        result
    }

    /// Delete every object under `prefix`
    ///
    /// An empty prefix is refused rather than emptying the whole bucket.
    pub async fn delete_folder(&self, prefix: &str) -> TransferResult<BatchResult> {
        if prefix.trim_matches('/').is_empty() {
            return Err(TransferError::InvalidKey(
                "refusing to delete with an empty prefix".to_string(),
            ));
        }
        let keys = self.list_files(prefix).await?;
        Ok(self.delete_files(&keys).await)
    }
}

/// Path of `file` below `root`, with `/` separators
fn relative_key(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Where `key` lands below `dest_dir`. Segments that could escape the
/// destination (`..`, `.`, empty) are dropped.
fn local_path(dest_dir: &Path, prefix: &str, key: &str) -> PathBuf {
    let relative = key.strip_prefix(prefix).unwrap_or(key);
    let relative = if relative.trim_matches('/').is_empty() {
        key.rsplit('/').next().unwrap_or(key)
    } else {
        relative
    };

    let mut path = dest_dir.to_path_buf();
    for segment in relative.split('/') {
        if !segment.is_empty() && segment != "." && segment != ".." {
            path.push(segment);
        }
    }
    path
}
