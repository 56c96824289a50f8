//! Single and chunked uploads

use super::{join_key, TransferOrchestrator};
use crate::chunk::{buffer_up_to, Buffered, Chunk, ChunkSource};
use crate::error::{TransferError, TransferResult};
use crate::payload::{Payload, PayloadContent};
use crate::store::CompletedPart;
use bytes::Bytes;
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::io;
use std::path::Path;

/// How a payload was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TransferStrategy {
    /// One put request
    Single,

    /// A multipart session with this many parts
    Multipart { parts: u32 },
}

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    /// Destination key
    pub key: String,

    /// Bytes sent
    pub bytes: u64,

    pub strategy: TransferStrategy,

    /// Tag of the stored object, when the store returned one
    pub etag: Option<String>,
}

/// Payload content after classification
enum Prepared {
    Resident(Bytes),
    Incremental(PayloadContent),
}

impl TransferOrchestrator {
    /// Upload a payload to `key`
    ///
    /// Payloads at or below the multipart threshold go up in one put;
    /// larger ones, and incremental payloads of unknown size, are chunked.
    /// The payload is consumed.
    pub async fn upload(&self, payload: Payload, key: &str) -> TransferResult<UploadReceipt> {
        if key.is_empty() {
            return Err(TransferError::InvalidKey("destination key is empty".to_string()));
        }

        let content_type = payload.resolve_content_type();
        let size = payload.known_size();
        let threshold = self.ctx.config().multipart_threshold();
        tracing::debug!(key, ?size, content_type = %content_type, threshold, "classifying upload");

        match self.prepare(payload.content, size).await? {
            Prepared::Resident(bytes) if bytes.len() <= threshold => {
                self.put_single(key, bytes, &content_type).await
            }
            Prepared::Resident(bytes) => {
                let source = ChunkSource::new(PayloadContent::Bytes(bytes), threshold);
                self.put_chunked(key, source, &content_type).await
            }
            Prepared::Incremental(content) => {
                let source = ChunkSource::new(content, threshold);
                self.put_chunked(key, source, &content_type).await
            }
        }
    }

    /// Upload under `prefix`, keyed by the payload's name
    pub async fn upload_to_prefix(
        &self,
        payload: Payload,
        prefix: &str,
    ) -> TransferResult<UploadReceipt> {
        let key = join_key(prefix, &payload.name);
        self.upload(payload, &key).await
    }

    /// Upload a local file. Files up to the stream-buffer threshold are read
    /// whole; larger ones are streamed part by part.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        key: &str,
    ) -> TransferResult<UploadReceipt> {
        let path = path.as_ref();
        let fs = self.ctx.fs();

        let stat = fs.stat(path).await.map_err(|e| unreadable(path, e))?;
        if stat.is_dir {
            return Err(TransferError::Preparation(format!(
                "{} is a directory",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.to_string());

        let payload = if stat.size <= self.ctx.config().stream_buffer_threshold_bytes {
            let data = fs.read(path).await.map_err(|e| unreadable(path, e))?;
            Payload::from_bytes(name, data)
        } else {
            let reader = fs.open_read(path).await.map_err(|e| unreadable(path, e))?;
            Payload {
                name,
                content: PayloadContent::Reader(reader),
                content_type: None,
                size_hint: Some(stat.size),
            }
        };

        self.upload(payload, key).await
    }

    /// Resident content passes through; incremental content of known size
    /// up to the stream-buffer threshold is read into memory first. A source
    /// that outgrows its size hint is never buffered past the threshold and
    /// goes up chunked instead.
    async fn prepare(
        &self,
        content: PayloadContent,
        size: Option<u64>,
    ) -> TransferResult<Prepared> {
        let limit = self.ctx.config().stream_buffer_threshold_bytes;
        match (content, size) {
            (PayloadContent::Bytes(bytes), _) => Ok(Prepared::Resident(bytes)),
            (content, Some(size)) if size <= limit => {
                match buffer_up_to(content, size as usize, limit).await? {
                    Buffered::Whole(bytes) => Ok(Prepared::Resident(bytes)),
                    Buffered::Spilled(content) => {
                        tracing::debug!(size_hint = size, limit, "payload larger than its size hint");
                        Ok(Prepared::Incremental(content))
                    }
                }
            }
            (content, _) => Ok(Prepared::Incremental(content)),
        }
    }

    async fn put_single(
        &self,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> TransferResult<UploadReceipt> {
        let bytes = body.len() as u64;
        let store = self.ctx.store();

        let receipt = self
            .ctx
            .upload_limiter()
            .schedule(self.retried_required("put_object", key, move |_| {
                store.put_object(key, body.clone(), Some(content_type))
            }))
            .await??;

        Ok(UploadReceipt {
            key: key.to_string(),
            bytes,
            strategy: TransferStrategy::Single,
            etag: receipt.etag,
        })
    }

    async fn put_chunked(
        &self,
        key: &str,
        mut source: ChunkSource,
        content_type: &str,
    ) -> TransferResult<UploadReceipt> {
        // an empty incremental source is still one (empty) object
        let Some(first) = source.next_chunk().await? else {
            return self.put_single(key, Bytes::new(), content_type).await;
        };

        let store = self.ctx.store();
        let session_id = self
            .retried_required("create_multipart", key, move |_| {
                store.create_multipart(key, Some(content_type))
            })
            .await?;
        tracing::debug!(key, session_id = %session_id, "multipart session opened");

        let finished = match self.upload_parts(key, &session_id, first, &mut source).await {
            Ok(parts) => self.complete(key, &session_id, parts).await,
            Err(e) => Err(e),
        };

        match finished {
            Ok((etag, parts)) => Ok(UploadReceipt {
                key: key.to_string(),
                bytes: source.bytes_produced(),
                strategy: TransferStrategy::Multipart { parts },
                etag,
            }),
            Err(err) => {
                self.abort_session(key, &session_id).await;
                Err(err)
            }
        }
    }

    /// Submit parts in source order, at most one limiter's worth in flight,
    /// and collect their tags as they finish. The next chunk is read while
    /// earlier parts are still uploading.
    async fn upload_parts(
        &self,
        key: &str,
        session_id: &str,
        first: Chunk,
        source: &mut ChunkSource,
    ) -> TransferResult<Vec<CompletedPart>> {
        let window = self.ctx.upload_limiter().max_concurrent();
        let rest = stream::try_unfold(source, |source| async move {
            let next = source.next_chunk().await?;
            Ok::<_, TransferError>(next.map(|chunk| (chunk, source)))
        });

        stream::once(future::ready(Ok(first)))
            .chain(rest)
            .map_ok(|chunk| self.upload_part(key, session_id, chunk))
            .try_buffer_unordered(window)
            .try_collect()
            .await
    }

    async fn upload_part(
        &self,
        key: &str,
        session_id: &str,
        chunk: Chunk,
    ) -> TransferResult<CompletedPart> {
        let Chunk {
            part_number, data, ..
        } = chunk;
        let store = self.ctx.store();

        let etag = self
            .ctx
            .upload_limiter()
            .schedule(self.retried_required("upload_part", key, move |_| {
                store.upload_part(key, session_id, part_number, data.clone())
            }))
            .await??;

        Ok(CompletedPart { part_number, etag })
    }

    async fn complete(
        &self,
        key: &str,
        session_id: &str,
        mut parts: Vec<CompletedPart>,
    ) -> TransferResult<(Option<String>, u32)> {
        parts.sort_by_key(|p| p.part_number);
        let count = parts.len() as u32;
        let store = self.ctx.store();
        let parts = parts.as_slice();

        let receipt = self
            .retried_required("complete_multipart", key, move |_| {
                store.complete_multipart(key, session_id, parts)
            })
            .await?;
        Ok((receipt.etag, count))
    }

    /// Best effort; a failure here is logged and never replaces the error
    /// that caused the abort
    async fn abort_session(&self, key: &str, session_id: &str) {
        let store = self.ctx.store();
        let aborted = self
            .retried("abort_multipart", key, move |_| {
                store.abort_multipart(key, session_id)
            })
            .await;

        match aborted {
            Ok(_) => self
                .ctx
                .logger()
                .info(&format!("aborted multipart session {} for {}", session_id, key)),
            Err(e) => {
                let err = TransferError::SessionAbort {
                    session_id: session_id.to_string(),
                    message: e.to_string(),
                };
                self.ctx.logger().error(&err.to_string());
            }
        }
    }
}

fn unreadable(path: &Path, err: io::Error) -> TransferError {
    TransferError::Preparation(format!("cannot read {}: {}", path.display(), err))
}
