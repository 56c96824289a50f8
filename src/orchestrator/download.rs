//! Buffered and streamed downloads
//!
//! Every download starts with a head call. Objects up to the buffer ceiling
//! are fetched whole; larger ones are piped from the store's stream into the
//! sink piece by piece, so peak memory stays bounded. The initial response of
//! each get is subject to the stream timeout; a timed-out attempt is dropped
//! (closing the connection) and retried like any transient failure.

use super::TransferOrchestrator;
use crate::error::{TransferError, TransferResult};
use crate::store::{ByteStream, ObjectMetadata, StoreError, StoreResult};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Result of a successful download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadReceipt {
    pub key: String,

    /// Bytes written to the sink
    pub bytes: u64,

    /// Whether the object was buffered whole rather than streamed
    pub buffered: bool,
}

impl TransferOrchestrator {
    /// Fetch an object into memory
    ///
    /// Fails with [`TransferError::TooLarge`] when the object exceeds the
    /// download buffer ceiling; use [`download_to_writer`](Self::download_to_writer)
    /// for those.
    pub async fn download_bytes(&self, key: &str) -> TransferResult<Bytes> {
        let meta = self.head_required(key).await?;
        let ceiling = self.ctx.config().download_buffer_ceiling_bytes;
        if meta.size > ceiling {
            return Err(TransferError::TooLarge {
                key: key.to_string(),
                size: meta.size,
                limit: ceiling,
            });
        }
        self.fetch_whole(key).await
    }

    /// Write an object into `writer`, buffering or streaming by size
    pub async fn download_to_writer<W>(
        &self,
        key: &str,
        writer: &mut W,
    ) -> TransferResult<DownloadReceipt>
    where
        W: AsyncWrite + Send + Unpin + ?Sized,
    {
        let meta = self.head_required(key).await?;

        let receipt = if self.should_buffer(&meta) {
            let data = self.fetch_whole(key).await?;
            writer.write_all(&data).await?;
            DownloadReceipt {
                key: key.to_string(),
                bytes: data.len() as u64,
                buffered: true,
            }
        } else {
            let bytes = self.pipe_stream(key, writer).await?;
            DownloadReceipt {
                key: key.to_string(),
                bytes,
                buffered: false,
            }
        };

        writer.flush().await?;
        Ok(receipt)
    }

    /// Download an object to a local file, creating parent directories
    pub async fn download_file(
        &self,
        key: &str,
        path: impl AsRef<Path>,
    ) -> TransferResult<DownloadReceipt> {
        let path = path.as_ref();
        let fs = self.ctx.fs();

        // head before touching the disk so a missing key leaves no empty file
        let meta = self.head_required(key).await?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs.create_dir_all(parent).await?;
        }

        if self.should_buffer(&meta) {
            let data = self.fetch_whole(key).await?;
            let bytes = data.len() as u64;
            fs.write(path, data).await?;
            return Ok(DownloadReceipt {
                key: key.to_string(),
                bytes,
                buffered: true,
            });
        }

        let mut writer = fs.open_write(path).await?;
        let bytes = self.pipe_stream(key, &mut writer).await?;
        writer.shutdown().await?;
        Ok(DownloadReceipt {
            key: key.to_string(),
            bytes,
            buffered: false,
        })
    }

    fn should_buffer(&self, meta: &ObjectMetadata) -> bool {
        meta.size <= self.ctx.config().download_buffer_ceiling_bytes
    }

    pub(crate) async fn head_required(&self, key: &str) -> TransferResult<ObjectMetadata> {
        let store = self.ctx.store();
        self.retried_required("head_object", key, move |_| store.head_object(key))
            .await
    }

    /// Collect a whole object. Only the opening of the stream is bounded by
    /// the stream timeout; nothing has reached the sink yet, so a body that
    /// fails part way is fetched again from the start.
    async fn fetch_whole(&self, key: &str) -> TransferResult<Bytes> {
        let store = self.ctx.store();
        let limit = self.ctx.config().stream_timeout();
        self.retried_required("get_object", key, move |_| async move {
            let stream = within(limit, key, store.get_stream(key)).await?;
            collect_body(stream).await
        })
        .await
    }

    async fn pipe_stream<W>(&self, key: &str, writer: &mut W) -> TransferResult<u64>
    where
        W: AsyncWrite + Send + Unpin + ?Sized,
    {
        let store = self.ctx.store();
        let limit = self.ctx.config().stream_timeout();
        let mut stream: ByteStream = self
            .retried_required("get_stream", key, move |_| {
                within(limit, key, store.get_stream(key))
            })
            .await?;

        let mut written = 0u64;
        while let Some(piece) = stream.next().await {
            // a stream cannot be resumed mid-body, so this is not retried
            let piece = piece.map_err(|source| TransferError::Rejected {
                operation: "read_stream".to_string(),
                source,
            })?;
            writer.write_all(&piece).await?;
            written += piece.len() as u64;
        }
        tracing::debug!(key, bytes = written, "stream drained");
        Ok(written)
    }
}

async fn collect_body(stream: ByteStream) -> StoreResult<Bytes> {
    let body = stream
        .try_fold(BytesMut::new(), |mut body, piece| async move {
            body.extend_from_slice(&piece);
            Ok(body)
        })
        .await?;
    Ok(body.freeze())
}

/// Bound the initial response of a store call; on expiry the call is
/// dropped and reported as a transient timeout
async fn within<T>(
    limit: Duration,
    key: &str,
    call: impl Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(format!(
            "no response for {} within {:?}",
            key, limit
        ))),
    }
}
