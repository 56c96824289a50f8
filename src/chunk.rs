//! Chunk production for multipart uploads
//!
//! [`ChunkSource`] is a pull-based producer: each call to
//! [`next_chunk`](ChunkSource::next_chunk) yields the next bounded-size
//! [`Chunk`] or `None` once the payload is exhausted.
//!
//! # Invariants
//!
//! - Part numbers start at 1 and increase by one.
//! - Every chunk but the last is exactly `chunk_size` bytes; the last is
//!   non-empty and at most `chunk_size`.
//! - An empty payload produces no chunks.
//! - Incremental content is buffered in a single `BytesMut` that never holds
//!   much more than one chunk, whatever the payload size.

use crate::error::{TransferError, TransferResult};
use crate::payload::PayloadContent;
use bytes::{Bytes, BytesMut};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A contiguous byte range of a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 1-based part number
    pub part_number: u32,

    /// Offset of the first byte within the payload
    pub offset: u64,

    pub data: Bytes,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

enum Source {
    Resident(Bytes),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    Stream(BoxStream<'static, io::Result<Bytes>>),
    Exhausted,
}

/// Splits a payload into chunks, lazily for incremental content
pub struct ChunkSource {
    source: Source,
    buffer: BytesMut,
    chunk_size: usize,
    next_part: u32,
    offset: u64,
}

impl ChunkSource {
    /// Create a source over `content` producing `chunk_size`-byte chunks
    /// (minimum 1)
    pub fn new(content: PayloadContent, chunk_size: usize) -> Self {
        let source = match content {
            PayloadContent::Bytes(b) => Source::Resident(b),
            PayloadContent::Reader(r) => Source::Reader(r),
            PayloadContent::Stream(s) => Source::Stream(s),
        };
        Self {
            source,
            buffer: BytesMut::new(),
            chunk_size: chunk_size.max(1),
            next_part: 1,
            offset: 0,
        }
    }

    /// Number of chunks a resident payload of `len` bytes splits into
    pub fn chunk_count(len: u64, chunk_size: usize) -> u64 {
        len.div_ceil(chunk_size.max(1) as u64)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Bytes handed out so far
    pub fn bytes_produced(&self) -> u64 {
        self.offset
    }

    /// Produce the next chunk; `None` once the payload is exhausted (and on
    /// every call after that)
    pub async fn next_chunk(&mut self) -> TransferResult<Option<Chunk>> {
        let data = match &mut self.source {
            Source::Exhausted => None,
            Source::Resident(bytes) => {
                if bytes.is_empty() {
                    None
                } else {
                    let take = self.chunk_size.min(bytes.len());
                    Some(bytes.split_to(take))
                }
            }
            Source::Reader(reader) => {
                let done = fill_from_reader(reader, &mut self.buffer, self.chunk_size).await?;
                take_buffered(&mut self.buffer, self.chunk_size, done)
            }
            Source::Stream(stream) => {
                let mut done = false;
                while self.buffer.len() < self.chunk_size {
                    match stream.next().await {
                        Some(Ok(piece)) => self.buffer.extend_from_slice(&piece),
                        Some(Err(e)) => return Err(read_failure(e)),
                        None => {
                            done = true;
                            break;
                        }
                    }
                }
                take_buffered(&mut self.buffer, self.chunk_size, done)
            }
        };

        let Some(data) = data else {
            self.source = Source::Exhausted;
            return Ok(None);
        };

        let chunk = Chunk {
            part_number: self.next_part,
            offset: self.offset,
            data,
        };
        self.next_part += 1;
        self.offset += chunk.data.len() as u64;
        Ok(Some(chunk))
    }
}

/// Read until the buffer holds a full chunk or the reader is exhausted.
/// Returns `true` on exhaustion.
async fn fill_from_reader(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    buffer: &mut BytesMut,
    chunk_size: usize,
) -> TransferResult<bool> {
    while buffer.len() < chunk_size {
        buffer.reserve(chunk_size - buffer.len());
        let read = reader.read_buf(buffer).await.map_err(read_failure)?;
        if read == 0 {
            return Ok(true);
        }
    }
    Ok(false)
}

fn take_buffered(buffer: &mut BytesMut, chunk_size: usize, done: bool) -> Option<Bytes> {
    if buffer.len() >= chunk_size {
        Some(buffer.split_to(chunk_size).freeze())
    } else if done && !buffer.is_empty() {
        Some(buffer.split().freeze())
    } else {
        None
    }
}

fn read_failure(err: io::Error) -> TransferError {
    TransferError::Preparation(format!("failed to read payload source: {}", err))
}

/// Outcome of [`buffer_up_to`]
pub(crate) enum Buffered {
    /// All of the content, within the limit
    Whole(Bytes),

    /// The content ran past the limit; what was read is put back in front
    /// of the unread rest
    Spilled(PayloadContent),
}

/// Read incremental content into memory, stopping once more than `limit`
/// bytes have arrived
pub(crate) async fn buffer_up_to(
    content: PayloadContent,
    capacity_hint: usize,
    limit: u64,
) -> TransferResult<Buffered> {
    let capacity = capacity_hint.min(limit.saturating_add(1) as usize);
    match content {
        PayloadContent::Bytes(bytes) => Ok(Buffered::Whole(bytes)),
        PayloadContent::Reader(mut reader) => {
            let mut buf = Vec::with_capacity(capacity);
            (&mut reader)
                .take(limit.saturating_add(1))
                .read_to_end(&mut buf)
                .await
                .map_err(read_failure)?;
            if buf.len() as u64 <= limit {
                return Ok(Buffered::Whole(Bytes::from(buf)));
            }
            let rest = io::Cursor::new(buf).chain(reader);
            Ok(Buffered::Spilled(PayloadContent::Reader(Box::new(rest))))
        }
        PayloadContent::Stream(mut stream) => {
            let mut buf = BytesMut::with_capacity(capacity);
            while buf.len() as u64 <= limit {
                match stream.next().await {
                    Some(piece) => buf.extend_from_slice(&piece.map_err(read_failure)?),
                    None => return Ok(Buffered::Whole(buf.freeze())),
                }
            }
            let head = stream::once(future::ready(Ok::<_, io::Error>(buf.freeze())));
            Ok(Buffered::Spilled(PayloadContent::Stream(
                head.chain(stream).boxed(),
            )))
        }
    }
}
