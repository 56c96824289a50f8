//! Object store capability
//!
//! The transfer engine never builds wire requests itself. Everything it needs
//! from the storage service goes through the [`ObjectStore`] trait: single and
//! multipart puts, whole/ranged/streamed gets, head, delete (single and
//! batch), copy, token-paged listing and pre-signed URLs.
//!
//! Two implementations ship with the crate:
//!
//! - [`InMemoryStore`]: a complete in-memory store with call recording and
//!   fault injection, used by the test suites.
//! - `S3Store` (feature `s3-native`): AWS S3 and S3-compatible services via
//!   `aws-sdk-s3`.

pub mod error;
pub mod memory;

#[cfg(feature = "s3-native")]
pub mod s3;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryStore, StoreCall, StoreOp};

#[cfg(feature = "s3-native")]
pub use s3::S3Store;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::time::{Duration, SystemTime};

/// Incremental body of a streamed get
pub type ByteStream = BoxStream<'static, StoreResult<Bytes>>;

/// Object metadata as returned by a head call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Object key
    pub key: String,

    /// Object size in bytes
    pub size: u64,

    /// Content type
    pub content_type: Option<String>,

    /// ETag
    pub etag: Option<String>,

    /// Last modified timestamp
    pub last_modified: Option<SystemTime>,
}

/// Acknowledgement of a completed put (single or multipart)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutReceipt {
    /// ETag of the stored object, if the service returned one
    pub etag: Option<String>,
}

/// A `(partNumber, integrityTag)` pair passed to multipart completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: u32,

    /// Tag returned by the store for this part
    pub etag: String,
}

/// Parameters of one paged list call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    /// Key prefix
    pub prefix: String,

    /// Grouping delimiter (usually `/`); `None` lists flat keys
    pub delimiter: Option<String>,

    /// Token returned by the previous page
    pub continuation_token: Option<String>,

    /// Page size hint
    pub max_keys: Option<u32>,
}

/// An entry in a listed page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    /// Object key
    pub key: String,

    /// Object size in bytes
    pub size: u64,
}

/// One page of a list call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Objects on this page
    pub objects: Vec<ObjectSummary>,

    /// Grouped prefixes (only when a delimiter was given)
    pub common_prefixes: Vec<String>,

    /// Token for the next page; `None` on the last page
    pub next_token: Option<String>,
}

/// A key the store refused to delete in a batch delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    /// Object key
    pub key: String,

    /// Reason reported by the store
    pub message: String,
}

/// HTTP method a pre-signed URL is valid for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresignMethod {
    Get,
    Put,
}

/// Storage operations consumed by the transfer engine
///
/// Implementors must be `Send + Sync`; one store is shared by every
/// concurrent transfer.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key` in a single request
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StoreResult<PutReceipt>;

    /// Fetch an object, optionally a byte range of it (`start..end`, end exclusive)
    async fn get_object(&self, key: &str, range: Option<Range<u64>>) -> StoreResult<Bytes>;

    /// Fetch an object as an incremental stream
    async fn get_stream(&self, key: &str) -> StoreResult<ByteStream>;

    /// Fetch metadata only
    async fn head_object(&self, key: &str) -> StoreResult<ObjectMetadata>;

    /// Delete one object. Deleting a missing key reports `NotFound`.
    async fn delete_object(&self, key: &str) -> StoreResult<()>;

    /// Delete up to 1000 objects; returns the keys the store refused
    async fn delete_objects(&self, keys: &[String]) -> StoreResult<Vec<DeleteFailure>>;

    /// Server-side copy
    async fn copy_object(&self, source_key: &str, dest_key: &str) -> StoreResult<()>;

    /// Fetch one page of a listing
    async fn list_page(&self, request: &ListRequest) -> StoreResult<ListPage>;

    /// Open a multipart session, returning its id
    async fn create_multipart(&self, key: &str, content_type: Option<&str>)
        -> StoreResult<String>;

    /// Upload one part of a multipart session, returning its tag
    async fn upload_part(
        &self,
        key: &str,
        session_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StoreResult<String>;

    /// Finalize a multipart session; `parts` are sorted by part number
    async fn complete_multipart(
        &self,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<PutReceipt>;

    /// Discard a multipart session and its uploaded parts
    async fn abort_multipart(&self, key: &str, session_id: &str) -> StoreResult<()>;

    /// Issue a pre-signed URL
    async fn presign(
        &self,
        key: &str,
        method: PresignMethod,
        expires_in: Duration,
    ) -> StoreResult<String>;
}
