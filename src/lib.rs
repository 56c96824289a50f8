/*!
 * Conveyor - client-side transfer orchestration for S3-compatible object storage
 *
 * - Single-request or chunked (multipart) uploads chosen by size
 * - Bounded concurrency for part uploads and downloads
 * - Retry with exponential backoff and jitter on transient failures
 * - Buffered or streamed downloads
 * - Multi-file operations that report per-item failures instead of aborting
 * - Token-paged listing with filtering and ordering
 *
 * The storage service, the local filesystem and observability are injected
 * capabilities; see [`store::ObjectStore`], [`fs::Filesystem`] and
 * [`observability`].
 */

pub mod batch;
pub mod chunk;
pub mod config;
pub mod context;
pub mod error;
pub mod fs;
pub mod listing;
pub mod logging;
pub mod observability;
pub mod orchestrator;
pub mod payload;
pub mod store;

// Re-export commonly used types
pub use batch::{BatchOutcome, BatchResult, FailedItem};
pub use config::{S3Config, TransferConfig};
pub use context::TransferContext;
pub use error::{TransferError, TransferResult};
pub use listing::{ListMode, ListQuery};
pub use orchestrator::{
    DeleteOutcome, DownloadReceipt, MoveOutcome, TransferOrchestrator, TransferStrategy,
    UploadReceipt,
};
pub use payload::Payload;
pub use store::{InMemoryStore, ObjectStore, PresignMethod, StoreError};

#[cfg(feature = "s3-native")]
pub use store::S3Store;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
