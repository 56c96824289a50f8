/*!
 * Configuration for transfers and the S3-backed store
 */

use crate::error::{TransferError, TransferResult};
use conveyor_core_resilience::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One mebibyte
pub const MIB: usize = 1024 * 1024;

/// Default size above which a payload is uploaded in parts
pub const DEFAULT_MULTIPART_THRESHOLD: usize = 10 * MIB;

/// Smallest accepted multipart threshold
pub const MIN_MULTIPART_THRESHOLD: usize = 5 * MIB;

/// Largest accepted multipart threshold
pub const MAX_MULTIPART_THRESHOLD: usize = 100 * MIB;

/// Default ceiling for buffering a whole download in memory
pub const DEFAULT_DOWNLOAD_BUFFER_CEILING: u64 = 200 * MIB as u64;

/// Default size up to which an incremental source is buffered before upload
pub const DEFAULT_STREAM_BUFFER_THRESHOLD: u64 = 200 * MIB as u64;

/// Transfer engine configuration
///
/// Constructed once and handed to [`TransferContext`](crate::context::TransferContext);
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Attempts per store operation, including the first
    pub max_attempts: u32,

    /// Multipart threshold and part size in bytes. Values outside
    /// 5 MiB..=100 MiB are ignored in favour of the 10 MiB default.
    pub multipart_threshold_bytes: usize,

    /// Concurrent part/file uploads
    pub max_concurrent_transfers: usize,

    /// Concurrent file downloads during a folder download
    pub max_concurrent_downloads: usize,

    /// Time allowed for the initial response of a get
    pub stream_timeout_ms: u64,

    /// Log retries and skipped batch items as warnings
    pub verbose_logging: bool,

    /// Objects up to this size are buffered on download; larger ones are streamed
    pub download_buffer_ceiling_bytes: u64,

    /// Incremental payloads of known size up to this are buffered before upload
    pub stream_buffer_threshold_bytes: u64,

    /// Backoff base delay
    pub retry_base_delay_ms: u64,

    /// Backoff cap
    pub retry_max_delay_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_attempts: conveyor_core_resilience::retry::DEFAULT_MAX_ATTEMPTS,
            multipart_threshold_bytes: DEFAULT_MULTIPART_THRESHOLD,
            max_concurrent_transfers: conveyor_core_resilience::DEFAULT_UPLOAD_CONCURRENCY,
            max_concurrent_downloads: conveyor_core_resilience::DEFAULT_DOWNLOAD_CONCURRENCY,
            stream_timeout_ms: 10_000,
            verbose_logging: false,
            download_buffer_ceiling_bytes: DEFAULT_DOWNLOAD_BUFFER_CEILING,
            stream_buffer_threshold_bytes: DEFAULT_STREAM_BUFFER_THRESHOLD,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 10_000,
        }
    }
}

impl TransferConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> TransferResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TransferError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> TransferResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> TransferResult<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Configuration for fast, reliable links: wider fan-out, larger parts
    pub fn fast() -> Self {
        Self {
            multipart_threshold_bytes: 16 * MIB,
            max_concurrent_transfers: 8,
            max_concurrent_downloads: 12,
            ..Default::default()
        }
    }

    /// Configuration for flaky or high-latency networks
    pub fn network() -> Self {
        Self {
            max_attempts: 5,
            stream_timeout_ms: 30_000,
            retry_max_delay_ms: 20_000,
            max_concurrent_transfers: 2,
            ..Default::default()
        }
    }

    /// Effective multipart threshold (also the part size)
    pub fn multipart_threshold(&self) -> usize {
        if (MIN_MULTIPART_THRESHOLD..=MAX_MULTIPART_THRESHOLD)
            .contains(&self.multipart_threshold_bytes)
        {
            self.multipart_threshold_bytes
        } else {
            DEFAULT_MULTIPART_THRESHOLD
        }
    }

    /// Retry policy derived from the attempt and delay settings
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts).with_delays(
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    /// Timeout for the initial response of a get
    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }
}

/// Connection settings for the S3-backed store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,

    /// AWS region (e.g., "us-east-1")
    pub region: Option<String>,

    /// Custom endpoint URL (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,

    /// AWS access key ID (optional - uses credential chain if not provided)
    pub access_key: Option<String>,

    /// AWS secret access key (optional - uses credential chain if not provided)
    pub secret_key: Option<String>,

    /// Session token (for temporary credentials)
    pub session_token: Option<String>,

    /// Path-style addressing (required for some S3-compatible services)
    pub force_path_style: bool,

    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            session_token: None,
            force_path_style: false,
            timeout_seconds: 300,
        }
    }
}

impl S3Config {
    /// Create a config for a bucket, everything else default
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Set the region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set a custom endpoint; S3-compatible services usually also need path-style
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set explicit credentials
    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    /// Force path-style addressing
    pub fn with_path_style(mut self, force: bool) -> Self {
        self.force_path_style = force;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> TransferResult<()> {
        if self.bucket.is_empty() {
            return Err(TransferError::Config(
                "Bucket name cannot be empty".to_string(),
            ));
        }

        if !is_valid_bucket_name(&self.bucket) {
            return Err(TransferError::Config(format!(
                "Invalid bucket name: {}. Bucket names must be 3-63 characters, \
                 lowercase letters, numbers, hyphens, and periods only",
                self.bucket
            )));
        }

        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(TransferError::Config(
                "Both access_key and secret_key must be provided together".to_string(),
            ));
        }

        if self.session_token.is_some() && self.access_key.is_none() {
            return Err(TransferError::Config(
                "session_token requires access_key and secret_key".to_string(),
            ));
        }

        if self.timeout_seconds == 0 {
            return Err(TransferError::Config(
                "Timeout must be at least 1 second".to_string(),
            ));
        }

        Ok(())
    }
}

/// Bucket naming rules: 3-63 chars of `[a-z0-9.-]`, alphanumeric at both
/// ends, no `..`, not shaped like an IPv4 address
fn is_valid_bucket_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if !(3..=63).contains(&bytes.len()) {
        return false;
    }

    let edge_ok = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !bytes.first().is_some_and(edge_ok) || !bytes.last().is_some_and(edge_ok) {
        return false;
    }

    if !bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-' || *b == b'.')
    {
        return false;
    }

    if name.contains("..") {
        return false;
    }

    name.parse::<std::net::Ipv4Addr>().is_err()
}
