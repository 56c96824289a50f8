//! [`ObjectStore`] over AWS S3 and S3-compatible services

use super::{
    ByteStream, CompletedPart, DeleteFailure, ListPage, ListRequest, ObjectMetadata,
    ObjectStore, ObjectSummary, PresignMethod, PutReceipt, StoreError, StoreResult,
};
use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as SdkByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart as SdkCompletedPart, Delete, ObjectIdentifier,
};
use aws_sdk_s3::Client as AwsS3Client;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::ops::Range;
use std::time::{Duration, SystemTime};

const CREDENTIALS_PROVIDER: &str = "conveyor-explicit";

/// S3-backed object store
#[derive(Clone)]
pub struct S3Store {
    client: AwsS3Client,
    bucket: String,
}

impl S3Store {
    /// Validate `config` and build an SDK client from it
    ///
    /// # Example
    ///
    /// ```no_run
    /// use conveyor::config::S3Config;
    /// use conveyor::store::S3Store;
    ///
    /// # async fn demo() -> conveyor::store::StoreResult<()> {
    /// let config = S3Config::new("my-bucket").with_region("eu-west-1");
    /// let store = S3Store::new(&config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(config: &S3Config) -> StoreResult<Self> {
        config
            .validate()
            .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        let region = match &config.region {
            Some(region) => RegionProviderChain::first_try(Region::new(region.clone())),
            None => RegionProviderChain::default_provider(),
        };
        loader = loader.region(region);

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            let credentials = Credentials::new(
                access_key,
                secret_key,
                config.session_token.clone(),
                None,
                CREDENTIALS_PROVIDER,
            );
            loader = loader.credentials_provider(credentials);
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        // MinIO and LocalStack need path-style addressing
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let timeouts = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(config.timeout_seconds))
            .build();
        builder = builder.timeout_config(timeouts);

        tracing::debug!(
            bucket = %config.bucket,
            endpoint = ?config.endpoint,
            "S3 client configured"
        );

        Ok(Self {
            client: AwsS3Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

impl fmt::Debug for S3Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Store")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StoreResult<PutReceipt> {
        let response = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(SdkByteStream::from(body))
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| sdk_error(key, e))?;

        Ok(PutReceipt {
            etag: response.e_tag().map(str::to_string),
        })
    }

    async fn get_object(&self, key: &str, range: Option<Range<u64>>) -> StoreResult<Bytes> {
        if let Some(range) = &range {
            if range.start >= range.end {
                return Ok(Bytes::new());
            }
        }

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_range(range.map(|r| format!("bytes={}-{}", r.start, r.end - 1)))
            .send()
            .await
            .map_err(|e| sdk_error(key, e))?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Network(format!("Failed to collect response body: {}", e)))?;

        Ok(body.into_bytes())
    }

    async fn get_stream(&self, key: &str) -> StoreResult<ByteStream> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error(key, e))?;

        let pieces = stream::try_unfold(response.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(piece)) => Ok(Some((piece, body))),
                Ok(None) => Ok(None),
                Err(e) => Err(StoreError::Network(e.to_string())),
            }
        });

        Ok(pieces.boxed())
    }

    async fn head_object(&self, key: &str) -> StoreResult<ObjectMetadata> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error(key, e))?;

        Ok(ObjectMetadata {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0).max(0) as u64,
            content_type: response.content_type().map(str::to_string),
            etag: response.e_tag().map(str::to_string),
            last_modified: response
                .last_modified()
                .and_then(|dt| SystemTime::try_from(*dt).ok()),
        })
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        // S3 answers 204 for missing keys; head first so absence is reported
        self.head_object(key).await?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error(key, e))?;
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> StoreResult<Vec<DeleteFailure>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let identifiers = keys
            .iter()
            .map(|key| {
                ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .map_err(|e| StoreError::Sdk(e.to_string()))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|e| StoreError::Sdk(e.to_string()))?;

        let label = keys.first().map(String::as_str).unwrap_or_default();
        let response = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| sdk_error(label, e))?;

        Ok(response
            .errors()
            .iter()
            .filter_map(|err| {
                err.key().map(|key| DeleteFailure {
                    key: key.to_string(),
                    message: err
                        .message()
                        .or_else(|| err.code())
                        .unwrap_or("delete refused")
                        .to_string(),
                })
            })
            .collect())
    }

    async fn copy_object(&self, source_key: &str, dest_key: &str) -> StoreResult<()> {
        let copy_source = format!("{}/{}", self.bucket, source_key);

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(copy_source)
            .key(dest_key)
            .send()
            .await
            .map_err(|e| sdk_error(source_key, e))?;
        Ok(())
    }

    async fn list_page(&self, request: &ListRequest) -> StoreResult<ListPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&request.prefix)
            .set_delimiter(request.delimiter.clone())
            .set_continuation_token(request.continuation_token.clone())
            .set_max_keys(request.max_keys.map(|n| n.min(i32::MAX as u32) as i32))
            .send()
            .await
            .map_err(|e| sdk_error(&request.prefix, e))?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|object| {
                object.key().map(|key| ObjectSummary {
                    key: key.to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                })
            })
            .collect();

        let common_prefixes = response
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(str::to_string))
            .collect();

        let next_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            common_prefixes,
            next_token,
        })
    }

    async fn create_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> StoreResult<String> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| sdk_error(key, e))?;

        response.upload_id().map(str::to_string).ok_or_else(|| {
            StoreError::Sdk(format!("No upload id returned for {}", key))
        })
    }

    async fn upload_part(
        &self,
        key: &str,
        session_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StoreResult<String> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(session_id)
            .part_number(part_number as i32)
            .body(SdkByteStream::from(body))
            .send()
            .await
            .map_err(|e| sdk_error(key, e))?;

        response.e_tag().map(str::to_string).ok_or_else(|| {
            StoreError::Sdk(format!("No ETag returned for part {} of {}", part_number, key))
        })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> StoreResult<PutReceipt> {
        let parts = parts
            .iter()
            .map(|part| {
                SdkCompletedPart::builder()
                    .part_number(part.part_number as i32)
                    .e_tag(&part.etag)
                    .build()
            })
            .collect();

        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        let response = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(session_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(|e| sdk_error(key, e))?;

        Ok(PutReceipt {
            etag: response.e_tag().map(str::to_string),
        })
    }

    async fn abort_multipart(&self, key: &str, session_id: &str) -> StoreResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(session_id)
            .send()
            .await
            .map_err(|e| sdk_error(key, e))?;
        Ok(())
    }

    async fn presign(
        &self,
        key: &str,
        method: PresignMethod,
        expires_in: Duration,
    ) -> StoreResult<String> {
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;

        let request = match method {
            PresignMethod::Get => self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .presigned(presigning)
                .await
                .map_err(|e| sdk_error(key, e))?,
            PresignMethod::Put => self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .presigned(presigning)
                .await
                .map_err(|e| sdk_error(key, e))?,
        };

        Ok(request.uri().to_string())
    }
}

/// Map an SDK failure for `key` onto [`StoreError`]
fn sdk_error<E>(key: &str, error: SdkError<E, HttpResponse>) -> StoreError
where
    E: ProvideErrorMetadata + fmt::Debug,
{
    match &error {
        SdkError::DispatchFailure(failure) if failure.is_timeout() => {
            StoreError::Timeout(format!("{}: {:?}", key, failure))
        }
        SdkError::DispatchFailure(failure) => {
            StoreError::Network(format!("Network dispatch failure: {:?}", failure))
        }
        SdkError::TimeoutError(_) => StoreError::Timeout(key.to_string()),
        SdkError::ResponseError(e) => StoreError::Network(format!("Response error: {:?}", e)),
        SdkError::ServiceError(_) => {
            let status = error.raw_response().map(|r| r.status().as_u16());
            service_error(key, status, error.code(), error.message())
        }
        _ => StoreError::Sdk(format!("{:?}", error)),
    }
}

/// Classify a service response by code, falling back to the HTTP status
fn service_error(
    key: &str,
    status: Option<u16>,
    code: Option<&str>,
    message: Option<&str>,
) -> StoreError {
    let message = message.unwrap_or_default().to_string();

    match (code, status) {
        (Some("NoSuchKey" | "NotFound" | "NoSuchUpload"), _) | (None, Some(404)) => {
            StoreError::not_found(key)
        }
        (Some("AccessDenied" | "Forbidden"), _) | (None, Some(403)) => {
            StoreError::AccessDenied(format!("{}: {}", key, message))
        }
        (Some("SlowDown" | "Throttling" | "TooManyRequests"), _) | (None, Some(429)) => {
            StoreError::RateLimited(message)
        }
        (Some(code), _) => StoreError::Service {
            code: code.to_string(),
            message,
        },
        (None, Some(status)) if status >= 500 => StoreError::Service {
            code: "ServiceUnavailable".to_string(),
            message: format!("HTTP {}", status),
        },
        (None, status) => StoreError::Sdk(format!(
            "Unclassified response for {} (status {:?}): {}",
            key, status, message
        )),
    }
}
