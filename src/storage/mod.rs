//! Object store collaborator interface and the S3 implementation.
//!
//! The pipeline needs exactly one thing from durable storage: an
//! overwrite-safe `put`. Retried attempts write the same key with the same
//! content, so a second put after a successful-store-but-failed-delete is
//! harmless.

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use thiserror::Error;
use tracing::{debug, Instrument};

/// Errors that can occur during object store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The put call failed.
    #[error("failed to put object {bucket}/{key}: {message}")]
    Put {
        bucket: String,
        key: String,
        message: String,
    },
}

/// Receipt for a durable put.
#[derive(Debug, Clone, PartialEq)]
pub struct PutReceipt {
    /// Content digest reported by the store, when it reports one.
    pub etag: Option<String>,
}

/// Durable blob storage as seen by the pipeline.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `body` at `bucket`/`key`, overwriting any existing object.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<PutReceipt, StorageError>;
}

/// S3-backed [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<PutReceipt, StorageError> {
        let span = tracing::info_span!(
            "store_object",
            bucket,
            key,
            size = body.len(),
            etag = tracing::field::Empty,
        );

        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body.to_vec()))
            .send()
            .instrument(span.clone())
            .await
            .map_err(|e| StorageError::Put {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let etag = output.e_tag;
        if let Some(tag) = &etag {
            span.record("etag", tag.as_str());
        }
        debug!(bucket, key, "stored object");

        Ok(PutReceipt { etag })
    }
}
