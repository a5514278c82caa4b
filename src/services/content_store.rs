//! Content-store gateway contract.
//!
//! Put/get/delete of byte blobs keyed by name inside the deployment's bucket.
//! The gateway never retries; callers decide retry policy. Deleting an absent
//! key reports `ObjectNotFound` so callers can tell "already gone" from
//! "failed".

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("object `{key}` declared {declared} bytes but received {actual}")]
    SizeMismatch {
        key: String,
        declared: u64,
        actual: u64,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ObjectNotFound { .. } | StorageError::BucketNotFound(_)
        )
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Where a put landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
    /// Stable address recorded as the script's `file_url`.
    pub url: String,
}

/// A readable object plus the metadata needed to serve it.
pub struct ObjectStream {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub size: u64,
    pub content_type: Option<String>,
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream")
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Blob storage bound to a single bucket.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Create the bucket if it does not exist yet.
    async fn ensure_bucket(&self) -> StorageResult<()>;

    /// Write `bytes` under `key`, overwriting any existing object.
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        size: u64,
        content_type: Option<&str>,
    ) -> StorageResult<ObjectLocation>;

    async fn get(&self, key: &str) -> StorageResult<ObjectStream>;

    /// Remove `key`. Returns `ObjectNotFound` when nothing was stored there.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Keys currently stored, optionally restricted to a prefix, in key order.
    async fn list(&self, prefix: Option<&str>) -> StorageResult<Vec<String>>;
}
