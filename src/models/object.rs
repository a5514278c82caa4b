//! Index entry for a blob held by the content store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for one stored blob. The bytes themselves live on disk.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    pub id: Uuid,

    /// Parent bucket.
    pub bucket_id: Uuid,

    /// Object key within the bucket.
    pub key: String,

    /// MIME type supplied by the uploader.
    pub content_type: Option<String>,

    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: Option<String>,

    pub last_modified: DateTime<Utc>,
}
