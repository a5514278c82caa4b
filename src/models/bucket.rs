//! Represents a logical bucket, the top-level container for stored files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A content-store bucket. One bucket per deployment holds every uploaded
/// script and memorandum.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket.
    pub id: Uuid,

    /// Bucket name (DNS-style naming rules).
    pub name: String,

    /// Region label, kept for parity with S3-style stores.
    pub region: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
