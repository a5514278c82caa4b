//! Represents an exam memorandum (marking guide) file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Memorandum {
    pub id: Uuid,
    pub file_name: String,

    /// Key under which the bytes were written to the content store.
    pub object_key: String,
    pub file_url: Option<String>,

    /// Exam this memorandum belongs to.
    pub exam_id: Uuid,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewMemorandum {
    pub id: Uuid,
    pub file_name: String,
    pub object_key: String,
    pub file_url: Option<String>,
    pub exam_id: Uuid,
}
