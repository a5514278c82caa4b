//! Metadata repository for answer scripts.
//!
//! The repository is the system of record for processing status. Updates are
//! partial merges: only fields present in the update are written, and
//! `matched_at` is stamped at most once, when a student is first attached.

use crate::models::{AnswerScript, AnswerScriptUpdate, NewAnswerScript, ProcessingStatus};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("record `{0}` not found")]
    NotFound(Uuid),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait AnswerScriptRepository: Send + Sync {
    async fn create(&self, record: NewAnswerScript) -> RepositoryResult<AnswerScript>;
    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<AnswerScript>;
    /// Most recently created first.
    async fn get_all(&self) -> RepositoryResult<Vec<AnswerScript>>;
    /// Latest record carrying `file_name`, if any.
    async fn find_by_file_name(&self, file_name: &str) -> RepositoryResult<Option<AnswerScript>>;
    async fn update(&self, id: Uuid, update: AnswerScriptUpdate) -> RepositoryResult<AnswerScript>;
    async fn delete(&self, id: Uuid) -> RepositoryResult<()>;
}

const SELECT_COLUMNS: &str = "id, file_name, object_key, file_url, status, student_id, \
     subject_id, exam_id, scanned_exam_number, matching_confidence, matched_at, \
     total_marks, max_marks, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteAnswerScriptRepository {
    db: Arc<SqlitePool>,
}

impl SqliteAnswerScriptRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AnswerScriptRepository for SqliteAnswerScriptRepository {
    async fn create(&self, record: NewAnswerScript) -> RepositoryResult<AnswerScript> {
        record.validate().map_err(RepositoryError::Validation)?;
        let now = Utc::now();

        let created = sqlx::query_as::<_, AnswerScript>(&format!(
            "INSERT INTO answer_scripts (
                id, file_name, object_key, file_url, status, subject_id, exam_id,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(record.id)
        .bind(&record.file_name)
        .bind(&record.object_key)
        .bind(&record.file_url)
        .bind(ProcessingStatus::Processing)
        .bind(record.subject_id)
        .bind(record.exam_id)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await?;

        Ok(created)
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<AnswerScript> {
        sqlx::query_as::<_, AnswerScript>(&format!(
            "SELECT {SELECT_COLUMNS} FROM answer_scripts WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(RepositoryError::NotFound(id))
    }

    async fn get_all(&self) -> RepositoryResult<Vec<AnswerScript>> {
        let rows = sqlx::query_as::<_, AnswerScript>(&format!(
            "SELECT {SELECT_COLUMNS} FROM answer_scripts ORDER BY created_at DESC, id"
        ))
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    async fn find_by_file_name(&self, file_name: &str) -> RepositoryResult<Option<AnswerScript>> {
        let row = sqlx::query_as::<_, AnswerScript>(&format!(
            "SELECT {SELECT_COLUMNS} FROM answer_scripts
             WHERE file_name = ?
             ORDER BY created_at DESC
             LIMIT 1"
        ))
        .bind(file_name)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    async fn update(&self, id: Uuid, update: AnswerScriptUpdate) -> RepositoryResult<AnswerScript> {
        update.validate().map_err(RepositoryError::Validation)?;

        if update.matching_confidence.is_some() && update.scanned_exam_number.is_none() {
            let existing = self.get_by_id(id).await?;
            if existing.scanned_exam_number.is_none() {
                return Err(RepositoryError::Validation(
                    "matching confidence requires a scanned exam number".into(),
                ));
            }
        }

        let now = Utc::now();
        // matched_at only ever accompanies a student and is never overwritten.
        let matched_stamp = update
            .student_id
            .map(|_| update.matched_at.unwrap_or(now));

        let updated = sqlx::query_as::<_, AnswerScript>(&format!(
            "UPDATE answer_scripts SET
                file_name = COALESCE(?, file_name),
                file_url = COALESCE(?, file_url),
                status = COALESCE(?, status),
                student_id = COALESCE(?, student_id),
                subject_id = COALESCE(?, subject_id),
                exam_id = COALESCE(?, exam_id),
                scanned_exam_number = COALESCE(?, scanned_exam_number),
                matching_confidence = COALESCE(?, matching_confidence),
                matched_at = COALESCE(matched_at, ?),
                total_marks = COALESCE(?, total_marks),
                max_marks = COALESCE(?, max_marks),
                updated_at = ?
             WHERE id = ?
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(&update.file_name)
        .bind(&update.file_url)
        .bind(update.status)
        .bind(update.student_id)
        .bind(update.subject_id)
        .bind(update.exam_id)
        .bind(&update.scanned_exam_number)
        .bind(update.matching_confidence)
        .bind(matched_stamp)
        .bind(update.total_marks)
        .bind(update.max_marks)
        .bind(now)
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        updated.ok_or(RepositoryError::NotFound(id))
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<()> {
        let result = sqlx::query("DELETE FROM answer_scripts WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }
}
