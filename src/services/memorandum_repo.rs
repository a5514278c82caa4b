use crate::{
    models::{Memorandum, NewMemorandum},
    services::answer_script_repo::{RepositoryError, RepositoryResult},
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait MemorandumRepository: Send + Sync {
    async fn create(&self, record: NewMemorandum) -> RepositoryResult<Memorandum>;
    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Memorandum>;
    async fn get_all(&self) -> RepositoryResult<Vec<Memorandum>>;
    async fn delete(&self, id: Uuid) -> RepositoryResult<()>;
}

const SELECT_COLUMNS: &str =
    "id, file_name, object_key, file_url, exam_id, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteMemorandumRepository {
    db: Arc<SqlitePool>,
}

impl SqliteMemorandumRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MemorandumRepository for SqliteMemorandumRepository {
    async fn create(&self, record: NewMemorandum) -> RepositoryResult<Memorandum> {
        if record.file_name.trim().is_empty() {
            return Err(RepositoryError::Validation(
                "file name must not be empty".into(),
            ));
        }
        let now = Utc::now();
        let created = sqlx::query_as::<_, Memorandum>(&format!(
            "INSERT INTO memorandums (
                id, file_name, object_key, file_url, exam_id, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(record.id)
        .bind(&record.file_name)
        .bind(&record.object_key)
        .bind(&record.file_url)
        .bind(record.exam_id)
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await?;
        Ok(created)
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Memorandum> {
        sqlx::query_as::<_, Memorandum>(&format!(
            "SELECT {SELECT_COLUMNS} FROM memorandums WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(RepositoryError::NotFound(id))
    }

    async fn get_all(&self) -> RepositoryResult<Vec<Memorandum>> {
        let rows = sqlx::query_as::<_, Memorandum>(&format!(
            "SELECT {SELECT_COLUMNS} FROM memorandums ORDER BY created_at DESC, id"
        ))
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<()> {
        let result = sqlx::query("DELETE FROM memorandums WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }
}
