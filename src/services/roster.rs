//! Read access to the student roster for identity matching.

use crate::models::{RosterEntry, Student};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Supplies the current student list. Called once per matching run; no
/// caching is implied.
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn list_students(&self) -> Result<Vec<RosterEntry>, sqlx::Error>;
}

#[derive(Clone)]
pub struct SqliteRoster {
    db: Arc<SqlitePool>,
}

impl SqliteRoster {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a student, keyed by exam number. Re-inserting an existing exam
    /// number is a no-op and returns the stored student.
    pub async fn add_student(
        &self,
        first_name: &str,
        last_name: &str,
        exam_number: &str,
    ) -> Result<Student, sqlx::Error> {
        sqlx::query(
            "INSERT INTO students (id, first_name, last_name, exam_number)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(exam_number) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(first_name)
        .bind(last_name)
        .bind(exam_number)
        .execute(&*self.db)
        .await?;

        sqlx::query_as::<_, Student>(
            "SELECT id, first_name, last_name, exam_number FROM students WHERE exam_number = ?",
        )
        .bind(exam_number)
        .fetch_one(&*self.db)
        .await
    }
}

#[async_trait]
impl RosterSource for SqliteRoster {
    async fn list_students(&self) -> Result<Vec<RosterEntry>, sqlx::Error> {
        sqlx::query_as::<_, RosterEntry>(
            "SELECT id, exam_number FROM students ORDER BY exam_number ASC, id ASC",
        )
        .fetch_all(&*self.db)
        .await
    }
}
