//! SQLite bootstrap: connect, apply the embedded schema, seed a demo roster.

use crate::services::roster::SqliteRoster;
use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr, sync::Arc};
use tracing::{debug, info};

const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

/// Students inserted by `--seed`.
pub const DEMO_ROSTER: [(&str, &str, &str); 3] = [
    ("John", "Doe", "JOH5196"),
    ("Jane", "Dwayne", "JAN5196"),
    ("Alice", "Smith", "ALI5196"),
];

/// Open a pool for `database_url`, creating the database file and its parent
/// directory when missing.
pub async fn connect(database_url: &str) -> Result<Arc<SqlitePool>> {
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
            info!(dir = %parent.display(), "created database directory");
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database url `{database_url}`"))?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {database_url}"))?;
    debug!(database_url, "database connected");
    Ok(Arc::new(pool))
}

/// Apply the embedded schema one statement at a time. Every statement is
/// `IF NOT EXISTS`, so this is safe to run on every start.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements: Vec<&str> = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    info!(count = statements.len(), "running migration statements");
    for stmt in statements {
        debug!(stmt, "executing migration SQL");
        sqlx::query(stmt)
            .execute(db)
            .await
            .with_context(|| format!("migration statement failed: {stmt}"))?;
    }
    Ok(())
}

/// Insert the demo roster. Existing exam numbers are left alone.
pub async fn seed_roster(db: Arc<SqlitePool>) -> Result<usize> {
    let roster = SqliteRoster::new(db);
    for (first, last, exam_number) in DEMO_ROSTER {
        let student = roster.add_student(first, last, exam_number).await?;
        debug!(student_id = %student.id, exam_number, "seeded student");
    }
    Ok(DEMO_ROSTER.len())
}
