//! StorageService: the on-disk content store. Object payloads live beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`; a SQLite index (`buckets`,
//! `objects`) records content type, size and etag so reads can be served
//! without touching the payload.

use crate::{
    models::{StoredObject, bucket::Bucket},
    services::content_store::{
        ContentStore, ObjectLocation, ObjectStream, StorageError, StorageResult,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

/// Disk + SQLite implementation of [`ContentStore`], bound to one bucket.
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for the object index.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    bucket: String,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const DEFAULT_REGION: &str = "local";

impl StorageService {
    /// Content store for `bucket`, indexing into `db` and writing payloads
    /// under `base_path`. Call [`ContentStore::ensure_bucket`] before use.
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            bucket: bucket.into(),
        }
    }

    /// Keys become relative paths under the shard directories; reject
    /// anything that could escape them.
    ///
    /// Rejects keys that begin with `/` or contain `..`. Keys may contain
    /// `/` separators (record-id keys do).
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.ends_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Bucket names double as directory names, so they follow DNS label
    /// rules: 3 to 63 lowercase letters, digits, dots or hyphens, starting
    /// and ending alphanumeric, with no `..`, `.-` or `-.` runs.
    fn ensure_bucket_name_safe(name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }
        Ok(())
    }

    fn bucket_root(&self) -> PathBuf {
        self.base_path.join(&self.bucket)
    }

    /// Two-level shard directories from MD5(bucket/key), 00–ff each.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// base_path/bucket/{shard}/{shard}/{key}. Parent directories may not exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(&self.bucket, key);
        let mut path = self.bucket_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    fn not_found(&self, key: &str) -> StorageError {
        StorageError::ObjectNotFound {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        }
    }

    async fn fetch_bucket(&self) -> StorageResult<Bucket> {
        sqlx::query_as::<_, Bucket>(
            "SELECT id, name, region, created_at FROM buckets WHERE name = ?",
        )
        .bind(&self.bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::BucketNotFound(self.bucket.clone()),
            other => StorageError::Sqlx(other),
        })
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StorageResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT id, bucket_id, key, content_type, size_bytes, etag, last_modified
             FROM objects
             WHERE key = ? AND bucket_id = ?",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => self.not_found(key),
            other => StorageError::Sqlx(other),
        })
    }

    /// Write the payload to a temp file, fsync, then rename into place.
    /// The temp file is removed on every failure path.
    async fn write_payload(&self, file_path: &Path, bytes: &[u8]) -> StorageResult<()> {
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StorageError::Io(io::Error::other("object path has no parent")))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(&tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        Ok(())
    }

    /// Recursively remove empty directories up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ContentStore for StorageService {
    /// Validates the name, creates the bucket directory and inserts the
    /// bucket row unless it already exists.
    async fn ensure_bucket(&self) -> StorageResult<()> {
        Self::ensure_bucket_name_safe(&self.bucket)?;
        fs::create_dir_all(self.bucket_root()).await?;

        sqlx::query(
            "INSERT INTO buckets (id, name, region, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(&self.bucket)
        .bind(DEFAULT_REGION)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        debug!(bucket = %self.bucket, "bucket ready");
        Ok(())
    }

    /// Upload an object to disk and upsert its index row (overwrite
    /// semantics). If the index write fails the payload is removed again.
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        size: u64,
        content_type: Option<&str>,
    ) -> StorageResult<ObjectLocation> {
        self.ensure_key_safe(key)?;
        let actual = bytes.len() as u64;
        if actual != size {
            return Err(StorageError::SizeMismatch {
                key: key.to_string(),
                declared: size,
                actual,
            });
        }
        let bucket_rec = self.fetch_bucket().await?;

        let file_path = self.object_path(key);
        self.write_payload(&file_path, &bytes).await?;

        let etag = format!("{:x}", md5::compute(&bytes));
        let insert_result = sqlx::query(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket_rec.id)
        .bind(key)
        .bind(content_type)
        .bind(actual as i64)
        .bind(&etag)
        .bind(Utc::now())
        .execute(&*self.db)
        .await;

        if let Err(err) = insert_result {
            let _ = fs::remove_file(&file_path).await;
            return Err(StorageError::Sqlx(err));
        }

        debug!(bucket = %self.bucket, key, size = actual, "stored object");
        Ok(ObjectLocation {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            url: format!("/{}/{}", self.bucket, key),
        })
    }

    /// Returns ObjectNotFound if the index row or the payload is missing.
    async fn get(&self, key: &str) -> StorageResult<ObjectStream> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket().await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                self.not_found(key)
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok(ObjectStream {
            reader: Box::new(file),
            size: object.size_bytes.max(0) as u64,
            content_type: object.content_type,
        })
    }

    /// Hard-delete the index row, then the payload, then prune empty shard
    /// directories.
    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket().await?;

        let result = sqlx::query("DELETE FROM objects WHERE key = ? AND bucket_id = ?")
            .bind(key)
            .bind(bucket_rec.id)
            .execute(&*self.db)
            .await?;

        let file_path = self.object_path(key);
        let file_removed = match fs::remove_file(&file_path).await {
            Ok(_) => {
                debug!("removed physical file {}", file_path.display());
                true
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
                false
            }
            Err(err) => return Err(StorageError::Io(err)),
        };

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root()).await;
        }

        if result.rows_affected() == 0 && !file_removed {
            return Err(self.not_found(key));
        }
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> StorageResult<Vec<String>> {
        let bucket_rec = self.fetch_bucket().await?;
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM objects
             WHERE bucket_id = ? AND substr(key, 1, ?) = ?
             ORDER BY key ASC",
        )
        .bind(bucket_rec.id)
        .bind(prefix.map_or(0, |p| p.chars().count() as i64))
        .bind(prefix.unwrap_or(""))
        .fetch_all(&*self.db)
        .await?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names_follow_dns_rules() {
        assert!(StorageService::ensure_bucket_name_safe("answer-scripts").is_ok());
        assert!(StorageService::ensure_bucket_name_safe("ab").is_err());
        assert!(StorageService::ensure_bucket_name_safe("Answer").is_err());
        assert!(StorageService::ensure_bucket_name_safe("-scripts").is_err());
        assert!(StorageService::ensure_bucket_name_safe("a..b").is_err());
    }

    #[test]
    fn shards_are_stable_hex_pairs() {
        let first = StorageService::object_shards("answer-scripts", "script.pdf");
        let second = StorageService::object_shards("answer-scripts", "script.pdf");
        assert_eq!(first, second);
        assert_eq!(first.0.len(), 2);
        assert_eq!(first.1.len(), 2);
    }
}
