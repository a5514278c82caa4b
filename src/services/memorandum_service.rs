//! Memorandum uploads: the same store-then-record sequence as answer
//! scripts, without extraction. Memorandums live under their own key prefix
//! so they never collide with a script of the same name.

use crate::{
    config::KeyStrategy,
    models::{Memorandum, NewMemorandum},
    services::{
        answer_script_repo::RepositoryError,
        content_store::{ContentStore, ObjectStream},
        ingestion_service::{IngestError, IngestResult, UploadedFile, object_key},
        memorandum_repo::MemorandumRepository,
    },
};
use std::{sync::Arc, time::Duration};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const KEY_PREFIX: &str = "memorandums";

#[derive(Clone)]
pub struct MemorandumService {
    store: Arc<dyn ContentStore>,
    repo: Arc<dyn MemorandumRepository>,
    key_strategy: KeyStrategy,
    upload_timeout: Duration,
}

impl MemorandumService {
    pub fn new(
        store: Arc<dyn ContentStore>,
        repo: Arc<dyn MemorandumRepository>,
        key_strategy: KeyStrategy,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            store,
            repo,
            key_strategy,
            upload_timeout,
        }
    }

    pub async fn upload(&self, file: UploadedFile, exam_id: Uuid) -> IngestResult<Memorandum> {
        let bytes = match file.contents {
            Ok(bytes) if bytes.is_empty() => return Err(IngestError::Input("file is empty".into())),
            Ok(bytes) => bytes,
            Err(reason) => {
                return Err(IngestError::Input(format!("failed to open file: {reason}")));
            }
        };

        let id = Uuid::new_v4();
        let key = format!(
            "{KEY_PREFIX}/{}",
            object_key(self.key_strategy, id, &file.file_name)
        );
        let size = bytes.len() as u64;

        let deadline = Instant::now() + self.upload_timeout;
        let put = self
            .store
            .put(&key, bytes, size, file.content_type.as_deref());
        let location = match timeout_at(deadline, put).await {
            Ok(result) => result?,
            Err(_) => {
                self.rollback(&key, None).await;
                return Err(IngestError::DeadlineExceeded);
            }
        };

        let record = NewMemorandum {
            id,
            file_name: file.file_name.clone(),
            object_key: key.clone(),
            file_url: Some(location.url),
            exam_id,
        };
        match timeout_at(deadline, self.repo.create(record)).await {
            Ok(Ok(created)) => {
                info!(memorandum_id = %created.id, key = %key, "memorandum stored");
                Ok(created)
            }
            Ok(Err(err)) => {
                self.rollback(&key, None).await;
                Err(err.into())
            }
            Err(_) => {
                // The insert may have committed before the deadline fired.
                self.rollback(&key, Some(id)).await;
                Err(IngestError::DeadlineExceeded)
            }
        }
    }

    async fn rollback(&self, key: &str, record_id: Option<Uuid>) {
        if let Some(id) = record_id {
            match self.repo.delete(id).await {
                Ok(()) | Err(RepositoryError::NotFound(_)) => {}
                Err(err) => error!(memorandum_id = %id, error = %err, "failed to remove memorandum record during rollback"),
            }
        }
        match self.store.delete(key).await {
            Ok(()) => warn!(key, "rolled back stored memorandum"),
            Err(err) if err.is_not_found() => debug!(key, "nothing to roll back"),
            Err(err) => error!(key, error = %err, "failed to roll back stored memorandum"),
        }
    }

    pub async fn list(&self) -> IngestResult<Vec<Memorandum>> {
        Ok(self.repo.get_all().await?)
    }

    pub async fn get(&self, id: Uuid) -> IngestResult<Memorandum> {
        Ok(self.repo.get_by_id(id).await?)
    }

    pub async fn open_file(&self, id: Uuid) -> IngestResult<(Memorandum, ObjectStream)> {
        let record = self.repo.get_by_id(id).await?;
        let stream = self.store.get(&record.object_key).await?;
        Ok((record, stream))
    }

    pub async fn delete(&self, id: Uuid) -> IngestResult<()> {
        let record = self.repo.get_by_id(id).await?;
        match self.store.delete(&record.object_key).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        match self.repo.delete(id).await {
            Ok(()) => Ok(()),
            Err(RepositoryError::NotFound(_)) => Err(IngestError::NotFound(id)),
            Err(err) => {
                error!(memorandum_id = %id, error = %err, "object removed but record delete failed");
                Err(err.into())
            }
        }
    }
}
