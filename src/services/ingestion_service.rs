//! src/services/ingestion_service.rs
//!
//! IngestionService turns uploaded answer-script files into committed
//! records. Each file runs the same sequence on its own task:
//!
//! 1. read the upload (input failures touch no store)
//! 2. under file-name keys, look up the record an earlier attempt committed
//! 3. put the bytes into the content store
//! 4. create (or resume) the metadata record with status `processing`;
//!    on failure a freshly written object is deleted again, while a resumed
//!    record keeps its object
//! 5. extraction + matching, inline or deferred, ending in `uploaded` or
//!    `failed`
//!
//! Files are independent: a failure is recorded for that file only and
//! never rolls back its siblings. No step is retried here.

use crate::{
    config::{KeyStrategy, PipelineConfig},
    extraction::{
        matcher::{IdentityMatcher, MatchOutcome},
        rasterizer::RasterError,
        text_extractor::TextExtractor,
    },
    models::{AnswerScript, AnswerScriptUpdate, NewAnswerScript, ProcessingStatus},
    services::{
        answer_script_repo::{AnswerScriptRepository, RepositoryError},
        content_store::{ContentStore, ObjectStream, StorageError},
        roster::RosterSource,
    },
};
use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::{
    io::AsyncReadExt,
    time::{Instant, timeout, timeout_at},
};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid input: {0}")]
    Input(String),
    #[error("answer script `{0}` not found")]
    NotFound(Uuid),
    #[error("content store error: {0}")]
    Storage(#[from] StorageError),
    #[error("metadata store error: {0}")]
    Metadata(#[source] RepositoryError),
    #[error("unreadable document: {0}")]
    Document(#[from] RasterError),
    #[error("roster unavailable: {0}")]
    Roster(#[source] sqlx::Error),
    #[error("operation exceeded its deadline")]
    DeadlineExceeded,
}

impl From<RepositoryError> for IngestError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => IngestError::NotFound(id),
            RepositoryError::Validation(msg) => IngestError::Input(msg),
            other => IngestError::Metadata(other),
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

/// One file as handed over by the transport layer. `contents` carries the
/// error if the upload stream could not be read.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub contents: Result<Bytes, String>,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, content_type: Option<String>, bytes: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            content_type,
            contents: Ok(bytes),
        }
    }

    pub fn unreadable(file_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            contents: Err(reason.into()),
        }
    }
}

/// Which phase a file failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Input,
    Storage,
    Metadata,
    Deadline,
    Internal,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailedUpload {
    pub filename: String,
    pub error: String,
    pub kind: FailureKind,
}

impl FailedUpload {
    fn new(filename: &str, kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            filename: filename.to_string(),
            error: error.into(),
            kind,
        }
    }
}

/// Per-batch outcome. Every input file appears in exactly one list.
#[derive(Debug, Default, Serialize)]
pub struct BatchUploadResult {
    pub successful_uploads: Vec<AnswerScript>,
    pub failed_uploads: Vec<FailedUpload>,
}

impl BatchUploadResult {
    pub fn all_succeeded(&self) -> bool {
        self.failed_uploads.is_empty()
    }

    pub fn all_failed(&self) -> bool {
        self.successful_uploads.is_empty() && !self.failed_uploads.is_empty()
    }
}

/// Whether extraction runs inside the upload call or on a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    Inline,
    Deferred,
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub exam_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    /// Defaults to inline for single files (when configured) and deferred otherwise.
    pub mode: Option<ExtractionMode>,
    /// Deadline for the write phases; defaults to now + `upload_timeout`.
    pub deadline: Option<Instant>,
}

/// Derive the content-store key for a file.
pub fn object_key(strategy: KeyStrategy, id: Uuid, file_name: &str) -> String {
    match strategy {
        KeyStrategy::FileName => file_name.to_string(),
        KeyStrategy::RecordId => format!("{id}/{file_name}"),
    }
}

#[derive(Clone)]
pub struct IngestionService {
    store: Arc<dyn ContentStore>,
    repo: Arc<dyn AnswerScriptRepository>,
    roster: Arc<dyn RosterSource>,
    extractor: TextExtractor,
    matcher: Arc<IdentityMatcher>,
    config: Arc<PipelineConfig>,
    background: TaskTracker,
}

impl IngestionService {
    pub fn new(
        store: Arc<dyn ContentStore>,
        repo: Arc<dyn AnswerScriptRepository>,
        roster: Arc<dyn RosterSource>,
        extractor: TextExtractor,
        config: Arc<PipelineConfig>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let matcher = IdentityMatcher::new(config.exam_number.clone(), config.match_threshold)?;
        Ok(Self {
            store,
            repo,
            roster,
            extractor,
            matcher: Arc::new(matcher),
            config,
            background: TaskTracker::new(),
        })
    }

    fn default_mode(&self, file_count: usize) -> ExtractionMode {
        if file_count == 1 && self.config.inline_single_file {
            ExtractionMode::Inline
        } else {
            ExtractionMode::Deferred
        }
    }

    /// Ingest every file concurrently, one task per file.
    pub async fn upload_batch(
        &self,
        files: Vec<UploadedFile>,
        options: UploadOptions,
    ) -> BatchUploadResult {
        let mode = options
            .mode
            .unwrap_or_else(|| self.default_mode(files.len()));
        let deadline = options
            .deadline
            .unwrap_or_else(|| Instant::now() + self.config.upload_timeout);

        let UploadOptions {
            exam_id,
            subject_id,
            ..
        } = options;

        let names: Vec<String> = files.iter().map(|f| f.file_name.clone()).collect();
        let handles = files.into_iter().map(|file| {
            let this = self.clone();
            let span = info_span!("ingest", file_name = %file.file_name);
            tokio::spawn(
                async move {
                    this.ingest_file(file, exam_id, subject_id, mode, deadline)
                        .await
                }
                .instrument(span),
            )
        });
        let joined = join_all(handles).await;

        let mut result = BatchUploadResult::default();
        for (name, outcome) in names.iter().zip(joined) {
            match outcome {
                Ok(Ok(record)) => result.successful_uploads.push(record),
                Ok(Err(failed)) => result.failed_uploads.push(failed),
                Err(join_err) => {
                    error!(file_name = %name, error = %join_err, "ingest task aborted");
                    result.failed_uploads.push(FailedUpload::new(
                        name,
                        FailureKind::Internal,
                        format!("ingest task aborted: {join_err}"),
                    ));
                }
            }
        }

        info!(
            succeeded = result.successful_uploads.len(),
            failed = result.failed_uploads.len(),
            "batch ingested"
        );
        result
    }

    /// Single-file convenience over [`upload_batch`](Self::upload_batch).
    pub async fn upload_one(
        &self,
        file: UploadedFile,
        options: UploadOptions,
    ) -> Result<AnswerScript, FailedUpload> {
        let mut result = self.upload_batch(vec![file], options).await;
        match (result.successful_uploads.pop(), result.failed_uploads.pop()) {
            (Some(record), _) => Ok(record),
            (None, Some(failed)) => Err(failed),
            (None, None) => Err(FailedUpload::new(
                "",
                FailureKind::Internal,
                "upload produced no outcome",
            )),
        }
    }

    async fn ingest_file(
        &self,
        file: UploadedFile,
        exam_id: Option<Uuid>,
        subject_id: Option<Uuid>,
        mode: ExtractionMode,
        deadline: Instant,
    ) -> Result<AnswerScript, FailedUpload> {
        let name = file.file_name.as_str();

        // 1. read the upload
        let bytes = match file.contents {
            Ok(bytes) if bytes.is_empty() => {
                return Err(FailedUpload::new(name, FailureKind::Input, "file is empty"));
            }
            Ok(bytes) => bytes,
            Err(reason) => {
                return Err(FailedUpload::new(
                    name,
                    FailureKind::Input,
                    format!("failed to open file: {reason}"),
                ));
            }
        };

        // 2. record an earlier attempt already committed for this file
        let resumable = match timeout_at(deadline, self.find_resumable(name)).await {
            Ok(Ok(found)) => found,
            Ok(Err(err)) => {
                return Err(FailedUpload::new(
                    name,
                    FailureKind::Metadata,
                    format!("failed to read from database: {err}"),
                ));
            }
            Err(_) => {
                return Err(FailedUpload::new(
                    name,
                    FailureKind::Deadline,
                    "deadline exceeded while reading from database",
                ));
            }
        };

        // 3. content store
        let (id, key) = match &resumable {
            Some(existing) => (existing.id, existing.object_key.clone()),
            None => {
                let id = Uuid::new_v4();
                (id, object_key(self.config.key_strategy, id, name))
            }
        };
        let size = bytes.len() as u64;
        let put = self
            .store
            .put(&key, bytes.clone(), size, file.content_type.as_deref());
        let location = match timeout_at(deadline, put).await {
            Ok(Ok(location)) => location,
            Ok(Err(err)) => {
                warn!(key = %key, error = %err, "content store write failed");
                return Err(FailedUpload::new(
                    name,
                    FailureKind::Storage,
                    format!("failed to upload to storage: {err}"),
                ));
            }
            Err(_) => {
                // The write may have landed before the deadline fired.
                self.compensate(&key, None, resumable.is_some()).await;
                return Err(FailedUpload::new(
                    name,
                    FailureKind::Deadline,
                    "deadline exceeded while writing to storage",
                ));
            }
        };

        // 4. metadata record
        let resumed = resumable.is_some();
        let commit = async {
            match resumable {
                Some(existing) => {
                    info!(record_id = %existing.id, "resuming existing record");
                    let resume = AnswerScriptUpdate {
                        status: Some(ProcessingStatus::Processing),
                        file_url: Some(location.url),
                        exam_id,
                        subject_id,
                        ..Default::default()
                    };
                    self.repo.update(existing.id, resume).await
                }
                None => {
                    self.repo
                        .create(NewAnswerScript {
                            id,
                            file_name: name.to_string(),
                            object_key: key.clone(),
                            file_url: Some(location.url),
                            exam_id,
                            subject_id,
                        })
                        .await
                }
            }
        };
        let record = match timeout_at(deadline, commit).await {
            Ok(Ok(record)) => record,
            Ok(Err(err)) => {
                self.compensate(&key, None, resumed).await;
                return Err(FailedUpload::new(
                    name,
                    FailureKind::Metadata,
                    format!("failed to save to database: {err}"),
                ));
            }
            Err(_) => {
                self.compensate(&key, (!resumed).then_some(id), resumed).await;
                return Err(FailedUpload::new(
                    name,
                    FailureKind::Deadline,
                    "deadline exceeded while saving to database",
                ));
            }
        };
        info!(record_id = %record.id, key = %key, "upload committed");

        // 5. extraction + matching
        match mode {
            ExtractionMode::Inline => Ok(self.enrich(record.id, bytes).await.unwrap_or(record)),
            ExtractionMode::Deferred => {
                let this = self.clone();
                let record_id = record.id;
                self.background.spawn(
                    async move {
                        this.enrich(record_id, bytes).await;
                    }
                    .instrument(info_span!("enrich", record_id = %record_id)),
                );
                Ok(record)
            }
        }
    }

    /// Under file-name keys, the record an earlier attempt created for the
    /// same file. Its object key is reused so a retry overwrites in place.
    async fn find_resumable(&self, file_name: &str) -> Result<Option<AnswerScript>, RepositoryError> {
        if self.config.key_strategy != KeyStrategy::FileName {
            return Ok(None);
        }
        self.repo.find_by_file_name(file_name).await
    }

    /// Undo the write phases: delete the object at exactly `key` and, when the
    /// record may have been committed, the record as well. Compensation
    /// errors are logged and never fail the batch.
    ///
    /// A resumed record already points at `key`, so its object is kept: the
    /// store holds either the earlier bytes or the retried ones.
    async fn compensate(&self, key: &str, record_id: Option<Uuid>, resumed: bool) {
        if resumed {
            warn!(key, "retry failed; keeping object of the existing record");
            return;
        }
        if let Some(id) = record_id {
            match self.repo.delete(id).await {
                Ok(()) | Err(RepositoryError::NotFound(_)) => {}
                Err(err) => error!(record_id = %id, error = %err, "failed to remove record during rollback"),
            }
        }
        match self.store.delete(key).await {
            Ok(()) => warn!(key, "rolled back stored object"),
            Err(err) if err.is_not_found() => debug!(key, "nothing to roll back"),
            Err(err) => error!(key, error = %err, "failed to roll back stored object"),
        }
    }

    /// Run extraction and matching for a committed record and write the
    /// outcome. Returns the record as last persisted, or `None` if even the
    /// status write failed.
    async fn enrich(&self, record_id: Uuid, bytes: Bytes) -> Option<AnswerScript> {
        let outcome = timeout(self.config.extraction_timeout, self.extract_and_match(bytes)).await;
        let update = match outcome {
            Ok(Ok(matched)) => {
                info!(
                    scanned = matched.scanned_exam_number.as_deref().unwrap_or("-"),
                    matched = matched.student_id.is_some(),
                    confidence = matched.confidence.unwrap_or_default(),
                    "identity matching finished"
                );
                matched.into_update()
            }
            Ok(Err(err)) => {
                error!(error = %err, "extraction failed");
                AnswerScriptUpdate::status(ProcessingStatus::Failed)
            }
            Err(_) => {
                error!(
                    timeout_secs = self.config.extraction_timeout.as_secs(),
                    "extraction exceeded its deadline"
                );
                AnswerScriptUpdate::status(ProcessingStatus::Failed)
            }
        };

        match self.repo.update(record_id, update).await {
            Ok(record) => Some(record),
            Err(err) => {
                error!(error = %err, "failed to record extraction outcome");
                self.repo
                    .update(record_id, AnswerScriptUpdate::status(ProcessingStatus::Failed))
                    .await
                    .inspect_err(|err| error!(error = %err, "failed to mark record failed"))
                    .ok()
            }
        }
    }

    async fn extract_and_match(&self, bytes: Bytes) -> IngestResult<MatchOutcome> {
        let extracted = self.extractor.extract(bytes).await?;
        if !extracted.failed_pages.is_empty() {
            warn!(
                pages = extracted.page_count,
                failed = ?extracted.failed_pages,
                "some pages were not recognized"
            );
        }
        let roster = self
            .roster
            .list_students()
            .await
            .map_err(IngestError::Roster)?;
        Ok(self.matcher.match_text(&extracted.text, &roster))
    }

    /// Wait until every deferred extraction spawned so far has finished.
    pub async fn wait_for_background(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    pub async fn list_scripts(&self) -> IngestResult<Vec<AnswerScript>> {
        Ok(self.repo.get_all().await?)
    }

    pub async fn get_script(&self, id: Uuid) -> IngestResult<AnswerScript> {
        Ok(self.repo.get_by_id(id).await?)
    }

    /// Manual edit through a partial merge.
    pub async fn update_script(
        &self,
        id: Uuid,
        update: AnswerScriptUpdate,
    ) -> IngestResult<AnswerScript> {
        if update.is_empty() {
            return Err(IngestError::Input("no fields to update".into()));
        }
        Ok(self.repo.update(id, update).await?)
    }

    /// Remove the stored object and then the record. An object that is
    /// already gone counts as removed. If the record cannot be deleted after
    /// its object was, the record is marked `failed` and the error returned.
    pub async fn delete_script(&self, id: Uuid) -> IngestResult<()> {
        let record = self.repo.get_by_id(id).await?;

        match self.store.delete(&record.object_key).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!(key = %record.object_key, "object already absent");
            }
            Err(err) => return Err(err.into()),
        }

        if let Err(err) = self.repo.delete(id).await {
            error!(record_id = %id, error = %err, "object removed but record delete failed");
            let _ = self
                .repo
                .update(id, AnswerScriptUpdate::status(ProcessingStatus::Failed))
                .await
                .inspect_err(|err| error!(record_id = %id, error = %err, "failed to mark record failed"));
            return Err(err.into());
        }

        info!(record_id = %id, key = %record.object_key, "answer script deleted");
        Ok(())
    }

    /// Stream the stored file behind a record.
    pub async fn open_script_file(&self, id: Uuid) -> IngestResult<(AnswerScript, ObjectStream)> {
        let record = self.repo.get_by_id(id).await?;
        let stream = self.store.get(&record.object_key).await?;
        Ok((record, stream))
    }

    /// Re-run extraction and matching for an existing record from its stored
    /// object.
    pub async fn reprocess_script(&self, id: Uuid) -> IngestResult<AnswerScript> {
        let (record, mut stream) = self.open_script_file(id).await?;
        let mut buf = Vec::with_capacity(stream.size as usize);
        stream
            .reader
            .read_to_end(&mut buf)
            .await
            .map_err(StorageError::Io)?;

        self.repo
            .update(id, AnswerScriptUpdate::status(ProcessingStatus::Processing))
            .await?;
        let span = info_span!("reprocess", record_id = %record.id);
        match self.enrich(record.id, Bytes::from(buf)).instrument(span).await {
            Some(updated) => Ok(updated),
            None => Ok(self.repo.get_by_id(id).await?),
        }
    }
}
