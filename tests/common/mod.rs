//! Shared fixtures: a real SQLite database and on-disk content store in a
//! temp dir, scripted extraction adapters, and failure-injecting wrappers.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use script_intake::{
    AppState,
    config::PipelineConfig,
    db,
    extraction::{
        rasterizer::{DocumentHandle, RasterError, RasterImage, Rasterizer},
        recognizer::{RecognitionError, Recognizer},
        text_extractor::TextExtractor,
    },
    models::{AnswerScript, AnswerScriptUpdate, NewAnswerScript, Student},
    services::{
        answer_script_repo::{
            AnswerScriptRepository, RepositoryError, RepositoryResult,
            SqliteAnswerScriptRepository,
        },
        content_store::{ContentStore, ObjectLocation, ObjectStream, StorageError, StorageResult},
        ingestion_service::{IngestionService, UploadedFile},
        memorandum_repo::SqliteMemorandumRepository,
        memorandum_service::MemorandumService,
        roster::SqliteRoster,
        storage_service::StorageService,
    },
};
use sqlx::SqlitePool;
use std::{
    collections::HashSet,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;
use uuid::Uuid;

pub const BUCKET: &str = "answer-scripts";

/// Page separator understood by [`FakeRasterizer`].
pub const PAGE_BREAK: char = '\x0c';

pub struct Harness {
    pub dir: TempDir,
    pub db: Arc<SqlitePool>,
    pub store: Arc<StorageService>,
    pub repo: Arc<SqliteAnswerScriptRepository>,
    pub roster: Arc<SqliteRoster>,
    pub rasterizer: Arc<FakeRasterizer>,
    pub john: Student,
    pub jane: Student,
    pub alice: Student,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("meta.db").display());
        let db = db::connect(&url).await.unwrap();
        db::run_migrations(&db).await.unwrap();
        db::seed_roster(db.clone()).await.unwrap();

        let store = Arc::new(StorageService::new(
            db.clone(),
            dir.path().join("objects"),
            BUCKET,
        ));
        store.ensure_bucket().await.unwrap();

        let roster = Arc::new(SqliteRoster::new(db.clone()));
        let john = roster.add_student("John", "Doe", "JOH5196").await.unwrap();
        let jane = roster.add_student("Jane", "Dwayne", "JAN5196").await.unwrap();
        let alice = roster.add_student("Alice", "Smith", "ALI5196").await.unwrap();

        Self {
            repo: Arc::new(SqliteAnswerScriptRepository::new(db.clone())),
            rasterizer: Arc::new(FakeRasterizer::default()),
            dir,
            db,
            store,
            roster,
            john,
            jane,
            alice,
        }
    }

    pub fn extractor(&self) -> TextExtractor {
        TextExtractor::new(self.rasterizer.clone(), Arc::new(FakeRecognizer), "eng", 2)
    }

    /// Service over the real stores.
    pub fn service(&self, config: PipelineConfig) -> IngestionService {
        self.service_with(config, self.store.clone(), self.repo.clone())
    }

    pub fn service_with(
        &self,
        config: PipelineConfig,
        store: Arc<dyn ContentStore>,
        repo: Arc<dyn AnswerScriptRepository>,
    ) -> IngestionService {
        IngestionService::new(
            store,
            repo,
            self.roster.clone(),
            self.extractor(),
            Arc::new(config),
        )
        .unwrap()
    }

    pub fn memorandum_service(&self, store: Arc<dyn ContentStore>) -> MemorandumService {
        let config = PipelineConfig::default();
        MemorandumService::new(
            store,
            Arc::new(SqliteMemorandumRepository::new(self.db.clone())),
            config.key_strategy,
            config.upload_timeout,
        )
    }

    pub fn app_state(&self, config: PipelineConfig) -> AppState {
        AppState::new(
            self.db.clone(),
            self.dir.path().join("objects"),
            self.service(config),
            self.memorandum_service(self.store.clone()),
        )
    }

    pub async fn stored_keys(&self) -> Vec<String> {
        self.store.list(None).await.unwrap()
    }
}

/// A fake "PDF": page texts joined by [`PAGE_BREAK`].
pub fn pdf(pages: &[&str]) -> Bytes {
    Bytes::from(pages.join(&PAGE_BREAK.to_string()))
}

pub fn file(name: &str, pages: &[&str]) -> UploadedFile {
    UploadedFile::new(name, Some("application/pdf".into()), pdf(pages))
}

/// Rasterizer over the fake format. Bytes starting with `CORRUPT` fail to
/// open; a page starting with `!render` fails to render. Tracks how many
/// documents are currently open.
#[derive(Default)]
pub struct FakeRasterizer {
    pub open_documents: Arc<AtomicUsize>,
    pub opened: AtomicUsize,
    pub render_delay: Mutex<Option<Duration>>,
}

impl FakeRasterizer {
    pub fn open_count(&self) -> usize {
        self.open_documents.load(Ordering::SeqCst)
    }

    pub fn set_render_delay(&self, delay: Duration) {
        *self.render_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl Rasterizer for FakeRasterizer {
    async fn open(&self, pdf: Bytes) -> Result<Box<dyn DocumentHandle>, RasterError> {
        if pdf.starts_with(b"CORRUPT") {
            return Err(RasterError::CorruptDocument("not a pdf".into()));
        }
        let text = String::from_utf8(pdf.to_vec())
            .map_err(|_| RasterError::CorruptDocument("not utf-8".into()))?;
        let pages = text.split(PAGE_BREAK).map(str::to_string).collect();

        self.opened.fetch_add(1, Ordering::SeqCst);
        self.open_documents.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDocument {
            pages,
            delay: *self.render_delay.lock().unwrap(),
            open_documents: self.open_documents.clone(),
        }))
    }
}

struct FakeDocument {
    pages: Vec<String>,
    delay: Option<Duration>,
    open_documents: Arc<AtomicUsize>,
}

#[async_trait]
impl DocumentHandle for FakeDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    async fn render_page(&self, index: usize) -> Result<RasterImage, RasterError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let page = self.pages.get(index).ok_or(RasterError::PageOutOfRange {
            index,
            count: self.pages.len(),
        })?;
        if page.starts_with("!render") {
            return Err(RasterError::Render {
                page: index,
                reason: "scripted render failure".into(),
            });
        }
        Ok(RasterImage {
            page_index: index,
            png: Bytes::from(page.clone()),
        })
    }
}

impl Drop for FakeDocument {
    fn drop(&mut self) {
        self.open_documents.fetch_sub(1, Ordering::SeqCst);
    }
}

/// "Recognizes" the page text carried in the image; pages starting with
/// `!ocr` fail.
pub struct FakeRecognizer;

#[async_trait]
impl Recognizer for FakeRecognizer {
    async fn recognize(
        &self,
        image: &RasterImage,
        _language: &str,
    ) -> Result<String, RecognitionError> {
        let text = String::from_utf8_lossy(&image.png).to_string();
        if text.starts_with("!ocr") {
            return Err(RecognitionError::Failed {
                page: image.page_index,
                reason: "scripted recognition failure".into(),
            });
        }
        Ok(text)
    }
}

/// Content store wrapper that fails puts for chosen keys, can delay puts,
/// and can fail every delete.
pub struct FlakyStore {
    inner: Arc<StorageService>,
    pub fail_put_keys: Mutex<HashSet<String>>,
    pub put_delay: Mutex<Option<Duration>>,
    pub fail_deletes: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<StorageService>) -> Self {
        Self {
            inner,
            fail_put_keys: Mutex::new(HashSet::new()),
            put_delay: Mutex::new(None),
            fail_deletes: AtomicBool::new(false),
        }
    }

    pub fn fail_put(&self, key: &str) {
        self.fail_put_keys.lock().unwrap().insert(key.to_string());
    }
}

fn injected(what: &str) -> StorageError {
    StorageError::Io(io::Error::other(format!("injected {what} failure")))
}

#[async_trait]
impl ContentStore for FlakyStore {
    async fn ensure_bucket(&self) -> StorageResult<()> {
        self.inner.ensure_bucket().await
    }

    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        size: u64,
        content_type: Option<&str>,
    ) -> StorageResult<ObjectLocation> {
        let delay = *self.put_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_put_keys.lock().unwrap().contains(key) {
            return Err(injected("put"));
        }
        self.inner.put(key, bytes, size, content_type).await
    }

    async fn get(&self, key: &str) -> StorageResult<ObjectStream> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(injected("delete"));
        }
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: Option<&str>) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }
}

/// Repository wrapper that can fail creates, updates and deletes, and can
/// stall after a create has committed.
pub struct FlakyRepo {
    inner: Arc<SqliteAnswerScriptRepository>,
    pub fail_create: AtomicBool,
    pub fail_update: AtomicBool,
    pub fail_delete: AtomicBool,
    pub create_delay: Mutex<Option<Duration>>,
}

impl FlakyRepo {
    pub fn new(inner: Arc<SqliteAnswerScriptRepository>) -> Self {
        Self {
            inner,
            fail_create: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            create_delay: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AnswerScriptRepository for FlakyRepo {
    async fn create(&self, record: NewAnswerScript) -> RepositoryResult<AnswerScript> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RepositoryError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        let created = self.inner.create(record).await?;
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(created)
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<AnswerScript> {
        self.inner.get_by_id(id).await
    }

    async fn get_all(&self) -> RepositoryResult<Vec<AnswerScript>> {
        self.inner.get_all().await
    }

    async fn find_by_file_name(&self, file_name: &str) -> RepositoryResult<Option<AnswerScript>> {
        self.inner.find_by_file_name(file_name).await
    }

    async fn update(&self, id: Uuid, update: AnswerScriptUpdate) -> RepositoryResult<AnswerScript> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(RepositoryError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        self.inner.update(id, update).await
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(RepositoryError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        self.inner.delete(id).await
    }
}
