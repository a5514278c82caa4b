use crate::{
    config::AppConfig,
    extraction::{
        rasterizer::{PopplerRasterizer, Rasterizer},
        recognizer::{Recognizer, TesseractRecognizer},
        text_extractor::TextExtractor,
    },
    services::{
        answer_script_repo::SqliteAnswerScriptRepository, content_store::ContentStore,
        ingestion_service::IngestionService, memorandum_repo::SqliteMemorandumRepository,
        memorandum_service::MemorandumService, roster::SqliteRoster,
        storage_service::StorageService,
    },
};
use anyhow::Result;
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    /// Root of the on-disk content store; probed by `/readyz`.
    pub storage_dir: PathBuf,
    pub scripts: IngestionService,
    pub memorandums: MemorandumService,
}

impl AppState {
    pub fn new(
        db: Arc<SqlitePool>,
        storage_dir: impl Into<PathBuf>,
        scripts: IngestionService,
        memorandums: MemorandumService,
    ) -> Self {
        Self {
            db,
            storage_dir: storage_dir.into(),
            scripts,
            memorandums,
        }
    }

    /// Wire the SQLite-backed stores with the given extraction adapters.
    pub fn with_adapters(
        cfg: &AppConfig,
        db: Arc<SqlitePool>,
        rasterizer: Arc<dyn Rasterizer>,
        recognizer: Arc<dyn Recognizer>,
    ) -> Result<Self> {
        let store: Arc<dyn ContentStore> = Arc::new(StorageService::new(
            db.clone(),
            &cfg.storage_dir,
            &cfg.bucket,
        ));
        let pipeline = Arc::new(cfg.pipeline.clone());
        let extractor = TextExtractor::new(
            rasterizer,
            recognizer,
            pipeline.ocr_language.clone(),
            pipeline.page_concurrency,
        );

        let scripts = IngestionService::new(
            store.clone(),
            Arc::new(SqliteAnswerScriptRepository::new(db.clone())),
            Arc::new(SqliteRoster::new(db.clone())),
            extractor,
            pipeline.clone(),
        )?;
        let memorandums = MemorandumService::new(
            store,
            Arc::new(SqliteMemorandumRepository::new(db.clone())),
            pipeline.key_strategy,
            pipeline.upload_timeout,
        );

        Ok(Self::new(db, &cfg.storage_dir, scripts, memorandums))
    }

    /// Production wiring: poppler for rendering, tesseract for recognition.
    pub fn from_config(cfg: &AppConfig, db: Arc<SqlitePool>) -> Result<Self> {
        let pipeline = &cfg.pipeline;
        let rasterizer = Arc::new(PopplerRasterizer::new(
            &pipeline.pdfinfo_bin,
            &pipeline.pdftoppm_bin,
            pipeline.render_dpi,
        ));
        let recognizer = Arc::new(TesseractRecognizer::new(&pipeline.tesseract_bin));
        Self::with_adapters(cfg, db, rasterizer, recognizer)
    }
}
