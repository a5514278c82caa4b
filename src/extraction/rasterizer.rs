//! PDF → per-page raster images.
//!
//! Pages are rendered on demand through a [`DocumentHandle`]; nothing is
//! pre-materialized. The production handle owns a temporary directory that
//! is removed when the handle is dropped, so release happens on every exit
//! path including early returns on a page error.

use async_trait::async_trait;
use bytes::Bytes;
use std::{io, path::PathBuf, process::Stdio};
use tempfile::TempDir;
use thiserror::Error;
use tokio::{fs, process::Command};
use tracing::debug;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("document could not be opened: {0}")]
    CorruptDocument(String),
    #[error("page {page} could not be rendered: {reason}")]
    Render { page: usize, reason: String },
    #[error("page {index} out of range (document has {count} pages)")]
    PageOutOfRange { index: usize, count: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One rendered page, PNG encoded.
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub page_index: usize,
    pub png: Bytes,
}

#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn open(&self, pdf: Bytes) -> Result<Box<dyn DocumentHandle>, RasterError>;
}

/// An opened document. Dropping it releases every resource it holds.
#[async_trait]
pub trait DocumentHandle: Send + Sync {
    fn page_count(&self) -> usize;

    /// Render page `index` (zero based).
    async fn render_page(&self, index: usize) -> Result<RasterImage, RasterError>;
}

/// Rasterizer backed by the poppler command-line tools (`pdfinfo`, `pdftoppm`).
#[derive(Debug, Clone)]
pub struct PopplerRasterizer {
    pdfinfo_bin: String,
    pdftoppm_bin: String,
    dpi: u32,
}

impl PopplerRasterizer {
    pub fn new(pdfinfo_bin: impl Into<String>, pdftoppm_bin: impl Into<String>, dpi: u32) -> Self {
        Self {
            pdfinfo_bin: pdfinfo_bin.into(),
            pdftoppm_bin: pdftoppm_bin.into(),
            dpi,
        }
    }
}

#[async_trait]
impl Rasterizer for PopplerRasterizer {
    async fn open(&self, pdf: Bytes) -> Result<Box<dyn DocumentHandle>, RasterError> {
        if pdf.is_empty() {
            return Err(RasterError::CorruptDocument("document is empty".into()));
        }

        let workdir = tempfile::Builder::new().prefix("script-pages-").tempdir()?;
        let source = workdir.path().join("source.pdf");
        fs::write(&source, &pdf).await?;

        let output = Command::new(&self.pdfinfo_bin)
            .arg(&source)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RasterError::CorruptDocument(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let pages = parse_page_count(&stdout)
            .ok_or_else(|| RasterError::CorruptDocument("page count missing".into()))?;
        if pages == 0 {
            return Err(RasterError::CorruptDocument("document has no pages".into()));
        }

        debug!(pages, workdir = %workdir.path().display(), "opened document");
        Ok(Box::new(PopplerDocument {
            workdir,
            source,
            pages,
            pdftoppm_bin: self.pdftoppm_bin.clone(),
            dpi: self.dpi,
        }))
    }
}

struct PopplerDocument {
    workdir: TempDir,
    source: PathBuf,
    pages: usize,
    pdftoppm_bin: String,
    dpi: u32,
}

#[async_trait]
impl DocumentHandle for PopplerDocument {
    fn page_count(&self) -> usize {
        self.pages
    }

    async fn render_page(&self, index: usize) -> Result<RasterImage, RasterError> {
        if index >= self.pages {
            return Err(RasterError::PageOutOfRange {
                index,
                count: self.pages,
            });
        }
        // pdftoppm numbers pages from 1; -singlefile writes `{prefix}.png`.
        let page_number = (index + 1).to_string();
        let prefix = self.workdir.path().join(format!("page-{index}"));

        let output = Command::new(&self.pdftoppm_bin)
            .args(["-png", "-singlefile", "-r"])
            .arg(self.dpi.to_string())
            .args(["-f", &page_number, "-l", &page_number])
            .arg(&self.source)
            .arg(&prefix)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| RasterError::Render {
                page: index,
                reason: err.to_string(),
            })?;
        if !output.status.success() {
            return Err(RasterError::Render {
                page: index,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let image_path = prefix.with_extension("png");
        let png = fs::read(&image_path)
            .await
            .map_err(|err| RasterError::Render {
                page: index,
                reason: err.to_string(),
            })?;
        let _ = fs::remove_file(&image_path).await;

        Ok(RasterImage {
            page_index: index,
            png: Bytes::from(png),
        })
    }
}

impl Drop for PopplerDocument {
    fn drop(&mut self) {
        debug!(workdir = %self.workdir.path().display(), "released document");
    }
}

/// Pull the `Pages:` value out of `pdfinfo` output.
fn parse_page_count(pdfinfo: &str) -> Option<usize> {
    pdfinfo
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|value| value.trim().parse().ok())
}
