//! Document-level OCR: render pages, recognize them, reassemble in page order.

use crate::extraction::{
    rasterizer::{DocumentHandle, RasterError, Rasterizer},
    recognizer::Recognizer,
};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use std::sync::Arc;
use tracing::{debug, warn};

/// Recognized text of a whole document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    /// Page texts joined in page order, one line break between pages.
    pub text: String,
    pub page_count: usize,
    /// Pages whose recognition failed and contributed nothing.
    pub failed_pages: Vec<usize>,
}

/// Outcome for one page: its index and its text, `None` if recognition failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub index: usize,
    pub text: Option<String>,
}

#[derive(Clone)]
pub struct TextExtractor {
    rasterizer: Arc<dyn Rasterizer>,
    recognizer: Arc<dyn Recognizer>,
    language: String,
    page_concurrency: usize,
}

impl TextExtractor {
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        recognizer: Arc<dyn Recognizer>,
        language: impl Into<String>,
        page_concurrency: usize,
    ) -> Self {
        Self {
            rasterizer,
            recognizer,
            language: language.into(),
            page_concurrency: page_concurrency.max(1),
        }
    }

    /// Rasterize and recognize every page of `pdf`.
    ///
    /// Up to `page_concurrency` pages are in flight. A page whose recognition
    /// fails contributes an empty string; a page that cannot be rendered
    /// aborts the document. The document handle is released before returning
    /// on every path.
    pub async fn extract(&self, pdf: Bytes) -> Result<ExtractedText, RasterError> {
        let handle: Arc<dyn DocumentHandle> = Arc::from(self.rasterizer.open(pdf).await?);
        let page_count = handle.page_count();
        let recognizer = Arc::clone(&self.recognizer);
        let language = self.language.clone();

        // The stream owns the only handle references; it is dropped as soon
        // as collection finishes or the first render error short-circuits it.
        let pages = stream::iter(0..page_count)
            .map(move |index| {
                recognize_page(
                    Arc::clone(&handle),
                    Arc::clone(&recognizer),
                    language.clone(),
                    index,
                )
            })
            .buffer_unordered(self.page_concurrency)
            .try_collect::<Vec<_>>()
            .await?;

        Ok(assemble_pages(pages, page_count))
    }
}

async fn recognize_page(
    handle: Arc<dyn DocumentHandle>,
    recognizer: Arc<dyn Recognizer>,
    language: String,
    index: usize,
) -> Result<PageText, RasterError> {
    let image = handle.render_page(index).await?;
    drop(handle);
    let text = match recognizer.recognize(&image, &language).await {
        Ok(text) => {
            debug!(page = index, chars = text.len(), "recognized page");
            Some(text)
        }
        Err(err) => {
            warn!(page = index, error = %err, "page recognition failed");
            None
        }
    };
    Ok(PageText { index, text })
}

/// Order page results by index regardless of completion order and join them.
pub fn assemble_pages(mut pages: Vec<PageText>, page_count: usize) -> ExtractedText {
    pages.sort_by_key(|page| page.index);

    let failed_pages = pages
        .iter()
        .filter(|page| page.text.is_none())
        .map(|page| page.index)
        .collect();
    let text = pages
        .iter()
        .map(|page| page.text.as_deref().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n");

    ExtractedText {
        text,
        page_count,
        failed_pages,
    }
}
