//! Raster image → recognized text.

use crate::extraction::rasterizer::RasterImage;
use async_trait::async_trait;
use std::{io, process::Stdio};
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command};

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("recognizer could not be started: {0}")]
    Spawn(#[source] io::Error),
    #[error("recognition failed on page {page}: {reason}")]
    Failed { page: usize, reason: String },
}

/// Stateless OCR engine; one call per page.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, image: &RasterImage, language: &str)
    -> Result<String, RecognitionError>;
}

/// Pipes each page through the `tesseract` CLI (`tesseract stdin stdout -l <lang>`).
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    binary: String,
}

impl TesseractRecognizer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Recognizer for TesseractRecognizer {
    async fn recognize(
        &self,
        image: &RasterImage,
        language: &str,
    ) -> Result<String, RecognitionError> {
        let page = image.page_index;
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(RecognitionError::Spawn)?;

        let mut stdin = child.stdin.take().ok_or_else(|| RecognitionError::Failed {
            page,
            reason: "stdin unavailable".into(),
        })?;
        let png = image.png.clone();
        let feed = async move {
            let written = stdin.write_all(&png).await;
            drop(stdin);
            written
        };

        let (written, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|err| RecognitionError::Failed {
            page,
            reason: err.to_string(),
        })?;
        if !output.status.success() {
            return Err(RecognitionError::Failed {
                page,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        written.map_err(|err| RecognitionError::Failed {
            page,
            reason: err.to_string(),
        })?;

        String::from_utf8(output.stdout).map_err(|_| RecognitionError::Failed {
            page,
            reason: "output was not valid UTF-8".into(),
        })
    }
}
