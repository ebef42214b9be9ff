//! OCR fallback for scanned PDFs.

use super::ParseError;
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt, stream};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Resolution used when rasterising pages for OCR.
const RASTER_DPI: &str = "300";

/// Pages recognised concurrently.
const OCR_CONCURRENCY: usize = 4;

/// Recognises text in rasterised PDF pages.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Return the recognised text of every page, in page order.
    async fn recognize(&self, pdf: &[u8], lang: &str) -> Result<Vec<String>, ParseError>;
}

/// OCR through the `pdftoppm` and `tesseract` command-line tools.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    pdftoppm: PathBuf,
    tesseract: PathBuf,
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self {
            pdftoppm: PathBuf::from("pdftoppm"),
            tesseract: PathBuf::from("tesseract"),
        }
    }
}

impl TesseractCli {
    /// Use explicit binary locations instead of resolving them on `PATH`.
    pub fn with_binaries(pdftoppm: impl Into<PathBuf>, tesseract: impl Into<PathBuf>) -> Self {
        Self {
            pdftoppm: pdftoppm.into(),
            tesseract: tesseract.into(),
        }
    }

    async fn rasterize(&self, pdf_path: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, ParseError> {
        let prefix = out_dir.join("page");
        let output = Command::new(&self.pdftoppm)
            .arg("-r")
            .arg(RASTER_DPI)
            .arg("-png")
            .arg(pdf_path)
            .arg(&prefix)
            .output()
            .await
            .map_err(|error| spawn_error("pdftoppm", error))?;

        if !output.status.success() {
            return Err(ParseError::OcrFailed(format!(
                "pdftoppm exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut images = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "png") {
                images.push(path);
            }
        }
        images.sort_by_key(|path| page_index(path));
        Ok(images)
    }

    async fn recognize_image(&self, image: &Path, lang: &str) -> Result<String, ParseError> {
        let output = Command::new(&self.tesseract)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(lang)
            .output()
            .await
            .map_err(|error| spawn_error("tesseract", error))?;

        if !output.status.success() {
            return Err(ParseError::OcrFailed(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    async fn recognize(&self, pdf: &[u8], lang: &str) -> Result<Vec<String>, ParseError> {
        let workdir = tempfile::tempdir()?;
        let pdf_path = workdir.path().join("input.pdf");
        tokio::fs::write(&pdf_path, pdf).await?;

        let images_dir = workdir.path().join("pages");
        tokio::fs::create_dir(&images_dir).await?;
        let images = self.rasterize(&pdf_path, &images_dir).await?;
        tracing::info!(pages = images.len(), dpi = RASTER_DPI, "Rasterised PDF for OCR");

        let total = images.len();
        stream::iter(images.into_iter().enumerate())
            .map(|(index, image)| async move {
                let text = self.recognize_image(&image, lang).await?;
                tracing::debug!(page = index + 1, total, "OCR page done");
                Ok::<_, ParseError>(text)
            })
            .buffered(OCR_CONCURRENCY)
            .try_collect()
            .await
    }
}

/// Numeric page suffix of a `pdftoppm` output name such as `page-012.png`.
fn page_index(path: &Path) -> u32 {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.rsplit('-').next())
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(u32::MAX)
}

fn spawn_error(tool: &str, error: std::io::Error) -> ParseError {
    if error.kind() == ErrorKind::NotFound {
        ParseError::OcrUnavailable(format!(
            "`{tool}` was not found on PATH; install poppler-utils and tesseract-ocr"
        ))
    } else {
        ParseError::OcrFailed(format!("failed to run {tool}: {error}"))
    }
}
