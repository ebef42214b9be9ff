//! PDF page extraction.
//!
//! Text-layer PDFs are read with `pdf-extract` page by page. Scanned books, or any book when
//! `FORCE_OCR=1`, go through an [`OcrEngine`]; the default engine shells out to `pdftoppm` and
//! `tesseract`.

pub mod ocr;
pub mod structure;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ocr::{OcrEngine, TesseractCli};
pub use structure::{BookStructure, OutlineChapter, OutlineLesson, PageSection, StructureDetector};

/// Number of leading pages inspected when deciding whether a text layer exists.
const TEXT_LAYER_SAMPLE_PAGES: usize = 3;

/// PDF readers accept the header anywhere in the first kilobyte.
const HEADER_WINDOW: usize = 1024;

/// Extracted text of a single page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number.
    pub page_num: u32,
    /// Page text, possibly empty.
    pub text: String,
}

/// Options controlling how a PDF is turned into pages.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Use the embedded text layer when one is present.
    pub prefer_text: bool,
    /// Ignore the text layer and always run OCR.
    pub force_ocr: bool,
    /// Tesseract language code.
    pub lang: String,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            prefer_text: true,
            force_ocr: false,
            lang: "vie".to_string(),
        }
    }
}

/// Errors raised while extracting page text.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The input is not a readable PDF.
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),
    /// OCR tooling is not installed or not on `PATH`.
    #[error("OCR engine unavailable: {0}")]
    OcrUnavailable(String),
    /// OCR tooling ran but failed.
    #[error("OCR failed: {0}")]
    OcrFailed(String),
    /// Filesystem error while staging OCR inputs.
    #[error("I/O error during parsing: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether any of the first pages carries non-whitespace text.
pub fn has_text_layer(pages: &[String]) -> bool {
    pages
        .iter()
        .take(TEXT_LAYER_SAMPLE_PAGES)
        .any(|text| !text.trim().is_empty())
}

/// Reject input that carries no `%PDF-` header before any extraction or OCR runs.
pub fn check_pdf_header(bytes: &[u8]) -> Result<(), ParseError> {
    let window = &bytes[..bytes.len().min(HEADER_WINDOW)];
    if window.windows(5).any(|candidate| candidate == b"%PDF-") {
        Ok(())
    } else {
        Err(ParseError::InvalidPdf(
            "missing %PDF- header in the first kilobyte".to_string(),
        ))
    }
}

/// Extract per-page text from the PDF text layer.
pub async fn extract_text_pages(bytes: Vec<u8>) -> Result<Vec<String>, ParseError> {
    tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem_by_pages(&bytes)
            .map_err(|error| ParseError::InvalidPdf(error.to_string()))
    })
    .await
    .map_err(|error| ParseError::InvalidPdf(format!("text extraction task failed: {error}")))?
}

/// Turn PDF bytes into pages, choosing between the text layer and OCR.
pub async fn parse_pdf_bytes(
    bytes: Vec<u8>,
    options: &ParseOptions,
    ocr: &dyn OcrEngine,
) -> Result<Vec<Page>, ParseError> {
    check_pdf_header(&bytes)?;
    if options.prefer_text && !options.force_ocr {
        match extract_text_pages(bytes.clone()).await {
            Ok(texts) if has_text_layer(&texts) => {
                tracing::info!(pages = texts.len(), "Extracted text layer");
                return Ok(number_pages(texts));
            }
            Ok(texts) => {
                tracing::info!(pages = texts.len(), "No text layer detected; falling back to OCR");
            }
            Err(error) => {
                tracing::warn!(error = %error, "Text extraction failed; falling back to OCR");
            }
        }
    } else {
        tracing::info!(force_ocr = options.force_ocr, "Skipping text layer");
    }

    let texts = ocr.recognize(&bytes, &options.lang).await?;
    tracing::info!(pages = texts.len(), lang = %options.lang, "OCR completed");
    Ok(number_pages(texts))
}

fn number_pages(texts: Vec<String>) -> Vec<Page> {
    texts
        .into_iter()
        .zip(1u32..)
        .map(|(text, page_num)| Page { page_num, text })
        .collect()
}
