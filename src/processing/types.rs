//! Core data types and error definitions for the processing pipeline.

use crate::{
    catalog::{BookDeletion, BookStructure, CatalogError},
    embedding::EmbeddingClientError,
    generation::ChatClientError,
    parser::ParseError,
    qdrant::QdrantError,
};
use anyhow::Error as TokenizerError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while turning raw text into semantic chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Ingestion configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Embedding model we attempted to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// Errors emitted by the ingestion and query pipelines.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// PDF could not be turned into pages.
    #[error("Failed to parse PDF: {0}")]
    Parse(#[from] ParseError),
    /// Chunking step failed to segment the document.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding provider failed to produce vectors for the input text.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Chat model failed to produce an outline.
    #[error("Failed to generate outline: {0}")]
    Chat(#[from] ChatClientError),
    /// Qdrant interaction failed.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// Catalogue read or write failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// Source PDF could not be fetched.
    #[error("Failed to download PDF: {0}")]
    Download(String),
    /// Parsing succeeded but produced no usable text.
    #[error("No text could be extracted from '{0}'")]
    EmptyDocument(String),
    /// Referenced book or lesson does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// Request collides with existing state.
    #[error("{0}")]
    Conflict(String),
    /// Request is malformed.
    #[error("{0}")]
    BadRequest(String),
    /// No retrieved chunk reached the confidence threshold.
    #[error("No indexed content reached the minimum confidence of {threshold}")]
    InsufficientContext {
        /// Threshold that every hit fell below.
        threshold: f32,
    },
    /// Returned embedding dimension does not match configuration.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected embedding dimension configured on the server.
        expected: usize,
        /// Actual embedding dimension produced by the provider.
        actual: usize,
    },
}

/// Parameters of an ingestion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    /// HTTP(S) or `file://` location of the PDF.
    pub pdf_url: String,
    /// Display name of the book.
    pub book_name: String,
    /// Grade number the book belongs to.
    pub grade: u32,
}

/// Summary of a completed ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    /// Always `"completed"` for successful runs.
    pub status: String,
    /// Deterministic id of the ingested book.
    pub book_id: String,
    /// Number of chunk rows written.
    pub chunks_created: usize,
    /// Number of vectors written to Qdrant.
    pub embeddings_indexed: usize,
    /// Page count of the source PDF.
    pub total_pages: usize,
    /// Wall-clock duration of the run in whole seconds.
    pub duration_seconds: u64,
    /// Chunks dropped because their text repeated an earlier chunk.
    pub skipped_duplicates: usize,
}

/// Chapter/lesson view of a stored book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookStructureView {
    /// Book display name.
    pub book: String,
    /// Book id.
    pub book_id: String,
    /// Chapter → lesson → pages and chunk count.
    pub structure: BookStructure,
}

/// Outcome of removing a book from the catalogue and the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct BookRemoval {
    /// Book display name.
    pub book_name: String,
    /// Book id.
    pub book_id: String,
    /// Rows removed from the catalogue.
    pub deleted: BookDeletion,
}
