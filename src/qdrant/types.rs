//! Shared types used by the Qdrant client and helpers.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors returned while interacting with Qdrant.
#[derive(Debug, Error)]
pub enum QdrantError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Qdrant responded with an unexpected status code.
    #[error("Unexpected Qdrant response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Qdrant.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// Metadata stored next to every chunk vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Catalogue identifier of the owning book.
    pub book_id: String,
    /// Human-readable book name.
    pub book_name: String,
    /// Grade number the book belongs to.
    pub grade: u32,
    /// 1-based page number the chunk was cut from.
    pub page: u32,
    /// Catalogue identifier of the enclosing chapter, when detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<String>,
    /// Chapter heading, when detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    /// Catalogue identifier of the enclosing lesson, when detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson_id: Option<String>,
    /// Lesson heading, when detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson: Option<String>,
    /// Ordinal chunk label within the book (`chunk_000001`).
    pub chunk_id: String,
    /// 0-based position of the chunk within the book.
    pub embedding_index: u64,
    /// SHA-256 digest of the chunk text.
    pub chunk_hash: String,
    /// Chunk text.
    pub text: String,
    /// RFC3339 timestamp of the ingestion that wrote the point.
    #[serde(default)]
    pub indexed_at: String,
}

/// Prepared point ready for indexing.
#[derive(Debug, Clone)]
pub struct PointInsert {
    /// Point identifier (UUID) shared with the catalogue row.
    pub id: String,
    /// Embedding vector produced for the chunk.
    pub vector: Vec<f32>,
    /// Payload stored with the vector.
    pub payload: ChunkPayload,
}

/// Filters that can be applied to Qdrant searches and deletions.
#[derive(Debug, Default, Clone)]
pub struct SearchFilterArgs {
    /// Exact match constraint for the `book_id` payload field.
    pub book_id: Option<String>,
    /// Exact match constraint for the `chapter_id` payload field.
    pub chapter_id: Option<String>,
    /// Exact match constraint for the `lesson_id` payload field.
    pub lesson_id: Option<String>,
    /// Exact match constraint for the `grade` payload field.
    pub grade: Option<u32>,
}

/// Scored payload returned by Qdrant queries.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    /// Identifier assigned to the vector.
    pub id: String,
    /// Similarity score computed by Qdrant.
    pub score: f32,
    /// Optional payload associated with the vector.
    pub payload: Option<Map<String, Value>>,
}

/// Summary describing how Qdrant applied an indexing request.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexSummary {
    /// Number of points written by the request.
    pub upserted: usize,
}

#[derive(Deserialize)]
pub(crate) struct ListCollectionsResponse {
    pub(crate) result: ListCollectionsResult,
}

#[derive(Deserialize)]
pub(crate) struct ListCollectionsResult {
    pub(crate) collections: Vec<CollectionDescription>,
}

#[derive(Deserialize)]
pub(crate) struct CollectionDescription {
    pub(crate) name: String,
}

#[derive(Deserialize)]
pub(crate) struct QueryResponse {
    pub(crate) result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
pub(crate) struct QueryPoint {
    pub(crate) id: Value,
    pub(crate) score: f32,
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
pub(crate) struct CountResponse {
    pub(crate) result: CountResult,
}

#[derive(Deserialize)]
pub(crate) struct CountResult {
    pub(crate) count: u64,
}
