//! Qdrant vector store integration.

pub mod client;
pub mod filters;
pub mod payload;
pub mod types;

pub use client::QdrantService;
pub use filters::{book_filter, build_search_filter, stale_points_filter};
pub use payload::{compute_chunk_hash, current_timestamp_rfc3339, generate_point_id, parse_payload};
pub use types::{
    ChunkPayload, IndexSummary, PointInsert, QdrantError, ScoredPoint, SearchFilterArgs,
};
