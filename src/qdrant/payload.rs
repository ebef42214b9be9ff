//! Helpers for constructing and decoding chunk payloads.

use crate::qdrant::types::ChunkPayload;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

/// Serialize a chunk payload into the JSON object stored by Qdrant.
pub(crate) fn build_payload(payload: &ChunkPayload) -> Value {
    serde_json::to_value(payload).unwrap_or_else(|error| {
        tracing::warn!(chunk_id = %payload.chunk_id, error = %error, "Falling back to minimal payload");
        let mut map = Map::new();
        map.insert("book_id".into(), Value::String(payload.book_id.clone()));
        map.insert("text".into(), Value::String(payload.text.clone()));
        Value::Object(map)
    })
}

/// Decode a payload map returned by Qdrant into a typed chunk payload.
pub fn parse_payload(map: Map<String, Value>) -> Option<ChunkPayload> {
    match serde_json::from_value(Value::Object(map)) {
        Ok(payload) => Some(payload),
        Err(error) => {
            tracing::debug!(error = %error, "Ignoring point with unexpected payload shape");
            None
        }
    }
}

/// Compute a deterministic SHA-256 hash for the chunk text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Current timestamp formatted for payload storage.
pub fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Construct an identifier suitable for Qdrant points.
pub fn generate_point_id() -> String {
    Uuid::new_v4().to_string()
}
