//! Retrieval-augmented outline generation: query text, prompt and response assembly.
//!
//! The service embeds the query and searches Qdrant; everything here is pure so the prompt
//! and response shape can be tested without a model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::LessonContext;

/// Chunks quoted in the prompt.
pub const PROMPT_CHUNKS: usize = 5;
/// Characters kept from each quoted chunk.
pub const PROMPT_CHUNK_CHARS: usize = 1200;
/// Hits reported back as sources.
pub const SOURCE_COUNT: usize = 3;
/// `k` used when a request omits it.
pub const DEFAULT_K: usize = 8;

/// System message sent with every outline request.
pub const SYSTEM_PROMPT: &str =
    "You are a teaching assistant who drafts lesson outlines from textbook content.";

fn default_k() -> usize {
    DEFAULT_K
}

/// Body of `POST /rag/query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagRequest {
    /// Lesson to plan for; unknown ids resolve to an empty lesson.
    pub lesson_id: String,
    /// Free-form guidance from the teacher, appended to the query.
    #[serde(default)]
    pub teacher_notes: String,
    /// Number of chunks to retrieve before confidence filtering.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Restrict retrieval to one book.
    #[serde(default)]
    pub book_id: Option<String>,
}

/// Provenance of a retrieved chunk reported to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Book display name.
    pub book: String,
    /// Pages the chunk came from.
    pub pages: Vec<u32>,
    /// Similarity score rounded to four decimals.
    pub confidence: f64,
}

/// Body returned by `POST /rag/query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagResponse {
    /// Outline produced by the chat model, with `sources` injected.
    pub outline: Value,
    /// Top sources backing the outline.
    pub sources: Vec<Source>,
    /// `embedding_index` of every retained hit, in rank order.
    pub indices: Vec<u64>,
    /// `1 - score` of every retained hit, in rank order.
    pub distances: Vec<f32>,
}

/// Chunk returned by the vector search with its stored payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    /// Qdrant point id.
    pub point_id: String,
    /// Catalogue id of the source book.
    pub book_id: String,
    /// Book display name.
    pub book_name: String,
    /// Source page.
    pub page: u32,
    /// Chunk text.
    pub text: String,
    /// Ordinal of the chunk within its book.
    pub embedding_index: u64,
    /// Cosine similarity reported by Qdrant.
    pub score: f32,
}

/// Lesson fields that shape the query and the prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LessonInfo {
    /// Lesson title.
    pub name: String,
    /// Grade number, when known.
    pub grade: Option<u32>,
    /// Chapter title.
    pub chapter: String,
    /// Book that owns the lesson.
    pub book_id: Option<String>,
}

impl From<LessonContext> for LessonInfo {
    fn from(context: LessonContext) -> Self {
        Self {
            name: context.name,
            grade: Some(context.grade),
            chapter: context.chapter,
            book_id: Some(context.book_id),
        }
    }
}

/// `"{lesson name} {teacher notes}"`, trimmed. `None` when nothing is left to search for.
pub fn build_query_text(lesson: &LessonInfo, teacher_notes: &str) -> Option<String> {
    let query = format!("{} {}", lesson.name, teacher_notes);
    let query = query.trim();
    (!query.is_empty()).then(|| query.to_string())
}

/// Clamp a requested `k` into `1..=max_k`.
pub fn clamp_k(k: usize, max_k: usize) -> usize {
    k.clamp(1, max_k.max(1))
}

/// Keep at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// User prompt asking for a JSON outline grounded in the retrieved chunks.
pub fn build_prompt(lesson: &LessonInfo, teacher_notes: &str, chunks: &[RetrievedChunk]) -> String {
    let context = chunks
        .iter()
        .take(PROMPT_CHUNKS)
        .map(|chunk| {
            format!(
                "[Source: {}, page {}]\n{}",
                chunk.book_name,
                chunk.page,
                truncate_chars(&chunk.text, PROMPT_CHUNK_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let grade = lesson
        .grade
        .map(|grade| format!(" (Grade {grade})"))
        .unwrap_or_default();

    format!(
        r#"You are an experienced teacher. Use the following textbook content:

{context}

Create a lesson outline for "{name}"{grade} with 5-10 sections.
Requirements:
- Each section has a title and 3-5 bullet points
- Add real-world examples following the teacher's notes: "{teacher_notes}"
- Respond in JSON:
{{
  "sections": [
    {{"title": "...", "bullets": ["..."], "examples": ["..."]}}
  ]
}}
"#,
        name = lesson.name,
    )
}

fn round4(value: f32) -> f64 {
    (f64::from(value) * 10_000.0).round() / 10_000.0
}

/// First [`SOURCE_COUNT`] hits as client-facing sources.
pub fn build_sources(chunks: &[RetrievedChunk]) -> Vec<Source> {
    chunks
        .iter()
        .take(SOURCE_COUNT)
        .map(|chunk| Source {
            book: chunk.book_name.clone(),
            pages: vec![chunk.page],
            confidence: round4(chunk.score),
        })
        .collect()
}

/// Attach sources to the model outline and derive indices and distances from the hits.
pub fn assemble_response(mut outline: Value, chunks: &[RetrievedChunk]) -> RagResponse {
    let sources = build_sources(chunks);
    if let Value::Object(map) = &mut outline {
        map.insert(
            "sources".into(),
            serde_json::to_value(&sources).unwrap_or(Value::Null),
        );
    }
    RagResponse {
        outline,
        sources,
        indices: chunks.iter().map(|chunk| chunk.embedding_index).collect(),
        distances: chunks.iter().map(|chunk| 1.0 - chunk.score).collect(),
    }
}
