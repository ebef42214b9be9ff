//! Records and request shapes stored in the catalogue.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// School grade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grade {
    /// Id derived from the grade number at creation; kept when the grade is renumbered.
    pub grade_id: String,
    /// Grade number (unique).
    pub grade_number: u32,
    /// Display name.
    pub grade_name: String,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// Payload for creating a grade.
#[derive(Debug, Clone, Deserialize)]
pub struct NewGrade {
    /// Grade number.
    pub grade_number: u32,
    /// Display name.
    pub grade_name: String,
}

/// Partial grade update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GradeUpdate {
    /// New grade number.
    pub grade_number: Option<u32>,
    /// New display name.
    pub grade_name: Option<String>,
}

/// Teaching subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Id derived from the lowercased code at creation; kept when the code changes.
    pub subject_id: String,
    /// Short code such as `math`.
    pub subject_code: String,
    /// Display name.
    pub subject_name: String,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// Payload for creating a subject.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSubject {
    /// Short code.
    pub subject_code: String,
    /// Display name.
    pub subject_name: String,
}

/// Partial subject update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubjectUpdate {
    /// New code.
    pub subject_code: Option<String>,
    /// New display name.
    pub subject_name: Option<String>,
}

/// Textbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Id derived from name and grade at creation; kept through renames.
    pub book_id: String,
    /// Display name.
    pub book_name: String,
    /// Grade number.
    pub grade: u32,
    /// Page count of the last ingested PDF.
    pub total_pages: u32,
    /// Where the PDF was downloaded from.
    pub source_url: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// Payload for creating a book.
#[derive(Debug, Clone, Deserialize)]
pub struct NewBook {
    /// Display name.
    pub book_name: String,
    /// Grade number; the grade must exist.
    pub grade: u32,
    /// Page count.
    #[serde(default)]
    pub total_pages: u32,
    /// Source URL of the PDF.
    #[serde(default)]
    pub source_url: Option<String>,
}

/// Partial book update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookUpdate {
    /// New display name.
    pub book_name: Option<String>,
    /// New grade number; the grade must exist.
    pub grade: Option<u32>,
}

/// Chapter of a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// Id derived from the book id and title at creation; kept through renames.
    pub chapter_id: String,
    /// Owning book.
    pub book_id: String,
    /// Heading text.
    pub title: String,
    /// Position within the book.
    pub order: i64,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// Payload for creating a chapter.
#[derive(Debug, Clone, Deserialize)]
pub struct NewChapter {
    /// Owning book; must exist.
    pub book_id: String,
    /// Heading text.
    pub title: String,
    /// Position within the book.
    #[serde(default)]
    pub order: i64,
}

/// Partial chapter update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChapterUpdate {
    /// New heading text.
    pub title: Option<String>,
    /// New position.
    pub order: Option<i64>,
}

/// Lesson inside a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    /// Id derived from the chapter id and title at creation; kept through renames.
    pub lesson_id: String,
    /// Enclosing chapter.
    pub chapter_id: String,
    /// Owning book.
    pub book_id: String,
    /// Heading text.
    pub title: String,
    /// First page of the lesson.
    pub page: Option<u32>,
    /// Position within the chapter.
    pub order: i64,
    /// Creation timestamp.
    pub created_at: String,
    /// Last update timestamp.
    pub updated_at: String,
}

/// Payload for creating a lesson.
#[derive(Debug, Clone, Deserialize)]
pub struct NewLesson {
    /// Enclosing chapter; must exist.
    pub chapter_id: String,
    /// Owning book; must exist.
    pub book_id: String,
    /// Heading text.
    pub title: String,
    /// First page.
    #[serde(default)]
    pub page: Option<u32>,
    /// Position within the chapter.
    #[serde(default)]
    pub order: i64,
}

/// Partial lesson update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LessonUpdate {
    /// New heading text.
    pub title: Option<String>,
    /// New first page.
    pub page: Option<u32>,
    /// New position.
    pub order: Option<i64>,
}

/// Lesson plus the chapter and book it belongs to, used to build RAG queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonContext {
    /// Lesson id.
    pub lesson_id: String,
    /// Lesson heading.
    pub name: String,
    /// Chapter heading.
    pub chapter: String,
    /// Owning book id.
    pub book_id: String,
    /// Owning book name.
    pub book_name: String,
    /// Grade number of the book.
    pub grade: u32,
}

/// Chunk row mirroring a Qdrant point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Vector id in Qdrant.
    pub point_id: String,
    /// Ordinal label within the book.
    pub chunk_id: String,
    /// Owning book.
    pub book_id: String,
    /// Enclosing chapter id, when detected.
    pub chapter_id: Option<String>,
    /// Enclosing lesson id, when detected.
    pub lesson_id: Option<String>,
    /// Chapter heading, when detected.
    pub chapter: Option<String>,
    /// Lesson heading, when detected.
    pub lesson: Option<String>,
    /// 1-based page.
    pub page: u32,
    /// Chunk text.
    pub text: String,
    /// 0-based ordinal within the book.
    pub embedding_index: u64,
    /// SHA-256 of the text.
    pub chunk_hash: String,
}

/// Lesson detected during ingestion, with its precomputed id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonDraft {
    /// Deterministic lesson id.
    pub lesson_id: String,
    /// Heading text.
    pub title: String,
    /// Page the heading was found on.
    pub page: u32,
    /// Position within the chapter.
    pub order: i64,
}

/// Chapter detected during ingestion, with its lessons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterDraft {
    /// Deterministic chapter id.
    pub chapter_id: String,
    /// Heading text.
    pub title: String,
    /// Position within the book.
    pub order: i64,
    /// Lessons in order.
    pub lessons: Vec<LessonDraft>,
}

/// Per-book aggregate shown by the ingestion listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookSummary {
    /// Grade number.
    pub grade: u32,
    /// Chunk rows stored for the book.
    pub chunks: u64,
    /// Page count.
    pub pages: u32,
}

/// Pages and chunk count of one lesson in the structure view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LessonPages {
    /// Distinct pages, ascending.
    pub pages: Vec<u32>,
    /// Number of chunks.
    pub chunks: u64,
}

/// Chapter → lesson → pages view of a book.
pub type BookStructure = BTreeMap<String, BTreeMap<String, LessonPages>>;

/// Rows removed by a book deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BookDeletion {
    /// Chapters removed.
    pub chapters: u64,
    /// Lessons removed.
    pub lessons: u64,
    /// Chunk rows removed.
    pub chunks: u64,
}
