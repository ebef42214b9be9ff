//! Relational catalogue of grades, subjects, books, chapters, lessons and chunk rows.
//!
//! Backed by SQLite through `sqlx`. The schema is created on start-up; foreign keys carry the
//! book → chapter → lesson cascades, and chunk rows detach from deleted chapters and lessons.

mod books;
mod chunks;
mod grades;
pub mod ids;
mod sections;
mod subjects;
pub mod types;

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use thiserror::Error;
use time::OffsetDateTime;

pub use types::{
    Book, BookDeletion, BookStructure, BookSummary, BookUpdate, ChapterDraft, Chapter,
    ChapterUpdate, ChunkRecord, Grade, GradeUpdate, LessonContext, LessonDraft, Lesson,
    LessonPages, LessonUpdate, NewBook, NewChapter, NewGrade, NewLesson, NewSubject, Subject,
    SubjectUpdate,
};

/// Title used for chunks that sit outside any detected chapter or lesson.
pub const UNASSIGNED_SECTION: &str = "General";

/// Errors raised by catalogue operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Referenced record does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// Record with the same natural key already exists, or a delete guard tripped.
    #[error("{0}")]
    Conflict(String),
    /// Request carried nothing to apply or an unusable value.
    #[error("{0}")]
    Invalid(String),
    /// Database driver failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Database directory could not be prepared.
    #[error("Failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to the catalogue database.
#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Connect using a `sqlite://` URL, creating the file and schema when missing.
    pub async fn connect(database_url: &str) -> Result<Self, CatalogError> {
        let options = SqliteConnectOptions::from_str(database_url)?;
        Self::connect_with(options).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self, CatalogError> {
        if let Some(parent) = options.get_filename().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await?;

        let catalog = Self { pool };
        catalog.init_schema().await?;
        tracing::debug!("Catalogue schema ready");
        Ok(catalog)
    }

    async fn init_schema(&self) -> Result<(), CatalogError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS grades (
        grade_id TEXT PRIMARY KEY,
        grade_number INTEGER NOT NULL UNIQUE,
        grade_name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS subjects (
        subject_id TEXT PRIMARY KEY,
        subject_code TEXT NOT NULL UNIQUE,
        subject_name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS grade_subjects (
        grade_id TEXT NOT NULL REFERENCES grades(grade_id) ON DELETE CASCADE,
        subject_id TEXT NOT NULL REFERENCES subjects(subject_id) ON DELETE CASCADE,
        created_at TEXT NOT NULL,
        PRIMARY KEY (grade_id, subject_id)
    )",
    "CREATE TABLE IF NOT EXISTS books (
        book_id TEXT PRIMARY KEY,
        book_name TEXT NOT NULL,
        name_key TEXT NOT NULL,
        grade INTEGER NOT NULL,
        total_pages INTEGER NOT NULL DEFAULT 0,
        source_url TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (name_key, grade)
    )",
    "CREATE INDEX IF NOT EXISTS idx_books_name ON books(book_name)",
    "CREATE INDEX IF NOT EXISTS idx_books_grade ON books(grade)",
    "CREATE TABLE IF NOT EXISTS chapters (
        chapter_id TEXT PRIMARY KEY,
        book_id TEXT NOT NULL REFERENCES books(book_id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        title_key TEXT NOT NULL,
        position INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (book_id, title_key)
    )",
    "CREATE INDEX IF NOT EXISTS idx_chapters_book ON chapters(book_id, position)",
    "CREATE TABLE IF NOT EXISTS lessons (
        lesson_id TEXT PRIMARY KEY,
        chapter_id TEXT NOT NULL REFERENCES chapters(chapter_id) ON DELETE CASCADE,
        book_id TEXT NOT NULL REFERENCES books(book_id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        title_key TEXT NOT NULL,
        page INTEGER,
        position INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (chapter_id, title_key)
    )",
    "CREATE INDEX IF NOT EXISTS idx_lessons_chapter ON lessons(chapter_id, position)",
    "CREATE INDEX IF NOT EXISTS idx_lessons_book ON lessons(book_id)",
    "CREATE TABLE IF NOT EXISTS chunks (
        point_id TEXT PRIMARY KEY,
        chunk_id TEXT NOT NULL,
        book_id TEXT NOT NULL REFERENCES books(book_id) ON DELETE CASCADE,
        chapter_id TEXT REFERENCES chapters(chapter_id) ON DELETE SET NULL,
        lesson_id TEXT REFERENCES lessons(lesson_id) ON DELETE SET NULL,
        chapter TEXT,
        lesson TEXT,
        page INTEGER NOT NULL,
        text TEXT NOT NULL,
        embedding_index INTEGER NOT NULL,
        chunk_hash TEXT NOT NULL,
        UNIQUE (book_id, chunk_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_chunks_book ON chunks(book_id, embedding_index)",
];

/// `derived` when no row of `table` holds it yet, otherwise a freshly issued id.
///
/// Ids are derived from natural keys at creation and kept through renames, so a renamed record
/// may still hold the id its old key would derive.
pub(crate) async fn unused_id<'e, E>(
    executor: E,
    table: &str,
    column: &str,
    derived: String,
) -> Result<String, CatalogError>
where
    E: sqlx::SqliteExecutor<'e>,
{
    let sql = format!("SELECT 1 FROM {table} WHERE {column} = ?1");
    let taken = sqlx::query(&sql)
        .bind(&derived)
        .fetch_optional(executor)
        .await?
        .is_some();
    Ok(if taken { ids::reissue(&derived) } else { derived })
}

/// RFC3339 timestamp stored in `created_at` and `updated_at` columns.
pub(crate) fn now_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
