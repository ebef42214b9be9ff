//! Chunk rows and the structure view derived from them.

use std::collections::HashMap;

use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use super::types::{BookStructure, ChapterDraft, ChunkRecord, LessonDraft};
use super::{Catalog, CatalogError, UNASSIGNED_SECTION, ids, now_timestamp, unused_id};

const CHUNK_COLUMNS: &str = "point_id, chunk_id, book_id, chapter_id, lesson_id, chapter, lesson, \
                             page, text, embedding_index, chunk_hash";

fn row_to_chunk(row: &SqliteRow) -> Result<ChunkRecord, sqlx::Error> {
    let embedding_index: i64 = row.try_get("embedding_index")?;
    Ok(ChunkRecord {
        point_id: row.try_get("point_id")?,
        chunk_id: row.try_get("chunk_id")?,
        book_id: row.try_get("book_id")?,
        chapter_id: row.try_get("chapter_id")?,
        lesson_id: row.try_get("lesson_id")?,
        chapter: row.try_get("chapter")?,
        lesson: row.try_get("lesson")?,
        page: row.try_get("page")?,
        text: row.try_get("text")?,
        embedding_index: u64::try_from(embedding_index).unwrap_or_default(),
        chunk_hash: row.try_get("chunk_hash")?,
    })
}

/// Point drafts at the chapters and lessons already stored under the same titles.
///
/// New sections keep their derived id unless a renamed record holds it. Returns the resolved
/// drafts and the draft ids that changed.
async fn resolve_drafts(
    conn: &mut SqliteConnection,
    book_id: &str,
    drafts: &[ChapterDraft],
) -> Result<(Vec<ChapterDraft>, HashMap<String, String>), CatalogError> {
    let mut moved = HashMap::new();
    let mut resolved = Vec::with_capacity(drafts.len());

    for draft in drafts {
        let stored = sqlx::query(
            "SELECT chapter_id FROM chapters WHERE book_id = ?1 AND title_key = ?2",
        )
        .bind(book_id)
        .bind(ids::name_key(&draft.title))
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| row.try_get::<String, _>("chapter_id"))
        .transpose()?;
        let chapter_id = match stored {
            Some(id) => id,
            None => unused_id(&mut *conn, "chapters", "chapter_id", draft.chapter_id.clone()).await?,
        };

        let mut lessons = Vec::with_capacity(draft.lessons.len());
        for lesson in &draft.lessons {
            let stored = sqlx::query(
                "SELECT lesson_id FROM lessons WHERE chapter_id = ?1 AND title_key = ?2",
            )
            .bind(&chapter_id)
            .bind(ids::name_key(&lesson.title))
            .fetch_optional(&mut *conn)
            .await?
            .map(|row| row.try_get::<String, _>("lesson_id"))
            .transpose()?;
            let lesson_id = match stored {
                Some(id) => id,
                None => {
                    let derived = if chapter_id == draft.chapter_id {
                        lesson.lesson_id.clone()
                    } else {
                        ids::lesson_id(&chapter_id, &lesson.title)
                    };
                    unused_id(&mut *conn, "lessons", "lesson_id", derived).await?
                }
            };
            if lesson_id != lesson.lesson_id {
                moved.insert(lesson.lesson_id.clone(), lesson_id.clone());
            }
            lessons.push(LessonDraft {
                lesson_id,
                ..lesson.clone()
            });
        }

        if chapter_id != draft.chapter_id {
            moved.insert(draft.chapter_id.clone(), chapter_id.clone());
        }
        resolved.push(ChapterDraft {
            chapter_id,
            lessons,
            ..draft.clone()
        });
    }
    Ok((resolved, moved))
}

impl Catalog {
    /// Resolve detected chapters and lessons against the stored ones, by title.
    ///
    /// Ingestion calls this before building vector payloads so they carry the stored ids.
    pub async fn resolve_outline(
        &self,
        book_id: &str,
        drafts: &[ChapterDraft],
    ) -> Result<Vec<ChapterDraft>, CatalogError> {
        let mut conn = self.pool.acquire().await?;
        let (resolved, _) = resolve_drafts(&mut *conn, book_id, drafts).await?;
        Ok(resolved)
    }

    /// Upsert the detected outline and replace every chunk row of a book in one transaction.
    ///
    /// Drafts are resolved by title first, and chunk section ids follow any draft id that
    /// changed. Returns the point ids of the chunk rows that were replaced.
    pub async fn replace_book_content(
        &self,
        book_id: &str,
        chapters: &[ChapterDraft],
        chunks: &[ChunkRecord],
    ) -> Result<Vec<String>, CatalogError> {
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;
        let (chapters, moved) = resolve_drafts(&mut *tx, book_id, chapters).await?;

        for chapter in &chapters {
            sqlx::query(
                "INSERT INTO chapters (chapter_id, book_id, title, title_key, position, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(chapter_id) DO UPDATE SET
                    title = excluded.title,
                    title_key = excluded.title_key,
                    position = excluded.position,
                    updated_at = excluded.updated_at",
            )
            .bind(&chapter.chapter_id)
            .bind(book_id)
            .bind(&chapter.title)
            .bind(ids::name_key(&chapter.title))
            .bind(chapter.order)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            for lesson in &chapter.lessons {
                sqlx::query(
                    "INSERT INTO lessons (lesson_id, chapter_id, book_id, title, title_key, page, position, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                     ON CONFLICT(lesson_id) DO UPDATE SET
                        title = excluded.title,
                        title_key = excluded.title_key,
                        page = excluded.page,
                        position = excluded.position,
                        updated_at = excluded.updated_at",
                )
                .bind(&lesson.lesson_id)
                .bind(&chapter.chapter_id)
                .bind(book_id)
                .bind(&lesson.title)
                .bind(ids::name_key(&lesson.title))
                .bind(lesson.page)
                .bind(lesson.order)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }
        }
        let section = |id: Option<&str>| -> Option<String> {
            id.map(|id| moved.get(id).cloned().unwrap_or_else(|| id.to_string()))
        };

        let previous: Vec<String> = sqlx::query("SELECT point_id FROM chunks WHERE book_id = ?1")
            .bind(book_id)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| row.try_get("point_id"))
            .collect::<Result<_, _>>()?;
        sqlx::query("DELETE FROM chunks WHERE book_id = ?1")
            .bind(book_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (point_id, chunk_id, book_id, chapter_id, lesson_id, chapter, lesson,
                                     page, text, embedding_index, chunk_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )
            .bind(&chunk.point_id)
            .bind(&chunk.chunk_id)
            .bind(book_id)
            .bind(section(chunk.chapter_id.as_deref()))
            .bind(section(chunk.lesson_id.as_deref()))
            .bind(chunk.chapter.as_deref())
            .bind(chunk.lesson.as_deref())
            .bind(chunk.page)
            .bind(&chunk.text)
            .bind(i64::try_from(chunk.embedding_index).unwrap_or(i64::MAX))
            .bind(&chunk.chunk_hash)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(
            book_id,
            chapters = chapters.len(),
            chunks = chunks.len(),
            replaced = previous.len(),
            "Book content replaced"
        );
        Ok(previous)
    }

    /// Number of chunk rows stored for a book.
    pub async fn count_chunks(&self, book_id: &str) -> Result<u64, CatalogError> {
        let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM chunks WHERE book_id = ?1")
            .bind(book_id)
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    /// Chunk rows for the given point ids, in the order the ids were supplied.
    ///
    /// Ids without a row are skipped.
    pub async fn chunks_by_point_ids(
        &self,
        point_ids: &[String],
    ) -> Result<Vec<ChunkRecord>, CatalogError> {
        if point_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=point_ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE point_id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in point_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut by_id: HashMap<String, ChunkRecord> = rows
            .iter()
            .map(|row| row_to_chunk(row).map(|chunk| (chunk.point_id.clone(), chunk)))
            .collect::<Result<_, _>>()?;
        Ok(point_ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Chapter → lesson → `{pages, chunks}` aggregation over a book's chunk rows.
    pub async fn book_structure(&self, book_id: &str) -> Result<BookStructure, CatalogError> {
        let rows = sqlx::query(
            "SELECT COALESCE(chapter, ?2) AS chapter, COALESCE(lesson, ?2) AS lesson,
                    page, COUNT(*) AS chunk_count
             FROM chunks WHERE book_id = ?1
             GROUP BY 1, 2, page
             ORDER BY page",
        )
        .bind(book_id)
        .bind(UNASSIGNED_SECTION)
        .fetch_all(&self.pool)
        .await?;

        let mut structure = BookStructure::new();
        for row in &rows {
            let chapter: String = row.try_get("chapter")?;
            let lesson: String = row.try_get("lesson")?;
            let page: u32 = row.try_get("page")?;
            let count: i64 = row.try_get("chunk_count")?;

            let entry = structure
                .entry(chapter)
                .or_default()
                .entry(lesson)
                .or_default();
            if !entry.pages.contains(&page) {
                entry.pages.push(page);
            }
            entry.chunks += u64::try_from(count).unwrap_or_default();
        }
        Ok(structure)
    }
}
