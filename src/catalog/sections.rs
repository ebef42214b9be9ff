//! Chapters and lessons.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::types::{
    Chapter, ChapterUpdate, Lesson, LessonContext, LessonUpdate, NewChapter, NewLesson,
};
use super::{Catalog, CatalogError, ids, now_timestamp, unused_id};

const CHAPTER_COLUMNS: &str = "chapter_id, book_id, title, position, created_at, updated_at";
const LESSON_COLUMNS: &str =
    "lesson_id, chapter_id, book_id, title, page, position, created_at, updated_at";

fn row_to_chapter(row: &SqliteRow) -> Result<Chapter, sqlx::Error> {
    Ok(Chapter {
        chapter_id: row.try_get("chapter_id")?,
        book_id: row.try_get("book_id")?,
        title: row.try_get("title")?,
        order: row.try_get("position")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_lesson(row: &SqliteRow) -> Result<Lesson, sqlx::Error> {
    Ok(Lesson {
        lesson_id: row.try_get("lesson_id")?,
        chapter_id: row.try_get("chapter_id")?,
        book_id: row.try_get("book_id")?,
        title: row.try_get("title")?,
        page: row.try_get("page")?,
        order: row.try_get("position")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Catalog {
    /// Create a chapter inside an existing book; titles are unique within a book.
    pub async fn create_chapter(&self, input: NewChapter) -> Result<Chapter, CatalogError> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(CatalogError::Invalid("title must not be empty".into()));
        }
        self.require_book(&input.book_id).await?;
        if self.chapter_title_taken(&input.book_id, title, None).await? {
            return Err(CatalogError::Conflict(format!(
                "Chapter '{title}' already exists in book '{}'",
                input.book_id
            )));
        }
        let chapter_id = unused_id(
            &self.pool,
            "chapters",
            "chapter_id",
            ids::chapter_id(&input.book_id, title),
        )
        .await?;

        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO chapters (chapter_id, book_id, title, title_key, position, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        )
        .bind(&chapter_id)
        .bind(&input.book_id)
        .bind(title)
        .bind(ids::name_key(title))
        .bind(input.order)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.require_chapter(&chapter_id).await
    }

    /// Look up a chapter by id.
    pub async fn get_chapter(&self, chapter_id: &str) -> Result<Option<Chapter>, CatalogError> {
        let row = sqlx::query(&format!(
            "SELECT {CHAPTER_COLUMNS} FROM chapters WHERE chapter_id = ?1"
        ))
        .bind(chapter_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_chapter).transpose()?)
    }

    /// Chapters ordered by position, optionally restricted to one book.
    pub async fn list_chapters(&self, book_id: Option<&str>) -> Result<Vec<Chapter>, CatalogError> {
        let rows = match book_id {
            Some(book_id) => {
                sqlx::query(&format!(
                    "SELECT {CHAPTER_COLUMNS} FROM chapters WHERE book_id = ?1 ORDER BY position, title"
                ))
                .bind(book_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {CHAPTER_COLUMNS} FROM chapters ORDER BY book_id, position, title"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.iter().map(row_to_chapter).collect::<Result<_, _>>()?)
    }

    /// Apply a partial chapter update; chunk rows follow a new title.
    pub async fn update_chapter(
        &self,
        chapter_id: &str,
        update: ChapterUpdate,
    ) -> Result<Chapter, CatalogError> {
        let existing = self.require_chapter(chapter_id).await?;
        if update.title.is_none() && update.order.is_none() {
            return Err(CatalogError::Invalid("No fields to update".into()));
        }
        let title = update
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .unwrap_or(&existing.title);
        if self
            .chapter_title_taken(&existing.book_id, title, Some(chapter_id))
            .await?
        {
            return Err(CatalogError::Conflict(format!(
                "Chapter '{title}' already exists in book '{}'",
                existing.book_id
            )));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE chapters SET title = ?2, title_key = ?3, position = ?4, updated_at = ?5
             WHERE chapter_id = ?1",
        )
        .bind(chapter_id)
        .bind(title)
        .bind(ids::name_key(title))
        .bind(update.order.unwrap_or(existing.order))
        .bind(now_timestamp())
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE chunks SET chapter = ?2 WHERE chapter_id = ?1")
            .bind(chapter_id)
            .bind(title)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.require_chapter(chapter_id).await
    }

    /// Delete a chapter and its lessons, returning how many lessons went with it.
    pub async fn delete_chapter(&self, chapter_id: &str) -> Result<u64, CatalogError> {
        self.require_chapter(chapter_id).await?;
        let mut tx = self.pool.begin().await?;
        let lessons = sqlx::query("DELETE FROM lessons WHERE chapter_id = ?1")
            .bind(chapter_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM chapters WHERE chapter_id = ?1")
            .bind(chapter_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(chapter_id, lessons, "Chapter deleted");
        Ok(lessons)
    }

    /// Create a lesson inside an existing chapter of the named book.
    pub async fn create_lesson(&self, input: NewLesson) -> Result<Lesson, CatalogError> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(CatalogError::Invalid("title must not be empty".into()));
        }
        let chapter = self.require_chapter(&input.chapter_id).await?;
        self.require_book(&input.book_id).await?;
        if chapter.book_id != input.book_id {
            return Err(CatalogError::Invalid(format!(
                "Chapter '{}' belongs to book '{}', not '{}'",
                chapter.chapter_id, chapter.book_id, input.book_id
            )));
        }
        if self
            .lesson_title_taken(&input.chapter_id, title, None)
            .await?
        {
            return Err(CatalogError::Conflict(format!(
                "Lesson '{title}' already exists in chapter '{}'",
                input.chapter_id
            )));
        }
        let lesson_id = unused_id(
            &self.pool,
            "lessons",
            "lesson_id",
            ids::lesson_id(&input.chapter_id, title),
        )
        .await?;

        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO lessons (lesson_id, chapter_id, book_id, title, title_key, page, position, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        )
        .bind(&lesson_id)
        .bind(&input.chapter_id)
        .bind(&input.book_id)
        .bind(title)
        .bind(ids::name_key(title))
        .bind(input.page)
        .bind(input.order)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.require_lesson(&lesson_id).await
    }

    /// Look up a lesson by id.
    pub async fn get_lesson(&self, lesson_id: &str) -> Result<Option<Lesson>, CatalogError> {
        let row = sqlx::query(&format!(
            "SELECT {LESSON_COLUMNS} FROM lessons WHERE lesson_id = ?1"
        ))
        .bind(lesson_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_lesson).transpose()?)
    }

    /// Lessons of a chapter, else of a book, else all lessons; ordered by position.
    pub async fn list_lessons(
        &self,
        chapter_id: Option<&str>,
        book_id: Option<&str>,
    ) -> Result<Vec<Lesson>, CatalogError> {
        let (clause, key) = match (chapter_id, book_id) {
            (Some(chapter_id), _) => ("WHERE chapter_id = ?1", Some(chapter_id)),
            (None, Some(book_id)) => ("WHERE book_id = ?1", Some(book_id)),
            (None, None) => ("", None),
        };
        let sql = format!("SELECT {LESSON_COLUMNS} FROM lessons {clause} ORDER BY position, title");
        let mut query = sqlx::query(&sql);
        if let Some(key) = key {
            query = query.bind(key);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_lesson).collect::<Result<_, _>>()?)
    }

    /// Apply a partial lesson update; chunk rows follow a new title.
    pub async fn update_lesson(
        &self,
        lesson_id: &str,
        update: LessonUpdate,
    ) -> Result<Lesson, CatalogError> {
        let existing = self.require_lesson(lesson_id).await?;
        if update.title.is_none() && update.page.is_none() && update.order.is_none() {
            return Err(CatalogError::Invalid("No fields to update".into()));
        }
        let title = update
            .title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .unwrap_or(&existing.title);
        if self
            .lesson_title_taken(&existing.chapter_id, title, Some(lesson_id))
            .await?
        {
            return Err(CatalogError::Conflict(format!(
                "Lesson '{title}' already exists in chapter '{}'",
                existing.chapter_id
            )));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE lessons SET title = ?2, title_key = ?3, page = ?4, position = ?5, updated_at = ?6
             WHERE lesson_id = ?1",
        )
        .bind(lesson_id)
        .bind(title)
        .bind(ids::name_key(title))
        .bind(update.page.or(existing.page))
        .bind(update.order.unwrap_or(existing.order))
        .bind(now_timestamp())
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE chunks SET lesson = ?2 WHERE lesson_id = ?1")
            .bind(lesson_id)
            .bind(title)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.require_lesson(lesson_id).await
    }

    /// Delete a lesson; chunk rows keep their text but lose the lesson link.
    pub async fn delete_lesson(&self, lesson_id: &str) -> Result<(), CatalogError> {
        let result = sqlx::query("DELETE FROM lessons WHERE lesson_id = ?1")
            .bind(lesson_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound(format!("Lesson '{lesson_id}'")));
        }
        tracing::info!(lesson_id, "Lesson deleted");
        Ok(())
    }

    /// Lesson with its chapter and book, for building retrieval queries.
    pub async fn lesson_context(
        &self,
        lesson_id: &str,
    ) -> Result<Option<LessonContext>, CatalogError> {
        let row = sqlx::query(
            "SELECT l.lesson_id AS lesson_id, l.title AS name, c.title AS chapter,
                    b.book_id AS book_id, b.book_name AS book_name, b.grade AS grade
             FROM lessons l
             JOIN chapters c ON c.chapter_id = l.chapter_id
             JOIN books b ON b.book_id = l.book_id
             WHERE l.lesson_id = ?1",
        )
        .bind(lesson_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(LessonContext {
            lesson_id: row.try_get("lesson_id")?,
            name: row.try_get("name")?,
            chapter: row.try_get("chapter")?,
            book_id: row.try_get("book_id")?,
            book_name: row.try_get("book_name")?,
            grade: row.try_get("grade")?,
        }))
    }

    async fn chapter_title_taken(
        &self,
        book_id: &str,
        title: &str,
        except: Option<&str>,
    ) -> Result<bool, CatalogError> {
        let taken = sqlx::query(
            "SELECT 1 FROM chapters
             WHERE book_id = ?1 AND title_key = ?2 AND (?3 IS NULL OR chapter_id != ?3)",
        )
        .bind(book_id)
        .bind(ids::name_key(title))
        .bind(except)
        .fetch_optional(&self.pool)
        .await?
        .is_some();
        Ok(taken)
    }

    async fn lesson_title_taken(
        &self,
        chapter_id: &str,
        title: &str,
        except: Option<&str>,
    ) -> Result<bool, CatalogError> {
        let taken = sqlx::query(
            "SELECT 1 FROM lessons
             WHERE chapter_id = ?1 AND title_key = ?2 AND (?3 IS NULL OR lesson_id != ?3)",
        )
        .bind(chapter_id)
        .bind(ids::name_key(title))
        .bind(except)
        .fetch_optional(&self.pool)
        .await?
        .is_some();
        Ok(taken)
    }

    pub(crate) async fn require_chapter(&self, chapter_id: &str) -> Result<Chapter, CatalogError> {
        self.get_chapter(chapter_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("Chapter '{chapter_id}'")))
    }

    pub(crate) async fn require_lesson(&self, lesson_id: &str) -> Result<Lesson, CatalogError> {
        self.get_lesson(lesson_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("Lesson '{lesson_id}'")))
    }
}
