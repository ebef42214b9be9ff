use std::collections::BTreeMap;

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::types::{Book, BookDeletion, BookSummary, BookUpdate, NewBook};
use super::{Catalog, CatalogError, ids, now_timestamp, unused_id};

const BOOK_COLUMNS: &str =
    "book_id, book_name, grade, total_pages, source_url, created_at, updated_at";

fn row_to_book(row: &SqliteRow) -> Result<Book, sqlx::Error> {
    Ok(Book {
        book_id: row.try_get("book_id")?,
        book_name: row.try_get("book_name")?,
        grade: row.try_get("grade")?,
        total_pages: row.try_get("total_pages")?,
        source_url: row.try_get("source_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Catalog {
    /// Create a book for an existing grade; the name must be new within that grade.
    pub async fn create_book(&self, input: NewBook) -> Result<Book, CatalogError> {
        let name = input.book_name.trim();
        if name.is_empty() {
            return Err(CatalogError::Invalid("book_name must not be empty".into()));
        }
        if self.get_grade_by_number(input.grade).await?.is_none() {
            return Err(CatalogError::NotFound(format!("Grade number {}", input.grade)));
        }
        if self.book_by_key(name, input.grade).await?.is_some() {
            return Err(CatalogError::Conflict(format!(
                "Book '{name}' already exists for grade {}",
                input.grade
            )));
        }
        let book_id =
            unused_id(&self.pool, "books", "book_id", ids::book_id(name, input.grade)).await?;

        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO books (book_id, book_name, name_key, grade, total_pages, source_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        )
        .bind(&book_id)
        .bind(name)
        .bind(ids::name_key(name))
        .bind(input.grade)
        .bind(input.total_pages)
        .bind(input.source_url.as_deref())
        .bind(&now)
        .execute(&self.pool)
        .await?;

        tracing::info!(book_id = %book_id, book = name, grade = input.grade, "Book created");
        self.require_book(&book_id).await
    }

    /// Insert or refresh a book during ingestion, keeping its id, display name and creation time.
    pub async fn upsert_book(
        &self,
        book_name: &str,
        grade: u32,
        total_pages: u32,
        source_url: Option<&str>,
    ) -> Result<Book, CatalogError> {
        let name = book_name.trim();
        let now = now_timestamp();
        if let Some(existing) = self.book_by_key(name, grade).await? {
            sqlx::query(
                "UPDATE books SET total_pages = ?2, source_url = ?3, updated_at = ?4
                 WHERE book_id = ?1",
            )
            .bind(&existing.book_id)
            .bind(total_pages)
            .bind(source_url)
            .bind(&now)
            .execute(&self.pool)
            .await?;
            return self.require_book(&existing.book_id).await;
        }

        let book_id = unused_id(&self.pool, "books", "book_id", ids::book_id(name, grade)).await?;
        sqlx::query(
            "INSERT INTO books (book_id, book_name, name_key, grade, total_pages, source_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        )
        .bind(&book_id)
        .bind(name)
        .bind(ids::name_key(name))
        .bind(grade)
        .bind(total_pages)
        .bind(source_url)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.require_book(&book_id).await
    }

    /// Look up a book by id.
    pub async fn get_book(&self, book_id: &str) -> Result<Option<Book>, CatalogError> {
        let row = sqlx::query(&format!("SELECT {BOOK_COLUMNS} FROM books WHERE book_id = ?1"))
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_book).transpose()?)
    }

    /// Look up the most recently updated book with this name, ignoring case and spacing.
    pub async fn get_book_by_name(&self, book_name: &str) -> Result<Option<Book>, CatalogError> {
        let row = sqlx::query(&format!(
            "SELECT {BOOK_COLUMNS} FROM books WHERE name_key = ?1 ORDER BY updated_at DESC LIMIT 1"
        ))
        .bind(ids::name_key(book_name))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_book).transpose()?)
    }

    /// Resolve a path segment that may be either a book id or a book name.
    pub async fn find_book(&self, name_or_id: &str) -> Result<Option<Book>, CatalogError> {
        match self.get_book(name_or_id).await? {
            Some(book) => Ok(Some(book)),
            None => self.get_book_by_name(name_or_id).await,
        }
    }

    /// All books ordered by grade and name.
    pub async fn list_books(&self) -> Result<Vec<Book>, CatalogError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOK_COLUMNS} FROM books ORDER BY grade, book_name"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_book).collect::<Result<_, _>>()?)
    }

    /// Apply a partial update; a new grade must exist and the name must stay unique within it.
    ///
    /// The id is kept, so vectors and chapters stay attached to the renamed book.
    pub async fn update_book(&self, book_id: &str, update: BookUpdate) -> Result<Book, CatalogError> {
        let existing = self.require_book(book_id).await?;
        if update.book_name.is_none() && update.grade.is_none() {
            return Err(CatalogError::Invalid("No fields to update".into()));
        }
        let grade = update.grade.unwrap_or(existing.grade);
        if update.grade.is_some() && self.get_grade_by_number(grade).await?.is_none() {
            return Err(CatalogError::NotFound(format!("Grade number {grade}")));
        }
        let name = update
            .book_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&existing.book_name);
        if let Some(other) = self.book_by_key(name, grade).await?
            && other.book_id != book_id
        {
            return Err(CatalogError::Conflict(format!(
                "Book '{name}' already exists for grade {grade}"
            )));
        }

        sqlx::query(
            "UPDATE books SET book_name = ?2, name_key = ?3, grade = ?4, updated_at = ?5
             WHERE book_id = ?1",
        )
        .bind(book_id)
        .bind(name)
        .bind(ids::name_key(name))
        .bind(grade)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;
        self.require_book(book_id).await
    }

    /// Delete a book together with its chapters, lessons and chunk rows.
    pub async fn delete_book(&self, book_id: &str) -> Result<BookDeletion, CatalogError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM books WHERE book_id = ?1")
            .bind(book_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Err(CatalogError::NotFound(format!("Book '{book_id}'")));
        }

        let count = |table: &'static str| format!("SELECT COUNT(*) AS n FROM {table} WHERE book_id = ?1");
        let mut deletion = BookDeletion::default();
        for (table, slot) in [
            ("chapters", &mut deletion.chapters),
            ("lessons", &mut deletion.lessons),
            ("chunks", &mut deletion.chunks),
        ] {
            let n: i64 = sqlx::query(&count(table))
                .bind(book_id)
                .fetch_one(&mut *tx)
                .await?
                .try_get("n")?;
            *slot = u64::try_from(n).unwrap_or_default();
        }

        sqlx::query("DELETE FROM books WHERE book_id = ?1")
            .bind(book_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            book_id,
            chapters = deletion.chapters,
            lessons = deletion.lessons,
            chunks = deletion.chunks,
            "Book deleted"
        );
        Ok(deletion)
    }

    /// `{book name → {grade, chunks, pages}}` for every book.
    ///
    /// Books sharing a name across grades are keyed `"{name} (grade {n})"` after the first.
    pub async fn book_summaries(&self) -> Result<BTreeMap<String, BookSummary>, CatalogError> {
        let rows = sqlx::query(
            "SELECT b.book_name AS book_name, b.grade AS grade, b.total_pages AS total_pages,
                    COUNT(c.point_id) AS chunk_count
             FROM books b LEFT JOIN chunks c ON c.book_id = b.book_id
             GROUP BY b.book_id
             ORDER BY b.grade, b.book_name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = BTreeMap::new();
        for row in &rows {
            let name: String = row.try_get("book_name")?;
            let chunks: i64 = row.try_get("chunk_count")?;
            let summary = BookSummary {
                grade: row.try_get("grade")?,
                chunks: u64::try_from(chunks).unwrap_or_default(),
                pages: row.try_get("total_pages")?,
            };
            let key = if summaries.contains_key(&name) {
                let key = format!("{name} (grade {})", summary.grade);
                tracing::warn!(book = %name, key = %key, "Book name shared across grades");
                key
            } else {
                name
            };
            summaries.insert(key, summary);
        }
        Ok(summaries)
    }

    /// Book with this name (ignoring case and spacing) in this grade.
    async fn book_by_key(&self, book_name: &str, grade: u32) -> Result<Option<Book>, CatalogError> {
        let row = sqlx::query(&format!(
            "SELECT {BOOK_COLUMNS} FROM books WHERE name_key = ?1 AND grade = ?2"
        ))
        .bind(ids::name_key(book_name))
        .bind(grade)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_book).transpose()?)
    }

    pub(crate) async fn require_book(&self, book_id: &str) -> Result<Book, CatalogError> {
        self.get_book(book_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("Book '{book_id}'")))
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::test_support::temp_catalog;
    use crate::catalog::*;

    async fn catalog_with_grade() -> (Catalog, tempfile::TempDir) {
        let (catalog, dir) = temp_catalog().await;
        catalog.ensure_grade(8).await.expect("grade");
        (catalog, dir)
    }

    fn new_book(name: &str) -> NewBook {
        NewBook {
            book_name: name.into(),
            grade: 8,
            total_pages: 120,
            source_url: None,
        }
    }

    #[tokio::test]
    async fn create_book_requires_existing_grade() {
        let (catalog, _dir) = temp_catalog().await;
        let error = catalog.create_book(new_book("Toán 8")).await.expect_err("no grade");
        assert!(matches!(error, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_book_is_a_conflict() {
        let (catalog, _dir) = catalog_with_grade().await;
        catalog.create_book(new_book("Toán 8")).await.expect("create");
        let error = catalog.create_book(new_book("toán  8")).await.expect_err("dup");
        assert!(matches!(error, CatalogError::Conflict(_)));
    }

    #[tokio::test]
    async fn find_book_accepts_name_or_id() {
        let (catalog, _dir) = catalog_with_grade().await;
        let book = catalog.create_book(new_book("Toán 8")).await.expect("create");
        assert_eq!(catalog.find_book(&book.book_id).await.expect("id"), Some(book.clone()));
        assert_eq!(catalog.find_book("Toán 8").await.expect("name"), Some(book));
        assert_eq!(catalog.find_book("Vật lý 8").await.expect("missing"), None);
    }

    #[tokio::test]
    async fn upsert_book_keeps_identity() {
        let (catalog, _dir) = catalog_with_grade().await;
        let first = catalog
            .upsert_book("Toán 8", 8, 100, Some("http://a"))
            .await
            .expect("upsert");
        let second = catalog
            .upsert_book("Toán 8", 8, 140, Some("http://b"))
            .await
            .expect("upsert again");
        assert_eq!(first.book_id, second.book_id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.total_pages, 140);
        assert_eq!(catalog.list_books().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn update_book_validates_grade() {
        let (catalog, _dir) = catalog_with_grade().await;
        let book = catalog.create_book(new_book("Toán 8")).await.expect("create");
        let error = catalog
            .update_book(
                &book.book_id,
                BookUpdate {
                    book_name: None,
                    grade: Some(11),
                },
            )
            .await
            .expect_err("unknown grade");
        assert!(matches!(error, CatalogError::NotFound(_)));

        let error = catalog
            .update_book(&book.book_id, BookUpdate::default())
            .await
            .expect_err("empty update");
        assert!(matches!(error, CatalogError::Invalid(_)));
    }

    #[tokio::test]
    async fn summaries_count_chunks_per_book() {
        let (catalog, _dir) = catalog_with_grade().await;
        let book = catalog.upsert_book("Toán 8", 8, 3, None).await.expect("book");
        let chunk = |index: u64| ChunkRecord {
            point_id: format!("p{index}"),
            chunk_id: ids::chunk_label(index as usize),
            book_id: book.book_id.clone(),
            chapter_id: None,
            lesson_id: None,
            chapter: None,
            lesson: None,
            page: 1,
            text: format!("text {index}"),
            embedding_index: index,
            chunk_hash: format!("h{index}"),
        };
        catalog
            .replace_book_content(&book.book_id, &[], &[chunk(0), chunk(1)])
            .await
            .expect("chunks");

        let summaries = catalog.book_summaries().await.expect("summaries");
        assert_eq!(
            summaries.get("Toán 8"),
            Some(&BookSummary {
                grade: 8,
                chunks: 2,
                pages: 3
            })
        );
    }

    #[tokio::test]
    async fn renamed_book_keeps_its_id_through_reingest() {
        let (catalog, _dir) = catalog_with_grade().await;
        let book = catalog.create_book(new_book("Toán 8")).await.expect("create");
        catalog
            .update_book(
                &book.book_id,
                BookUpdate {
                    book_name: Some("Toán 8 (tập 1)".into()),
                    grade: None,
                },
            )
            .await
            .expect("rename");

        let refreshed = catalog
            .upsert_book("toán 8 (TẬP 1)", 8, 90, None)
            .await
            .expect("ingest under new name");
        assert_eq!(refreshed.book_id, book.book_id);
        assert_eq!(refreshed.book_name, "Toán 8 (tập 1)");

        let old_name = catalog
            .upsert_book("Toán 8", 8, 50, None)
            .await
            .expect("ingest under old name");
        assert_ne!(old_name.book_id, book.book_id);
        assert_eq!(catalog.list_books().await.expect("list").len(), 2);

        let error = catalog.create_book(new_book("Toán 8")).await.expect_err("dup");
        assert!(matches!(error, CatalogError::Conflict(_)));
        let error = catalog
            .update_book(
                &old_name.book_id,
                BookUpdate {
                    book_name: Some("Toán 8 (tập 1)".into()),
                    grade: None,
                },
            )
            .await
            .expect_err("name held by another book");
        assert!(matches!(error, CatalogError::Conflict(_)));
    }

    #[tokio::test]
    async fn summaries_keep_books_sharing_a_name() {
        let (catalog, _dir) = catalog_with_grade().await;
        catalog.ensure_grade(9).await.expect("grade");
        catalog.upsert_book("Tin học", 8, 10, None).await.expect("grade 8");
        catalog.upsert_book("Tin học", 9, 12, None).await.expect("grade 9");

        let summaries = catalog.book_summaries().await.expect("summaries");
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries["Tin học"].grade, 8);
        assert_eq!(summaries["Tin học (grade 9)"].pages, 12);
    }
}
