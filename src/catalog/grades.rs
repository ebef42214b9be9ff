use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::types::{Grade, GradeUpdate, NewGrade};
use super::{Catalog, CatalogError, ids, now_timestamp, unused_id};

const GRADE_COLUMNS: &str = "grade_id, grade_number, grade_name, created_at, updated_at";

pub(super) fn row_to_grade(row: &SqliteRow) -> Result<Grade, sqlx::Error> {
    Ok(Grade {
        grade_id: row.try_get("grade_id")?,
        grade_number: row.try_get("grade_number")?,
        grade_name: row.try_get("grade_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Catalog {
    /// Create a grade; the number must not be taken.
    pub async fn create_grade(&self, input: NewGrade) -> Result<Grade, CatalogError> {
        if self.get_grade_by_number(input.grade_number).await?.is_some() {
            return Err(CatalogError::Conflict(format!(
                "Grade number {} already exists",
                input.grade_number
            )));
        }
        let grade_id =
            unused_id(&self.pool, "grades", "grade_id", ids::grade_id(input.grade_number)).await?;

        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO grades (grade_id, grade_number, grade_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
        )
        .bind(&grade_id)
        .bind(input.grade_number)
        .bind(input.grade_name.trim())
        .bind(&now)
        .execute(&self.pool)
        .await?;

        tracing::info!(grade_id = %grade_id, grade_number = input.grade_number, "Grade created");
        self.require_grade(&grade_id).await
    }

    /// Look up a grade by id.
    pub async fn get_grade(&self, grade_id: &str) -> Result<Option<Grade>, CatalogError> {
        let row = sqlx::query(&format!(
            "SELECT {GRADE_COLUMNS} FROM grades WHERE grade_id = ?1"
        ))
        .bind(grade_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_grade).transpose()?)
    }

    /// Look up a grade by number.
    pub async fn get_grade_by_number(&self, number: u32) -> Result<Option<Grade>, CatalogError> {
        let row = sqlx::query(&format!(
            "SELECT {GRADE_COLUMNS} FROM grades WHERE grade_number = ?1"
        ))
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_grade).transpose()?)
    }

    /// All grades ordered by number.
    pub async fn list_grades(&self) -> Result<Vec<Grade>, CatalogError> {
        let rows = sqlx::query(&format!(
            "SELECT {GRADE_COLUMNS} FROM grades ORDER BY grade_number"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_grade).collect::<Result<_, _>>()?)
    }

    /// Apply a partial update; a new number must not belong to another grade.
    pub async fn update_grade(
        &self,
        grade_id: &str,
        update: GradeUpdate,
    ) -> Result<Grade, CatalogError> {
        let existing = self.require_grade(grade_id).await?;
        if update.grade_number.is_none() && update.grade_name.is_none() {
            return Err(CatalogError::Invalid("No fields to update".into()));
        }
        if let Some(number) = update.grade_number
            && let Some(other) = self.get_grade_by_number(number).await?
            && other.grade_id != grade_id
        {
            return Err(CatalogError::Conflict(format!(
                "Grade number {number} already exists"
            )));
        }

        sqlx::query(
            "UPDATE grades SET grade_number = ?2, grade_name = ?3, updated_at = ?4
             WHERE grade_id = ?1",
        )
        .bind(grade_id)
        .bind(update.grade_number.unwrap_or(existing.grade_number))
        .bind(
            update
                .grade_name
                .as_deref()
                .map(str::trim)
                .unwrap_or(&existing.grade_name),
        )
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;

        self.require_grade(grade_id).await
    }

    /// Delete a grade that no book references.
    pub async fn delete_grade(&self, grade_id: &str) -> Result<(), CatalogError> {
        let grade = self.require_grade(grade_id).await?;
        let referencing: i64 = sqlx::query("SELECT COUNT(*) AS n FROM books WHERE grade = ?1")
            .bind(grade.grade_number)
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;
        if referencing > 0 {
            return Err(CatalogError::Conflict(format!(
                "Cannot delete grade '{grade_id}'. There are {referencing} book(s) associated \
                 with this grade. Please delete the books first."
            )));
        }

        sqlx::query("DELETE FROM grades WHERE grade_id = ?1")
            .bind(grade_id)
            .execute(&self.pool)
            .await?;
        tracing::info!(grade_id, "Grade deleted");
        Ok(())
    }

    /// Return the grade with this number, creating it with a default name when missing.
    pub async fn ensure_grade(&self, number: u32) -> Result<Grade, CatalogError> {
        if let Some(grade) = self.get_grade_by_number(number).await? {
            return Ok(grade);
        }
        let grade_id = unused_id(&self.pool, "grades", "grade_id", ids::grade_id(number)).await?;
        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO grades (grade_id, grade_number, grade_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(grade_number) DO NOTHING",
        )
        .bind(&grade_id)
        .bind(number)
        .bind(format!("Grade {number}"))
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_grade_by_number(number)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("Grade number {number}")))
    }

    pub(crate) async fn require_grade(&self, grade_id: &str) -> Result<Grade, CatalogError> {
        self.get_grade(grade_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("Grade '{grade_id}'")))
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::test_support::temp_catalog;
    use crate::catalog::*;

    fn grade(number: u32) -> NewGrade {
        NewGrade {
            grade_number: number,
            grade_name: format!("Lớp {number}"),
        }
    }

    #[tokio::test]
    async fn create_and_lookup_grade() {
        let (catalog, _dir) = temp_catalog().await;
        let created = catalog.create_grade(grade(8)).await.expect("create");
        assert_eq!(created.grade_id, ids::grade_id(8));

        let by_number = catalog.get_grade_by_number(8).await.expect("query");
        assert_eq!(by_number, Some(created.clone()));
        assert_eq!(catalog.list_grades().await.expect("list"), vec![created]);
    }

    #[tokio::test]
    async fn duplicate_grade_is_a_conflict() {
        let (catalog, _dir) = temp_catalog().await;
        catalog.create_grade(grade(8)).await.expect("create");
        let error = catalog.create_grade(grade(8)).await.expect_err("duplicate");
        assert!(matches!(error, CatalogError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_rejects_taken_number() {
        let (catalog, _dir) = temp_catalog().await;
        let eight = catalog.create_grade(grade(8)).await.expect("create");
        catalog.create_grade(grade(9)).await.expect("create");

        let error = catalog
            .update_grade(
                &eight.grade_id,
                GradeUpdate {
                    grade_number: Some(9),
                    grade_name: None,
                },
            )
            .await
            .expect_err("taken");
        assert!(matches!(error, CatalogError::Conflict(_)));

        let renamed = catalog
            .update_grade(
                &eight.grade_id,
                GradeUpdate {
                    grade_number: None,
                    grade_name: Some("Eighth".into()),
                },
            )
            .await
            .expect("rename");
        assert_eq!(renamed.grade_name, "Eighth");
        assert_eq!(renamed.grade_number, 8);
    }

    #[tokio::test]
    async fn grade_with_books_cannot_be_deleted() {
        let (catalog, _dir) = temp_catalog().await;
        let created = catalog.create_grade(grade(8)).await.expect("create");
        let book = catalog
            .create_book(NewBook {
                book_name: "Toán 8".into(),
                grade: 8,
                total_pages: 0,
                source_url: None,
            })
            .await
            .expect("book");

        let error = catalog
            .delete_grade(&created.grade_id)
            .await
            .expect_err("guarded");
        assert!(matches!(error, CatalogError::Conflict(_)));

        catalog.delete_book(&book.book_id).await.expect("delete book");
        catalog.delete_grade(&created.grade_id).await.expect("delete grade");
        assert!(catalog.get_grade(&created.grade_id).await.expect("query").is_none());
    }

    #[tokio::test]
    async fn ensure_grade_is_idempotent() {
        let (catalog, _dir) = temp_catalog().await;
        let first = catalog.ensure_grade(10).await.expect("ensure");
        let second = catalog.ensure_grade(10).await.expect("ensure again");
        assert_eq!(first, second);
        assert_eq!(first.grade_name, "Grade 10");
    }

    #[tokio::test]
    async fn renumbered_grade_frees_its_old_number() {
        let (catalog, _dir) = temp_catalog().await;
        let eight = catalog.create_grade(grade(8)).await.expect("create");
        catalog
            .update_grade(
                &eight.grade_id,
                GradeUpdate {
                    grade_number: Some(9),
                    grade_name: None,
                },
            )
            .await
            .expect("renumber");

        let ensured = catalog.ensure_grade(8).await.expect("ensure after renumber");
        assert_eq!(ensured.grade_number, 8);
        assert_ne!(ensured.grade_id, eight.grade_id);
        assert_eq!(
            catalog.get_grade(&eight.grade_id).await.expect("query").map(|g| g.grade_number),
            Some(9)
        );

        catalog.delete_grade(&ensured.grade_id).await.expect("delete");
        let recreated = catalog.create_grade(grade(8)).await.expect("create after renumber");
        assert_eq!(recreated.grade_number, 8);
        assert_eq!(catalog.list_grades().await.expect("list").len(), 2);
    }
}
