//! Subjects and their many-to-many link with grades.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::grades::row_to_grade;
use super::types::{Grade, NewSubject, Subject, SubjectUpdate};
use super::{Catalog, CatalogError, ids, now_timestamp, unused_id};

const SUBJECT_COLUMNS: &str = "subject_id, subject_code, subject_name, created_at, updated_at";

fn row_to_subject(row: &SqliteRow) -> Result<Subject, sqlx::Error> {
    Ok(Subject {
        subject_id: row.try_get("subject_id")?,
        subject_code: row.try_get("subject_code")?,
        subject_name: row.try_get("subject_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Catalog {
    /// Create a subject; codes are unique ignoring case.
    pub async fn create_subject(&self, input: NewSubject) -> Result<Subject, CatalogError> {
        let code = input.subject_code.trim();
        if code.is_empty() {
            return Err(CatalogError::Invalid("subject_code must not be empty".into()));
        }
        if self.code_taken(code, None).await? {
            return Err(CatalogError::Conflict(format!("Subject '{code}' already exists")));
        }
        let subject_id =
            unused_id(&self.pool, "subjects", "subject_id", ids::subject_id(code)).await?;

        let now = now_timestamp();
        sqlx::query(
            "INSERT INTO subjects (subject_id, subject_code, subject_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
        )
        .bind(&subject_id)
        .bind(code)
        .bind(input.subject_name.trim())
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.require_subject(&subject_id).await
    }

    /// Look up a subject by id.
    pub async fn get_subject(&self, subject_id: &str) -> Result<Option<Subject>, CatalogError> {
        let row = sqlx::query(&format!(
            "SELECT {SUBJECT_COLUMNS} FROM subjects WHERE subject_id = ?1"
        ))
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_subject).transpose()?)
    }

    /// All subjects ordered by code.
    pub async fn list_subjects(&self) -> Result<Vec<Subject>, CatalogError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUBJECT_COLUMNS} FROM subjects ORDER BY subject_code"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_subject).collect::<Result<_, _>>()?)
    }

    /// Apply a partial subject update. The id stays stable when the code changes.
    pub async fn update_subject(
        &self,
        subject_id: &str,
        update: SubjectUpdate,
    ) -> Result<Subject, CatalogError> {
        let existing = self.require_subject(subject_id).await?;
        if update.subject_code.is_none() && update.subject_name.is_none() {
            return Err(CatalogError::Invalid("No fields to update".into()));
        }
        let code = update
            .subject_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .unwrap_or(&existing.subject_code);
        if self.code_taken(code, Some(subject_id)).await? {
            return Err(CatalogError::Conflict(format!("Subject '{code}' already exists")));
        }

        sqlx::query(
            "UPDATE subjects SET subject_code = ?2, subject_name = ?3, updated_at = ?4
             WHERE subject_id = ?1",
        )
        .bind(subject_id)
        .bind(code)
        .bind(
            update
                .subject_name
                .as_deref()
                .map(str::trim)
                .unwrap_or(&existing.subject_name),
        )
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;
        self.require_subject(subject_id).await
    }

    /// Delete a subject and every grade link that points at it.
    pub async fn delete_subject(&self, subject_id: &str) -> Result<(), CatalogError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM grade_subjects WHERE subject_id = ?1")
            .bind(subject_id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM subjects WHERE subject_id = ?1")
            .bind(subject_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            return Err(CatalogError::NotFound(format!("Subject '{subject_id}'")));
        }
        tx.commit().await?;
        Ok(())
    }

    /// Link a grade and a subject; linking twice is a no-op.
    pub async fn link_grade_subject(
        &self,
        grade_id: &str,
        subject_id: &str,
    ) -> Result<(), CatalogError> {
        self.require_grade(grade_id).await?;
        self.require_subject(subject_id).await?;
        sqlx::query(
            "INSERT OR IGNORE INTO grade_subjects (grade_id, subject_id, created_at)
             VALUES (?1, ?2, ?3)",
        )
        .bind(grade_id)
        .bind(subject_id)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a grade-subject link.
    pub async fn unlink_grade_subject(
        &self,
        grade_id: &str,
        subject_id: &str,
    ) -> Result<(), CatalogError> {
        let removed = sqlx::query(
            "DELETE FROM grade_subjects WHERE grade_id = ?1 AND subject_id = ?2",
        )
        .bind(grade_id)
        .bind(subject_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if removed == 0 {
            return Err(CatalogError::NotFound("Link".into()));
        }
        Ok(())
    }

    /// Subjects linked to a grade.
    pub async fn subjects_for_grade(&self, grade_id: &str) -> Result<Vec<Subject>, CatalogError> {
        let rows = sqlx::query(
            "SELECT s.subject_id, s.subject_code, s.subject_name, s.created_at, s.updated_at
             FROM subjects s JOIN grade_subjects gs ON gs.subject_id = s.subject_id
             WHERE gs.grade_id = ?1
             ORDER BY s.subject_code",
        )
        .bind(grade_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_subject).collect::<Result<_, _>>()?)
    }

    /// Grades linked to a subject.
    pub async fn grades_for_subject(&self, subject_id: &str) -> Result<Vec<Grade>, CatalogError> {
        let rows = sqlx::query(
            "SELECT g.grade_id, g.grade_number, g.grade_name, g.created_at, g.updated_at
             FROM grades g JOIN grade_subjects gs ON gs.grade_id = g.grade_id
             WHERE gs.subject_id = ?1
             ORDER BY g.grade_number",
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_grade).collect::<Result<_, _>>()?)
    }

    /// Whether another subject already uses `code`, ignoring case.
    async fn code_taken(&self, code: &str, except: Option<&str>) -> Result<bool, CatalogError> {
        let taken = sqlx::query(
            "SELECT 1 FROM subjects
             WHERE lower(subject_code) = lower(?1) AND (?2 IS NULL OR subject_id != ?2)",
        )
        .bind(code)
        .bind(except)
        .fetch_optional(&self.pool)
        .await?
        .is_some();
        Ok(taken)
    }

    async fn require_subject(&self, subject_id: &str) -> Result<Subject, CatalogError> {
        self.get_subject(subject_id)
            .await?
            .ok_or_else(|| CatalogError::NotFound(format!("Subject '{subject_id}'")))
    }
}
