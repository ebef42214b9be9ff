//! Subject routes. Every handler requires the `X-User-Id` header set by the gateway.

use super::{ApiJson, AppError};
use crate::catalog::{CatalogError, Grade, NewSubject, Subject, SubjectUpdate};
use crate::processing::ProcessingApi;
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

const USER_ID_HEADER: &str = "x-user-id";

pub(super) fn routes<S>() -> Router<Arc<S>>
where
    S: ProcessingApi + 'static,
{
    Router::new()
        .route(
            "/subjects",
            get(list_subjects::<S>).post(create_subject::<S>),
        )
        .route("/subjects/link", post(link::<S>))
        .route("/subjects/unlink", post(unlink::<S>))
        .route("/subjects/by-grade/:grade_id", get(by_grade::<S>))
        .route("/subjects/by-subject/:subject_id", get(by_subject::<S>))
        .route(
            "/subjects/:subject_id",
            get(get_subject::<S>)
                .patch(update_subject::<S>)
                .delete(delete_subject::<S>),
        )
}

/// Caller identity forwarded by the gateway.
struct UserId(String);

#[async_trait]
impl<T> FromRequestParts<T> for UserId
where
    T: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &T) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| UserId(value.to_string()))
            .ok_or(AppError::Unauthorized)
    }
}

#[derive(Deserialize)]
struct LinkRequest {
    grade_id: String,
    subject_id: String,
}

#[derive(Serialize)]
struct GradeSubjects {
    grade_id: String,
    subjects: Vec<Subject>,
}

#[derive(Serialize)]
struct SubjectGrades {
    subject_id: String,
    grades: Vec<Grade>,
}

async fn create_subject<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    UserId(user): UserId,
    ApiJson(input): ApiJson<NewSubject>,
) -> Result<(StatusCode, Json<Subject>), AppError> {
    let subject = service.catalog().create_subject(input).await?;
    tracing::info!(user = %user, subject_id = %subject.subject_id, "Subject created");
    Ok((StatusCode::CREATED, Json(subject)))
}

async fn list_subjects<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    _user: UserId,
) -> Result<Json<Vec<Subject>>, AppError> {
    Ok(Json(service.catalog().list_subjects().await?))
}

async fn get_subject<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    _user: UserId,
    Path(subject_id): Path<String>,
) -> Result<Json<Subject>, AppError> {
    let subject = service
        .catalog()
        .get_subject(&subject_id)
        .await?
        .ok_or_else(|| CatalogError::NotFound(format!("Subject '{subject_id}'")))?;
    Ok(Json(subject))
}

async fn update_subject<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    _user: UserId,
    Path(subject_id): Path<String>,
    ApiJson(update): ApiJson<SubjectUpdate>,
) -> Result<Json<Subject>, AppError> {
    Ok(Json(
        service.catalog().update_subject(&subject_id, update).await?,
    ))
}

async fn delete_subject<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    UserId(user): UserId,
    Path(subject_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    service.catalog().delete_subject(&subject_id).await?;
    tracing::info!(user = %user, subject_id = %subject_id, "Subject deleted");
    Ok(Json(json!({ "success": true })))
}

async fn link<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    _user: UserId,
    ApiJson(request): ApiJson<LinkRequest>,
) -> Result<StatusCode, AppError> {
    service
        .catalog()
        .link_grade_subject(&request.grade_id, &request.subject_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unlink<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    _user: UserId,
    ApiJson(request): ApiJson<LinkRequest>,
) -> Result<StatusCode, AppError> {
    service
        .catalog()
        .unlink_grade_subject(&request.grade_id, &request.subject_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn by_grade<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    _user: UserId,
    Path(grade_id): Path<String>,
) -> Result<Json<GradeSubjects>, AppError> {
    let subjects = service.catalog().subjects_for_grade(&grade_id).await?;
    Ok(Json(GradeSubjects { grade_id, subjects }))
}

async fn by_subject<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    _user: UserId,
    Path(subject_id): Path<String>,
) -> Result<Json<SubjectGrades>, AppError> {
    let grades = service.catalog().grades_for_subject(&subject_id).await?;
    Ok(Json(SubjectGrades { subject_id, grades }))
}
