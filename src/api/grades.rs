use super::{ApiJson, AppError, DeleteResponse};
use crate::catalog::{CatalogError, Grade, GradeUpdate, NewGrade};
use crate::processing::ProcessingApi;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use std::sync::Arc;

pub(super) fn routes<S>() -> Router<Arc<S>>
where
    S: ProcessingApi + 'static,
{
    Router::new()
        .route("/grades", get(list_grades::<S>).post(create_grade::<S>))
        .route(
            "/grades/:grade_id",
            get(get_grade::<S>)
                .put(update_grade::<S>)
                .delete(delete_grade::<S>),
        )
        .route("/grades/number/:grade_number", get(get_grade_by_number::<S>))
}

async fn create_grade<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    ApiJson(input): ApiJson<NewGrade>,
) -> Result<(StatusCode, Json<Grade>), AppError> {
    let grade = service.catalog().create_grade(input).await?;
    Ok((StatusCode::CREATED, Json(grade)))
}

async fn list_grades<S: ProcessingApi>(
    State(service): State<Arc<S>>,
) -> Result<Json<Vec<Grade>>, AppError> {
    Ok(Json(service.catalog().list_grades().await?))
}

async fn get_grade<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    Path(grade_id): Path<String>,
) -> Result<Json<Grade>, AppError> {
    let grade = service
        .catalog()
        .get_grade(&grade_id)
        .await?
        .ok_or_else(|| CatalogError::NotFound(format!("Grade '{grade_id}'")))?;
    Ok(Json(grade))
}

async fn get_grade_by_number<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    Path(grade_number): Path<u32>,
) -> Result<Json<Grade>, AppError> {
    let grade = service
        .catalog()
        .get_grade_by_number(grade_number)
        .await?
        .ok_or_else(|| CatalogError::NotFound(format!("Grade number {grade_number}")))?;
    Ok(Json(grade))
}

async fn update_grade<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    Path(grade_id): Path<String>,
    ApiJson(update): ApiJson<GradeUpdate>,
) -> Result<Json<Grade>, AppError> {
    Ok(Json(service.catalog().update_grade(&grade_id, update).await?))
}

async fn delete_grade<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    Path(grade_id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    service.catalog().delete_grade(&grade_id).await?;
    Ok(DeleteResponse::new(
        format!("Grade '{grade_id}' deleted successfully"),
        1,
    ))
}
