//! Chapter and lesson CRUD routes.

use super::{ApiJson, AppError, DeleteResponse};
use crate::catalog::{
    CatalogError, Chapter, ChapterUpdate, Lesson, LessonUpdate, NewChapter, NewLesson,
};
use crate::processing::ProcessingApi;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;

pub(super) fn routes<S>() -> Router<Arc<S>>
where
    S: ProcessingApi + 'static,
{
    Router::new()
        .route("/chapters", get(list_chapters::<S>).post(create_chapter::<S>))
        .route(
            "/chapters/:chapter_id",
            get(get_chapter::<S>)
                .put(update_chapter::<S>)
                .delete(delete_chapter::<S>),
        )
        .route("/lessons", get(list_lessons::<S>).post(create_lesson::<S>))
        .route(
            "/lessons/:lesson_id",
            get(get_lesson::<S>)
                .put(update_lesson::<S>)
                .delete(delete_lesson::<S>),
        )
}

#[derive(Deserialize)]
struct ChapterFilter {
    book_id: Option<String>,
}

#[derive(Deserialize)]
struct LessonFilter {
    chapter_id: Option<String>,
    book_id: Option<String>,
}

async fn create_chapter<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    ApiJson(input): ApiJson<NewChapter>,
) -> Result<(StatusCode, Json<Chapter>), AppError> {
    let chapter = service.catalog().create_chapter(input).await?;
    Ok((StatusCode::CREATED, Json(chapter)))
}

async fn list_chapters<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    Query(filter): Query<ChapterFilter>,
) -> Result<Json<Vec<Chapter>>, AppError> {
    Ok(Json(
        service
            .catalog()
            .list_chapters(filter.book_id.as_deref())
            .await?,
    ))
}

async fn get_chapter<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    Path(chapter_id): Path<String>,
) -> Result<Json<Chapter>, AppError> {
    let chapter = service
        .catalog()
        .get_chapter(&chapter_id)
        .await?
        .ok_or_else(|| CatalogError::NotFound(format!("Chapter '{chapter_id}'")))?;
    Ok(Json(chapter))
}

async fn update_chapter<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    Path(chapter_id): Path<String>,
    ApiJson(update): ApiJson<ChapterUpdate>,
) -> Result<Json<Chapter>, AppError> {
    Ok(Json(
        service.catalog().update_chapter(&chapter_id, update).await?,
    ))
}

async fn delete_chapter<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    Path(chapter_id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let lessons = service.catalog().delete_chapter(&chapter_id).await?;
    Ok(DeleteResponse::new(
        format!("Chapter '{chapter_id}' and {lessons} lesson(s) deleted successfully"),
        1,
    ))
}

async fn create_lesson<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    ApiJson(input): ApiJson<NewLesson>,
) -> Result<(StatusCode, Json<Lesson>), AppError> {
    let lesson = service.catalog().create_lesson(input).await?;
    Ok((StatusCode::CREATED, Json(lesson)))
}

async fn list_lessons<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    Query(filter): Query<LessonFilter>,
) -> Result<Json<Vec<Lesson>>, AppError> {
    Ok(Json(
        service
            .catalog()
            .list_lessons(filter.chapter_id.as_deref(), filter.book_id.as_deref())
            .await?,
    ))
}

async fn get_lesson<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    Path(lesson_id): Path<String>,
) -> Result<Json<Lesson>, AppError> {
    let lesson = service
        .catalog()
        .get_lesson(&lesson_id)
        .await?
        .ok_or_else(|| CatalogError::NotFound(format!("Lesson '{lesson_id}'")))?;
    Ok(Json(lesson))
}

async fn update_lesson<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    Path(lesson_id): Path<String>,
    ApiJson(update): ApiJson<LessonUpdate>,
) -> Result<Json<Lesson>, AppError> {
    Ok(Json(
        service.catalog().update_lesson(&lesson_id, update).await?,
    ))
}

async fn delete_lesson<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    Path(lesson_id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    service.catalog().delete_lesson(&lesson_id).await?;
    Ok(DeleteResponse::new(
        format!("Lesson '{lesson_id}' deleted successfully"),
        1,
    ))
}

#[cfg(test)]
mod tests {
    use crate::api::create_router;
    use crate::api::test_support::{StubService, send};
    use crate::processing::ProcessingApi;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn chapters_and_lessons_round_trip_through_routes() {
        let service = StubService::new().await;
        service.catalog().ensure_grade(8).await.expect("grade");
        let book = service
            .catalog()
            .upsert_book("Toán 8", 8, 100, None)
            .await
            .expect("book");
        let app = create_router(service);

        let (status, _, chapter) = send(
            app.clone(),
            Method::POST,
            "/chapters",
            &[],
            Some(json!({"book_id": book.book_id, "title": "Chương 1", "order": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let chapter_id = chapter["chapter_id"].as_str().expect("id").to_string();

        let (status, _, lesson) = send(
            app.clone(),
            Method::POST,
            "/lessons",
            &[],
            Some(json!({
                "chapter_id": chapter_id,
                "book_id": book.book_id,
                "title": "Bài 1",
                "page": 7
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(lesson["page"], 7);

        let uri = format!("/lessons?chapter_id={chapter_id}");
        let (status, _, body) = send(app.clone(), Method::GET, &uri, &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));

        let uri = format!("/chapters?book_id={}", book.book_id);
        let (_, _, body) = send(app.clone(), Method::GET, &uri, &[], None).await;
        assert_eq!(body[0]["title"], "Chương 1");

        let uri = format!("/chapters/{chapter_id}");
        let (status, _, body) = send(app.clone(), Method::DELETE, &uri, &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().is_some_and(|m| m.contains("1 lesson")));

        let (status, _, body) = send(app, Method::GET, "/lessons", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn lesson_requires_existing_chapter() {
        let app = create_router(StubService::new().await);
        let (status, _, _) = send(
            app.clone(),
            Method::POST,
            "/lessons",
            &[],
            Some(json!({"chapter_id": "missing", "book_id": "missing", "title": "Bài 1"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = send(app, Method::DELETE, "/lessons/missing", &[], None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
