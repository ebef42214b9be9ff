use super::{ApiJson, AppError, DeleteResponse};
use crate::catalog::{Book, BookUpdate, CatalogError, NewBook};
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
        .route("/books", get(list_books::<S>).post(create_book::<S>))
        .route(
            "/books/:book_id",
            get(get_book::<S>)
                .put(update_book::<S>)
                .delete(delete_book::<S>),
        )
}

async fn create_book<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    ApiJson(input): ApiJson<NewBook>,
) -> Result<(StatusCode, Json<Book>), AppError> {
    let book = service.catalog().create_book(input).await?;
    Ok((StatusCode::CREATED, Json(book)))
}

async fn list_books<S: ProcessingApi>(
    State(service): State<Arc<S>>,
) -> Result<Json<Vec<Book>>, AppError> {
    Ok(Json(service.catalog().list_books().await?))
}

async fn get_book<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    Path(book_id): Path<String>,
) -> Result<Json<Book>, AppError> {
    let book = service
        .catalog()
        .get_book(&book_id)
        .await?
        .ok_or_else(|| CatalogError::NotFound(format!("Book '{book_id}'")))?;
    Ok(Json(book))
}

async fn update_book<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    Path(book_id): Path<String>,
    ApiJson(update): ApiJson<BookUpdate>,
) -> Result<Json<Book>, AppError> {
    Ok(Json(service.catalog().update_book(&book_id, update).await?))
}

/// Delete a book with its chapters, lessons, chunks and vectors.
async fn delete_book<S: ProcessingApi>(
    State(service): State<Arc<S>>,
    Path(book_id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    if service.catalog().get_book(&book_id).await?.is_none() {
        return Err(CatalogError::NotFound(format!("Book '{book_id}'")).into());
    }
    service.delete_book(&book_id).await?;
    Ok(DeleteResponse::new(
        format!("Book '{book_id}' and related data deleted successfully"),
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
    async fn create_requires_existing_grade() {
        let app = create_router(StubService::new().await);
        let (status, _, body) = send(
            app,
            Method::POST,
            "/books",
            &[],
            Some(json!({"book_name": "Toán 8", "grade": 8})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().is_some_and(|e| e.contains("not found")));
    }

    #[tokio::test]
    async fn book_lifecycle() {
        let service = StubService::new().await;
        service.catalog().ensure_grade(8).await.expect("grade");
        let app = create_router(service);

        let (status, _, created) = send(
            app.clone(),
            Method::POST,
            "/books",
            &[],
            Some(json!({"book_name": "Toán 8", "grade": 8})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let book_id = created["book_id"].as_str().expect("id").to_string();

        let (status, _, _) = send(
            app.clone(),
            Method::POST,
            "/books",
            &[],
            Some(json!({"book_name": "Toán 8", "grade": 8})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/books/{book_id}");
        let (status, _, body) = send(
            app.clone(),
            Method::PUT,
            &uri,
            &[],
            Some(json!({"book_name": "Toán 8 - Tập 1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["book_name"], "Toán 8 - Tập 1");

        let (status, _, body) = send(app.clone(), Method::GET, "/books", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(1));

        let (status, _, body) = send(app.clone(), Method::DELETE, &uri, &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, _, _) = send(app, Method::DELETE, &uri, &[], None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
