//! Admin ingestion routes.

use super::{ApiJson, AppError, DeleteResponse};
use crate::catalog::BookSummary;
use crate::processing::{BookStructureView, IngestRequest, IngestResponse, ProcessingApi};
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, get},
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub(super) fn routes<S>() -> Router<Arc<S>>
where
    S: ProcessingApi + 'static,
{
    Router::new()
        .route(
            "/admin/ingest",
            get(list_books::<S>).post(ingest_book::<S>),
        )
        .route("/admin/ingest/:book", delete(delete_book::<S>))
        .route("/admin/ingest/:book/structure", get(book_structure::<S>))
}

#[derive(Serialize)]
struct BooksResponse {
    books: BTreeMap<String, BookSummary>,
}

async fn list_books<S>(State(service): State<Arc<S>>) -> Result<Json<BooksResponse>, AppError>
where
    S: ProcessingApi,
{
    let books = service.list_books().await?;
    Ok(Json(BooksResponse { books }))
}

/// Download, parse and index a PDF. Blocks until the book is fully indexed.
async fn ingest_book<S>(
    State(service): State<Arc<S>>,
    ApiJson(request): ApiJson<IngestRequest>,
) -> Result<Json<IngestResponse>, AppError>
where
    S: ProcessingApi,
{
    let book_name = request.book_name.clone();
    let response = service.ingest_pdf(request).await?;
    tracing::info!(
        book = %book_name,
        book_id = %response.book_id,
        chunks = response.chunks_created,
        duration_seconds = response.duration_seconds,
        "Ingest request completed"
    );
    Ok(Json(response))
}

async fn book_structure<S>(
    State(service): State<Arc<S>>,
    Path(book): Path<String>,
) -> Result<Json<BookStructureView>, AppError>
where
    S: ProcessingApi,
{
    Ok(Json(service.book_structure(&book).await?))
}

async fn delete_book<S>(
    State(service): State<Arc<S>>,
    Path(book): Path<String>,
) -> Result<Json<DeleteResponse>, AppError>
where
    S: ProcessingApi,
{
    let removal = service.delete_book(&book).await?;
    Ok(DeleteResponse::new(
        format!(
            "Book '{}' deleted with {} chunk(s)",
            removal.book_name, removal.deleted.chunks
        ),
        removal.deleted.chunks,
    ))
}
