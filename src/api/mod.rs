//! HTTP surface for the textbook RAG service.
//!
//! The router exposes:
//!
//! - `GET /` – Liveness check.
//! - `GET /metrics` – Ingestion and query counters.
//! - `/admin/ingest` – Ingest PDFs, list ingested books, inspect a book's structure, delete a
//!   book together with its vectors. `{book}` path segments accept a book name or id.
//! - `POST /rag/query` – Retrieve lesson context and generate an outline.
//! - `/grades`, `/books`, `/chapters`, `/lessons`, `/subjects` – Catalogue CRUD. Subject routes
//!   require the `X-User-Id` header injected by the gateway.
//! - `POST /slides/template` – Turn an outline into a slide skeleton.
//!
//! Errors are returned as `{"error": "<message>"}` with a status derived from the failure.

mod books;
mod grades;
mod ingest;
mod rag;
mod sections;
mod slides;
mod subjects;

use crate::catalog::CatalogError;
use crate::parser::ParseError;
use crate::processing::{ProcessingApi, ProcessingError};
use axum::{
    Json, Router,
    async_trait,
    extract::{FromRequest, Request, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the HTTP router over a processing implementation.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: ProcessingApi + 'static,
{
    Router::new()
        .route("/", get(health))
        .route("/metrics", get(get_metrics::<S>))
        .merge(ingest::routes::<S>())
        .merge(rag::routes::<S>())
        .merge(grades::routes::<S>())
        .merge(books::routes::<S>())
        .merge(sections::routes::<S>())
        .merge(subjects::routes::<S>())
        .merge(slides::routes::<S>())
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "Textbook RAG service is running",
    })
}

/// Return the ingestion and query counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<crate::metrics::MetricsSnapshot>
where
    S: ProcessingApi,
{
    Json(service.metrics_snapshot())
}

/// Body returned by delete endpoints.
#[derive(Debug, Serialize)]
struct DeleteResponse {
    success: bool,
    message: String,
    deleted_count: u64,
}

impl DeleteResponse {
    fn new(message: String, deleted_count: u64) -> Json<Self> {
        Json(Self {
            success: true,
            message,
            deleted_count,
        })
    }
}

/// JSON body extractor whose rejections use the `{"error": ...}` shape of every other failure.
struct ApiJson<T>(T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(AppError::Body)?;
        Ok(Self(value))
    }
}

/// Handler error carrying the status mapping for pipeline and catalogue failures.
#[derive(Debug)]
enum AppError {
    Processing(ProcessingError),
    Body(JsonRejection),
    Unauthorized,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Body(rejection) => rejection.status(),
            AppError::Processing(error) => match error {
                ProcessingError::NotFound(_)
                | ProcessingError::Catalog(CatalogError::NotFound(_)) => StatusCode::NOT_FOUND,
                ProcessingError::Conflict(_)
                | ProcessingError::BadRequest(_)
                | ProcessingError::Catalog(CatalogError::Conflict(_) | CatalogError::Invalid(_)) => {
                    StatusCode::BAD_REQUEST
                }
                ProcessingError::EmptyDocument(_)
                | ProcessingError::InsufficientContext { .. }
                | ProcessingError::Parse(ParseError::InvalidPdf(_)) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                ProcessingError::Download(_) => StatusCode::BAD_GATEWAY,
                ProcessingError::Parse(ParseError::OcrUnavailable(_)) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            AppError::Unauthorized => (
                status,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                Json(json!({ "error": "Missing X-User-Id header" })),
            )
                .into_response(),
            AppError::Body(rejection) => {
                let message = rejection.body_text();
                tracing::warn!(status = status.as_u16(), error = %message, "Request body rejected");
                (status, Json(json!({ "error": message }))).into_response()
            }
            AppError::Processing(error) => {
                if status.is_server_error() {
                    tracing::error!(status = status.as_u16(), error = %error, "Request failed");
                } else {
                    tracing::warn!(status = status.as_u16(), error = %error, "Request rejected");
                }
                (status, Json(json!({ "error": error.to_string() }))).into_response()
            }
        }
    }
}

impl From<ProcessingError> for AppError {
    fn from(inner: ProcessingError) -> Self {
        Self::Processing(inner)
    }
}

impl From<CatalogError> for AppError {
    fn from(inner: CatalogError) -> Self {
        Self::Processing(inner.into())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::catalog::{BookSummary, Catalog, test_support::temp_catalog};
    use crate::metrics::{MetricsSnapshot, ServiceMetrics};
    use crate::processing::{
        BookRemoval, BookStructureView, IngestRequest, IngestResponse, ProcessingApi,
        ProcessingError,
    };
    use crate::rag::{RagRequest, RagResponse, Source};
    use async_trait::async_trait;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    /// Pipeline stub backed by a real temporary catalogue.
    pub(crate) struct StubService {
        catalog: Catalog,
        _dir: tempfile::TempDir,
        pub(crate) ingests: Mutex<Vec<IngestRequest>>,
        pub(crate) rag_requests: Mutex<Vec<RagRequest>>,
        metrics: ServiceMetrics,
    }

    impl StubService {
        pub(crate) async fn new() -> Arc<Self> {
            let (catalog, dir) = temp_catalog().await;
            Arc::new(Self {
                catalog,
                _dir: dir,
                ingests: Mutex::new(Vec::new()),
                rag_requests: Mutex::new(Vec::new()),
                metrics: ServiceMetrics::new(),
            })
        }
    }

    #[async_trait]
    impl ProcessingApi for StubService {
        async fn ingest_pdf(
            &self,
            request: IngestRequest,
        ) -> Result<IngestResponse, ProcessingError> {
            if request.pdf_url.contains("unreachable") {
                return Err(ProcessingError::Download(format!(
                    "{} returned 404 Not Found",
                    request.pdf_url
                )));
            }
            self.ingests.lock().await.push(request.clone());
            self.metrics.record_ingestion(3, 1);
            Ok(IngestResponse {
                status: "completed".into(),
                book_id: crate::catalog::ids::book_id(&request.book_name, request.grade),
                chunks_created: 3,
                embeddings_indexed: 3,
                total_pages: 2,
                duration_seconds: 1,
                skipped_duplicates: 0,
            })
        }

        async fn list_books(&self) -> Result<BTreeMap<String, BookSummary>, ProcessingError> {
            Ok(self.catalog.book_summaries().await?)
        }

        async fn book_structure(&self, book: &str) -> Result<BookStructureView, ProcessingError> {
            let found = self
                .catalog
                .find_book(book)
                .await?
                .ok_or_else(|| ProcessingError::NotFound(format!("Book '{book}'")))?;
            Ok(BookStructureView {
                structure: self.catalog.book_structure(&found.book_id).await?,
                book: found.book_name,
                book_id: found.book_id,
            })
        }

        async fn delete_book(&self, book: &str) -> Result<BookRemoval, ProcessingError> {
            let found = self
                .catalog
                .find_book(book)
                .await?
                .ok_or_else(|| ProcessingError::NotFound(format!("Book '{book}'")))?;
            let deleted = self.catalog.delete_book(&found.book_id).await?;
            Ok(BookRemoval {
                book_name: found.book_name,
                book_id: found.book_id,
                deleted,
            })
        }

        async fn rag_query(&self, request: RagRequest) -> Result<RagResponse, ProcessingError> {
            self.rag_requests.lock().await.push(request.clone());
            if request.teacher_notes == "nothing relevant" {
                return Err(ProcessingError::InsufficientContext { threshold: 0.25 });
            }
            let sources = vec![Source {
                book: "Toán 8".into(),
                pages: vec![12],
                confidence: 0.91,
            }];
            Ok(RagResponse {
                outline: json!({"sections": [], "sources": sources}),
                sources,
                indices: vec![4],
                distances: vec![0.09],
            })
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            self.metrics.snapshot()
        }

        fn catalog(&self) -> &Catalog {
            &self.catalog
        }
    }

    /// Send one request through the router and decode the JSON body (`Null` when empty).
    pub(crate) async fn send(
        app: Router,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> (StatusCode, axum::http::HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = app.oneshot(request).await.expect("router response");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, headers, json)
    }
}
