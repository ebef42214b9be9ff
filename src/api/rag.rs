use super::{ApiJson, AppError};
use crate::processing::ProcessingApi;
use crate::rag::{RagRequest, RagResponse};
use axum::{Json, Router, extract::State, routing::post};
use std::sync::Arc;

pub(super) fn routes<S>() -> Router<Arc<S>>
where
    S: ProcessingApi + 'static,
{
    Router::new().route("/rag/query", post(rag_query::<S>))
}

async fn rag_query<S>(
    State(service): State<Arc<S>>,
    ApiJson(request): ApiJson<RagRequest>,
) -> Result<Json<RagResponse>, AppError>
where
    S: ProcessingApi,
{
    let lesson_id = request.lesson_id.clone();
    let response = service.rag_query(request).await?;
    tracing::info!(lesson_id = %lesson_id, sources = response.sources.len(), "RAG query answered");
    Ok(Json(response))
}
