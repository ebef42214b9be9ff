use super::ApiJson;
use crate::processing::ProcessingApi;
use crate::slides::{SlideDeck, SlideRequest, build_deck};
use axum::{Json, Router, routing::post};
use std::sync::Arc;

pub(super) fn routes<S>() -> Router<Arc<S>>
where
    S: ProcessingApi + 'static,
{
    Router::new().route("/slides/template", post(template))
}

async fn template(ApiJson(request): ApiJson<SlideRequest>) -> Json<SlideDeck> {
    Json(build_deck(&request))
}

#[cfg(test)]
mod tests {
    use crate::api::create_router;
    use crate::api::test_support::{StubService, send};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn template_renders_outline_sections() {
        let app = create_router(StubService::new().await);
        let (status, _, body) = send(
            app,
            Method::POST,
            "/slides/template",
            &[],
            Some(json!({
                "title": "Hàm số bậc nhất",
                "outline": {"sections": [{"title": "Định nghĩa", "bullets": ["y = ax + b"]}]}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let slides = body["slides"].as_array().expect("slides");
        assert_eq!(slides.len(), 3);
        assert_eq!(slides[1]["type"], "content");
        assert_eq!(slides[1]["bullets"], json!(["y = ax + b"]));
        assert_eq!(slides[1]["examples"], json!([]));
    }
}
