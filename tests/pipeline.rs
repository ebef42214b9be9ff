use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use httpmock::{
    Method::{GET, POST, PUT},
    Mock, MockServer,
};
use serde_json::json;
use tempfile::TempDir;
use textbook_rag::{
    catalog::{BookUpdate, Catalog, ids},
    config::{Config, EmbeddingProvider, TokenizerKind},
    embedding::get_embedding_client,
    generation::get_chat_client,
    parser::{OcrEngine, ParseError},
    processing::{IngestRequest, ProcessingApi, ProcessingError, ProcessingService},
    qdrant::QdrantService,
    rag::RagRequest,
};

const COLLECTION: &str = "textbook-test";
const CHAPTER: &str = "Chương 1. Số hữu tỉ";
const LESSON: &str = "Bài 1. Tập hợp các số hữu tỉ";

/// OCR stand-in returning fixed page texts and counting calls.
struct ScriptedOcr {
    pages: Vec<String>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl OcrEngine for ScriptedOcr {
    async fn recognize(&self, _pdf: &[u8], _lang: &str) -> Result<Vec<String>, ParseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pages.clone())
    }
}

fn textbook_pages() -> Vec<String> {
    vec![
        format!("{CHAPTER}\n{LESSON}\nSố hữu tỉ là số viết được dưới dạng phân số a/b."),
        "Ví dụ: 1/2 và -3/4 là các số hữu tỉ.".to_string(),
        String::new(),
    ]
}

fn test_config(server: &MockServer, dir: &TempDir) -> Config {
    Config {
        qdrant_url: server.base_url(),
        qdrant_collection_name: COLLECTION.into(),
        qdrant_api_key: None,
        embedding_provider: EmbeddingProvider::OpenAI,
        embedding_model: "text-embedding-test".into(),
        embedding_dimension: 3,
        embedding_batch_size: 1,
        openai_api_key: Some("sk-test".into()),
        openai_base_url: server.base_url(),
        ollama_url: "http://127.0.0.1:11434".into(),
        chat_model: "gpt-test".into(),
        chat_temperature: 0.2,
        database_url: format!("sqlite://{}", dir.path().join("catalog.db").display()),
        data_dir: dir.path().to_path_buf(),
        cache_dir: dir.path().join("cache"),
        force_ocr: true,
        ocr_lang: "vie".into(),
        text_splitter_chunk_size: 50,
        text_splitter_chunk_overlap: 5,
        text_splitter_tokenizer: TokenizerKind::Words,
        rag_min_confidence: 0.25,
        rag_max_k: 20,
        server_host: "127.0.0.1".into(),
        server_port: 0,
    }
}

struct Harness {
    service: ProcessingService,
    ocr_calls: Arc<AtomicUsize>,
    pdf_url: String,
    dir: TempDir,
}

async fn harness(server: &MockServer, pages: Vec<String>) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(server, &dir);
    let pdf_path = dir.path().join("toan7.pdf");
    std::fs::write(&pdf_path, b"%PDF-1.4 scanned").expect("write pdf");

    let catalog = Catalog::connect(&config.database_url)
        .await
        .expect("catalog");
    let ocr_calls = Arc::new(AtomicUsize::new(0));
    let service = ProcessingService::from_parts(
        config.clone(),
        get_embedding_client(&config).expect("embedding client"),
        get_chat_client(&config).expect("chat client"),
        QdrantService::new(&config).expect("qdrant client"),
        catalog,
    )
    .expect("service")
    .with_ocr_engine(Box::new(ScriptedOcr {
        pages,
        calls: ocr_calls.clone(),
    }));

    Harness {
        service,
        ocr_calls,
        pdf_url: format!("file://{}", pdf_path.display()),
        dir,
    }
}

/// Qdrant write endpoints. Deletes are split by body: `filter` deletes clear a book or its
/// stale points, `points` deletes remove specific ids.
struct QdrantWrites<'a> {
    upsert: Mock<'a>,
    filter_delete: Mock<'a>,
    id_delete: Mock<'a>,
}

async fn mock_qdrant_writes(server: &MockServer) -> QdrantWrites<'_> {
    let collection = format!("/collections/{COLLECTION}");
    server
        .mock_async(|when, then| {
            when.method(GET).path(collection.clone());
            then.status(200)
                .json_body(json!({ "status": "ok", "result": { "status": "green" } }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(PUT).path(format!("{collection}/index"));
            then.status(200)
                .json_body(json!({ "status": "ok", "result": { "status": "acknowledged" } }));
        })
        .await;
    let upsert = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(format!("{collection}/points"))
                .query_param("wait", "true");
            then.status(200)
                .json_body(json!({ "status": "ok", "result": { "status": "completed" } }));
        })
        .await;
    let filter_delete = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("{collection}/points/delete"))
                .body_contains("\"filter\"");
            then.status(200)
                .json_body(json!({ "status": "ok", "result": { "status": "completed" } }));
        })
        .await;
    let id_delete = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("{collection}/points/delete"))
                .body_contains("\"points\"");
            then.status(200)
                .json_body(json!({ "status": "ok", "result": { "status": "completed" } }));
        })
        .await;
    QdrantWrites {
        upsert,
        filter_delete,
        id_delete,
    }
}

async fn mock_embeddings(server: &MockServer) -> Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/embeddings")
                .header("authorization", "Bearer sk-test");
            then.status(200).json_body(json!({
                "data": [ { "embedding": [0.1, 0.2, 0.3], "index": 0 } ]
            }));
        })
        .await
}

fn ingest_request(harness: &Harness) -> IngestRequest {
    IngestRequest {
        pdf_url: harness.pdf_url.clone(),
        book_name: "Toán 7".into(),
        grade: 7,
    }
}

#[tokio::test]
async fn ingest_indexes_chunks_and_reuses_page_cache() {
    let server = MockServer::start_async().await;
    let writes = mock_qdrant_writes(&server).await;
    let embeddings = mock_embeddings(&server).await;
    let harness = harness(&server, textbook_pages()).await;

    let response = harness
        .service
        .ingest_pdf(ingest_request(&harness))
        .await
        .expect("ingest");

    let book_id = ids::book_id("Toán 7", 7);
    assert_eq!(response.status, "completed");
    assert_eq!(response.book_id, book_id);
    assert_eq!(response.total_pages, 3);
    assert_eq!(response.chunks_created, 2);
    assert_eq!(response.embeddings_indexed, 2);
    assert_eq!(response.skipped_duplicates, 0);
    writes.upsert.assert_hits_async(1).await;
    writes.filter_delete.assert_hits_async(1).await;
    writes.id_delete.assert_hits_async(0).await;
    embeddings.assert_hits_async(2).await;

    let catalog = harness.service.catalog();
    assert_eq!(catalog.count_chunks(&book_id).await.expect("count"), 2);
    let structure = catalog.book_structure(&book_id).await.expect("structure");
    let lessons = structure.get(CHAPTER).expect("chapter detected");
    assert_eq!(lessons.get(LESSON).map(|l| l.pages.clone()), Some(vec![1, 2]));

    let again = harness
        .service
        .ingest_pdf(ingest_request(&harness))
        .await
        .expect("re-ingest");
    assert_eq!(again.chunks_created, 2);
    assert_eq!(harness.ocr_calls.load(Ordering::SeqCst), 1);
    assert_eq!(catalog.count_chunks(&book_id).await.expect("count"), 2);
    writes.filter_delete.assert_hits_async(2).await;

    let metrics = harness.service.metrics_snapshot();
    assert_eq!(metrics.documents_ingested, 2);
    assert_eq!(metrics.chunks_indexed, 4);
}

#[tokio::test]
async fn blank_scans_are_rejected_before_indexing() {
    let server = MockServer::start_async().await;
    let writes = mock_qdrant_writes(&server).await;
    let harness = harness(&server, vec![String::new(), "   ".into()]).await;

    let error = harness
        .service
        .ingest_pdf(ingest_request(&harness))
        .await
        .expect_err("empty document");

    assert!(matches!(error, ProcessingError::EmptyDocument(name) if name == "Toán 7"));
    writes.upsert.assert_hits_async(0).await;
}

#[tokio::test]
async fn rag_query_scopes_search_to_lesson_book() {
    let server = MockServer::start_async().await;
    mock_qdrant_writes(&server).await;
    mock_embeddings(&server).await;
    let harness = harness(&server, textbook_pages()).await;
    harness
        .service
        .ingest_pdf(ingest_request(&harness))
        .await
        .expect("ingest");

    let book_id = ids::book_id("Toán 7", 7);
    let lesson_id = ids::lesson_id(&ids::chapter_id(&book_id, CHAPTER), LESSON);

    let search = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("/collections/{COLLECTION}/points/query"))
                .body_contains(book_id.as_str())
                .body_contains("score_threshold");
            then.status(200).json_body(json!({
                "status": "ok",
                "result": {
                    "points": [
                        {
                            "id": "p-1",
                            "score": 0.82,
                            "payload": {
                                "book_id": book_id,
                                "book_name": "Toán 7",
                                "grade": 7,
                                "page": 1,
                                "chunk_id": "chunk_000001",
                                "embedding_index": 0,
                                "chunk_hash": "h0",
                                "text": "Số hữu tỉ là số viết được dưới dạng phân số a/b."
                            }
                        },
                        {
                            "id": "p-2",
                            "score": 0.1,
                            "payload": {
                                "book_id": book_id,
                                "book_name": "Toán 7",
                                "grade": 7,
                                "page": 2,
                                "chunk_id": "chunk_000002",
                                "embedding_index": 1,
                                "chunk_hash": "h1",
                                "text": "Ví dụ"
                            }
                        }
                    ]
                }
            }));
        })
        .await;
    let chat = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .body_contains("Tập hợp các số hữu tỉ");
            then.status(200).json_body(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "{\"title\": \"Số hữu tỉ\", \"sections\": [{\"title\": \"Khái niệm\"}]}"
                    }
                }]
            }));
        })
        .await;

    let response = harness
        .service
        .rag_query(RagRequest {
            lesson_id,
            teacher_notes: "Nhấn mạnh ví dụ".into(),
            k: 8,
            book_id: None,
        })
        .await
        .expect("rag query");

    search.assert_async().await;
    chat.assert_async().await;
    assert_eq!(response.indices, vec![0]);
    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].book, "Toán 7");
    assert_eq!(response.sources[0].pages, vec![1]);
    assert!((response.distances[0] - 0.18).abs() < 1e-5);
    assert_eq!(response.outline["sections"][0]["title"], "Khái niệm");
    assert_eq!(response.outline["sources"][0]["confidence"], json!(0.82));
}

#[tokio::test]
async fn delete_book_removes_vectors_and_rows() {
    let server = MockServer::start_async().await;
    let writes = mock_qdrant_writes(&server).await;
    mock_embeddings(&server).await;
    let harness = harness(&server, textbook_pages()).await;
    harness
        .service
        .ingest_pdf(ingest_request(&harness))
        .await
        .expect("ingest");

    let removal = harness.service.delete_book("Toán 7").await.expect("delete");
    assert_eq!(removal.book_id, ids::book_id("Toán 7", 7));
    assert_eq!(removal.deleted.chunks, 2);
    assert_eq!(removal.deleted.chapters, 1);
    assert_eq!(removal.deleted.lessons, 1);
    writes.filter_delete.assert_hits_async(2).await;

    let error = harness
        .service
        .delete_book("Toán 7")
        .await
        .expect_err("already deleted");
    assert!(matches!(error, ProcessingError::NotFound(_)));
}

/// Chat endpoint answering with a minimal outline.
async fn mock_chat(server: &MockServer) -> Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "{\"title\": \"Số hữu tỉ\", \"sections\": []}"
                    }
                }]
            }));
        })
        .await
}

/// Search endpoint returning one hit per `(score, book_name)` pair.
async fn mock_search<'a>(server: &'a MockServer, book_id: &str, hits: &[(f64, &str)]) -> Mock<'a> {
    let points: Vec<_> = hits
        .iter()
        .zip(1u32..)
        .map(|((score, book_name), page)| {
            json!({
                "id": format!("p-{page}"),
                "score": score,
                "payload": {
                    "book_id": book_id,
                    "book_name": book_name,
                    "grade": 7,
                    "page": page,
                    "chunk_id": format!("chunk_{page:06}"),
                    "embedding_index": page - 1,
                    "chunk_hash": format!("h{page}"),
                    "text": "Số hữu tỉ là số viết được dưới dạng phân số a/b."
                }
            })
        })
        .collect();
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path(format!("/collections/{COLLECTION}/points/query"));
            then.status(200)
                .json_body(json!({ "status": "ok", "result": { "points": points } }));
        })
        .await
}

fn notes_only_query(notes: &str) -> RagRequest {
    RagRequest {
        lesson_id: "unknown-lesson".into(),
        teacher_notes: notes.into(),
        k: 5,
        book_id: None,
    }
}

#[tokio::test]
async fn failed_reindex_keeps_previous_content() {
    let server = MockServer::start_async().await;
    let writes = mock_qdrant_writes(&server).await;
    mock_embeddings(&server).await;
    let harness = harness(&server, textbook_pages()).await;
    harness
        .service
        .ingest_pdf(ingest_request(&harness))
        .await
        .expect("ingest");
    let book_id = ids::book_id("Toán 7", 7);
    let catalog = harness.service.catalog();
    let before = catalog.book_summaries().await.expect("summaries");

    writes.upsert.delete_async().await;
    let failing = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path(format!("/collections/{COLLECTION}/points"));
            then.status(500)
                .json_body(json!({ "status": { "error": "No space left on device" } }));
        })
        .await;

    let error = harness
        .service
        .ingest_pdf(ingest_request(&harness))
        .await
        .expect_err("upsert fails");
    assert!(matches!(error, ProcessingError::Qdrant(_)));
    assert!(failing.hits_async().await >= 1);
    writes.filter_delete.assert_hits_async(1).await;
    writes.id_delete.assert_hits_async(0).await;
    assert_eq!(catalog.count_chunks(&book_id).await.expect("count"), 2);
    assert_eq!(catalog.book_summaries().await.expect("summaries"), before);
}

#[tokio::test]
async fn catalogue_failure_removes_new_points() {
    let server = MockServer::start_async().await;
    let writes = mock_qdrant_writes(&server).await;
    mock_embeddings(&server).await;
    let harness = harness(&server, textbook_pages()).await;

    let url = format!("sqlite://{}", harness.dir.path().join("catalog.db").display());
    let pool = sqlx::SqlitePool::connect(&url).await.expect("pool");
    sqlx::query(
        "CREATE TRIGGER reject_chunks BEFORE INSERT ON chunks
         BEGIN SELECT RAISE(ABORT, 'chunk writes disabled'); END",
    )
    .execute(&pool)
    .await
    .expect("trigger");

    let error = harness
        .service
        .ingest_pdf(ingest_request(&harness))
        .await
        .expect_err("catalogue write fails");
    assert!(matches!(error, ProcessingError::Catalog(_)));
    writes.upsert.assert_hits_async(1).await;
    writes.id_delete.assert_hits_async(1).await;
    writes.filter_delete.assert_hits_async(0).await;
    let book_id = ids::book_id("Toán 7", 7);
    assert_eq!(
        harness.service.catalog().count_chunks(&book_id).await.expect("count"),
        0
    );
    assert_eq!(harness.service.metrics_snapshot().documents_ingested, 0);
}

#[tokio::test]
async fn low_confidence_hits_skip_generation() {
    let server = MockServer::start_async().await;
    mock_embeddings(&server).await;
    let search = mock_search(&server, "book", &[(0.2, "Toán 7"), (0.05, "Toán 7")]).await;
    let chat = mock_chat(&server).await;
    let harness = harness(&server, textbook_pages()).await;

    let error = harness
        .service
        .rag_query(notes_only_query("số hữu tỉ"))
        .await
        .expect_err("nothing above threshold");

    assert!(
        matches!(error, ProcessingError::InsufficientContext { threshold } if (threshold - 0.25).abs() < 1e-6)
    );
    search.assert_async().await;
    chat.assert_hits_async(0).await;
    assert_eq!(harness.service.metrics_snapshot().queries_served, 0);
}

#[tokio::test]
async fn file_sources_outside_data_dir_are_refused() {
    let server = MockServer::start_async().await;
    let writes = mock_qdrant_writes(&server).await;
    let harness = harness(&server, textbook_pages()).await;
    let elsewhere = tempfile::tempdir().expect("tempdir");
    let outside = elsewhere.path().join("secret.pdf");
    std::fs::write(&outside, b"%PDF-1.4 private").expect("write pdf");

    for pdf_url in [
        format!("file://{}", outside.display()),
        format!(
            "file://{}/../{}/secret.pdf",
            harness.dir.path().display(),
            elsewhere
                .path()
                .file_name()
                .and_then(|name| name.to_str())
                .expect("tempdir name")
        ),
    ] {
        let error = harness
            .service
            .ingest_pdf(IngestRequest {
                pdf_url,
                book_name: "Toán 7".into(),
                grade: 7,
            })
            .await
            .expect_err("outside data dir");
        assert!(matches!(error, ProcessingError::BadRequest(_)));
    }
    assert_eq!(harness.ocr_calls.load(Ordering::SeqCst), 0);
    writes.upsert.assert_hits_async(0).await;
}

#[tokio::test]
async fn renamed_book_shows_in_sources_and_keeps_its_id() {
    let server = MockServer::start_async().await;
    mock_qdrant_writes(&server).await;
    mock_embeddings(&server).await;
    mock_chat(&server).await;
    let harness = harness(&server, textbook_pages()).await;
    harness
        .service
        .ingest_pdf(ingest_request(&harness))
        .await
        .expect("ingest");
    let book_id = ids::book_id("Toán 7", 7);
    let catalog = harness.service.catalog();
    catalog
        .update_book(
            &book_id,
            BookUpdate {
                book_name: Some("Toán 7 KNTT".into()),
                grade: None,
            },
        )
        .await
        .expect("rename");

    mock_search(&server, &book_id, &[(0.8, "Toán 7")]).await;
    let response = harness
        .service
        .rag_query(notes_only_query("số hữu tỉ"))
        .await
        .expect("rag query");
    assert_eq!(response.sources[0].book, "Toán 7 KNTT");

    let again = harness
        .service
        .ingest_pdf(IngestRequest {
            book_name: "Toán 7 KNTT".into(),
            ..ingest_request(&harness)
        })
        .await
        .expect("re-ingest under new name");
    assert_eq!(again.book_id, book_id);
    let summaries = catalog.book_summaries().await.expect("summaries");
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries["Toán 7 KNTT"].chunks, 2);
}
