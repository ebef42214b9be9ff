//! Processing service coordinating parsing, chunking, embedding, Qdrant and the catalogue.

use crate::{
    catalog::{BookSummary, Catalog, ChunkRecord, ids},
    config::Config,
    embedding::{EmbeddingClient, EmbeddingClientError, get_embedding_client},
    generation::{ChatClient, ChatRequest, get_chat_client},
    metrics::{MetricsSnapshot, ServiceMetrics},
    parser::{OcrEngine, ParseOptions, StructureDetector, TesseractCli, parse_pdf_bytes},
    processing::{
        cache::PageCache,
        chunking::{TokenCounter, build_token_counter, chunk_text},
        mappers::{
            PageChunk, PreparedChunk, catalog_chunk, dedupe_chunks, outline_to_drafts,
            retrieved_chunk, section_ids,
        },
        types::{BookRemoval, BookStructureView, IngestRequest, IngestResponse, ProcessingError},
    },
    qdrant::{
        ChunkPayload, IndexSummary, PointInsert, QdrantService, SearchFilterArgs, book_filter,
        build_search_filter, current_timestamp_rfc3339, generate_point_id, stale_points_filter,
    },
    rag::{
        LessonInfo, RagRequest, RagResponse, RetrievedChunk, SYSTEM_PROMPT, assemble_response,
        build_prompt, build_query_text, clamp_k,
    },
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Coordinates ingestion and retrieval over the vector index and the catalogue.
///
/// The service owns long-lived handles to the embedding and chat clients, the Qdrant transport,
/// the catalogue pool and the metrics registry. Construct it once near process start and share
/// it through an `Arc`. Ingestion and book deletion are serialised by an internal write lock;
/// queries never take it.
pub struct ProcessingService {
    config: Config,
    embedding_client: Box<dyn EmbeddingClient + Send + Sync>,
    chat_client: Box<dyn ChatClient + Send + Sync>,
    ocr: Box<dyn OcrEngine>,
    qdrant: QdrantService,
    catalog: Catalog,
    http: reqwest::Client,
    cache: PageCache,
    token_counter: TokenCounter,
    write_lock: Mutex<()>,
    metrics: Arc<ServiceMetrics>,
}

/// Abstraction over the pipeline used by the HTTP surface.
#[async_trait]
pub trait ProcessingApi: Send + Sync {
    /// Download, parse, chunk, embed and index a textbook PDF.
    async fn ingest_pdf(&self, request: IngestRequest) -> Result<IngestResponse, ProcessingError>;

    /// Per-book grade, chunk and page counts keyed by book name.
    async fn list_books(&self) -> Result<BTreeMap<String, BookSummary>, ProcessingError>;

    /// Chapter → lesson view of a book named by name or id.
    async fn book_structure(&self, book: &str) -> Result<BookStructureView, ProcessingError>;

    /// Remove a book (named by name or id) with its chapters, lessons, chunks and vectors.
    async fn delete_book(&self, book: &str) -> Result<BookRemoval, ProcessingError>;

    /// Retrieve context for a lesson and ask the chat model for an outline.
    async fn rag_query(&self, request: RagRequest) -> Result<RagResponse, ProcessingError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;

    /// Catalogue backing the CRUD endpoints.
    fn catalog(&self) -> &Catalog;
}

impl ProcessingService {
    /// Build the service from configuration, connecting to every backing store.
    pub async fn new(config: &Config) -> Result<Self, ProcessingError> {
        tracing::info!("Initializing embedding and chat clients");
        let embedding_client = get_embedding_client(config)?;
        let chat_client = get_chat_client(config)?;
        let qdrant = QdrantService::new(config)?;
        let catalog = Catalog::connect(&config.database_url).await?;
        tracing::info!(database_url = %config.database_url, "Catalogue ready");

        let vector_size = config.embedding_dimension as u64;
        tracing::debug!(
            collection = %qdrant.collection(),
            vector_size,
            "Ensuring primary collection"
        );
        qdrant.ensure_collection(vector_size).await?;
        tracing::debug!(collection = %qdrant.collection(), "Primary collection ready");

        Self::from_parts(config.clone(), embedding_client, chat_client, qdrant, catalog)
    }

    /// Assemble a service from already constructed components.
    pub fn from_parts(
        config: Config,
        embedding_client: Box<dyn EmbeddingClient + Send + Sync>,
        chat_client: Box<dyn ChatClient + Send + Sync>,
        qdrant: QdrantService,
        catalog: Catalog,
    ) -> Result<Self, ProcessingError> {
        let token_counter =
            build_token_counter(config.text_splitter_tokenizer, &config.embedding_model)?;
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|error| ProcessingError::Download(error.to_string()))?;

        Ok(Self {
            cache: PageCache::new(config.cache_dir.clone()),
            config,
            embedding_client,
            chat_client,
            ocr: Box::new(TesseractCli::default()),
            qdrant,
            catalog,
            http,
            token_counter,
            write_lock: Mutex::new(()),
            metrics: Arc::new(ServiceMetrics::new()),
        })
    }

    /// Replace the OCR engine used for scanned PDFs.
    pub fn with_ocr_engine(mut self, ocr: Box<dyn OcrEngine>) -> Self {
        self.ocr = ocr;
        self
    }

    fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            prefer_text: true,
            force_ocr: self.config.force_ocr,
            lang: self.config.ocr_lang.clone(),
        }
    }

    /// Fetch PDF bytes from an HTTP(S) URL or a `file://` path.
    async fn fetch_pdf(&self, url: &str) -> Result<Vec<u8>, ProcessingError> {
        if let Some(path) = url.strip_prefix("file://") {
            let path = self.local_pdf_path(path).await?;
            return tokio::fs::read(&path).await.map_err(|error| {
                ProcessingError::Download(format!("{}: {error}", path.display()))
            });
        }

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|error| ProcessingError::Download(format!("{url}: {error}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProcessingError::Download(format!("{url} returned {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|error| ProcessingError::Download(format!("{url}: {error}")))?;
        tracing::debug!(url, bytes = bytes.len(), "PDF downloaded");
        Ok(bytes.to_vec())
    }

    /// Resolve a `file://` path, refusing anything outside the data directory.
    async fn local_pdf_path(&self, path: &str) -> Result<PathBuf, ProcessingError> {
        let root = tokio::fs::canonicalize(&self.config.data_dir)
            .await
            .map_err(|error| {
                ProcessingError::BadRequest(format!(
                    "file:// sources need the data directory {}: {error}",
                    self.config.data_dir.display()
                ))
            })?;
        let resolved = tokio::fs::canonicalize(path)
            .await
            .map_err(|error| ProcessingError::Download(format!("{path}: {error}")))?;
        if !resolved.starts_with(&root) {
            tracing::warn!(path, root = %root.display(), "Rejected file:// source outside data directory");
            return Err(ProcessingError::BadRequest(format!(
                "file:// sources must live under {}",
                self.config.data_dir.display()
            )));
        }
        Ok(resolved)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), ProcessingError> {
        let expected = self.config.embedding_dimension;
        let actual = vector.len();
        if actual != expected {
            return Err(ProcessingError::DimensionMismatch { expected, actual });
        }
        Ok(())
    }

    async fn resolve_book(&self, book: &str) -> Result<crate::catalog::Book, ProcessingError> {
        self.catalog
            .find_book(book)
            .await?
            .ok_or_else(|| ProcessingError::NotFound(format!("Book '{book}'")))
    }

    /// Recover hits whose Qdrant payload could not be decoded from the catalogue rows of the
    /// same points.
    async fn hits_from_catalog(
        &self,
        unresolved: Vec<(String, f32)>,
    ) -> Result<Vec<RetrievedChunk>, ProcessingError> {
        let ids: Vec<String> = unresolved.iter().map(|(id, _)| id.clone()).collect();
        let scores: HashMap<String, f32> = unresolved.into_iter().collect();
        let mut hits = Vec::new();
        for record in self.catalog.chunks_by_point_ids(&ids).await? {
            let score = scores.get(&record.point_id).copied().unwrap_or_default();
            hits.extend(catalog_chunk(record, score));
        }

        tracing::debug!(
            requested = ids.len(),
            recovered = hits.len(),
            "Recovered hits from catalogue rows"
        );
        Ok(hits)
    }

    /// Replace payload book names with the current catalogue names so renames show up in
    /// sources without re-indexing. Books missing from the catalogue keep what the hit carries.
    async fn refresh_book_names(&self, hits: &mut [RetrievedChunk]) -> Result<(), ProcessingError> {
        let mut names: HashMap<String, Option<String>> = HashMap::new();
        for hit in hits.iter_mut() {
            if !names.contains_key(&hit.book_id) {
                let name = self
                    .catalog
                    .get_book(&hit.book_id)
                    .await?
                    .map(|book| book.book_name);
                names.insert(hit.book_id.clone(), name);
            }
            if let Some(Some(name)) = names.get(&hit.book_id) {
                hit.book_name.clone_from(name);
            }
        }
        Ok(())
    }

    /// Run the full ingestion pipeline for one PDF.
    pub async fn ingest_pdf(
        &self,
        request: IngestRequest,
    ) -> Result<IngestResponse, ProcessingError> {
        let started = Instant::now();
        let book_name = request.book_name.trim().to_string();
        let pdf_url = request.pdf_url.trim().to_string();
        let grade = request.grade;
        if book_name.is_empty() {
            return Err(ProcessingError::BadRequest("book_name must not be empty".into()));
        }
        if pdf_url.is_empty() {
            return Err(ProcessingError::BadRequest("pdf_url must not be empty".into()));
        }
        tracing::info!(book = %book_name, grade, url = %pdf_url, "Ingestion started");

        let bytes = self.fetch_pdf(&pdf_url).await?;
        let cache_key = PageCache::key(&book_name, grade, &bytes);
        let pages = match self.cache.load(&cache_key).await {
            Some(pages) => pages,
            None => {
                let pages = parse_pdf_bytes(bytes, &self.parse_options(), self.ocr.as_ref()).await?;
                self.cache.store(&cache_key, &pages).await;
                pages
            }
        };
        let total_pages = pages.len();
        if pages.iter().all(|page| page.text.trim().is_empty()) {
            return Err(ProcessingError::EmptyDocument(book_name));
        }

        let structure = StructureDetector::new().analyze(&pages);
        let mut page_chunks = Vec::new();
        for (page, section) in pages.iter().zip(&structure.sections) {
            for text in chunk_text(
                &page.text,
                self.config.text_splitter_chunk_size,
                self.config.text_splitter_chunk_overlap,
                &self.token_counter,
            )? {
                page_chunks.push(PageChunk {
                    page: page.page_num,
                    chapter: section.chapter.clone(),
                    lesson: section.lesson.clone(),
                    text,
                });
            }
        }
        let (prepared, skipped_duplicates) = dedupe_chunks(page_chunks);
        if prepared.is_empty() {
            return Err(ProcessingError::EmptyDocument(book_name));
        }
        tracing::info!(
            pages = total_pages,
            chunks = prepared.len(),
            skipped_duplicates,
            chunk_size = self.config.text_splitter_chunk_size,
            overlap = self.config.text_splitter_chunk_overlap,
            "Chunking completed"
        );

        let texts: Vec<String> = prepared.iter().map(|p| p.chunk.text.clone()).collect();
        let vectors = self.embedding_client.generate_embeddings(texts).await?;
        for vector in &vectors {
            self.check_dimension(vector)?;
        }
        debug_assert_eq!(prepared.len(), vectors.len());

        let guard = self.write_lock.lock().await;
        self.qdrant
            .ensure_collection(self.config.embedding_dimension as u64)
            .await?;
        self.catalog.ensure_grade(grade).await?;
        let book = self
            .catalog
            .upsert_book(
                &book_name,
                grade,
                u32::try_from(total_pages).unwrap_or(u32::MAX),
                Some(&pdf_url),
            )
            .await?;
        // Existing chapters and lessons keep their ids, so renames survive re-ingestion.
        let drafts = self
            .catalog
            .resolve_outline(&book.book_id, &outline_to_drafts(&book.book_id, &structure))
            .await?;

        let indexed_at = current_timestamp_rfc3339();
        let mut points = Vec::with_capacity(prepared.len());
        let mut records = Vec::with_capacity(prepared.len());
        for (index, (PreparedChunk { chunk, chunk_hash }, vector)) in
            prepared.into_iter().zip(vectors).enumerate()
        {
            let (chapter_id, lesson_id) =
                section_ids(&drafts, chunk.chapter.as_deref(), chunk.lesson.as_deref());
            let point_id = generate_point_id();
            let chunk_id = ids::chunk_label(index);
            let embedding_index = index as u64;
            records.push(ChunkRecord {
                point_id: point_id.clone(),
                chunk_id: chunk_id.clone(),
                book_id: book.book_id.clone(),
                chapter_id: chapter_id.clone(),
                lesson_id: lesson_id.clone(),
                chapter: chunk.chapter.clone(),
                lesson: chunk.lesson.clone(),
                page: chunk.page,
                text: chunk.text.clone(),
                embedding_index,
                chunk_hash: chunk_hash.clone(),
            });
            points.push(PointInsert {
                id: point_id,
                vector,
                payload: ChunkPayload {
                    book_id: book.book_id.clone(),
                    book_name: book.book_name.clone(),
                    grade,
                    page: chunk.page,
                    chapter_id,
                    chapter: chunk.chapter,
                    lesson_id,
                    lesson: chunk.lesson,
                    chunk_id,
                    embedding_index,
                    chunk_hash,
                    text: chunk.text,
                    indexed_at: indexed_at.clone(),
                },
            });
        }
        let new_ids: Vec<String> = points.iter().map(|point| point.id.clone()).collect();

        // Previous points stay in place until the catalogue points at the new ones.
        let IndexSummary { upserted } = self.qdrant.upsert_points(points).await?;
        let previous = match self
            .catalog
            .replace_book_content(&book.book_id, &drafts, &records)
            .await
        {
            Ok(previous) => previous,
            Err(error) => {
                tracing::error!(book_id = %book.book_id, error = %error, "Catalogue write failed; removing new points");
                if let Err(cleanup) = self.qdrant.delete_point_ids(&new_ids).await {
                    tracing::warn!(book_id = %book.book_id, error = %cleanup, "Failed to remove orphaned points");
                }
                return Err(error.into());
            }
        };
        self.qdrant
            .delete_points(stale_points_filter(&book.book_id, &new_ids))
            .await?;
        tracing::debug!(book_id = %book.book_id, replaced = previous.len(), "Previous points removed");
        drop(guard);

        let duration_seconds = started.elapsed().as_secs();
        self.metrics
            .record_ingestion(records.len() as u64, duration_seconds);
        tracing::info!(
            book_id = %book.book_id,
            chunks = records.len(),
            upserted,
            chapters = drafts.len(),
            duration_seconds,
            "Ingestion completed"
        );

        Ok(IngestResponse {
            status: "completed".to_string(),
            book_id: book.book_id,
            chunks_created: records.len(),
            embeddings_indexed: upserted,
            total_pages,
            duration_seconds,
            skipped_duplicates,
        })
    }

    /// Remove a book from Qdrant and the catalogue.
    pub async fn delete_book(&self, book: &str) -> Result<BookRemoval, ProcessingError> {
        let _guard = self.write_lock.lock().await;
        let found = self.resolve_book(book).await?;
        self.qdrant.delete_points(book_filter(&found.book_id)).await?;
        let deleted = self.catalog.delete_book(&found.book_id).await?;
        tracing::info!(
            book_id = %found.book_id,
            chunks = deleted.chunks,
            chapters = deleted.chapters,
            lessons = deleted.lessons,
            "Book deleted"
        );
        Ok(BookRemoval {
            book_name: found.book_name,
            book_id: found.book_id,
            deleted,
        })
    }

    /// Chapter → lesson view of a book.
    pub async fn book_structure(&self, book: &str) -> Result<BookStructureView, ProcessingError> {
        let found = self.resolve_book(book).await?;
        let structure = self.catalog.book_structure(&found.book_id).await?;
        Ok(BookStructureView {
            book: found.book_name,
            book_id: found.book_id,
            structure,
        })
    }

    /// Retrieve lesson context and generate an outline.
    pub async fn rag_query(&self, request: RagRequest) -> Result<RagResponse, ProcessingError> {
        let RagRequest {
            lesson_id,
            teacher_notes,
            k,
            book_id,
        } = request;

        let lesson: LessonInfo = match self.catalog.lesson_context(&lesson_id).await? {
            Some(context) => context.into(),
            None => {
                tracing::warn!(lesson_id = %lesson_id, "Unknown lesson; querying with teacher notes only");
                LessonInfo::default()
            }
        };
        let query = build_query_text(&lesson, &teacher_notes).ok_or_else(|| {
            ProcessingError::BadRequest(
                "Query is empty: provide a known lesson_id or teacher_notes".into(),
            )
        })?;
        let limit = clamp_k(k, self.config.rag_max_k);
        let book_id = book_id
            .filter(|id| !id.trim().is_empty())
            .or_else(|| lesson.book_id.clone());

        let vector = self
            .embedding_client
            .generate_embeddings(vec![query])
            .await?
            .pop()
            .ok_or_else(|| {
                EmbeddingClientError::InvalidResponse("no vector returned for the query".into())
            })?;
        self.check_dimension(&vector)?;

        let threshold = self.config.rag_min_confidence;
        let filter = build_search_filter(&SearchFilterArgs {
            book_id,
            ..Default::default()
        });
        let mut hits: Vec<RetrievedChunk> = Vec::new();
        let mut unresolved = Vec::new();
        for point in self
            .qdrant
            .search_points(vector, filter, limit, Some(threshold))
            .await?
        {
            if point.score < threshold {
                continue;
            }
            let (id, score) = (point.id.clone(), point.score);
            match retrieved_chunk(point) {
                Some(hit) => hits.push(hit),
                None => unresolved.push((id, score)),
            }
        }
        if !unresolved.is_empty() {
            hits.extend(self.hits_from_catalog(unresolved).await?);
            hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        }
        if hits.is_empty() {
            tracing::info!(lesson_id = %lesson_id, threshold, "No chunk reached the confidence threshold");
            return Err(ProcessingError::InsufficientContext { threshold });
        }
        self.refresh_book_names(&mut hits).await?;
        tracing::debug!(lesson_id = %lesson_id, hits = hits.len(), limit, "Context retrieved");

        let prompt = build_prompt(&lesson, &teacher_notes, &hits);
        let outline = self
            .chat_client
            .complete_json(ChatRequest {
                system: SYSTEM_PROMPT.to_string(),
                prompt,
                temperature: self.config.chat_temperature,
            })
            .await?;
        self.metrics.record_query();
        Ok(assemble_response(outline, &hits))
    }
}

#[async_trait]
impl ProcessingApi for ProcessingService {
    async fn ingest_pdf(&self, request: IngestRequest) -> Result<IngestResponse, ProcessingError> {
        ProcessingService::ingest_pdf(self, request).await
    }

    async fn list_books(&self) -> Result<BTreeMap<String, BookSummary>, ProcessingError> {
        Ok(self.catalog.book_summaries().await?)
    }

    async fn book_structure(&self, book: &str) -> Result<BookStructureView, ProcessingError> {
        ProcessingService::book_structure(self, book).await
    }

    async fn delete_book(&self, book: &str) -> Result<BookRemoval, ProcessingError> {
        ProcessingService::delete_book(self, book).await
    }

    async fn rag_query(&self, request: RagRequest) -> Result<RagResponse, ProcessingError> {
        ProcessingService::rag_query(self, request).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}
