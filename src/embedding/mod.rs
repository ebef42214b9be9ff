//! Embedding client abstraction and HTTP adapters.
//!
//! Two providers are supported: OpenAI-compatible `/embeddings` endpoints and Ollama's
//! `/api/embed`. Inputs are sent in batches of `EMBEDDING_BATCH_SIZE`; the returned vectors keep
//! the order of the inputs.

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider requires an API key that was not configured.
    #[error("OPENAI_API_KEY is not set; add it to the environment or .env")]
    MissingApiKey,
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider response could not be decoded or did not match the request.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied chunk of text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// OpenAI (or compatible) embeddings client.
pub struct OpenAiEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    batch_size: usize,
}

impl OpenAiEmbeddingClient {
    /// Construct a client targeting `base_url` (for example `https://api.openai.com/v1`).
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        batch_size: usize,
    ) -> Result<Self, EmbeddingClientError> {
        let http = Client::builder()
            .user_agent("textbook-rag/embeddings")
            .build()
            .map_err(|error| EmbeddingClientError::GenerationFailed(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            batch_size: batch_size.max(1),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }

    async fn embed_batch(
        &self,
        api_key: &str,
        batch: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&json!({ "model": self.model, "input": batch }))
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::GenerationFailed(format!(
                    "failed to reach {}: {error}",
                    self.endpoint()
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "provider returned {status}: {body}"
            )));
        }

        let mut body: OpenAiEmbeddingResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!("failed to decode response: {error}"))
        })?;
        body.data.sort_by_key(|item| item.index);
        Ok(body.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(EmbeddingClientError::MissingApiKey)?;

        let total = texts.len();
        let mut vectors = Vec::with_capacity(total);
        for batch in texts.chunks(self.batch_size) {
            let embedded = self.embed_batch(api_key, batch).await?;
            ensure_count(batch.len(), embedded.len())?;
            vectors.extend(embedded);
            tracing::info!(model = %self.model, "Embedded {}/{}", vectors.len(), total);
        }
        Ok(vectors)
    }
}

/// Ollama embeddings client.
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
    batch_size: usize,
}

impl OllamaEmbeddingClient {
    /// Construct a client targeting the Ollama runtime at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        batch_size: usize,
    ) -> Result<Self, EmbeddingClientError> {
        let http = Client::builder()
            .user_agent("textbook-rag/embeddings")
            .build()
            .map_err(|error| EmbeddingClientError::GenerationFailed(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            model: model.into(),
            batch_size: batch_size.max(1),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let total = texts.len();
        let mut vectors = Vec::with_capacity(total);
        for batch in texts.chunks(self.batch_size) {
            let response = self
                .http
                .post(self.endpoint())
                .json(&json!({ "model": self.model, "input": batch }))
                .send()
                .await
                .map_err(|error| {
                    EmbeddingClientError::GenerationFailed(format!(
                        "failed to reach Ollama at {}: {error}",
                        self.base_url
                    ))
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(EmbeddingClientError::GenerationFailed(format!(
                    "Ollama returned {status}: {body}"
                )));
            }

            let body: OllamaEmbedResponse = response.json().await.map_err(|error| {
                EmbeddingClientError::InvalidResponse(format!(
                    "failed to decode Ollama response: {error}"
                ))
            })?;
            ensure_count(batch.len(), body.embeddings.len())?;
            vectors.extend(body.embeddings);
            tracing::info!(model = %self.model, "Embedded {}/{}", vectors.len(), total);
        }
        Ok(vectors)
    }
}

fn ensure_count(expected: usize, actual: usize) -> Result<(), EmbeddingClientError> {
    if expected == actual {
        Ok(())
    } else {
        Err(EmbeddingClientError::InvalidResponse(format!(
            "expected {expected} vectors, received {actual}"
        )))
    }
}

/// Build an embedding client suitable for the current configuration.
pub fn get_embedding_client(
    config: &Config,
) -> Result<Box<dyn EmbeddingClient + Send + Sync>, EmbeddingClientError> {
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Building embedding client"
    );
    match config.embedding_provider {
        EmbeddingProvider::OpenAI => Ok(Box::new(OpenAiEmbeddingClient::new(
            config.openai_base_url.clone(),
            config.openai_api_key.clone(),
            config.embedding_model.clone(),
            config.embedding_batch_size,
        )?)),
        EmbeddingProvider::Ollama => Ok(Box::new(OllamaEmbeddingClient::new(
            config.ollama_url.clone(),
            config.embedding_model.clone(),
            config.embedding_batch_size,
        )?)),
    }
}
