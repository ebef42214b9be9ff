use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the textbook RAG service.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores chunk embeddings.
    pub qdrant_url: String,
    /// Name of the Qdrant collection holding textbook chunks.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Maximum number of texts sent in a single embedding request.
    pub embedding_batch_size: usize,
    /// API key for OpenAI-compatible endpoints (embeddings and chat).
    pub openai_api_key: Option<String>,
    /// Base URL of the OpenAI-compatible API, including the `/v1` prefix.
    pub openai_base_url: String,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// Chat model used to draft lesson outlines.
    pub chat_model: String,
    /// Sampling temperature for outline generation.
    pub chat_temperature: f32,
    /// SQLite connection string for the catalogue.
    pub database_url: String,
    /// Root directory for persistent data.
    pub data_dir: PathBuf,
    /// Directory holding cached page extractions.
    pub cache_dir: PathBuf,
    /// Skip the PDF text layer and always run OCR.
    pub force_ocr: bool,
    /// Tesseract language code used for OCR.
    pub ocr_lang: String,
    /// Chunk budget measured by the configured tokenizer.
    pub text_splitter_chunk_size: usize,
    /// Overlap budget carried from one chunk into the next.
    pub text_splitter_chunk_overlap: usize,
    /// Counter used to measure chunk budgets.
    pub text_splitter_tokenizer: TokenizerKind,
    /// Minimum similarity score a retrieved chunk needs to reach the prompt.
    pub rag_min_confidence: f32,
    /// Upper bound applied to the `k` of RAG queries.
    pub rag_max_k: usize,
    /// Interface the HTTP server binds to.
    pub server_host: String,
    /// Port the HTTP server binds to.
    pub server_port: u16,
}

/// Supported embedding backends for the ingestion pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI (or compatible) embeddings API.
    OpenAI,
}

/// Token counters available to the chunker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    /// Whitespace-separated words.
    Words,
    /// BPE tokens of the embedding model via `tiktoken`.
    Tiktoken,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = PathBuf::from(load_env_or("DATA_DIR", "data"));
        let cache_dir = load_env_optional("CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("cache"));

        let config = Self {
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_collection_name: load_env_or("QDRANT_COLLECTION_NAME", "textbook-chunks"),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider: load_env_or("EMBEDDING_PROVIDER", "openai")
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            embedding_model: load_env_or("EMBEDDING_MODEL", "text-embedding-ada-002"),
            embedding_dimension: parse_env("EMBEDDING_DIMENSION", 1536)?,
            embedding_batch_size: parse_env("EMBEDDING_BATCH_SIZE", 100)?,
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            ollama_url: load_env_or("OLLAMA_URL", "http://127.0.0.1:11434"),
            chat_model: load_env_or("CHAT_MODEL", "gpt-4-turbo"),
            chat_temperature: parse_env("CHAT_TEMPERATURE", 0.7)?,
            database_url: load_env_optional("DATABASE_URL").unwrap_or_else(|| {
                format!("sqlite://{}", data_dir.join("catalog.db").display())
            }),
            data_dir,
            cache_dir,
            force_ocr: load_env_optional("FORCE_OCR")
                .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            ocr_lang: load_env_or("OCR_LANG", "vie"),
            text_splitter_chunk_size: parse_env("TEXT_SPLITTER_CHUNK_SIZE", 800)?,
            text_splitter_chunk_overlap: parse_env("TEXT_SPLITTER_CHUNK_OVERLAP", 100)?,
            text_splitter_tokenizer: load_env_or("TEXT_SPLITTER_TOKENIZER", "words")
                .parse()
                .map_err(|()| ConfigError::InvalidValue("TEXT_SPLITTER_TOKENIZER".to_string()))?,
            rag_min_confidence: parse_env("RAG_MIN_CONFIDENCE", 0.25)?,
            rag_max_k: parse_env("RAG_MAX_K", 50)?,
            server_host: load_env_or("SERVER_HOST", "0.0.0.0"),
            server_port: parse_env("SERVER_PORT", 8000)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject value combinations that parse but cannot work together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| Err(ConfigError::InvalidValue(reason.to_string()));
        if self.embedding_dimension == 0 {
            return invalid("EMBEDDING_DIMENSION must be positive");
        }
        if self.embedding_batch_size == 0 {
            return invalid("EMBEDDING_BATCH_SIZE must be positive");
        }
        if self.text_splitter_chunk_size == 0 {
            return invalid("TEXT_SPLITTER_CHUNK_SIZE must be positive");
        }
        if self.text_splitter_chunk_overlap >= self.text_splitter_chunk_size {
            return invalid("TEXT_SPLITTER_CHUNK_OVERLAP must be below TEXT_SPLITTER_CHUNK_SIZE");
        }
        if !(0.0..=1.0).contains(&self.rag_min_confidence) {
            return invalid("RAG_MIN_CONFIDENCE must lie in [0, 1]");
        }
        if self.rag_max_k == 0 {
            return invalid("RAG_MAX_K must be positive");
        }
        Ok(())
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_or(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
        .map(|parsed| parsed.unwrap_or(default))
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for TokenizerKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "words" | "whitespace" => Ok(Self::Words),
            "tiktoken" => Ok(Self::Tiktoken),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        embedding_provider = ?config.embedding_provider,
        embedding_model = %config.embedding_model,
        database_url = %config.database_url,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
