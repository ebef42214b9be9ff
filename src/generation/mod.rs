//! Chat-completion client used to draft lesson outlines.
//!
//! Mirrors the embedding adapters: requests go straight to an OpenAI-compatible
//! `/chat/completions` endpoint and the model is asked for a JSON object response.

use crate::config::Config;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

/// Errors surfaced while generating completions.
#[derive(Debug, Error)]
pub enum ChatClientError {
    /// Provider requires an API key that was not configured.
    #[error("OPENAI_API_KEY is not set; add it to the environment or .env")]
    MissingApiKey,
    /// Provider was unreachable or returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed into the expected JSON object.
    #[error("Malformed completion response: {0}")]
    InvalidResponse(String),
}

/// Request passed to the chat provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// System message establishing the assistant's role.
    pub system: String,
    /// User prompt assembled by the RAG pipeline.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Interface implemented by chat-completion providers.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Generate a completion and decode it as a JSON object.
    async fn complete_json(&self, request: ChatRequest) -> Result<Value, ChatClientError>;
}

/// OpenAI (or compatible) chat-completions client.
pub struct OpenAiChatClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiChatClient {
    /// Construct a client for `model` served at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self, ChatClientError> {
        let http = Client::builder()
            .user_agent("textbook-rag/chat")
            .build()
            .map_err(|error| ChatClientError::GenerationFailed(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn complete_json(&self, request: ChatRequest) -> Result<Value, ChatClientError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ChatClientError::MissingApiKey)?;

        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt }
            ],
            "temperature": request.temperature,
            "response_format": { "type": "json_object" }
        });

        tracing::debug!(model = %self.model, "Requesting chat completion");
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                ChatClientError::GenerationFailed(format!(
                    "failed to reach {}: {error}",
                    self.endpoint()
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatClientError::GenerationFailed(format!(
                "provider returned {status}: {body}"
            )));
        }

        let body: CompletionResponse = response.json().await.map_err(|error| {
            ChatClientError::InvalidResponse(format!("failed to decode response: {error}"))
        })?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ChatClientError::InvalidResponse("response has no content".into()))?;

        parse_json_object(&content)
    }
}

/// Decode model output as a JSON object, tolerating a surrounding Markdown code fence.
pub(crate) fn parse_json_object(content: &str) -> Result<Value, ChatClientError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    match serde_json::from_str::<Value>(unfenced) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(ChatClientError::InvalidResponse(
            "completion is not a JSON object".into(),
        )),
        Err(error) => Err(ChatClientError::InvalidResponse(format!(
            "completion is not valid JSON: {error}"
        ))),
    }
}

/// Build the chat client for the current configuration.
pub fn get_chat_client(
    config: &Config,
) -> Result<Box<dyn ChatClient + Send + Sync>, ChatClientError> {
    Ok(Box::new(OpenAiChatClient::new(
        config.openai_base_url.clone(),
        config.openai_api_key.clone(),
        config.chat_model.clone(),
    )?))
}
