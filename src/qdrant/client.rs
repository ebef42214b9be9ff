//! HTTP client wrapper for interacting with Qdrant.

use crate::config::Config;
use crate::qdrant::{
    payload::build_payload,
    types::{
        CountResponse, IndexSummary, ListCollectionsResponse, PointInsert, QdrantError,
        QueryResponse, QueryResponseResult, ScoredPoint,
    },
};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};

/// Payload fields indexed for filtering, with their Qdrant schema.
const PAYLOAD_INDEXES: [(&str, &str); 5] = [
    ("book_id", "keyword"),
    ("chapter_id", "keyword"),
    ("lesson_id", "keyword"),
    ("grade", "integer"),
    ("page", "integer"),
];

/// Lightweight HTTP client for the chunk collection.
pub struct QdrantService {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) collection: String,
}

impl QdrantService {
    /// Construct a new client from the loaded configuration.
    pub fn new(config: &Config) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("textbook-rag/0.1").build()?;

        let base_url = normalize_base_url(&config.qdrant_url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            collection = %config.qdrant_collection_name,
            has_api_key = %config
                .qdrant_api_key
                .as_deref()
                .map(|value| !value.is_empty())
                .unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key: config.qdrant_api_key.clone(),
            collection: config.qdrant_collection_name.clone(),
        })
    }

    /// Name of the collection this client writes to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the chunk collection when missing and make sure payload indexes exist.
    pub async fn ensure_collection(&self, vector_size: u64) -> Result<(), QdrantError> {
        if !self.collection_exists().await? {
            tracing::info!(
                collection = %self.collection,
                vector_size,
                "Creating collection"
            );
            self.create_collection(vector_size).await?;
        }
        self.ensure_payload_indexes().await
    }

    /// Create or update the collection with the specified vector size.
    pub async fn create_collection(&self, vector_size: u64) -> Result<(), QdrantError> {
        let body = json!({
            "vectors": {
                "size": vector_size,
                "distance": "Cosine"
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{}", self.collection))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, "Collection created");
        })
        .await
    }

    /// Retrieve the names of all collections present in Qdrant.
    pub async fn list_collections(&self) -> Result<Vec<String>, QdrantError> {
        let response = self.request(Method::GET, "collections").send().await?;

        if response.status().is_success() {
            let payload: ListCollectionsResponse = response.json().await?;
            let names = payload
                .result
                .collections
                .into_iter()
                .map(|collection| collection.name)
                .collect();
            Ok(names)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Failed to list collections");
            Err(error)
        }
    }

    /// Upload chunk vectors to the collection, waiting until they are searchable.
    pub async fn upsert_points(&self, points: Vec<PointInsert>) -> Result<IndexSummary, QdrantError> {
        if points.is_empty() {
            return Ok(IndexSummary::default());
        }

        let serialized: Vec<_> = points
            .into_iter()
            .map(|point| {
                json!({
                    "id": point.id,
                    "vector": point.vector,
                    "payload": build_payload(&point.payload),
                })
            })
            .collect();

        let point_count = serialized.len();
        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": serialized }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = %self.collection,
                points = point_count,
                "Points upserted"
            );
        })
        .await?;

        Ok(IndexSummary {
            upserted: point_count,
        })
    }

    /// Perform a similarity search, returning scored payloads in descending score order.
    pub async fn search_points(
        &self,
        vector: Vec<f32>,
        filter: Option<Value>,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>, QdrantError> {
        let mut body = serde_json::Map::new();
        body.insert("query".into(), json!(vector));
        body.insert("limit".into(), json!(limit));
        body.insert("with_payload".into(), Value::Bool(true));

        if let Some(threshold) = score_threshold {
            body.insert("score_threshold".into(), Value::from(threshold));
        }

        if let Some(filter_value) = filter {
            body.insert("filter".into(), filter_value);
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/query", self.collection),
            )
            .json(&Value::Object(body))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant search failed");
            return Err(error);
        }

        let payload: QueryResponse = response.json().await?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };
        let results = points
            .into_iter()
            .map(|point| ScoredPoint {
                id: stringify_point_id(point.id),
                score: point.score,
                payload: point.payload,
            })
            .collect();

        Ok(results)
    }

    /// Delete every point matching the filter.
    pub async fn delete_points(&self, filter: Value) -> Result<(), QdrantError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/delete", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "filter": filter }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, "Points deleted by filter");
        })
        .await
    }

    /// Delete points by identifier.
    pub async fn delete_point_ids(&self, ids: &[String]) -> Result<(), QdrantError> {
        if ids.is_empty() {
            return Ok(());
        }
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/delete", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": ids }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, points = ids.len(), "Points deleted by id");
        })
        .await
    }

    /// Count points matching an optional filter.
    pub async fn count_points(&self, filter: Option<Value>) -> Result<u64, QdrantError> {
        let mut body = json!({ "exact": true });
        if let (Some(filter), Some(object)) = (filter, body.as_object_mut()) {
            object.insert("filter".into(), filter);
        }

        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/count", self.collection),
            )
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QdrantError::UnexpectedStatus { status, body });
        }

        let CountResponse { result } = response.json().await?;
        Ok(result.count)
    }

    /// Ensure payload indexes exist for the fields used in filters.
    pub async fn ensure_payload_indexes(&self) -> Result<(), QdrantError> {
        for (field, schema) in PAYLOAD_INDEXES {
            let body = json!({
                "field_name": field,
                "field_schema": schema,
            });

            let response = self
                .request(Method::PUT, &format!("collections/{}/index", self.collection))
                .json(&body)
                .send()
                .await?;

            if response.status().is_success() {
                tracing::debug!(collection = %self.collection, field, schema, "Payload index ensured");
            } else if response.status() == StatusCode::CONFLICT {
                tracing::debug!(collection = %self.collection, field, schema, "Payload index already exists");
            } else {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::warn!(collection = %self.collection, field, schema, error = %error, "Failed to ensure payload index");
            }
        }

        Ok(())
    }

    async fn collection_exists(&self) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection = %self.collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
