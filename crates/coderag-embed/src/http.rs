//! Client for OpenAI-compatible embedding APIs (OpenAI, vLLM, llama.cpp, ...).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use coderag_core::{Embedder, EmbeddingConfig, RagError, Result};

const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Transport timeout. The query engine applies its own, tighter budget.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Embedder backed by an HTTP `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

impl HttpEmbedder {
    /// Create an embedder for `api_base` (e.g. `http://localhost:8080/v1`).
    pub fn new(api_base: &str, model: &str, api_key: Option<String>, dimension: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RagError::embedding(format!("Failed to create HTTP client: {}", e)))?;

        let endpoint = format!("{}/embeddings", api_base.trim_end_matches('/'));

        info!("Embedding provider: {} (model={}, dim={})", endpoint, model, dimension);

        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
            api_key,
            dimension,
        })
    }

    /// Build an embedder from configuration.
    ///
    /// Returns `None` when no API base is configured; dense retrieval then
    /// runs degraded.
    pub fn from_config(config: &EmbeddingConfig, dimension: usize) -> Result<Option<Self>> {
        let Some(api_base) = config.api_base.as_deref() else {
            return Ok(None);
        };

        let api_key = match config.api_key_env.as_deref() {
            Some(var) => Some(std::env::var(var).map_err(|_| RagError::Config {
                message: format!("Embedding API key variable {} is not set", var),
            })?),
            None => None,
        };

        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        Self::new(api_base, model, api_key, dimension).map(Some)
    }

    /// Endpoint requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn extract(&self, response: EmbeddingResponse) -> Result<Vec<f32>> {
        let embedding = response
            .data
            .into_iter()
            .min_by_key(|d| d.index)
            .map(|d| d.embedding)
            .ok_or_else(|| RagError::embedding("No embedding returned"))?;

        if embedding.len() != self.dimension {
            return Err(RagError::embedding(format!(
                "Dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }

        Ok(embedding)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: [text],
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RagError::embedding(format!("Embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(RagError::embedding(format!(
                "Embedding API returned error {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::embedding(format!("Failed to parse embedding response: {}", e)))?;

        debug!("Embedded query ({} chars)", text.len());
        self.extract(parsed)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
