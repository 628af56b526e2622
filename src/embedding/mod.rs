//! Embedding service client
//!
//! Maps text to a fixed-dimension float vector through an
//! OpenAI-compatible `/embeddings` endpoint. The dimension is fixed per
//! deployment and must match the schema of the vector collections.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::errors::{AgentError, Result};

/// Trait for embedding services.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds a single text into a vector of [`Embedder::dimension`] floats.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Output dimension of this embedder.
    fn dimension(&self) -> usize;
}

/// Client for an OpenAI-compatible embeddings API.
pub struct OpenAiEmbedder {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        if config.base_url.is_empty() {
            return Err(AgentError::ConfigError(
                "embedding.base_url must not be empty".to_string(),
            ));
        }
        let http = Client::builder().build().map_err(AgentError::HttpError)?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Embedding text of {} chars", text.len());
        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: [text],
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::embedding(format!(
                "embedding request failed with {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| AgentError::embedding("embedding response contained no data"))?;

        if vector.len() != self.dimension {
            return Err(AgentError::embedding(format!(
                "expected dimension {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
