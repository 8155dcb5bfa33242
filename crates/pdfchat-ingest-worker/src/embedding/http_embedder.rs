use super::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};
use crate::config::EmbeddingConfig;
use crate::utils::error::WorkerError;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    data: Vec<ApiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ApiEmbedding {
    embedding: Vec<f32>,
}

/// Embedding client against an OpenAI-compatible `/v1/embeddings` endpoint.
/// Requests go out in configurable batches; every vector is checked against
/// the configured dimension before it reaches the index.
pub struct HttpEmbedder {
    client: Client,
    config: EmbeddingConfig,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = ApiRequest {
            model: &self.config.model,
            input: texts,
        };

        let url = format!("{}/v1/embeddings", self.config.base_url);
        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(
                WorkerError::EmbeddingError(format!("API error ({}): {}", status, body)).into(),
            );
        }

        let api_response: ApiResponse = response.json().await?;

        if api_response.data.len() != texts.len() {
            return Err(WorkerError::EmbeddingError(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                api_response.data.len()
            ))
            .into());
        }

        let mut embeddings = Vec::with_capacity(api_response.data.len());

        for entry in api_response.data {
            if entry.embedding.len() != self.config.dimension {
                return Err(WorkerError::EmbeddingError(format!(
                    "Dimension mismatch: expected {}, got {}",
                    self.config.dimension,
                    entry.embedding.len()
                ))
                .into());
            }
            embeddings.push(entry.embedding);
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let mut embeddings = Vec::with_capacity(request.texts.len());

        for batch in request.texts.chunks(self.config.batch_size.max(1)) {
            debug!("Embedding batch of {} texts", batch.len());
            let batch_embeddings = self.embed_batch(batch).await?;
            embeddings.extend(batch_embeddings);
        }

        Ok(EmbeddingResponse { embeddings })
    }
}
