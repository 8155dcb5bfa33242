use crate::config::EmbeddingConfig;
use crate::utils::error::ApiError;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: String,
}

#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url,
            model: config.model,
            dimension: config.dimension,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        self.embed_internal(text)
            .await
            .map_err(|e| ApiError::LlmError(e.to_string()))
    }

    async fn embed_internal(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for {} chars", text.len());

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: text.to_string(),
        };

        let url = format!("{}/v1/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to connect to embedding server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let json_value: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse embedding response as JSON")?;

        let embedding = Self::extract_embedding(&json_value)?;

        if embedding.len() != self.dimension {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            );
        }

        Ok(embedding)
    }

    /// The embedding server may answer in the OpenAI data format, a bare
    /// `{"embedding": [...]}` object, or a raw float array.
    fn extract_embedding(json_value: &serde_json::Value) -> Result<Vec<f32>> {
        let floats = |value: &serde_json::Value| -> Option<Vec<f32>> {
            value.as_array().map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect()
            })
        };

        let embedding = if let Some(data) = json_value["data"].as_array() {
            data.first()
                .and_then(|entry| floats(&entry["embedding"]))
                .unwrap_or_default()
        } else if json_value["embedding"].is_array() {
            floats(&json_value["embedding"]).unwrap_or_default()
        } else if json_value.is_array() {
            floats(json_value).unwrap_or_default()
        } else {
            anyhow::bail!("Unrecognized embedding response format: {}", json_value);
        };

        if embedding.is_empty() {
            anyhow::bail!("Generated embedding is empty");
        }

        Ok(embedding)
    }
}
