use crate::config::LlmConfig;
use crate::models::chat::ChatMessage;
use crate::utils::error::ApiError;
use futures::stream::Stream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: usize,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    pub choices: Vec<ChoiceChunk>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceChunk {
    pub delta: Delta,
}

#[derive(Debug, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
}

#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    /// Generate a completion in streaming mode. Yields content deltas in
    /// generation order as they arrive on the SSE response.
    pub async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, ApiError>> + Send>>, ApiError> {
        debug!("Starting chat stream with {} messages", messages.len());

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: 0.0,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.config.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::LlmError(format!("Failed to call LLM API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::LlmError(format!(
                "LLM API error: {} - {}",
                status, body
            )));
        }

        let mut byte_stream = response.bytes_stream();

        // Parse the SSE frames ("data: {...}\n") into content deltas. A frame
        // can be split across network chunks, so carry the partial line over.
        let parsed_stream = async_stream::stream! {
            let mut carry = String::new();

            while let Some(result) = byte_stream.next().await {
                let bytes = match result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(ApiError::LlmError(format!("Stream error: {}", e)));
                        return;
                    }
                };

                carry.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(newline) = carry.find('\n') {
                    let line: String = carry.drain(..=newline).collect();
                    let line = line.trim();

                    let Some(json_str) = line.strip_prefix("data: ") else {
                        continue;
                    };

                    if json_str == "[DONE]" {
                        return;
                    }

                    if let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(json_str) {
                        if let Some(content) = chunk
                            .choices
                            .first()
                            .and_then(|c| c.delta.content.as_ref())
                        {
                            if !content.is_empty() {
                                yield Ok(content.clone());
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(parsed_stream))
    }
}
