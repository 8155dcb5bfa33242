use crate::config::{PromptsConfig, RagConfig};
use crate::models::chat::ChatMessage;
use crate::services::answer::Answer;
use crate::services::{EmbeddingService, LlmService};
use crate::utils::error::ApiError;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::Stream;
use futures::StreamExt;
use pdfchat_core::models::{Chat, Message, MessageRole, StreamRecord};
use pdfchat_core::vector::{ScoredChunk, VectorStore};
use pgvector::Vector;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Persistence seam for the responder.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get_chat(&self, chat_id: i32) -> Result<Option<Chat>>;
    async fn recent_messages(&self, chat_id: i32, limit: i64) -> Result<Vec<Message>>;
    async fn append_message(
        &self,
        chat_id: i32,
        role: MessageRole,
        content: &str,
    ) -> Result<Message>;
}

#[async_trait]
impl ChatStore for crate::database::Repository {
    async fn get_chat(&self, chat_id: i32) -> Result<Option<Chat>> {
        crate::database::Repository::get_chat(self, chat_id).await
    }

    async fn recent_messages(&self, chat_id: i32, limit: i64) -> Result<Vec<Message>> {
        crate::database::Repository::recent_messages(self, chat_id, limit).await
    }

    async fn append_message(
        &self,
        chat_id: i32,
        role: MessageRole,
        content: &str,
    ) -> Result<Message> {
        crate::database::Repository::append_message(self, chat_id, role, content).await
    }
}

/// Retrieval seam: top-matching chunks for a query against one collection.
#[async_trait]
pub trait RetrievalProvider: Send + Sync {
    async fn retrieve(&self, collection_name: &str, query: &str) -> Result<Vec<ScoredChunk>>;
}

pub struct ContextRetriever {
    embedding_service: Arc<EmbeddingService>,
    vector_store: VectorStore,
    top_k: i32,
}

impl ContextRetriever {
    pub fn new(
        embedding_service: Arc<EmbeddingService>,
        vector_store: VectorStore,
        top_k: usize,
    ) -> Self {
        Self {
            embedding_service,
            vector_store,
            top_k: top_k as i32,
        }
    }
}

#[async_trait]
impl RetrievalProvider for ContextRetriever {
    async fn retrieve(&self, collection_name: &str, query: &str) -> Result<Vec<ScoredChunk>> {
        let embedding = self
            .embedding_service
            .embed(query)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;

        self.vector_store
            .search(collection_name, Vector::from(embedding), self.top_k)
            .await
    }
}

/// Generation seam.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate_stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String>> + Send>>>;
}

#[async_trait]
impl LlmProvider for LlmService {
    async fn generate_stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String>> + Send>>> {
        let stream = self
            .chat_stream(messages)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;

        let mapped = stream.map(|item| item.map_err(|e| anyhow::anyhow!(e)));

        Ok(Box::pin(mapped))
    }
}

/// Retrieval-augmented responder: retrieval, grounded prompt assembly,
/// token-by-token forwarding, and persistence of the final answer.
pub struct Responder {
    store: Arc<dyn ChatStore>,
    retriever: Arc<dyn RetrievalProvider>,
    llm: Arc<dyn LlmProvider>,
    config: RagConfig,
    prompts: PromptsConfig,
}

impl Responder {
    pub fn new(
        store: Arc<dyn ChatStore>,
        retriever: Arc<dyn RetrievalProvider>,
        llm: Arc<dyn LlmProvider>,
        config: RagConfig,
        prompts: PromptsConfig,
    ) -> Self {
        Self {
            store,
            retriever,
            llm,
            config,
            prompts,
        }
    }

    /// Answer one user message as a stream of protocol records.
    ///
    /// The user message is persisted before generation starts, so it survives
    /// a generation failure. The stream always terminates with a done record;
    /// a generation failure yields an error record first and persists no
    /// assistant message. Dropping the stream mid-flight (client abort)
    /// cancels generation before the assistant message is written.
    pub async fn respond(
        &self,
        chat_id: i32,
        content: String,
        role: MessageRole,
        collection_name: String,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamRecord> + Send>>, ApiError> {
        self.store
            .get_chat(chat_id)
            .await
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?
            .ok_or_else(|| ApiError::NotFound(format!("Chat {} not found", chat_id)))?;

        let history = self
            .store
            .recent_messages(chat_id, self.config.history_limit)
            .await
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

        self.store
            .append_message(chat_id, role, &content)
            .await
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

        // Retrieval degrades to empty context; a collection that is still
        // being ingested (or was never populated) must not fail the chat.
        let context = match self.retriever.retrieve(&collection_name, &content).await {
            Ok(chunks) => {
                debug!(
                    "Retrieved {} chunks from {}",
                    chunks.len(),
                    collection_name
                );
                self.build_context(&chunks)
            }
            Err(e) => {
                warn!(
                    "Retrieval failed for {}, answering with empty context: {}",
                    collection_name, e
                );
                String::new()
            }
        };

        let messages = self.build_prompt(&context, &history, &content);

        let store = self.store.clone();
        let llm = self.llm.clone();

        let stream = async_stream::stream! {
            let mut llm_stream = match llm.generate_stream(messages).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to start generation: {}", e);
                    yield StreamRecord::Error {
                        message: "Failed to generate response".to_string(),
                    };
                    yield StreamRecord::Done;
                    return;
                }
            };

            let mut accumulated = String::new();
            let mut failed = false;

            while let Some(item) = llm_stream.next().await {
                match item {
                    Ok(token) => {
                        if token.is_empty() {
                            continue;
                        }
                        accumulated.push_str(&token);
                        yield StreamRecord::Token { text: token };
                    }
                    Err(e) => {
                        error!("Generation stream error: {}", e);
                        yield StreamRecord::Error {
                            message: "Generation failed".to_string(),
                        };
                        failed = true;
                        break;
                    }
                }
            }

            if !failed {
                let formatted = Answer::parse(&accumulated).render();
                if let Err(e) = store
                    .append_message(chat_id, MessageRole::Assistant, &formatted)
                    .await
                {
                    // The caller already saw the tokens; losing the durable
                    // copy is degraded behavior, not fatal.
                    error!(
                        "Failed to persist assistant message for chat {}: {}",
                        chat_id, e
                    );
                } else {
                    info!("Persisted assistant message for chat {}", chat_id);
                }
            }

            yield StreamRecord::Done;
        };

        Ok(Box::pin(stream))
    }

    /// Concatenate matched chunk texts with their metadata, capped at the
    /// configured context length.
    fn build_context(&self, chunks: &[ScoredChunk]) -> String {
        let mut context = String::new();

        for (i, chunk) in chunks.iter().enumerate() {
            context.push_str(&format!(
                "[doc {} | chunk {}]\n{}\n\n",
                chunk.document_id, chunk.chunk_index, chunk.content
            ));

            if context.len() > self.config.max_context_length {
                debug!("Context truncated at {} chunks", i + 1);
                break;
            }
        }

        context
    }

    fn build_prompt(
        &self,
        context: &str,
        history: &[Message],
        user_content: &str,
    ) -> Vec<ChatMessage> {
        let system = ChatMessage {
            role: "system".to_string(),
            content: self
                .prompts
                .main_system_prompt
                .replace("{{CONTEXT}}", context),
        };

        let mut messages = vec![system];

        for message in history {
            messages.push(ChatMessage {
                role: "user".to_string(),
                content: message.content.clone(),
            });
        }

        messages.push(ChatMessage {
            role: "user".to_string(),
            content: user_content.to_string(),
        });

        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;

    fn test_config() -> RagConfig {
        RagConfig {
            retrieval_top_k: 4,
            history_limit: 10,
            max_context_length: 8000,
        }
    }

    fn test_prompts() -> PromptsConfig {
        PromptsConfig {
            main_system_prompt: "Answer from this context:\n{{CONTEXT}}".to_string(),
        }
    }

    struct FakeStore {
        chat_exists: bool,
        fail_assistant_write: bool,
        messages: Mutex<Vec<(MessageRole, String)>>,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                chat_exists: true,
                fail_assistant_write: false,
                messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatStore for FakeStore {
        async fn get_chat(&self, chat_id: i32) -> Result<Option<Chat>> {
            Ok(self.chat_exists.then(|| Chat {
                id: chat_id,
                name: "test".to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }))
        }

        async fn recent_messages(&self, _chat_id: i32, _limit: i64) -> Result<Vec<Message>> {
            Ok(Vec::new())
        }

        async fn append_message(
            &self,
            chat_id: i32,
            role: MessageRole,
            content: &str,
        ) -> Result<Message> {
            if self.fail_assistant_write && role == MessageRole::Assistant {
                anyhow::bail!("write failed");
            }
            let mut messages = self.messages.lock().unwrap();
            messages.push((role, content.to_string()));
            Ok(Message {
                id: messages.len() as i32,
                chat_id,
                role,
                content: content.to_string(),
                created_at: Utc::now(),
            })
        }
    }

    struct FakeRetriever {
        chunks: Option<Vec<ScoredChunk>>,
    }

    #[async_trait]
    impl RetrievalProvider for FakeRetriever {
        async fn retrieve(&self, _collection: &str, _query: &str) -> Result<Vec<ScoredChunk>> {
            match &self.chunks {
                Some(chunks) => Ok(chunks.clone()),
                None => anyhow::bail!("collection unavailable"),
            }
        }
    }

    struct FakeLlm {
        tokens: Vec<&'static str>,
        fail_after: Option<usize>,
        fail_to_start: bool,
        seen_prompts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl FakeLlm {
        fn streaming(tokens: Vec<&'static str>) -> Self {
            Self {
                tokens,
                fail_after: None,
                fail_to_start: false,
                seen_prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for FakeLlm {
        async fn generate_stream(
            &self,
            messages: Vec<ChatMessage>,
        ) -> Result<Pin<Box<dyn Stream<Item = Result<String>> + Send>>> {
            if self.fail_to_start {
                anyhow::bail!("connection refused");
            }
            self.seen_prompts.lock().unwrap().push(messages);

            let mut items: Vec<Result<String>> = self
                .tokens
                .iter()
                .map(|t| Ok(t.to_string()))
                .collect();
            if let Some(after) = self.fail_after {
                items.truncate(after);
                items.push(Err(anyhow::anyhow!("stream died")));
            }

            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn responder(
        store: Arc<FakeStore>,
        retriever: Arc<FakeRetriever>,
        llm: Arc<FakeLlm>,
    ) -> Responder {
        Responder::new(store, retriever, llm, test_config(), test_prompts())
    }

    async fn collect(stream: Pin<Box<dyn Stream<Item = StreamRecord> + Send>>) -> Vec<StreamRecord> {
        stream.collect().await
    }

    #[tokio::test]
    async fn streams_tokens_then_done_and_persists_the_answer() {
        let store = Arc::new(FakeStore::new());
        let retriever = Arc::new(FakeRetriever { chunks: Some(vec![]) });
        let llm = Arc::new(FakeLlm::streaming(vec!["The ", "refund ", "window."]));

        let responder = responder(store.clone(), retriever, llm);
        let stream = responder
            .respond(1, "what is the policy?".to_string(), MessageRole::User, "col".to_string())
            .await
            .unwrap();
        let records = collect(stream).await;

        let emitted: String = records
            .iter()
            .filter_map(|r| match r {
                StreamRecord::Token { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(emitted, "The refund window.");
        assert_eq!(records.last(), Some(&StreamRecord::Done));

        let messages = store.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], (MessageRole::User, "what is the policy?".to_string()));
        assert_eq!(
            messages[1],
            (MessageRole::Assistant, "The refund window.".to_string())
        );
    }

    #[tokio::test]
    async fn emitted_tokens_concatenate_to_the_pre_formatting_text() {
        let store = Arc::new(FakeStore::new());
        let retriever = Arc::new(FakeRetriever { chunks: Some(vec![]) });
        // The raw generation is a structured answer split across tokens.
        let llm = Arc::new(FakeLlm::streaming(vec![
            r#"{"answer""#,
            r#": "thirty days"}"#,
        ]));

        let responder = responder(store.clone(), retriever, llm);
        let stream = responder
            .respond(1, "q".to_string(), MessageRole::User, "col".to_string())
            .await
            .unwrap();
        let records = collect(stream).await;

        let emitted: String = records
            .iter()
            .filter_map(|r| match r {
                StreamRecord::Token { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        // The stream carries the raw pre-formatting text...
        assert_eq!(emitted, r#"{"answer": "thirty days"}"#);

        // ...while the persisted message is the formatted rendering.
        let messages = store.messages.lock().unwrap();
        assert_eq!(messages[1], (MessageRole::Assistant, "thirty days".to_string()));
    }

    #[tokio::test]
    async fn mid_stream_failure_emits_error_then_done_without_persisting() {
        let store = Arc::new(FakeStore::new());
        let retriever = Arc::new(FakeRetriever { chunks: Some(vec![]) });
        let llm = Arc::new(FakeLlm {
            fail_after: Some(2),
            ..FakeLlm::streaming(vec!["a", "b", "c"])
        });

        let responder = responder(store.clone(), retriever, llm);
        let stream = responder
            .respond(1, "q".to_string(), MessageRole::User, "col".to_string())
            .await
            .unwrap();
        let records = collect(stream).await;

        assert!(matches!(
            records[records.len() - 2],
            StreamRecord::Error { .. }
        ));
        assert_eq!(records.last(), Some(&StreamRecord::Done));

        // Only the user message was persisted.
        let messages = store.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, MessageRole::User);
    }

    #[tokio::test]
    async fn startup_failure_still_terminates_with_done() {
        let store = Arc::new(FakeStore::new());
        let retriever = Arc::new(FakeRetriever { chunks: Some(vec![]) });
        let llm = Arc::new(FakeLlm {
            fail_to_start: true,
            ..FakeLlm::streaming(vec![])
        });

        let responder = responder(store.clone(), retriever, llm);
        let stream = responder
            .respond(1, "q".to_string(), MessageRole::User, "col".to_string())
            .await
            .unwrap();
        let records = collect(stream).await;

        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], StreamRecord::Error { .. }));
        assert_eq!(records[1], StreamRecord::Done);
    }

    #[tokio::test]
    async fn retrieval_failure_degrades_to_empty_context() {
        let store = Arc::new(FakeStore::new());
        let retriever = Arc::new(FakeRetriever { chunks: None });
        let llm = Arc::new(FakeLlm::streaming(vec!["ok"]));

        let responder = responder(store.clone(), retriever, llm.clone());
        let stream = responder
            .respond(1, "q".to_string(), MessageRole::User, "not_ingested_yet".to_string())
            .await
            .unwrap();
        let records = collect(stream).await;

        // The stream still completes normally.
        assert_eq!(records.last(), Some(&StreamRecord::Done));
        assert!(records.iter().all(|r| !matches!(r, StreamRecord::Error { .. })));

        // The system prompt was built with an empty context.
        let prompts = llm.seen_prompts.lock().unwrap();
        assert_eq!(prompts[0][0].content, "Answer from this context:\n");
    }

    #[tokio::test]
    async fn retrieved_chunks_are_folded_into_the_system_prompt() {
        let store = Arc::new(FakeStore::new());
        let retriever = Arc::new(FakeRetriever {
            chunks: Some(vec![ScoredChunk {
                chat_id: 1,
                document_id: 9,
                chunk_index: 0,
                content: "Refunds within 30 days.".to_string(),
                similarity: 0.92,
            }]),
        });
        let llm = Arc::new(FakeLlm::streaming(vec!["ok"]));

        let responder = responder(store, retriever, llm.clone());
        let stream = responder
            .respond(1, "q".to_string(), MessageRole::User, "col".to_string())
            .await
            .unwrap();
        let _ = collect(stream).await;

        let prompts = llm.seen_prompts.lock().unwrap();
        let system = &prompts[0][0].content;
        assert!(system.contains("[doc 9 | chunk 0]"));
        assert!(system.contains("Refunds within 30 days."));
    }

    #[tokio::test]
    async fn unknown_chat_is_not_found() {
        let store = Arc::new(FakeStore {
            chat_exists: false,
            ..FakeStore::new()
        });
        let retriever = Arc::new(FakeRetriever { chunks: Some(vec![]) });
        let llm = Arc::new(FakeLlm::streaming(vec![]));

        let responder = responder(store, retriever, llm);
        let result = responder
            .respond(99, "q".to_string(), MessageRole::User, "col".to_string())
            .await;

        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn persistence_failure_after_generation_is_not_fatal() {
        let store = Arc::new(FakeStore {
            fail_assistant_write: true,
            ..FakeStore::new()
        });
        let retriever = Arc::new(FakeRetriever { chunks: Some(vec![]) });
        let llm = Arc::new(FakeLlm::streaming(vec!["answer"]));

        let responder = responder(store.clone(), retriever, llm);
        let stream = responder
            .respond(1, "q".to_string(), MessageRole::User, "col".to_string())
            .await
            .unwrap();
        let records = collect(stream).await;

        // No error record: the client saw the tokens and a clean done.
        assert!(records.iter().all(|r| !matches!(r, StreamRecord::Error { .. })));
        assert_eq!(records.last(), Some(&StreamRecord::Done));
    }
}
