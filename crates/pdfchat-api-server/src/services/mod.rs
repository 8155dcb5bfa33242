pub mod answer;
pub mod embedding_service;
pub mod llm_service;
pub mod responder;
pub mod storage;

pub use embedding_service::EmbeddingService;
pub use llm_service::LlmService;
pub use responder::{ChatStore, ContextRetriever, LlmProvider, Responder, RetrievalProvider};
pub use storage::UploadStorage;
