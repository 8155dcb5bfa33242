use pdfchat_core::models::{Document, MessageRole};
use serde::{Deserialize, Serialize};

// ===== REQUEST MODELS =====

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub chat_id: i32,
    pub content: String,
    #[serde(default = "default_role")]
    pub role: MessageRole,
    pub collection_name: String,
}

fn default_role() -> MessageRole {
    MessageRole::User
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ChatListResponse {
    pub ok: bool,
    pub data: Vec<Document>,
}

/// One turn handed to the generation model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}
