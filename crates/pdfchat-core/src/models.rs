use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "message_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: i32,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i32,
    pub chat_id: i32,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: i32,
    pub chat_id: i32,
    pub collection_name: String,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Full chat view returned by `GET /chat/{id}`. Both arrays are ordered by
/// created_at ascending, ties broken by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDetail {
    pub id: i32,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub docs: Vec<Document>,
}

/// Queue payload for one ingestion unit. Serialized as camelCase JSON under
/// the `ingest-pdf` job name; carries everything a worker needs to process
/// the document independently of the original request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestJob {
    pub file_path: String,
    pub chat_id: i32,
    pub document_id: i32,
    pub collection_name: String,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
}

/// One frame of the newline-delimited answer stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamRecord {
    Token { text: String },
    Error { message: String },
    Done,
}

impl StreamRecord {
    pub fn to_ndjson(&self) -> String {
        let mut frame = serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"error","message":"encoding failure"}"#.to_string());
        frame.push('\n');
        frame
    }
}
