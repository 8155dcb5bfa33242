use crate::database::Repository;
use crate::models::chat::ChatListResponse;
use crate::utils::error::ApiError;
use axum::{
    extract::{Extension, Path},
    Json,
};
use pdfchat_core::models::ChatDetail;
use std::sync::Arc;
use tracing::info;

/// `GET /chat/{id}`: the chat with its messages and documents, both ordered
/// by created_at ascending.
pub async fn get_chat_handler(
    Extension(repository): Extension<Arc<Repository>>,
    Path(id): Path<String>,
) -> Result<Json<ChatDetail>, ApiError> {
    let chat_id: i32 = id
        .parse()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::BadRequest("Chat ID must be a positive integer".to_string()))?;

    let chat = repository
        .get_chat(chat_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("Chat {} not found", chat_id)))?;

    let messages = repository
        .chat_messages(chat_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    let docs = repository
        .chat_documents(chat_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    Ok(Json(ChatDetail {
        id: chat.id,
        name: chat.name,
        created_at: chat.created_at,
        updated_at: chat.updated_at,
        messages,
        docs,
    }))
}

/// `GET /chats`: all document summaries for the sidebar listing.
pub async fn list_chats_handler(
    Extension(repository): Extension<Arc<Repository>>,
) -> Result<Json<ChatListResponse>, ApiError> {
    let docs = repository
        .list_documents()
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    info!("Listing {} documents", docs.len());

    Ok(Json(ChatListResponse { ok: true, data: docs }))
}
