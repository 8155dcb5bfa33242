use crate::models::chat::SendMessageRequest;
use crate::services::Responder;
use crate::utils::error::ApiError;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Extension},
    http::header,
    response::Response,
    Json,
};
use bytes::Bytes;
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;

/// `POST /message`: answer one user message as a newline-delimited stream of
/// `token` / `error` / `done` records. The connection stays open until the
/// done record; the transport never buffers the body.
pub async fn send_message_handler(
    Extension(responder): Extension<Arc<Responder>>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) =
        body.map_err(|e| ApiError::BadRequest(format!("Invalid message body: {}", e)))?;

    let request: SendMessageRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid message body: {}", e)))?;

    if request.chat_id <= 0 {
        return Err(ApiError::BadRequest(
            "chatId must be a positive integer".to_string(),
        ));
    }

    if request.content.trim().is_empty() {
        return Err(ApiError::BadRequest("content must not be empty".to_string()));
    }

    info!(
        "Message for chat {} (collection {}, {} chars)",
        request.chat_id,
        request.collection_name,
        request.content.len()
    );

    let stream = responder
        .respond(
            request.chat_id,
            request.content,
            request.role,
            request.collection_name,
        )
        .await?;

    let body = Body::from_stream(
        stream.map(|record| Ok::<_, Infallible>(Bytes::from(record.to_ndjson()))),
    );

    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache, no-transform")
        .body(body)
        .map_err(|e| ApiError::InternalError(e.to_string()))
}
