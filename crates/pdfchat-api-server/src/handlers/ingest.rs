use crate::database::Repository;
use crate::models::chat::IngestResponse;
use crate::services::UploadStorage;
use crate::utils::error::ApiError;
use axum::{
    extract::{multipart::MultipartRejection, Extension, Multipart},
    Json,
};
use chrono::Utc;
use pdfchat_core::collection::collection_name;
use pdfchat_core::jobs::{JobQueue, INGEST_JOB_NAME};
use pdfchat_core::models::IngestJob;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

struct UploadedFile {
    file_name: String,
    content_type: Option<String>,
    data: Vec<u8>,
}

/// Ingestion coordinator. Validates the upload, persists the chat/document
/// records and the raw bytes, enqueues exactly one ingest job, and returns
/// without waiting for ingestion; parsing and embedding a large PDF can
/// take minutes and must not hold the request open.
pub async fn ingest_handler(
    Extension(repository): Extension<Arc<Repository>>,
    Extension(queue): Extension<Arc<JobQueue>>,
    Extension(storage): Extension<Arc<UploadStorage>>,
    Extension(max_attempts): Extension<IngestMaxAttempts>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<IngestResponse>, ApiError> {
    info!("File upload request received");

    let mut multipart = multipart.map_err(|e| {
        ApiError::BadRequest(format!("Expected multipart/form-data with `file` field: {}", e))
    })?;

    let mut upload: Option<UploadedFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read field: {}", e)))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        if field_name == "file" {
            let file_name = field
                .file_name()
                .map(|s| s.to_string())
                .ok_or_else(|| ApiError::BadRequest("File field has no filename".to_string()))?;
            let content_type = field.content_type().map(|s| s.to_string());
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {}", e)))?
                .to_vec();

            upload = Some(UploadedFile {
                file_name,
                content_type,
                data,
            });
        }
    }

    let upload = upload
        .ok_or_else(|| ApiError::BadRequest("No file provided under field `file`".to_string()))?;

    // All validation happens before the first write: a rejected upload must
    // leave zero chat/document/job records behind.
    if !is_recognized_document(&upload.file_name, upload.content_type.as_deref()) {
        return Err(ApiError::BadRequest(format!(
            "Unsupported document type for {}",
            upload.file_name
        )));
    }

    let chat_name = chat_name_from(&upload.file_name);
    let chat = repository
        .create_chat(&chat_name)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    let uploaded_at = Utc::now().timestamp_millis();
    let collection = collection_name(chat.id, uploaded_at, &upload.file_name);

    let staged_path = storage.staged_path(chat.id, &upload.file_name);
    let size_bytes = upload.data.len() as i64;

    let document = repository
        .create_document(
            chat.id,
            &collection,
            &upload.file_name,
            upload.content_type.as_deref(),
            size_bytes,
            &staged_path,
        )
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    storage
        .write(&staged_path, &upload.data)
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to stage upload: {}", e)))?;

    let job = IngestJob {
        file_path: staged_path,
        chat_id: chat.id,
        document_id: document.id,
        collection_name: collection,
        file_name: upload.file_name.clone(),
        mime_type: upload.content_type.clone(),
        size_bytes,
    };

    if let Err(e) = queue.enqueue(INGEST_JOB_NAME, &job, max_attempts.0).await {
        // The document row and staged file exist; the worker's
        // reconciliation sweep re-enqueues documents with no job.
        error!(
            "Failed to enqueue ingest job for document {}: {}",
            document.id, e
        );
        return Err(ApiError::InternalError(e.to_string()));
    }

    info!(
        "Queued ingestion for chat {} document {} ({} bytes)",
        chat.id, document.id, size_bytes
    );

    Ok(Json(IngestResponse {
        ok: true,
        text: format!("Upload accepted; chat {} created", chat.id),
    }))
}

/// Retry limit for enqueued ingest jobs, injected from settings.
#[derive(Clone, Copy)]
pub struct IngestMaxAttempts(pub i32);

fn chat_name_from(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name)
        .to_string()
}

/// Accept only encodings the ingestion worker can extract text from.
fn is_recognized_document(file_name: &str, content_type: Option<&str>) -> bool {
    const RECOGNIZED_TYPES: &[&str] = &["application/pdf", "text/plain", "text/markdown"];

    if let Some(raw) = content_type {
        let essence = raw.split(';').next().unwrap_or("").trim();
        if RECOGNIZED_TYPES.contains(&essence) {
            return true;
        }
        // Generic binary declarations fall back to the extension check.
        if essence != "application/octet-stream" && !essence.is_empty() {
            return false;
        }
    }

    matches!(
        Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref(),
        Some("pdf") | Some("txt") | Some("md") | Some("markdown")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_document_encodings() {
        assert!(is_recognized_document("manual.pdf", Some("application/pdf")));
        assert!(is_recognized_document("notes.txt", Some("text/plain")));
        assert!(is_recognized_document(
            "readme.md",
            Some("text/markdown; charset=utf-8")
        ));
    }

    #[test]
    fn falls_back_to_the_extension_for_generic_types() {
        assert!(is_recognized_document(
            "manual.pdf",
            Some("application/octet-stream")
        ));
        assert!(is_recognized_document("manual.pdf", None));
        assert!(!is_recognized_document(
            "binary.exe",
            Some("application/octet-stream")
        ));
    }

    #[test]
    fn rejects_non_document_payloads() {
        assert!(!is_recognized_document("photo.png", Some("image/png")));
        assert!(!is_recognized_document("page.html", Some("text/html")));
        assert!(!is_recognized_document("archive.zip", None));
    }

    #[test]
    fn chat_name_is_the_file_stem() {
        assert_eq!(chat_name_from("Refund Policy.pdf"), "Refund Policy");
        assert_eq!(chat_name_from("noextension"), "noextension");
    }
}
