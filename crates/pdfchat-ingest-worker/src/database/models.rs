use sqlx::FromRow;

/// A document row joined with its staged file location, as seen by the
/// reconciliation sweep.
#[derive(Debug, Clone, FromRow)]
pub struct StagedDocument {
    pub id: i32,
    pub chat_id: i32,
    pub collection_name: String,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub file_path: String,
}
