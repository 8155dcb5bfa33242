use super::models::StagedDocument;
use anyhow::Result;
use pdfchat_core::database::DbPool;
use tracing::debug;

pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Documents whose collection has no chunks and for which no ingest job
    /// was ever recorded. These are uploads whose enqueue step failed after
    /// the document row was written.
    pub async fn unindexed_documents(&self) -> Result<Vec<StagedDocument>> {
        let docs = sqlx::query_as::<_, StagedDocument>(
            r#"SELECT d.id, d.chat_id, d.collection_name, d.file_name,
                      d.mime_type, d.size_bytes, d.file_path
               FROM doc d
               WHERE NOT EXISTS (
                   SELECT 1 FROM doc_chunks c WHERE c.document_id = d.id
               )
               AND NOT EXISTS (
                   SELECT 1 FROM ingest_jobs j
                   WHERE (j.payload->>'documentId')::int = d.id
               )
               ORDER BY d.id"#,
        )
        .fetch_all(self.pool.get_pool())
        .await?;

        debug!("Found {} documents with no ingest job", docs.len());

        Ok(docs)
    }
}
