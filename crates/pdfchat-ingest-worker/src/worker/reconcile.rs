use crate::database::Repository;
use anyhow::Result;
use pdfchat_core::jobs::{JobQueue, INGEST_JOB_NAME};
use pdfchat_core::models::IngestJob;
use std::sync::Arc;
use tracing::{error, info};

/// Startup sweep closing the coordinator's enqueue-failure window: a
/// document row whose job was never enqueued would otherwise answer with
/// empty context forever.
pub struct ReconcileSweep {
    repository: Arc<Repository>,
    queue: JobQueue,
    max_attempts: i32,
}

impl ReconcileSweep {
    pub fn new(repository: Arc<Repository>, queue: JobQueue, max_attempts: i32) -> Self {
        Self {
            repository,
            queue,
            max_attempts,
        }
    }

    /// Re-enqueue every document with no chunks and no queue row. Returns
    /// how many jobs were enqueued.
    pub async fn run(&self) -> Result<usize> {
        let orphans = self.repository.unindexed_documents().await?;

        if orphans.is_empty() {
            return Ok(0);
        }

        info!("Found {} documents with no ingest job", orphans.len());

        let mut enqueued = 0;

        for doc in orphans {
            let job = IngestJob {
                file_path: doc.file_path,
                chat_id: doc.chat_id,
                document_id: doc.id,
                collection_name: doc.collection_name,
                file_name: doc.file_name,
                mime_type: doc.mime_type,
                size_bytes: doc.size_bytes.unwrap_or(0),
            };

            match self
                .queue
                .enqueue(INGEST_JOB_NAME, &job, self.max_attempts)
                .await
            {
                Ok(job_id) => {
                    info!("Re-enqueued document {} as job {}", job.document_id, job_id);
                    enqueued += 1;
                }
                Err(e) => {
                    error!("Failed to re-enqueue document {}: {}", job.document_id, e);
                }
            }
        }

        Ok(enqueued)
    }
}
