use crate::config::ChunkingConfig;
use crate::document::{DocumentLoader, DocumentParser};
use crate::embedding::{EmbeddingProvider, EmbeddingRequest};
use crate::utils::error::WorkerError;
use anyhow::Result;
use pdfchat_core::chunker::{Chunk, TextChunker};
use pdfchat_core::models::IngestJob;
use pdfchat_core::vector::{ChunkEntry, VectorStore};
use pgvector::Vector;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub struct IngestProcessor {
    chunking: ChunkingConfig,
    max_file_size_mb: u64,
    embedder: Arc<dyn EmbeddingProvider>,
    vector_store: VectorStore,
}

impl IngestProcessor {
    pub fn new(
        chunking: ChunkingConfig,
        max_file_size_mb: u64,
        embedder: Arc<dyn EmbeddingProvider>,
        vector_store: VectorStore,
    ) -> Self {
        Self {
            chunking,
            max_file_size_mb,
            embedder,
            vector_store,
        }
    }

    /// Process one ingest job: load → parse → chunk → embed → index.
    /// Safe to repeat under at-least-once redelivery; duplicate chunk rows in
    /// a collection are tolerated.
    pub async fn process(&self, job: &IngestJob) -> Result<()> {
        info!(
            "Processing document {} into {}",
            job.document_id, job.collection_name
        );

        let file_path = PathBuf::from(&job.file_path);
        DocumentLoader::validate_file(&file_path, self.max_file_size_mb)?;

        let parsed = DocumentParser::parse(&file_path)?;

        if parsed.content.trim().is_empty() {
            warn!("Document {} has no extractable text", job.document_id);
            return Ok(());
        }

        let chunker = TextChunker::new(
            self.chunking.size,
            self.chunking.overlap,
            self.chunking.strategy,
        );

        let chunks = chunker.chunk(&parsed.content)?;

        if chunks.is_empty() {
            warn!("Document {} produced no chunks", job.document_id);
            return Ok(());
        }

        info!(
            "Created {} chunks for document {}",
            chunks.len(),
            job.document_id
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let response = self.embedder.embed(EmbeddingRequest { texts }).await?;

        let entries = build_entries(job, chunks, response.embeddings)?;
        let entry_count = entries.len();

        self.vector_store
            .insert(&job.collection_name, entries)
            .await?;

        info!(
            "Indexed {} chunks into {}",
            entry_count, job.collection_name
        );

        Ok(())
    }
}

/// Pair chunks with their embeddings and attach the job's identity metadata.
fn build_entries(
    job: &IngestJob,
    chunks: Vec<Chunk>,
    embeddings: Vec<Vec<f32>>,
) -> Result<Vec<ChunkEntry>> {
    if chunks.len() != embeddings.len() {
        return Err(WorkerError::EmbeddingError(format!(
            "Chunk/embedding count mismatch: {} chunks, {} embeddings",
            chunks.len(),
            embeddings.len()
        ))
        .into());
    }

    let entries = chunks
        .into_iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| ChunkEntry {
            chat_id: job.chat_id,
            document_id: job.document_id,
            chunk_index: chunk.index as i32,
            content: chunk.content,
            embedding: Vector::from(embedding),
        })
        .collect();

    Ok(entries)
}
