use crate::database::DbPool;
use anyhow::Result;
use pgvector::Vector;
use sqlx::FromRow;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ChunkEntry {
    pub chat_id: i32,
    pub document_id: i32,
    pub chunk_index: i32,
    pub content: String,
    pub embedding: Vector,
}

#[derive(Debug, Clone, FromRow)]
pub struct ScoredChunk {
    pub chat_id: i32,
    pub document_id: i32,
    pub chunk_index: i32,
    pub content: String,
    pub similarity: f32,
}

/// Per-document vector index client. A collection is the set of rows sharing
/// a `collection_name`; inserting into a name that does not exist yet creates
/// the collection, and searching an absent or still-empty collection returns
/// no rows rather than an error.
#[derive(Clone)]
pub struct VectorStore {
    pool: DbPool,
}

impl VectorStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, collection_name: &str, entries: Vec<ChunkEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let entry_count = entries.len();
        let mut transaction = self.pool.get_pool().begin().await?;

        for entry in entries {
            sqlx::query(
                r#"INSERT INTO doc_chunks
                   (collection_name, chat_id, document_id, chunk_index, content, embedding)
                   VALUES ($1, $2, $3, $4, $5, $6)"#,
            )
            .bind(collection_name)
            .bind(entry.chat_id)
            .bind(entry.document_id)
            .bind(entry.chunk_index)
            .bind(&entry.content)
            .bind(entry.embedding)
            .execute(&mut *transaction)
            .await?;
        }

        transaction.commit().await?;
        debug!("Inserted {} chunks into {}", entry_count, collection_name);

        Ok(())
    }

    pub async fn search(
        &self,
        collection_name: &str,
        query_embedding: Vector,
        limit: i32,
    ) -> Result<Vec<ScoredChunk>> {
        let chunks = sqlx::query_as::<_, ScoredChunk>(
            r#"SELECT
                chat_id,
                document_id,
                chunk_index,
                content,
                (1 - (embedding <=> $2))::float4 AS similarity
               FROM doc_chunks
               WHERE collection_name = $1
               ORDER BY embedding <=> $2
               LIMIT $3"#,
        )
        .bind(collection_name)
        .bind(query_embedding)
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;

        debug!(
            "Found {} chunks in collection {}",
            chunks.len(),
            collection_name
        );

        Ok(chunks)
    }
}
