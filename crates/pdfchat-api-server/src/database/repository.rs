use anyhow::Result;
use pdfchat_core::database::DbPool;
use pdfchat_core::models::{Chat, Document, Message, MessageRole};
use tracing::debug;

pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    // ==================== Chats ====================

    pub async fn create_chat(&self, name: &str) -> Result<Chat> {
        let chat = sqlx::query_as::<_, Chat>(
            r#"INSERT INTO chat (name)
               VALUES ($1)
               RETURNING id, name, created_at, updated_at"#,
        )
        .bind(name)
        .fetch_one(self.pool.get_pool())
        .await?;

        debug!("Created chat {} ({})", chat.id, chat.name);

        Ok(chat)
    }

    pub async fn get_chat(&self, chat_id: i32) -> Result<Option<Chat>> {
        let chat = sqlx::query_as::<_, Chat>(
            "SELECT id, name, created_at, updated_at FROM chat WHERE id = $1",
        )
        .bind(chat_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(chat)
    }

    // ==================== Messages ====================

    /// Append a message and bump the owning chat's updated_at.
    pub async fn append_message(
        &self,
        chat_id: i32,
        role: MessageRole,
        content: &str,
    ) -> Result<Message> {
        let mut transaction = self.pool.get_pool().begin().await?;

        let message = sqlx::query_as::<_, Message>(
            r#"INSERT INTO message (chat_id, role, content)
               VALUES ($1, $2, $3)
               RETURNING id, chat_id, role, content, created_at"#,
        )
        .bind(chat_id)
        .bind(role)
        .bind(content)
        .fetch_one(&mut *transaction)
        .await?;

        sqlx::query("UPDATE chat SET updated_at = now() WHERE id = $1")
            .bind(chat_id)
            .execute(&mut *transaction)
            .await?;

        transaction.commit().await?;

        Ok(message)
    }

    /// All messages of a chat in their total order: created_at ascending,
    /// ties broken by id.
    pub async fn chat_messages(&self, chat_id: i32) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            r#"SELECT id, chat_id, role, content, created_at
               FROM message
               WHERE chat_id = $1
               ORDER BY created_at ASC, id ASC"#,
        )
        .bind(chat_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(messages)
    }

    /// Most recent `limit` messages, returned in chronological order.
    pub async fn recent_messages(&self, chat_id: i32, limit: i64) -> Result<Vec<Message>> {
        let mut messages = sqlx::query_as::<_, Message>(
            r#"SELECT id, chat_id, role, content, created_at
               FROM message
               WHERE chat_id = $1
               ORDER BY created_at DESC, id DESC
               LIMIT $2"#,
        )
        .bind(chat_id)
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;

        messages.reverse();

        Ok(messages)
    }

    // ==================== Documents ====================

    pub async fn create_document(
        &self,
        chat_id: i32,
        collection_name: &str,
        file_name: &str,
        mime_type: Option<&str>,
        size_bytes: i64,
        file_path: &str,
    ) -> Result<Document> {
        let document = sqlx::query_as::<_, Document>(
            r#"INSERT INTO doc (chat_id, collection_name, file_name, mime_type, size_bytes, file_path)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id, chat_id, collection_name, file_name, mime_type, size_bytes, created_at"#,
        )
        .bind(chat_id)
        .bind(collection_name)
        .bind(file_name)
        .bind(mime_type)
        .bind(size_bytes)
        .bind(file_path)
        .fetch_one(self.pool.get_pool())
        .await?;

        debug!(
            "Created document {} (collection {})",
            document.id, document.collection_name
        );

        Ok(document)
    }

    pub async fn chat_documents(&self, chat_id: i32) -> Result<Vec<Document>> {
        let docs = sqlx::query_as::<_, Document>(
            r#"SELECT id, chat_id, collection_name, file_name, mime_type, size_bytes, created_at
               FROM doc
               WHERE chat_id = $1
               ORDER BY created_at ASC, id ASC"#,
        )
        .bind(chat_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(docs)
    }

    /// Every document, newest first, for the sidebar listing.
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let docs = sqlx::query_as::<_, Document>(
            r#"SELECT id, chat_id, collection_name, file_name, mime_type, size_bytes, created_at
               FROM doc
               ORDER BY created_at DESC, id DESC"#,
        )
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(docs)
    }
}
