use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("File too large: {0} MB (max: {1} MB)")]
    FileTooLarge(u64, u64),

    #[error("Parsing error: {0}")]
    ParsingError(String),

    #[error("Chunking error: {0}")]
    ChunkingError(String),

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}
