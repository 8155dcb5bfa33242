use anyhow::Result;
use config::{Config, Environment, File};
use pdfchat_core::chunker::ChunkStrategy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
    pub listen_channel: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    16
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
    #[serde(default)]
    pub strategy: ChunkStrategy,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkerConfig {
    /// Concurrent job consumers. Tune against the embedding server's own
    /// concurrency limit before raising this.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Jobs stuck in running longer than this are returned to pending.
    #[serde(default = "default_stale_after")]
    pub stale_after_seconds: i64,
    pub max_attempts: i32,
}

fn default_concurrency() -> usize {
    8
}

fn default_max_file_size_mb() -> u64 {
    100
}

fn default_poll_interval() -> u64 {
    5
}

fn default_stale_after() -> i64 {
    300
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;

        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            anyhow::bail!("worker.concurrency must be at least 1");
        }

        if self.chunking.size == 0 {
            anyhow::bail!("chunking.size must be at least 1");
        }

        if self.chunking.overlap >= self.chunking.size {
            anyhow::bail!(
                "chunking.overlap ({}) must be smaller than chunking.size ({})",
                self.chunking.overlap,
                self.chunking.size
            );
        }

        Ok(())
    }
}
