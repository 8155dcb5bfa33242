use anyhow::Result;
use tracing::info;

use pdfchat_ingest_worker::config::Settings;
use pdfchat_ingest_worker::database::DbPool;
use pdfchat_ingest_worker::utils::logger;
use pdfchat_ingest_worker::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_logger()?;

    info!("Starting pdfchat ingest worker...");

    let settings = Settings::load()?;
    info!("Configuration loaded");

    let db_pool = DbPool::connect(
        &settings.database.url,
        settings.database.pool_max_size,
        settings.database.pool_timeout_seconds,
    )
    .await?;
    info!("Database connection established");

    let worker = Worker::new(settings, db_pool);
    worker.run().await
}
