use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

use pdfchat_api_server::config::Settings;
use pdfchat_api_server::database::{DbPool, Repository};
use pdfchat_api_server::handlers;
use pdfchat_api_server::handlers::ingest::IngestMaxAttempts;
use pdfchat_api_server::services::{
    ContextRetriever, EmbeddingService, LlmService, Responder, UploadStorage,
};
use pdfchat_core::jobs::JobQueue;
use pdfchat_core::vector::VectorStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,pdfchat_api_server=debug".to_string()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Starting pdfchat API server...");

    // Load configuration
    let settings = Settings::load()?;
    info!("Configuration loaded");

    // Initialize database pool
    let db_pool = DbPool::connect(
        &settings.database.url,
        settings.database.pool_max_size,
        settings.database.pool_timeout_seconds,
    )
    .await?;
    info!("Database connection established");

    sqlx::migrate!().run(db_pool.get_pool()).await?;
    info!("Migrations applied");

    // Initialize services
    let repository = Arc::new(Repository::new(db_pool.clone()));

    let embedding_service = Arc::new(EmbeddingService::new(settings.embedding.clone()));

    let llm_service = Arc::new(LlmService::new(settings.llm.clone()));

    let vector_store = VectorStore::new(db_pool.clone());

    let retriever = Arc::new(ContextRetriever::new(
        embedding_service.clone(),
        vector_store,
        settings.rag.retrieval_top_k,
    ));

    let responder = Arc::new(Responder::new(
        repository.clone(),
        retriever,
        llm_service,
        settings.rag.clone(),
        settings.prompts.clone(),
    ));

    let queue = Arc::new(JobQueue::new(
        db_pool.clone(),
        settings.queue.channel.clone(),
    ));

    let storage = Arc::new(UploadStorage::new(settings.storage.upload_dir.clone()));

    // Build router
    let app = build_router(
        repository,
        responder,
        queue,
        storage,
        IngestMaxAttempts(settings.queue.max_attempts),
    );

    // Server address
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(
    repository: Arc<Repository>,
    responder: Arc<Responder>,
    queue: Arc<JobQueue>,
    storage: Arc<UploadStorage>,
    max_attempts: IngestMaxAttempts,
) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    let api_routes = Router::new()
        .route("/ingest", post(handlers::ingest::ingest_handler))
        .route("/chat/{id}", get(handlers::chat::get_chat_handler))
        .route("/chats", get(handlers::chat::list_chats_handler))
        .route("/message", post(handlers::message::send_message_handler))
        .layer(Extension(repository))
        .layer(Extension(responder))
        .layer(Extension(queue))
        .layer(Extension(storage))
        .layer(Extension(max_attempts));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        // Body limit for uploads (max 10MB per document)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
}
