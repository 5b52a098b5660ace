use anyhow::Result;
use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

use memory_api_server::config::Settings;
use memory_api_server::database::{DbPool, Repository};
use memory_api_server::handlers;
use memory_api_server::services::memory::{
    Clock, MemoryManager, MemoryStore, MemoryTaskQueue, SummaryProvider, SystemClock,
};
use memory_api_server::services::{
    EmbeddingService, KnowledgeService, LlmService, SummarizerService, UnderstandingService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,memory_api_server=debug".to_string()),
        )
        .with_target(true)
        .json()
        .init();

    info!("Starting memory API server...");

    // Load configuration
    let settings = Settings::load()?;
    info!("Configuration loaded");

    // Initialize database pool and schema
    let db_pool = DbPool::new(&settings.database).await?;
    info!("Database connection established");

    let repository = Arc::new(Repository::new(db_pool.clone()));
    repository.ensure_memory_tables().await?;
    repository.ensure_indices().await?;

    // Capability services
    let embedding_service = Arc::new(EmbeddingService::new(settings.embedding.clone()));

    let llm_service = Arc::new(LlmService::new(
        settings.llm.clone(),
        settings.prompts.main_system_prompt.clone(),
    ));

    let understanding_service = Arc::new(UnderstandingService::new(
        settings.llm.base_url.clone(),
        settings.understanding.clone(),
    ));

    let summarizer: Arc<dyn SummaryProvider> = Arc::new(SummarizerService::new(
        settings.llm.base_url.clone(),
        settings.summarizer.clone(),
    ));

    let knowledge_service = Arc::new(KnowledgeService::new(
        repository.clone(),
        embedding_service.clone(),
        settings.knowledge.clone(),
    ));

    // Memory core: worker queue first, then the manager that feeds it
    let store: Arc<dyn MemoryStore> = repository.clone();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let task_queue = Arc::new(MemoryTaskQueue::new(
        store.clone(),
        summarizer,
        clock.clone(),
        settings.memory.clone(),
    ));

    let memory_manager = Arc::new(MemoryManager::new(
        store,
        task_queue,
        clock,
        settings.memory.clone(),
    ));

    // Build router
    let app = build_router(
        db_pool,
        memory_manager,
        understanding_service,
        knowledge_service,
        llm_service,
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
    db_pool: DbPool,
    memory_manager: Arc<MemoryManager>,
    understanding_service: Arc<UnderstandingService>,
    knowledge_service: Arc<KnowledgeService>,
    llm_service: Arc<LlmService>,
) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .route("/api/chat", post(handlers::chat::chat_handler))
        .layer(Extension(db_pool))
        .layer(Extension(memory_manager))
        .layer(Extension(understanding_service))
        .layer(Extension(knowledge_service))
        .layer(Extension(llm_service))
        .layer(
            CorsLayer::permissive()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
}
