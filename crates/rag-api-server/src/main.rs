use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
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

use rag_api_server::config::Settings;
use rag_api_server::database::{DbPool, Repository};
use rag_api_server::handlers;
use rag_api_server::logging::{ActivityLogger, LoggerConfig};
use rag_api_server::security::{self, CustomHeaderValidator, DocumentAuthorization, IpWhitelist};
use rag_api_server::services::conversation::ConversationManager;
use rag_api_server::services::{
    ConfigResolver, DocumentService, EmbeddingService, EventBus, LlmService, QueryCache, RagService,
};
use rag_api_server::state::AppState;
use rag_api_server::utils::limiters::Limiters;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,rag_api_server=debug".to_string()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Starting RAG API Server...");

    let settings = Settings::load()?;
    info!("Configuration loaded");

    let db_pool = DbPool::new(&settings.database).await?;
    info!("Database connection established");

    let repository = Arc::new(Repository::new(db_pool.clone()));

    // Ensure ambient schema (idempotent) before serving traffic.
    repository.ensure_processing_table().await?;
    repository.ensure_chat_history_tables().await?;
    repository.ensure_indices().await?;
    repository.ensure_cache_and_config_tables().await?;
    info!("Database schema checks complete");

    let config_resolver = ConfigResolver::bootstrap(repository.clone()).await?;
    config_resolver.spawn_refresh_task();
    info!("SystemConfig resolver bootstrapped (60s refresh)");

    let query_cache = Arc::new(QueryCache::new(
        repository.clone(),
        settings.cache.similarity_threshold,
        settings.cache.query_ttl_seconds,
    ));
    {
        let query_cache = query_cache.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
            loop {
                interval.tick().await;
                match query_cache.compact_expired().await {
                    Ok(n) if n > 0 => info!("compacted {} expired query-cache entries", n),
                    Ok(_) => {}
                    Err(e) => tracing::warn!("query cache compaction failed: {}", e),
                }
            }
        });
    }

    let limiters = Arc::new(Limiters::new(&settings.limits));

    let embedding_service = Arc::new(EmbeddingService::new(
        settings.llm.base_url.clone(),
        settings.embedding.clone(),
        limiters.clone(),
        settings.limits.embedding_batch_size,
    ));

    let llm_service = Arc::new(LlmService::new(settings.llm.clone()));

    let document_service = Arc::new(DocumentService::new(
        repository.clone(),
        embedding_service.clone(),
        llm_service.clone(),
        &settings.rag,
        &settings.limits,
    ));

    let rag_service = Arc::new(RagService::new(
        repository.clone(),
        embedding_service.clone(),
        llm_service.clone(),
        settings.rag.clone(),
        limiters.clone(),
    ));

    let activity_logger = ActivityLogger::new(db_pool.get_pool().clone(), LoggerConfig::default());

    let conversation_manager = Arc::new(
        ConversationManager::new(
            Box::new((*embedding_service).clone()),
            Box::new((*rag_service).clone()),
            Box::new((*llm_service).clone()),
            activity_logger,
            settings.llm.stream_response,
            settings.prompts.main_system_prompt.clone(),
            settings.pricing.clone(),
            settings.rag.rerank_enabled,
        )
        .with_query_cache(query_cache.clone())
        .with_config_resolver(config_resolver.clone()),
    );

    let event_bus = Arc::new(EventBus::new(1024));

    // Initialize security
    let ip_whitelist = Arc::new(IpWhitelist::new(
        settings.config_path(),
        settings.security.allowed_ips.clone(),
    )?);

    // Clone inner value because start_watcher takes ownership of self (not Arc)
    (*ip_whitelist).clone().start_watcher()?;
    info!("IP whitelist watcher started");

    let header_validator = Arc::new(CustomHeaderValidator::new(
        settings.security.custom_headers.app_id.clone(),
        settings.security.custom_headers.api_key.clone(),
        settings.security.custom_headers.request_signature == "enabled",
        settings.security.custom_headers.timestamp_tolerance,
    ));

    let document_auth = Arc::new(DocumentAuthorization::new(repository.clone()));

    let app_state = Arc::new(AppState {
        db_pool: db_pool.clone(),
        embedding_service: embedding_service.clone(),
        rag_service: rag_service.clone(),
        llm_service: llm_service.clone(),
        conversation_manager,
        settings: settings.clone(),
        document_service,
        document_auth: document_auth.clone(),
        ip_whitelist: ip_whitelist.clone(),
        header_validator: header_validator.clone(),
        event_bus,
        limiters,
        query_cache,
        config_resolver,
    });

    let app = build_router(
        app_state,
        repository,
        embedding_service,
        document_auth,
        ip_whitelist,
        header_validator,
    );

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn build_router(
    app_state: Arc<AppState>,
    repository: Arc<Repository>,
    embedding_service: Arc<EmbeddingService>,
    document_auth: Arc<DocumentAuthorization>,
    ip_whitelist: Arc<IpWhitelist>,
    header_validator: Arc<CustomHeaderValidator>,
) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    let protected_routes = Router::new()
        .route("/api/chat", post(handlers::chat::chat_handler))
        .route("/api/chat/stream", post(handlers::chat::chat_stream_handler))
        .route("/api/chat/session/new", post(handlers::chat::new_session_handler))
        .route("/api/chat/stats", get(handlers::chat::cache_stats_handler))
        .route("/api/chat/cleanup", post(handlers::chat::cleanup_sessions_handler))
        .route("/api/chat/logger/stats", get(handlers::chat::logger_stats_handler))
        .route("/api/chat/init", post(handlers::chat::init_handler))
        .route("/api/chat/events", get(handlers::chat::events_handler))
        .route("/api/chat/messages/:id/feedback", post(handlers::chat::feedback_handler))
        .route("/api/chat/conversations", get(handlers::chat::list_conversations_handler))
        .route("/api/chat/conversations/:id", get(handlers::chat::get_conversation_handler))
        .route("/api/chat/conversations/:id/archive", axum::routing::put(handlers::chat::archive_conversation_handler))
        .route("/api/search", post(handlers::search::search_handler))
        .route("/api/documents", get(handlers::search::list_documents_handler))
        .route("/api/documents/:id", get(handlers::documents::get_document_handler))
        .route("/api/documents/:id", axum::routing::delete(handlers::documents::delete_document_handler))
        .route("/api/documents/:id/retry", post(handlers::documents::retry_document_handler))
        .route("/api/documents/:id/status", get(handlers::documents::document_status_handler))
        .route("/api/upload", post(handlers::upload::upload_handler))
        .route("/api/upload/gemini", post(handlers::gemini::upload_handler_gemini))
        .layer(middleware::from_fn(security::middleware::security_middleware))
        .layer(Extension(repository))
        .layer(Extension(embedding_service))
        .layer(Extension(ip_whitelist))
        .layer(Extension(header_validator))
        .layer(Extension(document_auth))
        .layer(Extension(app_state.query_cache.clone()))
        .with_state(app_state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(
            CorsLayer::permissive()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
}
