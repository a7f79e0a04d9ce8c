use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream;
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;

use crate::handlers::search::DocumentInfo;
use crate::models::chat::ChatRequest;
use crate::services::conversation::manager::{ChatStreamChunk, ConversationManager};
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::extract::{Path, Query};

/// Handle streaming chat request
/// POST /api/chat/stream
///
/// Relays the conversation manager's `ChatStreamChunk` stream as SSE events,
/// one axum `Event` per chunk, preserving the manager's ordering
/// (start -> stage* -> message* -> sources -> metadata -> done).
pub async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (axum::http::StatusCode, String)> {
    info!(
        "Chat stream request: session_id={}, user_id={}, document_id={:?}",
        req.session_id, req.user_id, req.document_id
    );

    if req.message.trim().is_empty() {
        return Err((
            axum::http::StatusCode::BAD_REQUEST,
            "Message cannot be empty".to_string(),
        ));
    }

    let conversation_manager = state.conversation_manager.clone();
    let request_id = uuid::Uuid::new_v4().to_string();

    let chunk_stream = conversation_manager
        .handle_message(
            req.session_id,
            req.user_id,
            req.message,
            req.document_id,
            req.document_ids,
            request_id,
        )
        .await
        .map_err(|e| (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let sse_stream = chunk_stream.map(|item| {
        let event = match item {
            Ok(chunk @ ChatStreamChunk::Start { .. }) => {
                let payload = serde_json::to_string(&chunk).unwrap_or_default();
                Event::default().event("start").data(payload)
            }
            Ok(chunk @ ChatStreamChunk::Stage { .. }) => {
                let payload = serde_json::to_string(&chunk).unwrap_or_default();
                Event::default().event("stage").data(payload)
            }
            Ok(chunk @ ChatStreamChunk::Message { .. }) => {
                let payload = serde_json::to_string(&chunk).unwrap_or_default();
                Event::default().event("message").data(payload)
            }
            Ok(chunk @ ChatStreamChunk::Sources { .. }) => {
                let payload = serde_json::to_string(&chunk).unwrap_or_default();
                Event::default().event("sources").data(payload)
            }
            Ok(chunk @ ChatStreamChunk::Metadata { .. }) => {
                let payload = serde_json::to_string(&chunk).unwrap_or_default();
                Event::default().event("metadata").data(payload)
            }
            Ok(chunk @ ChatStreamChunk::Done { .. }) => {
                let payload = serde_json::to_string(&chunk).unwrap_or_default();
                Event::default().event("done").data(payload)
            }
            Err(e) => Event::default()
                .event("error")
                .data(format!("{{\"message\": \"{}\"}}", e)),
        };

        Ok(event)
    });

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}

/// Generate new session ID for user
/// POST /api/chat/session/new
#[derive(serde::Deserialize)]
pub struct NewSessionRequest {
    pub user_id: i64,
}

#[derive(serde::Serialize)]
pub struct NewSessionResponse {
    pub session_id: i64,
}

pub async fn new_session_handler(
    Json(req): Json<NewSessionRequest>,
) -> Result<Json<NewSessionResponse>, (axum::http::StatusCode, String)> {
    // Generate identifier using i32 casting if needed by manager helper?
    // Manager::generate_session_id signature in my manager.rs was: fn generate_session_id(user_id: i32) -> SessionId
    // So I must cast.
    let session_id = ConversationManager::generate_session_id(req.user_id);
    
    info!("Generated new session ID {} for user {}", session_id, req.user_id);
    
    Ok(Json(NewSessionResponse { session_id }))
}

/// Get conversation cache statistics
/// GET /api/chat/stats
#[derive(serde::Serialize)]
pub struct CacheStatsResponse {
    pub active_sessions: usize,
    pub memory_usage_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f64,
}

pub async fn cache_stats_handler(
    State(state): State<Arc<AppState>>,
) -> Json<CacheStatsResponse> {
    let stats = state.conversation_manager.cache_stats();
    
    Json(CacheStatsResponse {
        active_sessions: stats.active_sessions,
        memory_usage_mb: stats.memory_usage_mb,
        memory_total_mb: stats.memory_total_mb,
        memory_usage_percent: stats.memory_usage_percent,
    })
}

/// Manual cleanup of expired sessions
/// POST /api/chat/cleanup
#[derive(serde::Serialize)]
pub struct CleanupResponse {
    pub sessions_removed: usize,
}

pub async fn cleanup_sessions_handler(
    State(state): State<Arc<AppState>>,
) -> Json<CleanupResponse> {
    let count = state.conversation_manager.cleanup_expired_sessions();
    
    info!("Manual cleanup removed {} expired sessions", count);
    
    Json(CleanupResponse {
        sessions_removed: count,
    })
}

/// Get logging queue statistics
#[derive(serde::Serialize)]
pub struct LoggerStatsResponse {
    pub queue_length: usize,
    pub is_full: bool,
}

pub async fn logger_stats_handler(
    State(state): State<Arc<AppState>>,
) -> Json<LoggerStatsResponse> {
    let logger = &state.conversation_manager.logger();
    
    Json(LoggerStatsResponse {
        queue_length: logger.queue_len(),
        is_full: logger.is_queue_full(),
    })
}

/// Initialize chat session and fetch documents
/// POST /api/chat/init
#[derive(serde::Deserialize)]
pub struct ChatInitRequest {
    pub user_id: i32,
    pub session_id: Option<i64>,
}

#[derive(serde::Serialize)]
pub struct ChatInitResponse {
    pub session_id: i64,
    pub documents: Vec<DocumentInfo>,
    pub processing_docs: Vec<crate::database::DocumentProcessingStatus>,
}

pub async fn init_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatInitRequest>,
) -> Result<Json<ChatInitResponse>, ApiError> {
    info!("Chat init request from user {}", req.user_id);

    // 1. Get or Generate Session ID
    let session_id = req.session_id.unwrap_or_else(|| {
        ConversationManager::generate_session_id(req.user_id as i64)
    });

    // 2. Fetch Document List
    let repository = crate::database::Repository::new(state.db_pool.clone());
    let docs = repository
        .get_user_documents(req.user_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    let documents: Vec<DocumentInfo> = docs
        .into_iter()
        .map(|doc| DocumentInfo {
            document_id: doc.document_id,
            title: doc.document_title,
            owner_user_id: doc.owner_user_id,
            permission_level: doc.permission_level,
            created_at: doc.created_at.to_rfc3339(),
        })
        .collect();

    // 3. Fetch In-Progress Documents (Phase 2 Resilience)
    let processing_docs = repository
        .get_user_processing_documents(req.user_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    info!("Initialized session {} with {} docs and {} in-progress docs for user {}", 
        session_id, documents.len(), processing_docs.len(), req.user_id);

    Ok(Json(ChatInitResponse {
        session_id,
        documents,
        processing_docs,
    }))
}

/// Persistent SSE stream for session events
/// GET /api/chat/events
#[derive(serde::Deserialize)]
pub struct EventsParams {
    pub session_id: i64,
}

pub async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = params.session_id;
    let rx = state.event_bus.subscribe();

    let stream = stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(session_event) => {
                    if session_event.session_id == session_id {
                        let data = serde_json::to_string(&session_event.event).unwrap_or_default();
                        let event = Event::default()
                            .event("system_event")
                            .data(data);
                        return Some((Ok(event), rx));
                    }
                    // Continue loop if not our session
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                    // Send error or skip? Let's skip and keep going
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    return None;
                }
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Non-streaming chat: drains the manager's SSE-equivalent chunk stream and
/// folds it into one `ChatResponse` (§6). Useful for clients that don't want
/// an SSE connection; costs the same tokens/latency as the streaming path
/// since it still waits for the full answer before responding.
/// POST /api/chat
#[derive(serde::Serialize)]
pub struct ChatResponse {
    pub request_id: String,
    pub answer: String,
    pub sources: Vec<crate::models::chat::SourceInfo>,
    pub metadata: Option<crate::models::chat::TurnMetadata>,
}

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message cannot be empty".to_string()));
    }

    let conversation_manager = state.conversation_manager.clone();
    let request_id = uuid::Uuid::new_v4().to_string();

    let mut chunk_stream = conversation_manager
        .handle_message(
            req.session_id,
            req.user_id,
            req.message,
            req.document_id,
            req.document_ids,
            request_id.clone(),
        )
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    let mut answer = String::new();
    let mut sources = Vec::new();
    let mut metadata = None;

    while let Some(item) = chunk_stream.next().await {
        match item.map_err(|e| ApiError::InternalError(e.to_string()))? {
            ChatStreamChunk::Message { delta, .. } => answer.push_str(&delta),
            ChatStreamChunk::Sources { sources: s, .. } => sources = s,
            ChatStreamChunk::Metadata { metadata: m, .. } => metadata = Some(m),
            ChatStreamChunk::Start { .. } | ChatStreamChunk::Stage { .. } | ChatStreamChunk::Done { .. } => {}
        }
    }

    Ok(Json(ChatResponse { request_id, answer, sources, metadata }))
}

/// Rate a Message (§3 Feedback, §6): one feedback row per (message, user),
/// upserted on repeat calls rather than accumulating duplicates.
/// POST /api/chat/messages/{id}/feedback
#[derive(serde::Deserialize)]
pub struct FeedbackRequest {
    pub user_id: i64,
    pub rating: i16,
    pub comment: Option<String>,
}

#[derive(serde::Serialize)]
pub struct FeedbackResponse {
    pub feedback_id: i64,
}

pub async fn feedback_handler(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<i64>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, ApiError> {
    if !(1..=5).contains(&req.rating) {
        return Err(ApiError::BadRequest("rating must be between 1 and 5".to_string()));
    }

    let feedback_id = state
        .rag_service
        .repository
        .upsert_feedback(message_id, req.user_id, req.rating, req.comment.as_deref())
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    Ok(Json(FeedbackResponse { feedback_id }))
}

/// List a user's conversations (§6), newest-updated first, with optional
/// archive filter, title/preview search and pagination.
/// GET /api/chat/conversations
#[derive(serde::Deserialize)]
pub struct ListConversationsParams {
    pub user_id: i64,
    #[serde(default)]
    pub include_archived: bool,
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    20
}

pub async fn list_conversations_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListConversationsParams>,
) -> Result<Json<Vec<crate::database::ConversationSummary>>, ApiError> {
    let conversations = state
        .rag_service
        .repository
        .list_conversations(
            params.user_id,
            params.include_archived,
            params.search.as_deref(),
            params.page.max(1),
            params.limit.clamp(1, 100),
        )
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    Ok(Json(conversations))
}

/// Full message history of one conversation (§6).
/// GET /api/chat/conversations/{id}
pub async fn get_conversation_handler(
    State(state): State<Arc<AppState>>,
    Path(history_id): Path<i64>,
) -> Result<Json<Vec<crate::database::ConversationMessage>>, ApiError> {
    let messages = state
        .rag_service
        .repository
        .get_conversation_messages(history_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    Ok(Json(messages))
}

/// Toggle a conversation's archived flag (§6).
/// PUT /api/chat/conversations/{id}/archive
#[derive(serde::Deserialize)]
pub struct ArchiveRequest {
    pub user_id: i64,
}

#[derive(serde::Serialize)]
pub struct ArchiveResponse {
    pub archived: bool,
}

pub async fn archive_conversation_handler(
    State(state): State<Arc<AppState>>,
    Path(history_id): Path<i64>,
    Json(req): Json<ArchiveRequest>,
) -> Result<Json<ArchiveResponse>, ApiError> {
    let archived = state
        .rag_service
        .repository
        .toggle_conversation_archived(history_id, req.user_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("conversation {} not found", history_id)))?;

    Ok(Json(ArchiveResponse { archived }))
}
