use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserDocument {
    pub document_id: i32,
    pub owner_user_id: i32,
    pub document_title: String,
    pub created_at: DateTime<Utc>,
    pub user_id: i32,
    pub permission_level: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DocumentChunk {
    pub chunk_id: i64,
    pub document_id: i32,
    pub document_title: String,
    pub content: String,
    pub similarity: f32,
    pub chunk_index: i32,
    pub page_number: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: i64,
    pub document_id: i32,
    pub document_title: String,
    pub content: String,
    pub score: f32,
    pub chunk_index: i32,
    pub page_number: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "user" atau "assistant"
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub session_id: String,
    pub user_id: i32,
    pub document_id: Option<i32>,
    pub messages: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
}
/// One row of `GET /api/documents`'s filtered/paginated listing -- document
/// identity plus the ingestion-pipeline status fields (§3 Document) a
/// client needs to render a library view without a second round trip.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ListedDocument {
    pub document_id: i32,
    pub document_title: String,
    pub category_id: Option<i32>,
    pub extension: Option<String>,
    pub file_size: Option<i32>,
    pub status: Option<String>,
    pub processing_stage: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DocumentProcessingStatus {
    pub document_id: i32,
    pub status: String,
    pub progress: f32,
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Summary fields used to answer "what is this document about?" style
/// meta-questions without a vector search.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentMetadata {
    pub document_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub auto_summary: Option<String>,
    pub file_size: Option<i32>,
    pub total_chunks: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentOverview {
    pub metadata: DocumentMetadata,
    pub first_chunks: Vec<DocumentChunk>,
}

/// L1/L2 query-response cache row. L1 matches on `query_hash` (SHA-256 of
/// the normalized query text); L2 matches on cosine similarity between
/// `query_embedding` and an incoming query's embedding when no exact hash
/// hit is found. Both levels share this table so a single TTL/eviction
/// policy governs them.
#[derive(Debug, Clone, FromRow)]
pub struct QueryCacheEntry {
    pub cache_id: i64,
    pub query_hash: String,
    pub query_embedding: pgvector::Vector,
    pub response_text: String,
    pub sources_json: serde_json::Value,
    pub hit_count: i32,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Many-to-many join recording which source documents backed a cached
/// answer, so invalidation can cascade when any of them changes.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CacheDocumentMap {
    pub cache_id: i64,
    pub document_id: i32,
}

/// One embedding or generation call's token/cost accounting, attributed to
/// a (model, operation) pair for later aggregation.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TokenUsage {
    pub usage_id: i64,
    pub document_id: Option<i32>,
    pub session_id: Option<i64>,
    pub model: String,
    pub operation: String,
    pub tokens_input: i32,
    pub tokens_output: i32,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

/// A single tunable resolved at runtime instead of compiled in: tariffs,
/// retrieval knobs, cache TTLs. Every write appends a row to
/// `rag_system_config_history` via the same transaction so old values are
/// never lost.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SystemConfig {
    pub config_key: String,
    pub config_value: String,
    pub description: Option<String>,
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SystemConfigHistory {
    pub history_id: i64,
    pub config_key: String,
    pub config_value: String,
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One row of `GET /api/v1/chat/conversations` (§6): a Conversation's
/// identity, auto-generated title (null until the first exchange
/// completes, per §9), and archive state.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: i64,
    pub session_id: i64,
    pub title: Option<String>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of `GET /api/v1/chat/conversations/{id}` (§3 Message).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ConversationMessage {
    pub message_id: i64,
    pub role: String,
    pub content: String,
    pub tokens_input: i32,
    pub tokens_output: i32,
    pub cost_usd: f64,
    pub cost_xaf: f64,
    pub cache_hit: bool,
    pub response_time_seconds: f64,
    pub model_used: Option<String>,
    pub partial: bool,
    pub created_at: DateTime<Utc>,
}

/// A rating on a Message, unique per (message, user) (§3 Feedback).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Feedback {
    pub feedback_id: i64,
    pub message_id: i64,
    pub user_id: i64,
    pub rating: i16,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Current USD->XAF (or other currency) exchange rate, resolved through
/// the same config mechanism rather than hardcoded.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExchangeRate {
    pub currency_code: String,
    pub rate_to_usd: f64,
    pub updated_at: DateTime<Utc>,
}
