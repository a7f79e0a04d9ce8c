use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Session identifiers are generated from a timestamp + user id (see
/// `ConversationManager::generate_session_id`) and carried as plain i64s
/// so they round-trip through JSON and Postgres bigint columns alike.
pub type SessionId = i64;

/// A single turn in a conversation, as sent to the LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

// ===== REQUEST MODELS =====

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: SessionId,
    pub user_id: i64,
    pub message: String,
    #[serde(default)]
    pub document_id: Option<i64>,
    #[serde(default)]
    pub document_ids: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentUpload {
    pub file_name: String,
    pub file_base64: String,
    pub file_type: String,
}

// ===== RESPONSE EVENT MODELS =====

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub user_id: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusInfo {
    pub stage: String,  // uploading, parsing, embedding, retrieving, generating
    pub message: String,
    pub progress: u8,  // 0-100
}

#[derive(Debug, Serialize)]
pub struct UploadedDocInfo {
    pub document_id: i32,
    pub file_name: String,
    pub status: String,  // success, failed
    pub chunks_created: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// One grounding citation surfaced to the client in the `sources` SSE event.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub document_id: i32,
    pub document_name: String,
    pub chunk_id: i64,
    /// Relevance score in [0, 1]. When a reranker ran, this is its clamped
    /// score; otherwise it falls back to raw retrieval similarity.
    pub relevance_score: f32,
    pub page_number: Option<i32>,
    pub preview: String,  // first 150 chars
    pub download_url: String,
    pub view_url: String,
}

#[derive(Debug, Serialize)]
pub struct MessageChunk {
    pub delta: String,  // streaming text chunk
}

/// Token usage + cost accounting surfaced in the `metadata` SSE event.
#[derive(Debug, Clone, Serialize, Default)]
pub struct TurnMetadata {
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub cost_usd: f64,
    pub cost_xaf: f64,
    pub cache_hit: bool,
    pub response_time_ms: u64,
    pub model_used: String,
}

#[derive(Debug, Serialize)]
pub struct CompletionInfo {
    pub session_id: SessionId,
    pub message_id: String,
    pub sources_count: usize,
    pub processing_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}
