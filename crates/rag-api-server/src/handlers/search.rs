use crate::database::{ListedDocument, Repository};
use crate::security::DocumentAuthorization;
use crate::services::EmbeddingService;
use crate::utils::error::ApiError;
use axum::{
    extract::{Extension, Query},
    Json,
};
use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub user_id: i32,
    pub query: String,
    pub document_id: Option<i32>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub document_id: i32,
    pub document_title: String,
    pub chunk_id: i64,
    pub content: String,
    pub similarity: f32,
    pub page_number: Option<i32>,
}

pub async fn search_handler(
    Extension(embedding_service): Extension<Arc<EmbeddingService>>,
    Extension(repository): Extension<Arc<Repository>>,
    Extension(doc_auth): Extension<Arc<DocumentAuthorization>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    info!("Search request from user {}: {}", request.user_id, request.query);
    
    // Validate document access jika specified
    if let Some(doc_id) = request.document_id {
        doc_auth.require_access(request.user_id, doc_id).await?;
    }
    
    // Generate query embedding
    let query_embedding = embedding_service.embed(&request.query).await?;
    let vector = Vector::from(query_embedding);
    
    // Search
    let limit = request.limit.unwrap_or(10).min(50) as i32;
    let chunks = repository
        .search_user_documents(request.user_id, vector, limit, request.document_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
    
    // Convert to response
    let results: Vec<SearchResult> = chunks
        .into_iter()
        .map(|chunk| SearchResult {
            document_id: chunk.document_id,
            document_title: chunk.document_title,
            chunk_id: chunk.chunk_id,
            content: chunk.content,
            similarity: chunk.similarity,
            page_number: chunk.page_number,
        })
        .collect();
    
    let total = results.len();
    
    Ok(Json(SearchResponse { results, total }))
}

#[derive(Debug, Serialize)]
pub struct DocumentInfo {
    pub document_id: i32,
    pub title: String,
    pub owner_user_id: i32,
    pub permission_level: String,
    pub created_at: String,
}

/// `GET /api/documents?status&category_id&file_types&date_from&date_to&search&page&limit`
/// (§6). `file_types` is a comma-separated list (`"pdf,docx"`); everything
/// else is a single scalar. `page` is 1-based; `limit` defaults to 20 and is
/// capped at 100 to keep a single page cheap regardless of caller input.
#[derive(Debug, Deserialize)]
pub struct ListDocumentsParams {
    pub user_id: i32,
    pub status: Option<String>,
    pub category_id: Option<i32>,
    pub file_types: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListDocumentsResponse {
    pub documents: Vec<ListedDocument>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

pub async fn list_documents_handler(
    Extension(repository): Extension<Arc<Repository>>,
    Query(params): Query<ListDocumentsParams>,
) -> Result<Json<ListDocumentsResponse>, ApiError> {
    info!("List documents request from user {}", params.user_id);

    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let file_types: Option<Vec<String>> = params
        .file_types
        .as_deref()
        .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .filter(|v: &Vec<String>| !v.is_empty());

    let (docs, total) = repository
        .list_documents_filtered(
            params.user_id,
            params.status.as_deref(),
            params.category_id,
            file_types.as_deref(),
            params.date_from,
            params.date_to,
            params.search.as_deref(),
            page,
            limit,
        )
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    Ok(Json(ListDocumentsResponse { documents: docs, total, page, limit }))
}
