use crate::database::Repository;
use crate::security::DocumentAuthorization;
use crate::services::QueryCache;
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct DeleteDocumentRequest {
    pub user_id: i32,
}

/// `DELETE /api/documents/{id}` — cascade delete (chunks, vectors, cache
/// links) per the document lifecycle: a document may only be removed
/// explicitly, and removal immediately invalidates every cached answer that
/// was grounded on it.
pub async fn delete_document_handler(
    Extension(repository): Extension<Arc<Repository>>,
    Extension(doc_auth): Extension<Arc<DocumentAuthorization>>,
    Extension(query_cache): Extension<Arc<QueryCache>>,
    Path(document_id): Path<i32>,
    Json(request): Json<DeleteDocumentRequest>,
) -> Result<StatusCode, ApiError> {
    doc_auth.require_access(request.user_id, document_id).await?;

    info!("Deleting document {} (requested by user {})", document_id, request.user_id);

    let deleted = repository
        .delete_document_cascade(document_id)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;

    if !deleted {
        return Err(ApiError::NotFound(format!("Document {} not found", document_id)));
    }

    // The repository delete already purges linked cache rows transactionally;
    // this second pass catches any entry written between that delete and now.
    if let Err(e) = query_cache.invalidate_for_document(document_id).await {
        tracing::warn!("post-delete cache invalidation failed for document {}: {}", document_id, e);
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct GetDocumentParams {
    pub user_id: i32,
}

/// `GET /api/documents/{id}` — metadata plus the first few chunks, the same
/// "what is this document about" overview the retrieval path uses when a
/// query is a meta-question rather than a content question.
pub async fn get_document_handler(
    Extension(repository): Extension<Arc<Repository>>,
    Extension(doc_auth): Extension<Arc<DocumentAuthorization>>,
    Path(document_id): Path<i32>,
    Query(params): Query<GetDocumentParams>,
) -> Result<Json<crate::database::DocumentOverview>, ApiError> {
    doc_auth.require_access(params.user_id, document_id).await?;

    let overview = repository
        .get_document_overview(document_id, 5)
        .await
        .map_err(|e| match e.downcast_ref::<sqlx::Error>() {
            Some(sqlx::Error::RowNotFound) => ApiError::NotFound(format!("document {} not found", document_id)),
            _ => ApiError::DatabaseError(e.to_string()),
        })?;

    Ok(Json(overview))
}

#[derive(Debug, Deserialize)]
pub struct RetryDocumentRequest {
    pub user_id: i32,
    /// One of EXTRACTION/CHUNKING/EMBEDDING/INDEXING; defaults to wherever
    /// the document's `processing_stage` column already points (typically
    /// the stage it failed at).
    pub from_stage: Option<String>,
}

#[derive(serde::Serialize)]
pub struct RetryDocumentResponse {
    pub document_id: i32,
    pub status: String,
}

const VALID_STAGES: [&str; 4] = ["EXTRACTION", "CHUNKING", "EMBEDDING", "INDEXING"];

/// `POST /api/documents/{id}/retry` (§5.2): resets a FAILED document back to
/// PROCESSING so the worker's reconciler sweep picks it up again, optionally
/// overriding the stage it resumes from. 409s if the document isn't
/// currently FAILED -- retry is only meaningful for a terminal failure, not
/// an in-flight pipeline.
pub async fn retry_document_handler(
    State(state): State<Arc<AppState>>,
    Extension(repository): Extension<Arc<Repository>>,
    Extension(doc_auth): Extension<Arc<DocumentAuthorization>>,
    Path(document_id): Path<i32>,
    Json(request): Json<RetryDocumentRequest>,
) -> Result<(StatusCode, Json<RetryDocumentResponse>), ApiError> {
    doc_auth.require_access(request.user_id, document_id).await?;

    let from_stage = match request.from_stage.as_deref() {
        Some(s) if VALID_STAGES.contains(&s) => Some(s),
        Some(s) => {
            return Err(ApiError::BadRequest(format!(
                "invalid from_stage '{}'; expected one of {:?}",
                s, VALID_STAGES
            )))
        }
        None => None,
    };

    let prior_status = repository
        .retry_document_processing(document_id, from_stage)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("document {} not found", document_id)))?;

    if prior_status.to_uppercase() != "FAILED" {
        return Err(ApiError::Conflict(format!(
            "document {} is {}, not FAILED; retry only applies to failed documents",
            document_id, prior_status
        )));
    }

    info!("Retrying processing for document {} (requested by user {})", document_id, request.user_id);

    if let Err(e) = repository
        .notify_document_retry(&state.settings.database.listen_channel, document_id)
        .await
    {
        tracing::warn!("failed to NOTIFY worker of retry for document {}: {}", document_id, e);
    }

    Ok((StatusCode::ACCEPTED, Json(RetryDocumentResponse { document_id, status: "PROCESSING".to_string() })))
}

#[derive(Debug, Deserialize)]
pub struct DocumentStatusParams {
    pub user_id: i32,
}

/// `GET /api/documents/{id}/status` — polls `rag_document_processing` every
/// second and pushes an SSE event whenever the stage/progress changes,
/// closing the stream once the document reaches a terminal state
/// (COMPLETED/FAILED) so clients don't have to hold the connection open
/// past that point.
pub async fn document_status_handler(
    State(state): State<Arc<AppState>>,
    Extension(doc_auth): Extension<Arc<DocumentAuthorization>>,
    Path(document_id): Path<i32>,
    Query(params): Query<DocumentStatusParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    doc_auth.require_access(params.user_id, document_id).await?;

    let repository = state.rag_service.repository.clone();
    let mut last_sent: Option<(String, f32)> = None;

    let stream = async_stream::stream! {
        loop {
            match repository.get_document_processing_status(document_id).await {
                Ok(Some(status)) => {
                    let key = (status.status.clone(), status.progress);
                    if last_sent.as_ref() != Some(&key) {
                        last_sent = Some(key);
                        let payload = serde_json::to_string(&status).unwrap_or_default();
                        yield Ok(Event::default().event("status").data(payload));

                        let terminal = matches!(status.status.to_uppercase().as_str(), "COMPLETED" | "FAILED");
                        if terminal {
                            break;
                        }
                    }
                }
                Ok(None) => {
                    yield Ok(Event::default().event("error").data("{\"message\": \"no processing record for this document\"}"));
                    break;
                }
                Err(e) => {
                    yield Ok(Event::default().event("error").data(format!("{{\"message\": \"{}\"}}", e)));
                    break;
                }
            }

            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
