use crate::security::DocumentAuthorization;
use crate::services::event_bus::SystemEvent;
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::{Extension, Multipart, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub document_id: Option<i32>,
    pub session_id: Option<i64>,
}

/// POST /api/upload
///
/// Creates the document record synchronously (so the caller gets an id
/// immediately) and finishes parsing/chunking/embedding/summarizing in the
/// background, publishing progress on the session's event stream.
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Extension(_doc_auth): Extension<Arc<DocumentAuthorization>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    info!("File upload request received");

    let mut user_id: Option<i32> = None;
    let mut session_id: Option<i64> = None;
    let mut file_data: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read field: {}", e)))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "user_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid user_id: {}", e)))?;
                user_id = Some(
                    text.parse()
                        .map_err(|_| ApiError::BadRequest("user_id must be integer".to_string()))?,
                );
            }
            "session_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid session_id: {}", e)))?;
                session_id = Some(
                    text.parse()
                        .map_err(|_| ApiError::BadRequest("session_id must be integer".to_string()))?,
                );
            }
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                file_data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {}", e)))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let user_id = user_id.ok_or_else(|| ApiError::BadRequest("user_id required".to_string()))?;
    let file_data = file_data.ok_or_else(|| ApiError::BadRequest("file required".to_string()))?;
    let filename = filename.ok_or_else(|| ApiError::BadRequest("filename required".to_string()))?;

    info!("Processing upload from user {}: {}", user_id, filename);

    let document_service = state.document_service.clone();

    let (document_id, file_type, file_data) = document_service
        .create_initial_document(user_id, filename.clone(), file_data)
        .await?;

    let session_id = session_id.unwrap_or_else(|| crate::services::conversation::ConversationManager::generate_session_id(user_id as i64));

    let event_bus = state.event_bus.clone();
    let filename_for_event = filename.clone();

    tokio::spawn(async move {
        event_bus.publish(
            session_id,
            SystemEvent::ProcessingStarted {
                document_id,
                filename: filename_for_event,
            },
        );

        let eb_clone = event_bus.clone();
        let on_progress = move |id, progress: f64, message: String, status_flag: String| {
            eb_clone.publish(
                session_id,
                SystemEvent::ProcessingProgress {
                    document_id: id,
                    progress: progress * 100.0,
                    message,
                    status_flag,
                },
            );
        };

        match document_service
            .process_document_background(document_id, file_type, file_data, on_progress)
            .await
        {
            Ok((_, chunks_count)) => {
                event_bus.publish(
                    session_id,
                    SystemEvent::ProcessingCompleted {
                        document_id,
                        chunks_count,
                    },
                );
            }
            Err(e) => {
                error!("Failed to process upload (doc {}): {}", document_id, e);
                event_bus.publish(
                    session_id,
                    SystemEvent::ProcessingError {
                        document_id,
                        error: e.to_string(),
                    },
                );
            }
        }
    });

    Ok(Json(UploadResponse {
        success: true,
        message: "Document accepted, processing in background".to_string(),
        document_id: Some(document_id),
        session_id: Some(session_id),
    }))
}
