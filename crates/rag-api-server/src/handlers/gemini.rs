use crate::services::gemini::GeminiService;
use crate::services::gemini_document::GeminiDocumentService;
use crate::services::event_bus::SystemEvent;
use crate::state::AppState;
use crate::utils::error::ApiError;
use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(rename = "documentId")]
    pub document_id: i32,
    #[serde(rename = "documentName")]
    pub document_name: String,
}

pub async fn upload_handler_gemini(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    info!("(Gemini) File upload request received");
    
    let mut user_id: Option<i32> = None;
    let mut session_id: Option<i64> = None;
    let mut file_data: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    
    // Parse multipart form
    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::BadRequest(format!("Failed to read field: {}", e)))? {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "user_id" => {
                let text = field.text().await.map_err(|e| ApiError::BadRequest(format!("Invalid user_id: {}", e)))?;
                user_id = Some(text.parse().map_err(|_| ApiError::BadRequest("user_id must be integer".to_string()))?);
            }
            "session_id" => {
                let text = field.text().await.map_err(|e| ApiError::BadRequest(format!("Invalid session_id: {}", e)))?;
                session_id = Some(text.parse().map_err(|_| ApiError::BadRequest("session_id must be integer".to_string()))?);
            }
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                file_data = Some(field.bytes().await.map_err(|e| ApiError::BadRequest(format!("Failed to read file: {}", e)))?.to_vec());
            }
            _ => {}
        }
    }
    
    let user_id = user_id.ok_or_else(|| ApiError::BadRequest("user_id required".to_string()))?;
    let session_id = session_id.ok_or_else(|| ApiError::BadRequest("session_id required".to_string()))?;
    let file_data = file_data.ok_or_else(|| ApiError::BadRequest("file required".to_string()))?;
    let filename = filename.ok_or_else(|| ApiError::BadRequest("filename required".to_string()))?;
    
    info!("Starting Gemini background processing for user {} (session {}): {}", user_id, session_id, filename);

    // Initialize Services
    let repository = Arc::new(crate::database::Repository::new(state.db_pool.clone()));
    let limiters = state.limiters.clone(); // Re-use global limiters
    
    // Check if Gemini Config exists (SAFETY CHECK)
    let gemini_config = state.settings.gemini.clone()
        .ok_or_else(|| ApiError::InternalError("Gemini handlers called but Gemini config is missing!".to_string()))?;

    let gemini_service = Arc::new(GeminiService::new(gemini_config, limiters));
    
    let doc_service = GeminiDocumentService::new(
        repository.clone(),
        gemini_service,
        state.settings.rag.chunk_size,
        (state.settings.rag.chunk_size as f32 * state.settings.rag.chunk_overlap_percentage) as usize,
        state.settings.rag.document_path.clone(),
    );

    // Record must exist before we return the id to the caller; embedding runs in the background.
    // Clone for background
    let event_bus = state.event_bus.clone();
    let filename_clone = filename.clone();
    
    // We need to initialize doc_service inside the handler scope to call create_initial
    // Then move it (or a clone) to the task.
    let doc_service = Arc::new(doc_service);
    
    let (doc_id, _total_size) = doc_service.create_initial_document(user_id, &filename, &file_data).await?;
    
    // 2. Spawn Background
    let doc_service_bg = doc_service.clone();
    let file_data_bg = file_data.clone(); // Clone data for bg task
    
    tokio::spawn(async move {
        // Event: Started
        event_bus.publish(session_id, SystemEvent::ProcessingStarted { 
            document_id: doc_id,
            filename: filename_clone,
        });

        // Callback for REAL progress
        let eb_clone = event_bus.clone();
        let on_progress = move |_id, progress, msg, status| {
            eb_clone.publish(session_id, SystemEvent::ProcessingProgress { 
                document_id: doc_id, 
                progress: progress * 100.0, // Scale 0.0-1.0 to 0-100
                message: msg, 
                status_flag: status 
            });
        };
        
        match doc_service_bg.process_document_background(doc_id, &file_data_bg, on_progress).await {
             Ok((_, count)) => {
                 event_bus.publish(session_id, SystemEvent::ProcessingCompleted { 
                    document_id: doc_id, 
                    chunks_count: count 
                });
             }
             Err(e) => {
                 error!("Gemini processing failed: {}", e);
                 event_bus.publish(session_id, SystemEvent::ProcessingCompleted {
                    document_id: doc_id,
                    chunks_count: 0
                });
             }
        }
    });

    Ok(Json(UploadResponse {
        document_id: doc_id,
        document_name: filename,
    }))
}
