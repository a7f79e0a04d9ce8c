use super::{DbPool, DocumentChunk, DocumentFile, DocumentLease, IngestionLog, IngestionStatus, StalledDocument};
use anyhow::Result;

use sqlx::Row;
use tracing::debug;

pub struct Repository {
    pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
    
    // ==================== Document Files ====================
    
    pub async fn get_document_file(&self, document_id: i32) -> Result<Option<DocumentFile>> {
        let result = sqlx::query_as::<_, DocumentFile>(
            r#"SELECT "DocumentID", "DocumentFilePath" 
               FROM "TblDocumentFiles" 
               WHERE "DocumentID" = $1"#
        )
        .bind(document_id)
        .fetch_optional(self.pool.get_pool())
        .await?;
        
        Ok(result)
    }
    
    pub async fn get_all_document_files(&self) -> Result<Vec<DocumentFile>> {
        let results = sqlx::query_as::<_, DocumentFile>(
            r#"SELECT "DocumentID", "DocumentFilePath" 
               FROM "TblDocumentFiles"
               ORDER BY "DocumentID""#
        )
        .fetch_all(self.pool.get_pool())
        .await?;
        
        Ok(results)
    }
    
    // ==================== Chunks ====================
    
    pub async fn insert_chunks(&self, chunks: Vec<DocumentChunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        
        let chunk_count = chunks.len();
        let mut transaction = self.pool.get_pool().begin().await?;
        
        for chunk in chunks {
            sqlx::query(
                r#"INSERT INTO rag_document_chunks 
                   (document_id, tenant_id, chunk_index, content, char_count, 
                    token_count, embedding, page_number, section, tags)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                   ON CONFLICT (document_id, chunk_index) 
                   DO UPDATE SET 
                       content = EXCLUDED.content,
                       char_count = EXCLUDED.char_count,
                       token_count = EXCLUDED.token_count,
                       embedding = EXCLUDED.embedding,
                       page_number = EXCLUDED.page_number,
                       section = EXCLUDED.section,
                       tags = EXCLUDED.tags,
                       updated_at = now()"#
            )
            .bind(chunk.document_id)
            .bind(chunk.tenant_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(chunk.char_count)
            .bind(chunk.token_count)
            .bind(chunk.embedding)
            .bind(chunk.page_number)
            .bind(chunk.section)
            .bind(chunk.tags)
            .execute(&mut *transaction)
            .await?;
        }
        
        transaction.commit().await?;
        debug!("Inserted {} chunks", chunk_count);
        
        Ok(())
    }
    
    pub async fn delete_chunks_by_document(&self, document_id: i32) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM rag_document_chunks WHERE document_id = $1"
        )
        .bind(document_id)
        .execute(self.pool.get_pool())
        .await?;
        
        Ok(result.rows_affected())
    }
    
    pub async fn count_chunks_by_document(&self, document_id: i32) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM rag_document_chunks WHERE document_id = $1"
        )
        .bind(document_id)
        .fetch_one(self.pool.get_pool())
        .await?;
        
        Ok(row.get("count"))
    }
    
    // ==================== Ingestion Log ====================
    
    pub async fn upsert_ingestion_log(&self, log: &IngestionLog) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO rag_ingestion_log 
               (document_id, file_path, file_size, file_type, 
                embedding_model, chunk_size, chunk_overlap, status,
                total_chunks, processed_chunks, last_error, retry_count,
                started_at, processed_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
               ON CONFLICT (document_id) 
               DO UPDATE SET 
                       file_path = EXCLUDED.file_path,
                   file_size = EXCLUDED.file_size,
                   file_type = EXCLUDED.file_type,
                   embedding_model = EXCLUDED.embedding_model,
                   chunk_size = EXCLUDED.chunk_size,
                   chunk_overlap = EXCLUDED.chunk_overlap,
                   status = EXCLUDED.status,
                   total_chunks = EXCLUDED.total_chunks,
                   processed_chunks = EXCLUDED.processed_chunks,
                   last_error = EXCLUDED.last_error,
                   retry_count = EXCLUDED.retry_count,
                   started_at = COALESCE(EXCLUDED.started_at, rag_ingestion_log.started_at),
                   processed_at = EXCLUDED.processed_at,
                   updated_at = now()"#
        )
        .bind(log.document_id)
        .bind(&log.file_path)
        .bind(log.file_size)
        .bind(&log.file_type)
        .bind(&log.embedding_model)
        .bind(log.chunk_size)
        .bind(log.chunk_overlap)
        .bind(&log.status)
        .bind(log.total_chunks)
        .bind(log.processed_chunks)
        .bind(&log.last_error)
        .bind(log.retry_count)
        .bind(log.started_at)
        .bind(log.processed_at)
        .execute(self.pool.get_pool())
        .await?;
        
        Ok(())
    }
    
    pub async fn get_ingestion_log(&self, document_id: i32) -> Result<Option<IngestionLog>> {
        let result = sqlx::query_as::<_, IngestionLog>(
            "SELECT * FROM rag_ingestion_log WHERE document_id = $1"
        )
        .bind(document_id)
        .fetch_optional(self.pool.get_pool())
        .await?;
        
        Ok(result)
    }
    
    pub async fn update_ingestion_status(
        &self,
        document_id: i32,
        status: IngestionStatus,
        error: Option<String>
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE rag_ingestion_log 
               SET status = $2, 
                   last_error = $3,
                   processed_at = CASE WHEN $2 IN ('completed', 'failed') THEN now() ELSE processed_at END,
                   updated_at = now()
               WHERE document_id = $1"#
        )
        .bind(document_id)
        .bind(status.to_string())
        .bind(error)
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    // ==================== Pipeline Orchestrator ====================

    /// Idempotent schema bootstrap for stage tracking and lease-based
    /// reconciliation. `rag_document_processing` already exists (created by
    /// the API server's `ensure_processing_table`) -- this only widens it.
    pub async fn ensure_orchestrator_tables(&self) -> Result<()> {
        let pool = self.pool.get_pool();

        sqlx::query(
            r#"ALTER TABLE rag_document_processing
               ADD COLUMN IF NOT EXISTS processing_stage VARCHAR(50) NOT NULL DEFAULT 'EXTRACTION',
               ADD COLUMN IF NOT EXISTS retry_count INT NOT NULL DEFAULT 0,
               ADD COLUMN IF NOT EXISTS error_message TEXT"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS rag_document_leases (
                document_id INT PRIMARY KEY,
                worker_id VARCHAR(64) NOT NULL,
                acquired_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT now(),
                expires_at TIMESTAMP WITH TIME ZONE NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Write the current `{status, stage}` before the next queue handoff is
    /// enqueued ("write-then-enqueue"): if the process crashes between this
    /// call and the enqueue, the reconciler finds the document parked here.
    pub async fn set_document_stage(
        &self,
        document_id: i32,
        status: IngestionStatus,
        stage: &str,
        progress: f32,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO rag_document_processing (document_id, status, processing_stage, progress, updated_at)
               VALUES ($1, $2, $3, $4, now())
               ON CONFLICT (document_id) DO UPDATE SET
                   status = EXCLUDED.status,
                   processing_stage = EXCLUDED.processing_stage,
                   progress = EXCLUDED.progress,
                   updated_at = now()"#,
        )
        .bind(document_id)
        .bind(status.to_string())
        .bind(stage)
        .bind(progress)
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    pub async fn mark_document_failed(&self, document_id: i32, error_message: &str) -> Result<()> {
        sqlx::query(
            r#"UPDATE rag_document_processing
               SET status = $2, error_message = $3, updated_at = now()
               WHERE document_id = $1"#,
        )
        .bind(document_id)
        .bind(IngestionStatus::Failed.to_string())
        .bind(error_message)
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    /// Atomically bump `retry_count` and return the new value, so the
    /// caller's backoff decision is based on a value no concurrent attempt
    /// could have already consumed.
    pub async fn increment_retry_count(&self, document_id: i32) -> Result<i32> {
        let count = sqlx::query_scalar::<_, i32>(
            r#"UPDATE rag_document_processing
               SET retry_count = retry_count + 1, updated_at = now()
               WHERE document_id = $1
               RETURNING retry_count"#,
        )
        .bind(document_id)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(count)
    }

    pub async fn reset_retry_count(&self, document_id: i32) -> Result<()> {
        sqlx::query("UPDATE rag_document_processing SET retry_count = 0 WHERE document_id = $1")
            .bind(document_id)
            .execute(self.pool.get_pool())
            .await?;

        Ok(())
    }

    /// Acquire (or steal an expired) lease for a document. Returns `false`
    /// without blocking if another worker currently holds a live lease.
    pub async fn acquire_lease(&self, document_id: i32, worker_id: &str, ttl_seconds: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"INSERT INTO rag_document_leases (document_id, worker_id, acquired_at, expires_at)
               VALUES ($1, $2, now(), now() + ($3 || ' seconds')::interval)
               ON CONFLICT (document_id) DO UPDATE SET
                   worker_id = EXCLUDED.worker_id,
                   acquired_at = now(),
                   expires_at = now() + ($3 || ' seconds')::interval
               WHERE rag_document_leases.expires_at <= now()"#,
        )
        .bind(document_id)
        .bind(worker_id)
        .bind(ttl_seconds.to_string())
        .execute(self.pool.get_pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn renew_lease(&self, document_id: i32, worker_id: &str, ttl_seconds: i64) -> Result<()> {
        sqlx::query(
            r#"UPDATE rag_document_leases
               SET expires_at = now() + ($3 || ' seconds')::interval
               WHERE document_id = $1 AND worker_id = $2"#,
        )
        .bind(document_id)
        .bind(worker_id)
        .bind(ttl_seconds.to_string())
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    pub async fn release_lease(&self, document_id: i32, worker_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM rag_document_leases WHERE document_id = $1 AND worker_id = $2")
            .bind(document_id)
            .bind(worker_id)
            .execute(self.pool.get_pool())
            .await?;

        Ok(())
    }

    #[allow(dead_code)]
    pub async fn get_lease(&self, document_id: i32) -> Result<Option<DocumentLease>> {
        let lease = sqlx::query_as::<_, DocumentLease>(
            "SELECT document_id, worker_id, acquired_at, expires_at FROM rag_document_leases WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(lease)
    }

    /// Documents stuck in PROCESSING whose lease has lapsed (or never
    /// existed) and whose status row hasn't moved in `stale_seconds` -- the
    /// reconciler's periodic requeue candidate list.
    pub async fn get_stalled_documents(&self, stale_seconds: i64) -> Result<Vec<StalledDocument>> {
        let rows = sqlx::query_as::<_, StalledDocument>(
            r#"SELECT p.document_id, p.processing_stage, p.retry_count
               FROM rag_document_processing p
               LEFT JOIN rag_document_leases l ON l.document_id = p.document_id
               WHERE p.status = 'processing'
                 AND p.updated_at < now() - ($1 || ' seconds')::interval
                 AND (l.document_id IS NULL OR l.expires_at <= now())"#,
        )
        .bind(stale_seconds.to_string())
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows)
    }
}
