use super::models::{
    DocumentMetadata, DocumentOverview, ExchangeRate, ListedDocument, QueryCacheEntry,
    SystemConfig, SystemConfigHistory,
};
use super::{DbPool, DocumentChunk, UserDocument};
use anyhow::Result;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::{FromRow, Row};
use tracing::debug;

pub struct Repository {
    pub(crate) pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Check if user has access to document
    pub async fn check_user_document_access(
        &self,
        user_id: i32,
        document_id: i32,
    ) -> Result<bool> {
        let result = sqlx::query_scalar::<_, bool>("SELECT check_user_document_access($1, $2)")
            .bind(user_id)
            .bind(document_id)
            .fetch_one(self.pool.get_pool())
            .await?;

        Ok(result)
    }

    /// Get all document IDs accessible by user
    pub async fn get_user_document_ids(&self, user_id: i32) -> Result<Vec<i32>> {
        let rows = sqlx::query_scalar::<_, i32>("SELECT document_id FROM get_user_document_ids($1)")
            .bind(user_id)
            .fetch_all(self.pool.get_pool())
            .await?;

        Ok(rows)
    }

    /// Get user's accessible documents with metadata
    pub async fn get_user_documents(&self, user_id: i32) -> Result<Vec<UserDocument>> {
        let docs = sqlx::query_as::<_, UserDocument>(
            r#"SELECT
                document_id,
                owner_user_id,
                document_title,
                created_at,
                user_id,
                permission_level
               FROM vw_user_documents
               WHERE user_id = $1
               ORDER BY created_at DESC"#,
        )
        .bind(user_id)
        .persistent(false)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(docs)
    }

    /// `GET /api/documents` (§6): filtered, paginated listing over a user's
    /// accessible documents. Every filter is optional; `status`/`category_id`
    /// narrow on the ingestion pipeline's own tables (`rag_document_processing`,
    /// `TblDocuments`) rather than `vw_user_documents`, which carries no
    /// pipeline-state columns. `file_types` matches `TblDocumentFiles`'
    /// `DocumentType` case-insensitively against any of the given extensions.
    #[allow(clippy::too_many_arguments)]
    pub async fn list_documents_filtered(
        &self,
        user_id: i32,
        status: Option<&str>,
        category_id: Option<i32>,
        file_types: Option<&[String]>,
        date_from: Option<DateTime<Utc>>,
        date_to: Option<DateTime<Utc>>,
        search: Option<&str>,
        page: i64,
        limit: i64,
    ) -> Result<(Vec<ListedDocument>, i64)> {
        let accessible_ids = self.get_user_document_ids(user_id).await?;
        if accessible_ids.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let offset = (page.max(1) - 1) * limit.max(1);

        let rows = sqlx::query_as::<_, ListedDocument>(
            r#"SELECT
                d."Id" AS document_id,
                d."DocumentTitle" AS document_title,
                d."CategoryID" AS category_id,
                f."DocumentType" AS extension,
                f."DocumentFileSize" AS file_size,
                p.status AS status,
                p.processing_stage AS processing_stage,
                p.error_message AS error_message,
                d."InsertedAt" AS created_at
               FROM "TblDocuments" d
               LEFT JOIN LATERAL (
                   SELECT "DocumentType", "DocumentFileSize"
                   FROM "TblDocumentFiles"
                   WHERE "DocumentID" = d."Id" AND "IsMainDocumentFile" = true
                   LIMIT 1
               ) f ON true
               LEFT JOIN rag_document_processing p ON p.document_id = d."Id"
               WHERE d."Id" = ANY($1)
                 AND d."IsDeleted" = false
                 AND ($2::text IS NULL OR upper(p.status) = upper($2))
                 AND ($3::int IS NULL OR d."CategoryID" = $3)
                 AND ($4::text[] IS NULL OR upper(f."DocumentType") = ANY(SELECT upper(x) FROM unnest($4::text[]) AS x))
                 AND ($5::timestamptz IS NULL OR d."InsertedAt" >= $5)
                 AND ($6::timestamptz IS NULL OR d."InsertedAt" <= $6)
                 AND ($7::text IS NULL OR d."DocumentTitle" ILIKE '%' || $7 || '%')
               ORDER BY d."InsertedAt" DESC
               LIMIT $8 OFFSET $9"#,
        )
        .bind(&accessible_ids)
        .bind(status)
        .bind(category_id)
        .bind(file_types)
        .bind(date_from)
        .bind(date_to)
        .bind(search)
        .bind(limit.max(1))
        .bind(offset)
        .fetch_all(self.pool.get_pool())
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*)
               FROM "TblDocuments" d
               LEFT JOIN LATERAL (
                   SELECT "DocumentType" FROM "TblDocumentFiles"
                   WHERE "DocumentID" = d."Id" AND "IsMainDocumentFile" = true
                   LIMIT 1
               ) f ON true
               LEFT JOIN rag_document_processing p ON p.document_id = d."Id"
               WHERE d."Id" = ANY($1)
                 AND d."IsDeleted" = false
                 AND ($2::text IS NULL OR upper(p.status) = upper($2))
                 AND ($3::int IS NULL OR d."CategoryID" = $3)
                 AND ($4::text[] IS NULL OR upper(f."DocumentType") = ANY(SELECT upper(x) FROM unnest($4::text[]) AS x))
                 AND ($5::timestamptz IS NULL OR d."InsertedAt" >= $5)
                 AND ($6::timestamptz IS NULL OR d."InsertedAt" <= $6)
                 AND ($7::text IS NULL OR d."DocumentTitle" ILIKE '%' || $7 || '%')"#,
        )
        .bind(&accessible_ids)
        .bind(status)
        .bind(category_id)
        .bind(file_types)
        .bind(date_from)
        .bind(date_to)
        .bind(search)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok((rows, total))
    }

    /// Vector search dengan user authorization
    pub async fn search_user_documents(
        &self,
        user_id: i32,
        query_embedding: Vector,
        limit: i32,
        document_id: Option<i32>,
    ) -> Result<Vec<DocumentChunk>> {
        let chunks = sqlx::query_as::<_, DocumentChunk>(
            r#"SELECT
                chunk_id,
                document_id,
                document_title,
                content,
                similarity,
                chunk_index,
                page_number
               FROM search_user_documents($1, $2, $3, $4)"#,
        )
        .bind(user_id)
        .bind(query_embedding)
        .bind(limit)
        .bind(document_id)
        .persistent(false)
        .fetch_all(self.pool.get_pool())
        .await?;

        debug!("Found {} relevant chunks for user {}", chunks.len(), user_id);

        Ok(chunks)
    }

    /// Hybrid search (vector + full-text). `alpha` weights the dense score
    /// against the lexical one: 1.0 is pure vector, 0.0 is pure full-text.
    pub async fn hybrid_search_user_documents(
        &self,
        user_id: i32,
        query_embedding: Vector,
        query_text: String,
        limit: i32,
        document_id: Option<i32>,
        alpha: f32,
    ) -> Result<Vec<DocumentChunk>> {
        #[derive(FromRow)]
        struct HybridResult {
            chunk_id: i64,
            document_id: i32,
            document_title: String,
            content: String,
            hybrid_score: f32,
            chunk_index: i32,
        }

        let results = sqlx::query_as::<_, HybridResult>(
            r#"SELECT
                chunk_id,
                document_id,
                document_title,
                content,
                hybrid_score,
                chunk_index
               FROM hybrid_search_user_documents($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(user_id)
        .bind(query_embedding)
        .bind(&query_text)
        .bind(limit)
        .bind(document_id)
        .bind(alpha)
        .persistent(false)
        .fetch_all(self.pool.get_pool())
        .await?;

        let chunks = results
            .into_iter()
            .map(|r| DocumentChunk {
                chunk_id: r.chunk_id,
                document_id: r.document_id,
                document_title: r.document_title,
                content: r.content,
                similarity: r.hybrid_score,
                chunk_index: r.chunk_index,
                page_number: None,
            })
            .collect();

        Ok(chunks)
    }

    /// Get the first chunk of a document (usually contains title/intro) -
    /// optimization for "what is this?" queries.
    pub async fn get_first_chunk(&self, document_id: i32) -> Result<Option<DocumentChunk>> {
        let chunk = sqlx::query_as::<_, DocumentChunk>(
            r#"
            SELECT
                c.id as chunk_id,
                c.document_id,
                d."DocumentTitle" as document_title,
                c.content,
                1.0 as similarity,
                c.chunk_index,
                c.page_number
            FROM rag_document_chunks c
            JOIN "TblDocuments" d ON d."Id" = c.document_id
            WHERE c.document_id = $1 AND c.chunk_index = 0
            LIMIT 1
            "#,
        )
        .bind(document_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(chunk)
    }

    /// Fetch every chunk for a set of documents, unranked (similarity pinned
    /// to 1.0) — used by the "deep scan" fallback when a caller asks about
    /// explicitly-attached documents rather than an open-ended query.
    pub async fn get_chunks_by_document_ids(&self, document_ids: &[i64]) -> Result<Vec<DocumentChunk>> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i32> = document_ids.iter().map(|&id| id as i32).collect();

        let chunks = sqlx::query_as::<_, DocumentChunk>(
            r#"
            SELECT
                c.id as chunk_id,
                c.document_id,
                d."DocumentTitle" as document_title,
                c.content,
                1.0 as similarity,
                c.chunk_index,
                c.page_number
            FROM rag_document_chunks c
            JOIN "TblDocuments" d ON d."Id" = c.document_id
            WHERE c.document_id = ANY($1)
            ORDER BY c.document_id, c.chunk_index ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(chunks)
    }

    // ============ DOCUMENT OVERVIEW / META-QUESTION METHODS ============

    /// Get document metadata for overview questions, e.g. "what is this
    /// document about?"
    pub async fn get_document_metadata(&self, document_id: i32) -> Result<DocumentMetadata> {
        #[derive(FromRow)]
        struct MetadataRow {
            document_id: i32,
            title: String,
            description: Option<String>,
            auto_summary: Option<String>,
            file_size: Option<i32>,
            total_chunks: Option<i64>,
            created_at: DateTime<Utc>,
        }

        let row = sqlx::query_as::<_, MetadataRow>(
            r#"
            SELECT
                d."Id" as document_id,
                d."DocumentTitle" as title,
                d."DocumentDesc" as description,
                d.auto_summary,
                d."FileSize" as file_size,
                COUNT(c.id) as total_chunks,
                d."InsertedAt" as created_at
            FROM "TblDocuments" d
            LEFT JOIN rag_document_chunks c ON c.document_id = d."Id"
            WHERE d."Id" = $1 AND d."IsDeleted" = false
            GROUP BY d."Id"
            "#,
        )
        .bind(document_id)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(DocumentMetadata {
            document_id: row.document_id,
            title: row.title,
            description: row.description,
            auto_summary: row.auto_summary,
            file_size: row.file_size,
            total_chunks: row.total_chunks.unwrap_or(0) as i32,
            created_at: row.created_at,
        })
    }

    /// Get first N chunks of a document (for overview generation). These are
    /// typically the intro/summary paragraphs.
    pub async fn get_document_overview_chunks(
        &self,
        document_id: i32,
        limit: i32,
    ) -> Result<Vec<DocumentChunk>> {
        let chunks = sqlx::query_as::<_, DocumentChunk>(
            r#"
            SELECT
                c.id as chunk_id,
                c.document_id,
                d."DocumentTitle" as document_title,
                c.content,
                1.0 as similarity,
                c.chunk_index,
                c.page_number
            FROM rag_document_chunks c
            JOIN "TblDocuments" d ON d."Id" = c.document_id
            WHERE c.document_id = $1
            ORDER BY c.chunk_index ASC
            LIMIT $2
            "#,
        )
        .bind(document_id)
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;

        debug!("Retrieved {} overview chunks for document {}", chunks.len(), document_id);

        Ok(chunks)
    }

    /// Get complete document overview (metadata + first chunks)
    pub async fn get_document_overview(
        &self,
        document_id: i32,
        chunk_limit: i32,
    ) -> Result<DocumentOverview> {
        let metadata = self.get_document_metadata(document_id).await?;
        let first_chunks = self.get_document_overview_chunks(document_id, chunk_limit).await?;

        Ok(DocumentOverview { metadata, first_chunks })
    }

    /// Update document auto_summary field
    pub async fn update_document_summary(&self, document_id: i32, auto_summary: String) -> Result<()> {
        sqlx::query(
            r#"UPDATE "TblDocuments"
               SET auto_summary = $1, "UpdatedAt" = NOW()
               WHERE "Id" = $2"#,
        )
        .bind(auto_summary)
        .bind(document_id)
        .execute(self.pool.get_pool())
        .await?;

        debug!("Updated auto_summary for document {}", document_id);

        Ok(())
    }

    // ============ CHAT HISTORY PERSISTENCE ============

    /// Ensure a chat session header row exists for (user_id, session_id),
    /// returning its surrogate row id. Idempotent: repeated calls for the
    /// same pair return the same row.
    pub async fn create_chat_session(&self, user_id: i64, session_id: i64) -> Result<i64> {
        let row_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO rag_chat_sessions (user_id, session_id, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id, session_id) DO UPDATE SET session_id = EXCLUDED.session_id
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(session_id)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(row_id)
    }

    /// Append one turn (user or model) to a session's message history,
    /// returning the new row's id (needed by callers that persist a
    /// Feedback referencing this message, or a cache-hit/cost snapshot).
    pub async fn save_chat_message(&self, history_id: i64, role: &str, message: &str) -> Result<i64> {
        let message_id = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO rag_chat_messages (session_row_id, role, content, created_at)
               VALUES ($1, $2, $3, NOW())
               RETURNING id"#,
        )
        .bind(history_id)
        .bind(role)
        .bind(message)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(message_id)
    }

    /// Same as [`Repository::save_chat_message`] but also records the §3
    /// Message accounting fields (tokens, cost, cache_hit, response_time,
    /// model_used, partial) produced by the Cost Accountant / Chat
    /// Coordinator for an ASSISTANT turn.
    #[allow(clippy::too_many_arguments)]
    pub async fn save_chat_message_with_metrics(
        &self,
        history_id: i64,
        role: &str,
        message: &str,
        tokens_input: i32,
        tokens_output: i32,
        cost_usd: f64,
        cost_xaf: f64,
        cache_hit: bool,
        response_time_seconds: f64,
        model_used: Option<&str>,
        partial: bool,
    ) -> Result<i64> {
        let message_id = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO rag_chat_messages
                (session_row_id, role, content, tokens_input, tokens_output,
                 cost_usd, cost_xaf, cache_hit, response_time_seconds, model_used, partial, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
               RETURNING id"#,
        )
        .bind(history_id)
        .bind(role)
        .bind(message)
        .bind(tokens_input)
        .bind(tokens_output)
        .bind(cost_usd)
        .bind(cost_xaf)
        .bind(cache_hit)
        .bind(response_time_seconds)
        .bind(model_used)
        .bind(partial)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(message_id)
    }

    /// Set a conversation's auto-generated title exactly once (never
    /// overwrites an already-titled conversation), per §4.11 step 8 /
    /// §9 open question: a failed title generation leaves the literal
    /// placeholder in place for a later background retry.
    pub async fn set_conversation_title_if_absent(&self, history_id: i64, title: &str) -> Result<()> {
        sqlx::query(
            r#"UPDATE rag_chat_sessions SET title = $2, updated_at = now()
               WHERE id = $1 AND title IS NULL"#,
        )
        .bind(history_id)
        .bind(title)
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    /// Toggle a conversation's archived flag, returning the new value.
    pub async fn toggle_conversation_archived(&self, history_id: i64, user_id: i64) -> Result<Option<bool>> {
        let row: Option<(bool,)> = sqlx::query_as(
            r#"UPDATE rag_chat_sessions SET archived = NOT archived, updated_at = now()
               WHERE id = $1 AND user_id = $2
               RETURNING archived"#,
        )
        .bind(history_id)
        .bind(user_id)
        .fetch_optional(self.pool.get_pool())
        .await?;
        Ok(row.map(|(a,)| a))
    }

    /// List a user's conversations (most recently updated first), optionally
    /// including archived ones and filtering by a title/content search term.
    pub async fn list_conversations(
        &self,
        user_id: i64,
        include_archived: bool,
        search: Option<&str>,
        page: i64,
        limit: i64,
    ) -> Result<Vec<super::models::ConversationSummary>> {
        let offset = (page.max(1) - 1) * limit.max(1);
        let rows = sqlx::query_as::<_, super::models::ConversationSummary>(
            r#"SELECT s.id AS conversation_id, s.session_id, s.title, s.archived,
                      s.created_at, s.updated_at
               FROM rag_chat_sessions s
               WHERE s.user_id = $1
                 AND ($2 OR NOT s.archived)
                 AND ($3::text IS NULL OR s.title ILIKE '%' || $3 || '%')
               ORDER BY s.updated_at DESC
               LIMIT $4 OFFSET $5"#,
        )
        .bind(user_id)
        .bind(include_archived)
        .bind(search)
        .bind(limit.max(1))
        .bind(offset)
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(rows)
    }

    /// Messages belonging to one conversation, in `created_at` order (§5:
    /// "message persistence is totally ordered by `created_at`").
    pub async fn get_conversation_messages(&self, history_id: i64) -> Result<Vec<super::models::ConversationMessage>> {
        let rows = sqlx::query_as::<_, super::models::ConversationMessage>(
            r#"SELECT id AS message_id, role, content, tokens_input, tokens_output,
                      cost_usd, cost_xaf, cache_hit, response_time_seconds, model_used,
                      partial, created_at
               FROM rag_chat_messages
               WHERE session_row_id = $1
               ORDER BY created_at ASC, id ASC"#,
        )
        .bind(history_id)
        .fetch_all(self.pool.get_pool())
        .await?;
        Ok(rows)
    }

    /// Upsert a rating for (message, user) -- unique per §3 Feedback.
    pub async fn upsert_feedback(
        &self,
        message_id: i64,
        user_id: i64,
        rating: i16,
        comment: Option<&str>,
    ) -> Result<i64> {
        let feedback_id = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO rag_message_feedback (message_id, user_id, rating, comment, created_at)
               VALUES ($1, $2, $3, $4, now())
               ON CONFLICT (message_id, user_id)
               DO UPDATE SET rating = EXCLUDED.rating, comment = EXCLUDED.comment, created_at = now()
               RETURNING feedback_id"#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(rating)
        .bind(comment)
        .fetch_one(self.pool.get_pool())
        .await?;
        Ok(feedback_id)
    }

    /// Record which documents backed a given turn, for the session's
    /// implicit-context lookup on later messages.
    pub async fn save_chat_docs(&self, history_id: i64, document_ids: &[i64]) -> Result<()> {
        if document_ids.is_empty() {
            return Ok(());
        }

        let mut transaction = self.pool.get_pool().begin().await?;
        for &doc_id in document_ids {
            sqlx::query(
                r#"INSERT INTO rag_chat_session_documents (session_row_id, document_id, created_at)
                   VALUES ($1, $2, NOW())
                   ON CONFLICT (session_row_id, document_id) DO NOTHING"#,
            )
            .bind(history_id)
            .bind(doc_id)
            .execute(&mut *transaction)
            .await?;
        }
        transaction.commit().await?;

        Ok(())
    }

    /// Documents implicitly attached to a session (most recently used
    /// first), used to carry document scope across turns without the
    /// caller re-sending document_ids on every message.
    pub async fn get_session_active_docs(&self, session_id: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT sd.document_id
            FROM rag_chat_session_documents sd
            JOIN rag_chat_sessions s ON s.id = sd.session_row_id
            WHERE s.session_id = $1
            ORDER BY sd.document_id
            "#,
        )
        .bind(session_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(ids)
    }

    /// Insert uploaded document chunks (after processing)
    pub async fn insert_document_chunks(
        &self,
        document_id: i32,
        chunks: Vec<(String, Vector)>, // (content, embedding)
    ) -> Result<()> {
        let mut transaction = self.pool.get_pool().begin().await?;

        for (index, (content, embedding)) in chunks.into_iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO rag_document_chunks
                   (document_id, chunk_index, content, char_count, embedding)
                   VALUES ($1, $2, $3, $4, $5)"#,
            )
            .bind(document_id)
            .bind(index as i32)
            .bind(&content)
            .bind(content.len() as i32)
            .bind(embedding)
            .execute(&mut *transaction)
            .await?;
        }

        transaction.commit().await?;
        debug!("Inserted chunks for document {}", document_id);

        Ok(())
    }

    /// Ensure a per-user "AI Upload" category exists, returning its id.
    /// Documents created through the chat upload flow (rather than the
    /// primary document-management surface) are filed under this category
    /// so they remain visible and attributable to their uploader.
    pub async fn ensure_ai_upload_category(&self, user_id: i32) -> Result<i32> {
        if let Some(existing) = sqlx::query_scalar::<_, i32>(
            r#"SELECT "Id" FROM "TblCategories" WHERE "Owner" = $1 AND "CategoryName" = 'AI Upload' AND "IsDeleted" = false"#,
        )
        .bind(user_id)
        .fetch_optional(self.pool.get_pool())
        .await?
        {
            return Ok(existing);
        }

        let category_id = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO "TblCategories" ("CategoryName", "Owner", "InsertedBy", "InsertedAt", "UpdatedAt", "IsActive", "IsDeleted")
            VALUES ('AI Upload', $1, $1, NOW(), NOW(), true, false)
            RETURNING "Id"
            "#,
        )
        .bind(user_id)
        .fetch_one(self.pool.get_pool())
        .await?;

        Ok(category_id)
    }

    /// Create document metadata + file records for an upload, returning the
    /// new document id.
    pub async fn create_document(
        &self,
        user_id: i32,
        filename: &str,
        file_size: i32,
        file_type: &str,
        category_id: i32,
        file_path: &str,
    ) -> Result<i32> {
        let mut transaction = self.pool.get_pool().begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO "TblDocuments"
            ("CategoryID", "DocumentTitle", "DocumentDesc", "Owner", "FileSize",
             "InsertedBy", "InsertedAt", "UpdatedAt", "IsActive", "IsDeleted")
            VALUES
            ($1, $2, $3, $4, $5, $6, NOW(), NOW(), true, false)
            RETURNING "Id"
            "#,
        )
        .bind(category_id)
        .bind(filename)
        .bind("Uploaded via RAG Chat")
        .bind(user_id)
        .bind(file_size)
        .bind(user_id)
        .fetch_one(&mut *transaction)
        .await?;

        let document_id: i32 = row.get("Id");

        sqlx::query(
            r#"
            INSERT INTO "TblDocumentFiles"
            ("DocumentID", "DocumentType", "DocumentFileName", "DocumentFileSize",
             "DocumentFilePath", "IsMainDocumentFile", "InsertedBy", "InsertedAt",
             "UpdatedAt", "IsActive", "IsDeleted")
            VALUES
            ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW(), true, false)
            "#,
        )
        .bind(document_id)
        .bind(file_type)
        .bind(filename)
        .bind(file_size)
        .bind(file_path)
        .bind(true)
        .bind(user_id)
        .execute(&mut *transaction)
        .await?;

        transaction.commit().await?;

        Ok(document_id)
    }

    /// Ensure the processing status table exists
    pub async fn ensure_processing_table(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS rag_document_processing (
                document_id INT PRIMARY KEY,
                status VARCHAR(50) NOT NULL,
                progress FLOAT NOT NULL DEFAULT 0,
                message TEXT,
                updated_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )"#,
        )
        .execute(self.pool.get_pool())
        .await?;
        Ok(())
    }

    /// Ensure the chat-history tables backing implicit session context exist.
    pub async fn ensure_chat_history_tables(&self) -> Result<()> {
        let pool = self.pool.get_pool();

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS rag_chat_sessions (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL,
                session_id BIGINT NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW(),
                UNIQUE (user_id, session_id)
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS rag_chat_messages (
                id BIGSERIAL PRIMARY KEY,
                session_row_id BIGINT NOT NULL REFERENCES rag_chat_sessions(id),
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS rag_chat_session_documents (
                session_row_id BIGINT NOT NULL REFERENCES rag_chat_sessions(id),
                document_id BIGINT NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW(),
                UNIQUE (session_row_id, document_id)
            )"#,
        )
        .execute(pool)
        .await?;

        // Conversation metadata (§3 Conversation: title, archived) and the
        // per-message accounting fields (§3 Message: tokens, cost, cache_hit,
        // response_time, model_used, partial) were not part of the original
        // implicit-session-context tables; widen both rather than introduce
        // a parallel schema.
        sqlx::query(
            r#"ALTER TABLE rag_chat_sessions
               ADD COLUMN IF NOT EXISTS title TEXT,
               ADD COLUMN IF NOT EXISTS archived BOOLEAN NOT NULL DEFAULT false,
               ADD COLUMN IF NOT EXISTS updated_at TIMESTAMPTZ NOT NULL DEFAULT now()"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"ALTER TABLE rag_chat_messages
               ADD COLUMN IF NOT EXISTS tokens_input INT NOT NULL DEFAULT 0,
               ADD COLUMN IF NOT EXISTS tokens_output INT NOT NULL DEFAULT 0,
               ADD COLUMN IF NOT EXISTS cost_usd DOUBLE PRECISION NOT NULL DEFAULT 0,
               ADD COLUMN IF NOT EXISTS cost_xaf DOUBLE PRECISION NOT NULL DEFAULT 0,
               ADD COLUMN IF NOT EXISTS cache_hit BOOLEAN NOT NULL DEFAULT false,
               ADD COLUMN IF NOT EXISTS response_time_seconds DOUBLE PRECISION NOT NULL DEFAULT 0,
               ADD COLUMN IF NOT EXISTS model_used TEXT,
               ADD COLUMN IF NOT EXISTS partial BOOLEAN NOT NULL DEFAULT false"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS rag_message_feedback (
                feedback_id BIGSERIAL PRIMARY KEY,
                message_id BIGINT NOT NULL REFERENCES rag_chat_messages(id) ON DELETE CASCADE,
                user_id BIGINT NOT NULL,
                rating SMALLINT NOT NULL CHECK (rating IN (1, -1)),
                comment TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (message_id, user_id)
            )"#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Ensure necessary indexes exist for performance optimization
    pub async fn ensure_indices(&self) -> Result<()> {
        let pool = self.pool.get_pool();

        debug!("Ensuring vector index exists...");
        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_rag_chunks_embedding
               ON rag_document_chunks
               USING ivfflat (embedding vector_cosine_ops)
               WITH (lists = 100)"#,
        )
        .execute(pool)
        .await?;

        debug!("Ensuring filtering index exists...");
        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_rag_chunks_doc_id
               ON rag_document_chunks(document_id)"#,
        )
        .execute(pool)
        .await?;

        debug!("Ensuring FTS index exists...");
        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_rag_chunks_content_fts
               ON rag_document_chunks
               USING gin(to_tsvector('english', content))"#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Update or insert document processing status
    pub async fn upsert_document_processing_status(
        &self,
        document_id: i32,
        status: &str,
        progress: f32,
        message: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO rag_document_processing
               (document_id, status, progress, message, updated_at)
               VALUES ($1, $2, $3, $4, NOW())
               ON CONFLICT (document_id)
               DO UPDATE SET
                  status = EXCLUDED.status,
                  progress = EXCLUDED.progress,
                  message = EXCLUDED.message,
                  updated_at = NOW()"#,
        )
        .bind(document_id)
        .bind(status)
        .bind(progress)
        .bind(message)
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    /// Get documents that are currently being processed for a user
    pub async fn get_user_processing_documents(
        &self,
        user_id: i32,
    ) -> Result<Vec<super::DocumentProcessingStatus>> {
        let docs = sqlx::query_as::<_, super::DocumentProcessingStatus>(
            r#"SELECT
                p.document_id,
                p.status,
                p.progress,
                p.message,
                p.updated_at
               FROM rag_document_processing p
               JOIN "TblDocuments" d ON d."Id" = p.document_id
               WHERE d."Owner" = $1 AND p.status != 'completed'
               ORDER BY p.updated_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(docs)
    }

    /// Single-document processing status, for `GET /api/documents/{id}` and
    /// `/status` polling. `None` means ingestion never ran for this document
    /// (e.g. it predates the processing table, or was never admitted).
    pub async fn get_document_processing_status(
        &self,
        document_id: i32,
    ) -> Result<Option<super::DocumentProcessingStatus>> {
        let status = sqlx::query_as::<_, super::DocumentProcessingStatus>(
            r#"SELECT document_id, status, progress, message, updated_at
               FROM rag_document_processing
               WHERE document_id = $1"#,
        )
        .bind(document_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(status)
    }

    /// §5.2 retry: resets a FAILED document back to PROCESSING at the stage
    /// it failed at (the worker's reconciler/orchestrator will pick it up
    /// from `rag_document_processing.status` on its next sweep). Returns the
    /// prior status so the caller can reject retries of non-FAILED documents
    /// with 409 Conflict.
    pub async fn retry_document_processing(
        &self,
        document_id: i32,
        from_stage: Option<&str>,
    ) -> Result<Option<String>> {
        let prior: Option<(String,)> = sqlx::query_as(
            r#"SELECT status FROM rag_document_processing WHERE document_id = $1"#,
        )
        .bind(document_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        let Some((prior_status,)) = prior else {
            return Ok(None);
        };

        if prior_status.to_uppercase() != "FAILED" {
            return Ok(Some(prior_status));
        }

        sqlx::query(
            r#"UPDATE rag_document_processing
               SET status = 'PROCESSING',
                   processing_stage = COALESCE($2, processing_stage),
                   progress = 0, message = NULL, updated_at = NOW()
               WHERE document_id = $1"#,
        )
        .bind(document_id)
        .bind(from_stage)
        .execute(self.pool.get_pool())
        .await?;

        Ok(Some(prior_status))
    }

    /// Wakes the embedding worker's `LISTEN/NOTIFY` loop immediately after a
    /// manual retry, on the same channel/payload shape its
    /// `NotificationListener` already parses, rather than leaving a retried
    /// document to the reconciler's periodic sweep alone.
    pub async fn notify_document_retry(&self, channel: &str, document_id: i32) -> Result<()> {
        let file_path: Option<String> = sqlx::query_scalar(
            r#"SELECT "DocumentFilePath" FROM "TblDocumentFiles"
               WHERE "DocumentID" = $1 AND "IsMainDocumentFile" = true
               LIMIT 1"#,
        )
        .bind(document_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        let payload = serde_json::json!({
            "operation": "RETRY",
            "document_id": document_id,
            "file_path": file_path.unwrap_or_default(),
            "timestamp": Utc::now().timestamp() as f64,
        });

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload.to_string())
            .execute(self.pool.get_pool())
            .await?;

        Ok(())
    }

    // ============ QUERY CACHE (L1 exact / L2 semantic) ============

    /// Ensure the query-cache and config tables exist.
    pub async fn ensure_cache_and_config_tables(&self) -> Result<()> {
        let pool = self.pool.get_pool();

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS rag_query_cache (
                cache_id BIGSERIAL PRIMARY KEY,
                query_hash TEXT NOT NULL UNIQUE,
                query_embedding vector(1024) NOT NULL,
                response_text TEXT NOT NULL,
                sources_json JSONB NOT NULL DEFAULT '[]',
                model_used TEXT,
                tokens_input INT NOT NULL DEFAULT 0,
                tokens_output INT NOT NULL DEFAULT 0,
                cost_usd DOUBLE PRECISION NOT NULL DEFAULT 0,
                hit_count INT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                last_accessed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                expires_at TIMESTAMPTZ NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS rag_query_cache_documents (
                cache_id BIGINT NOT NULL REFERENCES rag_query_cache(cache_id) ON DELETE CASCADE,
                document_id INT NOT NULL,
                PRIMARY KEY (cache_id, document_id)
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS rag_system_config (
                config_key TEXT PRIMARY KEY,
                config_value TEXT NOT NULL,
                description TEXT,
                updated_by TEXT,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS rag_system_config_history (
                history_id BIGSERIAL PRIMARY KEY,
                config_key TEXT NOT NULL,
                config_value TEXT NOT NULL,
                updated_by TEXT,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS rag_exchange_rates (
                currency_code TEXT NOT NULL,
                rate_to_usd DOUBLE PRECISION NOT NULL,
                source TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// L1 lookup: exact match on the normalized query hash. Expired entries
    /// are treated as a miss (lazy eviction happens on the next compaction
    /// sweep, not here).
    pub async fn find_cache_entry_by_hash(&self, query_hash: &str) -> Result<Option<QueryCacheEntry>> {
        let row = sqlx::query_as::<_, QueryCacheEntry>(
            r#"SELECT cache_id, query_hash, query_embedding, response_text, sources_json,
                      hit_count, created_at, last_accessed_at, expires_at
               FROM rag_query_cache
               WHERE query_hash = $1 AND expires_at > now()"#,
        )
        .bind(query_hash)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(row)
    }

    /// L2 candidate set: every non-expired entry, for in-process cosine
    /// comparison against the incoming query embedding.
    pub async fn list_active_cache_entries(&self) -> Result<Vec<QueryCacheEntry>> {
        let rows = sqlx::query_as::<_, QueryCacheEntry>(
            r#"SELECT cache_id, query_hash, query_embedding, response_text, sources_json,
                      hit_count, created_at, last_accessed_at, expires_at
               FROM rag_query_cache
               WHERE expires_at > now()"#,
        )
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows)
    }

    /// Bump hit_count, refresh last_accessed_at, and extend the TTL from now.
    pub async fn touch_cache_entry(&self, cache_id: i64, ttl_seconds: i64) -> Result<()> {
        sqlx::query(
            r#"UPDATE rag_query_cache
               SET hit_count = hit_count + 1,
                   last_accessed_at = now(),
                   expires_at = now() + ($2 || ' seconds')::interval
               WHERE cache_id = $1"#,
        )
        .bind(cache_id)
        .bind(ttl_seconds.to_string())
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }

    /// Which of the given document ids currently exist (used to guard cache
    /// write-back against referencing deleted documents).
    pub async fn filter_existing_document_ids(&self, document_ids: &[i32]) -> Result<Vec<i32>> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = sqlx::query_scalar::<_, i32>(
            r#"SELECT "Id" FROM "TblDocuments" WHERE "Id" = ANY($1) AND "IsDeleted" = false"#,
        )
        .bind(document_ids)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(ids)
    }

    /// Insert a new cache entry plus its document links, in one transaction.
    /// Callers must have already confirmed every id in `document_ids` exists
    /// (see `filter_existing_document_ids`) -- this is the write-time FK
    /// guard described as an Integrity error in the error taxonomy.
    pub async fn insert_cache_entry(
        &self,
        query_hash: &str,
        query_embedding: Vector,
        response_text: &str,
        sources_json: serde_json::Value,
        model_used: Option<&str>,
        tokens_input: i32,
        tokens_output: i32,
        cost_usd: f64,
        ttl_seconds: i64,
        document_ids: &[i32],
    ) -> Result<i64> {
        let mut transaction = self.pool.get_pool().begin().await?;

        let cache_id = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO rag_query_cache
               (query_hash, query_embedding, response_text, sources_json, model_used,
                tokens_input, tokens_output, cost_usd, hit_count, created_at,
                last_accessed_at, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, now(), now(),
                       now() + ($9 || ' seconds')::interval)
               ON CONFLICT (query_hash) DO UPDATE SET
                   query_embedding = EXCLUDED.query_embedding,
                   response_text = EXCLUDED.response_text,
                   sources_json = EXCLUDED.sources_json,
                   model_used = EXCLUDED.model_used,
                   tokens_input = EXCLUDED.tokens_input,
                   tokens_output = EXCLUDED.tokens_output,
                   cost_usd = EXCLUDED.cost_usd,
                   last_accessed_at = now(),
                   expires_at = EXCLUDED.expires_at
               RETURNING cache_id"#,
        )
        .bind(query_hash)
        .bind(query_embedding)
        .bind(response_text)
        .bind(sources_json)
        .bind(model_used)
        .bind(tokens_input)
        .bind(tokens_output)
        .bind(cost_usd)
        .bind(ttl_seconds.to_string())
        .fetch_one(&mut *transaction)
        .await?;

        sqlx::query("DELETE FROM rag_query_cache_documents WHERE cache_id = $1")
            .bind(cache_id)
            .execute(&mut *transaction)
            .await?;

        for &doc_id in document_ids {
            sqlx::query(
                r#"INSERT INTO rag_query_cache_documents (cache_id, document_id)
                   VALUES ($1, $2) ON CONFLICT DO NOTHING"#,
            )
            .bind(cache_id)
            .bind(doc_id)
            .execute(&mut *transaction)
            .await?;
        }

        transaction.commit().await?;

        Ok(cache_id)
    }

    /// Purge every cache entry that references `document_id`, as required on
    /// document delete or content-changing update (§4.8 invalidation).
    pub async fn invalidate_cache_for_document(&self, document_id: i32) -> Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM rag_query_cache
               WHERE cache_id IN (
                   SELECT cache_id FROM rag_query_cache_documents WHERE document_id = $1
               )"#,
        )
        .bind(document_id)
        .execute(self.pool.get_pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Drop every expired entry in one pass (periodic compaction sweep).
    pub async fn compact_expired_cache_entries(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM rag_query_cache WHERE expires_at <= now()")
            .execute(self.pool.get_pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Cascade delete a document: its chunks, every cache entry that
    /// referenced it, and finally the document itself (soft-deleted via
    /// `IsDeleted`, matching the flag every other document read already
    /// filters on). Runs in one transaction so a crash mid-delete never
    /// leaves an orphaned chunk or cache row pointing at a live document.
    pub async fn delete_document_cascade(&self, document_id: i32) -> Result<bool> {
        let mut tx = self.pool.get_pool().begin().await?;

        let exists = sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(SELECT 1 FROM "TblDocuments" WHERE "Id" = $1 AND "IsDeleted" = false)"#,
        )
        .bind(document_id)
        .fetch_one(&mut *tx)
        .await?;

        if !exists {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"DELETE FROM rag_query_cache
               WHERE cache_id IN (
                   SELECT cache_id FROM rag_query_cache_documents WHERE document_id = $1
               )"#,
        )
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM rag_document_chunks WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(r#"UPDATE "TblDocuments" SET "IsDeleted" = true WHERE "Id" = $1"#)
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    // ============ SYSTEM CONFIG (hot-reloadable tunables) ============

    /// Snapshot every configured key, for the config resolver's in-process
    /// cache refresh.
    pub async fn get_all_system_config(&self) -> Result<Vec<SystemConfig>> {
        let rows = sqlx::query_as::<_, SystemConfig>(
            r#"SELECT config_key, config_value, description, updated_by, updated_at
               FROM rag_system_config"#,
        )
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows)
    }

    pub async fn get_system_config(&self, key: &str) -> Result<Option<SystemConfig>> {
        let row = sqlx::query_as::<_, SystemConfig>(
            r#"SELECT config_key, config_value, description, updated_by, updated_at
               FROM rag_system_config WHERE config_key = $1"#,
        )
        .bind(key)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(row)
    }

    /// Write-through a config value: upsert the live row and append an
    /// audit-history row, in one transaction so the two never diverge.
    pub async fn upsert_system_config(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
        updated_by: Option<&str>,
    ) -> Result<()> {
        let mut transaction = self.pool.get_pool().begin().await?;

        sqlx::query(
            r#"INSERT INTO rag_system_config (config_key, config_value, description, updated_by, updated_at)
               VALUES ($1, $2, $3, $4, now())
               ON CONFLICT (config_key) DO UPDATE SET
                   config_value = EXCLUDED.config_value,
                   description = COALESCE(EXCLUDED.description, rag_system_config.description),
                   updated_by = EXCLUDED.updated_by,
                   updated_at = now()"#,
        )
        .bind(key)
        .bind(value)
        .bind(description)
        .bind(updated_by)
        .execute(&mut *transaction)
        .await?;

        sqlx::query(
            r#"INSERT INTO rag_system_config_history (config_key, config_value, updated_by, updated_at)
               VALUES ($1, $2, $3, now())"#,
        )
        .bind(key)
        .bind(value)
        .bind(updated_by)
        .execute(&mut *transaction)
        .await?;

        transaction.commit().await?;

        Ok(())
    }

    pub async fn get_system_config_history(&self, key: &str) -> Result<Vec<SystemConfigHistory>> {
        let rows = sqlx::query_as::<_, SystemConfigHistory>(
            r#"SELECT history_id, config_key, config_value, updated_by, updated_at
               FROM rag_system_config_history
               WHERE config_key = $1
               ORDER BY updated_at DESC"#,
        )
        .bind(key)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows)
    }

    /// Latest exchange rate row for a currency pair; callers never embed a
    /// hard-coded rate (§3 ExchangeRate invariant).
    pub async fn get_current_exchange_rate(&self, currency_code: &str) -> Result<Option<ExchangeRate>> {
        let row = sqlx::query_as::<_, ExchangeRate>(
            r#"SELECT currency_code, rate_to_usd, updated_at
               FROM rag_exchange_rates
               WHERE currency_code = $1
               ORDER BY created_at DESC
               LIMIT 1"#,
        )
        .bind(currency_code)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(row)
    }

    pub async fn insert_exchange_rate(
        &self,
        currency_code: &str,
        rate_to_usd: f64,
        source: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO rag_exchange_rates (currency_code, rate_to_usd, source, created_at)
               VALUES ($1, $2, $3, now())"#,
        )
        .bind(currency_code)
        .bind(rate_to_usd)
        .bind(source)
        .execute(self.pool.get_pool())
        .await?;

        Ok(())
    }
}
