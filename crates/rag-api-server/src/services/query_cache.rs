//! Two-level query/response cache (§4.8): an exact-hash L1 lookup backed by
//! an L2 semantic-similarity fallback, both persisted in `rag_query_cache`.
//!
//! This is distinct from [`crate::services::conversation::ConversationCache`],
//! which holds live, ephemeral `ConversationState` for an open chat session.
//! `QueryCache` is relationally persisted and keyed by normalized query
//! content; the two are never conflated.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::database::Repository;
use crate::database::models::QueryCacheEntry;
use crate::utils::cosine_similarity;

/// A cached answer ready to be replayed to the client, independent of
/// whether it was served from L1 or L2.
#[derive(Debug, Clone)]
pub struct CachedAnswer {
    pub cache_id: i64,
    pub response_text: String,
    pub sources_json: serde_json::Value,
    pub hit_count: i32,
    pub created_at: DateTime<Utc>,
}

/// One grounding source recorded alongside a cached answer, mirroring the
/// wire `sources` SSE event shape but persisted for later cache replay.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CachedSource {
    pub document_id: i32,
    pub chunk_id: i64,
    pub page: Option<i32>,
    pub relevance_score: f32,
    pub excerpt: String,
}

/// Running counters for dashboards; tokens/cost saved are computed against
/// the tariffs active at hit time by the caller, not stored here.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub l1_hits: AtomicU64,
    pub l2_hits: AtomicU64,
    pub misses: AtomicU64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
}

/// Normalize a query string the way both the hash key and the embedding
/// pipeline expect it: Unicode NFKC, lower-cased, whitespace collapsed.
pub fn normalize_query(query: &str) -> String {
    let nfkc: String = query.nfkc().collect();
    let lowered = nfkc.to_lowercase();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 of the normalized query, hex-encoded. This is the L1 key.
pub fn hash_query(query: &str) -> String {
    let normalized = normalize_query(query);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct QueryCache {
    repository: Arc<Repository>,
    similarity_threshold: f32,
    ttl_seconds: i64,
    stats: CacheStats,
}

impl QueryCache {
    pub fn new(repository: Arc<Repository>, similarity_threshold: f32, ttl_seconds: i64) -> Self {
        Self { repository, similarity_threshold, ttl_seconds, stats: CacheStats::default() }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// L1: exact match on the normalized query hash. On hit, bumps
    /// `hit_count` and extends the TTL from now.
    pub async fn lookup_l1(&self, query: &str) -> Result<Option<CachedAnswer>> {
        let hash = hash_query(query);
        let Some(entry) = self.repository.find_cache_entry_by_hash(&hash).await? else {
            return Ok(None);
        };

        self.repository.touch_cache_entry(entry.cache_id, self.ttl_seconds).await?;
        self.stats.l1_hits.fetch_add(1, Ordering::Relaxed);

        Ok(Some(entry_to_answer(entry)))
    }

    /// L2: scan every non-expired entry for cosine similarity against
    /// `query_embedding` at or above the configured threshold. Ties
    /// (multiple entries at the same similarity) prefer the most recently
    /// accessed entry. The embedding is expected to already be L2-normalized
    /// by the caller (§9 open-question resolution: plain dot product over
    /// normalized vectors).
    pub async fn lookup_l2(&self, query_embedding: &[f32]) -> Result<Option<CachedAnswer>> {
        let candidates = self.repository.list_active_cache_entries().await?;

        let mut best: Option<(f32, QueryCacheEntry)> = None;
        for entry in candidates {
            let stored: Vec<f32> = entry.query_embedding.to_vec();
            let sim = match cosine_similarity(&stored, query_embedding) {
                Ok(s) => s,
                Err(_) => continue,
            };
            if sim < self.similarity_threshold {
                continue;
            }
            match &best {
                None => best = Some((sim, entry)),
                Some((best_sim, best_entry)) => {
                    if sim > *best_sim
                        || (sim == *best_sim && entry.last_accessed_at > best_entry.last_accessed_at)
                    {
                        best = Some((sim, entry));
                    }
                }
            }
        }

        let Some((_, entry)) = best else {
            return Ok(None);
        };

        self.repository.touch_cache_entry(entry.cache_id, self.ttl_seconds).await?;
        self.stats.l2_hits.fetch_add(1, Ordering::Relaxed);

        Ok(Some(entry_to_answer(entry)))
    }

    pub fn record_miss(&self) {
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Write-back guarded by referential integrity (§4.8: "Only entries
    /// whose source document_ids are all currently present ... are
    /// written"; §8: "every document_id ∈ w.sources exists ... at commit").
    /// If even one claimed source document no longer exists, the entire
    /// write is dropped -- an Integrity error per §7, logged here rather
    /// than raised to the user -- instead of persisting a `sources` list
    /// that references a missing document.
    pub async fn write_back(
        &self,
        query: &str,
        query_embedding: Vec<f32>,
        response_text: &str,
        sources: &[CachedSource],
        model_used: Option<&str>,
        tokens_input: i32,
        tokens_output: i32,
        cost_usd: f64,
    ) -> Result<Option<i64>> {
        let hash = hash_query(query);
        let document_ids: Vec<i32> = {
            let mut ids: Vec<i32> = sources.iter().map(|s| s.document_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };

        let existing_ids = self.repository.filter_existing_document_ids(&document_ids).await?;
        if document_ids.iter().any(|id| !existing_ids.contains(id)) {
            tracing::warn!(
                "query cache write-back dropped: {} of {} source documents no longer exist",
                document_ids.len() - existing_ids.len(),
                document_ids.len()
            );
            return Ok(None);
        }

        let sources_json = serde_json::to_value(sources)?;
        let cache_id = self
            .repository
            .insert_cache_entry(
                &hash,
                Vector::from(query_embedding),
                response_text,
                sources_json,
                model_used,
                tokens_input,
                tokens_output,
                cost_usd,
                self.ttl_seconds,
                &existing_ids,
            )
            .await?;

        Ok(Some(cache_id))
    }

    /// Cascade: purge every cache entry that references a deleted/updated
    /// document.
    pub async fn invalidate_for_document(&self, document_id: i32) -> Result<u64> {
        self.repository.invalidate_cache_for_document(document_id).await
    }

    /// Periodic compaction: drop rows whose TTL has lapsed. Expired rows are
    /// already invisible to lookups; this just reclaims storage.
    pub async fn compact_expired(&self) -> Result<u64> {
        self.repository.compact_expired_cache_entries().await
    }
}

fn entry_to_answer(entry: QueryCacheEntry) -> CachedAnswer {
    CachedAnswer {
        cache_id: entry.cache_id,
        response_text: entry.response_text,
        sources_json: entry.sources_json,
        hit_count: entry.hit_count + 1,
        created_at: entry.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(normalize_query("  What   IS BEAC?  "), "what is beac?");
    }

    #[test]
    fn normalizes_nfkc_width_variants() {
        // Fullwidth 'A' (U+FF21) NFKC-normalizes to ASCII 'a' after lowercasing.
        let fullwidth = "\u{FF21}bc";
        assert_eq!(normalize_query(fullwidth), "abc");
    }

    #[test]
    fn hash_is_stable_across_equivalent_queries() {
        let a = hash_query("What is BEAC?");
        let b = hash_query("  what is beac?  ");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_differs_for_different_queries() {
        assert_ne!(hash_query("What is BEAC?"), hash_query("Define BEAC."));
    }
}
