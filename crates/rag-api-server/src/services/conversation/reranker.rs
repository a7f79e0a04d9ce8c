use anyhow::Result;
use tracing::{info, warn};

use super::manager::{LlmProvider, RetrievalChunk};
use crate::models::chat::ChatMessage;
use crate::utils::token_estimator;

/// A retrieved chunk after the LLM reranking pass.
#[derive(Debug, Clone)]
pub struct RerankedChunk {
    pub chunk: RetrievalChunk,
    /// Relevance in [0, 1]. A raw LLM score outside [0, 10], or a batch
    /// whose output can't be parsed or whose call fails outright, sets
    /// this to 0.0 and `rerank_failed = true` rather than falling back to
    /// the chunk's embedding similarity.
    pub relevance_score: f32,
    pub rerank_failed: bool,
}

#[derive(serde::Deserialize)]
struct ScoreEntry {
    chunk_id: i64,
    score: f64,
}

#[derive(serde::Deserialize)]
struct ScoreBatch {
    scores: Vec<ScoreEntry>,
}

/// Reranks retrieved chunks by asking the LLM to judge their relevance to
/// the query on a 0-10 scale, independent of the embedding similarity
/// search already used to fetch them.
pub struct Reranker {
    batch_token_budget: usize,
}

impl Reranker {
    pub fn new() -> Self {
        Self { batch_token_budget: 6_000 }
    }

    /// Score and sort chunks best-first, truncated to `top_k` (§4.7:
    /// "sorted desc by relevance and truncated to `models.reranking.top_k`
    /// (default 3)"). A chunk whose score can't be obtained or parsed, or
    /// that scores outside [0, 10], gets `relevance_score = 0.0` and
    /// `rerank_failed = true` per §4.7/§9.
    pub async fn rerank(
        &self,
        llm: &dyn LlmProvider,
        query: &str,
        chunks: Vec<RetrievalChunk>,
        top_k: usize,
    ) -> Result<Vec<RerankedChunk>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(chunks.len());
        let mut batch: Vec<RetrievalChunk> = Vec::new();
        let mut batch_tokens = 0usize;

        for chunk in chunks {
            let tokens = token_estimator::estimate_tokens(&chunk.content);
            if batch_tokens + tokens > self.batch_token_budget && !batch.is_empty() {
                out.extend(self.score_batch(llm, query, std::mem::take(&mut batch)).await);
                batch_tokens = 0;
            }
            batch_tokens += tokens;
            batch.push(chunk);
        }
        if !batch.is_empty() {
            out.extend(self.score_batch(llm, query, batch).await);
        }

        out.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap_or(std::cmp::Ordering::Equal));
        out.truncate(top_k.max(1));
        Ok(out)
    }

    async fn score_batch(&self, llm: &dyn LlmProvider, query: &str, batch: Vec<RetrievalChunk>) -> Vec<RerankedChunk> {
        let mut listing = String::new();
        for c in &batch {
            listing.push_str(&format!("--- CHUNK ID: {} ---\n{}\n\n", c.chunk_id, c.content.trim()));
        }

        let system_prompt = format!(
            "You are a relevance grader for a retrieval system.\n\
            Query: \"{}\"\n\n\
            For each chunk below, give a relevance score from 0 (irrelevant) to 10 (directly answers the query).\n\
            Respond with JSON ONLY: {{\"scores\":[{{\"chunk_id\":123,\"score\":7}}, ...]}}\n\
            Include every chunk id exactly once. No explanations.",
            query
        );

        let messages = vec![ChatMessage::system(system_prompt), ChatMessage::user(listing)];

        let response = match llm.generate_with(&messages, 800, 0.0).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Reranker LLM call failed, marking batch rerank_failed: {}", e);
                return batch
                    .into_iter()
                    .map(|chunk| RerankedChunk { chunk, relevance_score: 0.0, rerank_failed: true })
                    .collect();
            }
        };

        let parsed: Option<ScoreBatch> = extract_json_object(&response).and_then(|s| serde_json::from_str(s).ok());

        let Some(parsed) = parsed else {
            warn!("Reranker output did not parse as JSON, marking batch rerank_failed");
            return batch
                .into_iter()
                .map(|chunk| RerankedChunk { chunk, relevance_score: 0.0, rerank_failed: true })
                .collect();
        };

        let scores: std::collections::HashMap<i64, f64> =
            parsed.scores.into_iter().map(|e| (e.chunk_id, e.score)).collect();

        info!("Reranked batch of {} chunks", batch.len());

        batch
            .into_iter()
            .map(|chunk| match scores.get(&chunk.chunk_id) {
                Some(&raw) => {
                    let in_range = (0.0..=10.0).contains(&raw);
                    if in_range {
                        RerankedChunk { chunk, relevance_score: (raw / 10.0) as f32, rerank_failed: false }
                    } else {
                        // Out-of-range score: treat as rerank_failed per §9, not a clamped trust.
                        RerankedChunk { chunk, relevance_score: 0.0, rerank_failed: true }
                    }
                }
                None => RerankedChunk { chunk, relevance_score: 0.0, rerank_failed: true },
            })
            .collect()
    }
}

fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&s[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: i64, sim: f32) -> RetrievalChunk {
        RetrievalChunk {
            chunk_id: id,
            document_id: 1,
            document_title: Some("doc".to_string()),
            content: "some content".to_string(),
            similarity: sim,
        }
    }

    #[test]
    fn extract_json_object_handles_surrounding_prose() {
        let raw = "Sure, here you go:\n{\"scores\":[{\"chunk_id\":1,\"score\":9}]}\nThanks";
        let obj = extract_json_object(raw).unwrap();
        let parsed: ScoreBatch = serde_json::from_str(obj).unwrap();
        assert_eq!(parsed.scores.len(), 1);
        assert_eq!(parsed.scores[0].chunk_id, 1);
    }

    #[test]
    fn reranked_chunk_zeroes_relevance_on_fallback() {
        let c = chunk(5, 0.42);
        let reranked = RerankedChunk { chunk: c, relevance_score: 0.0, rerank_failed: true };
        assert!(reranked.rerank_failed);
        assert_eq!(reranked.relevance_score, 0.0);
    }

    struct StaticLlm(&'static str);

    #[async_trait::async_trait]
    impl LlmProvider for StaticLlm {
        async fn generate(&self, _messages: &[ChatMessage]) -> Result<String> {
            Ok(self.0.to_string())
        }
        async fn generate_with(&self, _messages: &[ChatMessage], _max_tokens: usize, _temperature: f32) -> Result<String> {
            Ok(self.0.to_string())
        }
        async fn generate_stream(
            &self,
            _messages: &[ChatMessage],
        ) -> Result<std::pin::Pin<Box<dyn futures::Stream<Item = Result<String, anyhow::Error>> + Send>>> {
            unimplemented!("not used by reranker tests")
        }
        async fn summarize_chunks(&self, _chunks: &[RetrievalChunk], _query: &str) -> Result<String> {
            unimplemented!("not used by reranker tests")
        }
        async fn generate_title(&self, _first_user_message: &str, _first_assistant_message: &str) -> Result<String> {
            unimplemented!("not used by reranker tests")
        }
    }

    #[tokio::test]
    async fn rerank_truncates_to_top_k() {
        let llm = StaticLlm(
            r#"{"scores":[{"chunk_id":1,"score":2},{"chunk_id":2,"score":9},{"chunk_id":3,"score":5}]}"#,
        );
        let reranker = Reranker::new();
        let chunks = vec![chunk(1, 0.1), chunk(2, 0.2), chunk(3, 0.3)];

        let out = reranker.rerank(&llm, "query", chunks, 2).await.unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk.chunk_id, 2);
        assert_eq!(out[1].chunk.chunk_id, 3);
        assert!(out.iter().all(|r| !r.rerank_failed));
    }

    #[tokio::test]
    async fn rerank_zeroes_out_of_range_score_instead_of_clamping() {
        let llm = StaticLlm(r#"{"scores":[{"chunk_id":1,"score":42}]}"#);
        let reranker = Reranker::new();

        let out = reranker.rerank(&llm, "query", vec![chunk(1, 0.9)], 3).await.unwrap();

        assert_eq!(out.len(), 1);
        assert!(out[0].rerank_failed);
        assert_eq!(out[0].relevance_score, 0.0);
    }

    #[tokio::test]
    async fn rerank_zeroes_score_on_unparseable_output() {
        let llm = StaticLlm("not json at all");
        let reranker = Reranker::new();

        let out = reranker.rerank(&llm, "query", vec![chunk(1, 0.9)], 3).await.unwrap();

        assert_eq!(out.len(), 1);
        assert!(out[0].rerank_failed);
        assert_eq!(out[0].relevance_score, 0.0);
    }
}
