use std::time::Duration;

/// One hop of the ingestion DAG: `VALIDATION` is folded into the processor's
/// admission check (`DocumentLoader::validate_file`) and never gets its own
/// queue, matching the four named queues the orchestrator actually runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingStage {
    Extraction,
    Chunking,
    Embedding,
    Indexing,
}

impl ProcessingStage {
    pub const ALL: [ProcessingStage; 4] = [
        ProcessingStage::Extraction,
        ProcessingStage::Chunking,
        ProcessingStage::Embedding,
        ProcessingStage::Indexing,
    ];

    /// The Postgres `rag_document_processing.processing_stage` column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStage::Extraction => "EXTRACTION",
            ProcessingStage::Chunking => "CHUNKING",
            ProcessingStage::Embedding => "EMBEDDING",
            ProcessingStage::Indexing => "INDEXING",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "CHUNKING" => ProcessingStage::Chunking,
            "EMBEDDING" => ProcessingStage::Embedding,
            "INDEXING" => ProcessingStage::Indexing,
            _ => ProcessingStage::Extraction,
        }
    }

    /// The queue this stage's tasks are dequeued from.
    pub fn queue_name(&self) -> &'static str {
        match self {
            ProcessingStage::Extraction => "processing",
            ProcessingStage::Chunking => "chunking",
            ProcessingStage::Embedding => "embedding",
            ProcessingStage::Indexing => "indexing",
        }
    }

    /// The stage that follows a successful run of this one, or `None` once
    /// indexing completes the DAG.
    pub fn next(&self) -> Option<ProcessingStage> {
        match self {
            ProcessingStage::Extraction => Some(ProcessingStage::Chunking),
            ProcessingStage::Chunking => Some(ProcessingStage::Embedding),
            ProcessingStage::Embedding => Some(ProcessingStage::Indexing),
            ProcessingStage::Indexing => None,
        }
    }
}

/// Exponential backoff for in-place stage retry: base 2s, cap 60s, capped at
/// `max_attempts` before the stage gives up and the document is failed.
pub fn backoff_delay(attempt: u32) -> Duration {
    let base_secs = 2u64;
    let cap_secs = 60u64;
    let secs = base_secs.saturating_mul(1u64 << attempt.min(5)).min(cap_secs);
    Duration::from_secs(secs)
}

pub const MAX_STAGE_ATTEMPTS: u32 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_chain_reaches_indexing() {
        let mut stage = ProcessingStage::Extraction;
        let mut hops = 0;
        while let Some(next) = stage.next() {
            stage = next;
            hops += 1;
        }
        assert_eq!(stage, ProcessingStage::Indexing);
        assert_eq!(hops, 3);
    }

    #[test]
    fn backoff_is_capped_at_60s() {
        assert_eq!(backoff_delay(0), Duration::from_secs(2));
        assert_eq!(backoff_delay(1), Duration::from_secs(4));
        assert_eq!(backoff_delay(10), Duration::from_secs(60));
    }
}
