//! Four-queue pipeline orchestrator: `processing` (extraction admission),
//! `chunking`, `embedding`, `indexing`. Each queue is the teacher's own
//! `TaskQueue` (priority `VecDeque` behind a `Mutex`, deduped by document
//! id) drained by its own `tokio::spawn`ed loop, generalized from the
//! single-queue shape to one instance per stage.
//!
//! Stage transitions are committed to `rag_document_processing` before the
//! next queue's task is pushed ("write-then-enqueue"); a periodic
//! reconciler sweep requeues documents whose lease lapsed mid-stage.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::database::{IngestionStatus, Repository};
use crate::document::chunker::Chunk;

use super::processor::DocumentProcessor;
use super::queue::{Task, TaskPriority, TaskQueue};
use super::stage::{backoff_delay, ProcessingStage, MAX_STAGE_ATTEMPTS};

/// In-process intermediate state carried between stage hops for one
/// document's run. Not persisted: a crash between stages loses this, and
/// the reconciler's requeue simply restarts from the stage the relational
/// store last recorded, re-extracting or re-chunking as needed (both are
/// idempotent per the retry contract in §4.5).
#[derive(Default)]
struct DocumentWork {
    extracted_text: Option<String>,
    chunks: Option<Vec<Chunk>>,
    embeddings: Option<Vec<Vec<f32>>>,
}

pub struct Orchestrator {
    worker_id: String,
    settings: Settings,
    repository: Arc<Repository>,
    processor: Arc<DocumentProcessor>,
    queues: HashMap<ProcessingStage, Arc<TaskQueue>>,
    context: Arc<DashMap<i32, DocumentWork>>,
}

impl Orchestrator {
    pub fn new(settings: Settings, repository: Arc<Repository>, processor: Arc<DocumentProcessor>) -> Self {
        let depth = settings.worker.queue_depth;
        let queues = ProcessingStage::ALL
            .into_iter()
            .map(|stage| (stage, Arc::new(TaskQueue::new(depth))))
            .collect();

        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            settings,
            repository,
            processor,
            queues,
            context: Arc::new(DashMap::new()),
        }
    }

    fn queue(&self, stage: ProcessingStage) -> Arc<TaskQueue> {
        self.queues.get(&stage).expect("every ProcessingStage has a queue").clone()
    }

    /// Admit a freshly-notified document at the front of the DAG.
    pub async fn admit(&self, document_id: i32) {
        self.queue(ProcessingStage::Extraction)
            .enqueue(Task {
                document_id,
                from_stage: ProcessingStage::Extraction,
                priority: TaskPriority::Normal,
                retry_count: 0,
            })
            .await;
    }

    /// Re-admit a document at a specific stage -- used by explicit retry
    /// and by the reconciler, which both resume from wherever the
    /// relational store last recorded the document.
    pub async fn admit_at(&self, document_id: i32, stage: ProcessingStage, retry_count: u32) {
        self.queue(stage)
            .enqueue(Task {
                document_id,
                from_stage: stage,
                priority: TaskPriority::Normal,
                retry_count,
            })
            .await;
    }

    /// Spawn one dispatch loop per queue plus the reconciler sweep. Runs
    /// until the returned handles are aborted.
    pub fn spawn(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let worker_count = self.settings.worker.queue_workers.max(1);
        let mut handles = Vec::new();

        for stage in ProcessingStage::ALL {
            for _ in 0..worker_count {
                let me = self.clone();
                handles.push(tokio::spawn(async move { me.dispatch_loop(stage).await }));
            }
        }

        let me = self.clone();
        handles.push(tokio::spawn(async move { me.reconcile_loop().await }));

        handles
    }

    async fn dispatch_loop(&self, stage: ProcessingStage) {
        let queue = self.queue(stage);
        loop {
            let Some(task) = queue.dequeue().await else {
                tokio::time::sleep(std::time::Duration::from_millis(150)).await;
                continue;
            };

            if let Err(e) = self.run_stage(&task).await {
                error!("stage {:?} failed for document {}: {}", stage, task.document_id, e);
            }
        }
    }

    async fn run_stage(&self, task: &Task) -> anyhow::Result<()> {
        let document_id = task.document_id;
        let stage = task.from_stage;

        let leased = self
            .repository
            .acquire_lease(document_id, &self.worker_id, self.settings.worker.lease_ttl_seconds)
            .await?;
        if !leased {
            // Another worker already owns this document's lease; skip.
            return Ok(());
        }

        self.repository
            .set_document_stage(document_id, IngestionStatus::Processing, stage.as_str(), stage_progress(stage))
            .await?;

        let outcome = self.execute_stage(document_id, stage).await;

        match outcome {
            Ok(()) => {
                self.repository.reset_retry_count(document_id).await?;
                self.repository.release_lease(document_id, &self.worker_id).await?;

                match stage.next() {
                    Some(next_stage) => {
                        self.repository
                            .set_document_stage(document_id, IngestionStatus::Processing, next_stage.as_str(), stage_progress(next_stage))
                            .await?;
                        self.admit_at(document_id, next_stage, 0).await;
                    }
                    None => {
                        self.repository
                            .set_document_stage(document_id, IngestionStatus::Completed, stage.as_str(), 1.0)
                            .await?;
                        self.context.remove(&document_id);
                        info!("document {} completed ingestion", document_id);
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.repository.release_lease(document_id, &self.worker_id).await?;
                let attempt = self.repository.increment_retry_count(document_id).await?;

                if (attempt as u32) >= MAX_STAGE_ATTEMPTS {
                    self.repository.mark_document_failed(document_id, &e.to_string()).await?;
                    self.context.remove(&document_id);
                    warn!("document {} failed permanently at stage {:?}: {}", document_id, stage, e);
                } else {
                    let delay = backoff_delay(attempt as u32);
                    let queue = self.queue(stage);
                    let document_id = document_id;
                    let retry_count = attempt as u32;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        queue
                            .enqueue(Task { document_id, from_stage: stage, priority: TaskPriority::High, retry_count })
                            .await;
                    });
                }
                Ok(())
            }
        }
    }

    async fn execute_stage(&self, document_id: i32, stage: ProcessingStage) -> anyhow::Result<()> {
        match stage {
            ProcessingStage::Extraction => {
                let file_path = self.processor.resolve_and_validate(document_id).await?;
                let text = self.processor.run_extraction(&file_path).await?;
                self.context.insert(
                    document_id,
                    DocumentWork { extracted_text: Some(text), ..Default::default() },
                );
                Ok(())
            }
            ProcessingStage::Chunking => {
                let text = self
                    .context
                    .get(&document_id)
                    .and_then(|w| w.extracted_text.clone())
                    .ok_or_else(|| anyhow::anyhow!("no extracted text cached for document {}", document_id))?;

                let chunks = self.processor.run_chunking(&text)?;
                if let Some(mut work) = self.context.get_mut(&document_id) {
                    work.chunks = Some(chunks);
                }
                Ok(())
            }
            ProcessingStage::Embedding => {
                // Embeddings are computed fresh every time this stage runs
                // (retry semantics: "fills missing vectors only" in the
                // steady state is realized by INDEXING's upsert -- this
                // stage always recomputes all of them).
                let chunks = self
                    .context
                    .get(&document_id)
                    .and_then(|w| w.chunks.clone())
                    .ok_or_else(|| anyhow::anyhow!("no chunks cached for document {}", document_id))?;

                let embeddings = self.processor.run_embedding(&chunks).await?;
                if let Some(mut work) = self.context.get_mut(&document_id) {
                    work.embeddings = Some(embeddings);
                }
                Ok(())
            }
            ProcessingStage::Indexing => {
                let (chunks, embeddings) = self
                    .context
                    .get(&document_id)
                    .and_then(|w| Some((w.chunks.clone()?, w.embeddings.clone()?)))
                    .ok_or_else(|| anyhow::anyhow!("no chunks/embeddings cached for document {}", document_id))?;

                self.processor.run_indexing(document_id, chunks, embeddings).await?;
                Ok(())
            }
        }
    }

    /// Periodic sweep: requeue documents whose lease lapsed mid-stage.
    async fn reconcile_loop(&self) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            self.settings.worker.reconcile_interval_seconds,
        ));
        loop {
            interval.tick().await;
            match self.repository.get_stalled_documents(self.settings.worker.stale_threshold_seconds).await {
                Ok(stalled) => {
                    for doc in stalled {
                        let stage = ProcessingStage::from_str(&doc.processing_stage);
                        warn!("reconciler requeuing stalled document {} at stage {:?}", doc.document_id, stage);
                        self.admit_at(doc.document_id, stage, doc.retry_count as u32).await;
                    }
                }
                Err(e) => error!("reconciler scan failed: {}", e),
            }
        }
    }
}

fn stage_progress(stage: ProcessingStage) -> f32 {
    match stage {
        ProcessingStage::Extraction => 0.2,
        ProcessingStage::Chunking => 0.45,
        ProcessingStage::Embedding => 0.7,
        ProcessingStage::Indexing => 0.9,
    }
}
