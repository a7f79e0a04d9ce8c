pub mod processor;
pub mod bulk_indexer;
pub mod orchestrator;
pub mod queue;
pub mod stage;

pub use processor::DocumentProcessor;
pub use bulk_indexer::BulkIndexer;
pub use orchestrator::Orchestrator;
pub use queue::{TaskQueue, Task, TaskPriority};
pub use stage::ProcessingStage;

use crate::config::Settings;
use crate::database::{DbPool, NotificationListener, Repository};
use crate::embedding::LlamaServerManager;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

pub struct Worker {
    settings: Settings,
    repository: Arc<Repository>,
    listener: NotificationListener,
    orchestrator: Arc<Orchestrator>,
    llama_manager: Arc<RwLock<LlamaServerManager>>,
}

impl Worker {
    pub async fn new(settings: Settings, db_pool: DbPool) -> Result<Self> {
        let repository = Arc::new(Repository::new(db_pool.clone()));

        let listener = NotificationListener::new(
            settings.database.clone(),
            settings.database.listen_channel.clone(),
        );

        let llama_manager = Arc::new(RwLock::new(LlamaServerManager::new(
            settings.llama_server.clone(),
        )));

        let processor = Arc::new(DocumentProcessor::new(
            settings.clone(),
            repository.clone(),
            llama_manager.clone(),
        ));

        let orchestrator = Arc::new(Orchestrator::new(settings.clone(), repository.clone(), processor));

        Ok(Self {
            settings,
            repository,
            listener,
            orchestrator,
            llama_manager,
        })
    }

    /// Main worker loop: four per-stage dispatch loops plus the reconciler,
    /// fed by `LISTEN/NOTIFY` wakeups with the reconciler's periodic DB scan
    /// as the source of truth, so a missed or duplicate NOTIFY never stalls
    /// or double-processes a document.
    pub async fn run(self) -> Result<()> {
        info!("🎯 Worker started");

        self.repository.ensure_orchestrator_tables().await?;

        let mut notification_rx = self.listener.start().await?;

        let stage_handles = self.orchestrator.clone().spawn();

        info!("🔍 Checking for unprocessed documents...");
        match self.check_and_run_bulk_indexing().await {
            Ok(count) => {
                if count > 0 {
                    info!("📦 Bulk indexing completed: {} documents", count);
                }
            }
            Err(e) => {
                error!("Failed to run bulk indexing: {}", e);
            }
        }

        info!("👂 Listening for document changes...");
        loop {
            tokio::select! {
                Some(notification) = notification_rx.recv() => {
                    info!(
                        "📬 Received notification: op={}, doc_id={}",
                        notification.operation,
                        notification.document_id
                    );

                    self.orchestrator.admit(notification.document_id).await;
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        info!("Shutting down worker...");
        for handle in stage_handles {
            handle.abort();
        }

        let mut llama = self.llama_manager.write().await;
        llama.stop().await?;

        info!("Worker stopped");
        Ok(())
    }

    /// Check for unprocessed documents and run bulk indexing if needed
    async fn check_and_run_bulk_indexing(&self) -> Result<usize> {
        let bulk_indexer = BulkIndexer::new(
            self.settings.clone(),
            self.repository.clone(),
            self.llama_manager.clone(),
        );

        bulk_indexer.run().await
    }
}
