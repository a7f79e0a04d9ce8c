pub mod config_resolver;
pub mod conversation;
pub mod document_service;
pub mod embedding_service;
pub mod event_bus;
pub mod gemini;
pub mod gemini_document;
pub mod llm_service;
pub mod query_analyzer;
pub mod query_cache;
pub mod rag_service;

pub use config_resolver::ConfigResolver;
pub use document_service::DocumentService;
pub use embedding_service::EmbeddingService;
pub use event_bus::EventBus;
pub use llm_service::LlmService;
pub use query_cache::{CachedAnswer, CachedSource, QueryCache};
pub use rag_service::RagService;
