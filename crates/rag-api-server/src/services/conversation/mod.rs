//! Conversation memory management module
//! 
//! Provides in-memory conversation state management with:
//! - Thread-safe caching (DashMap)
//! - Dynamic system context building
//! - Token management and sliding window
//! - Context-aware retrieval decisions

mod cache;
mod context_builder;
mod cost_accountant;
pub mod manager;
pub mod reranker;
mod token_counter;
pub mod types;
mod verification;

pub use cache::{ConversationCache, CacheStats};
pub use context_builder::ContextBuilder;
pub use cost_accountant::CostAccountant;
pub use manager::ConversationManager;
pub use reranker::{Reranker, RerankedChunk};
pub use token_counter::TokenCounter;
pub use verification::{LlmVerifier, VerificationResult};
pub use types::{
    ConversationState, RetrievalDecision,
    SystemContextComponents, WeightedEmbeddingConfig,
};

// Re-export common types for convenience if needed, but ChatMessage/SessionId are in models
pub use crate::models::chat::{ChatMessage, SessionId};
