pub mod provider;
pub mod llama_server;

pub use provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};
pub use llama_server::LlamaServerManager;
