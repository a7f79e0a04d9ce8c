pub mod settings;

pub use settings::{
    CacheConfig, CustomHeadersConfig, DatabaseConfig, EmbeddingConfig, GeminiConfig, LimitsConfig,
    LlmConfig, PricingConfig, PromptsConfig, RagConfig, SecurityConfig, ServerConfig, Settings,
};
