use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub rag: RagConfig,
    pub prompts: PromptsConfig,
    pub limits: LimitsConfig,
    #[serde(default)]
    pub gemini: Option<GeminiConfig>,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Bootstrap defaults for the two-level query cache (§4.8). These seed the
/// first `ConfigResolver::refresh` call; once `rag_system_config` carries
/// `cache.similarity_threshold` / `cache.query_ttl_seconds` rows, those
/// values take precedence for every subsequent request.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_query_ttl_seconds")]
    pub query_ttl_seconds: i64,
}

fn default_similarity_threshold() -> f32 {
    0.95
}

fn default_query_ttl_seconds() -> i64 {
    604_800
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            query_ttl_seconds: default_query_ttl_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SecurityConfig {
    pub allowed_ips: Vec<String>,
    pub custom_headers: CustomHeadersConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CustomHeadersConfig {
    pub app_id: String,
    pub api_key: String,
    pub request_signature: String,
    pub timestamp_tolerance: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub pool_timeout_seconds: u64,
    /// Same `LISTEN/NOTIFY` channel the embedding worker's
    /// `NotificationListener` listens on; lets this crate wake the worker
    /// immediately on a manual retry instead of waiting for its reconciler
    /// sweep. Defaults to the worker's own default channel name.
    #[serde(default = "default_listen_channel")]
    pub listen_channel: String,
}

fn default_listen_channel() -> String {
    "document_changes".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    pub model: String,
    pub base_url: String, // Added base_url for embedding server
    pub dimension: usize,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub stream_response: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RagConfig {
    pub retrieval_top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap_percentage: f32,
    pub rerank_enabled: bool,
    pub max_context_length: usize,  // Keep for backward compat
    pub max_context_tokens: usize,  // NEW: token-based limit
    pub document_path: String,
    /// Weight given to the dense/vector score when fusing with full-text
    /// search (1.0 = pure vector, 0.0 = pure full-text). Independent of
    /// `rerank_enabled`, which only gates the later cross-encoder rerank step.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f32,
}

fn default_hybrid_alpha() -> f32 {
    0.7
}


#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptsConfig {
    pub main_system_prompt: String,
    pub context_extraction_system_prompt: String,
}

/// Concurrency caps and batching knobs, shared by every semaphore-gated
/// operation (embedding calls, DB searches, LLM generate/stream calls).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LimitsConfig {
    pub embedding_concurrency: usize,
    pub db_search_concurrency: usize,
    pub llm_generate_concurrency: usize,
    pub llm_stream_concurrency: usize,
    pub acquire_timeout_ms: u64,
    pub embedding_batch_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            embedding_concurrency: 4,
            db_search_concurrency: 8,
            llm_generate_concurrency: 4,
            llm_stream_concurrency: 4,
            acquire_timeout_ms: 30_000,
            embedding_batch_size: 16,
        }
    }
}

/// Optional Gemini backend, used by the ad-hoc upload path in
/// `handlers::gemini` instead of the primary llama.cpp-backed services.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
}

/// USD->XAF conversion plus per-model token pricing for cost accounting.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PricingConfig {
    pub usd_to_xaf_rate: f64,
    pub input_cost_per_1k_tokens_usd: f64,
    pub output_cost_per_1k_tokens_usd: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            usd_to_xaf_rate: 610.0,
            input_cost_per_1k_tokens_usd: 0.0005,
            output_cost_per_1k_tokens_usd: 0.0015,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        
        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(true))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;
        
        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
    
    pub fn config_path(&self) -> PathBuf {
        PathBuf::from("config/settings.toml")
    }
}
