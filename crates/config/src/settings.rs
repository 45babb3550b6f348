//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{generation, retrieval};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Hybrid retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalSettings,

    /// Answer generation configuration
    #[serde(default)]
    pub generation: GenerationSettings,

    /// Remote generation service (proxy mode)
    #[serde(default)]
    pub upstream: UpstreamSettings,

    /// Logging and metrics
    #[serde(default)]
    pub observability: ObservabilitySettings,

    /// Interaction persistence (ScyllaDB)
    #[serde(default)]
    pub persistence: PersistenceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Session idle TTL in seconds before cleanup
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    /// Upper bound on concurrently tracked chat sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_session_ttl() -> u64 {
    1800
}

fn default_max_sessions() -> usize {
    1000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            session_ttl_secs: default_session_ttl(),
            max_sessions: default_max_sessions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    /// Disable to answer without document context
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// JSON file holding the ingested corpus chunks
    #[serde(default = "default_chunks_path")]
    pub chunks_path: String,

    #[serde(default = "default_qdrant_endpoint")]
    pub qdrant_endpoint: String,
    #[serde(default = "default_qdrant_collection")]
    pub qdrant_collection: String,
    #[serde(default)]
    pub qdrant_api_key: Option<String>,
    #[serde(default = "default_vector_dim")]
    pub vector_dim: u64,

    /// Remote embedding service; when absent a deterministic local
    /// hash embedder is used (development only)
    #[serde(default)]
    pub embedding_endpoint: Option<String>,

    /// Remote cross-encoder scoring service; when absent reranking
    /// falls back to fusion order
    #[serde(default)]
    pub reranker_endpoint: Option<String>,

    #[serde(default = "default_over_retrieve_k")]
    pub over_retrieve_k: usize,
    #[serde(default = "default_final_top_k")]
    pub final_top_k: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f32,
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f32,
}

fn default_true() -> bool {
    true
}

fn default_chunks_path() -> String {
    "data/chunks.json".to_string()
}

fn default_qdrant_endpoint() -> String {
    "http://localhost:6334".to_string()
}

fn default_qdrant_collection() -> String {
    "guideline_chunks".to_string()
}

fn default_vector_dim() -> u64 {
    384
}

fn default_over_retrieve_k() -> usize {
    retrieval::OVER_RETRIEVE_K
}

fn default_final_top_k() -> usize {
    retrieval::FINAL_TOP_K
}

fn default_rrf_k() -> f32 {
    retrieval::RRF_K
}

fn default_bm25_k1() -> f32 {
    retrieval::BM25_K1
}

fn default_bm25_b() -> f32 {
    retrieval::BM25_B
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            chunks_path: default_chunks_path(),
            qdrant_endpoint: default_qdrant_endpoint(),
            qdrant_collection: default_qdrant_collection(),
            qdrant_api_key: None,
            vector_dim: default_vector_dim(),
            embedding_endpoint: None,
            reranker_endpoint: None,
            over_retrieve_k: default_over_retrieve_k(),
            final_top_k: default_final_top_k(),
            rrf_k: default_rrf_k(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Build structured chat turns instead of one flat prompt
    #[serde(default = "default_true")]
    pub apply_chat_template: bool,
    #[serde(default = "default_max_history")]
    pub max_history_length: usize,
}

fn default_model() -> String {
    "qwen3:4b-instruct-2507-q4_K_M".to_string()
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_max_tokens() -> usize {
    1024
}

fn default_temperature() -> f32 {
    0.3
}

fn default_top_p() -> f32 {
    0.9
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_max_history() -> usize {
    generation::MAX_HISTORY_LENGTH
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            endpoint: default_llm_endpoint(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            timeout_secs: default_llm_timeout(),
            apply_chat_template: true,
            max_history_length: default_max_history(),
        }
    }
}

/// Proxy mode: forward generation to a remote service instead of
/// running the local pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpstreamSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the remote generation service
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_upstream_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_upstream_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    /// Enable ScyllaDB persistence (false = in-memory only)
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_scylla_hosts")]
    pub scylla_hosts: Vec<String>,
    #[serde(default = "default_scylla_keyspace")]
    pub keyspace: String,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u8,
}

fn default_scylla_hosts() -> Vec<String> {
    std::env::var("SCYLLA_HOSTS")
        .map(|s| s.split(',').map(|h| h.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["127.0.0.1:9042".to_string()])
}

fn default_scylla_keyspace() -> String {
    std::env::var("SCYLLA_KEYSPACE").unwrap_or_else(|_| "guideline_rag".to_string())
}

fn default_replication_factor() -> u8 {
    1
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            scylla_hosts: default_scylla_hosts(),
            keyspace: default_scylla_keyspace(),
            replication_factor: default_replication_factor(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings before any component is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_retrieval()?;
        self.validate_generation()?;
        self.validate_upstream()?;
        Ok(())
    }

    fn validate_retrieval(&self) -> Result<(), ConfigError> {
        let r = &self.retrieval;

        if r.final_top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.final_top_k".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if r.over_retrieve_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.over_retrieve_k".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if r.final_top_k > r.over_retrieve_k {
            tracing::warn!(
                "retrieval.final_top_k ({}) is larger than over_retrieve_k ({}), \
                 results will be limited by fusion",
                r.final_top_k,
                r.over_retrieve_k
            );
        }

        if r.rrf_k <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.rrf_k".to_string(),
                message: format!("Must be positive, got {}", r.rrf_k),
            });
        }

        if r.vector_dim == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.vector_dim".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&r.bm25_b) {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.bm25_b".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", r.bm25_b),
            });
        }

        Ok(())
    }

    fn validate_generation(&self) -> Result<(), ConfigError> {
        let g = &self.generation;

        if !(0.0..=2.0).contains(&g.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "generation.temperature".to_string(),
                message: format!("Must be between 0.0 and 2.0, got {}", g.temperature),
            });
        }

        if g.max_history_length == 0 {
            return Err(ConfigError::InvalidValue {
                field: "generation.max_history_length".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    fn validate_upstream(&self) -> Result<(), ConfigError> {
        if self.upstream.enabled && self.upstream.endpoint.is_empty() {
            return Err(ConfigError::Missing("upstream.endpoint".to_string()));
        }
        Ok(())
    }
}

/// Load settings from layered sources.
///
/// Priority: env vars > `config/{env}.yaml` > `config/default.yaml` > defaults.
/// Environment variables use the `GUIDELINE_RAG` prefix with `__` separators,
/// e.g. `GUIDELINE_RAG__SERVER__PORT=9000`.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    if Path::new("config/default.yaml").exists() {
        builder = builder.add_source(File::with_name("config/default"));
    }

    if let Some(env_name) = env {
        let env_file = format!("config/{}", env_name);
        if Path::new(&format!("{}.yaml", env_file)).exists() {
            builder = builder.add_source(File::with_name(&env_file));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("GUIDELINE_RAG")
            .separator("__")
            .try_parsing(true),
    );

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.retrieval.over_retrieve_k, 20);
        assert_eq!(settings.retrieval.final_top_k, 5);
        assert_eq!(settings.retrieval.rrf_k, 60.0);
        assert_eq!(settings.generation.max_history_length, 10);
    }

    #[test]
    fn test_zero_final_top_k_rejected() {
        let mut settings = Settings::default();
        settings.retrieval.final_top_k = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_negative_rrf_k_rejected() {
        let mut settings = Settings::default();
        settings.retrieval.rrf_k = -1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_upstream_requires_endpoint() {
        let mut settings = Settings::default();
        settings.upstream.enabled = true;
        settings.upstream.endpoint = String::new();
        assert!(settings.validate().is_err());

        settings.upstream.endpoint = "http://localhost:8001".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_temperature_range() {
        let mut settings = Settings::default();
        settings.generation.temperature = 2.5;
        assert!(settings.validate().is_err());
    }
}
