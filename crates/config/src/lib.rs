//! Configuration for the guideline RAG service.
//!
//! Settings are loaded once at startup from layered sources (defaults,
//! `config/default.yaml`, `config/{env}.yaml`, then environment variables)
//! and validated before any component is constructed. Components receive
//! their configuration by reference; nothing reads ambient globals.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, GenerationSettings, ObservabilitySettings, PersistenceSettings,
    RetrievalSettings, RuntimeEnvironment, ServerSettings, Settings, UpstreamSettings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Missing required configuration: {0}")]
    Missing(String),
}
