//! Answer generation for the guideline RAG service.
//!
//! Backends stream tokens through an mpsc channel; the streaming
//! generator drives one backend call per question and turns it into an
//! ordered event sequence ending in exactly one `End`.

pub mod backend;
pub mod prompt;
pub mod streaming;

pub use backend::{
    FinishReason, GenerationConfig, GenerationResult, LlmBackend, LocalBackend, OllamaBackend,
    TokenIter,
};
pub use prompt::{Message, PromptBuilder, Role};
pub use streaming::{format_sources_block, GenerationEvent, StreamingGenerator};

use thiserror::Error;

/// Generation errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Network(err.to_string())
    }
}

impl From<LlmError> for guideline_rag_core::Error {
    fn from(err: LlmError) -> Self {
        guideline_rag_core::Error::Generation(err.to_string())
    }
}
