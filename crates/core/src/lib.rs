//! Core types shared across the guideline RAG service.
//!
//! Holds the chunk data model, bounded conversation history, and the
//! top-level error enum that crate-specific errors convert into.

pub mod chunk;
pub mod conversation;

pub use chunk::{Chunk, RetrievedDocument};
pub use conversation::{ConversationHistory, ConversationTurn};

use thiserror::Error;

/// Top-level service errors
#[derive(Error, Debug)]
pub enum Error {
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
