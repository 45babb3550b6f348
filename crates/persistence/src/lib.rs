//! ScyllaDB persistence layer for the guideline RAG service.
//!
//! Stores one interaction record per question: created when the
//! question arrives, completed exactly once when the stream finishes
//! or fails. An in-memory store backs tests and deployments without a
//! ScyllaDB cluster.

pub mod client;
pub mod interactions;
pub mod schema;

pub use client::{ScyllaClient, ScyllaConfig};
pub use interactions::{
    Interaction, InteractionCompletion, InteractionStore, InMemoryInteractionStore,
    ScyllaInteractionStore,
};

use thiserror::Error;

/// Persistence errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Connection error: {0}")]
    Connection(#[from] scylla::transport::errors::NewSessionError),

    #[error("Query error: {0}")]
    Query(#[from] scylla::transport::errors::QueryError),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<PersistenceError> for guideline_rag_core::Error {
    fn from(err: PersistenceError) -> Self {
        guideline_rag_core::Error::Persistence(err.to_string())
    }
}

/// Connect to ScyllaDB and ensure the schema exists.
pub async fn init(config: ScyllaConfig) -> Result<ScyllaInteractionStore, PersistenceError> {
    let client = ScyllaClient::connect(config).await?;
    client.ensure_schema().await?;
    Ok(ScyllaInteractionStore::new(client))
}
