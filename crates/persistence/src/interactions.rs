//! Interaction record persistence
//!
//! One record per question. The record is created when the question
//! arrives (query text, retrieved chunk references, context) and
//! completed once when the stream finishes, carrying the final answer
//! or the error that ended it.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{PersistenceError, ScyllaClient};

/// One question/answer interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Uuid,
    pub session_id: String,
    pub user_id: Option<String>,
    pub query_text: String,
    /// Stable references to the chunks the answer was grounded on,
    /// formatted `<source_id>#<chunk_index>`.
    pub retrieved_chunk_refs: Vec<String>,
    pub combined_context: String,
    pub raw_model_output: Option<String>,
    pub final_response_text: Option<String>,
    pub rag_enabled: bool,
    pub retrieval_latency_ms: Option<i64>,
    pub llm_latency_ms: Option<i64>,
    pub total_latency_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Interaction {
    pub fn new(session_id: &str, query_text: &str, rag_enabled: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            user_id: None,
            query_text: query_text.to_string(),
            retrieved_chunk_refs: Vec::new(),
            combined_context: String::new(),
            raw_model_output: None,
            final_response_text: None,
            rag_enabled,
            retrieval_latency_ms: None,
            llm_latency_ms: None,
            total_latency_ms: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }
}

/// Fields written when a stream finishes.
#[derive(Debug, Clone, Default)]
pub struct InteractionCompletion {
    pub raw_model_output: Option<String>,
    pub final_response_text: Option<String>,
    pub error_message: Option<String>,
    pub retrieval_latency_ms: Option<i64>,
    pub llm_latency_ms: Option<i64>,
    pub total_latency_ms: Option<i64>,
}

/// Interaction store trait
#[async_trait]
pub trait InteractionStore: Send + Sync {
    async fn create(&self, interaction: &Interaction) -> Result<(), PersistenceError>;

    /// Record the outcome of the stream. Called at most once per
    /// interaction; later calls for the same id are ignored.
    async fn complete(
        &self,
        session_id: &str,
        id: Uuid,
        completion: InteractionCompletion,
    ) -> Result<(), PersistenceError>;

    async fn get(
        &self,
        session_id: &str,
        id: Uuid,
    ) -> Result<Option<Interaction>, PersistenceError>;
}

/// ScyllaDB implementation of the interaction store
#[derive(Clone)]
pub struct ScyllaInteractionStore {
    client: ScyllaClient,
}

impl ScyllaInteractionStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InteractionStore for ScyllaInteractionStore {
    async fn create(&self, interaction: &Interaction) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.interactions (
                session_id, id, user_id, query_text, retrieved_chunk_refs,
                combined_context, raw_model_output, final_response_text,
                rag_enabled, retrieval_latency_ms, llm_latency_ms,
                total_latency_ms, error_message, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &interaction.session_id,
                    interaction.id,
                    &interaction.user_id,
                    &interaction.query_text,
                    &interaction.retrieved_chunk_refs,
                    &interaction.combined_context,
                    &interaction.raw_model_output,
                    &interaction.final_response_text,
                    interaction.rag_enabled,
                    interaction.retrieval_latency_ms,
                    interaction.llm_latency_ms,
                    interaction.total_latency_ms,
                    &interaction.error_message,
                    interaction.created_at.timestamp_millis(),
                ),
            )
            .await?;

        tracing::debug!(
            interaction_id = %interaction.id,
            session_id = %interaction.session_id,
            rag_enabled = interaction.rag_enabled,
            "Interaction created"
        );

        Ok(())
    }

    async fn complete(
        &self,
        session_id: &str,
        id: Uuid,
        completion: InteractionCompletion,
    ) -> Result<(), PersistenceError> {
        let query = format!(
            "UPDATE {}.interactions SET
                raw_model_output = ?, final_response_text = ?, error_message = ?,
                retrieval_latency_ms = ?, llm_latency_ms = ?, total_latency_ms = ?
             WHERE session_id = ? AND id = ?",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &completion.raw_model_output,
                    &completion.final_response_text,
                    &completion.error_message,
                    completion.retrieval_latency_ms,
                    completion.llm_latency_ms,
                    completion.total_latency_ms,
                    session_id,
                    id,
                ),
            )
            .await?;

        tracing::debug!(interaction_id = %id, "Interaction completed");
        Ok(())
    }

    async fn get(
        &self,
        session_id: &str,
        id: Uuid,
    ) -> Result<Option<Interaction>, PersistenceError> {
        let query = format!(
            "SELECT session_id, id, user_id, query_text, retrieved_chunk_refs,
                    combined_context, raw_model_output, final_response_text,
                    rag_enabled, retrieval_latency_ms, llm_latency_ms,
                    total_latency_ms, error_message, created_at
             FROM {}.interactions WHERE session_id = ? AND id = ?",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (session_id, id))
            .await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                return Ok(Some(row_to_interaction(row)?));
            }
        }

        Ok(None)
    }
}

fn row_to_interaction(
    row: scylla::frame::response::result::Row,
) -> Result<Interaction, PersistenceError> {
    let (
        session_id,
        id,
        user_id,
        query_text,
        retrieved_chunk_refs,
        combined_context,
        raw_model_output,
        final_response_text,
        rag_enabled,
        retrieval_latency_ms,
        llm_latency_ms,
        total_latency_ms,
        error_message,
        created_at,
    ): (
        String,
        Uuid,
        Option<String>,
        String,
        Option<Vec<String>>,
        String,
        Option<String>,
        Option<String>,
        bool,
        Option<i64>,
        Option<i64>,
        Option<i64>,
        Option<String>,
        i64,
    ) = row
        .into_typed()
        .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

    Ok(Interaction {
        id,
        session_id,
        user_id,
        query_text,
        retrieved_chunk_refs: retrieved_chunk_refs.unwrap_or_default(),
        combined_context,
        raw_model_output,
        final_response_text,
        rag_enabled,
        retrieval_latency_ms,
        llm_latency_ms,
        total_latency_ms,
        error_message,
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_else(Utc::now),
    })
}

/// In-memory store for tests and deployments without a ScyllaDB
/// cluster.
#[derive(Default)]
pub struct InMemoryInteractionStore {
    records: RwLock<HashMap<Uuid, Interaction>>,
}

impl InMemoryInteractionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl InteractionStore for InMemoryInteractionStore {
    async fn create(&self, interaction: &Interaction) -> Result<(), PersistenceError> {
        self.records
            .write()
            .insert(interaction.id, interaction.clone());
        Ok(())
    }

    async fn complete(
        &self,
        _session_id: &str,
        id: Uuid,
        completion: InteractionCompletion,
    ) -> Result<(), PersistenceError> {
        let mut records = self.records.write();
        let record = records.get_mut(&id).ok_or_else(|| {
            PersistenceError::InvalidData(format!("unknown interaction {}", id))
        })?;

        // First completion wins
        if record.final_response_text.is_some() || record.error_message.is_some() {
            tracing::warn!(interaction_id = %id, "Interaction already completed, ignoring");
            return Ok(());
        }

        record.raw_model_output = completion.raw_model_output;
        record.final_response_text = completion.final_response_text;
        record.error_message = completion.error_message;
        record.retrieval_latency_ms = completion.retrieval_latency_ms;
        record.llm_latency_ms = completion.llm_latency_ms;
        record.total_latency_ms = completion.total_latency_ms;
        Ok(())
    }

    async fn get(
        &self,
        _session_id: &str,
        id: Uuid,
    ) -> Result<Option<Interaction>, PersistenceError> {
        Ok(self.records.read().get(&id).cloned())
    }
}
