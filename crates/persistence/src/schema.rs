//! ScyllaDB schema creation

use scylla::Session;

use crate::PersistenceError;

/// Create the keyspace if it doesn't exist
pub async fn create_keyspace(
    session: &Session,
    keyspace: &str,
    replication_factor: u8,
) -> Result<(), PersistenceError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        keyspace, replication_factor
    );

    session
        .query_unpaged(query, &[])
        .await
        .map_err(|e| PersistenceError::Schema(format!("Failed to create keyspace: {}", e)))?;

    Ok(())
}

/// Create all required tables
pub async fn create_tables(session: &Session, keyspace: &str) -> Result<(), PersistenceError> {
    // One row per question. Partitioned by session so a conversation's
    // interactions can be listed together, newest first.
    let interactions_table = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {}.interactions (
            session_id TEXT,
            id UUID,
            user_id TEXT,
            query_text TEXT,
            retrieved_chunk_refs LIST<TEXT>,
            combined_context TEXT,
            raw_model_output TEXT,
            final_response_text TEXT,
            rag_enabled BOOLEAN,
            retrieval_latency_ms BIGINT,
            llm_latency_ms BIGINT,
            total_latency_ms BIGINT,
            error_message TEXT,
            created_at TIMESTAMP,
            PRIMARY KEY ((session_id), id)
        ) WITH CLUSTERING ORDER BY (id DESC)
    "#,
        keyspace
    );

    session
        .query_unpaged(interactions_table, &[])
        .await
        .map_err(|e| {
            PersistenceError::Schema(format!("Failed to create interactions table: {}", e))
        })?;

    tracing::info!("All tables created successfully");
    Ok(())
}
