//! Dense vector index backed by Qdrant
//!
//! Points carry the chunk's stable `chunk_index` in their payload, so a
//! search hit resolves back to the corpus by key. Hits whose payload is
//! missing or malformed surface as `chunk_index: None` and are counted
//! by the orchestrator instead of being silently dropped.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        value::Kind, CreateCollectionBuilder, Distance, PointStruct, SearchPointsBuilder,
        UpsertPointsBuilder, VectorParamsBuilder,
    },
    Qdrant,
};

use guideline_rag_core::Chunk;

use crate::RetrievalError;

/// Vector store configuration
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub endpoint: String,
    pub collection: String,
    pub vector_dim: u64,
    pub api_key: Option<String>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:6334".to_string(),
            collection: "guideline_chunks".to_string(),
            vector_dim: 384,
            api_key: None,
        }
    }
}

/// One dense search hit, ranked best-first.
#[derive(Debug, Clone)]
pub struct DenseHit {
    /// Stable corpus key from the point payload; `None` when the payload
    /// could not be resolved
    pub chunk_index: Option<usize>,
    /// Distance to the query vector, lower is more similar
    pub distance: f32,
}

/// Seam over the dense index so the orchestrator can be exercised
/// without a running Qdrant.
#[async_trait]
pub trait DenseIndex: Send + Sync {
    /// Top-k nearest chunks for the query embedding, best first.
    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<DenseHit>, RetrievalError>;
}

/// Qdrant-backed dense index.
pub struct QdrantStore {
    client: Qdrant,
    config: VectorStoreConfig,
}

impl QdrantStore {
    pub fn new(config: VectorStoreConfig) -> Result<Self, RetrievalError> {
        let mut builder = Qdrant::from_url(&config.endpoint);
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| RetrievalError::Connection(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Create the collection if it does not exist.
    pub async fn ensure_collection(&self) -> Result<(), RetrievalError> {
        let exists = self
            .client
            .collection_exists(&self.config.collection)
            .await
            .map_err(|e| RetrievalError::VectorStore(e.to_string()))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.config.collection).vectors_config(
                        VectorParamsBuilder::new(self.config.vector_dim, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| RetrievalError::VectorStore(e.to_string()))?;
            tracing::info!(collection = %self.config.collection, "Created Qdrant collection");
        }

        Ok(())
    }

    /// Number of points currently in the collection.
    pub async fn point_count(&self) -> Result<u64, RetrievalError> {
        let info = self
            .client
            .collection_info(&self.config.collection)
            .await
            .map_err(|e| RetrievalError::VectorStore(e.to_string()))?;
        Ok(info.result.and_then(|r| r.points_count).unwrap_or(0))
    }

    /// Index corpus chunks with their embeddings. Point id and payload both
    /// carry the stable `chunk_index`.
    pub async fn index_chunks(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), RetrievalError> {
        if chunks.len() != embeddings.len() {
            return Err(RetrievalError::VectorStore(
                "Chunk and embedding count mismatch".to_string(),
            ));
        }

        let points: Vec<PointStruct> = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, emb)| {
                let mut payload: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
                payload.insert(
                    "chunk_index".to_string(),
                    (chunk.chunk_index as i64).into(),
                );
                payload.insert("source".to_string(), chunk.source_id.clone().into());

                PointStruct::new(chunk.chunk_index as u64, emb.clone(), payload)
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.config.collection, points))
            .await
            .map_err(|e| RetrievalError::VectorStore(e.to_string()))?;

        tracing::info!(points = chunks.len(), collection = %self.config.collection, "Indexed chunks");
        Ok(())
    }
}

#[async_trait]
impl DenseIndex for QdrantStore {
    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<DenseHit>, RetrievalError> {
        let results = self
            .client
            .search_points(
                SearchPointsBuilder::new(
                    &self.config.collection,
                    embedding.to_vec(),
                    k as u64,
                )
                .with_payload(true),
            )
            .await
            .map_err(|e| RetrievalError::Search(e.to_string()))?;

        let hits = results
            .result
            .into_iter()
            .map(|point| {
                let chunk_index = point.payload.get("chunk_index").and_then(|v| match v.kind {
                    Some(Kind::IntegerValue(i)) if i >= 0 => Some(i as usize),
                    _ => None,
                });

                DenseHit {
                    chunk_index,
                    // Cosine similarity from Qdrant, inverted so lower is closer.
                    distance: 1.0 - point.score,
                }
            })
            .collect();

        Ok(hits)
    }
}
