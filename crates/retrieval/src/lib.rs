//! Hybrid retrieval over the guideline corpus.
//!
//! Pipeline: dense vector search (Qdrant) and sparse BM25 scoring run
//! concurrently, their rankings are merged with Reciprocal Rank Fusion,
//! and the fused candidates are reordered by a cross-encoder before the
//! final top-k is returned. Every stage degrades rather than fails: a
//! missing index falls back to the other ranking, a missing reranker
//! falls back to fusion order, and an empty result set is an ordinary
//! outcome the caller must branch on.

pub mod corpus;
pub mod embeddings;
pub mod fusion;
pub mod reranker;
pub mod retriever;
pub mod sparse;
pub mod vector_store;

pub use corpus::ChunkCorpus;
pub use embeddings::{Embedder, HashEmbedder, HttpEmbedder};
pub use fusion::{rrf_fuse, FusionConfig, RankedCandidate};
pub use reranker::{rerank, CrossEncoder, HttpCrossEncoder, RerankOutcome};
pub use retriever::{HybridRetriever, RetrievalOutcome, RetrieverConfig};
pub use sparse::{tokenize, Bm25Index};
pub use vector_store::{DenseHit, DenseIndex, QdrantStore, VectorStoreConfig};

use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Rerank error: {0}")]
    Rerank(String),

    #[error("Corpus error: {0}")]
    Corpus(String),

    #[error("Search error: {0}")]
    Search(String),
}

impl From<RetrievalError> for guideline_rag_core::Error {
    fn from(err: RetrievalError) -> Self {
        guideline_rag_core::Error::Retrieval(err.to_string())
    }
}
