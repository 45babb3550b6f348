//! Retrieval orchestrator
//!
//! Sequences embedding, dense and sparse search, RRF fusion, and
//! reranking into one `retrieve` call. Partial subsystem failure
//! degrades the ranking instead of failing the request; an empty
//! result set is an ordinary outcome.

use std::sync::Arc;
use std::time::Instant;

use guideline_rag_core::RetrievedDocument;

use crate::corpus::ChunkCorpus;
use crate::embeddings::Embedder;
use crate::fusion::{rrf_fuse, FusionConfig};
use crate::reranker::{rerank, CrossEncoder};
use crate::sparse::Bm25Index;
use crate::vector_store::DenseIndex;

/// Retriever configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Candidates carried from each ranking into fusion
    pub over_retrieve_k: usize,
    /// Final result count after reranking
    pub final_k: usize,
    /// RRF constant
    pub rrf_k: f32,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        use guideline_rag_config::constants::retrieval;
        Self {
            over_retrieve_k: retrieval::OVER_RETRIEVE_K,
            final_k: retrieval::FINAL_TOP_K,
            rrf_k: retrieval::RRF_K,
        }
    }
}

impl From<&guideline_rag_config::RetrievalSettings> for RetrieverConfig {
    fn from(settings: &guideline_rag_config::RetrievalSettings) -> Self {
        Self {
            over_retrieve_k: settings.over_retrieve_k,
            final_k: settings.final_top_k,
            rrf_k: settings.rrf_k,
        }
    }
}

/// What one retrieval call produced.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    /// Final ranked documents; empty means "no relevant context found"
    pub documents: Vec<RetrievedDocument>,
    /// True when the cross-encoder was skipped or failed and fusion
    /// order was kept
    pub reranker_fallback: bool,
}

impl RetrievalOutcome {
    pub fn empty() -> Self {
        Self {
            documents: Vec::new(),
            reranker_fallback: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Hybrid retriever combining dense and sparse search.
pub struct HybridRetriever {
    config: RetrieverConfig,
    corpus: Arc<ChunkCorpus>,
    embedder: Arc<dyn Embedder>,
    dense: Option<Arc<dyn DenseIndex>>,
    sparse: Arc<Bm25Index>,
    scorer: Option<Arc<dyn CrossEncoder>>,
}

impl HybridRetriever {
    pub fn new(
        config: RetrieverConfig,
        corpus: Arc<ChunkCorpus>,
        embedder: Arc<dyn Embedder>,
        sparse: Arc<Bm25Index>,
    ) -> Self {
        Self {
            config,
            corpus,
            embedder,
            dense: None,
            sparse,
            scorer: None,
        }
    }

    pub fn with_dense_index(mut self, dense: Arc<dyn DenseIndex>) -> Self {
        self.dense = Some(dense);
        self
    }

    pub fn with_cross_encoder(mut self, scorer: Arc<dyn CrossEncoder>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Retrieve the final top-k documents for a query.
    ///
    /// Dense and sparse search run concurrently; sparse scoring is
    /// CPU-bound and moved off the async executor.
    pub async fn retrieve(&self, query: &str) -> RetrievalOutcome {
        let start = Instant::now();

        let dense_future = self.dense_ranking(query);

        let sparse_index = Arc::clone(&self.sparse);
        let query_owned = query.to_string();
        let sparse_future = async move {
            match tokio::task::spawn_blocking(move || sparse_index.score_all(&query_owned)).await {
                Ok(scores) => scores,
                Err(e) => {
                    tracing::warn!(error = %e, "Sparse scoring task failed, skipping sparse");
                    Vec::new()
                }
            }
        };

        let (dense_ranking, sparse_scores) = tokio::join!(dense_future, sparse_future);

        let fusion_config = FusionConfig {
            rrf_k: self.config.rrf_k,
            over_retrieve_k: self.config.over_retrieve_k,
        };
        let candidates = rrf_fuse(&dense_ranking, &sparse_scores, &fusion_config);

        if candidates.is_empty() {
            tracing::debug!(query_len = query.len(), "Retrieval found no candidates");
            metrics::histogram!("retrieval_latency_seconds").record(start.elapsed().as_secs_f64());
            return RetrievalOutcome::empty();
        }

        // Candidates came from the corpus, so index lookups cannot miss.
        let texts: Vec<&str> = candidates
            .iter()
            .filter_map(|c| self.corpus.get(c.chunk_index))
            .map(|chunk| chunk.content.as_str())
            .collect();

        let outcome = rerank(
            self.scorer.as_deref(),
            query,
            candidates,
            &texts,
            self.config.final_k,
        )
        .await;
        let reranker_fallback = outcome.is_fallback();

        let documents: Vec<RetrievedDocument> = outcome
            .into_candidates()
            .into_iter()
            .filter_map(|c| {
                self.corpus.get(c.chunk_index).map(|chunk| RetrievedDocument {
                    chunk_index: c.chunk_index,
                    content: chunk.content.clone(),
                    source_id: chunk.source_id.clone(),
                    score: c.rerank_score.unwrap_or(c.fused_score),
                })
            })
            .collect();

        metrics::histogram!("retrieval_latency_seconds").record(start.elapsed().as_secs_f64());
        tracing::debug!(
            documents = documents.len(),
            reranker_fallback,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Retrieval complete"
        );

        RetrievalOutcome {
            documents,
            reranker_fallback,
        }
    }

    /// Dense ranking as resolved chunk indices, best first. Any failure
    /// degrades to an empty ranking. Hits that cannot be resolved back to
    /// the corpus are dropped and counted.
    async fn dense_ranking(&self, query: &str) -> Vec<usize> {
        let Some(dense) = self.dense.as_ref() else {
            return Vec::new();
        };

        let embedding = match self.embedder.embed(query).await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "Query embedding failed, degrading to sparse-only");
                return Vec::new();
            }
        };

        let hits = match dense.search(&embedding, self.config.over_retrieve_k).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "Dense search failed, degrading to sparse-only");
                return Vec::new();
            }
        };

        let mut ranking = Vec::with_capacity(hits.len());
        for hit in hits {
            match hit.chunk_index {
                Some(idx) if idx < self.corpus.len() => ranking.push(idx),
                _ => {
                    metrics::counter!("retrieval_unresolved_dense_total").increment(1);
                    tracing::warn!(
                        chunk_index = ?hit.chunk_index,
                        corpus_len = self.corpus.len(),
                        "Dense hit did not resolve to a corpus chunk"
                    );
                }
            }
        }
        ranking
    }
}
