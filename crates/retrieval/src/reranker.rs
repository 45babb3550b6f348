//! Cross-encoder reranking
//!
//! Scores (query, candidate text) pairs jointly and reorders the fusion
//! candidates. The scorer is an external service; when it is absent or
//! fails, the first `final_k` fusion candidates pass through unchanged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fusion::RankedCandidate;
use crate::RetrievalError;

/// Joint (query, candidate) scoring seam.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// One score per candidate, higher is more relevant.
    async fn score(&self, query: &str, candidates: &[&str]) -> Result<Vec<f32>, RetrievalError>;
}

/// Result of a rerank attempt. Callers branch on this instead of
/// catching errors.
#[derive(Debug, Clone)]
pub enum RerankOutcome {
    /// Candidates reordered by cross-encoder score
    Reranked(Vec<RankedCandidate>),
    /// Scorer unavailable or failed; fusion order preserved
    Fallback(Vec<RankedCandidate>),
}

impl RerankOutcome {
    pub fn into_candidates(self) -> Vec<RankedCandidate> {
        match self {
            RerankOutcome::Reranked(c) | RerankOutcome::Fallback(c) => c,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, RerankOutcome::Fallback(_))
    }
}

/// Rerank fusion candidates down to `final_k`.
///
/// `texts` must align positionally with `candidates`. Ties in the
/// cross-encoder score keep their pre-rerank fusion order.
pub async fn rerank(
    scorer: Option<&dyn CrossEncoder>,
    query: &str,
    mut candidates: Vec<RankedCandidate>,
    texts: &[&str],
    final_k: usize,
) -> RerankOutcome {
    if candidates.is_empty() {
        return RerankOutcome::Reranked(candidates);
    }

    let Some(scorer) = scorer else {
        tracing::debug!("No cross-encoder configured, keeping fusion order");
        candidates.truncate(final_k);
        return RerankOutcome::Fallback(candidates);
    };

    let scores = match scorer.score(query, texts).await {
        Ok(scores) if scores.len() == candidates.len() => scores,
        Ok(scores) => {
            tracing::warn!(
                expected = candidates.len(),
                got = scores.len(),
                "Cross-encoder returned wrong score count, keeping fusion order"
            );
            metrics::counter!("retrieval_rerank_fallback_total").increment(1);
            candidates.truncate(final_k);
            return RerankOutcome::Fallback(candidates);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cross-encoder failed, keeping fusion order");
            metrics::counter!("retrieval_rerank_fallback_total").increment(1);
            candidates.truncate(final_k);
            return RerankOutcome::Fallback(candidates);
        }
    };

    for (candidate, score) in candidates.iter_mut().zip(scores.iter()) {
        candidate.rerank_score = Some(*score);
    }

    // Stable sort: equal scores keep fusion order.
    candidates.sort_by(|a, b| {
        b.rerank_score
            .partial_cmp(&a.rerank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(final_k);
    RerankOutcome::Reranked(candidates)
}

/// Remote cross-encoder service client.
pub struct HttpCrossEncoder {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    candidates: &'a [&'a str],
}

#[derive(Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

impl HttpCrossEncoder {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| RetrievalError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score(&self, query: &str, candidates: &[&str]) -> Result<Vec<f32>, RetrievalError> {
        let response = self
            .client
            .post(format!("{}/rerank", self.endpoint.trim_end_matches('/')))
            .json(&RerankRequest { query, candidates })
            .send()
            .await
            .map_err(|e| RetrievalError::Rerank(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RetrievalError::Rerank(format!(
                "Rerank service returned {}",
                response.status()
            )));
        }

        let body: RerankResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Rerank(e.to_string()))?;
        Ok(body.scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedScorer(Vec<f32>);

    #[async_trait]
    impl CrossEncoder for FixedScorer {
        async fn score(&self, _query: &str, _c: &[&str]) -> Result<Vec<f32>, RetrievalError> {
            Ok(self.0.clone())
        }
    }

    struct FailingScorer;

    #[async_trait]
    impl CrossEncoder for FailingScorer {
        async fn score(&self, _query: &str, _c: &[&str]) -> Result<Vec<f32>, RetrievalError> {
            Err(RetrievalError::Rerank("model not loaded".to_string()))
        }
    }

    fn candidates(n: usize) -> Vec<RankedCandidate> {
        (0..n)
            .map(|i| RankedCandidate {
                chunk_index: i,
                dense_rank: Some(i),
                sparse_score: None,
                fused_score: 1.0 / (60.0 + i as f32),
                rerank_score: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_rerank_reorders_by_score() {
        let scorer = FixedScorer(vec![0.1, 0.9, 0.5]);
        let texts = ["a", "b", "c"];
        let outcome = rerank(Some(&scorer), "q", candidates(3), &texts, 3).await;

        assert!(!outcome.is_fallback());
        let reranked = outcome.into_candidates();
        let order: Vec<usize> = reranked.iter().map(|c| c.chunk_index).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert_eq!(reranked[0].rerank_score, Some(0.9));
    }

    #[tokio::test]
    async fn test_rerank_failure_returns_first_final_k_unchanged() {
        let texts = ["a", "b", "c", "d"];
        let outcome = rerank(Some(&FailingScorer), "q", candidates(4), &texts, 2).await;

        assert!(outcome.is_fallback());
        let kept = outcome.into_candidates();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].chunk_index, 0);
        assert_eq!(kept[1].chunk_index, 1);
        assert!(kept.iter().all(|c| c.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn test_rerank_without_scorer_is_fallback() {
        let texts = ["a", "b"];
        let outcome = rerank(None, "q", candidates(2), &texts, 5).await;
        assert!(outcome.is_fallback());
        assert_eq!(outcome.into_candidates().len(), 2);
    }

    #[tokio::test]
    async fn test_rerank_tie_keeps_fusion_order() {
        let scorer = FixedScorer(vec![0.5, 0.5, 0.5]);
        let texts = ["a", "b", "c"];
        let reranked = rerank(Some(&scorer), "q", candidates(3), &texts, 3)
            .await
            .into_candidates();
        let order: Vec<usize> = reranked.iter().map(|c| c.chunk_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_rerank_wrong_score_count_is_fallback() {
        let scorer = FixedScorer(vec![0.5]);
        let texts = ["a", "b", "c"];
        let outcome = rerank(Some(&scorer), "q", candidates(3), &texts, 3).await;
        assert!(outcome.is_fallback());
    }

    #[tokio::test]
    async fn test_rerank_empty_candidates() {
        let outcome = rerank(Some(&FailingScorer), "q", Vec::new(), &[], 5).await;
        assert!(outcome.into_candidates().is_empty());
    }
}
