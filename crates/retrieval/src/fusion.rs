//! Reciprocal Rank Fusion
//!
//! Merges the dense ranking and the sparse score array into one fused
//! score per chunk: each appearance at 0-based rank r contributes
//! 1/(rrf_k + r). Sparse contributions are limited to the top
//! 2 x over_retrieve_k positive scores; a zero sparse score never
//! contributes. Ties keep first-contribution order (dense before sparse).

use std::collections::HashMap;

/// Per-query candidate produced by fusion, enriched by reranking.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub chunk_index: usize,
    pub dense_rank: Option<usize>,
    pub sparse_score: Option<f32>,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct FusionConfig {
    pub rrf_k: f32,
    pub over_retrieve_k: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: guideline_rag_config::constants::retrieval::RRF_K,
            over_retrieve_k: guideline_rag_config::constants::retrieval::OVER_RETRIEVE_K,
        }
    }
}

/// Fuse a dense ranking (chunk indices, best first) with a corpus-aligned
/// sparse score array. Returns at most `over_retrieve_k` candidates sorted
/// by fused score descending. Both inputs empty yields an empty list.
pub fn rrf_fuse(
    dense_ranking: &[usize],
    sparse_scores: &[f32],
    config: &FusionConfig,
) -> Vec<RankedCandidate> {
    let mut candidates: Vec<RankedCandidate> = Vec::new();
    let mut positions: HashMap<usize, usize> = HashMap::new();

    let mut contribute =
        |candidates: &mut Vec<RankedCandidate>,
         positions: &mut HashMap<usize, usize>,
         chunk_index: usize,
         amount: f32| {
            let pos = *positions.entry(chunk_index).or_insert_with(|| {
                candidates.push(RankedCandidate {
                    chunk_index,
                    dense_rank: None,
                    sparse_score: None,
                    fused_score: 0.0,
                    rerank_score: None,
                });
                candidates.len() - 1
            });
            candidates[pos].fused_score += amount;
            pos
        };

    for (rank, &chunk_index) in dense_ranking.iter().enumerate() {
        let pos = contribute(
            &mut candidates,
            &mut positions,
            chunk_index,
            1.0 / (config.rrf_k + rank as f32),
        );
        candidates[pos].dense_rank = Some(rank);
    }

    // Sparse: rank all scores descending, consider only the leading
    // 2 x over_retrieve_k, and skip non-positive scores.
    let mut sparse_order: Vec<usize> = (0..sparse_scores.len()).collect();
    sparse_order.sort_by(|&a, &b| {
        sparse_scores[b]
            .partial_cmp(&sparse_scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for (rank, &chunk_index) in sparse_order
        .iter()
        .take(config.over_retrieve_k * 2)
        .enumerate()
    {
        let score = sparse_scores[chunk_index];
        if score <= 0.0 {
            continue;
        }
        let pos = contribute(
            &mut candidates,
            &mut positions,
            chunk_index,
            1.0 / (config.rrf_k + rank as f32),
        );
        candidates[pos].sparse_score = Some(score);
    }

    candidates.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(config.over_retrieve_k);
    candidates
}
