//! Query and document embedding
//!
//! The embedding model is an external black box. Production deployments
//! point at a remote embedding service; `HashEmbedder` is a deterministic
//! stand-in for tests and index-less development.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::RetrievalError;

/// Text embedding seam.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;

    /// Embedding dimension this embedder produces.
    fn dim(&self) -> usize;
}

/// Deterministic hash-projection embedder. Not semantically meaningful;
/// keeps the dense path exercisable without a model.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in crate::sparse::tokenize(text) {
            let mut hash: u64 = 1469598103934665603;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % self.dim as u64) as usize;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        Ok(self.embed_sync(text))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Remote embedding service client.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    dim: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, dim: usize) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| RetrievalError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            dim,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let response = self
            .client
            .post(format!("{}/embed", self.endpoint.trim_end_matches('/')))
            .json(&EmbedRequest { text })
            .send()
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RetrievalError::Embedding(format!(
                "Embedding service returned {}",
                response.status()
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        if body.embedding.len() != self.dim {
            return Err(RetrievalError::Embedding(format!(
                "Expected dimension {}, got {}",
                self.dim,
                body.embedding.len()
            )));
        }

        Ok(body.embedding)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("postpartum hemorrhage treatment").await.unwrap();
        let b = embedder.embed("postpartum hemorrhage treatment").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_hash_embedder_normalized() {
        let embedder = HashEmbedder::new(32);
        let v = embedder.embed("iron supplementation dosage").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hash_embedder_empty_text() {
        let embedder = HashEmbedder::new(16);
        let v = embedder.embed("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
