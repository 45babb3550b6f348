//! In-memory corpus of ingested guideline chunks
//!
//! Loaded once at startup from the chunk file produced by ingestion.
//! Position in the vector is the chunk's stable `chunk_index`; both the
//! dense payload key and the sparse score array align to it.

use std::fs;
use std::path::Path;

use guideline_rag_core::Chunk;

use crate::RetrievalError;

/// Immutable chunk corpus addressed by stable integer index.
pub struct ChunkCorpus {
    chunks: Vec<Chunk>,
}

impl ChunkCorpus {
    /// Build from already-loaded chunks. Positions are normalized so that
    /// `chunks[i].chunk_index == i`.
    pub fn new(mut chunks: Vec<Chunk>) -> Self {
        for (i, chunk) in chunks.iter_mut().enumerate() {
            chunk.chunk_index = i;
        }
        Self { chunks }
    }

    /// Load the corpus from a JSON chunk file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RetrievalError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            RetrievalError::Corpus(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let chunks: Vec<Chunk> = serde_json::from_str(&raw).map_err(|e| {
            RetrievalError::Corpus(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        tracing::info!(path = %path.display(), chunks = chunks.len(), "Loaded chunk corpus");
        Ok(Self::new(chunks))
    }

    pub fn get(&self, chunk_index: usize) -> Option<&Chunk> {
        self.chunks.get(chunk_index)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_new_normalizes_indices() {
        let corpus = ChunkCorpus::new(vec![
            Chunk::new("a", "doc1.pdf", 7),
            Chunk::new("b", "doc2.pdf", 7),
        ]);
        assert_eq!(corpus.get(0).unwrap().chunk_index, 0);
        assert_eq!(corpus.get(1).unwrap().chunk_index, 1);
        assert!(corpus.get(2).is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"content": "hypertension management", "source": "who.pdf", "chunk_index": 0}}]"#
        )
        .unwrap();

        let corpus = ChunkCorpus::load(file.path()).unwrap();
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.get(0).unwrap().source_id, "who.pdf");
    }

    #[test]
    fn test_load_missing_file() {
        assert!(ChunkCorpus::load("/nonexistent/chunks.json").is_err());
    }
}
