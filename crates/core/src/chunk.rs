//! Corpus chunk data model
//!
//! Chunks are produced at ingestion time and read-only here. The corpus is
//! addressed by `chunk_index`, a stable integer carried through both the
//! vector index payload and the sparse index, so retrieval results resolve
//! back to the corpus by key rather than by content equality.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One immutable unit of guideline text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk text
    pub content: String,
    /// Identifier of the originating document (typically a file name)
    #[serde(alias = "source")]
    pub source_id: String,
    /// Stable ordinal position in the corpus
    pub chunk_index: usize,
    /// Arbitrary ingestion metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Chunk {
    pub fn new(content: impl Into<String>, source_id: impl Into<String>, chunk_index: usize) -> Self {
        Self {
            content: content.into(),
            source_id: source_id.into(),
            chunk_index,
            metadata: HashMap::new(),
        }
    }
}

/// A chunk as returned from retrieval, with its final relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub chunk_index: usize,
    pub content: String,
    pub source_id: String,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_deserializes_source_alias() {
        let json = r#"{"content": "text", "source": "who_guidelines.pdf", "chunk_index": 3}"#;
        let chunk: Chunk = serde_json::from_str(json).unwrap();
        assert_eq!(chunk.source_id, "who_guidelines.pdf");
        assert_eq!(chunk.chunk_index, 3);
        assert!(chunk.metadata.is_empty());
    }
}
