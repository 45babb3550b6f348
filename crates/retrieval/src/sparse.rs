//! Sparse lexical scoring (Okapi BM25)
//!
//! Scores the full corpus against a query and returns one score per chunk,
//! aligned to `chunk_index`. Indexing and querying share `tokenize`; the
//! scores are only meaningful while that stays true.

use std::collections::HashMap;

/// Lowercase, split on non-alphanumeric runs, drop empties.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Inverted-index BM25 scorer over the chunk corpus.
pub struct Bm25Index {
    /// term -> (chunk_index -> term frequency)
    index: HashMap<String, HashMap<usize, u32>>,
    doc_lengths: Vec<usize>,
    avg_doc_length: f32,
    k1: f32,
    b: f32,
}

impl Bm25Index {
    /// Build the index from corpus chunk texts, positionally aligned to
    /// `chunk_index`.
    pub fn build<'a, I>(texts: I, k1: f32, b: f32) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut index: HashMap<String, HashMap<usize, u32>> = HashMap::new();
        let mut doc_lengths = Vec::new();

        for (doc_id, text) in texts.into_iter().enumerate() {
            let tokens = tokenize(text);
            doc_lengths.push(tokens.len());
            for token in tokens {
                *index.entry(token).or_default().entry(doc_id).or_insert(0) += 1;
            }
        }

        let avg_doc_length = if doc_lengths.is_empty() {
            0.0
        } else {
            doc_lengths.iter().sum::<usize>() as f32 / doc_lengths.len() as f32
        };

        tracing::debug!(
            docs = doc_lengths.len(),
            terms = index.len(),
            avg_doc_length,
            "Built BM25 index"
        );

        Self {
            index,
            doc_lengths,
            avg_doc_length,
            k1,
            b,
        }
    }

    /// Score every corpus chunk against the query. The returned vector has
    /// one entry per chunk, aligned to `chunk_index`. An empty token set
    /// yields all zeros.
    pub fn score_all(&self, query: &str) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.doc_lengths.len()];
        let tokens = tokenize(query);
        if tokens.is_empty() || self.doc_lengths.is_empty() {
            return scores;
        }

        let n = self.doc_lengths.len() as f32;

        for term in tokens {
            let Some(postings) = self.index.get(&term) else {
                continue;
            };
            let df = postings.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for (&doc_id, &tf) in postings {
                let tf = tf as f32;
                let doc_len = self.doc_lengths[doc_id] as f32;
                let tf_norm = tf * (self.k1 + 1.0)
                    / (tf + self.k1 * (1.0 - self.b + self.b * doc_len / self.avg_doc_length));
                scores[doc_id] += idf * tf_norm;
            }
        }

        scores
    }

    pub fn doc_count(&self) -> usize {
        self.doc_lengths.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(texts: &[&str]) -> Bm25Index {
        Bm25Index::build(texts.iter().copied(), 1.2, 0.75)
    }

    #[test]
    fn test_tokenize_lowercase_split_nonalnum() {
        assert_eq!(
            tokenize("Oral Iron, 60mg/day (ferrous-sulfate)!"),
            vec!["oral", "iron", "60mg", "day", "ferrous", "sulfate"]
        );
    }

    #[test]
    fn test_tokenize_empty_and_punctuation_only() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("--- ... ///").is_empty());
    }

    #[test]
    fn test_score_all_aligned_to_corpus() {
        let idx = index(&[
            "magnesium sulfate for severe preeclampsia",
            "iron supplementation during pregnancy",
            "magnesium rich diet guidance",
        ]);

        let scores = idx.score_all("magnesium sulfate");
        assert_eq!(scores.len(), 3);
        assert!(scores[0] > scores[2], "both terms beat one");
        assert!(scores[2] > 0.0);
        assert_eq!(scores[1], 0.0);
    }

    #[test]
    fn test_score_all_empty_query_is_all_zero() {
        let idx = index(&["some text", "other text"]);
        let scores = idx.score_all("!!! ???");
        assert_eq!(scores, vec![0.0, 0.0]);
    }

    #[test]
    fn test_score_all_unknown_terms() {
        let idx = index(&["anemia screening"]);
        let scores = idx.score_all("zzz qqq");
        assert_eq!(scores, vec![0.0]);
    }

    #[test]
    fn test_empty_corpus() {
        let idx = index(&[]);
        assert!(idx.score_all("anything").is_empty());
    }
}
