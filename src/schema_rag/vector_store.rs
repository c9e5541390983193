//! Schema Vector Store
//!
//! In-memory store of one embedding per table with exhaustive cosine search. Schema
//! catalogues are small (hundreds of tables), so a linear scan is used.

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub type Embedding = Vec<f32>;

/// Embedding of one table's description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaEmbedding {
    pub table_name: String,
    pub vector: Embedding,
    pub source_text: String,
}

/// Search hit: position of the embedding in the store and its similarity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    pub position: usize,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct EmbeddingStore {
    embeddings: Vec<SchemaEmbedding>,
    dimension: Option<usize>,
}

impl EmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, embedding: SchemaEmbedding) -> Result<()> {
        match self.dimension {
            Some(dimension) if dimension != embedding.vector.len() => {
                return Err(QueryError::Unknown(format!(
                    "Embedding dimension {} for table '{}' doesn't match store dimension {}",
                    embedding.vector.len(),
                    embedding.table_name,
                    dimension
                )));
            }
            None => self.dimension = Some(embedding.vector.len()),
            _ => {}
        }
        self.embeddings.push(embedding);
        Ok(())
    }

    pub fn get(&self, position: usize) -> Option<&SchemaEmbedding> {
        self.embeddings.get(position)
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    /// Hits with similarity >= `min_score`, best first, at most `top_k`.
    /// Ties keep insertion order so results are deterministic.
    pub fn search(&self, query: &[f32], min_score: f32, top_k: usize) -> Result<Vec<VectorHit>> {
        if let Some(dimension) = self.dimension {
            if query.len() != dimension {
                return Err(QueryError::Unknown(format!(
                    "query vector has {} dimensions, index has {}",
                    query.len(),
                    dimension
                )));
            }
        }

        let mut hits: Vec<VectorHit> = self
            .embeddings
            .iter()
            .enumerate()
            .map(|(position, e)| VectorHit {
                position,
                score: cosine_similarity(query, &e.vector),
            })
            .filter(|hit| hit.score >= min_score)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// Cosine of the angle between two vectors; 0 for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (dot, sq_a, sq_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, sq_a, sq_b), (x, y)| {
            (dot + x * y, sq_a + x * x, sq_b + y * y)
        });
    let denominator = sq_a.sqrt() * sq_b.sqrt();
    if denominator == 0.0 {
        0.0
    } else {
        dot / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(name: &str, vector: Vec<f32>) -> SchemaEmbedding {
        SchemaEmbedding {
            table_name: name.to_string(),
            vector,
            source_text: name.to_string(),
        }
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[2.0, 0.0], &[3.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 4.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_search_threshold_order_and_cap() {
        let mut store = EmbeddingStore::new();
        store.add(embedding("far", vec![0.0, 1.0])).unwrap();
        store.add(embedding("near", vec![1.0, 0.1])).unwrap();
        store.add(embedding("mid", vec![1.0, 1.0])).unwrap();

        let hits = store.search(&[1.0, 0.0], 0.3, 10).unwrap();
        let names: Vec<_> = hits
            .iter()
            .map(|h| store.get(h.position).unwrap().table_name.as_str())
            .collect();
        assert_eq!(names, vec!["near", "mid"]);

        let capped = store.search(&[1.0, 0.0], 0.3, 1).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let mut store = EmbeddingStore::new();
        store.add(embedding("a", vec![1.0, 0.0])).unwrap();
        assert!(store.add(embedding("b", vec![1.0])).is_err());
        assert!(store.search(&[1.0, 0.0, 0.0], 0.0, 5).is_err());
    }
}
