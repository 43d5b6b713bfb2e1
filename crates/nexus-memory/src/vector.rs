//! Vector similarity search.
//!
//! [`VectorIndex`] is the narrow seam the store searches through. The
//! bundled [`BruteForceIndex`] scores every vector owned by the requested
//! player with cosine similarity, which is plenty for the few thousand
//! memories a world accumulates.

use std::collections::BTreeMap;

use nexus_types::{EmbeddingId, PlayerId};

use crate::error::MemoryError;

/// One search result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    /// The matching embedding.
    pub id: EmbeddingId,
    /// Cosine similarity to the query, in `[-1, 1]`.
    pub score: f64,
}

/// Nearest-neighbour search over embeddings, filtered by owner.
pub trait VectorIndex: Send {
    /// Add a vector owned by `owner`.
    fn insert(
        &mut self,
        id: EmbeddingId,
        owner: PlayerId,
        vector: Vec<f32>,
    ) -> Result<(), MemoryError>;

    /// Return up to `limit` vectors owned by `owner`, best match first.
    fn search(&self, query: &[f32], owner: PlayerId, limit: usize) -> Vec<SearchHit>;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    /// Whether the index is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Entry {
    owner: PlayerId,
    vector: Vec<f32>,
    norm: f64,
}

/// Exhaustive cosine-similarity index.
#[derive(Default)]
pub struct BruteForceIndex {
    dimension: Option<usize>,
    entries: BTreeMap<EmbeddingId, Entry>,
}

impl BruteForceIndex {
    /// Create an empty index; the first insert fixes the dimension.
    pub fn new() -> Self {
        Self::default()
    }
}

fn norm(v: &[f32]) -> f64 {
    v.iter()
        .map(|x| f64::from(*x) * f64::from(*x))
        .sum::<f64>()
        .sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum()
}

impl VectorIndex for BruteForceIndex {
    fn insert(
        &mut self,
        id: EmbeddingId,
        owner: PlayerId,
        vector: Vec<f32>,
    ) -> Result<(), MemoryError> {
        let expected = *self.dimension.get_or_insert(vector.len());
        if vector.len() != expected {
            return Err(MemoryError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        if self.entries.contains_key(&id) {
            return Err(MemoryError::DuplicateEmbedding(id));
        }
        let norm = norm(&vector);
        self.entries.insert(
            id,
            Entry {
                owner,
                vector,
                norm,
            },
        );
        Ok(())
    }

    fn search(&self, query: &[f32], owner: PlayerId, limit: usize) -> Vec<SearchHit> {
        let query_norm = norm(query);
        if query_norm <= f64::EPSILON || self.dimension.is_some_and(|d| d != query.len()) {
            return Vec::new();
        }
        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .filter(|(_, e)| e.owner == owner && e.norm > f64::EPSILON)
            .map(|(id, e)| SearchHit {
                id: *id,
                score: dot(query, &e.vector) / (query_norm * e.norm),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        hits
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
