//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait owns collection lifecycle (create, replace,
//! drop, existence) and nearest-neighbour search within one collection.
//! Collections are keyed by the repository collection key and never mix
//! vector dimensionalities. Two implementations ship:
//!
//! - [`memory::InMemoryStore`]: brute-force, for tests
//! - [`sqlite::SqliteStore`]: durable, vectors stored as f32 BLOBs
//!
//! Ranking is descending cosine similarity and is consistent within a
//! collection across calls.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{EmbeddedChunk, QueryResult};

/// Abstract vector store backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if absent. With `drop_existing`, an existing
    /// collection is dropped and recreated first. Without it, an existing
    /// collection with a different dimension fails with
    /// [`StoreError::DimensionMismatch`].
    async fn ensure_collection(
        &self,
        key: &str,
        dims: usize,
        drop_existing: bool,
    ) -> Result<(), StoreError>;

    /// Append items to an existing collection. Fails with
    /// [`StoreError::CollectionNotFound`] when `ensure_collection` was
    /// never called for `key`.
    async fn upsert(&self, key: &str, items: &[EmbeddedChunk]) -> Result<(), StoreError>;

    /// Return up to `top_k` nearest items, ranked by descending similarity.
    /// An existing-but-empty collection yields an empty list, not an error.
    async fn similarity_search(
        &self,
        key: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryResult>, StoreError>;

    async fn collection_exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Remove the collection and all its items. Removing a nonexistent
    /// collection is a no-op.
    async fn drop_collection(&self, key: &str) -> Result<(), StoreError>;

    /// Number of stored items, for bookkeeping and tests.
    async fn collection_len(&self, key: &str) -> Result<usize, StoreError>;
}

/// Cosine similarity between two vectors; 0.0 for mismatched lengths or
/// zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip() {
        let v = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn cosine_basics() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
