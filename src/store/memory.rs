//! In-memory [`VectorStore`] for tests.
//!
//! Collections live in a `HashMap` behind `std::sync::RwLock`; search is
//! brute-force cosine similarity, the same ranking the SQLite store uses.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{EmbeddedChunk, QueryResult};

use super::{cosine_similarity, VectorStore};

struct Collection {
    dims: usize,
    items: Vec<EmbeddedChunk>,
}

/// Non-durable store backed by process memory.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn ensure_collection(
        &self,
        key: &str,
        dims: usize,
        drop_existing: bool,
    ) -> Result<(), StoreError> {
        let mut collections = self.collections.write().unwrap();
        if let Some(existing) = collections.get(key) {
            if drop_existing {
                collections.remove(key);
            } else if existing.dims != dims {
                return Err(StoreError::DimensionMismatch {
                    collection: key.to_string(),
                    existing: existing.dims,
                    requested: dims,
                });
            } else {
                return Ok(());
            }
        }
        collections.insert(
            key.to_string(),
            Collection {
                dims,
                items: Vec::new(),
            },
        );
        Ok(())
    }

    async fn upsert(&self, key: &str, items: &[EmbeddedChunk]) -> Result<(), StoreError> {
        let mut collections = self.collections.write().unwrap();
        let collection = collections
            .get_mut(key)
            .ok_or_else(|| StoreError::CollectionNotFound(key.to_string()))?;
        for item in items {
            if item.vector.len() != collection.dims {
                return Err(StoreError::DimensionMismatch {
                    collection: key.to_string(),
                    existing: collection.dims,
                    requested: item.vector.len(),
                });
            }
        }
        collection.items.extend_from_slice(items);
        Ok(())
    }

    async fn similarity_search(
        &self,
        key: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryResult>, StoreError> {
        let collections = self.collections.read().unwrap();
        let collection = collections
            .get(key)
            .ok_or_else(|| StoreError::CollectionNotFound(key.to_string()))?;

        let mut results: Vec<QueryResult> = collection
            .items
            .iter()
            .map(|item| QueryResult {
                text: item.text.clone(),
                source_path: item.metadata.source_path.clone(),
                score: cosine_similarity(query_vector, &item.vector),
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }

    async fn collection_exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.collections.read().unwrap().contains_key(key))
    }

    async fn drop_collection(&self, key: &str) -> Result<(), StoreError> {
        self.collections.write().unwrap().remove(key);
        Ok(())
    }

    async fn collection_len(&self, key: &str) -> Result<usize, StoreError> {
        let collections = self.collections.read().unwrap();
        let collection = collections
            .get(key)
            .ok_or_else(|| StoreError::CollectionNotFound(key.to_string()))?;
        Ok(collection.items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn item(text: &str, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            vector,
            text: text.to_string(),
            metadata: ChunkMetadata {
                source_path: "docs/a.md".to_string(),
                sequence_index: 0,
                heading_trail: vec![],
            },
        }
    }

    #[tokio::test]
    async fn upsert_requires_ensure() {
        let store = InMemoryStore::new();
        let err = store
            .upsert("missing", &[item("x", vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension() {
        let store = InMemoryStore::new();
        store.ensure_collection("c", 3, false).await.unwrap();
        let err = store
            .upsert("c", &[item("bad", vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                existing: 3,
                requested: 2,
                ..
            }
        ));
        assert_eq!(store.collection_len("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn search_on_empty_collection_returns_empty() {
        let store = InMemoryStore::new();
        store.ensure_collection("c", 2, false).await.unwrap();
        let results = store.similarity_search("c", &[1.0, 0.0], 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn search_on_missing_collection_errors() {
        let store = InMemoryStore::new();
        let err = store
            .similarity_search("missing", &[1.0, 0.0], 5)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn ranks_by_descending_similarity() {
        let store = InMemoryStore::new();
        store.ensure_collection("c", 2, false).await.unwrap();
        store
            .upsert(
                "c",
                &[
                    item("orthogonal", vec![0.0, 1.0]),
                    item("exact", vec![1.0, 0.0]),
                    item("close", vec![0.9, 0.1]),
                ],
            )
            .await
            .unwrap();

        let results = store.similarity_search("c", &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "exact");
        assert_eq!(results[1].text, "close");
    }

    #[tokio::test]
    async fn dimension_mismatch_without_drop() {
        let store = InMemoryStore::new();
        store.ensure_collection("c", 4, false).await.unwrap();

        let err = store.ensure_collection("c", 8, false).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                existing: 4,
                requested: 8,
                ..
            }
        ));

        // With drop_existing the collection is rebuilt at the new dimension.
        store.ensure_collection("c", 8, true).await.unwrap();
        assert_eq!(store.collection_len("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn drop_is_idempotent() {
        let store = InMemoryStore::new();
        store.ensure_collection("c", 2, false).await.unwrap();
        store.drop_collection("c").await.unwrap();
        store.drop_collection("c").await.unwrap();
        assert!(!store.collection_exists("c").await.unwrap());
    }
}
