//! SQLite-backed [`VectorStore`].
//!
//! Collections are rows in `vector_collections`; each embedded chunk is a
//! row in `vector_chunks` with its vector stored as a little-endian f32
//! BLOB. Search loads the collection's vectors and ranks by cosine
//! similarity in process; repository documentation collections are small
//! enough that a brute-force scan beats maintaining an index.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ChunkMetadata, EmbeddedChunk, QueryResult};

use super::{blob_to_vec, cosine_similarity, vec_to_blob, VectorStore};

/// Durable vector store sharing the application's SQLite pool.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn collection_dims(&self, key: &str) -> Result<Option<usize>, StoreError> {
        let dims: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM vector_collections WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(dims.map(|d| d as usize))
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn ensure_collection(
        &self,
        key: &str,
        dims: usize,
        drop_existing: bool,
    ) -> Result<(), StoreError> {
        if let Some(existing) = self.collection_dims(key).await? {
            if !drop_existing {
                if existing != dims {
                    return Err(StoreError::DimensionMismatch {
                        collection: key.to_string(),
                        existing,
                        requested: dims,
                    });
                }
                return Ok(());
            }
            self.drop_collection(key).await?;
        }

        sqlx::query("INSERT INTO vector_collections (key, dims, created_at) VALUES (?, ?, ?)")
            .bind(key)
            .bind(dims as i64)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert(&self, key: &str, items: &[EmbeddedChunk]) -> Result<(), StoreError> {
        let dims = self
            .collection_dims(key)
            .await?
            .ok_or_else(|| StoreError::CollectionNotFound(key.to_string()))?;

        for item in items {
            if item.vector.len() != dims {
                return Err(StoreError::DimensionMismatch {
                    collection: key.to_string(),
                    existing: dims,
                    requested: item.vector.len(),
                });
            }
        }

        let mut tx = self.pool.begin().await?;
        for item in items {
            let heading_trail = serde_json::to_string(&item.metadata.heading_trail)
                .map_err(|e| StoreError::Backend(e.into()))?;
            sqlx::query(
                r#"
                INSERT INTO vector_chunks
                    (id, collection_key, source_path, sequence_index, heading_trail, text, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(key)
            .bind(&item.metadata.source_path)
            .bind(item.metadata.sequence_index as i64)
            .bind(heading_trail)
            .bind(&item.text)
            .bind(vec_to_blob(&item.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn similarity_search(
        &self,
        key: &str,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryResult>, StoreError> {
        if self.collection_dims(key).await?.is_none() {
            return Err(StoreError::CollectionNotFound(key.to_string()));
        }

        let rows = sqlx::query(
            "SELECT text, source_path, embedding FROM vector_chunks WHERE collection_key = ?",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<QueryResult> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                QueryResult {
                    text: row.get("text"),
                    source_path: row.get("source_path"),
                    score: cosine_similarity(query_vector, &blob_to_vec(&blob)),
                }
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
        Ok(self.collection_dims(key).await?.is_some())
    }

    async fn drop_collection(&self, key: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM vector_chunks WHERE collection_key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM vector_collections WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn collection_len(&self, key: &str) -> Result<usize, StoreError> {
        if self.collection_dims(key).await?.is_none() {
            return Err(StoreError::CollectionNotFound(key.to_string()));
        }
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vector_chunks WHERE collection_key = ?")
                .bind(key)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }
}

/// Load stored chunks back out of a collection, ordered by source path and
/// sequence index.
pub async fn load_collection(
    pool: &SqlitePool,
    key: &str,
) -> Result<Vec<EmbeddedChunk>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT source_path, sequence_index, heading_trail, text, embedding
        FROM vector_chunks WHERE collection_key = ?
        ORDER BY source_path, sequence_index
        "#,
    )
    .bind(key)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let trail_json: String = row.get("heading_trail");
            let heading_trail = serde_json::from_str(&trail_json)
                .map_err(|e| StoreError::Backend(e.into()))?;
            let blob: Vec<u8> = row.get("embedding");
            Ok(EmbeddedChunk {
                vector: blob_to_vec(&blob),
                text: row.get("text"),
                metadata: ChunkMetadata {
                    source_path: row.get("source_path"),
                    sequence_index: row.get::<i64, _>("sequence_index") as usize,
                    heading_trail,
                },
            })
        })
        .collect()
}
