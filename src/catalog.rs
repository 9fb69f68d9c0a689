//! Repository metadata catalog.
//!
//! Thin CRUD layer over the `repositories` table. The ingestion pipeline
//! records each repository's lifecycle here (`in_progress`, `completed`,
//! `failed`) along with token and code-snippet counts for listing.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::RepoRecord;

pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a record for `repo_path`, or reset an existing one back to
    /// `in_progress` with zeroed counts. Returns the record id.
    pub async fn upsert(
        &self,
        name: &str,
        description: &str,
        repo_path: &str,
        url: &str,
    ) -> Result<String> {
        let now = Utc::now().timestamp();

        if let Some(existing) = self.get_by_path(repo_path).await? {
            sqlx::query(
                "UPDATE repositories
                 SET name = ?, description = ?, url = ?, status = ?,
                     token_count = 0, snippet_count = 0, updated_at = ?
                 WHERE id = ?",
            )
            .bind(name)
            .bind(description)
            .bind(url)
            .bind(STATUS_IN_PROGRESS)
            .bind(now)
            .bind(&existing.id)
            .execute(&self.pool)
            .await?;
            return Ok(existing.id);
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO repositories
             (id, name, description, repo_path, url, status, token_count, snippet_count, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(description)
        .bind(repo_path)
        .bind(url)
        .bind(STATUS_IN_PROGRESS)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn update_status(&self, id: &str, status: &str) -> Result<()> {
        sqlx::query("UPDATE repositories SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_counts(&self, id: &str, token_count: i64, snippet_count: i64) -> Result<()> {
        sqlx::query(
            "UPDATE repositories SET token_count = ?, snippet_count = ?, updated_at = ? WHERE id = ?",
        )
        .bind(token_count)
        .bind(snippet_count)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<RepoRecord>> {
        let rows = sqlx::query(
            "SELECT id, name, description, repo_path, url, status,
                    token_count, snippet_count, created_at, updated_at
             FROM repositories ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    pub async fn get_by_path(&self, repo_path: &str) -> Result<Option<RepoRecord>> {
        let row = sqlx::query(
            "SELECT id, name, description, repo_path, url, status,
                    token_count, snippet_count, created_at, updated_at
             FROM repositories WHERE repo_path = ?",
        )
        .bind(repo_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<RepoRecord>> {
        let row = sqlx::query(
            "SELECT id, name, description, repo_path, url, status,
                    token_count, snippet_count, created_at, updated_at
             FROM repositories WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    /// Delete the record. Returns false if the id was unknown.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> RepoRecord {
    RepoRecord {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        repo_path: row.get("repo_path"),
        url: row.get("url"),
        status: row.get("status"),
        token_count: row.get("token_count"),
        snippet_count: row.get("snippet_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};

    async fn catalog() -> (Catalog, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect_path(&dir.path().join("catalog.db"))
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (Catalog::new(pool), dir)
    }

    #[tokio::test]
    async fn upsert_and_complete_lifecycle() {
        let (catalog, _dir) = catalog().await;

        let id = catalog
            .upsert(
                "Tokio",
                "tokio_rs/tokio documentation",
                "tokio-rs/tokio",
                "https://github.com/tokio-rs/tokio",
            )
            .await
            .unwrap();

        let record = catalog.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.status, STATUS_IN_PROGRESS);
        assert_eq!(record.token_count, 0);

        catalog.update_counts(&id, 1234, 17).await.unwrap();
        catalog.update_status(&id, STATUS_COMPLETED).await.unwrap();

        let record = catalog.get_by_path("tokio-rs/tokio").await.unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.status, STATUS_COMPLETED);
        assert_eq!(record.token_count, 1234);
        assert_eq!(record.snippet_count, 17);
    }

    #[tokio::test]
    async fn upsert_same_path_reuses_record() {
        let (catalog, _dir) = catalog().await;

        let first = catalog
            .upsert("Docs", "", "acme/docs", "https://github.com/acme/docs")
            .await
            .unwrap();
        catalog.update_counts(&first, 500, 3).await.unwrap();
        catalog.update_status(&first, STATUS_COMPLETED).await.unwrap();

        let second = catalog
            .upsert("Docs", "", "acme/docs", "https://github.com/acme/docs")
            .await
            .unwrap();
        assert_eq!(first, second);

        // Re-ingestion resets status and counts.
        let record = catalog.get_by_id(&second).await.unwrap().unwrap();
        assert_eq!(record.status, STATUS_IN_PROGRESS);
        assert_eq!(record.token_count, 0);
        assert_eq!(catalog.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_and_delete() {
        let (catalog, _dir) = catalog().await;

        let a = catalog
            .upsert("A", "", "acme/a", "https://github.com/acme/a")
            .await
            .unwrap();
        catalog
            .upsert("B", "", "acme/b", "https://github.com/acme/b")
            .await
            .unwrap();
        assert_eq!(catalog.list().await.unwrap().len(), 2);

        assert!(catalog.delete(&a).await.unwrap());
        assert!(!catalog.delete(&a).await.unwrap());
        assert_eq!(catalog.list().await.unwrap().len(), 1);
        assert!(catalog.get_by_id(&a).await.unwrap().is_none());
    }
}
