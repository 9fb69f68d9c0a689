use anyhow::Result;
use sqlx::SqlitePool;

/// Create all tables. Idempotent, safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Repository catalog
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            repo_path TEXT NOT NULL UNIQUE,
            url TEXT NOT NULL,
            status TEXT NOT NULL,
            token_count INTEGER NOT NULL DEFAULT 0,
            snippet_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector collections, one per ingested repository
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_collections (
            key TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Embedded chunks; vectors are little-endian f32 blobs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_chunks (
            id TEXT PRIMARY KEY,
            collection_key TEXT NOT NULL,
            source_path TEXT NOT NULL,
            sequence_index INTEGER NOT NULL,
            heading_trail TEXT NOT NULL DEFAULT '[]',
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (collection_key) REFERENCES vector_collections(key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vector_chunks_collection ON vector_chunks(collection_key)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_repositories_status ON repositories(status)")
        .execute(pool)
        .await?;

    Ok(())
}
