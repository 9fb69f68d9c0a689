//! Core data models used throughout docdex.
//!
//! These types represent the documents, chunks, and results that flow
//! through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// A raw document as returned by the fetch capability, before chunking.
/// Lives only for the duration of one ingestion run.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Path of the file within the repository (e.g. `docs/guide.md`).
    pub path: String,
    /// Full file text.
    pub text: String,
}

/// A chunk of a document, ready for embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub source_path: String,
    /// Position of this chunk within its source document, starting at 0.
    pub sequence_index: usize,
    /// Nested section titles leading to this chunk, outermost first.
    pub heading_trail: Vec<String>,
}

/// Metadata stored alongside each vector in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_path: String,
    pub sequence_index: usize,
    pub heading_trail: Vec<String>,
}

/// A chunk paired with its embedding vector, as stored in a collection.
///
/// The vector length must equal the collection's fixed dimensionality;
/// the store enforces this at upsert time.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A single similarity search hit.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub text: String,
    pub source_path: String,
    /// Cosine similarity against the query vector, higher is closer.
    pub score: f64,
}

/// Terminal result of one ingestion run.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// The collection already existed and `force` was not set; nothing ran.
    Exists { collection_key: String },
    /// The full pipeline ran and the collection was (re)built.
    Completed {
        collection_key: String,
        chunk_count: usize,
        /// Whitespace tokens across all fetched documents, for bookkeeping.
        token_count: usize,
        /// Fenced code blocks across all fetched documents.
        snippet_count: usize,
    },
}

impl IngestOutcome {
    pub fn collection_key(&self) -> &str {
        match self {
            IngestOutcome::Exists { collection_key } => collection_key,
            IngestOutcome::Completed { collection_key, .. } => collection_key,
        }
    }
}

/// A repository record in the metadata catalog.
#[derive(Debug, Clone, Serialize)]
pub struct RepoRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    /// `owner/repo` path.
    pub repo_path: String,
    pub url: String,
    /// One of `in_progress`, `completed`, `failed`.
    pub status: String,
    pub token_count: i64,
    pub snippet_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}
