//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Every stage surfaces a typed error so callers can distinguish
//! caller mistakes (bad chunk parameters, unknown collection) from
//! external failures (GitHub unreachable, embedding API down) and react
//! accordingly. Command-level `run_*` functions still return
//! `anyhow::Result` and wrap these at the boundary.

use thiserror::Error;

/// Failure fetching documents from the source host.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The repository reference could not be parsed into `owner/repo`.
    #[error("invalid repository reference: {0}")]
    InvalidReference(String),

    /// The repository does not exist (or is not visible with the current token).
    #[error("repository not found: {0}")]
    NotFound(String),

    /// Authentication was required or rejected by the source host.
    #[error("authentication failed for {0}")]
    AuthRequired(String),

    /// Network error or server-side failure; a later retry may succeed.
    #[error("transient fetch error: {0}")]
    Transient(String),
}

/// Failure producing embedding vectors.
///
/// `retryable` distinguishes rate limits and transient network errors
/// (already retried internally with backoff before this surfaces) from
/// permanent causes like invalid input or a rejected API key.
#[derive(Debug, Error)]
#[error("embedding failed (retryable={retryable}): {message}")]
pub struct EmbedError {
    pub retryable: bool,
    pub message: String,
}

impl EmbedError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

/// Failure in the vector store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named collection does not exist. For queries this is the
    /// "repository not yet indexed" condition.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// An existing collection was created with a different vector dimension.
    #[error("collection {collection} has dimension {existing}, requested {requested}")]
    DimensionMismatch {
        collection: String,
        existing: usize,
        requested: usize,
    },

    /// Backend failure (SQLite I/O, corrupt blob, ...).
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.into())
    }
}

/// Terminal failure of an ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Bad chunking parameters; checked before the run starts.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Another run holds the lease for the same collection key.
    #[error("ingestion already in progress for {0}")]
    InProgress(String),

    /// The run was cancelled via [`IngestPipeline::cancel`](crate::ingest::IngestPipeline::cancel).
    #[error("ingestion cancelled")]
    Cancelled,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    /// Storage failure. After a forced re-ingestion this can leave the
    /// collection empty or partial; the whole run must be retried.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Failure answering a query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("top_k must be >= 1, got {0}")]
    InvalidTopK(usize),

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl QueryError {
    /// True when the failure means the repository has not been indexed yet,
    /// so a caller can prompt ingestion instead of reporting an error.
    pub fn is_collection_not_found(&self) -> bool {
        matches!(self, QueryError::Storage(StoreError::CollectionNotFound(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_error_display_marks_retryable() {
        let e = EmbedError::retryable("rate limited");
        assert!(e.to_string().contains("retryable=true"));
        let e = EmbedError::fatal("bad key");
        assert!(e.to_string().contains("retryable=false"));
    }

    #[test]
    fn query_error_classifies_missing_collection() {
        let e = QueryError::Storage(StoreError::CollectionNotFound("acme_docs".into()));
        assert!(e.is_collection_not_found());
        let e = QueryError::InvalidTopK(0);
        assert!(!e.is_collection_not_found());
    }
}
