//! Retrieval and answer synthesis.
//!
//! [`QueryService`] embeds the query text, runs similarity search against
//! the repository's collection, and optionally asks the synthesis capability
//! for a grounded answer. Synthesis failure never fails the query: the
//! response degrades to raw results with `summary` absent and the failure
//! noted in `synthesis_error`.

use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::embedding::{embed_query, Embedder};
use crate::error::QueryError;
use crate::models::QueryResult;
use crate::store::VectorStore;
use crate::synthesis::Synthesizer;

/// Response to one query.
#[derive(Debug, Serialize)]
pub struct QueryOutcome {
    pub results: Vec<QueryResult>,
    /// Synthesized answer; absent when synthesis was not requested, not
    /// configured, had no results to ground on, or failed.
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis_error: Option<String>,
}

pub struct QueryService {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
}

impl QueryService {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            synthesizer: None,
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Answer one query against `collection_key`.
    ///
    /// Fails with [`QueryError::InvalidTopK`] for `top_k == 0` and
    /// propagates `CollectionNotFound` for repositories that were never
    /// ingested. An indexed but empty collection yields empty results.
    pub async fn query(
        &self,
        collection_key: &str,
        text: &str,
        top_k: usize,
        want_summary: bool,
    ) -> Result<QueryOutcome, QueryError> {
        if top_k == 0 {
            return Err(QueryError::InvalidTopK(top_k));
        }

        let vector = embed_query(self.embedder.as_ref(), text).await?;
        let results = self
            .store
            .similarity_search(collection_key, &vector, top_k)
            .await?;

        let (summary, synthesis_error) = match (&self.synthesizer, want_summary) {
            (Some(synthesizer), true) if !results.is_empty() => {
                match synthesizer.synthesize(text, &results).await {
                    Ok(answer) => (Some(answer), None),
                    Err(e) => {
                        warn!(collection = %collection_key, error = %e, "synthesis failed");
                        (None, Some(e.to_string()))
                    }
                }
            }
            _ => (None, None),
        };

        Ok(QueryOutcome {
            results,
            summary,
            synthesis_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use crate::error::EmbedError;
    use crate::models::{ChunkMetadata, EmbeddedChunk};
    use crate::store::memory::InMemoryStore;

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            // Deterministic 3-dim vector derived from text length.
            Ok(texts
                .iter()
                .map(|t| {
                    let n = t.len() as f32;
                    vec![1.0, n / (n + 1.0), 1.0 / (n + 1.0)]
                })
                .collect())
        }

        fn dims(&self) -> usize {
            3
        }
    }

    struct FixedSynthesizer(Result<String, String>);

    #[async_trait]
    impl Synthesizer for FixedSynthesizer {
        async fn synthesize(&self, _query: &str, _chunks: &[QueryResult]) -> anyhow::Result<String> {
            match &self.0 {
                Ok(answer) => Ok(answer.clone()),
                Err(message) => Err(anyhow!("{}", message)),
            }
        }
    }

    async fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.ensure_collection("acme_docs", 3, false).await.unwrap();
        let embedder = UnitEmbedder;
        let texts = ["spawning tasks", "shutdown", "configuration reference"];
        let vectors = embedder
            .embed(&texts.iter().map(|t| t.to_string()).collect::<Vec<_>>())
            .await
            .unwrap();
        let items: Vec<EmbeddedChunk> = texts
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, vector))| EmbeddedChunk {
                vector,
                text: text.to_string(),
                metadata: ChunkMetadata {
                    source_path: format!("docs/{}.md", i),
                    sequence_index: 0,
                    heading_trail: vec![],
                },
            })
            .collect();
        store.upsert("acme_docs", &items).await.unwrap();
        store
    }

    #[tokio::test]
    async fn exact_text_ranks_first() {
        let store = seeded_store().await;
        let service = QueryService::new(Arc::new(UnitEmbedder), store);

        let outcome = service
            .query("acme_docs", "spawning tasks", 3, false)
            .await
            .unwrap();
        assert_eq!(outcome.results[0].text, "spawning tasks");
        assert!(outcome.summary.is_none());
    }

    #[tokio::test]
    async fn zero_top_k_is_rejected() {
        let store = seeded_store().await;
        let service = QueryService::new(Arc::new(UnitEmbedder), store);

        let err = service.query("acme_docs", "x", 0, false).await.unwrap_err();
        assert!(matches!(err, QueryError::InvalidTopK(0)));
    }

    #[tokio::test]
    async fn unknown_collection_is_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let service = QueryService::new(Arc::new(UnitEmbedder), store);

        let err = service.query("nope", "x", 5, false).await.unwrap_err();
        assert!(err.is_collection_not_found());
    }

    #[tokio::test]
    async fn summary_comes_from_synthesizer() {
        let store = seeded_store().await;
        let service = QueryService::new(Arc::new(UnitEmbedder), store)
            .with_synthesizer(Arc::new(FixedSynthesizer(Ok("Use spawn.".to_string()))));

        let outcome = service
            .query("acme_docs", "spawning tasks", 2, true)
            .await
            .unwrap();
        assert_eq!(outcome.summary.as_deref(), Some("Use spawn."));
        assert!(outcome.synthesis_error.is_none());
    }

    #[tokio::test]
    async fn synthesis_failure_degrades_to_results() {
        let store = seeded_store().await;
        let service = QueryService::new(Arc::new(UnitEmbedder), store)
            .with_synthesizer(Arc::new(FixedSynthesizer(Err("model offline".to_string()))));

        let outcome = service
            .query("acme_docs", "spawning tasks", 5, true)
            .await
            .unwrap();
        assert!(!outcome.results.is_empty());
        assert!(outcome.summary.is_none());
        assert_eq!(outcome.synthesis_error.as_deref(), Some("model offline"));
    }

    #[tokio::test]
    async fn empty_collection_yields_no_results_and_no_summary() {
        let store = Arc::new(InMemoryStore::new());
        store.ensure_collection("empty", 3, false).await.unwrap();
        let service = QueryService::new(Arc::new(UnitEmbedder), store)
            .with_synthesizer(Arc::new(FixedSynthesizer(Ok("unused".to_string()))));

        let outcome = service.query("empty", "anything", 5, true).await.unwrap();
        assert!(outcome.results.is_empty());
        assert!(outcome.summary.is_none());
    }
}
