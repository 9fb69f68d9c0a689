//! Ingestion orchestration.
//!
//! [`IngestPipeline::run`] drives one repository end to end: fetch the
//! markdown files, chunk them, embed the chunks, then write the collection.
//! Each run holds an exclusive per-key lease so two runs can never race on
//! the same collection; runs for distinct repositories proceed in parallel.
//!
//! Idempotency: without `force`, a repository whose collection already
//! exists short-circuits to [`IngestOutcome::Exists`] with no fetching or
//! embedding. With `force`, the collection is dropped and rebuilt.
//!
//! Storage is sequenced after all embedding succeeds, so a failed run never
//! leaves a partially written new collection. The one exception is a forced
//! re-ingestion that fails during storage, after the old collection was
//! already dropped; callers must retry the whole run.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::catalog::{self, Catalog};
use crate::chunk::{chunk_documents, count_code_blocks, count_tokens};
use crate::config::{ChunkingConfig, Config};
use crate::embedding::{embed_batched, Embedder};
use crate::error::IngestError;
use crate::fetch::DocumentFetcher;
use crate::models::{Chunk, ChunkMetadata, EmbeddedChunk, IngestOutcome};
use crate::progress::{ProgressEvent, ProgressReporter, ProgressStage, ProgressStatus};
use crate::repo_ref::RepoRef;
use crate::store::VectorStore;

pub struct IngestPipeline {
    fetcher: Arc<dyn DocumentFetcher>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    catalog: Option<Catalog>,
    chunking: ChunkingConfig,
    batch_size: usize,
    concurrency: usize,
    // Per-key leases; the flag doubles as the run's cancellation signal.
    leases: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl IngestPipeline {
    pub fn new(
        fetcher: Arc<dyn DocumentFetcher>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        config: &Config,
    ) -> Self {
        Self {
            fetcher,
            embedder,
            store,
            catalog: None,
            chunking: config.chunking.clone(),
            batch_size: config.embedding.batch_size,
            concurrency: config.embedding.concurrency,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a metadata catalog. Catalog writes are best-effort and never
    /// fail a run.
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Request cancellation of a running ingestion. Returns false when no
    /// run holds the lease for `collection_key`. The run stops at its next
    /// stage boundary, or between embedding batches, with
    /// [`IngestError::Cancelled`].
    pub fn cancel(&self, collection_key: &str) -> bool {
        let leases = self.leases.lock().expect("lease map lock poisoned");
        match leases.get(collection_key) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Run one ingestion. Fails fast with [`IngestError::InProgress`] when
    /// another run already holds the lease for the same repository.
    pub async fn run(
        &self,
        repo: &RepoRef,
        force: bool,
        reporter: &dyn ProgressReporter,
    ) -> Result<IngestOutcome, IngestError> {
        // Chunking parameters are a precondition, checked before anything runs.
        chunk_documents(&[], self.chunking.max_chars, self.chunking.overlap_chars)?;

        let key = repo.collection_key();
        let (_lease, cancel) = self.acquire_lease(&key)?;

        if !force && self.store.collection_exists(&key).await? {
            info!(collection = %key, "already indexed, skipping");
            return Ok(IngestOutcome::Exists {
                collection_key: key,
            });
        }

        let record_id = self.record_start(repo).await;
        let result = self.run_stages(repo, &key, force, reporter, &cancel).await;
        self.record_finish(record_id.as_deref(), &result).await;
        result
    }

    fn acquire_lease(&self, key: &str) -> Result<(LeaseGuard<'_>, Arc<AtomicBool>), IngestError> {
        let mut leases = self.leases.lock().expect("lease map lock poisoned");
        if leases.contains_key(key) {
            return Err(IngestError::InProgress(key.to_string()));
        }
        let cancel = Arc::new(AtomicBool::new(false));
        leases.insert(key.to_string(), cancel.clone());
        Ok((
            LeaseGuard {
                leases: &self.leases,
                key: key.to_string(),
            },
            cancel,
        ))
    }

    async fn run_stages(
        &self,
        repo: &RepoRef,
        key: &str,
        force: bool,
        reporter: &dyn ProgressReporter,
        cancel: &AtomicBool,
    ) -> Result<IngestOutcome, IngestError> {
        // Fetching
        reporter.report(ProgressEvent::new(
            ProgressStage::Fetch,
            ProgressStatus::Pending,
            0,
            format!("fetching {}", repo.path()),
        ));
        let on_file = |done: usize, total: usize, path: &str| {
            let percent = if total == 0 {
                100
            } else {
                (done * 100 / total) as u8
            };
            reporter.report(ProgressEvent::new(
                ProgressStage::Fetch,
                ProgressStatus::InProgress,
                percent,
                format!("{}/{} files ({})", done, total, path),
            ));
        };
        let documents = match self.fetcher.fetch(repo, &on_file).await {
            Ok(documents) => documents,
            Err(e) => {
                reporter.report(ProgressEvent::new(
                    ProgressStage::Fetch,
                    ProgressStatus::Error,
                    0,
                    e.to_string(),
                ));
                return Err(e.into());
            }
        };
        reporter.report(ProgressEvent::new(
            ProgressStage::Fetch,
            ProgressStatus::Completed,
            100,
            format!("{} files fetched", documents.len()),
        ));
        check_cancelled(cancel)?;

        // Chunking runs synchronously and emits no events.
        let chunks = chunk_documents(
            &documents,
            self.chunking.max_chars,
            self.chunking.overlap_chars,
        )?;
        info!(
            collection = %key,
            files = documents.len(),
            chunks = chunks.len(),
            "chunked"
        );

        // Embedding
        reporter.report(ProgressEvent::new(
            ProgressStage::Embed,
            ProgressStatus::Pending,
            0,
            format!("embedding {} chunks", chunks.len()),
        ));
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = match embed_batched(
            self.embedder.as_ref(),
            &texts,
            self.batch_size,
            self.concurrency,
            |done, total| {
                // Cancellation is observed between batches, not just between
                // stages, so a long embedding run stops promptly.
                if cancel.load(Ordering::SeqCst) {
                    return ControlFlow::Break(());
                }
                let percent = if total == 0 {
                    100
                } else {
                    (done * 100 / total) as u8
                };
                reporter.report(ProgressEvent::new(
                    ProgressStage::Embed,
                    ProgressStatus::InProgress,
                    percent,
                    format!("{}/{} chunks embedded", done, total),
                ));
                ControlFlow::Continue(())
            },
        )
        .await
        {
            Ok(Some(vectors)) => vectors,
            Ok(None) => return Err(IngestError::Cancelled),
            Err(e) => {
                reporter.report(ProgressEvent::new(
                    ProgressStage::Embed,
                    ProgressStatus::Error,
                    0,
                    e.to_string(),
                ));
                return Err(e.into());
            }
        };
        check_cancelled(cancel)?;

        // Storing; a forced run drops the old collection here, not earlier.
        if let Err(e) = self.store_chunks(key, force, &chunks, vectors).await {
            reporter.report(ProgressEvent::new(
                ProgressStage::Embed,
                ProgressStatus::Error,
                0,
                e.to_string(),
            ));
            return Err(e.into());
        }
        reporter.report(ProgressEvent::new(
            ProgressStage::Embed,
            ProgressStatus::Completed,
            100,
            format!("{} indexed", repo.path()),
        ));

        Ok(IngestOutcome::Completed {
            collection_key: key.to_string(),
            chunk_count: chunks.len(),
            token_count: count_tokens(&documents),
            snippet_count: count_code_blocks(&documents),
        })
    }

    async fn store_chunks(
        &self,
        key: &str,
        force: bool,
        chunks: &[Chunk],
        vectors: Vec<Vec<f32>>,
    ) -> Result<(), crate::error::StoreError> {
        self.store
            .ensure_collection(key, self.embedder.dims(), force)
            .await?;
        let items: Vec<EmbeddedChunk> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddedChunk {
                vector,
                text: chunk.text.clone(),
                metadata: ChunkMetadata {
                    source_path: chunk.source_path.clone(),
                    sequence_index: chunk.sequence_index,
                    heading_trail: chunk.heading_trail.clone(),
                },
            })
            .collect();
        self.store.upsert(key, &items).await
    }

    async fn record_start(&self, repo: &RepoRef) -> Option<String> {
        let catalog = self.catalog.as_ref()?;
        match catalog
            .upsert(
                &repo.display_name(),
                &format!("Documentation for {}", repo.path()),
                &repo.path(),
                &repo.url(),
            )
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(repo = %repo.path(), error = %e, "catalog upsert failed");
                None
            }
        }
    }

    async fn record_finish(
        &self,
        record_id: Option<&str>,
        result: &Result<IngestOutcome, IngestError>,
    ) {
        let (Some(catalog), Some(id)) = (self.catalog.as_ref(), record_id) else {
            return;
        };
        let outcome = match result {
            Ok(IngestOutcome::Completed {
                token_count,
                snippet_count,
                ..
            }) => {
                if let Err(e) = catalog
                    .update_counts(id, *token_count as i64, *snippet_count as i64)
                    .await
                {
                    warn!(error = %e, "catalog count update failed");
                }
                catalog::STATUS_COMPLETED
            }
            Ok(IngestOutcome::Exists { .. }) => return,
            Err(_) => catalog::STATUS_FAILED,
        };
        if let Err(e) = catalog.update_status(id, outcome).await {
            warn!(error = %e, "catalog status update failed");
        }
    }
}

fn check_cancelled(cancel: &AtomicBool) -> Result<(), IngestError> {
    if cancel.load(Ordering::SeqCst) {
        return Err(IngestError::Cancelled);
    }
    Ok(())
}

/// Releases the per-key lease when the run ends, success or failure.
struct LeaseGuard<'a> {
    leases: &'a Mutex<HashMap<String, Arc<AtomicBool>>>,
    key: String,
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        self.leases
            .lock()
            .expect("lease map lock poisoned")
            .remove(&self.key);
    }
}
