//! Embedding gateway.
//!
//! The [`Embedder`] trait is the seam between the pipeline and the
//! text-to-vector capability. [`OpenAiEmbedder`] calls an OpenAI-compatible
//! `/embeddings` endpoint with batching, exponential backoff for transient
//! failures, and a positional-alignment guarantee: output vectors match
//! input texts in length and order.
//!
//! # Retry strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Network errors → retry
//! - Other 4xx (invalid input, auth) → fail immediately, not retryable
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::ops::ControlFlow;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::EmbedError;

/// Text-to-vector capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one batch of texts. The result is positionally aligned with
    /// the input: same length, same order, every vector `dims()` long.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Vector dimensionality, fixed for the lifetime of the embedder.
    fn dims(&self) -> usize;
}

/// Embed `texts` in batches of `batch_size`, dispatching up to `concurrency`
/// batches at a time. Output order matches input order regardless of batch
/// completion order, so chunk `sequence_index` metadata stays correct.
///
/// `on_batch_done` runs after each completed batch with `(done, total)`
/// counts. Returning [`ControlFlow::Break`] stops the run before any further
/// batch is dispatched; the partial result is discarded and `Ok(None)` is
/// returned.
pub async fn embed_batched(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
    concurrency: usize,
    mut on_batch_done: impl FnMut(usize, usize) -> ControlFlow<()>,
) -> Result<Option<Vec<Vec<f32>>>, EmbedError> {
    if texts.is_empty() {
        return Ok(Some(Vec::new()));
    }

    let batches: Vec<Vec<String>> = texts.chunks(batch_size.max(1)).map(|b| b.to_vec()).collect();
    let total = texts.len();

    // `buffered` preserves input order even when batches finish out of order.
    let mut results = stream::iter(batches.into_iter().map(|batch| async move {
        let vectors = embedder.embed(&batch).await?;
        Ok::<_, EmbedError>((batch.len(), vectors))
    }))
    .buffered(concurrency.max(1));

    let mut all = Vec::with_capacity(total);
    let mut done = 0usize;
    while let Some((batch_len, vectors)) = results.try_next().await? {
        if vectors.len() != batch_len {
            return Err(EmbedError::fatal(format!(
                "embedding response length {} does not match batch size {}",
                vectors.len(),
                batch_len
            )));
        }
        all.extend(vectors);
        done += batch_len;
        if on_batch_done(done, total).is_break() {
            return Ok(None);
        }
    }

    Ok(Some(all))
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, EmbedError> {
    let vectors = embedder.embed(&[text.to_string()]).await?;
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| EmbedError::fatal("empty embedding response"))
}

/// Embedder backed by an OpenAI-compatible embeddings API.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAiEmbedder {
    /// Build from config. Fails when the API key environment variable
    /// (default `OPENAI_API_KEY`) is not set.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| EmbedError::fatal(format!("{} not set", config.api_key_env)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbedError::fatal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }

    async fn call_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::retryable(format!("network error: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| EmbedError::retryable(format!("invalid response body: {}", e)))?;
            return parse_embeddings_response(&json, self.dims);
        }

        let body_text = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(EmbedError::retryable(format!(
                "embeddings API error {}: {}",
                status, body_text
            )))
        } else {
            Err(EmbedError::fatal(format!(
                "embeddings API error {}: {}",
                status, body_text
            )))
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match self.call_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.retryable => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| EmbedError::retryable("embedding failed after retries")))
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Parse `data[].embedding` out of an embeddings API response, honouring
/// the `index` field so vectors line up with the input order. Every vector
/// must have the expected dimensionality.
fn parse_embeddings_response(
    json: &serde_json::Value,
    expected_dims: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::fatal("invalid embeddings response: missing data array"))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbedError::fatal("invalid embeddings response: missing embedding"))?;

        let vector: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if vector.len() != expected_dims {
            return Err(EmbedError::fatal(format!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                expected_dims
            )));
        }
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic fake used across the test suite: hashes each text
    /// into a small vector so identical texts embed identically.
    pub struct FakeEmbedder {
        pub dims: usize,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(texts.iter().map(|t| hash_vector(t, self.dims)).collect())
        }

        fn dims(&self) -> usize {
            self.dims
        }
    }

    fn hash_vector(text: &str, dims: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dims];
        for (i, b) in text.bytes().enumerate() {
            v[i % dims] += b as f32 / 255.0;
        }
        v
    }

    #[tokio::test]
    async fn batched_output_aligns_with_input() {
        let embedder = FakeEmbedder { dims: 8 };
        let texts: Vec<String> = (0..10).map(|i| format!("text number {}", i)).collect();

        let vectors = embed_batched(&embedder, &texts, 3, 2, |_, _| ControlFlow::Continue(()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(vectors.len(), texts.len());
        for (text, vec) in texts.iter().zip(vectors.iter()) {
            assert_eq!(vec.len(), 8);
            assert_eq!(vec, &hash_vector(text, 8));
        }
    }

    #[tokio::test]
    async fn batched_reports_monotonic_progress() {
        let embedder = FakeEmbedder { dims: 4 };
        let texts: Vec<String> = (0..7).map(|i| i.to_string()).collect();

        let mut reports = Vec::new();
        embed_batched(&embedder, &texts, 2, 1, |done, total| {
            reports.push((done, total));
            ControlFlow::Continue(())
        })
        .await
        .unwrap();

        assert_eq!(reports, vec![(2, 7), (4, 7), (6, 7), (7, 7)]);
    }

    #[tokio::test]
    async fn empty_input_is_a_noop() {
        let embedder = FakeEmbedder { dims: 4 };
        let vectors = embed_batched(&embedder, &[], 8, 2, |_, _| ControlFlow::Continue(()))
            .await
            .unwrap()
            .unwrap();
        assert!(vectors.is_empty());
    }

    #[tokio::test]
    async fn callback_break_stops_remaining_batches() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingEmbedder {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl Embedder for CountingEmbedder {
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(texts.iter().map(|t| hash_vector(t, 4)).collect())
            }

            fn dims(&self) -> usize {
                4
            }
        }

        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
        };
        let texts: Vec<String> = (0..8).map(|i| i.to_string()).collect();

        let result = embed_batched(&embedder, &texts, 2, 1, |_, _| ControlFlow::Break(()))
            .await
            .unwrap();

        assert!(result.is_none());
        // Stopped after the first completed batch; the other three never ran.
        assert!(embedder.calls.load(Ordering::SeqCst) < 4);
    }

    #[tokio::test]
    async fn openai_embedder_retries_rate_limits() {
        let server = httpmock::MockServer::start_async().await;

        let fail = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/embeddings");
                then.status(429).body("rate limited");
            })
            .await;

        std::env::set_var("DOCDEX_TEST_EMBED_KEY", "test-key");
        let config = EmbeddingConfig {
            api_base: server.base_url(),
            api_key_env: "DOCDEX_TEST_EMBED_KEY".to_string(),
            model: "test-model".to_string(),
            dims: 3,
            batch_size: 8,
            concurrency: 1,
            max_retries: 1,
            timeout_secs: 5,
        };
        let embedder = OpenAiEmbedder::from_config(&config).unwrap();

        let err = embedder.embed(&["hello".to_string()]).await.unwrap_err();
        assert!(err.retryable);
        // Initial attempt plus one retry.
        assert_eq!(fail.hits_async().await, 2);
    }

    #[tokio::test]
    async fn openai_embedder_fails_fast_on_auth_errors() {
        let server = httpmock::MockServer::start_async().await;

        let fail = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/embeddings");
                then.status(401).body("bad key");
            })
            .await;

        std::env::set_var("DOCDEX_TEST_EMBED_KEY2", "test-key");
        let config = EmbeddingConfig {
            api_base: server.base_url(),
            api_key_env: "DOCDEX_TEST_EMBED_KEY2".to_string(),
            model: "test-model".to_string(),
            dims: 3,
            batch_size: 8,
            concurrency: 1,
            max_retries: 3,
            timeout_secs: 5,
        };
        let embedder = OpenAiEmbedder::from_config(&config).unwrap();

        let err = embedder.embed(&["hello".to_string()]).await.unwrap_err();
        assert!(!err.retryable);
        assert_eq!(fail.hits_async().await, 1);
    }

    #[tokio::test]
    async fn openai_embedder_parses_out_of_order_indices() {
        let server = httpmock::MockServer::start_async().await;

        server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/embeddings");
                then.status(200).json_body(serde_json::json!({
                    "data": [
                        { "index": 1, "embedding": [0.0, 1.0, 0.0] },
                        { "index": 0, "embedding": [1.0, 0.0, 0.0] }
                    ]
                }));
            })
            .await;

        std::env::set_var("DOCDEX_TEST_EMBED_KEY3", "test-key");
        let config = EmbeddingConfig {
            api_base: server.base_url(),
            api_key_env: "DOCDEX_TEST_EMBED_KEY3".to_string(),
            model: "test-model".to_string(),
            dims: 3,
            batch_size: 8,
            concurrency: 1,
            max_retries: 0,
            timeout_secs: 5,
        };
        let embedder = OpenAiEmbedder::from_config(&config).unwrap();

        let vectors = embedder
            .embed(&["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0, 0.0]);
    }
}
