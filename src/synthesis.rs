//! Answer synthesis over retrieved chunks.
//!
//! [`Synthesizer`] turns a query plus its retrieved documentation chunks
//! into a concise grounded answer. Synthesis failures are isolated from
//! retrieval: the query service degrades to raw results when this capability
//! errors, so implementations just return the error.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::SynthesisConfig;
use crate::models::QueryResult;

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Produce a grounded answer for `query` using the retrieved chunks.
    async fn synthesize(&self, query: &str, chunks: &[QueryResult]) -> Result<String>;
}

const SYSTEM_PROMPT: &str = "You are a documentation assistant. Answer the \
question using only the provided documentation excerpts. Prefer concrete \
code examples when the excerpts contain them, and mention the source file \
paths you drew from. If the excerpts do not contain an answer, say so \
plainly instead of guessing.";

/// Synthesizer backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiSynthesizer {
    pub fn from_config(config: &SynthesisConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "synthesis requires an API key in the {} environment variable",
                    config.api_key_env
                )
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    fn build_user_message(query: &str, chunks: &[QueryResult]) -> String {
        let mut message = String::from("Documentation excerpts:\n\n");
        for (index, chunk) in chunks.iter().enumerate() {
            message.push_str(&format!(
                "[{}] (from {})\n{}\n\n",
                index + 1,
                chunk.source_path,
                chunk.text
            ));
        }
        message.push_str(&format!("Question: {}", query));
        message
    }
}

#[async_trait]
impl Synthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, query: &str, chunks: &[QueryResult]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": Self::build_user_message(query, chunks) }
            ]
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("chat completions request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("chat completions returned {}: {}", status, detail));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .context("invalid chat completions response")?;
        payload
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(|t| t.trim().to_string())
            .ok_or_else(|| anyhow!("chat completions response had no content"))
    }
}
