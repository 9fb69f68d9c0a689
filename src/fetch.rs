//! Document fetching from GitHub.
//!
//! [`DocumentFetcher`] is the seam for the external file-retrieval
//! capability: given a repository reference it returns the repository's
//! markdown files as `(path, text)` pairs. [`GithubFetcher`] implements it
//! against the GitHub REST API using the Git Trees endpoint (one listing
//! call instead of recursive directory walks) and per-file blob downloads.
//!
//! Per-file failures are skipped so one unreadable blob does not abort the
//! whole ingestion; listing failures are classified into
//! [`FetchError::NotFound`], [`FetchError::AuthRequired`], or
//! [`FetchError::Transient`].

use async_trait::async_trait;
use base64::Engine;
use std::time::Duration;
use tracing::warn;

use crate::config::GithubConfig;
use crate::error::FetchError;
use crate::models::RawDocument;
use crate::repo_ref::RepoRef;

/// Called after each file downloads: `(files_done, files_total, path)`.
pub type FetchProgress<'a> = &'a (dyn Fn(usize, usize, &str) + Send + Sync);

/// External file-retrieval capability.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Fetch the repository's documentation files.
    async fn fetch(
        &self,
        repo: &RepoRef,
        progress: FetchProgress<'_>,
    ) -> Result<Vec<RawDocument>, FetchError>;
}

/// Fetches `*.md` files through the GitHub REST API.
pub struct GithubFetcher {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GithubFetcher {
    /// Build from config. The token is read from the configured environment
    /// variable; absent or empty means unauthenticated requests.
    pub fn from_config(config: &GithubConfig) -> Result<Self, FetchError> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FetchError::Transient(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn get_json(
        &self,
        url: &str,
        context: &str,
    ) -> Result<serde_json::Value, FetchError> {
        let mut request = self
            .client
            .get(url)
            .header("User-Agent", "docdex")
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("{}: {}", context, e)))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| FetchError::Transient(format!("{}: invalid response: {}", context, e)));
        }

        match status.as_u16() {
            404 => Err(FetchError::NotFound(context.to_string())),
            401 | 403 => Err(FetchError::AuthRequired(context.to_string())),
            _ => Err(FetchError::Transient(format!(
                "{}: GitHub API error {}",
                context, status
            ))),
        }
    }
}

#[async_trait]
impl DocumentFetcher for GithubFetcher {
    async fn fetch(
        &self,
        repo: &RepoRef,
        progress: FetchProgress<'_>,
    ) -> Result<Vec<RawDocument>, FetchError> {
        let repo_path = repo.path();

        // Resolve the default branch, then list the full tree in one call.
        let meta = self
            .get_json(
                &format!("{}/repos/{}", self.api_base, repo_path),
                &repo_path,
            )
            .await?;
        let branch = meta
            .get("default_branch")
            .and_then(|b| b.as_str())
            .unwrap_or("main")
            .to_string();

        let tree = self
            .get_json(
                &format!(
                    "{}/repos/{}/git/trees/{}?recursive=1",
                    self.api_base, repo_path, branch
                ),
                &repo_path,
            )
            .await?;

        let entries: Vec<(String, String)> = tree
            .get("tree")
            .and_then(|t| t.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter(|item| {
                        item.get("type").and_then(|t| t.as_str()) == Some("blob")
                    })
                    .filter_map(|item| {
                        let path = item.get("path")?.as_str()?;
                        let sha = item.get("sha")?.as_str()?;
                        path.to_lowercase()
                            .ends_with(".md")
                            .then(|| (path.to_string(), sha.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let total = entries.len();
        let mut documents = Vec::with_capacity(total);

        for (done, (path, sha)) in entries.into_iter().enumerate() {
            let blob = match self
                .get_json(
                    &format!("{}/repos/{}/git/blobs/{}", self.api_base, repo_path, sha),
                    &path,
                )
                .await
            {
                Ok(blob) => blob,
                Err(e) => {
                    // One bad file should not abort the whole run.
                    warn!(path = %path, error = %e, "skipping file");
                    continue;
                }
            };

            match decode_blob(&blob) {
                Some(text) => {
                    progress(done + 1, total, &path);
                    documents.push(RawDocument { path, text });
                }
                None => warn!(path = %path, "skipping undecodable blob"),
            }
        }

        Ok(documents)
    }
}

/// Decode a git blob response body. GitHub returns base64 with embedded
/// newlines; anything else is taken verbatim.
fn decode_blob(blob: &serde_json::Value) -> Option<String> {
    let content = blob.get("content")?.as_str()?;
    let encoding = blob.get("encoding").and_then(|e| e.as_str()).unwrap_or("");

    if encoding == "base64" {
        let stripped: String = content.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(stripped)
            .ok()?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        Some(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::GET;
    use httpmock::MockServer;

    fn fetcher_for(server: &MockServer) -> GithubFetcher {
        GithubFetcher {
            client: reqwest::Client::new(),
            api_base: server.base_url(),
            token: None,
        }
    }

    fn b64(text: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(text)
    }

    #[tokio::test]
    async fn fetches_markdown_blobs_with_progress() {
        let server = MockServer::start_async().await;

        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/acme/docs");
                then.status(200)
                    .json_body(serde_json::json!({ "default_branch": "main" }));
            })
            .await;

        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/acme/docs/git/trees/main");
                then.status(200).json_body(serde_json::json!({
                    "tree": [
                        { "path": "README.md", "type": "blob", "sha": "sha1" },
                        { "path": "src/lib.rs", "type": "blob", "sha": "sha2" },
                        { "path": "docs/GUIDE.MD", "type": "blob", "sha": "sha3" },
                        { "path": "docs", "type": "tree", "sha": "sha4" }
                    ]
                }));
            })
            .await;

        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/acme/docs/git/blobs/sha1");
                then.status(200).json_body(serde_json::json!({
                    "content": b64("# Readme\n"), "encoding": "base64"
                }));
            })
            .await;

        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/acme/docs/git/blobs/sha3");
                then.status(200).json_body(serde_json::json!({
                    "content": b64("# Guide\n"), "encoding": "base64"
                }));
            })
            .await;

        let fetcher = fetcher_for(&server);
        let repo = RepoRef::parse("acme/docs").unwrap();

        let seen = std::sync::Mutex::new(Vec::new());
        let docs = fetcher
            .fetch(&repo, &|done, total, path| {
                seen.lock().unwrap().push((done, total, path.to_string()));
            })
            .await
            .unwrap();

        // Only the two markdown blobs; the .rs file and the tree entry are skipped.
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].path, "README.md");
        assert_eq!(docs[0].text, "# Readme\n");
        assert_eq!(docs[1].path, "docs/GUIDE.MD");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].1, 2);
    }

    #[tokio::test]
    async fn missing_repository_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/acme/gone");
                then.status(404);
            })
            .await;

        let fetcher = fetcher_for(&server);
        let repo = RepoRef::parse("acme/gone").unwrap();
        let err = fetcher.fetch(&repo, &|_, _, _| {}).await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }

    #[tokio::test]
    async fn forbidden_is_auth_required() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/acme/private");
                then.status(403);
            })
            .await;

        let fetcher = fetcher_for(&server);
        let repo = RepoRef::parse("acme/private").unwrap();
        let err = fetcher.fetch(&repo, &|_, _, _| {}).await.unwrap_err();
        assert!(matches!(err, FetchError::AuthRequired(_)));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/repos/acme/flaky");
                then.status(502);
            })
            .await;

        let fetcher = fetcher_for(&server);
        let repo = RepoRef::parse("acme/flaky").unwrap();
        let err = fetcher.fetch(&repo, &|_, _, _| {}).await.unwrap_err();
        assert!(matches!(err, FetchError::Transient(_)));
    }
}
