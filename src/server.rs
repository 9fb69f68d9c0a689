//! HTTP and WebSocket server.
//!
//! # Endpoints
//!
//! | Method   | Path                        | Description |
//! |----------|-----------------------------|-------------|
//! | `POST`   | `/repositories`             | Ingest a repository (awaits the run) |
//! | `GET`    | `/repositories`             | List catalog records |
//! | `GET`    | `/repositories/{owner}/{repo}` | One catalog record |
//! | `DELETE` | `/repositories/{id}`        | Remove record and its collection |
//! | `POST`   | `/query`                    | Similarity search, optional summary |
//! | `GET`    | `/ws/{client_id}`           | Progress event stream |
//! | `GET`    | `/health`                   | Health check (returns version) |
//!
//! The ingestion response is the run's own terminal outcome:
//! `{"status": "success", ...}`, `{"status": "exists", ...}`, or
//! `{"status": "error", "reason": ...}`. Progress over the WebSocket is
//! best-effort; a client that never connects just misses the events.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::db;
use crate::embedding::OpenAiEmbedder;
use crate::error::{FetchError, IngestError};
use crate::fetch::GithubFetcher;
use crate::ingest::IngestPipeline;
use crate::migrate;
use crate::progress::{ChannelReporter, NoProgress, ProgressHub, ProgressReporter};
use crate::query::QueryService;
use crate::repo_ref::RepoRef;
use crate::store::{sqlite::SqliteStore, VectorStore};
use crate::synthesis::OpenAiSynthesizer;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<IngestPipeline>,
    query: Arc<QueryService>,
    catalog: Catalog,
    store: Arc<dyn VectorStore>,
    hub: Arc<ProgressHub>,
}

/// Starts the HTTP server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    let fetcher = Arc::new(GithubFetcher::from_config(&config.github)?);
    let embedder = Arc::new(OpenAiEmbedder::from_config(&config.embedding)?);
    let store: Arc<dyn VectorStore> = Arc::new(SqliteStore::new(pool.clone()));
    let catalog = Catalog::new(pool);

    let pipeline = Arc::new(
        IngestPipeline::new(fetcher, embedder.clone(), store.clone(), config)
            .with_catalog(catalog.clone()),
    );

    let mut query = QueryService::new(embedder, store.clone());
    if config.synthesis.enabled {
        match OpenAiSynthesizer::from_config(&config.synthesis) {
            Ok(synthesizer) => query = query.with_synthesizer(Arc::new(synthesizer)),
            Err(e) => warn!(error = %e, "answer synthesis disabled"),
        }
    }

    let state = AppState {
        pipeline,
        query: Arc::new(query),
        catalog,
        store,
        hub: Arc::new(ProgressHub::new()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/repositories", post(handle_ingest).get(handle_list))
        .route("/repositories/{owner}/{repo}", get(handle_get))
        .route("/repositories/{id}", delete(handle_delete))
        .route("/query", post(handle_query))
        .route("/ws/{client_id}", get(handle_ws))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    let bind_addr = config.server.bind.clone();
    info!(addr = %bind_addr, "server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ Ingestion ============

#[derive(Deserialize)]
struct IngestRequest {
    /// Repository reference: URL, SSH remote, or `owner/repo`.
    repo: String,
    /// Session id correlating the progress WebSocket, if any.
    client_id: Option<String>,
    #[serde(default)]
    force: bool,
}

/// Runs one ingestion and answers with its terminal outcome. The status
/// code mirrors the failure cause; `409` means another run holds the lease.
async fn handle_ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Response {
    let repo = match RepoRef::parse(&request.repo) {
        Ok(repo) => repo,
        Err(e) => return bad_request(e.to_string()).into_response(),
    };

    let reporter: Box<dyn ProgressReporter> = match &request.client_id {
        Some(client_id) => Box::new(ChannelReporter::new(state.hub.clone(), client_id.clone())),
        None => Box::new(NoProgress),
    };

    match state.pipeline.run(&repo, request.force, reporter.as_ref()).await {
        Ok(outcome) => {
            let body = match &outcome {
                crate::models::IngestOutcome::Exists { collection_key } => serde_json::json!({
                    "status": "exists",
                    "collection_key": collection_key,
                }),
                crate::models::IngestOutcome::Completed {
                    collection_key,
                    chunk_count,
                    ..
                } => serde_json::json!({
                    "status": "success",
                    "collection_key": collection_key,
                    "chunk_count": chunk_count,
                }),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            let status = match &e {
                IngestError::InProgress(_) => StatusCode::CONFLICT,
                IngestError::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
                IngestError::Fetch(FetchError::NotFound(_)) => StatusCode::NOT_FOUND,
                IngestError::Fetch(FetchError::AuthRequired(_)) => StatusCode::UNAUTHORIZED,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let body = serde_json::json!({ "status": "error", "reason": e.to_string() });
            (status, Json(body)).into_response()
        }
    }
}

// ============ Catalog ============

async fn handle_list(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let records = state
        .catalog
        .list()
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(serde_json::json!({ "repositories": records })))
}

async fn handle_get(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let repo_path = format!("{}/{}", owner, repo);
    let record = state
        .catalog
        .get_by_path(&repo_path)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("repository not found: {}", repo_path)))?;
    Ok(Json(serde_json::to_value(record).map_err(|e| internal(e.to_string()))?))
}

/// Removes the catalog record and drops the repository's vector collection.
async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let record = state
        .catalog
        .get_by_id(&id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("repository not found: {}", id)))?;

    if let Ok(repo) = RepoRef::parse(&record.repo_path) {
        state
            .store
            .drop_collection(&repo.collection_key())
            .await
            .map_err(|e| internal(e.to_string()))?;
    }
    state
        .catalog
        .delete(&id)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(serde_json::json!({ "deleted": id })))
}

// ============ Query ============

#[derive(Deserialize)]
struct QueryRequest {
    /// Repository reference naming the collection to search.
    repo: String,
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default)]
    summarize: bool,
}

fn default_top_k() -> usize {
    5
}

async fn handle_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let repo = RepoRef::parse(&request.repo).map_err(|e| bad_request(e.to_string()))?;
    let key = repo.collection_key();

    let outcome = state
        .query
        .query(&key, &request.query, request.top_k, request.summarize)
        .await
        .map_err(|e| {
            if e.is_collection_not_found() {
                not_found(format!("repository not indexed: {}", repo.path()))
            } else if matches!(e, crate::error::QueryError::InvalidTopK(_)) {
                bad_request(e.to_string())
            } else {
                internal(e.to_string())
            }
        })?;

    Ok(Json(serde_json::to_value(outcome).map_err(|e| internal(e.to_string()))?))
}

// ============ Progress WebSocket ============

/// Registers the client in the progress hub and forwards its events until
/// either side disconnects. Closing the socket never cancels an ingestion.
async fn handle_ws(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| serve_progress(socket, state.hub.clone(), client_id))
}

async fn serve_progress(mut socket: WebSocket, hub: Arc<ProgressHub>, client_id: String) {
    let mut events = hub.register(&client_id);
    info!(client = %client_id, "progress channel connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                // Clients only send close frames; any disconnect ends the stream.
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    hub.unregister(&client_id);
    info!(client = %client_id, "progress channel closed");
}

// ============ Health ============

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
