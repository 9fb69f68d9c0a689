//! # Docdex CLI (`docdex`)
//!
//! The `docdex` binary indexes GitHub repository documentation and answers
//! questions against it.
//!
//! ## Usage
//!
//! ```bash
//! docdex --config ./config/docdex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docdex init` | Create the SQLite database and run schema migrations |
//! | `docdex ingest <repo>` | Fetch, chunk, embed, and index a repository |
//! | `docdex query "<text>" --repo <repo>` | Similarity search, optional summary |
//! | `docdex repos` | List indexed repositories |
//! | `docdex delete <id>` | Remove a repository and its collection |
//! | `docdex serve` | Start the HTTP/WebSocket server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! docdex init --config ./config/docdex.toml
//!
//! # Index a repository (accepts URL, SSH remote, or owner/repo)
//! docdex ingest tokio-rs/tokio
//! docdex ingest https://github.com/tokio-rs/tokio --force
//!
//! # Ask a question with a synthesized answer
//! docdex query "how do I spawn a task" --repo tokio-rs/tokio --summarize
//!
//! # Start the server for the web UI
//! docdex serve
//! ```

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use docdex::catalog::Catalog;
use docdex::config::{self, Config};
use docdex::db;
use docdex::embedding::OpenAiEmbedder;
use docdex::fetch::GithubFetcher;
use docdex::ingest::IngestPipeline;
use docdex::migrate;
use docdex::models::IngestOutcome;
use docdex::progress::LogProgress;
use docdex::query::QueryService;
use docdex::repo_ref::RepoRef;
use docdex::server;
use docdex::store::{sqlite::SqliteStore, VectorStore};
use docdex::synthesis::OpenAiSynthesizer;

/// Docdex CLI: index GitHub repository documentation and query it.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docdex.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docdex",
    about = "Docdex — index GitHub repository documentation and query it",
    version,
    long_about = "Docdex fetches a repository's markdown files, chunks and embeds them, and \
    stores the vectors in a per-repository SQLite collection. Indexed repositories can be \
    queried by similarity search with optional LLM-synthesized answers, from the CLI or over \
    an HTTP/WebSocket API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docdex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (repositories, vector_collections, vector_chunks). Idempotent.
    Init,

    /// Fetch, chunk, embed, and index a repository's documentation.
    ///
    /// A repository that is already indexed is skipped unless `--force`
    /// is given, in which case its collection is dropped and rebuilt.
    Ingest {
        /// Repository reference: `owner/repo`, an HTTPS URL, or an SSH remote.
        repo: String,

        /// Re-ingest even if the repository is already indexed.
        #[arg(long)]
        force: bool,
    },

    /// Query an indexed repository.
    Query {
        /// The question or search text.
        text: String,

        /// Repository whose collection to search.
        #[arg(long)]
        repo: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 5)]
        top_k: usize,

        /// Synthesize an answer from the retrieved chunks.
        #[arg(long)]
        summarize: bool,
    },

    /// List indexed repositories.
    Repos,

    /// Remove a repository record and drop its vector collection.
    Delete {
        /// Repository record id (from `docdex repos`).
        id: String,
    },

    /// Start the HTTP/WebSocket server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// ingestion, query, catalog, and progress endpoints.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docdex=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { repo, force } => {
            run_ingest(&cfg, &repo, force).await?;
        }
        Commands::Query {
            text,
            repo,
            top_k,
            summarize,
        } => {
            run_query(&cfg, &text, &repo, top_k, summarize).await?;
        }
        Commands::Repos => {
            run_repos(&cfg).await?;
        }
        Commands::Delete { id } => {
            run_delete(&cfg, &id).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_ingest(cfg: &Config, reference: &str, force: bool) -> anyhow::Result<()> {
    let repo = RepoRef::parse(reference)?;
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;

    let fetcher = Arc::new(GithubFetcher::from_config(&cfg.github)?);
    let embedder = Arc::new(OpenAiEmbedder::from_config(&cfg.embedding)?);
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let pipeline = IngestPipeline::new(fetcher, embedder, store, cfg)
        .with_catalog(Catalog::new(pool));

    match pipeline.run(&repo, force, &LogProgress).await? {
        IngestOutcome::Exists { collection_key } => {
            println!(
                "{} is already indexed (collection {}). Use --force to rebuild.",
                repo.path(),
                collection_key
            );
        }
        IngestOutcome::Completed {
            collection_key,
            chunk_count,
            token_count,
            snippet_count,
        } => {
            println!("Indexed {} into collection {}.", repo.path(), collection_key);
            println!(
                "  {} chunks, {} tokens, {} code snippets",
                chunk_count, token_count, snippet_count
            );
        }
    }

    Ok(())
}

async fn run_query(
    cfg: &Config,
    text: &str,
    reference: &str,
    top_k: usize,
    summarize: bool,
) -> anyhow::Result<()> {
    let repo = RepoRef::parse(reference)?;
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;

    let embedder = Arc::new(OpenAiEmbedder::from_config(&cfg.embedding)?);
    let store = Arc::new(SqliteStore::new(pool));
    let mut service = QueryService::new(embedder, store);
    if summarize && cfg.synthesis.enabled {
        service = service.with_synthesizer(Arc::new(OpenAiSynthesizer::from_config(
            &cfg.synthesis,
        )?));
    }

    let outcome = service
        .query(&repo.collection_key(), text, top_k, summarize)
        .await
        .map_err(|e| {
            if e.is_collection_not_found() {
                anyhow!(
                    "{} is not indexed yet; run `docdex ingest {}` first",
                    repo.path(),
                    repo.path()
                )
            } else {
                anyhow::Error::new(e)
            }
        })?;

    if outcome.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (index, result) in outcome.results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {}",
            index + 1,
            result.score,
            result.source_path
        );
        for line in result.text.lines().take(3) {
            println!("   {}", line);
        }
        println!();
    }

    if let Some(summary) = &outcome.summary {
        println!("--- Answer ---");
        println!("{}", summary);
    } else if let Some(error) = &outcome.synthesis_error {
        println!("(answer synthesis failed: {})", error);
    }

    Ok(())
}

async fn run_repos(cfg: &Config) -> anyhow::Result<()> {
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;
    let records = Catalog::new(pool).list().await?;

    if records.is_empty() {
        println!("No repositories indexed yet.");
        return Ok(());
    }

    println!(
        "{:<38} {:<28} {:<12} {:>8} {:>9}",
        "ID", "REPOSITORY", "STATUS", "TOKENS", "SNIPPETS"
    );
    for record in records {
        println!(
            "{:<38} {:<28} {:<12} {:>8} {:>9}",
            record.id, record.repo_path, record.status, record.token_count, record.snippet_count
        );
    }

    Ok(())
}

async fn run_delete(cfg: &Config, id: &str) -> anyhow::Result<()> {
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;
    let catalog = Catalog::new(pool.clone());

    let record = catalog
        .get_by_id(id)
        .await?
        .with_context(|| format!("no repository with id {}", id))?;

    let store = SqliteStore::new(pool);
    if let Ok(repo) = RepoRef::parse(&record.repo_path) {
        store.drop_collection(&repo.collection_key()).await?;
    }
    catalog.delete(id).await?;

    println!("Deleted {} ({}).", record.repo_path, id);
    Ok(())
}
