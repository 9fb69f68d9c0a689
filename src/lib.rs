//! # Docdex
//!
//! Repository documentation indexing and retrieval.
//!
//! Docdex fetches a GitHub repository's markdown files, splits them into
//! heading-aware overlapping chunks, embeds the chunks through an
//! OpenAI-compatible API, and stores the vectors in a per-repository SQLite
//! collection. Indexed repositories can then be queried by similarity
//! search, optionally with an LLM-synthesized answer grounded in the
//! retrieved chunks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────┐   ┌───────────┐
//! │  GitHub  │──▶│  Pipeline                 │──▶│  SQLite    │
//! │  *.md    │   │ Chunk + Embed + Collect  │   │ vectors +  │
//! └──────────┘   └──────────┬───────────────┘   │ catalog    │
//!                           │ progress          └─────┬─────┘
//!                           ▼                         ▼
//!                     ┌──────────┐             ┌──────────┐
//!                     │WebSocket │             │ CLI/HTTP │
//!                     │ channel  │             │  query   │
//!                     └──────────┘             └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docdex init                          # create database
//! docdex ingest tokio-rs/tokio         # fetch, chunk, embed, index
//! docdex query "how do I spawn a task" --repo tokio-rs/tokio --summarize
//! docdex repos                         # list indexed repositories
//! docdex serve                         # start the HTTP/WebSocket server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`repo_ref`] | Repository references and collection keys |
//! | [`fetch`] | Markdown retrieval from GitHub |
//! | [`chunk`] | Heading-aware text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector collection storage and search |
//! | [`ingest`] | Ingestion orchestration |
//! | [`query`] | Retrieval and answer synthesis |
//! | [`synthesis`] | LLM answer generation |
//! | [`error`] | Error taxonomy |
//! | [`progress`] | Best-effort progress events |
//! | [`catalog`] | Repository metadata records |
//! | [`server`] | HTTP and WebSocket server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod catalog;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod query;
pub mod repo_ref;
pub mod server;
pub mod store;
pub mod synthesis;
