//! # semindex
//!
//! A local-first semantic indexing and retrieval engine.
//!
//! semindex ingests raw text, local files, gists and GitHub repository
//! trees, splits them into embedded chunks, stores them behind a pluggable
//! vector-capable adapter, and answers similarity and hybrid
//! keyword + vector queries with reranking.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────┐   ┌──────────────────────┐
//! │   Sources    │──▶│    Pipeline     │──▶│  StorageAdapter      │
//! │ text / file  │   │ chunk → embed   │   │ memory | sqlite |    │
//! │ gist / repo  │   │   → persist     │   │ columnar | custom    │
//! └──────────────┘   └─────────────────┘   └──────────┬───────────┘
//!                                                     │
//!                                           ┌─────────▼─────────┐
//!                                           │  hybrid search +  │
//!                                           │  rerank, content  │
//!                                           │  resolvers        │
//!                                           └───────────────────┘
//! ```
//!
//! The storage contract, chunker, embedding client, in-memory adapter and
//! search logic live in the I/O-free [`semindex_core`] crate, re-exported
//! here. This crate adds the native pieces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema creation for the SQLite adapter |
//! | [`sqlite_store`] | SQLite storage adapter |
//! | [`columnar_store`] | Columnar storage adapter with a flat vector index |
//! | [`registry`] | Built-in adapter registry |
//! | [`embedding`] | OpenAI, Ollama and local embedding providers |
//! | [`fetch`] | Gist / GitHub fetcher and rate limiter |
//! | [`files`] | Glob expansion |
//! | [`progress`] | Indexing progress reporting |
//! | [`ingest`] | Indexing pipeline |
//! | [`index`] | [`SemanticIndex`] facade |

pub mod columnar_store;
pub mod config;
pub mod db;
pub mod embedding;
pub mod fetch;
pub mod files;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod registry;
pub mod sqlite_store;

pub use semindex_core;
pub use semindex_core::{IndexError, Result};

pub use index::SemanticIndex;
pub use ingest::{IndexReport, Indexer, RepoIndexOptions};
