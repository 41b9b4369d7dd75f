//! # semindex core
//!
//! Shared, WASM-safe logic for semindex: data models, the error taxonomy,
//! boundary-aware chunking, the embedding contract, the storage-adapter
//! abstraction with its in-memory backend and registry, and the hybrid
//! search/rerank algorithm.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Native backends (SQLite, columnar files) and
//! the indexing pipeline live in the `semindex` app crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod search;
pub mod store;

pub use error::{IndexError, Result};
