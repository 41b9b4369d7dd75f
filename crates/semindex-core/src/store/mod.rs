//! Storage-adapter abstraction for semindex.
//!
//! The [`StorageAdapter`] trait defines the uniform operation set every
//! backend exposes, so the indexing pipeline and search engine never know
//! which one they are talking to. Backends are resolved by name through an
//! [`AdapterRegistry`](registry::AdapterRegistry).
//!
//! | Backend | Crate | Persistence |
//! |---------|-------|-------------|
//! | `memory` | `semindex-core` | none |
//! | `sqlite` | `semindex` | SQLite file (WAL) with a fixed-width vector table |
//! | `columnar` | `semindex` | column files plus a flat vector index |
//!
//! Implementations must be `Send + Sync` and safe under concurrent
//! independent callers against one open instance.

pub mod memory;
pub mod registry;

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::{
    ChunkMetadata, Document, DocumentFilter, DocumentUpdate, ExtensionStat, ListOptions,
    NewDocument, ScoredDocument, SearchOptions, Source,
};

pub const DEFAULT_PROVIDER: &str = "memory";
pub const DEFAULT_DIMENSION: usize = 384;

/// Backend-specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterOptions {
    /// Database file (sqlite) or directory (columnar). `None` keeps the
    /// store in-process.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default)]
    pub table_name: Option<String>,
}

fn default_dimension() -> usize {
    DEFAULT_DIMENSION
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            path: None,
            dimension: DEFAULT_DIMENSION,
            table_name: None,
        }
    }
}

/// Descriptor resolved by the registry: `{ provider, options }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub options: AdapterOptions,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            options: AdapterOptions::default(),
        }
    }
}

impl AdapterConfig {
    pub fn new(provider: impl Into<String>, dimension: usize) -> Self {
        Self {
            provider: provider.into(),
            options: AdapterOptions {
                dimension,
                ..Default::default()
            },
        }
    }

    pub fn memory(dimension: usize) -> Self {
        Self::new(DEFAULT_PROVIDER, dimension)
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.options.path = Some(path.into());
        self
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.options.table_name = Some(table_name.into());
        self
    }
}

/// Self-description returned by [`StorageAdapter::info`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdapterInfo {
    pub provider: String,
    pub version: String,
    pub capabilities: Vec<String>,
}

impl AdapterInfo {
    pub fn new(provider: &str, capabilities: &[&str]) -> Self {
        Self {
            provider: provider.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Abstract storage backend.
///
/// All operations are async (via `async-trait`) and take `&self`; state
/// lives behind each adapter's own lock or connection pool. Every call
/// other than [`initialize`](StorageAdapter::initialize) fails with
/// [`IndexError::NotInitialized`](crate::IndexError::NotInitialized)
/// outside the window between `initialize` and `close`.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](StorageAdapter::insert) | Store one chunk, creating its source if it carries `originalContent` |
/// | [`get`](StorageAdapter::get) | Fetch by id, `None` when absent |
/// | [`update`](StorageAdapter::update) | Replace fields and bump `updated_at` |
/// | [`delete`](StorageAdapter::delete) | Remove a chunk, cascading its source when it was the last reference |
/// | [`search`](StorageAdapter::search) | Top-k cosine similarity, stable on ties |
/// | [`count`](StorageAdapter::count) / [`list`](StorageAdapter::list) | Filtered counting and newest-first pagination |
/// | [`get_source`](StorageAdapter::get_source) | Resolve a source row for full-content reconstruction |
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Open the backend. Fails with a configuration error on a bad
    /// descriptor or when persisted state disagrees with `config`.
    async fn initialize(&self, config: &AdapterConfig) -> Result<()>;

    /// Release the backend. Callers must drain in-flight operations first.
    async fn close(&self) -> Result<()>;

    /// Configured embedding dimension, once initialized.
    fn dimension(&self) -> Option<usize>;

    async fn insert(&self, doc: NewDocument) -> Result<String>;

    /// Insert several documents as one unit: if any document is rejected
    /// (dimension, duplicate id), nothing from the batch is written.
    async fn insert_batch(&self, docs: Vec<NewDocument>) -> Result<Vec<String>>;

    async fn get(&self, id: &str) -> Result<Option<Document>>;

    async fn update(&self, id: &str, update: DocumentUpdate) -> Result<Document>;

    /// Delete one document. A missing id is a `DocumentNotFound` error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete several documents, skipping missing ids. Returns how many
    /// were actually removed.
    async fn delete_batch(&self, ids: &[String]) -> Result<usize>;

    async fn search(&self, embedding: &[f32], options: &SearchOptions)
        -> Result<Vec<ScoredDocument>>;

    async fn count(&self, filter: Option<&DocumentFilter>) -> Result<usize>;

    async fn list(&self, options: &ListOptions) -> Result<Vec<Document>>;

    async fn get_source(&self, source_id: &str) -> Result<Option<Source>>;

    async fn list_sources(&self) -> Result<Vec<Source>>;

    async fn extension_stats(&self) -> Result<Vec<ExtensionStat>>;

    fn info(&self) -> AdapterInfo;
}

/// Generate a document id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Score candidates against `query` and keep the best `k`.
///
/// Candidates must arrive in insertion order; the sort is stable so equal
/// scores keep that order.
pub fn rank_by_similarity(
    candidates: impl IntoIterator<Item = Document>,
    query: &[f32],
    k: usize,
) -> Vec<ScoredDocument> {
    let mut scored: Vec<ScoredDocument> = candidates
        .into_iter()
        .map(|document| {
            let score = cosine_similarity(query, &document.embedding) as f64;
            ScoredDocument { document, score }
        })
        .collect();
    sort_scored(&mut scored);
    scored.truncate(k);
    scored
}

/// Stable descending sort on score.
pub fn sort_scored(scored: &mut [ScoredDocument]) {
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}

/// Apply `offset`/`limit` to an already ordered sequence.
pub fn paginate<T>(items: impl IntoIterator<Item = T>, options: &ListOptions) -> Vec<T> {
    let iter = items.into_iter().skip(options.offset);
    match options.limit {
        Some(limit) => iter.take(limit).collect(),
        None => iter.collect(),
    }
}

/// Move `originalContent` out of chunk metadata when the source row holds
/// the same text, so it is stored once. Returns whether it was moved.
pub fn strip_original_content(metadata: &mut ChunkMetadata, source: Option<&Source>) -> bool {
    match (source, metadata.original_content.as_deref()) {
        (Some(src), Some(content))
            if metadata.source_id.as_deref() == Some(src.source_id.as_str())
                && src.original_content == content =>
        {
            metadata.original_content = None;
            true
        }
        _ => false,
    }
}

/// Inverse of [`strip_original_content`] on read.
pub fn restore_original_content(metadata: &mut ChunkMetadata, source: Option<&Source>) {
    if let Some(src) = source {
        metadata.original_content = Some(src.original_content.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn doc(id: &str, embedding: Vec<f32>) -> Document {
        let now = Utc::now();
        Document {
            id: id.into(),
            source_id: None,
            content: id.into(),
            metadata: ChunkMetadata::default(),
            embedding,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_rank_is_stable_on_ties() {
        let docs = vec![
            doc("a", vec![1.0, 0.0]),
            doc("b", vec![0.0, 1.0]),
            doc("c", vec![1.0, 0.0]),
        ];
        let ranked = rank_by_similarity(docs, &[1.0, 0.0], 10);
        let ids: Vec<_> = ranked.iter().map(|s| s.document.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_rank_truncates() {
        let docs = vec![doc("a", vec![1.0]), doc("b", vec![1.0])];
        assert_eq!(rank_by_similarity(docs, &[1.0], 1).len(), 1);
    }

    #[test]
    fn test_paginate() {
        let opts = ListOptions {
            limit: Some(2),
            offset: 1,
            filter: None,
        };
        assert_eq!(paginate(1..=5, &opts), vec![2, 3]);
        let opts = ListOptions {
            offset: 4,
            ..Default::default()
        };
        assert_eq!(paginate(1..=5, &opts), vec![5]);
    }

    #[test]
    fn test_strip_requires_matching_source() {
        let source = Source {
            source_id: "s".into(),
            original_content: "full".into(),
            title: None,
            url: None,
            source_type: crate::models::SourceType::Text,
            created_at: Utc::now(),
        };
        let mut meta = ChunkMetadata {
            source_id: Some("s".into()),
            chunk_index: Some(0),
            original_content: Some("different".into()),
            ..Default::default()
        };
        assert!(!strip_original_content(&mut meta, Some(&source)));
        meta.original_content = Some("full".into());
        assert!(strip_original_content(&mut meta, Some(&source)));
        assert!(meta.original_content.is_none());
        restore_original_content(&mut meta, Some(&source));
        assert_eq!(meta.original_content.as_deref(), Some("full"));
    }

    #[test]
    fn test_config_defaults_from_toml_shape() {
        let cfg: AdapterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.provider, "memory");
        assert_eq!(cfg.options.dimension, DEFAULT_DIMENSION);
    }
}
