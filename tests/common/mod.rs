//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use semindex::registry::builtin_registry;
use semindex_core::embedding::{EmbeddingClient, EmbeddingProvider};
use semindex_core::store::{AdapterConfig, StorageAdapter};
use tempfile::TempDir;

pub const DIMS: usize = 32;

/// Deterministic bag-of-words embedder: each lowercase word is hashed
/// into one of `DIMS` buckets.
pub struct BagOfWords;

fn bucket(word: &str) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in word.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIMS as u64) as usize
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        v[bucket(&word.to_lowercase())] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for BagOfWords {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed_texts(&self, texts: &[String]) -> semindex_core::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

pub fn embedder() -> EmbeddingClient {
    EmbeddingClient::new(Arc::new(BagOfWords))
}

/// An initialized adapter for `provider`, on disk under `dir` when the
/// provider persists.
pub async fn open_adapter(
    provider: &str,
    dimension: usize,
    dir: &TempDir,
) -> Arc<dyn StorageAdapter> {
    let mut config = AdapterConfig::new(provider, dimension);
    match provider {
        "sqlite" => config = config.with_path(dir.path().join("index.sqlite").to_string_lossy()),
        "columnar" => config = config.with_path(dir.path().join("columnar").to_string_lossy()),
        _ => {}
    }
    builtin_registry().create(&config).await.unwrap()
}

pub const PROVIDERS: &[&str] = &["memory", "sqlite", "columnar"];
