//! Embedding provider trait, batching client, and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement and the [`EmbeddingClient`] that every caller goes through.
//! The client owns the invariants the rest of the system relies on:
//!
//! - output order and length match the input,
//! - every vector has the provider's configured dimension,
//! - every vector is L2-normalized, so cosine similarity reduces to a dot
//!   product on backends that only offer dot-product search,
//! - large batches are split into sub-batches of at most `batch_size`
//!   texts; a failure in any sub-batch aborts the whole call.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the `semindex`
//! app crate.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{IndexError, Result};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Trait for embedding providers.
///
/// `embed_texts` performs a single provider call; batching and
/// normalization are the [`EmbeddingClient`]'s job.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed one batch of texts, returning one vector per input in order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Batching, validating, normalizing front-end over an [`EmbeddingProvider`].
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the sub-batch ceiling (clamped to at least 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Fail with [`IndexError::Configuration`] unless the provider's
    /// dimension equals `expected` (the adapter's configured dimension).
    pub fn ensure_dimension(&self, expected: usize) -> Result<()> {
        if self.dims() != expected {
            return Err(IndexError::Configuration(format!(
                "embedding model '{}' produces {}-dimensional vectors but the storage adapter is configured for {}",
                self.model_name(),
                self.dims(),
                expected
            )));
        }
        Ok(())
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Embedding("empty embedding response".to_string()))
    }

    /// Embed many texts, sub-batch by sub-batch, preserving input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        let expected_dims = self.dims();

        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(
                model = self.model_name(),
                batch = batch_no,
                size = batch.len(),
                "embedding sub-batch"
            );
            let vectors = self.provider.embed_texts(batch).await.map_err(|e| match e {
                IndexError::Embedding(msg) => IndexError::Embedding(format!(
                    "sub-batch {} of '{}': {}",
                    batch_no,
                    self.model_name(),
                    msg
                )),
                other => other,
            })?;
            if vectors.len() != batch.len() {
                return Err(IndexError::Embedding(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            for v in vectors {
                if v.len() != expected_dims {
                    return Err(IndexError::DimensionMismatch {
                        expected: expected_dims,
                        actual: v.len(),
                    });
                }
                out.push(normalize(&v));
            }
        }

        Ok(out)
    }
}

/// L2-normalize a vector. A vector whose norm is exactly zero (including
/// one whose squared components underflow) is returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use semindex_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values
/// from the byte slice.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Check a vector against an adapter's configured dimension.
pub fn validate_dimension(expected: usize, v: &[f32]) -> Result<()> {
    if v.len() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: v.len(),
        });
    }
    Ok(())
}
