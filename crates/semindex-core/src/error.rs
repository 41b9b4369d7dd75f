//! Error taxonomy shared by every layer.
//!
//! | Variant | Meaning | Recovery |
//! |---------|---------|----------|
//! | [`Configuration`](IndexError::Configuration) | bad provider, dimension mismatch at init | fatal, never retried |
//! | [`NotInitialized`](IndexError::NotInitialized) | adapter used outside its open window | fatal per call |
//! | [`DocumentNotFound`](IndexError::DocumentNotFound) | existence is part of the contract | local |
//! | [`Validation`](IndexError::Validation) / [`DimensionMismatch`](IndexError::DimensionMismatch) | invalid input | fatal per call, never coerced |
//! | [`Chunking`](IndexError::Chunking) | content produced no chunks | per-unit, collected by the pipeline |
//! | [`Embedding`](IndexError::Embedding) / [`Backend`](IndexError::Backend) / [`Fetch`](IndexError::Fetch) | provider or backend failure | fatal to the triggering call |

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage adapter not initialized")]
    NotInitialized,

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("No chunks generated: {0}")]
    Chunking(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("{operation} failed: {message}")]
    Backend { operation: String, message: String },

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IndexError {
    /// Wrap a provider or backend failure with the operation that triggered it.
    pub fn backend(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        IndexError::Backend {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// `true` for invalid-input errors (bad dimension, malformed URL, bad filter).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IndexError::Validation(_) | IndexError::DimensionMismatch { .. }
        )
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, IndexError::Configuration(_))
    }
}

impl From<anyhow::Error> for IndexError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<IndexError>() {
            Ok(inner) => inner,
            Err(other) => IndexError::Backend {
                operation: "operation".to_string(),
                message: format!("{:#}", other),
            },
        }
    }
}

/// Result alias used across the core crate.
pub type Result<T> = std::result::Result<T, IndexError>;
