//! TOML configuration loading and validation.
//!
//! ```toml
//! [storage]
//! provider = "sqlite"          # memory | sqlite | columnar | any registered name
//!
//! [storage.options]
//! path = "./data/index.sqlite"
//! dimension = 384
//!
//! [embedding]
//! provider = "local"           # disabled | openai | ollama | local
//! model = "all-minilm-l6-v2"
//! dims = 384
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 200
//!
//! [retrieval]
//! keyword_weight = 0.3
//!
//! [github]
//! token_env = "GITHUB_TOKEN"
//! ```
//!
//! Every section is optional; [`Config::default`] is an in-memory index
//! with embeddings disabled.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use semindex_core::chunk::{ChunkOptions, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use semindex_core::search::{
    HybridSearchOptions, DEFAULT_BOOST_FACTOR, DEFAULT_CANDIDATE_MULTIPLIER, DEFAULT_K,
    DEFAULT_KEYWORD_WEIGHT,
};
use semindex_core::store::AdapterConfig;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: AdapterConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub github: GitHubConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override (Ollama host, or an OpenAI-compatible endpoint).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    semindex_core::embedding::DEFAULT_BATCH_SIZE
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub preserve_boundaries: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            preserve_boundaries: false,
        }
    }
}

impl ChunkingConfig {
    pub fn to_options(&self) -> ChunkOptions {
        ChunkOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            preserve_boundaries: self.preserve_boundaries,
            ..Default::default()
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_boost_factor")]
    pub boost_factor: f64,
    #[serde(default = "default_rerank")]
    pub rerank: bool,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            keyword_weight: default_keyword_weight(),
            boost_factor: default_boost_factor(),
            rerank: default_rerank(),
            candidate_multiplier: default_candidate_multiplier(),
        }
    }
}

impl RetrievalConfig {
    pub fn to_hybrid_options(&self) -> HybridSearchOptions {
        HybridSearchOptions {
            k: self.k,
            keyword_weight: self.keyword_weight,
            rerank: self.rerank,
            boost_factor: self.boost_factor,
            candidate_multiplier: self.candidate_multiplier,
            ..Default::default()
        }
    }
}

fn default_k() -> usize {
    DEFAULT_K
}
fn default_keyword_weight() -> f64 {
    DEFAULT_KEYWORD_WEIGHT
}
fn default_boost_factor() -> f64 {
    DEFAULT_BOOST_FACTOR
}
fn default_rerank() -> bool {
    true
}
fn default_candidate_multiplier() -> usize {
    DEFAULT_CANDIDATE_MULTIPLIER
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Environment variable holding the API token. Unauthenticated when unset.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Start throttling when `x-ratelimit-remaining` drops below this.
    #[serde(default = "default_throttle_threshold")]
    pub throttle_threshold: u32,
    #[serde(default = "default_throttle_delay_ms")]
    pub throttle_delay_ms: u64,
    /// Upper bound on a single sleep-until-reset.
    #[serde(default = "default_max_reset_wait_secs")]
    pub max_reset_wait_secs: u64,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token_env: default_token_env(),
            throttle_threshold: default_throttle_threshold(),
            throttle_delay_ms: default_throttle_delay_ms(),
            max_reset_wait_secs: default_max_reset_wait_secs(),
            max_file_size: default_max_file_size(),
            max_files: default_max_files(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_throttle_threshold() -> u32 {
    10
}
fn default_throttle_delay_ms() -> u64 {
    1000
}
fn default_max_reset_wait_secs() -> u64 {
    900
}
fn default_max_file_size() -> u64 {
    1024 * 1024
}
fn default_max_files() -> usize {
    500
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Config> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Validate storage
        if self.storage.options.dimension == 0 {
            bail!("storage.options.dimension must be > 0");
        }

        // Validate chunking
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }

        // Validate retrieval
        if self.retrieval.k == 0 {
            bail!("retrieval.k must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.retrieval.keyword_weight) {
            bail!("retrieval.keyword_weight must be in [0.0, 1.0]");
        }
        if self.retrieval.boost_factor < 0.0 {
            bail!("retrieval.boost_factor must be >= 0.0");
        }
        if self.retrieval.candidate_multiplier == 0 {
            bail!("retrieval.candidate_multiplier must be >= 1");
        }

        // Validate embedding
        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                other
            ),
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.embedding.is_enabled() && self.embedding.provider != "local" {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }
        if let Some(dims) = self.embedding.dims {
            if self.embedding.is_enabled() && dims != self.storage.options.dimension {
                bail!(
                    "embedding.dims ({}) does not match storage.options.dimension ({})",
                    dims,
                    self.storage.options.dimension
                );
            }
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml_str(&content)
        .with_context(|| format!("Invalid config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.storage.provider, "memory");
        assert_eq!(config.storage.options.dimension, 384);
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert!(!config.chunking.preserve_boundaries);
        assert_eq!(config.retrieval.k, 10);
        assert!((config.retrieval.keyword_weight - 0.3).abs() < 1e-9);
        assert!(config.retrieval.rerank);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.embedding.batch_size, 100);
        assert_eq!(config.github.token_env, "GITHUB_TOKEN");
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml_str(
            r#"
            [storage]
            provider = "sqlite"
            [storage.options]
            path = "/tmp/x.sqlite"
            dimension = 8

            [embedding]
            provider = "ollama"
            model = "nomic-embed-text"
            dims = 8

            [chunking]
            chunk_size = 400
            chunk_overlap = 40
            preserve_boundaries = true

            [retrieval]
            keyword_weight = 0.5
            rerank = false
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.provider, "sqlite");
        assert_eq!(config.storage.options.path.as_deref(), Some("/tmp/x.sqlite"));
        let opts = config.chunking.to_options();
        assert_eq!(opts.chunk_size, 400);
        assert!(opts.preserve_boundaries);
        let hybrid = config.retrieval.to_hybrid_options();
        assert!(!hybrid.rerank);
        assert!((hybrid.keyword_weight - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = Config::from_toml_str("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n")
            .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_keyword_weight_range() {
        assert!(Config::from_toml_str("[retrieval]\nkeyword_weight = 1.2\n").is_err());
    }

    #[test]
    fn test_unknown_embedding_provider() {
        assert!(Config::from_toml_str("[embedding]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let err = Config::from_toml_str(
            "[embedding]\nprovider = \"openai\"\nmodel = \"m\"\ndims = 1536\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("semindex.toml");
        std::fs::write(&path, "[retrieval]\nk = 5\n").unwrap();
        assert_eq!(load_config(&path).unwrap().retrieval.k, 5);
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
