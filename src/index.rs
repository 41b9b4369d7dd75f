//! [`SemanticIndex`]: one handle wiring configuration to an adapter, an
//! embedding client, the indexing pipeline and the search helpers.
//!
//! ```rust,no_run
//! # async fn run() -> semindex_core::Result<()> {
//! use semindex::config::load_config;
//! use semindex::index::SemanticIndex;
//! use semindex_core::models::ChunkMetadata;
//!
//! let config = load_config(std::path::Path::new("semindex.toml"))
//!     .map_err(|e| semindex_core::IndexError::Configuration(format!("{:#}", e)))?;
//! let index = SemanticIndex::open(&config).await?;
//! index.index_files(&["docs/**/*.md".to_string()], ChunkMetadata::default()).await?;
//! for hit in index.search("how are sources deleted").await? {
//!     println!("{:.3} {}", hit.score, hit.id);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use semindex_core::embedding::{EmbeddingClient, EmbeddingProvider};
use semindex_core::models::ChunkMetadata;
use semindex_core::search::{
    get_original_content, get_section_content, hybrid_search, semantic_search,
    HybridSearchOptions, SearchResult, SemanticSearchOptions,
};
use semindex_core::store::registry::AdapterRegistry;
use semindex_core::store::StorageAdapter;
use semindex_core::{IndexError, Result as IndexResult};

use crate::config::Config;
use crate::embedding::create_provider;
use crate::fetch::GitHubFetcher;
use crate::ingest::{IndexReport, Indexer, RepoIndexOptions};
use crate::progress::ProgressReporter;
use crate::registry::builtin_registry;

fn config_err(err: anyhow::Error) -> IndexError {
    match err.downcast::<IndexError>() {
        Ok(inner) => inner,
        Err(other) => IndexError::Configuration(format!("{:#}", other)),
    }
}

pub struct SemanticIndex {
    config: Config,
    indexer: Indexer,
}

impl SemanticIndex {
    /// Open the configured store with the configured embedding provider.
    pub async fn open(config: &Config) -> IndexResult<Self> {
        config.validate().map_err(config_err)?;
        if !config.embedding.is_enabled() {
            return Err(IndexError::Configuration(
                "an embedding provider must be configured to open an index".into(),
            ));
        }
        let provider = create_provider(&config.embedding).map_err(config_err)?;
        Self::open_with(config, &builtin_registry(), provider).await
    }

    /// Open with an explicit registry and provider.
    pub async fn open_with(
        config: &Config,
        registry: &AdapterRegistry,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> IndexResult<Self> {
        let adapter = registry.create(&config.storage).await?;
        let embedder = EmbeddingClient::new(provider).with_batch_size(config.embedding.batch_size);
        let fetcher = GitHubFetcher::new(&config.github).map_err(config_err)?;
        let indexer = Indexer::new(adapter, embedder)?.with_fetcher(Arc::new(fetcher));
        Ok(Self {
            config: config.clone(),
            indexer,
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.indexer = self.indexer.with_progress(progress);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn adapter(&self) -> &dyn StorageAdapter {
        self.indexer.adapter().as_ref()
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    pub async fn index_text(
        &self,
        content: &str,
        metadata: ChunkMetadata,
    ) -> IndexResult<IndexReport> {
        self.indexer
            .index_text(content, metadata, &self.config.chunking.to_options())
            .await
    }

    pub async fn index_file(
        &self,
        path: impl AsRef<std::path::Path>,
        metadata: ChunkMetadata,
    ) -> IndexResult<IndexReport> {
        self.indexer
            .index_file(path, metadata, &self.config.chunking.to_options())
            .await
    }

    pub async fn index_files(
        &self,
        patterns: &[String],
        metadata: ChunkMetadata,
    ) -> IndexResult<IndexReport> {
        self.indexer
            .index_files(patterns, metadata, &self.config.chunking.to_options())
            .await
    }

    pub async fn index_gist(&self, url: &str, metadata: ChunkMetadata) -> IndexResult<IndexReport> {
        self.indexer
            .index_gist(url, metadata, &self.config.chunking.to_options())
            .await
    }

    /// Index a repository with limits from the `[github]` section.
    pub async fn index_github_repo(
        &self,
        url: &str,
        branch: Option<String>,
    ) -> IndexResult<IndexReport> {
        let options = RepoIndexOptions {
            branch,
            chunk: self.config.chunking.to_options(),
            ..RepoIndexOptions::from_config(&self.config.github)
        };
        self.indexer.index_github_repo(url, &options).await
    }

    /// Hybrid search with the `[retrieval]` defaults.
    pub async fn search(&self, query: &str) -> IndexResult<Vec<SearchResult>> {
        self.hybrid_search(query, &self.config.retrieval.to_hybrid_options())
            .await
    }

    pub async fn hybrid_search(
        &self,
        query: &str,
        options: &HybridSearchOptions,
    ) -> IndexResult<Vec<SearchResult>> {
        hybrid_search(self.adapter(), self.indexer.embedder(), query, options).await
    }

    pub async fn semantic_search(
        &self,
        query: &str,
        options: &SemanticSearchOptions,
    ) -> IndexResult<Vec<SearchResult>> {
        semantic_search(self.adapter(), self.indexer.embedder(), query, options).await
    }

    pub async fn original_content(&self, result: &SearchResult) -> IndexResult<String> {
        get_original_content(result, self.adapter()).await
    }

    pub async fn section_content(&self, result: &SearchResult) -> IndexResult<String> {
        get_section_content(result, self.adapter()).await
    }

    /// Release the adapter. Callers must let in-flight operations finish first.
    pub async fn close(&self) -> IndexResult<()> {
        self.adapter().close().await
    }
}
