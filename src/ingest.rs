//! Indexing pipeline orchestration.
//!
//! Coordinates the flow for every source kind:
//! fetch/read → chunking → embedding (sub-batched) → storage.
//!
//! Each entry point returns an [`IndexReport`]. Failures that belong to a
//! single unit (empty content, an unreadable file, a gist or repository
//! file the API refused) are collected into `errors` and the batch
//! continues; embedding and storage failures abort the call.
//!
//! Sources with a stable id (files, gist files, repository files, or text
//! indexed with a caller-supplied `sourceId`) are replaced on re-index:
//! once the new chunks are embedded, the old chunks for that source are
//! deleted before the new ones are written.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use semindex_core::chunk::{chunk_with_path, ChunkOptions};
use semindex_core::embedding::EmbeddingClient;
use semindex_core::models::{ChunkMetadata, DocumentFilter, ListOptions, NewDocument, SourceType};
use semindex_core::store::StorageAdapter;
use semindex_core::{IndexError, Result as IndexResult};

use crate::config::GitHubConfig;
use crate::fetch::{parse_gist_url, parse_github_repo_url, ContentFetcher};
use crate::files::{expand_globs, PathFilter};
use crate::progress::{ProgressEvent, ProgressReporter, Stage};

/// Outcome of one indexing call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    /// Units (texts, files, gist files) fully written.
    pub items_indexed: usize,
    pub chunks_created: usize,
    /// One message per failed unit.
    pub errors: Vec<String>,
    /// Source id when exactly one source was indexed.
    pub source_id: Option<String>,
}

impl IndexReport {
    fn record(&mut self, source_id: String, chunks: usize) {
        self.items_indexed += 1;
        self.chunks_created += chunks;
        self.source_id = if self.items_indexed == 1 {
            Some(source_id)
        } else {
            None
        };
    }

    fn fail(&mut self, label: &str, err: impl std::fmt::Display) {
        self.errors.push(format!("{}: {}", label, err));
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Options for [`Indexer::index_github_repo`].
#[derive(Debug, Clone)]
pub struct RepoIndexOptions {
    /// Branch or commit; defaults to the branch in the URL, then the
    /// repository's default branch.
    pub branch: Option<String>,
    /// Globs over repository-relative paths; empty admits every file.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_files: usize,
    pub max_file_size: u64,
    pub chunk: ChunkOptions,
    pub metadata: ChunkMetadata,
}

impl Default for RepoIndexOptions {
    fn default() -> Self {
        Self::from_config(&GitHubConfig::default())
    }
}

impl RepoIndexOptions {
    pub fn from_config(config: &GitHubConfig) -> Self {
        Self {
            branch: None,
            include: Vec::new(),
            exclude: Vec::new(),
            max_files: config.max_files,
            max_file_size: config.max_file_size,
            chunk: ChunkOptions::default(),
            metadata: ChunkMetadata::default(),
        }
    }
}

/// One source ready for chunking.
struct Unit {
    label: String,
    content: String,
    metadata: ChunkMetadata,
    replace: bool,
}

/// Failures recorded per unit instead of aborting the call.
fn is_unit_error(err: &IndexError) -> bool {
    matches!(err, IndexError::Chunking(_) | IndexError::Fetch(_))
}

fn content_sha(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Orchestrates chunker, embedder, and storage adapter.
pub struct Indexer {
    adapter: Arc<dyn StorageAdapter>,
    embedder: EmbeddingClient,
    fetcher: Option<Arc<dyn ContentFetcher>>,
    progress: Option<Arc<dyn ProgressReporter>>,
}

impl Indexer {
    /// The adapter must be initialized; its dimension must equal the
    /// embedder's.
    pub fn new(adapter: Arc<dyn StorageAdapter>, embedder: EmbeddingClient) -> IndexResult<Self> {
        let dimension = adapter.dimension().ok_or(IndexError::NotInitialized)?;
        embedder.ensure_dimension(dimension)?;
        Ok(Self {
            adapter,
            embedder,
            fetcher: None,
            progress: None,
        })
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ContentFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    pub fn embedder(&self) -> &EmbeddingClient {
        &self.embedder
    }

    fn report(&self, stage: Stage, fraction: Option<f64>, label: &str) {
        if let Some(ref progress) = self.progress {
            progress.report(ProgressEvent::new(stage, fraction).with_label(label));
        }
    }

    fn fetcher(&self) -> IndexResult<&Arc<dyn ContentFetcher>> {
        self.fetcher.as_ref().ok_or_else(|| {
            IndexError::Configuration("no content fetcher configured for remote sources".into())
        })
    }

    /// Chunk, embed, and write one unit. Returns the number of chunks.
    async fn index_unit(&self, unit: Unit, opts: &ChunkOptions) -> IndexResult<usize> {
        let Unit {
            label,
            content,
            mut metadata,
            replace,
        } = unit;

        self.report(Stage::Chunking, None, &label);
        let chunks = chunk_with_path(&content, metadata.file_path.as_deref(), opts)?;
        let total = chunks.len();

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut embeddings = Vec::with_capacity(total);
        for batch in texts.chunks(self.embedder.batch_size()) {
            embeddings.extend(self.embedder.embed_batch(batch).await?);
            self.report(
                Stage::Embedding,
                Some(embeddings.len() as f64 / total as f64),
                &label,
            );
        }

        let source_id = metadata
            .source_id
            .clone()
            .ok_or_else(|| IndexError::Validation("unit has no source id".into()))?;
        metadata.original_content = None;
        metadata.total_chunks = Some(total);

        let docs: Vec<NewDocument> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                let mut meta = metadata.clone();
                meta.chunk_index = Some(chunk.index);
                meta.boundary = chunk.boundary;
                if chunk.index == 0 {
                    meta.original_content = Some(content.clone());
                }
                NewDocument {
                    id: None,
                    content: chunk.text,
                    metadata: meta,
                    embedding,
                }
            })
            .collect();

        self.report(Stage::Saving, Some(0.0), &label);
        if replace {
            let removed = self.remove_source(&source_id).await?;
            if removed > 0 {
                debug!(source_id, removed, "replacing previously indexed chunks");
            }
        }
        self.adapter.insert_batch(docs).await?;
        self.report(Stage::Saving, Some(1.0), &label);
        Ok(total)
    }

    /// Delete every chunk of `source_id`; the source row cascades.
    pub async fn remove_source(&self, source_id: &str) -> IndexResult<usize> {
        let existing = self
            .adapter
            .list(&ListOptions {
                filter: Some(DocumentFilter::source_id(source_id)),
                ..Default::default()
            })
            .await?;
        if existing.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = existing.into_iter().map(|d| d.id).collect();
        self.adapter.delete_batch(&ids).await
    }

    /// Run `unit`, folding a per-unit failure into `report`.
    async fn run_unit(
        &self,
        unit: Unit,
        opts: &ChunkOptions,
        report: &mut IndexReport,
    ) -> IndexResult<()> {
        let label = unit.label.clone();
        let source_id = unit.metadata.source_id.clone().unwrap_or_default();
        match self.index_unit(unit, opts).await {
            Ok(chunks) => {
                report.record(source_id, chunks);
                Ok(())
            }
            Err(e) if is_unit_error(&e) => {
                warn!(unit = %label, error = %e, "skipping unit");
                report.fail(&label, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn finish(&self, report: &IndexReport, label: &str) {
        self.report(Stage::Complete, Some(1.0), label);
        info!(
            items = report.items_indexed,
            chunks = report.chunks_created,
            errors = report.errors.len(),
            "indexed {}",
            label
        );
    }

    /// Index raw text as one source.
    ///
    /// A missing `sourceId` is generated; a supplied one replaces any
    /// chunks previously indexed under it.
    pub async fn index_text(
        &self,
        content: &str,
        metadata: ChunkMetadata,
        opts: &ChunkOptions,
    ) -> IndexResult<IndexReport> {
        let mut metadata = metadata;
        let replace = metadata.source_id.is_some();
        let source_id = metadata
            .source_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        metadata.source_type.get_or_insert(SourceType::Text);

        let mut report = IndexReport::default();
        let unit = Unit {
            label: format!("text {}", source_id),
            content: content.to_string(),
            metadata,
            replace,
        };
        self.run_unit(unit, opts, &mut report).await?;
        self.finish(&report, "text");
        Ok(report)
    }

    async fn file_unit(&self, path: &Path, base: &ChunkMetadata) -> Result<Unit, String> {
        let display = path.display().to_string();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read {}: {}", display, e))?;

        let mut metadata = base.clone();
        metadata.source_type = Some(SourceType::File);
        metadata.file_path = Some(display.clone());
        metadata.source_id = Some(format!("file:{}", display));
        if metadata.title.is_none() {
            metadata.title = path.file_name().map(|n| n.to_string_lossy().to_string());
        }
        metadata
            .extra
            .insert("sha".to_string(), json!(content_sha(&content)));

        Ok(Unit {
            label: display,
            content,
            metadata,
            replace: true,
        })
    }

    /// Index one local file. Markdown and code files get structure-aware
    /// boundaries when `opts.preserve_boundaries` is set.
    pub async fn index_file(
        &self,
        path: impl AsRef<Path>,
        metadata: ChunkMetadata,
        opts: &ChunkOptions,
    ) -> IndexResult<IndexReport> {
        let path = path.as_ref();
        let mut report = IndexReport::default();
        match self.file_unit(path, &metadata).await {
            Ok(unit) => self.run_unit(unit, opts, &mut report).await?,
            Err(message) => report.errors.push(message),
        }
        self.finish(&report, &path.display().to_string());
        Ok(report)
    }

    /// Index every file matched by `patterns`.
    ///
    /// A pattern set matching nothing produces exactly one error. Entries
    /// the walk could not read are reported in `errors` and the readable
    /// files are still indexed.
    pub async fn index_files(
        &self,
        patterns: &[String],
        metadata: ChunkMetadata,
        opts: &ChunkOptions,
    ) -> IndexResult<IndexReport> {
        let expansion =
            expand_globs(patterns).map_err(|e| IndexError::Validation(format!("{:#}", e)))?;
        let files = expansion.files;
        let mut report = IndexReport {
            errors: expansion.errors,
            ..Default::default()
        };
        if files.is_empty() && report.errors.is_empty() {
            report
                .errors
                .push(format!("No files matched patterns: {}", patterns.join(", ")));
            self.finish(&report, "files");
            return Ok(report);
        }

        let total = files.len();
        for (i, path) in files.iter().enumerate() {
            match self.file_unit(path, &metadata).await {
                Ok(unit) => self.run_unit(unit, opts, &mut report).await?,
                Err(message) => {
                    warn!(error = %message, "skipping file");
                    report.errors.push(message);
                }
            }
            self.report(Stage::Saving, Some((i + 1) as f64 / total as f64), "files");
        }
        self.finish(&report, "files");
        Ok(report)
    }

    /// Index every file of a gist as its own source.
    ///
    /// A malformed URL is a [`IndexError::Validation`]; a failed fetch is
    /// reported in `errors`.
    pub async fn index_gist(
        &self,
        url: &str,
        metadata: ChunkMetadata,
        opts: &ChunkOptions,
    ) -> IndexResult<IndexReport> {
        let gist_id = parse_gist_url(url)?;
        let fetcher = self.fetcher()?;
        let mut report = IndexReport::default();
        let label = format!("gist {}", gist_id);

        self.report(Stage::Fetching, None, &label);
        let gist = match fetcher.fetch_gist(&gist_id).await {
            Ok(gist) => gist,
            Err(e) if is_unit_error(&e) => {
                report.fail(&label, e);
                self.finish(&report, &label);
                return Ok(report);
            }
            Err(e) => return Err(e),
        };
        if gist.files.is_empty() {
            report.fail(&label, "gist has no files");
        }

        for file in gist.files {
            let mut meta = metadata.clone();
            meta.source_type = Some(SourceType::Gist);
            meta.source_id = Some(format!("gist:{}/{}", gist.id, file.filename));
            meta.url = Some(gist.html_url.clone());
            meta.file_path = Some(file.filename.clone());
            if meta.title.is_none() {
                meta.title = Some(
                    gist.description
                        .clone()
                        .unwrap_or_else(|| file.filename.clone()),
                );
            }
            meta.extra.insert("gistId".to_string(), json!(gist.id));
            if let Some(ref owner) = gist.owner {
                meta.extra.insert("owner".to_string(), json!(owner));
            }
            if let Some(ref language) = file.language {
                meta.extra.insert("language".to_string(), json!(language));
            }
            let unit = Unit {
                label: format!("{}/{}", label, file.filename),
                content: file.content,
                metadata: meta,
                replace: true,
            };
            self.run_unit(unit, opts, &mut report).await?;
        }
        self.finish(&report, &label);
        Ok(report)
    }

    /// Index the files of a GitHub repository tree.
    ///
    /// Files are filtered by the URL's subdirectory (if any), the
    /// include/exclude globs and `max_file_size`, then capped at
    /// `max_files` in tree order.
    pub async fn index_github_repo(
        &self,
        url: &str,
        options: &RepoIndexOptions,
    ) -> IndexResult<IndexReport> {
        let repo = parse_github_repo_url(url)?;
        let fetcher = self.fetcher()?;
        let filter = PathFilter::new(&options.include, &options.exclude)
            .map_err(|e| IndexError::Validation(format!("{:#}", e)))?;
        let label = format!("{}/{}", repo.owner, repo.repo);
        let mut report = IndexReport::default();

        self.report(Stage::Fetching, Some(0.0), &label);
        let branch = match options.branch.clone().or_else(|| repo.branch.clone()) {
            Some(branch) => branch,
            None => match fetcher.default_branch(&repo.owner, &repo.repo).await {
                Ok(branch) => branch,
                Err(e) if is_unit_error(&e) => {
                    report.fail(&label, e);
                    self.finish(&report, &label);
                    return Ok(report);
                }
                Err(e) => return Err(e),
            },
        };

        let tree = match fetcher
            .fetch_repo_tree(&repo.owner, &repo.repo, &branch)
            .await
        {
            Ok(tree) => tree,
            Err(e) if is_unit_error(&e) => {
                report.fail(&label, e);
                self.finish(&report, &label);
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        let prefix = repo.path.as_ref().map(|p| format!("{}/", p.trim_end_matches('/')));
        let mut selected: Vec<_> = tree
            .into_iter()
            .filter(|entry| {
                prefix
                    .as_deref()
                    .map_or(true, |p| entry.path.starts_with(p))
            })
            .filter(|entry| filter.is_match(&entry.path))
            .filter(|entry| {
                let fits = entry.size <= options.max_file_size;
                if !fits {
                    debug!(path = %entry.path, size = entry.size, "skipping oversized file");
                }
                fits
            })
            .collect();
        if selected.len() > options.max_files {
            warn!(
                matched = selected.len(),
                max_files = options.max_files,
                "repository file limit reached"
            );
            selected.truncate(options.max_files);
        }
        if selected.is_empty() {
            report.fail(&label, "no repository files matched the filters");
        }

        let total = selected.len();
        for (i, entry) in selected.into_iter().enumerate() {
            self.report(Stage::Fetching, Some(i as f64 / total as f64), &entry.path);
            let file = match fetcher
                .fetch_file(&repo.owner, &repo.repo, &entry.path, &branch)
                .await
            {
                Ok(file) => file,
                Err(e) if is_unit_error(&e) => {
                    report.fail(&entry.path, e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut meta = options.metadata.clone();
            meta.source_type = Some(SourceType::Github);
            meta.source_id = Some(format!(
                "github:{}/{}@{}:{}",
                repo.owner, repo.repo, branch, file.path
            ));
            meta.url = Some(file.html_url.clone().unwrap_or_else(|| {
                format!(
                    "https://github.com/{}/{}/blob/{}/{}",
                    repo.owner, repo.repo, branch, file.path
                )
            }));
            meta.file_path = Some(file.path.clone());
            if meta.title.is_none() {
                meta.title = Some(file.path.clone());
            }
            meta.extra.insert("owner".to_string(), json!(repo.owner));
            meta.extra.insert("repo".to_string(), json!(repo.repo));
            meta.extra.insert("branch".to_string(), json!(branch));
            meta.extra.insert("sha".to_string(), json!(file.sha));

            let unit = Unit {
                label: file.path.clone(),
                content: file.content,
                metadata: meta,
                replace: true,
            };
            self.run_unit(unit, &options.chunk, &mut report).await?;
        }
        self.finish(&report, &label);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use semindex_core::embedding::EmbeddingProvider;
    use semindex_core::store::memory::MemoryAdapter;
    use semindex_core::store::AdapterConfig;

    struct LengthProvider;

    #[async_trait]
    impl EmbeddingProvider for LengthProvider {
        fn model_name(&self) -> &str {
            "length"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_texts(&self, texts: &[String]) -> IndexResult<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0])
                .collect())
        }
    }

    async fn indexer() -> Indexer {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.initialize(&AdapterConfig::memory(2)).await.unwrap();
        Indexer::new(adapter, EmbeddingClient::new(Arc::new(LengthProvider))).unwrap()
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.initialize(&AdapterConfig::memory(3)).await.unwrap();
        let err = Indexer::new(adapter, EmbeddingClient::new(Arc::new(LengthProvider)))
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_supplied_source_id_replaces() {
        let indexer = indexer().await;
        let meta = ChunkMetadata {
            source_id: Some("note".into()),
            ..Default::default()
        };
        indexer
            .index_text("first version", meta.clone(), &ChunkOptions::default())
            .await
            .unwrap();
        let report = indexer
            .index_text("second version", meta, &ChunkOptions::default())
            .await
            .unwrap();
        assert_eq!(report.source_id.as_deref(), Some("note"));
        assert_eq!(indexer.adapter().count(None).await.unwrap(), 1);
        let source = indexer.adapter().get_source("note").await.unwrap().unwrap();
        assert_eq!(source.original_content, "second version");
    }

    #[tokio::test]
    async fn test_remote_sources_need_fetcher() {
        let indexer = indexer().await;
        let err = indexer
            .index_gist(
                "https://gist.github.com/u/abc123",
                ChunkMetadata::default(),
                &ChunkOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(err.is_configuration());

        let err = indexer
            .index_gist("file:///etc/passwd", ChunkMetadata::default(), &ChunkOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_report_source_id_only_for_single_source() {
        let mut report = IndexReport::default();
        report.record("a".into(), 2);
        assert_eq!(report.source_id.as_deref(), Some("a"));
        report.record("b".into(), 3);
        assert_eq!(report.source_id, None);
        assert_eq!(report.chunks_created, 5);
    }
}
