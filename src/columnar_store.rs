//! Columnar [`StorageAdapter`] with a flat vector index.
//!
//! Documents are held column-wise: one vector per field plus a row-major
//! `f32` matrix of embeddings and a precomputed L2-norm column. Search
//! scores every row as `dot(q, v) / (‖q‖ × ‖v‖)` using the norm column, so
//! each query touches the matrix once without renormalizing stored rows.
//!
//! With `options.path` set the table is persisted as one generation of
//! files:
//!
//! | File | Contents |
//! |------|----------|
//! | `manifest.json` | format version, generation, dimension, row count |
//! | `columns.<gen>.json` | ids, source ids, contents, metadata, timestamps |
//! | `vectors.<gen>.bin` | the embedding matrix, little-endian `f32` |
//! | `sources.<gen>.json` | source rows, original content stored once |
//!
//! A mutation is applied to a copy of the table, written out as the next
//! generation, and committed by renaming `manifest.json` into place. Only
//! the generation named by the manifest is ever read, so a write that dies
//! half way leaves the previous generation intact. Files of other
//! generations are removed on load. When `options.table_name` is set the
//! files live in a subdirectory of that name. Without a path the table is
//! purely in-process.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use semindex_core::embedding::{blob_to_vec, dot, l2_norm, validate_dimension, vec_to_blob};
use semindex_core::models::{
    extension_stats_from_sources, ChunkMetadata, Document, DocumentFilter, DocumentUpdate,
    ExtensionStat, ListOptions, NewDocument, ScoredDocument, SearchOptions, Source,
};
use semindex_core::store::{
    generate_id, paginate, restore_original_content, strip_original_content, AdapterConfig,
    AdapterInfo, StorageAdapter,
};
use semindex_core::{IndexError, Result as IndexResult};

pub const PROVIDER: &str = "columnar";

const FORMAT_VERSION: u32 = 1;
const MANIFEST_FILE: &str = "manifest.json";
const COLUMNS_STEM: &str = "columns";
const VECTORS_STEM: &str = "vectors";
const SOURCES_STEM: &str = "sources";

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    generation: u64,
    dimension: usize,
    rows: usize,
}

fn columns_file(generation: u64) -> String {
    format!("{}.{}.json", COLUMNS_STEM, generation)
}

fn vectors_file(generation: u64) -> String {
    format!("{}.{}.bin", VECTORS_STEM, generation)
}

fn sources_file(generation: u64) -> String {
    format!("{}.{}.json", SOURCES_STEM, generation)
}

/// Whether `name` is a data or temp file that `generation` does not own.
fn is_stale_file(name: &str, generation: u64) -> bool {
    if name.ends_with(".tmp") {
        return true;
    }
    let current = [
        columns_file(generation),
        vectors_file(generation),
        sources_file(generation),
    ];
    let is_data = [COLUMNS_STEM, VECTORS_STEM, SOURCES_STEM]
        .iter()
        .any(|stem| name.starts_with(&format!("{}.", stem)));
    is_data && !current.iter().any(|c| c == name)
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Columns {
    ids: Vec<String>,
    source_ids: Vec<Option<String>>,
    contents: Vec<String>,
    metadata: Vec<ChunkMetadata>,
    holds_original: Vec<bool>,
    created_at: Vec<i64>,
    updated_at: Vec<i64>,
}

impl Columns {
    fn len(&self) -> usize {
        self.ids.len()
    }

    fn is_consistent(&self) -> bool {
        let n = self.ids.len();
        self.source_ids.len() == n
            && self.contents.len() == n
            && self.metadata.len() == n
            && self.holds_original.len() == n
            && self.created_at.len() == n
            && self.updated_at.len() == n
    }

    fn remove(&mut self, row: usize) {
        self.ids.remove(row);
        self.source_ids.remove(row);
        self.contents.remove(row);
        self.metadata.remove(row);
        self.holds_original.remove(row);
        self.created_at.remove(row);
        self.updated_at.remove(row);
    }
}

#[derive(Clone)]
struct Table {
    dimension: usize,
    dir: Option<PathBuf>,
    generation: u64,
    columns: Columns,
    vectors: Vec<f32>,
    norms: Vec<f32>,
    sources: BTreeMap<String, Source>,
    row_of: HashMap<String, usize>,
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

async fn remove_stale_files(root: &Path, generation: u64) {
    let Ok(mut entries) = tokio::fs::read_dir(root).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_stale_file(&name, generation) {
            debug!(file = %name, "removing stale columnar file");
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
    }
}

impl Table {
    fn empty(dimension: usize, dir: Option<PathBuf>) -> Self {
        Self {
            dimension,
            dir,
            generation: 0,
            columns: Columns::default(),
            vectors: Vec::new(),
            norms: Vec::new(),
            sources: BTreeMap::new(),
            row_of: HashMap::new(),
        }
    }

    async fn load(dimension: usize, dir: Option<PathBuf>) -> Result<Self> {
        let Some(ref root) = dir else {
            return Ok(Self::empty(dimension, None));
        };
        tokio::fs::create_dir_all(root)
            .await
            .with_context(|| format!("Failed to create directory: {}", root.display()))?;
        let manifest_path = root.join(MANIFEST_FILE);
        if !tokio::fs::try_exists(&manifest_path).await? {
            remove_stale_files(root, 0).await;
            return Ok(Self::empty(dimension, dir));
        }

        let manifest: Manifest =
            serde_json::from_slice(&tokio::fs::read(&manifest_path).await?)
                .context("Invalid manifest")?;
        if manifest.format_version != FORMAT_VERSION {
            bail!(
                "unsupported columnar format version {}",
                manifest.format_version
            );
        }
        if manifest.dimension != dimension {
            return Err(IndexError::Configuration(format!(
                "table was created with dimension {} but the adapter is configured for {}",
                manifest.dimension, dimension
            ))
            .into());
        }

        let generation = manifest.generation;
        let columns: Columns =
            serde_json::from_slice(&tokio::fs::read(root.join(columns_file(generation))).await?)
                .context("Invalid column file")?;
        let vectors = blob_to_vec(&tokio::fs::read(root.join(vectors_file(generation))).await?);
        let sources: Vec<Source> =
            serde_json::from_slice(&tokio::fs::read(root.join(sources_file(generation))).await?)
                .context("Invalid sources file")?;

        if !columns.is_consistent()
            || columns.len() != manifest.rows
            || vectors.len() != manifest.rows * dimension
        {
            bail!(
                "columnar table at {} (generation {}) is inconsistent with its manifest",
                root.display(),
                generation
            );
        }

        let norms = vectors.chunks_exact(dimension).map(l2_norm).collect();
        let row_of = columns
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        let sources = sources
            .into_iter()
            .map(|s| (s.source_id.clone(), s))
            .collect();
        debug!(rows = manifest.rows, generation, path = %root.display(), "loaded columnar table");

        let mut table = Self {
            dimension,
            dir: dir.clone(),
            generation,
            columns,
            vectors,
            norms,
            sources,
            row_of,
        };
        remove_stale_files(root, generation).await;

        let swept = table.sweep_orphan_sources();
        if swept > 0 {
            info!(swept, "removed orphaned sources");
            table.persist().await?;
        }
        Ok(table)
    }

    /// Drop sources no row links to.
    fn sweep_orphan_sources(&mut self) -> usize {
        let referenced: HashSet<&str> = self
            .columns
            .source_ids
            .iter()
            .filter_map(|s| s.as_deref())
            .collect();
        let orphans: Vec<String> = self
            .sources
            .keys()
            .filter(|sid| !referenced.contains(sid.as_str()))
            .cloned()
            .collect();
        for sid in &orphans {
            self.sources.remove(sid);
        }
        orphans.len()
    }

    /// Write the table as the next generation and commit it through the
    /// manifest.
    async fn persist(&mut self) -> Result<()> {
        let Some(root) = self.dir.clone() else {
            return Ok(());
        };
        let next = self.generation + 1;
        write_atomic(&root.join(vectors_file(next)), &vec_to_blob(&self.vectors)).await?;
        write_atomic(&root.join(columns_file(next)), &serde_json::to_vec(&self.columns)?).await?;
        let sources: Vec<&Source> = self.sources.values().collect();
        write_atomic(&root.join(sources_file(next)), &serde_json::to_vec(&sources)?).await?;
        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            generation: next,
            dimension: self.dimension,
            rows: self.columns.len(),
        };
        write_atomic(&root.join(MANIFEST_FILE), &serde_json::to_vec_pretty(&manifest)?).await?;

        let previous = self.generation;
        self.generation = next;
        for name in [
            columns_file(previous),
            vectors_file(previous),
            sources_file(previous),
        ] {
            let _ = tokio::fs::remove_file(root.join(name)).await;
        }
        Ok(())
    }

    fn vector(&self, row: usize) -> &[f32] {
        &self.vectors[row * self.dimension..(row + 1) * self.dimension]
    }

    fn document(&self, row: usize) -> Document {
        let mut metadata = self.columns.metadata[row].clone();
        if self.columns.holds_original[row] {
            let source = self.columns.source_ids[row]
                .as_ref()
                .and_then(|sid| self.sources.get(sid));
            restore_original_content(&mut metadata, source);
        }
        Document {
            id: self.columns.ids[row].clone(),
            source_id: self.columns.source_ids[row].clone(),
            content: self.columns.contents[row].clone(),
            metadata,
            embedding: self.vector(row).to_vec(),
            created_at: from_millis(self.columns.created_at[row]),
            updated_at: from_millis(self.columns.updated_at[row]),
        }
    }

    fn matches(&self, row: usize, filter: Option<&DocumentFilter>) -> bool {
        match filter {
            Some(f) => f.matches(
                self.columns.source_ids[row].as_deref(),
                &self.columns.metadata[row],
            ),
            None => true,
        }
    }

    /// Returns `(linked_source_id, holds_original)` and strips the moved
    /// `originalContent` from `metadata`.
    fn attach_source(&mut self, metadata: &mut ChunkMetadata, now: i64) -> (Option<String>, bool) {
        if let Some(source) = Source::from_metadata(metadata, from_millis(now)) {
            self.sources
                .entry(source.source_id.clone())
                .or_insert(source);
        }
        let Some(sid) = metadata.source_id.clone() else {
            return (None, false);
        };
        let source = self.sources.get(&sid);
        let holds_original = strip_original_content(metadata, source);
        (source.map(|s| s.source_id.clone()), holds_original)
    }

    fn release_source(&mut self, source_id: &str) {
        let referenced = self
            .columns
            .source_ids
            .iter()
            .any(|s| s.as_deref() == Some(source_id));
        if !referenced && self.sources.remove(source_id).is_some() {
            debug!(source_id, "removed source with no remaining chunks");
        }
    }

    fn insert(&mut self, doc: NewDocument, now: i64) -> IndexResult<String> {
        let id = doc.id.unwrap_or_else(generate_id);
        if self.row_of.contains_key(&id) {
            return Err(IndexError::Validation(format!(
                "document id already exists: {}",
                id
            )));
        }
        let mut metadata = doc.metadata;
        let (source_id, holds_original) = self.attach_source(&mut metadata, now);

        let row = self.columns.len();
        self.columns.ids.push(id.clone());
        self.columns.source_ids.push(source_id);
        self.columns.contents.push(doc.content);
        self.columns.metadata.push(metadata);
        self.columns.holds_original.push(holds_original);
        self.columns.created_at.push(now);
        self.columns.updated_at.push(now);
        self.norms.push(l2_norm(&doc.embedding));
        self.vectors.extend_from_slice(&doc.embedding);
        self.row_of.insert(id.clone(), row);
        Ok(id)
    }

    /// Insert every document or none: ids are checked up front.
    fn insert_all(&mut self, docs: Vec<NewDocument>, now: i64) -> IndexResult<Vec<String>> {
        let mut seen = HashSet::with_capacity(docs.len());
        let mut prepared = Vec::with_capacity(docs.len());
        for mut doc in docs {
            validate_dimension(self.dimension, &doc.embedding)?;
            let id = doc.id.take().unwrap_or_else(generate_id);
            if self.row_of.contains_key(&id) || !seen.insert(id.clone()) {
                return Err(IndexError::Validation(format!(
                    "document id already exists: {}",
                    id
                )));
            }
            doc.id = Some(id);
            prepared.push(doc);
        }
        prepared
            .into_iter()
            .map(|doc| self.insert(doc, now))
            .collect()
    }

    fn remove(&mut self, id: &str) -> bool {
        let Some(row) = self.row_of.remove(id) else {
            return false;
        };
        let source_id = self.columns.source_ids[row].clone();
        self.columns.remove(row);
        self.norms.remove(row);
        self.vectors
            .drain(row * self.dimension..(row + 1) * self.dimension);
        for r in self.row_of.values_mut() {
            if *r > row {
                *r -= 1;
            }
        }
        if let Some(sid) = source_id {
            self.release_source(&sid);
        }
        true
    }
}

/// Columnar storage adapter.
pub struct ColumnarAdapter {
    table: RwLock<Option<Table>>,
    dimension: AtomicUsize,
}

impl ColumnarAdapter {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(None),
            dimension: AtomicUsize::new(0),
        }
    }
}

impl ColumnarAdapter {
    /// Apply a mutation all-or-nothing. A persisted table is changed on a
    /// copy that replaces the live table only once it is on disk.
    async fn commit<T>(
        &self,
        operation: &'static str,
        apply: impl FnOnce(&mut Table) -> IndexResult<T>,
    ) -> IndexResult<T> {
        let mut guard = self.table.write().await;
        let table = guard.as_mut().ok_or(IndexError::NotInitialized)?;
        if table.dir.is_none() {
            return apply(table);
        }
        let mut next = table.clone();
        let out = apply(&mut next)?;
        next.persist().await.map_err(backend_err(operation))?;
        *table = next;
        Ok(out)
    }
}

impl Default for ColumnarAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn backend_err(operation: &'static str) -> impl Fn(anyhow::Error) -> IndexError {
    move |err| match err.downcast::<IndexError>() {
        Ok(inner) => inner,
        Err(other) => IndexError::backend(operation, format!("{:#}", other)),
    }
}

fn check_filter(filter: Option<&DocumentFilter>) -> IndexResult<()> {
    match filter {
        Some(f) => f.validate(),
        None => Ok(()),
    }
}

#[async_trait]
impl StorageAdapter for ColumnarAdapter {
    async fn initialize(&self, config: &AdapterConfig) -> IndexResult<()> {
        let dimension = config.options.dimension;
        if dimension == 0 {
            return Err(IndexError::Configuration(
                "dimension must be greater than zero".into(),
            ));
        }
        let mut guard = self.table.write().await;
        if let Some(table) = guard.as_ref() {
            if table.dimension != dimension {
                return Err(IndexError::Configuration(format!(
                    "adapter already open with dimension {}",
                    table.dimension
                )));
            }
            return Ok(());
        }

        let dir = config.options.path.as_ref().map(|p| {
            let root = PathBuf::from(p);
            match config.options.table_name {
                Some(ref name) => root.join(name),
                None => root,
            }
        });
        let table = Table::load(dimension, dir)
            .await
            .map_err(backend_err("open table"))?;
        *guard = Some(table);
        self.dimension.store(dimension, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> IndexResult<()> {
        *self.table.write().await = None;
        self.dimension.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn dimension(&self) -> Option<usize> {
        match self.dimension.load(Ordering::SeqCst) {
            0 => None,
            d => Some(d),
        }
    }

    async fn insert(&self, doc: NewDocument) -> IndexResult<String> {
        let now = Utc::now().timestamp_millis();
        let mut ids = self
            .commit("insert", |table| table.insert_all(vec![doc], now))
            .await?;
        ids.pop()
            .ok_or_else(|| IndexError::backend("insert", "no id returned"))
    }

    async fn insert_batch(&self, docs: Vec<NewDocument>) -> IndexResult<Vec<String>> {
        let now = Utc::now().timestamp_millis();
        self.commit("insert batch", |table| table.insert_all(docs, now))
            .await
    }

    async fn get(&self, id: &str) -> IndexResult<Option<Document>> {
        let guard = self.table.read().await;
        let table = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        Ok(table.row_of.get(id).map(|&row| table.document(row)))
    }

    async fn update(&self, id: &str, update: DocumentUpdate) -> IndexResult<Document> {
        let now = Utc::now().timestamp_millis();
        self.commit("update", |table| {
            if let Some(ref embedding) = update.embedding {
                validate_dimension(table.dimension, embedding)?;
            }
            let row = *table
                .row_of
                .get(id)
                .ok_or_else(|| IndexError::DocumentNotFound(id.to_string()))?;

            if let Some(content) = update.content {
                table.columns.contents[row] = content;
            }
            if let Some(mut metadata) = update.metadata {
                let old_source = table.columns.source_ids[row].clone();
                let (source_id, holds_original) = table.attach_source(&mut metadata, now);
                table.columns.metadata[row] = metadata;
                table.columns.holds_original[row] = holds_original;
                table.columns.source_ids[row] = source_id.clone();
                if let Some(old) = old_source.filter(|old| Some(old) != source_id.as_ref()) {
                    table.release_source(&old);
                }
            }
            if let Some(embedding) = update.embedding {
                let dim = table.dimension;
                table.vectors[row * dim..(row + 1) * dim].copy_from_slice(&embedding);
                table.norms[row] = l2_norm(&embedding);
            }
            table.columns.updated_at[row] = now;
            Ok(table.document(row))
        })
        .await
    }

    async fn delete(&self, id: &str) -> IndexResult<()> {
        self.commit("delete", |table| {
            if table.remove(id) {
                Ok(())
            } else {
                Err(IndexError::DocumentNotFound(id.to_string()))
            }
        })
        .await
    }

    async fn delete_batch(&self, ids: &[String]) -> IndexResult<usize> {
        {
            let guard = self.table.read().await;
            let table = guard.as_ref().ok_or(IndexError::NotInitialized)?;
            if !ids.iter().any(|id| table.row_of.contains_key(id)) {
                return Ok(0);
            }
        }
        self.commit("delete batch", |table| {
            Ok(ids.iter().filter(|id| table.remove(id)).count())
        })
        .await
    }

    async fn search(
        &self,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> IndexResult<Vec<ScoredDocument>> {
        let guard = self.table.read().await;
        let table = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        validate_dimension(table.dimension, embedding)?;
        check_filter(options.filter.as_ref())?;

        let query_norm = l2_norm(embedding);
        let mut scored: Vec<(usize, f64)> = (0..table.columns.len())
            .filter(|&row| table.matches(row, options.filter.as_ref()))
            .map(|row| {
                let denom = query_norm * table.norms[row];
                let score = if denom < f32::EPSILON {
                    0.0
                } else {
                    dot(embedding, table.vector(row)) / denom
                };
                (row, score as f64)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(options.k);

        Ok(scored
            .into_iter()
            .map(|(row, score)| ScoredDocument {
                document: table.document(row),
                score,
            })
            .collect())
    }

    async fn count(&self, filter: Option<&DocumentFilter>) -> IndexResult<usize> {
        let guard = self.table.read().await;
        let table = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        check_filter(filter)?;
        Ok((0..table.columns.len())
            .filter(|&row| table.matches(row, filter))
            .count())
    }

    async fn list(&self, options: &ListOptions) -> IndexResult<Vec<Document>> {
        let guard = self.table.read().await;
        let table = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        check_filter(options.filter.as_ref())?;
        let mut rows: Vec<usize> = (0..table.columns.len())
            .rev()
            .filter(|&row| table.matches(row, options.filter.as_ref()))
            .collect();
        rows.sort_by(|&a, &b| table.columns.created_at[b].cmp(&table.columns.created_at[a]));
        Ok(paginate(rows, options)
            .into_iter()
            .map(|row| table.document(row))
            .collect())
    }

    async fn get_source(&self, source_id: &str) -> IndexResult<Option<Source>> {
        let guard = self.table.read().await;
        let table = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        Ok(table.sources.get(source_id).cloned())
    }

    async fn list_sources(&self) -> IndexResult<Vec<Source>> {
        let guard = self.table.read().await;
        let table = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        let mut sources: Vec<Source> = table.sources.values().cloned().collect();
        sources.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        Ok(sources)
    }

    async fn extension_stats(&self) -> IndexResult<Vec<ExtensionStat>> {
        let guard = self.table.read().await;
        let table = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        Ok(extension_stats_from_sources(table.sources.values()))
    }

    fn info(&self) -> AdapterInfo {
        AdapterInfo::new(
            PROVIDER,
            &["vector_search", "metadata_filter", "sources", "persistence"],
        )
    }
}
