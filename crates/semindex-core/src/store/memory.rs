//! In-memory [`StorageAdapter`] for tests, ephemeral indexes and WASM targets.
//!
//! Documents, sources and reference counts live in one state struct behind
//! a single `parking_lot::RwLock`, so a writer's document, source and
//! vector become visible to readers at the same instant. Documents are
//! keyed by an insertion sequence number, which gives search its stable
//! tie order and list its newest-first order for free. Search is a
//! brute-force cosine scan.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use crate::embedding::validate_dimension;
use crate::error::{IndexError, Result};
use crate::models::{
    extension_stats_from_sources, ChunkMetadata, Document, DocumentFilter, DocumentUpdate,
    ExtensionStat, ListOptions, NewDocument, ScoredDocument, SearchOptions, Source,
};

use super::{generate_id, paginate, rank_by_similarity, AdapterConfig, AdapterInfo, StorageAdapter};

pub const PROVIDER: &str = "memory";

#[derive(Default)]
struct MemoryState {
    dimension: usize,
    next_seq: u64,
    docs: BTreeMap<u64, Document>,
    ids: HashMap<String, u64>,
    sources: HashMap<String, Source>,
    source_refs: HashMap<String, usize>,
}

impl MemoryState {
    /// Create the source row if this chunk may, then return the id the
    /// document should link to.
    fn attach_source(&mut self, metadata: &ChunkMetadata) -> Option<String> {
        let now = Utc::now();
        if let Some(source) = Source::from_metadata(metadata, now) {
            self.sources
                .entry(source.source_id.clone())
                .or_insert(source);
        }
        let sid = metadata.source_id.as_ref()?;
        if !self.sources.contains_key(sid) {
            return None;
        }
        *self.source_refs.entry(sid.clone()).or_insert(0) += 1;
        Some(sid.clone())
    }

    /// Drop one reference; the source goes with its last chunk.
    fn detach_source(&mut self, source_id: Option<&str>) {
        let Some(sid) = source_id else {
            return;
        };
        let remaining = match self.source_refs.get_mut(sid) {
            Some(n) => {
                *n = n.saturating_sub(1);
                *n
            }
            None => 0,
        };
        if remaining == 0 {
            self.source_refs.remove(sid);
            if self.sources.remove(sid).is_some() {
                debug!(source_id = sid, "removed source with no remaining chunks");
            }
        }
    }

    fn insert(&mut self, doc: NewDocument) -> Result<String> {
        let id = doc.id.unwrap_or_else(generate_id);
        if self.ids.contains_key(&id) {
            return Err(IndexError::Validation(format!(
                "document id already exists: {}",
                id
            )));
        }
        let source_id = self.attach_source(&doc.metadata);
        let now = Utc::now();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.docs.insert(
            seq,
            Document {
                id: id.clone(),
                source_id,
                content: doc.content,
                metadata: doc.metadata,
                embedding: doc.embedding,
                created_at: now,
                updated_at: now,
            },
        );
        self.ids.insert(id.clone(), seq);
        Ok(id)
    }

    fn remove(&mut self, id: &str) -> bool {
        let Some(seq) = self.ids.remove(id) else {
            return false;
        };
        if let Some(doc) = self.docs.remove(&seq) {
            self.detach_source(doc.source_id.as_deref());
        }
        true
    }

    fn matching<'a>(
        &'a self,
        filter: Option<&'a DocumentFilter>,
    ) -> impl DoubleEndedIterator<Item = &'a Document> + 'a {
        self.docs.values().filter(move |d| match filter {
            Some(f) => f.matches(d.source_id.as_deref(), &d.metadata),
            None => true,
        })
    }
}

/// In-memory storage adapter.
pub struct MemoryAdapter {
    state: RwLock<Option<MemoryState>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
        }
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn check_filter(filter: Option<&DocumentFilter>) -> Result<()> {
    match filter {
        Some(f) => f.validate(),
        None => Ok(()),
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn initialize(&self, config: &AdapterConfig) -> Result<()> {
        if config.options.dimension == 0 {
            return Err(IndexError::Configuration(
                "dimension must be greater than zero".into(),
            ));
        }
        let mut guard = self.state.write();
        match guard.as_ref() {
            Some(state) if state.dimension != config.options.dimension => {
                return Err(IndexError::Configuration(format!(
                    "adapter already open with dimension {}",
                    state.dimension
                )));
            }
            Some(_) => {}
            None => {
                *guard = Some(MemoryState {
                    dimension: config.options.dimension,
                    ..Default::default()
                });
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.state.write() = None;
        Ok(())
    }

    fn dimension(&self) -> Option<usize> {
        self.state.read().as_ref().map(|s| s.dimension)
    }

    async fn insert(&self, doc: NewDocument) -> Result<String> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(IndexError::NotInitialized)?;
        validate_dimension(state.dimension, &doc.embedding)?;
        state.insert(doc)
    }

    async fn insert_batch(&self, docs: Vec<NewDocument>) -> Result<Vec<String>> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(IndexError::NotInitialized)?;
        let mut seen = HashSet::with_capacity(docs.len());
        let mut prepared = Vec::with_capacity(docs.len());
        for mut doc in docs {
            validate_dimension(state.dimension, &doc.embedding)?;
            let id = doc.id.take().unwrap_or_else(generate_id);
            if state.ids.contains_key(&id) || !seen.insert(id.clone()) {
                return Err(IndexError::Validation(format!(
                    "document id already exists: {}",
                    id
                )));
            }
            doc.id = Some(id);
            prepared.push(doc);
        }
        // Every id is checked, so no insert below can fail.
        prepared.into_iter().map(|doc| state.insert(doc)).collect()
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        Ok(state
            .ids
            .get(id)
            .and_then(|seq| state.docs.get(seq))
            .cloned())
    }

    async fn update(&self, id: &str, update: DocumentUpdate) -> Result<Document> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(IndexError::NotInitialized)?;
        if let Some(ref embedding) = update.embedding {
            validate_dimension(state.dimension, embedding)?;
        }
        let seq = *state
            .ids
            .get(id)
            .ok_or_else(|| IndexError::DocumentNotFound(id.to_string()))?;

        if let Some(metadata) = update.metadata {
            let old_source = state.docs.get(&seq).and_then(|d| d.source_id.clone());
            let new_source = state.attach_source(&metadata);
            state.detach_source(old_source.as_deref());
            if let Some(doc) = state.docs.get_mut(&seq) {
                doc.metadata = metadata;
                doc.source_id = new_source;
            }
        }

        let doc = state
            .docs
            .get_mut(&seq)
            .ok_or_else(|| IndexError::DocumentNotFound(id.to_string()))?;
        if let Some(content) = update.content {
            doc.content = content;
        }
        if let Some(embedding) = update.embedding {
            doc.embedding = embedding;
        }
        doc.updated_at = Utc::now();
        Ok(doc.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(IndexError::NotInitialized)?;
        if !state.remove(id) {
            return Err(IndexError::DocumentNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete_batch(&self, ids: &[String]) -> Result<usize> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(IndexError::NotInitialized)?;
        Ok(ids.iter().filter(|id| state.remove(id)).count())
    }

    async fn search(
        &self,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<ScoredDocument>> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        validate_dimension(state.dimension, embedding)?;
        check_filter(options.filter.as_ref())?;
        let candidates = state.matching(options.filter.as_ref()).cloned();
        Ok(rank_by_similarity(candidates, embedding, options.k))
    }

    async fn count(&self, filter: Option<&DocumentFilter>) -> Result<usize> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        check_filter(filter)?;
        Ok(state.matching(filter).count())
    }

    async fn list(&self, options: &ListOptions) -> Result<Vec<Document>> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        check_filter(options.filter.as_ref())?;
        let mut docs: Vec<&Document> = state.matching(options.filter.as_ref()).rev().collect();
        // Newest first; sequence order already breaks created_at ties.
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(docs.into_iter().cloned(), options))
    }

    async fn get_source(&self, source_id: &str) -> Result<Option<Source>> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        Ok(state.sources.get(source_id).cloned())
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        let mut sources: Vec<Source> = state.sources.values().cloned().collect();
        sources.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        Ok(sources)
    }

    async fn extension_stats(&self) -> Result<Vec<ExtensionStat>> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(IndexError::NotInitialized)?;
        Ok(extension_stats_from_sources(state.sources.values()))
    }

    fn info(&self) -> AdapterInfo {
        AdapterInfo::new(PROVIDER, &["vector_search", "metadata_filter", "sources"])
    }
}
