//! Core data models used throughout semindex.
//!
//! These types represent the sources, chunk documents, and search inputs
//! that flow through the indexing and retrieval pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{IndexError, Result};

/// Origin of an indexed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Text,
    File,
    Gist,
    Github,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Text => "text",
            SourceType::File => "file",
            SourceType::Gist => "gist",
            SourceType::Github => "github",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(SourceType::Text),
            "file" => Ok(SourceType::File),
            "gist" => Ok(SourceType::Gist),
            "github" => Ok(SourceType::Github),
            other => Err(IndexError::Validation(format!(
                "unknown source type: '{}'",
                other
            ))),
        }
    }
}

/// Structural unit a chunk was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryKind {
    Heading,
    Section,
    Function,
    Class,
    Block,
    Paragraph,
}

/// Line span of the semantic section enclosing a chunk.
///
/// Lines are 1-indexed and inclusive. The span describes the whole
/// structural unit, so every piece of an oversized section carries the
/// same boundary and the section can be rebuilt from the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Boundary {
    pub start_line: usize,
    pub end_line: usize,
    #[serde(rename = "type")]
    pub kind: BoundaryKind,
    pub level: u8,
}

/// Metadata attached to every chunk.
///
/// Known fields are typed so that invariants such as "only chunk 0 carries
/// `originalContent`" stay checkable; anything else lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary: Option<Boundary>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChunkMetadata {
    /// Whether this chunk is allowed to create its source row.
    pub fn creates_source(&self) -> bool {
        self.source_id.is_some() && self.chunk_index == Some(0) && self.original_content.is_some()
    }

    /// Serialized view used for open-ended filter matching.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Object(Map::new()))
    }
}

/// A chunk record to be written by an adapter.
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    /// Caller-supplied id; generated when absent.
    pub id: Option<String>,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

/// One indexed, embedded unit as stored by an adapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    pub source_id: Option<String>,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied by [`StorageAdapter::update`](crate::store::StorageAdapter::update).
#[derive(Debug, Clone, Default)]
pub struct DocumentUpdate {
    pub content: Option<String>,
    pub metadata: Option<ChunkMetadata>,
    pub embedding: Option<Vec<f32>>,
}

/// One originally submitted content unit, stored once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub source_id: String,
    pub original_content: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub source_type: SourceType,
    pub created_at: DateTime<Utc>,
}

impl Source {
    /// Build the source row carried by a chunk's metadata, if it may create one.
    pub fn from_metadata(metadata: &ChunkMetadata, now: DateTime<Utc>) -> Option<Source> {
        if !metadata.creates_source() {
            return None;
        }
        Some(Source {
            source_id: metadata.source_id.clone()?,
            original_content: metadata.original_content.clone()?,
            title: metadata.title.clone(),
            url: metadata.url.clone().or_else(|| metadata.file_path.clone()),
            source_type: metadata.source_type.unwrap_or(SourceType::Text),
            created_at: now,
        })
    }
}

/// Restricts search, count, and list to matching documents.
///
/// Every present field must match. `metadata` entries are compared for
/// equality against top-level metadata keys (camelCase).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    pub source_type: Option<SourceType>,
    pub source_id: Option<String>,
    pub metadata: Map<String, Value>,
}

impl DocumentFilter {
    pub fn source_type(source_type: SourceType) -> Self {
        Self {
            source_type: Some(source_type),
            ..Default::default()
        }
    }

    pub fn source_id(source_id: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.source_type.is_none() && self.source_id.is_none() && self.metadata.is_empty()
    }

    /// Reject metadata keys that cannot be addressed as a single JSON path segment.
    pub fn validate(&self) -> Result<()> {
        for key in self.metadata.keys() {
            let valid = !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return Err(IndexError::Validation(format!(
                    "invalid metadata filter key: '{}'",
                    key
                )));
            }
        }
        Ok(())
    }

    pub fn matches(&self, source_id: Option<&str>, metadata: &ChunkMetadata) -> bool {
        if let Some(st) = self.source_type {
            if metadata.source_type != Some(st) {
                return false;
            }
        }
        if let Some(ref sid) = self.source_id {
            if source_id.or(metadata.source_id.as_deref()) != Some(sid.as_str()) {
                return false;
            }
        }
        if self.metadata.is_empty() {
            return true;
        }
        let value = metadata.to_value();
        self.metadata
            .iter()
            .all(|(k, expected)| value.get(k) == Some(expected))
    }
}

/// Options for nearest-neighbour search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub k: usize,
    pub filter: Option<DocumentFilter>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { k: 10, filter: None }
    }
}

/// Offset pagination, newest first.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub limit: Option<usize>,
    pub offset: usize,
    pub filter: Option<DocumentFilter>,
}

/// A document paired with its similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f64,
}

/// Per-extension aggregate over indexed sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtensionStat {
    pub extension: String,
    pub source_count: i64,
    pub total_bytes: i64,
}

/// File extension used for [`ExtensionStat`] bookkeeping.
pub fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit(['/', '\\']).next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Aggregate extension statistics from a set of sources.
pub fn extension_stats_from_sources<'a>(
    sources: impl IntoIterator<Item = &'a Source>,
) -> Vec<ExtensionStat> {
    let mut by_ext: std::collections::BTreeMap<String, (i64, i64)> = Default::default();
    for source in sources {
        let Some(ext) = source.url.as_deref().and_then(extension_of) else {
            continue;
        };
        let entry = by_ext.entry(ext).or_default();
        entry.0 += 1;
        entry.1 += source.original_content.len() as i64;
    }
    by_ext
        .into_iter()
        .map(|(extension, (source_count, total_bytes))| ExtensionStat {
            extension,
            source_count,
            total_bytes,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_camel_case_roundtrip() {
        let meta = ChunkMetadata {
            source_id: Some("s1".into()),
            source_type: Some(SourceType::File),
            chunk_index: Some(0),
            file_path: Some("docs/a.md".into()),
            boundary: Some(Boundary {
                start_line: 1,
                end_line: 4,
                kind: BoundaryKind::Heading,
                level: 2,
            }),
            extra: {
                let mut m = Map::new();
                m.insert("lang".into(), json!("en"));
                m
            },
            ..Default::default()
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["sourceId"], "s1");
        assert_eq!(value["sourceType"], "file");
        assert_eq!(value["chunkIndex"], 0);
        assert_eq!(value["boundary"]["startLine"], 1);
        assert_eq!(value["boundary"]["type"], "heading");
        assert_eq!(value["lang"], "en");

        let back: ChunkMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_creates_source_requires_chunk_zero_and_content() {
        let mut meta = ChunkMetadata {
            source_id: Some("s".into()),
            chunk_index: Some(1),
            original_content: Some("full".into()),
            ..Default::default()
        };
        assert!(!meta.creates_source());
        meta.chunk_index = Some(0);
        assert!(meta.creates_source());
        meta.original_content = None;
        assert!(!meta.creates_source());
    }

    #[test]
    fn test_filter_matches() {
        let meta = ChunkMetadata {
            source_id: Some("s1".into()),
            source_type: Some(SourceType::Gist),
            extra: {
                let mut m = Map::new();
                m.insert("lang".into(), json!("rust"));
                m
            },
            ..Default::default()
        };
        assert!(DocumentFilter::default().matches(Some("s1"), &meta));
        assert!(DocumentFilter::source_type(SourceType::Gist).matches(Some("s1"), &meta));
        assert!(!DocumentFilter::source_type(SourceType::File).matches(Some("s1"), &meta));
        assert!(DocumentFilter::source_id("s1").matches(None, &meta));
        assert!(!DocumentFilter::source_id("s2").matches(Some("s1"), &meta));
        let f = DocumentFilter::default().with_metadata("lang", json!("rust"));
        assert!(f.matches(None, &meta));
        let f = DocumentFilter::default().with_metadata("lang", json!("go"));
        assert!(!f.matches(None, &meta));
    }

    #[test]
    fn test_filter_rejects_path_keys() {
        let f = DocumentFilter::default().with_metadata("a.b", json!(1));
        assert!(f.validate().is_err());
        let f = DocumentFilter::default().with_metadata("file_path", json!(1));
        assert!(f.validate().is_ok());
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("src/main.RS").as_deref(), Some("rs"));
        assert_eq!(extension_of("https://x/y/README.md").as_deref(), Some("md"));
        assert_eq!(extension_of(".gitignore"), None);
        assert_eq!(extension_of("Makefile"), None);
    }

    #[test]
    fn test_source_type_parse() {
        assert_eq!("gist".parse::<SourceType>().unwrap(), SourceType::Gist);
        assert!("svn".parse::<SourceType>().is_err());
    }
}
