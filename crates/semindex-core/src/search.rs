//! Semantic and hybrid retrieval with rerank, plus content resolvers.
//!
//! The search algorithm operates entirely through the
//! [`StorageAdapter`] trait and an [`EmbeddingClient`], with no database
//! or configuration dependencies.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Embed the query and ask the adapter for `k₀ = k × candidate_multiplier`
//!    nearest neighbours (cosine similarity).
//! 2. Tokenize the query and each candidate into term sets. The lexical
//!    score is the fraction of query terms present in the candidate.
//! 3. Combine: `score = (1 - w) × semantic + w × lexical`.
//! 4. Rerank (default on): `score += boost × matched_fraction`, plus one
//!    more `boost` when a multi-term query occurs verbatim in the content.
//! 5. Stable sort by score (desc) and truncate to `k`.
//!
//! The candidate pool is the semantic top-k₀ only; lexical matching
//! rescores that pool and never pulls in documents the vector search did
//! not return. Boosts are additive and unclamped, so final scores may
//! exceed 1.0.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::embedding::EmbeddingClient;
use crate::error::{IndexError, Result};
use crate::models::{ChunkMetadata, DocumentFilter, ScoredDocument, SearchOptions, SourceType};
use crate::store::StorageAdapter;

pub const DEFAULT_K: usize = 10;
pub const DEFAULT_KEYWORD_WEIGHT: f64 = 0.3;
pub const DEFAULT_BOOST_FACTOR: f64 = 0.1;
pub const DEFAULT_CANDIDATE_MULTIPLIER: usize = 3;

const STOPWORDS: &[&str] = &[
    "an", "and", "are", "as", "at", "be", "but", "by", "do", "for", "from", "has", "have", "how",
    "if", "in", "into", "is", "it", "its", "no", "not", "of", "on", "or", "so", "such", "that",
    "the", "their", "then", "there", "these", "they", "this", "to", "was", "what", "when",
    "where", "which", "who", "why", "will", "with",
];

/// Options for [`semantic_search`].
#[derive(Debug, Clone)]
pub struct SemanticSearchOptions {
    pub k: usize,
    pub source_type: Option<SourceType>,
    pub filter: Option<DocumentFilter>,
}

impl Default for SemanticSearchOptions {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            source_type: None,
            filter: None,
        }
    }
}

/// Options for [`hybrid_search`].
#[derive(Debug, Clone)]
pub struct HybridSearchOptions {
    pub k: usize,
    /// Lexical weight `w` in `(1 - w) × semantic + w × lexical`.
    pub keyword_weight: f64,
    pub rerank: bool,
    pub boost_factor: f64,
    pub candidate_multiplier: usize,
    pub source_type: Option<SourceType>,
    pub filter: Option<DocumentFilter>,
}

impl Default for HybridSearchOptions {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            keyword_weight: DEFAULT_KEYWORD_WEIGHT,
            rerank: true,
            boost_factor: DEFAULT_BOOST_FACTOR,
            candidate_multiplier: DEFAULT_CANDIDATE_MULTIPLIER,
            source_type: None,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RerankOptions {
    pub boost_factor: f64,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self {
            boost_factor: DEFAULT_BOOST_FACTOR,
        }
    }
}

/// A ranked chunk with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    /// Final score after fusion and rerank.
    pub score: f64,
    /// Cosine similarity reported by the adapter.
    pub semantic_score: f64,
    /// Matched-term fraction (hybrid mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_score: Option<f64>,
    pub metadata: ChunkMetadata,
    pub source_id: Option<String>,
}

impl From<ScoredDocument> for SearchResult {
    fn from(scored: ScoredDocument) -> Self {
        let doc = scored.document;
        let source_id = doc.source_id.or_else(|| doc.metadata.source_id.clone());
        Self {
            id: doc.id,
            content: doc.content,
            score: scored.score,
            semantic_score: scored.score,
            lexical_score: None,
            metadata: doc.metadata,
            source_id,
        }
    }
}

fn merged_filter(
    filter: Option<&DocumentFilter>,
    source_type: Option<SourceType>,
) -> Option<DocumentFilter> {
    let mut merged = filter.cloned().unwrap_or_default();
    if source_type.is_some() {
        merged.source_type = source_type;
    }
    (!merged.is_empty()).then_some(merged)
}

/// Pure vector search: embed `query`, return the adapter's top `k`.
pub async fn semantic_search(
    adapter: &dyn StorageAdapter,
    embedder: &EmbeddingClient,
    query: &str,
    options: &SemanticSearchOptions,
) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() || options.k == 0 {
        return Ok(Vec::new());
    }
    let query_vec = embedder.embed(query).await?;
    let search_opts = SearchOptions {
        k: options.k,
        filter: merged_filter(options.filter.as_ref(), options.source_type),
    };
    let hits = adapter.search(&query_vec, &search_opts).await?;
    Ok(hits.into_iter().map(SearchResult::from).collect())
}

/// Vector search rescored with lexical overlap, then optionally reranked.
pub async fn hybrid_search(
    adapter: &dyn StorageAdapter,
    embedder: &EmbeddingClient,
    query: &str,
    options: &HybridSearchOptions,
) -> Result<Vec<SearchResult>> {
    if !(0.0..=1.0).contains(&options.keyword_weight) {
        return Err(IndexError::Validation(format!(
            "keyword_weight must be in [0, 1], got {}",
            options.keyword_weight
        )));
    }
    if query.trim().is_empty() || options.k == 0 {
        return Ok(Vec::new());
    }

    let pool_k = options.k.saturating_mul(options.candidate_multiplier.max(1));
    let query_vec = embedder.embed(query).await?;
    let search_opts = SearchOptions {
        k: pool_k,
        filter: merged_filter(options.filter.as_ref(), options.source_type),
    };
    let hits = adapter.search(&query_vec, &search_opts).await?;
    let pool_size = hits.len();

    let query_terms = tokenize(query);
    let w = options.keyword_weight;
    let mut results: Vec<SearchResult> = hits
        .into_iter()
        .map(|hit| {
            let mut result = SearchResult::from(hit);
            let lexical = lexical_score(&query_terms, &result.content);
            result.lexical_score = Some(lexical);
            result.score = (1.0 - w) * result.semantic_score + w * lexical;
            result
        })
        .collect();
    sort_results(&mut results);

    if options.rerank {
        results = rerank_results(
            query,
            results,
            &RerankOptions {
                boost_factor: options.boost_factor,
            },
        );
    }
    results.truncate(options.k);

    debug!(
        query,
        pool = pool_size,
        returned = results.len(),
        keyword_weight = w,
        "hybrid search"
    );
    Ok(results)
}

/// Boost results that literally contain query terms.
///
/// Adds `boost_factor × matched_fraction` to each score, and one more
/// `boost_factor` when a multi-term query appears verbatim (case- and
/// whitespace-insensitive). Equal scores keep their input order.
pub fn rerank_results(
    query: &str,
    mut results: Vec<SearchResult>,
    options: &RerankOptions,
) -> Vec<SearchResult> {
    let terms = tokenize(query);
    if terms.is_empty() {
        return results;
    }
    let phrase = normalize_whitespace(query);
    let multi_term = terms.len() > 1;

    for result in &mut results {
        let fraction = lexical_score(&terms, &result.content);
        result.score += options.boost_factor * fraction;
        if multi_term && normalize_whitespace(&result.content).contains(&phrase) {
            result.score += options.boost_factor;
        }
    }
    sort_results(&mut results);
    results
}

/// Lowercased, deduplicated search terms in first-occurrence order.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut seen = HashSet::new();
    lower
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() >= 2 && !STOPWORDS.contains(t))
        .filter(|t| seen.insert(t.to_string()))
        .map(str::to_string)
        .collect()
}

/// Fraction of `query_terms` present in `content`'s term set.
pub fn lexical_score(query_terms: &[String], content: &str) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_terms: HashSet<String> = tokenize(content).into_iter().collect();
    let matched = query_terms
        .iter()
        .filter(|t| content_terms.contains(*t))
        .count();
    matched as f64 / query_terms.len() as f64
}

fn normalize_whitespace(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Full text of the source a result was cut from.
///
/// Falls back to the chunk's own `originalContent`, then to its content.
/// A missing source is not an error.
pub async fn get_original_content(
    result: &SearchResult,
    adapter: &dyn StorageAdapter,
) -> Result<String> {
    let source_id = result
        .source_id
        .as_deref()
        .or(result.metadata.source_id.as_deref());
    if let Some(sid) = source_id {
        if let Some(source) = adapter.get_source(sid).await? {
            return Ok(source.original_content);
        }
    }
    Ok(result
        .metadata
        .original_content
        .clone()
        .unwrap_or_else(|| result.content.clone()))
}

/// Text of the structural section enclosing a result.
///
/// Slices the original content by the boundary's 1-indexed inclusive line
/// range. Without boundary metadata, or when the range falls outside the
/// source, returns the chunk content.
pub async fn get_section_content(
    result: &SearchResult,
    adapter: &dyn StorageAdapter,
) -> Result<String> {
    let Some(boundary) = result.metadata.boundary else {
        return Ok(result.content.clone());
    };
    let original = get_original_content(result, adapter).await?;
    let lines: Vec<&str> = original.lines().collect();
    let start = boundary.start_line.max(1);
    let end = boundary.end_line.min(lines.len());
    if start > end {
        return Ok(result.content.clone());
    }
    Ok(lines[start - 1..end].join("\n"))
}
