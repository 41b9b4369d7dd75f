//! Retrieval over indexed content: semantic, hybrid, rerank and the
//! content resolvers.

mod common;

use std::sync::Arc;

use tempfile::TempDir;

use common::{embedder, open_adapter, BagOfWords, DIMS};
use semindex::config::Config;
use semindex::ingest::Indexer;
use semindex::SemanticIndex;
use semindex_core::chunk::ChunkOptions;
use semindex_core::models::{ChunkMetadata, DocumentFilter, SourceType};
use semindex_core::search::{
    get_original_content, hybrid_search, semantic_search, HybridSearchOptions, SearchResult,
    SemanticSearchOptions,
};
use semindex_core::store::AdapterConfig;

fn tagged(source_id: &str) -> ChunkMetadata {
    ChunkMetadata {
        source_id: Some(source_id.to_string()),
        ..Default::default()
    }
}

async fn ownership_corpus(dir: &TempDir) -> Indexer {
    let indexer = Indexer::new(open_adapter("memory", DIMS, dir).await, embedder()).unwrap();
    let opts = ChunkOptions::default();
    for (id, text) in [
        ("sem", "ownership ownership ownership borrow borrow"),
        (
            "lit",
            "rust ownership explained with many other unrelated words here today",
        ),
        ("other", "gardening tips for tomatoes and peppers in spring"),
    ] {
        indexer.index_text(text, tagged(id), &opts).await.unwrap();
    }
    indexer
}

fn rank_of(results: &[SearchResult], source_id: &str) -> usize {
    results
        .iter()
        .position(|r| r.source_id.as_deref() == Some(source_id))
        .unwrap()
}

#[tokio::test]
async fn keyword_weight_lifts_literal_matches() {
    let dir = TempDir::new().unwrap();
    let indexer = ownership_corpus(&dir).await;
    let adapter = indexer.adapter().as_ref();

    let semantic = semantic_search(
        adapter,
        indexer.embedder(),
        "rust ownership",
        &SemanticSearchOptions::default(),
    )
    .await
    .unwrap();
    let hybrid = hybrid_search(
        adapter,
        indexer.embedder(),
        "rust ownership",
        &HybridSearchOptions {
            keyword_weight: 0.9,
            rerank: false,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(hybrid[0].source_id.as_deref(), Some("lit"));
    assert!(rank_of(&hybrid, "lit") <= rank_of(&semantic, "lit"));
    assert_eq!(hybrid[0].lexical_score, Some(1.0));
    for pair in hybrid.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn rerank_boost_raises_scores() {
    let dir = TempDir::new().unwrap();
    let indexer = ownership_corpus(&dir).await;
    let adapter = indexer.adapter().as_ref();
    let base = HybridSearchOptions {
        keyword_weight: 0.5,
        rerank: false,
        ..Default::default()
    };

    let plain = hybrid_search(adapter, indexer.embedder(), "rust ownership", &base)
        .await
        .unwrap();
    let boosted = hybrid_search(
        adapter,
        indexer.embedder(),
        "rust ownership",
        &HybridSearchOptions {
            rerank: true,
            boost_factor: 0.5,
            ..base
        },
    )
    .await
    .unwrap();

    let plain_lit = &plain[rank_of(&plain, "lit")];
    let boosted_lit = &boosted[rank_of(&boosted, "lit")];
    // Both terms matched plus the verbatim phrase.
    assert!((boosted_lit.score - plain_lit.score - 1.0).abs() < 1e-9);
    assert_eq!(boosted[0].source_id.as_deref(), Some("lit"));
}

#[tokio::test]
async fn invalid_keyword_weight_is_rejected() {
    let dir = TempDir::new().unwrap();
    let indexer = ownership_corpus(&dir).await;
    let err = hybrid_search(
        indexer.adapter().as_ref(),
        indexer.embedder(),
        "rust",
        &HybridSearchOptions {
            keyword_weight: 1.5,
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn source_type_and_metadata_filters_narrow_results() {
    let dir = TempDir::new().unwrap();
    let indexer = ownership_corpus(&dir).await;
    let notes = dir.path().join("notes.md");
    std::fs::write(&notes, "# Notes\nrust ownership in a local file\n").unwrap();
    let mut team = ChunkMetadata::default();
    team.extra.insert("team".into(), serde_json::json!("core"));
    indexer
        .index_file(&notes, team, &ChunkOptions::default())
        .await
        .unwrap();

    let files = semantic_search(
        indexer.adapter().as_ref(),
        indexer.embedder(),
        "rust ownership",
        &SemanticSearchOptions {
            source_type: Some(SourceType::File),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(!files.is_empty());
    assert!(files
        .iter()
        .all(|r| r.metadata.source_type == Some(SourceType::File)));

    let by_team = hybrid_search(
        indexer.adapter().as_ref(),
        indexer.embedder(),
        "rust ownership",
        &HybridSearchOptions {
            filter: Some(DocumentFilter::default().with_metadata("team", serde_json::json!("core"))),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(by_team.len(), files.len());
    assert!(by_team
        .iter()
        .all(|r| r.metadata.file_path.as_deref() == Some(notes.to_string_lossy().as_ref())));
}

#[tokio::test]
async fn original_content_falls_back_without_source() {
    let dir = TempDir::new().unwrap();
    let adapter = open_adapter("memory", DIMS, &dir).await;
    let mut result = SearchResult {
        id: "orphan".into(),
        content: "chunk text".into(),
        score: 0.5,
        semantic_score: 0.5,
        lexical_score: None,
        metadata: ChunkMetadata::default(),
        source_id: Some("gone".into()),
    };
    assert_eq!(
        get_original_content(&result, adapter.as_ref()).await.unwrap(),
        "chunk text"
    );

    result.metadata.original_content = Some("whole document".into());
    assert_eq!(
        get_original_content(&result, adapter.as_ref()).await.unwrap(),
        "whole document"
    );
}

#[tokio::test]
async fn facade_indexes_and_searches_sqlite() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage = AdapterConfig::new("sqlite", DIMS)
        .with_path(dir.path().join("facade.sqlite").to_string_lossy());
    config.retrieval.k = 2;

    let index = SemanticIndex::open_with(
        &config,
        &semindex::registry::builtin_registry(),
        Arc::new(BagOfWords),
    )
    .await
    .unwrap();

    let report = index
        .index_text(
            "the columnar adapter keeps vectors in a flat file",
            ChunkMetadata::default(),
        )
        .await
        .unwrap();
    assert_eq!(report.items_indexed, 1);
    index
        .index_text("weather report for the weekend", ChunkMetadata::default())
        .await
        .unwrap();

    let hits = index.search("columnar vectors").await.unwrap();
    assert!(hits.len() <= 2);
    assert_eq!(hits[0].source_id, report.source_id);
    assert_eq!(
        index.original_content(&hits[0]).await.unwrap(),
        "the columnar adapter keeps vectors in a flat file"
    );

    index.close().await.unwrap();
    assert!(index.search("columnar").await.is_err());
}
