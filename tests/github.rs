//! Gist and repository indexing against a mocked GitHub API.

mod common;

use std::sync::Arc;

use base64::Engine;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{embedder, open_adapter, DIMS};
use semindex::config::GitHubConfig;
use semindex::fetch::GitHubFetcher;
use semindex::ingest::{Indexer, RepoIndexOptions};
use semindex_core::chunk::ChunkOptions;
use semindex_core::models::{ChunkMetadata, DocumentFilter, ListOptions, SourceType};

fn github_config(server: &MockServer) -> GitHubConfig {
    GitHubConfig {
        api_url: server.uri(),
        throttle_delay_ms: 1,
        timeout_secs: 5,
        ..Default::default()
    }
}

async fn setup(server: &MockServer, dir: &TempDir) -> (Indexer, Arc<GitHubFetcher>) {
    let fetcher = Arc::new(GitHubFetcher::with_token(&github_config(server), None).unwrap());
    let indexer = Indexer::new(open_adapter("memory", DIMS, dir).await, embedder())
        .unwrap()
        .with_fetcher(fetcher.clone());
    (indexer, fetcher)
}

fn encoded(text: &str) -> String {
    // The contents API wraps base64 at 60 columns.
    let b64 = base64::engine::general_purpose::STANDARD.encode(text);
    b64.as_bytes()
        .chunks(60)
        .map(|c| String::from_utf8_lossy(c).to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn gist_files_become_sources() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let (indexer, _) = setup(&server, &dir).await;

    Mock::given(method("GET"))
        .and(path("/gists/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "abc123",
            "description": "Shell helpers",
            "html_url": "https://gist.github.com/octo/abc123",
            "owner": { "login": "octo" },
            "files": {
                "setup.sh": {
                    "filename": "setup.sh",
                    "language": "Shell",
                    "content": "echo installing dependencies"
                },
                "notes.md": {
                    "filename": "notes.md",
                    "language": "Markdown",
                    "content": "partial",
                    "truncated": true,
                    "raw_url": format!("{}/raw/notes.md", server.uri())
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/raw/notes.md"))
        .respond_with(ResponseTemplate::new(200).set_body_string("full notes body from raw url"))
        .expect(1)
        .mount(&server)
        .await;

    let report = indexer
        .index_gist(
            "https://gist.github.com/octo/abc123",
            ChunkMetadata::default(),
            &ChunkOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(report.items_indexed, 2);
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.source_id, None);

    let notes = indexer
        .adapter()
        .get_source("gist:abc123/notes.md")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notes.original_content, "full notes body from raw url");
    assert_eq!(notes.source_type, SourceType::Gist);

    let docs = indexer
        .adapter()
        .list(&ListOptions {
            filter: Some(DocumentFilter::source_id("gist:abc123/setup.sh")),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    let meta = &docs[0].metadata;
    assert_eq!(meta.title.as_deref(), Some("Shell helpers"));
    assert_eq!(meta.url.as_deref(), Some("https://gist.github.com/octo/abc123"));
    assert_eq!(meta.extra["owner"], json!("octo"));
    assert_eq!(meta.extra["language"], json!("Shell"));
}

#[tokio::test]
async fn missing_gist_is_reported() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let (indexer, _) = setup(&server, &dir).await;

    Mock::given(method("GET"))
        .and(path("/gists/deadbeef"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .mount(&server)
        .await;

    let report = indexer
        .index_gist(
            "https://gist.github.com/deadbeef",
            ChunkMetadata::default(),
            &ChunkOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(report.items_indexed, 0);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("404"));
}

#[tokio::test]
async fn repo_tree_is_filtered_and_indexed() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let (indexer, fetcher) = setup(&server, &dir).await;

    Mock::given(method("GET"))
        .and(path("/repos/octo/tools"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "default_branch": "main" }))
                .insert_header("x-ratelimit-remaining", "4999"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/tools/git/trees/main"))
        .and(query_param("recursive", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "truncated": false,
            "tree": [
                { "path": "src", "type": "tree", "sha": "t0" },
                { "path": "src/lib.rs", "type": "blob", "sha": "s1", "size": 40 },
                { "path": "src/gone.rs", "type": "blob", "sha": "s2", "size": 20 },
                { "path": "README.md", "type": "blob", "sha": "s3", "size": 30 },
                { "path": "assets/big.bin", "type": "blob", "sha": "s4", "size": 9000000 },
                { "path": "target/debug/out.rs", "type": "blob", "sha": "s5", "size": 10 }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/tools/contents/src/lib.rs"))
        .and(query_param("ref", "main"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "path": "src/lib.rs",
                    "sha": "s1",
                    "encoding": "base64",
                    "content": encoded("pub fn answer() -> u32 { 42 }\n"),
                    "html_url": "https://github.com/octo/tools/blob/main/src/lib.rs"
                }))
                .insert_header("x-ratelimit-remaining", "4997"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/tools/contents/src/gone.rs"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/tools/contents/README.md"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "path": "README.md",
            "sha": "s3",
            "encoding": "base64",
            "content": encoded("# Tools\nA small toolbox.\n")
        })))
        .mount(&server)
        .await;

    let report = indexer
        .index_github_repo("https://github.com/octo/tools", &RepoIndexOptions::default())
        .await
        .unwrap();

    assert_eq!(report.items_indexed, 2);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("src/gone.rs"));

    let lib = indexer
        .adapter()
        .get_source("github:octo/tools@main:src/lib.rs")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lib.original_content, "pub fn answer() -> u32 { 42 }\n");
    assert_eq!(lib.source_type, SourceType::Github);
    assert_eq!(
        lib.url.as_deref(),
        Some("https://github.com/octo/tools/blob/main/src/lib.rs")
    );

    let sources = indexer.adapter().list_sources().await.unwrap();
    assert!(sources.iter().all(|s| !s.source_id.contains("big.bin")));
    assert!(sources.iter().all(|s| !s.source_id.contains("target/")));

    assert_eq!(fetcher.limiter().remaining().await, Some(4997));
}

#[tokio::test]
async fn repo_subdirectory_and_branch_come_from_url() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let (indexer, _) = setup(&server, &dir).await;

    Mock::given(method("GET"))
        .and(path("/repos/octo/tools/git/trees/dev"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tree": [
                { "path": "docs/guide.md", "type": "blob", "sha": "g1", "size": 20 },
                { "path": "src/main.rs", "type": "blob", "sha": "m1", "size": 20 }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/tools/contents/docs/guide.md"))
        .and(query_param("ref", "dev"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "path": "docs/guide.md",
            "sha": "g1",
            "encoding": "base64",
            "content": encoded("Guide text on the dev branch.")
        })))
        .expect(1)
        .mount(&server)
        .await;

    let report = indexer
        .index_github_repo(
            "https://github.com/octo/tools/tree/dev/docs",
            &RepoIndexOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(report.items_indexed, 1);
    assert_eq!(
        report.source_id.as_deref(),
        Some("github:octo/tools@dev:docs/guide.md")
    );
}

#[tokio::test]
async fn non_github_urls_are_rejected() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let (indexer, _) = setup(&server, &dir).await;

    let err = indexer
        .index_github_repo("https://gitlab.com/octo/tools", &RepoIndexOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(server.received_requests().await.unwrap().is_empty());
}
