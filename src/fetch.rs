//! Remote content fetching for gists and GitHub repositories.
//!
//! [`ContentFetcher`] is the seam the indexing pipeline depends on;
//! [`GitHubFetcher`] implements it against the GitHub REST API. Every
//! request goes through a [`RateLimiter`] fed by the
//! `x-ratelimit-remaining` / `x-ratelimit-reset` response headers:
//!
//! - remaining below `throttle_threshold` → fixed delay before each request
//! - remaining at zero → sleep until the reset time, bounded by `max_reset_wait_secs`
//!
//! Non-success statuses become [`IndexError::Fetch`]; the pipeline records
//! them as ordinary per-unit errors.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, ACCEPT, USER_AGENT};
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use semindex_core::{IndexError, Result as IndexResult};

use crate::config::GitHubConfig;

/// One file of a gist.
#[derive(Debug, Clone, PartialEq)]
pub struct GistFile {
    pub filename: String,
    pub content: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gist {
    pub id: String,
    pub description: Option<String>,
    pub html_url: String,
    pub owner: Option<String>,
    pub files: Vec<GistFile>,
}

/// A blob entry of a repository tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeEntry {
    pub path: String,
    pub sha: String,
    pub size: u64,
}

/// Decoded file contents plus provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoFile {
    pub path: String,
    pub content: String,
    pub sha: String,
    pub html_url: Option<String>,
}

/// Source of remote content for the indexing pipeline.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch_gist(&self, id: &str) -> IndexResult<Gist>;
    async fn default_branch(&self, owner: &str, repo: &str) -> IndexResult<String>;
    /// All blobs reachable from `reference`, recursively.
    async fn fetch_repo_tree(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> IndexResult<Vec<TreeEntry>>;
    async fn fetch_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> IndexResult<RepoFile>;
}

// ============ URL parsing ============

/// `owner/repo` plus optional branch and subdirectory from a GitHub URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
    pub branch: Option<String>,
    pub path: Option<String>,
}

fn parse_http_url(url: &str) -> IndexResult<Url> {
    let parsed =
        Url::parse(url).map_err(|e| IndexError::Validation(format!("invalid URL '{}': {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(IndexError::Validation(format!(
            "unsupported URL scheme '{}' in '{}'",
            other, url
        ))),
    }
}

fn path_segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|segs| segs.filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Extract the gist id from `https://gist.github.com/[user/]<id>`.
pub fn parse_gist_url(url: &str) -> IndexResult<String> {
    let parsed = parse_http_url(url)?;
    if parsed.host_str() != Some("gist.github.com") {
        return Err(IndexError::Validation(format!("not a gist URL: {}", url)));
    }
    let id = path_segments(&parsed)
        .pop()
        .map(|s| s.trim_end_matches(".git").to_string())
        .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()))
        .ok_or_else(|| IndexError::Validation(format!("gist URL has no id: {}", url)))?;
    Ok(id)
}

/// Parse `https://github.com/<owner>/<repo>[/tree/<branch>[/<path>]]`.
pub fn parse_github_repo_url(url: &str) -> IndexResult<RepoRef> {
    let parsed = parse_http_url(url)?;
    match parsed.host_str() {
        Some("github.com") | Some("www.github.com") => {}
        _ => {
            return Err(IndexError::Validation(format!(
                "not a GitHub repository URL: {}",
                url
            )))
        }
    }
    let segments = path_segments(&parsed);
    if segments.len() < 2 {
        return Err(IndexError::Validation(format!(
            "GitHub URL must name owner and repository: {}",
            url
        )));
    }
    let (branch, path) = match segments.get(2).map(String::as_str) {
        Some("tree") | Some("blob") => {
            let branch = segments.get(3).cloned();
            let rest = segments[4.min(segments.len())..].join("/");
            (branch, (!rest.is_empty()).then_some(rest))
        }
        _ => (None, None),
    };
    Ok(RepoRef {
        owner: segments[0].clone(),
        repo: segments[1].trim_end_matches(".git").to_string(),
        branch,
        path,
    })
}

// ============ Rate limiter ============

#[derive(Debug, Default)]
struct RateState {
    remaining: Option<u32>,
    reset_at: Option<i64>,
    /// Requests are held until this instant after the quota ran out.
    paused_until: Option<Instant>,
}

/// Quota-aware limiter shared by every request of a fetcher.
///
/// The lock is only held to decide how long to wait; the sleep itself
/// happens outside it, so quota updates and other callers never queue
/// behind a sleeping request.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<RateState>>,
    threshold: u32,
    delay: Duration,
    max_reset_wait: Duration,
}

impl RateLimiter {
    pub fn new(config: &GitHubConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(RateState::default())),
            threshold: config.throttle_threshold,
            delay: Duration::from_millis(config.throttle_delay_ms),
            max_reset_wait: Duration::from_secs(config.max_reset_wait_secs),
        }
    }

    /// Wait until the next request is allowed.
    pub async fn wait(&self) {
        let pause = self.next_pause().await;
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    async fn next_pause(&self) -> Duration {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if let Some(until) = state.paused_until {
            if until > now {
                return until - now;
            }
            state.paused_until = None;
        }
        match state.remaining {
            Some(0) => {
                let secs = state
                    .reset_at
                    .map(|r| (r - chrono::Utc::now().timestamp()).max(0) as u64)
                    .unwrap_or(0);
                let wait = Duration::from_secs(secs).min(self.max_reset_wait);
                state.remaining = None;
                if !wait.is_zero() {
                    warn!(?wait, "GitHub rate limit exhausted, sleeping until reset");
                    state.paused_until = Some(now + wait);
                }
                wait
            }
            Some(n) if n < self.threshold => {
                debug!(remaining = n, delay = ?self.delay, "throttling GitHub request");
                self.delay
            }
            _ => Duration::ZERO,
        }
    }

    /// Record quota headers from a response.
    pub async fn observe(&self, headers: &HeaderMap) {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<i64>().ok())
        };
        let mut state = self.state.lock().await;
        if let Some(remaining) = read("x-ratelimit-remaining") {
            state.remaining = Some(remaining.max(0) as u32);
        }
        if let Some(reset) = read("x-ratelimit-reset") {
            state.reset_at = Some(reset);
        }
    }

    pub async fn remaining(&self) -> Option<u32> {
        self.state.lock().await.remaining
    }
}

// ============ GitHub fetcher ============

#[derive(Deserialize)]
struct GistResponse {
    id: String,
    description: Option<String>,
    html_url: String,
    owner: Option<OwnerResponse>,
    #[serde(default)]
    files: std::collections::BTreeMap<String, GistFileResponse>,
}

#[derive(Deserialize)]
struct OwnerResponse {
    login: String,
}

#[derive(Deserialize)]
struct GistFileResponse {
    filename: String,
    language: Option<String>,
    content: Option<String>,
    #[serde(default)]
    truncated: bool,
    raw_url: Option<String>,
}

#[derive(Deserialize)]
struct RepoResponse {
    default_branch: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeItemResponse>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeItemResponse {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    #[serde(default)]
    size: u64,
}

#[derive(Deserialize)]
struct ContentsResponse {
    path: String,
    sha: String,
    content: Option<String>,
    encoding: Option<String>,
    html_url: Option<String>,
}

/// [`ContentFetcher`] backed by the GitHub REST API.
pub struct GitHubFetcher {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
    limiter: RateLimiter,
}

fn fetch_err(err: anyhow::Error) -> IndexError {
    match err.downcast::<IndexError>() {
        Ok(inner) => inner,
        Err(other) => IndexError::Fetch(format!("{:#}", other)),
    }
}

impl GitHubFetcher {
    /// Build a fetcher, reading the token from `config.token_env` if set.
    pub fn new(config: &GitHubConfig) -> anyhow::Result<Self> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty());
        Self::with_token(config, token)
    }

    pub fn with_token(config: &GitHubConfig, token: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            limiter: RateLimiter::new(config),
        })
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    async fn get(&self, url: &str) -> anyhow::Result<reqwest::Response> {
        self.limiter.wait().await;
        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, concat!("semindex/", env!("CARGO_PKG_VERSION")))
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        self.limiter.observe(response.headers()).await;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Fetch(format!(
                "GET {} returned {}: {}",
                url,
                status,
                body.chars().take(200).collect::<String>()
            ))
            .into());
        }
        Ok(response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> anyhow::Result<T> {
        let response = self.get(url).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ContentFetcher for GitHubFetcher {
    async fn fetch_gist(&self, id: &str) -> IndexResult<Gist> {
        async {
            let gist: GistResponse = self.get_json(&format!("{}/gists/{}", self.api_url, id)).await?;
            let mut files = Vec::with_capacity(gist.files.len());
            for file in gist.files.into_values() {
                let content = match (file.content, file.truncated, file.raw_url) {
                    (_, true, Some(raw)) => self.get(&raw).await?.text().await?,
                    (Some(content), _, _) => content,
                    (None, _, Some(raw)) => self.get(&raw).await?.text().await?,
                    (None, _, None) => continue,
                };
                files.push(GistFile {
                    filename: file.filename,
                    content,
                    language: file.language,
                });
            }
            debug!(gist = %gist.id, files = files.len(), "fetched gist");
            Ok::<_, anyhow::Error>(Gist {
                id: gist.id,
                description: gist.description.filter(|d| !d.is_empty()),
                html_url: gist.html_url,
                owner: gist.owner.map(|o| o.login),
                files,
            })
        }
        .await
        .map_err(fetch_err)
    }

    async fn default_branch(&self, owner: &str, repo: &str) -> IndexResult<String> {
        let url = format!("{}/repos/{}/{}", self.api_url, owner, repo);
        self.get_json::<RepoResponse>(&url)
            .await
            .map(|r| r.default_branch)
            .map_err(fetch_err)
    }

    async fn fetch_repo_tree(
        &self,
        owner: &str,
        repo: &str,
        reference: &str,
    ) -> IndexResult<Vec<TreeEntry>> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.api_url, owner, repo, reference
        );
        let tree: TreeResponse = self.get_json(&url).await.map_err(fetch_err)?;
        if tree.truncated {
            warn!(owner, repo, "repository tree listing was truncated by the API");
        }
        Ok(tree
            .tree
            .into_iter()
            .filter(|item| item.kind == "blob")
            .map(|item| TreeEntry {
                path: item.path,
                sha: item.sha,
                size: item.size,
            })
            .collect())
    }

    async fn fetch_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> IndexResult<RepoFile> {
        async {
            let url = format!(
                "{}/repos/{}/{}/contents/{}?ref={}",
                self.api_url, owner, repo, path, reference
            );
            let contents: ContentsResponse = self.get_json(&url).await?;
            let raw = contents
                .content
                .ok_or_else(|| anyhow!("{} has no inline content", path))?;
            let content = match contents.encoding.as_deref() {
                Some("base64") => {
                    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
                    let bytes = base64::engine::general_purpose::STANDARD.decode(compact)?;
                    String::from_utf8(bytes).map_err(|_| anyhow!("{} is not valid UTF-8", path))?
                }
                _ => raw,
            };
            Ok::<_, anyhow::Error>(RepoFile {
                path: contents.path,
                content,
                sha: contents.sha,
                html_url: contents.html_url,
            })
        }
        .await
        .map_err(fetch_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gist_url() {
        assert_eq!(
            parse_gist_url("https://gist.github.com/octocat/aa5a315d61ae9438b18d").unwrap(),
            "aa5a315d61ae9438b18d"
        );
        assert_eq!(
            parse_gist_url("http://gist.github.com/aa5a315d61ae9438b18d/").unwrap(),
            "aa5a315d61ae9438b18d"
        );
        assert!(parse_gist_url("ftp://gist.github.com/x/abc")
            .unwrap_err()
            .is_validation());
        assert!(parse_gist_url("https://example.com/x/abc")
            .unwrap_err()
            .is_validation());
        assert!(parse_gist_url("not a url").unwrap_err().is_validation());
    }

    #[test]
    fn test_parse_github_repo_url() {
        let r = parse_github_repo_url("https://github.com/rust-lang/cargo.git").unwrap();
        assert_eq!((r.owner.as_str(), r.repo.as_str()), ("rust-lang", "cargo"));
        assert_eq!(r.branch, None);

        let r = parse_github_repo_url("https://github.com/o/r/tree/dev/docs/guide").unwrap();
        assert_eq!(r.branch.as_deref(), Some("dev"));
        assert_eq!(r.path.as_deref(), Some("docs/guide"));

        assert!(parse_github_repo_url("ssh://github.com/o/r")
            .unwrap_err()
            .is_validation());
        assert!(parse_github_repo_url("https://github.com/only-owner")
            .unwrap_err()
            .is_validation());
    }

    #[tokio::test]
    async fn test_limiter_throttles_below_threshold() {
        let config = GitHubConfig {
            throttle_threshold: 10,
            throttle_delay_ms: 40,
            ..Default::default()
        };
        let limiter = RateLimiter::new(&config);
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "3".parse().unwrap());
        limiter.observe(&headers).await;
        assert_eq!(limiter.remaining().await, Some(3));

        let start = std::time::Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(35));
    }

    #[tokio::test]
    async fn test_limiter_reset_wait_is_bounded() {
        let config = GitHubConfig {
            max_reset_wait_secs: 0,
            ..Default::default()
        };
        let limiter = RateLimiter::new(&config);
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
        let far_future = (chrono::Utc::now().timestamp() + 3600).to_string();
        headers.insert("x-ratelimit-reset", far_future.parse().unwrap());
        limiter.observe(&headers).await;

        let start = std::time::Instant::now();
        limiter.wait().await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(limiter.remaining().await, None);
    }

    #[tokio::test]
    async fn test_limiter_sleeps_without_holding_state() {
        let config = GitHubConfig {
            max_reset_wait_secs: 60,
            ..Default::default()
        };
        let limiter = RateLimiter::new(&config);
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
        let reset = (chrono::Utc::now().timestamp() + 2).to_string();
        headers.insert("x-ratelimit-reset", reset.parse().unwrap());
        limiter.observe(&headers).await;

        let sleeper = tokio::spawn({
            let limiter = limiter.clone();
            async move { limiter.wait().await }
        });
        while limiter.state.lock().await.paused_until.is_none() {
            tokio::task::yield_now().await;
        }

        // The first caller is asleep; state stays readable and writable.
        let mut fresh = HeaderMap::new();
        fresh.insert("x-ratelimit-remaining", "4000".parse().unwrap());
        limiter.observe(&fresh).await;
        assert_eq!(limiter.remaining().await, Some(4000));
        assert!(!sleeper.is_finished());

        // A second caller during the pause waits for the same reset.
        let start = Instant::now();
        limiter.wait().await;
        let waited = start.elapsed();
        assert!(waited > Duration::from_millis(500), "{:?}", waited);
        assert!(waited < Duration::from_secs(3), "{:?}", waited);
        sleeper.await.unwrap();
    }
}
