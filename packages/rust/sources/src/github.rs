//! GitHub REST contents API host.
//!
//! Directories are listed with `GET /repos/{owner}/{repo}/contents/{path}?ref=`
//! and walked depth-first; files are fetched with the raw media type so the
//! response body is the unmodified file content.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use corpusbuilder_shared::{CorpusBuilderError, Result, SourceSpec};

use crate::SourceHost;

/// User-Agent string for API requests (GitHub rejects requests without one).
const USER_AGENT: &str = concat!("CorpusBuilder/", env!("CARGO_PKG_VERSION"));

/// Media type for JSON directory listings.
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";

/// Media type returning raw file bytes.
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";

/// Per-request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// One entry of a contents API directory listing.
#[derive(Debug, Deserialize)]
struct ContentEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

/// The contents API answers with an array for directories and an object for files.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Dir(Vec<ContentEntry>),
    File(ContentEntry),
}

/// Source host backed by the GitHub REST API.
pub struct GitHubHost {
    client: Client,
    api_base: Url,
    excluded_dirs: Vec<String>,
}

impl GitHubHost {
    /// Create a host for `api_base` (e.g. `https://api.github.com`), optionally authenticated.
    pub fn new(api_base: &str, token: Option<String>) -> Result<Self> {
        let api_base = Url::parse(api_base).map_err(|e| {
            CorpusBuilderError::config(format!("invalid provider api_base '{api_base}': {e}"))
        })?;
        if api_base.cannot_be_a_base() {
            return Err(CorpusBuilderError::config(format!(
                "provider api_base '{api_base}' cannot carry a path"
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                CorpusBuilderError::config("GitHub token contains invalid header characters")
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                CorpusBuilderError::Network(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            api_base,
            excluded_dirs: Vec::new(),
        })
    }

    /// Never descend into directories with these names.
    pub fn with_excluded_dirs(mut self, dirs: Vec<String>) -> Self {
        self.excluded_dirs = dirs;
        self
    }

    /// Build `<api_base>/repos/{owner}/{repo}/contents/{path}?ref={ref}`.
    fn contents_url(&self, spec: &SourceSpec, path: &str) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["repos", spec.owner.as_str(), spec.repo.as_str(), "contents"])
                .extend(path.split('/').filter(|s| !s.is_empty()));
        }
        url.query_pairs_mut().append_pair("ref", &spec.git_ref);
        url
    }

    async fn send(&self, url: &Url, accept: &'static str) -> Result<Response> {
        self.client
            .get(url.as_str())
            .header(ACCEPT, accept)
            .send()
            .await
            .map_err(|e| CorpusBuilderError::Network(format!("{url}: {e}")))
    }

    /// List one directory level.
    async fn list_dir(&self, spec: &SourceSpec, dir: &str) -> Result<Vec<ContentEntry>> {
        let url = self.contents_url(spec, dir);
        debug!(%url, "listing directory");

        let response = self.send(&url, JSON_MEDIA_TYPE).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CorpusBuilderError::source_unavailable(
                spec.to_string(),
                format!("'{dir}' not found (repository, ref, or path does not exist)"),
            ));
        }
        check_status(&response, &url)?;

        let listing: ContentsResponse = response.json().await.map_err(|e| {
            CorpusBuilderError::validation(format!("{url}: unexpected listing body: {e}"))
        })?;

        Ok(match listing {
            ContentsResponse::Dir(entries) => entries,
            ContentsResponse::File(entry) => vec![entry],
        })
    }

    fn is_excluded(&self, dir_path: &str) -> bool {
        dir_path
            .rsplit('/')
            .next()
            .is_some_and(|name| self.excluded_dirs.iter().any(|d| d == name))
    }
}

#[async_trait]
impl SourceHost for GitHubHost {
    fn name(&self) -> &str {
        "github"
    }

    #[instrument(skip_all, fields(source = %spec))]
    async fn list_files(&self, spec: &SourceSpec) -> Result<Vec<String>> {
        let mut pending = vec![spec.root().to_string()];
        let mut files = Vec::new();

        while let Some(dir) = pending.pop() {
            for entry in self.list_dir(spec, &dir).await? {
                match entry.kind.as_str() {
                    "file" => files.push(entry.path),
                    "dir" if self.is_excluded(&entry.path) => {
                        debug!(path = %entry.path, "excluded directory, not descending");
                    }
                    "dir" => pending.push(entry.path),
                    // Submodules and symlinks carry no inline content.
                    _ => {}
                }
            }
        }

        Ok(files)
    }

    async fn fetch_file(&self, spec: &SourceSpec, path: &str) -> Result<Vec<u8>> {
        let url = self.contents_url(spec, path);
        debug!(%url, "fetching file");

        let response = self.send(&url, RAW_MEDIA_TYPE).await?;
        check_status(&response, &url)?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CorpusBuilderError::Network(format!("{url}: body read failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Status classification
// ---------------------------------------------------------------------------

/// Map a non-success response onto the error taxonomy.
fn check_status(response: &Response, url: &Url) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let headers = response.headers();
    // Primary limits report `remaining: 0`; secondary limits only send `retry-after`.
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");
    let throttled = exhausted || headers.contains_key("retry-after");

    if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && throttled) {
        return Err(CorpusBuilderError::RateLimited {
            retry_after: retry_after(headers),
        });
    }

    Err(CorpusBuilderError::Http {
        status: status.as_u16(),
        url: url.to_string(),
    })
}

/// Delay requested by the host: `Retry-After` seconds, else time until `X-RateLimit-Reset`.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    if let Some(secs) = header_u64("retry-after") {
        return Some(Duration::from_secs(secs));
    }

    let reset = header_u64("x-ratelimit-reset")?;
    let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
    Some(Duration::from_secs(reset.saturating_sub(now)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn spec(root: &str) -> SourceSpec {
        SourceSpec::new("acme", "handbook", root, "main")
    }

    #[test]
    fn test_contents_url() {
        let host = GitHubHost::new("https://api.github.com", None).unwrap();
        let url = host.contents_url(&spec("docs"), "docs/guide/intro.md");
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/acme/handbook/contents/docs/guide/intro.md?ref=main"
        );

        let root = host.contents_url(&spec(""), "");
        assert_eq!(
            root.as_str(),
            "https://api.github.com/repos/acme/handbook/contents?ref=main"
        );
    }

    #[test]
    fn test_retry_after_prefers_header() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("7"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));

        assert_eq!(retry_after(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_list_files_walks_directories() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/handbook/contents/docs"))
            .and(query_param("ref", "main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing_body(&[
                ("file", "docs/index.md"),
                ("dir", "docs/guide"),
                ("dir", "docs/zh"),
                ("symlink", "docs/latest"),
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/handbook/contents/docs/guide"))
            .respond_with(ResponseTemplate::new(200).set_body_json(listing_body(&[
                ("file", "docs/guide/setup.mdx"),
                ("file", "docs/guide/logo.png"),
            ])))
            .mount(&server)
            .await;

        // Must never be requested.
        Mock::given(method("GET"))
            .and(path("/repos/acme/handbook/contents/docs/zh"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let host = GitHubHost::new(&server.uri(), None)
            .unwrap()
            .with_excluded_dirs(vec!["zh".into()]);
        let mut files = host.list_files(&spec("docs")).await.unwrap();
        files.sort();

        assert_eq!(
            files,
            vec![
                "docs/guide/logo.png".to_string(),
                "docs/guide/setup.mdx".to_string(),
                "docs/index.md".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_repository_is_source_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let host = GitHubHost::new(&server.uri(), None).unwrap();
        let err = host.list_files(&spec("docs")).await.unwrap_err();
        assert!(matches!(err, CorpusBuilderError::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_rate_limit_detected() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("x-ratelimit-remaining", "0")
                    .insert_header("retry-after", "2"),
            )
            .mount(&server)
            .await;

        let host = GitHubHost::new(&server.uri(), None).unwrap();
        let err = host
            .fetch_file(&spec("docs"), "docs/index.md")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_secondary_rate_limit_detected() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).insert_header("retry-after", "1"))
            .mount(&server)
            .await;

        let host = GitHubHost::new(&server.uri(), None).unwrap();
        let err = host
            .fetch_file(&spec("docs"), "docs/a.md")
            .await
            .unwrap_err();
        assert!(matches!(err, CorpusBuilderError::RateLimited { .. }), "got {err:?}");
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(1)));

        let err = host.list_files(&spec("docs")).await.unwrap_err();
        assert!(matches!(err, CorpusBuilderError::RateLimited { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_plain_forbidden_is_not_retryable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let host = GitHubHost::new(&server.uri(), None).unwrap();
        let err = host
            .fetch_file(&spec("docs"), "docs/a.md")
            .await
            .unwrap_err();
        assert!(matches!(err, CorpusBuilderError::Http { status: 403, .. }), "got {err:?}");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_file_sends_raw_accept_and_token() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/acme/handbook/contents/docs/index.md"))
            .and(header("accept", RAW_MEDIA_TYPE))
            .and(header("authorization", "Bearer sekrit"))
            .respond_with(ResponseTemplate::new(200).set_body_string("# Welcome\n"))
            .mount(&server)
            .await;

        let host = GitHubHost::new(&server.uri(), Some("sekrit".into())).unwrap();
        let bytes = host
            .fetch_file(&spec("docs"), "docs/index.md")
            .await
            .unwrap();
        assert_eq!(bytes, b"# Welcome\n");
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_not_retryable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let host = GitHubHost::new(&server.uri(), None).unwrap();
        let err = host
            .fetch_file(&spec("docs"), "docs/gone.md")
            .await
            .unwrap_err();
        assert!(matches!(err, CorpusBuilderError::Http { status: 404, .. }));
        assert!(!err.is_retryable());
    }

    fn listing_body(entries: &[(&str, &str)]) -> Vec<std::collections::HashMap<String, String>> {
        entries
            .iter()
            .map(|(kind, path)| {
                let name = path.rsplit('/').next().unwrap_or(path);
                std::collections::HashMap::from([
                    ("type".to_string(), kind.to_string()),
                    ("path".to_string(), path.to_string()),
                    ("name".to_string(), name.to_string()),
                ])
            })
            .collect()
    }
}
