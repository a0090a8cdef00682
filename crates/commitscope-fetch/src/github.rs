//! GitHub REST v3 implementation of [`CommitSource`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use commitscope_core::{FetchConfig, FetchError, ScopeError};
use reqwest::header::{HeaderMap, ACCEPT, LINK, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::ratelimit::Quota;
use crate::source::{ApiResponse, CommitSource, RepoInfo};

const USER_AGENT: &str = concat!("commitscope/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Wait assumed for secondary rate limits that do not say how long.
const DEFAULT_RETRY_AFTER_SECS: i64 = 60;

/// HTTP client for the GitHub API.
///
/// Every call issues exactly one request and reports the
/// `x-ratelimit-*` headers and the `Link: rel="next"` header back to the
/// caller.
///
/// # Examples
///
/// ```no_run
/// use commitscope_core::FetchConfig;
/// use commitscope_fetch::github::GitHubClient;
///
/// let config = FetchConfig {
///     token: Some("ghp_xxxx".into()),
///     ..FetchConfig::default()
/// };
/// let client = GitHubClient::new(&config).unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GitHubClient {
    /// Build a client for `config.api_base_url`, authenticating with
    /// `config.token` when present.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &FetchConfig) -> Result<Self, ScopeError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ScopeError::Http(format!("failed to create GitHub client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
        })
    }

    async fn send(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, FetchError> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "GET");

        let mut request = self
            .http
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        request
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("request to {path} failed: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<ApiResponse<T>, FetchError> {
        let response = self.send(path, query).await?;
        decode(response, path).await
    }
}

async fn decode<T: DeserializeOwned>(
    response: reqwest::Response,
    path: &str,
) -> Result<ApiResponse<T>, FetchError> {
    let status = response.status();
    let headers = response.headers().clone();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &headers, &body, path));
    }

    let body = response.json::<T>().await.map_err(|e| {
        if e.is_decode() {
            FetchError::Malformed(format!("unexpected response body from {path}: {e}"))
        } else {
            FetchError::Transient(format!("failed to read response from {path}: {e}"))
        }
    })?;

    Ok(ApiResponse {
        body,
        quota: parse_quota(&headers),
        has_next: has_next_link(&headers),
    })
}

#[async_trait]
impl CommitSource for GitHubClient {
    async fn list_repositories(
        &self,
        account: &str,
        page: u32,
        per_page: u32,
    ) -> Result<ApiResponse<Vec<RepoInfo>>, FetchError> {
        let path = format!("/users/{account}/repos");
        let query = [
            ("type", "owner".to_string()),
            ("sort", "pushed".to_string()),
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ];
        self.get_json(&path, &query).await
    }

    async fn repository(
        &self,
        account: &str,
        repo: &str,
    ) -> Result<ApiResponse<RepoInfo>, FetchError> {
        self.get_json(&format!("/repos/{account}/{repo}"), &[]).await
    }

    async fn list_commits(
        &self,
        account: &str,
        repo: &str,
        page: u32,
        per_page: u32,
    ) -> Result<ApiResponse<Vec<serde_json::Value>>, FetchError> {
        let path = format!("/repos/{account}/{repo}/commits");
        let query = [
            ("author", account.to_string()),
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ];
        let response = self.send(&path, &query).await?;

        // 409 Conflict: "Git Repository is empty."
        if response.status() == StatusCode::CONFLICT {
            debug!(repo, "repository has no commits");
            return Ok(ApiResponse {
                body: Vec::new(),
                quota: parse_quota(response.headers()),
                has_next: false,
            });
        }
        decode(response, &path).await
    }

    async fn commit_detail(
        &self,
        account: &str,
        repo: &str,
        sha: &str,
    ) -> Result<ApiResponse<serde_json::Value>, FetchError> {
        self.get_json(&format!("/repos/{account}/{repo}/commits/{sha}"), &[])
            .await
    }
}

/// Read `x-ratelimit-remaining` and `x-ratelimit-reset` (epoch seconds).
///
/// Returns `None` unless both headers are present and valid.
///
/// # Examples
///
/// ```
/// use reqwest::header::HeaderMap;
/// use commitscope_fetch::github::parse_quota;
///
/// let mut headers = HeaderMap::new();
/// headers.insert("x-ratelimit-remaining", "4999".parse().unwrap());
/// headers.insert("x-ratelimit-reset", "1700000000".parse().unwrap());
/// let quota = parse_quota(&headers).unwrap();
/// assert_eq!(quota.remaining, 4999);
/// assert_eq!(quota.reset_at.timestamp(), 1_700_000_000);
/// ```
pub fn parse_quota(headers: &HeaderMap) -> Option<Quota> {
    let remaining = header_str(headers, "x-ratelimit-remaining")?.parse().ok()?;
    let reset: i64 = header_str(headers, "x-ratelimit-reset")?.parse().ok()?;
    let reset_at = DateTime::from_timestamp(reset, 0)?;
    Some(Quota {
        remaining,
        reset_at,
    })
}

/// Returns `true` if the `Link` header advertises a `rel="next"` page.
pub fn has_next_link(headers: &HeaderMap) -> bool {
    header_str(headers, LINK.as_str())
        .map(|link| {
            link.split(',')
                .any(|part| part.split(';').skip(1).any(|p| p.trim() == r#"rel="next""#))
        })
        .unwrap_or(false)
}

/// Map an unsuccessful HTTP status to the fetch error taxonomy.
///
/// Primary and secondary rate limits become [`FetchError::RateLimited`]
/// with the instant the provider allows requests again. Other statuses:
///
/// | status | error |
/// |---|---|
/// | 401, 403 | `Unauthorized` |
/// | 404, 410 | `NotFound` |
/// | 408, 5xx | `Transient` |
/// | other | `Malformed` |
pub fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    context: &str,
) -> FetchError {
    let code = status.as_u16();

    if code == 403 || code == 429 {
        if let Some(quota) = parse_quota(headers).filter(|q| q.remaining == 0) {
            return FetchError::RateLimited {
                reset_at: quota.reset_at,
            };
        }
        let retry_after = header_str(headers, RETRY_AFTER.as_str()).and_then(|v| v.parse().ok());
        let secondary = body.to_ascii_lowercase().contains("rate limit");
        if code == 429 || retry_after.is_some() || secondary {
            let secs = retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return FetchError::RateLimited {
                reset_at: Utc::now() + chrono::Duration::seconds(secs),
            };
        }
    }

    match code {
        401 | 403 => FetchError::Unauthorized(format!("{status} for {context}")),
        404 | 410 => FetchError::NotFound(context.trim_start_matches('/').to_string()),
        408 | 500..=599 => FetchError::Transient(format!("{status} for {context}")),
        _ => FetchError::Malformed(format!("unexpected status {status} for {context}")),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}
