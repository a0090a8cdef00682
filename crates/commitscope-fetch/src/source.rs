//! Abstraction over the remote repository service.

use async_trait::async_trait;
use commitscope_core::FetchError;
use serde::{Deserialize, Serialize};

use crate::ratelimit::Quota;

/// A successful response together with the metadata the fetcher needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    /// Decoded body.
    pub body: T,
    /// Budget reported by the provider, if the response carried one.
    pub quota: Option<Quota>,
    /// The provider advertised a further page.
    pub has_next: bool,
}

impl<T> ApiResponse<T> {
    /// A single-page response without quota headers.
    pub fn new(body: T) -> Self {
        Self {
            body,
            quota: None,
            has_next: false,
        }
    }
}

/// Repository metadata.
///
/// # Examples
///
/// ```
/// use commitscope_fetch::source::RepoInfo;
///
/// let info: RepoInfo = serde_json::from_str(
///     r#"{"name": "hello-world", "default_branch": "main", "stargazers_count": 80}"#,
/// ).unwrap();
/// assert_eq!(info.default_branch, "main");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    /// Repository name without the owner.
    pub name: String,
    /// Default branch; empty for repositories without commits.
    #[serde(default)]
    pub default_branch: String,
}

/// Remote source of repositories and commits.
///
/// Implemented by [`GitHubClient`](crate::github::GitHubClient) and by
/// in-process fakes in tests. Implementations perform exactly one request
/// per call; rate limiting, retries and paging decisions belong to the
/// [`Fetcher`](crate::fetcher::Fetcher).
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// One page of the account's repositories. Pages are 1-based.
    async fn list_repositories(
        &self,
        account: &str,
        page: u32,
        per_page: u32,
    ) -> Result<ApiResponse<Vec<RepoInfo>>, FetchError>;

    /// Metadata of a single repository.
    async fn repository(&self, account: &str, repo: &str)
        -> Result<ApiResponse<RepoInfo>, FetchError>;

    /// One page of commits authored by `account`, newest first. Entries
    /// are returned raw and validated by [`normalize`](crate::normalize).
    async fn list_commits(
        &self,
        account: &str,
        repo: &str,
        page: u32,
        per_page: u32,
    ) -> Result<ApiResponse<Vec<serde_json::Value>>, FetchError>;

    /// A single commit including its file list.
    async fn commit_detail(
        &self,
        account: &str,
        repo: &str,
        sha: &str,
    ) -> Result<ApiResponse<serde_json::Value>, FetchError>;
}
