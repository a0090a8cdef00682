//! Repository fetch pipeline.
//!
//! For each repository: consult the cache, otherwise page through the
//! account's commits under the shared [`RateLimiter`], retrying transient
//! failures, and finalize a [`RepositoryDataset`] whose status says
//! exactly how complete it is. Repositories are fetched by a bounded pool
//! of tasks; one repository's failure never affects another's.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use commitscope_core::{
    sort_records, CommitRecord, DataOrigin, FetchError, FetchStatus, PartialReason, RepoSelection,
    RepositoryDataset, RepositorySnapshot, ScopeConfig, ScopeError,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheKey, CacheLookup, CacheStore};
use crate::cancel::CancelToken;
use crate::normalize::{commit_from_json, files_from_json};
use crate::ratelimit::RateLimiter;
use crate::retry::{Retry, RetryPolicy, RetryState};
use crate::source::{ApiResponse, CommitSource};

/// Every dataset of a run plus the discovery outcome.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// One dataset per targeted repository, in request order.
    pub datasets: Vec<RepositoryDataset>,
    /// Why repository discovery failed, if it was requested and did.
    pub discovery_error: Option<String>,
}

/// How a single request ended when it did not succeed.
#[derive(Debug, Clone, PartialEq)]
enum RequestFailure {
    Cancelled,
    RateLimited { reset_at: DateTime<Utc> },
    Terminal(FetchError),
    Exhausted { attempts: u32, error: FetchError },
}

impl RequestFailure {
    fn into_status(self) -> FetchStatus {
        match self {
            RequestFailure::Cancelled => FetchStatus::Partial {
                reason: PartialReason::Cancelled,
            },
            RequestFailure::RateLimited { reset_at } => FetchStatus::Partial {
                reason: PartialReason::RateLimited { reset_at },
            },
            RequestFailure::Terminal(error) => FetchStatus::Failed {
                reason: error.to_string(),
            },
            RequestFailure::Exhausted { attempts, error } => FetchStatus::Partial {
                reason: PartialReason::RetriesExhausted {
                    attempts,
                    error: error.to_string(),
                },
            },
        }
    }
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestFailure::Cancelled => write!(f, "cancelled"),
            RequestFailure::RateLimited { reset_at } => write!(f, "rate limited until {reset_at}"),
            RequestFailure::Terminal(error) => write!(f, "{error}"),
            RequestFailure::Exhausted { attempts, error } => {
                write!(f, "gave up after {attempts} attempts: {error}")
            }
        }
    }
}

/// Fetches every configured repository.
///
/// Cheap to clone: all state is shared.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use commitscope_core::ScopeConfig;
/// use commitscope_fetch::cancel::CancelToken;
/// use commitscope_fetch::fetcher::Fetcher;
/// use commitscope_fetch::github::GitHubClient;
/// use commitscope_fetch::ratelimit::RateLimiter;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), commitscope_core::ScopeError> {
/// let config = ScopeConfig {
///     account: "octocat".into(),
///     repositories: vec!["hello-world".into()],
///     ..ScopeConfig::default()
/// };
/// let client = Arc::new(GitHubClient::new(&config.fetch)?);
/// let fetcher = Fetcher::new(config, client, Arc::new(RateLimiter::unknown()));
/// let outcome = fetcher.fetch_all(&CancelToken::never()).await?;
/// println!("{} datasets", outcome.datasets.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Fetcher {
    config: Arc<ScopeConfig>,
    source: Arc<dyn CommitSource>,
    limiter: Arc<RateLimiter>,
    cache: Option<Arc<CacheStore>>,
    policy: RetryPolicy,
    force_refresh: bool,
}

impl Fetcher {
    /// Create a fetcher without a cache.
    pub fn new(
        config: ScopeConfig,
        source: Arc<dyn CommitSource>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config.fetch);
        Self {
            config: Arc::new(config),
            source,
            limiter,
            cache: None,
            policy,
            force_refresh: false,
        }
    }

    /// Read fresh entries from, and write finished fetches to, `cache`.
    pub fn with_cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Ignore existing cache entries; fresh results are still written.
    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    /// Override the retry policy derived from the configuration.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetch every targeted repository.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Config`] if the configuration is invalid.
    /// Nothing else is fatal: per-repository problems are reported in
    /// each dataset's status and discovery problems in
    /// [`FetchOutcome::discovery_error`].
    pub async fn fetch_all(&self, cancel: &CancelToken) -> Result<FetchOutcome, ScopeError> {
        self.config.validate()?;

        let (names, discovery_error) = match self.config.selection() {
            RepoSelection::Listed(names) => {
                let mut seen = HashSet::new();
                let names: Vec<String> = names
                    .into_iter()
                    .filter(|name| seen.insert(name.clone()))
                    .collect();
                (names, None)
            }
            RepoSelection::DiscoverAll => match self.discover(cancel).await {
                Ok(names) => (names, None),
                Err(failure) => {
                    warn!(account = %self.config.account, error = %failure, "repository discovery failed");
                    (Vec::new(), Some(failure.to_string()))
                }
            },
        };

        info!(
            account = %self.config.account,
            repositories = names.len(),
            concurrency = self.config.fetch.concurrency,
            "fetching repositories"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.fetch.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for (index, name) in names.iter().enumerate() {
            let fetcher = self.clone();
            let cancel = cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            let name = name.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, fetcher.fetch_repository(&name, &cancel).await)
            });
        }

        let mut slots: Vec<Option<RepositoryDataset>> = vec![None; names.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, dataset)) => slots[index] = Some(dataset),
                Err(e) => warn!(error = %e, "fetch task did not finish"),
            }
        }

        let datasets = slots
            .into_iter()
            .zip(names)
            .map(|(slot, name)| {
                slot.unwrap_or_else(|| {
                    RepositoryDataset::failed(name, "fetch task did not finish", Utc::now())
                })
            })
            .collect();

        Ok(FetchOutcome {
            datasets,
            discovery_error,
        })
    }

    /// Fetch one repository, from the cache when a fresh entry exists.
    ///
    /// Never fails: the returned dataset's status records what happened.
    pub async fn fetch_repository(&self, repo: &str, cancel: &CancelToken) -> RepositoryDataset {
        let cached = self.cache.as_ref().map(|cache| {
            let key = CacheKey::new(
                self.config.account.as_str(),
                repo,
                CacheKey::scope_for(&self.config.fetch),
            );
            (cache, key)
        });

        if let Some((cache, key)) = &cached {
            if self.force_refresh {
                let key = key.clone();
                if let Err(e) = on_cache(cache, move |c| c.invalidate(&key)).await {
                    warn!(repository = repo, error = %e, "failed to invalidate cache entry");
                }
            } else {
                let key = key.clone();
                match on_cache(cache, move |c| c.get(&key)).await {
                    Ok(CacheLookup::Hit(entry)) => {
                        info!(repository = repo, commits = entry.records.len(), "using cached commits");
                        return self.dataset_from_cache(entry);
                    }
                    Ok(CacheLookup::Miss(reason)) => {
                        debug!(repository = repo, ?reason, "cache miss");
                    }
                    Err(e) => {
                        warn!(repository = repo, error = %e, "cache read failed, fetching remotely");
                    }
                }
            }
        }

        let dataset = self.fetch_remote(repo, cancel).await;

        let cacheable = match &dataset.status {
            FetchStatus::Complete => true,
            FetchStatus::Partial { reason } => matches!(reason, PartialReason::Truncated { .. }),
            FetchStatus::Failed { .. } => false,
        };
        if let (true, Some((cache, key))) = (cacheable, cached) {
            let snapshot = dataset.snapshot.clone();
            let records = dataset.records.clone();
            let ttl = self.config.cache.ttl();
            let written = on_cache(cache, move |c| c.put(&key, &snapshot, &records, ttl)).await;
            if let Err(e) = written {
                warn!(repository = repo, error = %e, "failed to write cache entry");
            }
        }

        info!(
            repository = repo,
            commits = dataset.records.len(),
            status = %dataset.status,
            "repository fetched"
        );
        dataset
    }

    fn dataset_from_cache(&self, entry: CacheEntry) -> RepositoryDataset {
        let mut records = entry.records;
        sort_records(&mut records);
        let status = if entry.snapshot.truncated {
            FetchStatus::Partial {
                reason: PartialReason::Truncated {
                    limit: self.config.fetch.max_commits_per_repo,
                },
            }
        } else {
            FetchStatus::Complete
        };
        RepositoryDataset {
            snapshot: entry.snapshot,
            records,
            status,
            origin: DataOrigin::Cache,
        }
    }

    async fn fetch_remote(&self, repo: &str, cancel: &CancelToken) -> RepositoryDataset {
        let fetched_at = Utc::now();
        let source = self.source.as_ref();
        let account = self.config.account.as_str();
        let fetch = &self.config.fetch;

        let info = match self
            .request(cancel, repo, move || source.repository(account, repo))
            .await
        {
            Ok(response) => response.body,
            Err(failure) => {
                let status = failure.into_status();
                if status.is_failed() {
                    warn!(repository = repo, status = %status, "repository unavailable");
                }
                return RepositoryDataset {
                    snapshot: RepositorySnapshot::new(repo, "", fetched_at),
                    records: Vec::new(),
                    status,
                    origin: DataOrigin::Remote,
                };
            }
        };

        let mut snapshot = RepositorySnapshot::new(repo, info.default_branch, fetched_at);
        let mut records: Vec<CommitRecord> = Vec::new();
        let mut failure: Option<RequestFailure> = None;
        let limit = fetch.max_commits_per_repo;
        let per_page = fetch.page_size;
        let max_files = fetch.max_files_per_commit;
        let mut page = 1u32;

        'pages: loop {
            let response = match self
                .request(cancel, repo, move || {
                    source.list_commits(account, repo, page, per_page)
                })
                .await
            {
                Ok(response) => response,
                Err(f) => {
                    failure = Some(f);
                    break;
                }
            };
            debug!(repository = repo, page, entries = response.body.len(), "commit page received");

            for entry in &response.body {
                if records.len() >= limit {
                    snapshot.truncated = true;
                    break 'pages;
                }
                let mut record = match commit_from_json(repo, entry, max_files) {
                    Ok(record) => record,
                    Err(e) => {
                        snapshot.skipped_records += 1;
                        debug!(repository = repo, error = %e, "skipping malformed commit entry");
                        continue;
                    }
                };

                if fetch.fetch_file_stats && entry.get("files").is_none() {
                    let sha = record.sha.clone();
                    let detail = self
                        .request(cancel, repo, || source.commit_detail(account, repo, &sha))
                        .await;
                    match detail {
                        Ok(detail) => record.files = files_from_json(&detail.body, max_files),
                        Err(RequestFailure::Terminal(e)) => {
                            debug!(repository = repo, sha = %record.sha, error = %e, "file details unavailable");
                        }
                        Err(f) => {
                            records.push(record);
                            failure = Some(f);
                            break 'pages;
                        }
                    }
                }
                records.push(record);
            }

            if !response.has_next || response.body.is_empty() {
                break;
            }
            if records.len() >= limit {
                snapshot.truncated = true;
                break;
            }
            page += 1;
        }

        let duplicates = sort_records(&mut records);
        if duplicates > 0 {
            debug!(repository = repo, duplicates, "dropped duplicate commits");
        }
        snapshot.commit_count = records.len();

        let status = match failure {
            Some(RequestFailure::Terminal(e)) => {
                warn!(repository = repo, error = %e, "commit listing failed");
                return RepositoryDataset::failed(repo, e.to_string(), fetched_at);
            }
            Some(f) => f.into_status(),
            None if snapshot.truncated => FetchStatus::Partial {
                reason: PartialReason::Truncated { limit },
            },
            None => FetchStatus::Complete,
        };

        RepositoryDataset {
            snapshot,
            records,
            status,
            origin: DataOrigin::Remote,
        }
    }

    async fn discover(&self, cancel: &CancelToken) -> Result<Vec<String>, RequestFailure> {
        let source = self.source.as_ref();
        let account = self.config.account.as_str();
        let cap = self.config.fetch.max_repositories;
        let per_page = self.config.fetch.page_size;

        let mut names = Vec::new();
        let mut page = 1u32;
        loop {
            let response = self
                .request(cancel, "repositories", move || {
                    source.list_repositories(account, page, per_page)
                })
                .await?;
            let done = !response.has_next || response.body.is_empty();
            names.extend(response.body.into_iter().map(|info| info.name));
            if names.len() >= cap {
                names.truncate(cap);
                break;
            }
            if done {
                break;
            }
            page += 1;
        }

        info!(account, repositories = names.len(), "discovered repositories");
        Ok(names)
    }

    /// Issue one logical request: reserve budget, call, report the quota
    /// back, and drive the retry machine on failure.
    async fn request<T, F, Fut>(
        &self,
        cancel: &CancelToken,
        resource: &str,
        mut call: F,
    ) -> Result<ApiResponse<T>, RequestFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ApiResponse<T>, FetchError>>,
    {
        let mut retry = Retry::new(self.policy);
        loop {
            match retry.state().clone() {
                RetryState::Attempt { attempt, .. } => {
                    if cancel.is_cancelled() {
                        return Err(RequestFailure::Cancelled);
                    }
                    let granted = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(RequestFailure::Cancelled),
                        granted = self.limiter.reserve(1) => granted,
                    };
                    match granted {
                        Ok(()) => {}
                        Err(FetchError::RateLimited { reset_at }) => {
                            return Err(RequestFailure::RateLimited { reset_at });
                        }
                        Err(error) => return Err(RequestFailure::Terminal(error)),
                    }

                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(RequestFailure::Cancelled),
                        result = call() => result,
                    };

                    match result {
                        Ok(response) => {
                            if let Some(quota) = response.quota {
                                self.limiter.update(quota.remaining, quota.reset_at).await;
                            }
                            return Ok(response);
                        }
                        Err(FetchError::RateLimited { reset_at }) => {
                            warn!(resource, %reset_at, "rate limited, waiting for reset");
                            self.limiter.update(0, reset_at).await;
                        }
                        Err(error) if error.is_terminal() => {
                            return Err(RequestFailure::Terminal(error));
                        }
                        Err(error) => {
                            debug!(resource, attempt, error = %error, "request failed");
                            retry.fail(error);
                        }
                    }
                }
                RetryState::Wait {
                    attempt, backoff, ..
                } => {
                    warn!(
                        resource,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "request failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(RequestFailure::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    retry.resume();
                }
                RetryState::GiveUp {
                    attempts,
                    last_error,
                    ..
                } => {
                    warn!(resource, attempts, error = %last_error, "giving up on request");
                    return Err(RequestFailure::Exhausted {
                        attempts,
                        error: last_error,
                    });
                }
            }
        }
    }
}

/// Run a blocking SQLite operation off the async worker threads.
async fn on_cache<T, F>(cache: &Arc<CacheStore>, op: F) -> Result<T, ScopeError>
where
    T: Send + 'static,
    F: FnOnce(&CacheStore) -> Result<T, ScopeError> + Send + 'static,
{
    let cache = Arc::clone(cache);
    tokio::task::spawn_blocking(move || op(&cache))
        .await
        .map_err(|e| ScopeError::Cache(format!("cache task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_operations_run_on_the_blocking_pool() {
        let cache = Arc::new(CacheStore::in_memory().unwrap());
        let key = CacheKey::new("octocat", "hello-world", "all");
        let snapshot = RepositorySnapshot::new("hello-world", "main", Utc::now());

        let stored = {
            let key = key.clone();
            on_cache(&cache, move |c| {
                c.put(&key, &snapshot, &[], std::time::Duration::from_secs(60))
            })
            .await
        };
        assert!(stored.is_ok());

        let lookup = on_cache(&cache, move |c| c.get(&key)).await.unwrap();
        assert!(matches!(lookup, CacheLookup::Hit(entry) if entry.records.is_empty()));
    }

    #[test]
    fn request_failures_map_to_statuses() {
        assert_eq!(
            RequestFailure::Cancelled.into_status(),
            FetchStatus::Partial {
                reason: PartialReason::Cancelled
            }
        );
        assert!(RequestFailure::Terminal(FetchError::NotFound("o/r".into()))
            .into_status()
            .is_failed());

        let exhausted = RequestFailure::Exhausted {
            attempts: 3,
            error: FetchError::Transient("502".into()),
        };
        assert_eq!(
            exhausted.to_string(),
            "gave up after 3 attempts: transient fetch error: 502"
        );
        assert!(exhausted.into_status().is_partial());

        let reset_at = Utc::now();
        assert_eq!(
            RequestFailure::RateLimited { reset_at }.into_status(),
            FetchStatus::Partial {
                reason: PartialReason::RateLimited { reset_at }
            }
        );
    }
}
