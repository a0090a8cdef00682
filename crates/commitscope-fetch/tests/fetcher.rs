use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use commitscope_core::{
    DataOrigin, FetchError, FetchStatus, PartialReason, RepositoryDataset, ScopeConfig,
};
use commitscope_fetch::cache::{CacheKey, CacheLookup, CacheStore, MissReason};
use commitscope_fetch::ratelimit::Quota;
use commitscope_fetch::retry::RetryPolicy;
use commitscope_fetch::{
    cancellation, ApiResponse, CancelHandle, CancelToken, CommitSource, Fetcher, RateLimiter,
    RepoInfo,
};
use serde_json::{json, Value};
use tokio::time::Instant;

/// In-process stand-in for the GitHub API.
#[derive(Default)]
struct FakeSource {
    repos: BTreeMap<String, Vec<Value>>,
    details: HashMap<String, Value>,
    discovery: Vec<String>,
    discovery_error: Option<FetchError>,
    failures: Mutex<HashMap<(String, u32), VecDeque<FetchError>>>,
    cancel_after_first_page: Option<CancelHandle>,
    withhold_quota: bool,
    issued: Mutex<Vec<Instant>>,
    list_calls: AtomicUsize,
    detail_calls: AtomicUsize,
}

impl FakeSource {
    fn with_repo(mut self, name: &str, commits: Vec<Value>) -> Self {
        self.repos.insert(name.to_string(), commits);
        self
    }

    fn fail_page(self, repo: &str, page: u32, errors: Vec<FetchError>) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert((repo.to_string(), page), errors.into());
        self
    }

    fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn record_request(&self) {
        self.issued.lock().unwrap().push(Instant::now());
    }

    fn issued_before(&self, deadline: Instant) -> usize {
        self.issued
            .lock()
            .unwrap()
            .iter()
            .filter(|at| **at < deadline)
            .count()
    }
}

fn paginate<T>(items: &[T], page: u32, per_page: u32) -> (&[T], bool) {
    let start = ((page - 1) * per_page) as usize;
    if start >= items.len() {
        return (&[], false);
    }
    let end = (start + per_page as usize).min(items.len());
    (&items[start..end], end < items.len())
}

fn info(name: &str) -> RepoInfo {
    RepoInfo {
        name: name.to_string(),
        default_branch: "main".into(),
    }
}

#[async_trait]
impl CommitSource for FakeSource {
    async fn list_repositories(
        &self,
        _account: &str,
        page: u32,
        per_page: u32,
    ) -> Result<ApiResponse<Vec<RepoInfo>>, FetchError> {
        if let Some(error) = &self.discovery_error {
            return Err(error.clone());
        }
        let (names, has_next) = paginate(&self.discovery, page, per_page);
        Ok(ApiResponse {
            body: names.iter().map(|n| info(n)).collect(),
            quota: None,
            has_next,
        })
    }

    async fn repository(
        &self,
        account: &str,
        repo: &str,
    ) -> Result<ApiResponse<RepoInfo>, FetchError> {
        self.record_request();
        if self.repos.contains_key(repo) {
            Ok(ApiResponse::new(info(repo)))
        } else {
            Err(FetchError::NotFound(format!("repos/{account}/{repo}")))
        }
    }

    async fn list_commits(
        &self,
        account: &str,
        repo: &str,
        page: u32,
        per_page: u32,
    ) -> Result<ApiResponse<Vec<Value>>, FetchError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.record_request();

        let injected = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&(repo.to_string(), page))
            .and_then(VecDeque::pop_front);
        if let Some(error) = injected {
            return Err(error);
        }

        let commits = self
            .repos
            .get(repo)
            .ok_or_else(|| FetchError::NotFound(format!("repos/{account}/{repo}")))?;
        let (body, has_next) = paginate(commits, page, per_page);

        if let Some(handle) = &self.cancel_after_first_page {
            handle.cancel();
        }

        let quota = (!self.withhold_quota).then(|| Quota {
            remaining: 4000,
            reset_at: Utc::now() + chrono::Duration::hours(1),
        });
        Ok(ApiResponse {
            body: body.to_vec(),
            quota,
            has_next,
        })
    }

    async fn commit_detail(
        &self,
        _account: &str,
        _repo: &str,
        sha: &str,
    ) -> Result<ApiResponse<Value>, FetchError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.details
            .get(sha)
            .cloned()
            .map(ApiResponse::new)
            .ok_or_else(|| FetchError::NotFound(format!("commit {sha}")))
    }
}

fn commit(sha: &str, date: &str, message: &str) -> Value {
    json!({
        "sha": sha,
        "commit": { "message": message, "author": { "date": date } },
        "files": [{ "filename": "src/lib.rs", "additions": 3, "deletions": 1 }]
    })
}

fn history(count: usize) -> Vec<Value> {
    (0..count)
        .rev()
        .map(|i| {
            commit(
                &format!("sha{i:03}"),
                &format!("2024-03-{:02}T10:00:00Z", i + 1),
                "Add feature",
            )
        })
        .collect()
}

fn config(repos: &[&str]) -> ScopeConfig {
    ScopeConfig {
        account: "octocat".into(),
        repositories: repos.iter().map(|r| r.to_string()).collect(),
        ..ScopeConfig::default()
    }
}

fn fetcher(config: ScopeConfig, source: &Arc<FakeSource>) -> Fetcher {
    Fetcher::new(config, source.clone(), Arc::new(RateLimiter::unknown()))
}

fn shas(dataset: &RepositoryDataset) -> Vec<&str> {
    dataset.records.iter().map(|r| r.sha.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn records_are_sorted_and_deduplicated() {
    let source = Arc::new(FakeSource::default().with_repo(
        "hello-world",
        vec![
            commit("ccc", "2024-03-03T10:00:00Z", "Third"),
            commit("bbb", "2024-03-01T10:00:00Z", "Same instant, later sha"),
            commit("aaa", "2024-03-01T10:00:00Z", "Same instant"),
            commit("bbb", "2024-03-01T10:00:00Z", "Same instant, later sha"),
        ],
    ));
    let mut config = config(&["hello-world"]);
    config.fetch.page_size = 2;

    let outcome = fetcher(config, &source)
        .fetch_all(&CancelToken::never())
        .await
        .unwrap();

    let dataset = &outcome.datasets[0];
    assert_eq!(dataset.status, FetchStatus::Complete);
    assert_eq!(dataset.origin, DataOrigin::Remote);
    assert_eq!(shas(dataset), ["aaa", "bbb", "ccc"]);
    assert_eq!(dataset.snapshot.commit_count, 3);
    assert_eq!(dataset.snapshot.default_branch, "main");
    assert_eq!(dataset.records[0].files[0].language.as_deref(), Some("Rust"));
}

#[tokio::test(start_paused = true)]
async fn missing_repository_fails_alone() {
    let source = Arc::new(
        FakeSource::default()
            .with_repo("alpha", history(3))
            .with_repo("beta", history(2)),
    );

    let outcome = fetcher(config(&["alpha", "ghost", "beta"]), &source)
        .fetch_all(&CancelToken::never())
        .await
        .unwrap();

    let names: Vec<_> = outcome
        .datasets
        .iter()
        .map(|d| d.snapshot.name.as_str())
        .collect();
    assert_eq!(names, ["alpha", "ghost", "beta"]);
    assert!(outcome.datasets[0].status.is_complete());
    assert!(outcome.datasets[2].status.is_complete());

    let ghost = &outcome.datasets[1];
    assert!(ghost.records.is_empty());
    match &ghost.status {
        FetchStatus::Failed { reason } => assert!(reason.contains("ghost"), "{reason}"),
        other => panic!("expected failed, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn commit_limit_truncates_with_flag() {
    let source = Arc::new(FakeSource::default().with_repo("big", history(5)));
    let mut config = config(&["big"]);
    config.fetch.page_size = 2;
    config.fetch.max_commits_per_repo = 3;

    let outcome = fetcher(config, &source)
        .fetch_all(&CancelToken::never())
        .await
        .unwrap();

    let dataset = &outcome.datasets[0];
    assert_eq!(dataset.records.len(), 3);
    assert!(dataset.snapshot.truncated);
    assert_eq!(
        dataset.status,
        FetchStatus::Partial {
            reason: PartialReason::Truncated { limit: 3 }
        }
    );
}

#[tokio::test(start_paused = true)]
async fn reaching_the_limit_exactly_is_complete() {
    let source = Arc::new(FakeSource::default().with_repo("even", history(4)));
    let mut config = config(&["even"]);
    config.fetch.page_size = 2;
    config.fetch.max_commits_per_repo = 4;

    let outcome = fetcher(config, &source)
        .fetch_all(&CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.datasets[0].records.len(), 4);
    assert_eq!(outcome.datasets[0].status, FetchStatus::Complete);
}

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried() {
    let source = Arc::new(
        FakeSource::default()
            .with_repo("flaky", history(2))
            .fail_page(
                "flaky",
                1,
                vec![
                    FetchError::Transient("502 Bad Gateway".into()),
                    FetchError::Transient("connection reset".into()),
                ],
            ),
    );

    let started = tokio::time::Instant::now();
    let outcome = fetcher(config(&["flaky"]), &source)
        .fetch_all(&CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.datasets[0].status, FetchStatus::Complete);
    assert_eq!(outcome.datasets[0].records.len(), 2);
    assert_eq!(source.list_calls(), 3);
    // 2s + 4s of backoff with the default policy.
    assert!(started.elapsed() >= Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_keep_earlier_pages_and_skip_the_cache() {
    let source = Arc::new(
        FakeSource::default()
            .with_repo("flaky", history(3))
            .fail_page(
                "flaky",
                2,
                vec![FetchError::Transient("503".into()); 3],
            ),
    );
    let mut config = config(&["flaky"]);
    config.fetch.page_size = 2;
    let scope = CacheKey::scope_for(&config.fetch);
    let cache = Arc::new(CacheStore::in_memory().unwrap());

    let outcome = fetcher(config, &source)
        .with_cache(Arc::clone(&cache))
        .fetch_all(&CancelToken::never())
        .await
        .unwrap();

    let dataset = &outcome.datasets[0];
    assert_eq!(dataset.records.len(), 2);
    match &dataset.status {
        FetchStatus::Partial {
            reason: PartialReason::RetriesExhausted { attempts, error },
        } => {
            assert_eq!(*attempts, 3);
            assert!(error.contains("503"));
        }
        other => panic!("expected retries exhausted, got {other}"),
    }
    assert_eq!(
        cache.get(&CacheKey::new("octocat", "flaky", scope)).unwrap(),
        CacheLookup::Miss(MissReason::Absent)
    );
}

#[tokio::test(start_paused = true)]
async fn rate_limited_responses_do_not_consume_attempts() {
    let reset_at = Utc::now() + chrono::Duration::seconds(30);
    let source = Arc::new(
        FakeSource::default()
            .with_repo("busy", history(2))
            .fail_page("busy", 1, vec![FetchError::RateLimited { reset_at }; 2]),
    );

    let outcome = fetcher(config(&["busy"]), &source)
        .with_retry_policy(RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
        })
        .fetch_all(&CancelToken::never())
        .await
        .unwrap();

    assert_eq!(outcome.datasets[0].status, FetchStatus::Complete);
    assert_eq!(source.list_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn parallel_workers_share_one_budget() {
    let mut source = FakeSource::default();
    for name in ["a", "b", "c", "d"] {
        source = source.with_repo(name, history(1));
    }
    source.withhold_quota = true;
    let source = Arc::new(source);
    let mut config = config(&["a", "b", "c", "d"]);
    config.fetch.concurrency = 4;

    let limiter = Arc::new(RateLimiter::new(3, Utc::now() + chrono::Duration::seconds(60)));
    let started = Instant::now();
    let outcome = Fetcher::new(config, source.clone(), limiter)
        .fetch_all(&CancelToken::never())
        .await
        .unwrap();

    // Four workers, two requests each, but only three fit before the reset.
    assert_eq!(source.issued_before(started + Duration::from_secs(59)), 3);
    assert_eq!(source.issued_before(started + Duration::from_secs(3600)), 8);
    assert!(started.elapsed() >= Duration::from_secs(59));
    for dataset in &outcome.datasets {
        assert_eq!(dataset.status, FetchStatus::Complete, "{}", dataset.snapshot.name);
    }
}

#[tokio::test(start_paused = true)]
async fn reset_beyond_max_wait_marks_partial_without_requests() {
    let source = Arc::new(FakeSource::default().with_repo("busy", history(2)));
    let reset_at = Utc::now() + chrono::Duration::seconds(600);
    let limiter = RateLimiter::new(0, reset_at).with_max_wait(Duration::from_secs(5));
    let started = Instant::now();

    let outcome = Fetcher::new(config(&["busy"]), source.clone(), Arc::new(limiter))
        .fetch_all(&CancelToken::never())
        .await
        .unwrap();

    let dataset = &outcome.datasets[0];
    assert!(dataset.records.is_empty());
    assert_eq!(
        dataset.status,
        FetchStatus::Partial {
            reason: PartialReason::RateLimited { reset_at }
        }
    );
    assert_eq!(source.issued_before(started + Duration::from_secs(3600)), 0);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn fresh_cache_entries_are_reused_until_refresh() {
    let source = Arc::new(FakeSource::default().with_repo("hello-world", history(3)));
    let cache = Arc::new(CacheStore::in_memory().unwrap());
    let run = |force: bool| {
        fetcher(config(&["hello-world"]), &source)
            .with_cache(Arc::clone(&cache))
            .force_refresh(force)
    };

    let first = run(false).fetch_all(&CancelToken::never()).await.unwrap();
    assert_eq!(first.datasets[0].origin, DataOrigin::Remote);
    assert_eq!(source.list_calls(), 1);

    let second = run(false).fetch_all(&CancelToken::never()).await.unwrap();
    assert_eq!(second.datasets[0].origin, DataOrigin::Cache);
    assert_eq!(second.datasets[0].records, first.datasets[0].records);
    assert_eq!(second.datasets[0].status, FetchStatus::Complete);
    assert_eq!(source.list_calls(), 1);

    let third = run(true).fetch_all(&CancelToken::never()).await.unwrap();
    assert_eq!(third.datasets[0].origin, DataOrigin::Remote);
    assert_eq!(source.list_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_marks_partial_and_writes_nothing() {
    let source = Arc::new(
        FakeSource::default()
            .with_repo("alpha", history(2))
            .with_repo("beta", history(2)),
    );
    let cache = Arc::new(CacheStore::in_memory().unwrap());
    let config = config(&["alpha", "beta"]);
    let scope = CacheKey::scope_for(&config.fetch);

    let (handle, token) = cancellation();
    handle.cancel();
    let outcome = fetcher(config, &source)
        .with_cache(Arc::clone(&cache))
        .fetch_all(&token)
        .await
        .unwrap();

    for dataset in &outcome.datasets {
        assert_eq!(
            dataset.status,
            FetchStatus::Partial {
                reason: PartialReason::Cancelled
            }
        );
        let key = CacheKey::new("octocat", dataset.snapshot.name.as_str(), scope.as_str());
        assert_eq!(cache.get(&key).unwrap(), CacheLookup::Miss(MissReason::Absent));
    }
    assert_eq!(source.list_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_repository_keeps_fetched_pages() {
    let (handle, token) = cancellation();
    let mut source = FakeSource::default().with_repo("long", history(5));
    source.cancel_after_first_page = Some(handle);
    let source = Arc::new(source);
    let mut config = config(&["long"]);
    config.fetch.page_size = 2;

    let outcome = fetcher(config, &source).fetch_all(&token).await.unwrap();

    let dataset = &outcome.datasets[0];
    assert_eq!(dataset.records.len(), 2);
    assert_eq!(
        dataset.status,
        FetchStatus::Partial {
            reason: PartialReason::Cancelled
        }
    );
    assert_eq!(source.list_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_entries_are_skipped_and_counted() {
    let source = Arc::new(FakeSource::default().with_repo(
        "messy",
        vec![
            commit("good1", "2024-03-02T10:00:00Z", "Fix bug"),
            json!({ "commit": { "message": "no sha" } }),
            commit("bad-date", "not a date", "Oops"),
            commit("good2", "2024-03-01T10:00:00Z", "Add test"),
        ],
    ));

    let outcome = fetcher(config(&["messy"]), &source)
        .fetch_all(&CancelToken::never())
        .await
        .unwrap();

    let dataset = &outcome.datasets[0];
    assert_eq!(shas(dataset), ["good2", "good1"]);
    assert_eq!(dataset.snapshot.skipped_records, 2);
    assert_eq!(dataset.status, FetchStatus::Complete);
}

#[tokio::test(start_paused = true)]
async fn file_details_are_fetched_when_the_listing_lacks_them() {
    let mut source = FakeSource::default().with_repo(
        "web",
        vec![
            json!({ "sha": "s1", "commit": { "message": "Style page", "author": { "date": "2024-03-01T10:00:00Z" } } }),
            json!({ "sha": "s2", "commit": { "message": "Drop logo", "author": { "date": "2024-03-02T10:00:00Z" } } }),
        ],
    );
    source.details.insert(
        "s1".into(),
        json!({ "files": [
            { "filename": "site/index.html", "additions": 4, "deletions": 0 },
            { "filename": "site/style.css", "additions": 9, "deletions": 2 }
        ] }),
    );
    let source = Arc::new(source);

    let outcome = fetcher(config(&["web"]), &source)
        .fetch_all(&CancelToken::never())
        .await
        .unwrap();

    let dataset = &outcome.datasets[0];
    assert_eq!(source.detail_calls.load(Ordering::SeqCst), 2);
    assert_eq!(dataset.records[0].files.len(), 2);
    // Detail 404 keeps the commit without files.
    assert!(dataset.records[1].files.is_empty());
    assert_eq!(dataset.status, FetchStatus::Complete);
}

#[tokio::test(start_paused = true)]
async fn discovery_pages_and_caps_repositories() {
    let mut source = FakeSource::default()
        .with_repo("one", history(1))
        .with_repo("two", history(1))
        .with_repo("three", history(1));
    source.discovery = vec!["one".into(), "two".into(), "three".into()];
    let source = Arc::new(source);

    let mut config = config(&[]);
    config.discover = true;
    config.fetch.page_size = 1;
    config.fetch.max_repositories = 2;

    let outcome = fetcher(config, &source)
        .fetch_all(&CancelToken::never())
        .await
        .unwrap();

    let names: Vec<_> = outcome
        .datasets
        .iter()
        .map(|d| d.snapshot.name.as_str())
        .collect();
    assert_eq!(names, ["one", "two"]);
    assert!(outcome.discovery_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn discovery_failure_is_reported_not_fatal() {
    let mut source = FakeSource::default();
    source.discovery_error = Some(FetchError::Unauthorized("401 Unauthorized".into()));
    let source = Arc::new(source);

    let mut config = config(&[]);
    config.discover = true;

    let outcome = fetcher(config, &source)
        .fetch_all(&CancelToken::never())
        .await
        .unwrap();

    assert!(outcome.datasets.is_empty());
    assert!(outcome
        .discovery_error
        .as_deref()
        .is_some_and(|e| e.contains("unauthorized")));
}

#[tokio::test]
async fn invalid_configuration_is_fatal() {
    let source = Arc::new(FakeSource::default());
    let mut config = config(&["hello-world"]);
    config.fetch.concurrency = 0;

    let result = fetcher(config, &source).fetch_all(&CancelToken::never()).await;
    assert!(result.is_err());
}
