//! Commit ingestion for commitscope.
//!
//! Turns an account's repositories into sorted, deduplicated
//! [`RepositoryDataset`](commitscope_core::RepositoryDataset)s:
//! - [`fetcher`]: the bounded worker pool and per-repository page loop
//! - [`source`] / [`github`]: the remote service seam and its GitHub client
//! - [`ratelimit`]: the request budget shared by every worker
//! - [`retry`]: explicit retry state machine with exponential backoff
//! - [`cache`]: SQLite cache with staleness and corruption checks
//! - [`normalize`]: API JSON to typed records
//! - [`cancel`]: run cancellation

pub mod cache;
pub mod cancel;
pub mod fetcher;
pub mod github;
pub mod normalize;
pub mod ratelimit;
pub mod retry;
pub mod source;

pub use cache::CacheStore;
pub use cancel::{cancellation, CancelHandle, CancelToken};
pub use fetcher::{FetchOutcome, Fetcher};
pub use github::GitHubClient;
pub use ratelimit::RateLimiter;
pub use source::{ApiResponse, CommitSource, RepoInfo};
