use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ScopeError;

/// Top-level configuration for one analysis run.
///
/// The pipeline crates receive this as a resolved value; only the binary
/// loads it from `.commitscope.toml`.
///
/// # Examples
///
/// ```
/// use commitscope_core::ScopeConfig;
///
/// let config = ScopeConfig::default();
/// assert_eq!(config.fetch.max_commits_per_repo, 1000);
/// assert_eq!(config.fetch.concurrency, 4);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Account (user login) whose commits are analyzed.
    #[serde(default)]
    pub account: String,
    /// Repositories to analyze, by name. Ignored when `discover` is set.
    #[serde(default)]
    pub repositories: Vec<String>,
    /// Discover every repository owned by the account.
    #[serde(default)]
    pub discover: bool,
    /// Remote fetch settings.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Local cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Analyzer thresholds.
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Which repositories a run targets.
///
/// # Examples
///
/// ```
/// use commitscope_core::{RepoSelection, ScopeConfig};
///
/// let config = ScopeConfig {
///     account: "octocat".into(),
///     repositories: vec!["hello-world".into()],
///     ..ScopeConfig::default()
/// };
/// assert_eq!(
///     config.selection(),
///     RepoSelection::Listed(vec!["hello-world".into()])
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoSelection {
    /// Exactly these repositories, in this order.
    Listed(Vec<String>),
    /// Every repository the account owns, up to `max_repositories`.
    DiscoverAll,
}

impl ScopeConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Io`] if the file cannot be read, or
    /// [`ScopeError::Toml`] if the content is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self, ScopeError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use commitscope_core::ScopeConfig;
    ///
    /// let toml = r#"
    /// account = "octocat"
    /// repositories = ["hello-world", "spoon-knife"]
    ///
    /// [fetch]
    /// max_commits_per_repo = 200
    /// "#;
    /// let config = ScopeConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.repositories.len(), 2);
    /// assert_eq!(config.fetch.max_commits_per_repo, 200);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, ScopeError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Resolve the repository selection.
    pub fn selection(&self) -> RepoSelection {
        if self.discover {
            RepoSelection::DiscoverAll
        } else {
            RepoSelection::Listed(self.repositories.clone())
        }
    }

    /// Check the configuration before any remote call is made.
    ///
    /// These are the only fatal errors of a run.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Config`] for an invalid account identifier,
    /// an empty repository list without discovery, or zero-valued limits.
    ///
    /// # Examples
    ///
    /// ```
    /// use commitscope_core::ScopeConfig;
    ///
    /// let config = ScopeConfig {
    ///     account: "octocat".into(),
    ///     ..ScopeConfig::default()
    /// };
    /// // No repositories and no discovery.
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ScopeError> {
        validate_account(&self.account)?;

        if !self.discover {
            if self.repositories.is_empty() {
                return Err(ScopeError::Config(
                    "no repositories listed; set `repositories` or `discover = true`".into(),
                ));
            }
            if let Some(bad) = self
                .repositories
                .iter()
                .find(|name| name.trim().is_empty() || name.contains('/'))
            {
                return Err(ScopeError::Config(format!(
                    "invalid repository name '{bad}', expected a bare repository name"
                )));
            }
        }

        if self.fetch.concurrency == 0 {
            return Err(ScopeError::Config("fetch.concurrency must be at least 1".into()));
        }
        if self.fetch.max_commits_per_repo == 0 {
            return Err(ScopeError::Config(
                "fetch.max_commits_per_repo must be at least 1".into(),
            ));
        }
        if self.fetch.retry_attempts == 0 {
            return Err(ScopeError::Config("fetch.retry_attempts must be at least 1".into()));
        }
        if self.fetch.page_size == 0 || self.fetch.page_size > 100 {
            return Err(ScopeError::Config("fetch.page_size must be between 1 and 100".into()));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ScopeError::Config("cache.ttl_secs must be positive".into()));
        }

        self.analysis.validate()
    }
}

fn validate_account(account: &str) -> Result<(), ScopeError> {
    if account.is_empty() {
        return Err(ScopeError::Config("account must not be empty".into()));
    }
    // GitHub logins: alphanumerics and single inner hyphens, at most 39 chars.
    let valid = account.len() <= 39
        && !account.starts_with('-')
        && !account.ends_with('-')
        && !account.contains("--")
        && account.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if !valid {
        return Err(ScopeError::Config(format!(
            "invalid account identifier '{account}'"
        )));
    }
    Ok(())
}

/// Remote fetch configuration.
///
/// # Examples
///
/// ```
/// use commitscope_core::FetchConfig;
///
/// let config = FetchConfig::default();
/// assert_eq!(config.api_base_url, "https://api.github.com");
/// assert_eq!(config.retry_attempts, 3);
/// assert!(config.fetch_file_stats);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// API root (default: `https://api.github.com`).
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Access token. The binary falls back to `GITHUB_TOKEN`.
    pub token: Option<String>,
    /// Stop paging a repository after this many commits (default: 1000).
    #[serde(default = "default_max_commits_per_repo")]
    pub max_commits_per_repo: usize,
    /// Cap on repositories considered in discovery mode (default: 100).
    #[serde(default = "default_max_repositories")]
    pub max_repositories: usize,
    /// Repositories fetched concurrently (default: 4).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Entries per page requested from the API (default: 100).
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Fetch per-commit file statistics (default: true).
    #[serde(default = "default_true")]
    pub fetch_file_stats: bool,
    /// Keep at most this many files per commit (default: 50).
    #[serde(default = "default_max_files_per_commit")]
    pub max_files_per_commit: usize,
    /// Attempts per request before giving up (default: 3).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// First backoff delay in milliseconds (default: 2000).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling in milliseconds (default: 60000).
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Longest a worker waits for the rate limit to reset (default: 3600).
    #[serde(default = "default_max_rate_limit_wait_secs")]
    pub max_rate_limit_wait_secs: u64,
}

fn default_api_base_url() -> String {
    "https://api.github.com".into()
}

fn default_max_commits_per_repo() -> usize {
    1000
}

fn default_max_repositories() -> usize {
    100
}

fn default_concurrency() -> usize {
    4
}

fn default_page_size() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

fn default_max_files_per_commit() -> usize {
    50
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    2000
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

fn default_max_rate_limit_wait_secs() -> u64 {
    3600
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            token: None,
            max_commits_per_repo: default_max_commits_per_repo(),
            max_repositories: default_max_repositories(),
            concurrency: default_concurrency(),
            page_size: default_page_size(),
            fetch_file_stats: true,
            max_files_per_commit: default_max_files_per_commit(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            max_rate_limit_wait_secs: default_max_rate_limit_wait_secs(),
        }
    }
}

impl FetchConfig {
    /// First backoff delay.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Backoff ceiling.
    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    /// Upper bound on a single rate-limit suspension.
    pub fn max_rate_limit_wait(&self) -> Duration {
        Duration::from_secs(self.max_rate_limit_wait_secs)
    }
}

/// Local cache configuration.
///
/// # Examples
///
/// ```
/// use commitscope_core::CacheConfig;
///
/// let config = CacheConfig::default();
/// assert!(config.enabled);
/// assert_eq!(config.ttl_secs, 7 * 24 * 60 * 60);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Use the cache at all (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// SQLite database path (default: `.commitscope/cache.db`).
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// Entry time-to-live in seconds (default: 7 days).
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from(".commitscope/cache.db")
}

fn default_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_cache_path(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheConfig {
    /// Entry time-to-live.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Analyzer thresholds.
///
/// The activity window boundary is configuration rather than a fixed
/// heuristic: a history is classified `night_owl` when the share of
/// commits outside `[day_start_hour, day_end_hour)` is strictly greater
/// than `night_share_threshold`.
///
/// # Examples
///
/// ```
/// use commitscope_core::AnalysisConfig;
///
/// let config = AnalysisConfig::default();
/// assert_eq!(config.day_start_hour, 6);
/// assert_eq!(config.day_end_hour, 18);
/// assert_eq!(config.night_share_threshold, 0.5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Offset applied to UTC timestamps before bucketing (default: 0).
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// First daytime hour, inclusive (default: 6).
    #[serde(default = "default_day_start_hour")]
    pub day_start_hour: u32,
    /// First non-daytime hour, exclusive end of the day window (default: 18).
    #[serde(default = "default_day_end_hour")]
    pub day_end_hour: u32,
    /// Share of off-hours commits above which a history is `night_owl` (default: 0.5).
    #[serde(default = "default_night_share_threshold")]
    pub night_share_threshold: f64,
    /// Number of devoted repositories reported (default: 5).
    #[serde(default = "default_top_repositories")]
    pub top_repositories: usize,
    /// Number of leading verbs reported (default: 20).
    #[serde(default = "default_top_verbs")]
    pub top_verbs: usize,
    /// Rolling velocity window in days (default: 7).
    #[serde(default = "default_velocity_window_days")]
    pub velocity_window_days: u32,
}

fn default_day_start_hour() -> u32 {
    6
}

fn default_day_end_hour() -> u32 {
    18
}

fn default_night_share_threshold() -> f64 {
    0.5
}

fn default_top_repositories() -> usize {
    5
}

fn default_top_verbs() -> usize {
    20
}

fn default_velocity_window_days() -> u32 {
    7
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            day_start_hour: default_day_start_hour(),
            day_end_hour: default_day_end_hour(),
            night_share_threshold: default_night_share_threshold(),
            top_repositories: default_top_repositories(),
            top_verbs: default_top_verbs(),
            velocity_window_days: default_velocity_window_days(),
        }
    }
}

impl AnalysisConfig {
    fn validate(&self) -> Result<(), ScopeError> {
        if self.day_start_hour >= self.day_end_hour || self.day_end_hour > 24 {
            return Err(ScopeError::Config(format!(
                "analysis day window [{}, {}) is not a valid hour range",
                self.day_start_hour, self.day_end_hour
            )));
        }
        if !(0.0..=1.0).contains(&self.night_share_threshold) {
            return Err(ScopeError::Config(
                "analysis.night_share_threshold must be within 0.0..=1.0".into(),
            ));
        }
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err(ScopeError::Config(
                "analysis.utc_offset_minutes must be within ±14 hours".into(),
            ));
        }
        if self.velocity_window_days == 0 {
            return Err(ScopeError::Config(
                "analysis.velocity_window_days must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
