use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// A single file touched by a commit.
///
/// # Examples
///
/// ```
/// use commitscope_core::FileChange;
///
/// let change = FileChange::new("src/main.rs", 10, 3);
/// assert_eq!(change.language.as_deref(), Some("Rust"));
/// assert_eq!(change.lines_changed(), 13);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    /// File path relative to the repository root.
    pub path: String,
    /// Lines added.
    pub additions: u64,
    /// Lines removed.
    pub deletions: u64,
    /// Language inferred from the extension; `None` for binary/media files.
    pub language: Option<String>,
}

impl FileChange {
    /// Build a file change, inferring its language from the path.
    pub fn new(path: impl Into<String>, additions: u64, deletions: u64) -> Self {
        let path = path.into();
        let language = crate::language::language_for_path(&path).map(str::to_string);
        Self {
            path,
            additions,
            deletions,
            language,
        }
    }

    /// `additions + deletions`.
    pub fn lines_changed(&self) -> u64 {
        self.additions + self.deletions
    }
}

/// One commit authored by the analyzed account.
///
/// Created only by the fetch stage and never mutated afterwards. Within a
/// dataset `sha` is unique and `(timestamp, sha)` is the ordering key.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use commitscope_core::CommitRecord;
///
/// let record = CommitRecord {
///     sha: "a1b2c3".into(),
///     repository: "hello-world".into(),
///     timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
///     message: "Fix login bug".into(),
///     files: vec![],
/// };
/// assert!(record.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    /// Full commit id.
    pub sha: String,
    /// Repository name (without owner).
    pub repository: String,
    /// Author timestamp.
    pub timestamp: DateTime<Utc>,
    /// Full commit message.
    pub message: String,
    /// Files changed, possibly empty when file statistics were not fetched.
    pub files: Vec<FileChange>,
}

impl CommitRecord {
    /// Check the fields analyzers rely on.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Malformed`] when the sha or repository is blank.
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.sha.trim().is_empty() {
            return Err(FetchError::Malformed("commit has an empty sha".into()));
        }
        if self.repository.trim().is_empty() {
            return Err(FetchError::Malformed(format!(
                "commit {} has no repository",
                self.sha
            )));
        }
        Ok(())
    }
}

/// Sort records by `(timestamp, sha)` and drop repeated shas.
///
/// Returns the number of duplicates removed.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use commitscope_core::{sort_records, CommitRecord};
///
/// let at = |h| Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap();
/// let rec = |sha: &str, h| CommitRecord {
///     sha: sha.into(),
///     repository: "r".into(),
///     timestamp: at(h),
///     message: "m".into(),
///     files: vec![],
/// };
/// let mut records = vec![rec("b", 9), rec("a", 9), rec("c", 8), rec("a", 9)];
/// assert_eq!(sort_records(&mut records), 1);
/// let shas: Vec<_> = records.iter().map(|r| r.sha.as_str()).collect();
/// assert_eq!(shas, ["c", "a", "b"]);
/// ```
pub fn sort_records(records: &mut Vec<CommitRecord>) -> usize {
    records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.sha.cmp(&b.sha)));
    let before = records.len();
    let mut seen = HashSet::new();
    records.retain(|r| seen.insert(r.sha.clone()));
    before - records.len()
}

/// Repository metadata recorded alongside its commits.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use commitscope_core::RepositorySnapshot;
///
/// let snapshot = RepositorySnapshot::new("hello-world", "main", Utc::now());
/// assert_eq!(snapshot.commit_count, 0);
/// assert!(!snapshot.truncated);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySnapshot {
    /// Repository name.
    pub name: String,
    /// Default branch reported by the provider.
    pub default_branch: String,
    /// Number of commits kept after normalization.
    pub commit_count: usize,
    /// When the commits were fetched from the provider.
    pub fetched_at: DateTime<Utc>,
    /// Paging stopped because the commit limit was reached.
    #[serde(default)]
    pub truncated: bool,
    /// Entries dropped because they did not have the expected shape.
    #[serde(default)]
    pub skipped_records: usize,
}

impl RepositorySnapshot {
    /// Create an empty snapshot.
    pub fn new(
        name: impl Into<String>,
        default_branch: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            default_branch: default_branch.into(),
            commit_count: 0,
            fetched_at,
            truncated: false,
            skipped_records: 0,
        }
    }
}

/// Why a repository's commit set is known to be incomplete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PartialReason {
    /// Paging stopped at the configured commit limit.
    #[serde(rename_all = "camelCase")]
    Truncated {
        /// The limit that was reached.
        limit: usize,
    },
    /// A request kept failing with transient errors.
    #[serde(rename_all = "camelCase")]
    RetriesExhausted {
        /// Attempts made for the failing request.
        attempts: u32,
        /// Last error observed.
        error: String,
    },
    /// The provider's budget resets later than the configured maximum wait.
    #[serde(rename_all = "camelCase")]
    RateLimited {
        /// When the provider budget is replenished.
        reset_at: DateTime<Utc>,
    },
    /// The run was cancelled while this repository was being fetched.
    Cancelled,
}

impl fmt::Display for PartialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartialReason::Truncated { limit } => write!(f, "truncated at {limit} commits"),
            PartialReason::RetriesExhausted { attempts, error } => {
                write!(f, "gave up after {attempts} attempts: {error}")
            }
            PartialReason::RateLimited { reset_at } => {
                write!(f, "rate limited until {reset_at}")
            }
            PartialReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Completeness of one repository's dataset.
///
/// # Examples
///
/// ```
/// use commitscope_core::{FetchStatus, PartialReason};
///
/// let status = FetchStatus::Partial { reason: PartialReason::Cancelled };
/// assert!(status.is_partial());
/// assert_eq!(status.to_string(), "partial (cancelled)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum FetchStatus {
    /// Every commit in scope was fetched.
    Complete,
    /// Some commits are missing; the reason says why.
    Partial {
        /// Why the dataset is incomplete.
        reason: PartialReason,
    },
    /// Nothing could be fetched.
    Failed {
        /// Terminal error description.
        reason: String,
    },
}

impl FetchStatus {
    /// Returns `true` for [`FetchStatus::Complete`].
    pub fn is_complete(&self) -> bool {
        matches!(self, FetchStatus::Complete)
    }

    /// Returns `true` for [`FetchStatus::Partial`].
    pub fn is_partial(&self) -> bool {
        matches!(self, FetchStatus::Partial { .. })
    }

    /// Returns `true` for [`FetchStatus::Failed`].
    pub fn is_failed(&self) -> bool {
        matches!(self, FetchStatus::Failed { .. })
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStatus::Complete => write!(f, "complete"),
            FetchStatus::Partial { reason } => write!(f, "partial ({reason})"),
            FetchStatus::Failed { reason } => write!(f, "failed ({reason})"),
        }
    }
}

/// Where a dataset's records came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataOrigin {
    /// Fetched from the provider during this run.
    Remote,
    /// Served from a fresh cache entry.
    Cache,
}

/// The finalized result of fetching one repository.
///
/// Owns its records exclusively; records are sorted by `(timestamp, sha)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDataset {
    /// Repository metadata.
    pub snapshot: RepositorySnapshot,
    /// Sorted, deduplicated commits.
    pub records: Vec<CommitRecord>,
    /// Completeness flag.
    pub status: FetchStatus,
    /// Remote fetch or cache hit.
    pub origin: DataOrigin,
}

impl RepositoryDataset {
    /// A dataset for a repository that could not be fetched at all.
    pub fn failed(name: impl Into<String>, reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            snapshot: RepositorySnapshot::new(name, "", at),
            records: Vec::new(),
            status: FetchStatus::Failed {
                reason: reason.into(),
            },
            origin: DataOrigin::Remote,
        }
    }
}

/// Metrics produced by one analyzer.
///
/// Metric values are JSON scalars, arrays or objects; keys are ordered so
/// that serialization is deterministic.
///
/// # Examples
///
/// ```
/// use commitscope_core::MetricsBundle;
///
/// #[derive(serde::Serialize)]
/// struct Report { total: u32 }
///
/// let bundle = MetricsBundle::from_report("example", &Report { total: 3 });
/// assert_eq!(bundle.analyzer, "example");
/// assert_eq!(bundle.metrics["total"], 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsBundle {
    /// Analyzer name.
    pub analyzer: String,
    /// Named metric values.
    pub metrics: BTreeMap<String, serde_json::Value>,
}

impl MetricsBundle {
    /// Flatten a serializable report into a bundle.
    ///
    /// Object reports contribute one metric per field; any other shape is
    /// stored under `"value"`.
    pub fn from_report<T: Serialize>(analyzer: &str, report: &T) -> Self {
        let metrics = match serde_json::to_value(report) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            Ok(other) => BTreeMap::from([("value".to_string(), other)]),
            Err(e) => BTreeMap::from([(
                "serializationError".to_string(),
                serde_json::Value::String(e.to_string()),
            )]),
        };
        Self {
            analyzer: analyzer.to_string(),
            metrics,
        }
    }
}

/// Run-level statistics across every analyzed repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Commits analyzed after merging and deduplication.
    pub total_commits: usize,
    /// Repositories targeted by the run.
    pub total_repositories: usize,
    /// Repositories fetched completely.
    pub complete_repositories: usize,
    /// Repositories with a partial commit set.
    pub partial_repositories: usize,
    /// Repositories that could not be fetched.
    pub failed_repositories: usize,
    /// Calendar days between first and last commit, inclusive.
    pub date_range_days: i64,
    /// Earliest commit timestamp.
    pub first_commit: Option<DateTime<Utc>>,
    /// Latest commit timestamp.
    pub last_commit: Option<DateTime<Utc>>,
}

/// Per-repository line of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryReport {
    /// Repository name.
    pub name: String,
    /// Commits contributed to the analysis.
    pub commit_count: usize,
    /// Completeness flag and reason.
    pub status: FetchStatus,
    /// Remote fetch or cache hit.
    pub origin: DataOrigin,
    /// Malformed entries dropped at ingestion.
    pub skipped_records: usize,
}

/// The single artifact emitted by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisDocument {
    /// Analyzed account.
    pub account: String,
    /// When this document was assembled.
    pub generated_at: DateTime<Utc>,
    /// Top-level statistics.
    pub summary: RunSummary,
    /// Fetch outcome per repository, in request order.
    pub repositories: Vec<RepositoryReport>,
    /// Repository discovery failure, if discovery was requested and failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_error: Option<String>,
    /// Bundles keyed by analyzer name.
    pub metrics: BTreeMap<String, MetricsBundle>,
}

impl AnalysisDocument {
    /// Returns `true` if any repository is partial or failed.
    pub fn has_incomplete_data(&self) -> bool {
        self.discovery_error.is_some()
            || self
                .repositories
                .iter()
                .any(|r| !r.status.is_complete())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(sha: &str, repo: &str) -> CommitRecord {
        CommitRecord {
            sha: sha.into(),
            repository: repo.into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            message: "Add feature".into(),
            files: vec![FileChange::new("lib.py", 1, 0)],
        }
    }

    #[test]
    fn blank_fields_fail_validation() {
        assert!(record("", "repo").validate().is_err());
        assert!(record("abc", " ").validate().is_err());
        assert!(record("abc", "repo").validate().is_ok());
    }

    #[test]
    fn equal_timestamps_sort_by_sha() {
        let mut records = vec![record("ccc", "r"), record("aaa", "r"), record("bbb", "r")];
        assert_eq!(sort_records(&mut records), 0);
        let shas: Vec<_> = records.iter().map(|r| r.sha.as_str()).collect();
        assert_eq!(shas, ["aaa", "bbb", "ccc"]);
    }

    #[test]
    fn fetch_status_serializes_with_tags() {
        let status = FetchStatus::Partial {
            reason: PartialReason::Truncated { limit: 1000 },
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "partial");
        assert_eq!(json["reason"]["kind"], "truncated");
        assert_eq!(json["reason"]["limit"], 1000);

        let back: FetchStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn failed_dataset_is_empty() {
        let dataset = RepositoryDataset::failed("gone", "not found: gone", Utc::now());
        assert!(dataset.records.is_empty());
        assert!(dataset.status.is_failed());
        assert_eq!(dataset.status.to_string(), "failed (not found: gone)");
    }

    #[test]
    fn non_object_report_is_stored_under_value() {
        let bundle = MetricsBundle::from_report("scalar", &42u32);
        assert_eq!(bundle.metrics["value"], 42);
    }

    #[test]
    fn commit_record_uses_camel_case() {
        let json = serde_json::to_value(record("abc", "repo")).unwrap();
        assert!(json.get("repository").is_some());
        assert_eq!(json["files"][0]["language"], "Python");
    }
}
