//! Merge finalized datasets, run every analyzer and assemble the document.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use commitscope_core::{
    sort_records, AnalysisConfig, AnalysisDocument, CommitRecord, RepositoryDataset,
    RepositoryReport, RunSummary,
};
use tracing::{debug, info};

use crate::analyzer::Analyzer;
use crate::language::LanguageAnalyzer;
use crate::linguistic::LinguisticAnalyzer;
use crate::productivity::ProductivityAnalyzer;
use crate::temporal::TemporalAnalyzer;

/// Runs a fixed set of analyzers over merged repository datasets.
///
/// The aggregator never fetches and never mutates its inputs; given the
/// same datasets and timestamp, [`Aggregator::run_at`] returns an
/// identical document.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use commitscope_core::AnalysisConfig;
/// use commitscope_pulse::Aggregator;
///
/// let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
/// let doc = Aggregator::new(AnalysisConfig::default()).run_at("octocat", &[], None, now);
/// assert_eq!(doc.summary.total_commits, 0);
/// assert_eq!(doc.metrics.len(), 4);
/// assert!(doc.metrics.contains_key("linguistic"));
/// ```
pub struct Aggregator {
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl Aggregator {
    /// The temporal, linguistic, language and productivity analyzers.
    pub fn new(config: AnalysisConfig) -> Self {
        Self::with_analyzers(vec![
            Box::new(TemporalAnalyzer::new(config.clone())),
            Box::new(LinguisticAnalyzer::new(config.clone())),
            Box::new(LanguageAnalyzer::new(config.clone())),
            Box::new(ProductivityAnalyzer::new(config)),
        ])
    }

    pub fn with_analyzers(analyzers: Vec<Box<dyn Analyzer>>) -> Self {
        Self { analyzers }
    }

    /// Build the document, stamped with the current time.
    pub fn run(
        &self,
        account: &str,
        datasets: &[RepositoryDataset],
        discovery_error: Option<&str>,
    ) -> AnalysisDocument {
        self.run_at(account, datasets, discovery_error, Utc::now())
    }

    /// Build the document, stamped with `generated_at`.
    pub fn run_at(
        &self,
        account: &str,
        datasets: &[RepositoryDataset],
        discovery_error: Option<&str>,
        generated_at: DateTime<Utc>,
    ) -> AnalysisDocument {
        let records = merge(datasets);
        info!(
            account,
            repositories = datasets.len(),
            commits = records.len(),
            "running analyzers"
        );

        let metrics = self
            .analyzers
            .iter()
            .map(|analyzer| {
                let bundle = analyzer.analyze(&records);
                debug!(analyzer = analyzer.name(), metrics = bundle.metrics.len(), "analyzer done");
                (analyzer.name().to_string(), bundle)
            })
            .collect::<BTreeMap<_, _>>();

        let repositories = datasets
            .iter()
            .map(|dataset| RepositoryReport {
                name: dataset.snapshot.name.clone(),
                commit_count: dataset.records.len(),
                status: dataset.status.clone(),
                origin: dataset.origin,
                skipped_records: dataset.snapshot.skipped_records,
            })
            .collect();

        AnalysisDocument {
            account: account.to_string(),
            generated_at,
            summary: summarize(datasets, &records),
            repositories,
            discovery_error: discovery_error.map(str::to_string),
            metrics,
        }
    }
}

/// All records of non-failed datasets, sorted by `(timestamp, sha)` with
/// duplicate shas dropped.
fn merge(datasets: &[RepositoryDataset]) -> Vec<CommitRecord> {
    let mut records: Vec<CommitRecord> = datasets
        .iter()
        .filter(|dataset| !dataset.status.is_failed())
        .flat_map(|dataset| dataset.records.iter().cloned())
        .collect();
    let dropped = sort_records(&mut records);
    if dropped > 0 {
        debug!(dropped, "dropped duplicate commits across repositories");
    }
    records
}

fn summarize(datasets: &[RepositoryDataset], records: &[CommitRecord]) -> RunSummary {
    let first_commit = records.first().map(|r| r.timestamp);
    let last_commit = records.last().map(|r| r.timestamp);
    let date_range_days = match (first_commit, last_commit) {
        (Some(first), Some(last)) => (last.date_naive() - first.date_naive()).num_days() + 1,
        _ => 0,
    };
    RunSummary {
        total_commits: records.len(),
        total_repositories: datasets.len(),
        complete_repositories: datasets.iter().filter(|d| d.status.is_complete()).count(),
        partial_repositories: datasets.iter().filter(|d| d.status.is_partial()).count(),
        failed_repositories: datasets.iter().filter(|d| d.status.is_failed()).count(),
        date_range_days,
        first_commit,
        last_commit,
    }
}
