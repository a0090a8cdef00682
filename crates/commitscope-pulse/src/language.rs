//! Language usage and how it shifts over time.

use std::collections::{BTreeMap, HashMap};

use commitscope_core::{AnalysisConfig, CommitRecord, MetricsBundle};
use serde::{Deserialize, Serialize};

use crate::analyzer::{local_time, month_key, percentage, valid_records, Analyzer};

const TOP_LANGUAGES: usize = 10;

/// Files and lines touched in one language.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageUsage {
    /// File changes classified as the language.
    pub files: usize,
    /// Lines added plus lines removed in those changes.
    pub lines: u64,
}

/// Totals for one language over the whole history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageTotal {
    /// Display name, e.g. `Rust`.
    pub language: String,
    /// File changes over the whole history.
    pub files: usize,
    /// Lines added plus removed over the whole history.
    pub lines: u64,
    /// Share of all classified file changes, 0–100.
    pub percentage: f64,
}

/// Everything the language analyzer reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageReport {
    /// Commits analyzed.
    pub total_commits: usize,
    /// Records that failed validation and were left out.
    pub excluded_records: usize,
    /// Commits carrying at least one file change.
    pub commits_with_files: usize,
    /// Classified file changes.
    pub total_files: usize,
    /// Binary and media file changes left out.
    pub excluded_files: usize,
    /// Most files first; ties by lines, then name.
    pub languages: Vec<LanguageTotal>,
    /// Names of the first ten entries of `languages`.
    pub top_languages: Vec<String>,
    /// First entry of `languages`; `None` without classified files.
    pub primary_language: Option<String>,
    /// `YYYY-MM` → language → usage.
    pub monthly: BTreeMap<String, BTreeMap<String, LanguageUsage>>,
    /// `-Σ p ln p` over file shares.
    pub shannon_index: f64,
    /// Shannon index normalized by `ln(n)`, 0–100.
    pub diversity_score: f64,
    /// Monthly file share strictly increasing across every observed month.
    pub growing_languages: Vec<String>,
    /// Monthly file share strictly decreasing across every observed month.
    pub declining_languages: Vec<String>,
    /// Repository → its most used language.
    pub repository_languages: BTreeMap<String, String>,
}

/// Language totals, monthly evolution, diversity and trend detection.
#[derive(Debug, Clone)]
pub struct LanguageAnalyzer {
    config: AnalysisConfig,
}

impl LanguageAnalyzer {
    /// Analyzer bucketing months by the configured UTC offset.
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Compute the typed report.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use commitscope_core::{AnalysisConfig, CommitRecord, FileChange};
    /// use commitscope_pulse::language::LanguageAnalyzer;
    ///
    /// let record = CommitRecord {
    ///     sha: "a1".into(),
    ///     repository: "tool".into(),
    ///     timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
    ///     message: "Add parser".into(),
    ///     files: vec![
    ///         FileChange::new("src/lib.rs", 40, 2),
    ///         FileChange::new("logo.png", 0, 0),
    ///     ],
    /// };
    /// let report = LanguageAnalyzer::new(AnalysisConfig::default()).report(&[record]);
    /// assert_eq!(report.primary_language.as_deref(), Some("Rust"));
    /// assert_eq!(report.excluded_files, 1);
    /// assert_eq!(report.diversity_score, 0.0);
    /// ```
    pub fn report(&self, records: &[CommitRecord]) -> LanguageReport {
        let (records, excluded_records) = valid_records(self.name(), records);

        let mut totals: HashMap<&str, LanguageUsage> = HashMap::new();
        let mut monthly: BTreeMap<String, BTreeMap<String, LanguageUsage>> = BTreeMap::new();
        let mut per_repository: HashMap<&str, HashMap<&str, usize>> = HashMap::new();
        let mut excluded_files = 0usize;
        let mut commits_with_files = 0usize;

        for record in &records {
            if !record.files.is_empty() {
                commits_with_files += 1;
            }
            let month = month_key(
                local_time(record.timestamp, self.config.utc_offset_minutes).date(),
            );
            for file in &record.files {
                let Some(language) = file.language.as_deref() else {
                    excluded_files += 1;
                    continue;
                };
                let lines = file.lines_changed();

                let total = totals.entry(language).or_default();
                total.files += 1;
                total.lines += lines;

                let usage = monthly
                    .entry(month.clone())
                    .or_default()
                    .entry(language.to_string())
                    .or_default();
                usage.files += 1;
                usage.lines += lines;

                *per_repository
                    .entry(record.repository.as_str())
                    .or_default()
                    .entry(language)
                    .or_default() += 1;
            }
        }

        let total_files: usize = totals.values().map(|usage| usage.files).sum();
        let mut languages: Vec<LanguageTotal> = totals
            .into_iter()
            .map(|(language, usage)| LanguageTotal {
                language: language.to_string(),
                files: usage.files,
                lines: usage.lines,
                percentage: percentage(usage.files, total_files),
            })
            .collect();
        languages.sort_by(|a, b| {
            b.files
                .cmp(&a.files)
                .then(b.lines.cmp(&a.lines))
                .then_with(|| a.language.cmp(&b.language))
        });

        let counts: Vec<usize> = languages.iter().map(|l| l.files).collect();
        let shannon_index = shannon(&counts);
        let diversity_score = if counts.len() < 2 {
            0.0
        } else {
            (shannon_index / (counts.len() as f64).ln() * 100.0).clamp(0.0, 100.0)
        };

        let (growing_languages, declining_languages) = trends(&languages, &monthly);

        let repository_languages = per_repository
            .into_iter()
            .filter_map(|(repository, counts)| {
                counts
                    .into_iter()
                    .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(a.0)))
                    .map(|(language, _)| (repository.to_string(), language.to_string()))
            })
            .collect();

        LanguageReport {
            total_commits: records.len(),
            excluded_records,
            commits_with_files,
            total_files,
            excluded_files,
            top_languages: languages
                .iter()
                .take(TOP_LANGUAGES)
                .map(|l| l.language.clone())
                .collect(),
            primary_language: languages.first().map(|l| l.language.clone()),
            languages,
            monthly,
            shannon_index,
            diversity_score,
            growing_languages,
            declining_languages,
            repository_languages,
        }
    }
}

impl Analyzer for LanguageAnalyzer {
    fn name(&self) -> &'static str {
        "language"
    }

    fn analyze(&self, records: &[CommitRecord]) -> MetricsBundle {
        MetricsBundle::from_report(self.name(), &self.report(records))
    }
}

/// `-Σ p ln p` over the non-zero counts.
fn shannon(counts: &[usize]) -> f64 {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    counts
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / total as f64;
            -p * p.ln()
        })
        .sum()
}

/// Languages whose monthly file share strictly rises, and those whose
/// share strictly falls, across every observed month.
fn trends(
    languages: &[LanguageTotal],
    monthly: &BTreeMap<String, BTreeMap<String, LanguageUsage>>,
) -> (Vec<String>, Vec<String>) {
    let mut growing = Vec::new();
    let mut declining = Vec::new();
    if monthly.len() < 2 {
        return (growing, declining);
    }

    for language in languages {
        let shares: Vec<f64> = monthly
            .values()
            .map(|month| {
                let total: usize = month.values().map(|usage| usage.files).sum();
                let files = month.get(&language.language).map_or(0, |usage| usage.files);
                percentage(files, total)
            })
            .collect();
        if shares.windows(2).all(|pair| pair[1] > pair[0]) {
            growing.push(language.language.clone());
        } else if shares.windows(2).all(|pair| pair[1] < pair[0]) {
            declining.push(language.language.clone());
        }
    }
    (growing, declining)
}
