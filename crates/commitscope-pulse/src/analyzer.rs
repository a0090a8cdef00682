//! The analyzer seam and helpers shared by the variants.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use commitscope_core::{CommitRecord, MetricsBundle};
use tracing::debug;

/// A pure transform from a sorted commit collection to a metrics bundle.
///
/// Implementations must not depend on the wall clock or on any state
/// other than their configuration, so that repeated runs over the same
/// records produce identical bundles. Records failing
/// [`CommitRecord::validate`] are skipped and reported as
/// `excludedRecords`; an empty input yields a zero-valued bundle.
///
/// # Examples
///
/// ```
/// use commitscope_core::{AnalysisConfig, CommitRecord};
/// use commitscope_pulse::analyzer::Analyzer;
/// use commitscope_pulse::temporal::TemporalAnalyzer;
///
/// let analyzer = TemporalAnalyzer::new(AnalysisConfig::default());
/// let records: Vec<CommitRecord> = Vec::new();
/// let bundle = analyzer.analyze(&records);
/// assert_eq!(bundle.analyzer, "temporal");
/// assert_eq!(bundle.metrics["totalCommits"], 0);
/// ```
pub trait Analyzer: Send + Sync {
    /// Key of the bundle in the document.
    fn name(&self) -> &'static str;

    /// Compute the bundle. `records` are sorted by `(timestamp, sha)`.
    fn analyze(&self, records: &[CommitRecord]) -> MetricsBundle;
}

/// Records that pass validation, plus the number skipped.
pub(crate) fn valid_records<'a>(
    analyzer: &str,
    records: &'a [CommitRecord],
) -> (Vec<&'a CommitRecord>, usize) {
    let mut excluded = 0;
    let valid = records
        .iter()
        .filter(|record| match record.validate() {
            Ok(()) => true,
            Err(e) => {
                excluded += 1;
                debug!(analyzer, error = %e, "excluding record");
                false
            }
        })
        .collect();
    (valid, excluded)
}

/// Shift a UTC timestamp by the configured offset.
pub(crate) fn local_time(timestamp: DateTime<Utc>, offset_minutes: i32) -> NaiveDateTime {
    timestamp.naive_utc() + Duration::minutes(i64::from(offset_minutes))
}

/// `YYYY-MM` label of a date.
pub(crate) fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// `part / total * 100`, or 0 for an empty total.
pub(crate) fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Median of an unsorted sample, 0 when empty.
pub(crate) fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn offset_moves_across_midnight() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap();
        let local = local_time(ts, 90);
        assert_eq!(local.date(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(month_key(local_time(ts, -24 * 60).date()), "2023-12");
    }

    #[test]
    fn median_handles_even_and_odd_samples() {
        assert_eq!(median(&mut []), 0.0);
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn invalid_records_are_counted() {
        let good = CommitRecord {
            sha: "a".into(),
            repository: "r".into(),
            timestamp: Utc::now(),
            message: "Add".into(),
            files: vec![],
        };
        let bad = CommitRecord {
            sha: String::new(),
            ..good.clone()
        };
        let records = [good, bad];
        let (valid, excluded) = valid_records("test", &records);
        assert_eq!(valid.len(), 1);
        assert_eq!(excluded, 1);
        assert_eq!(percentage(1, 4), 25.0);
        assert_eq!(percentage(3, 0), 0.0);
    }
}
