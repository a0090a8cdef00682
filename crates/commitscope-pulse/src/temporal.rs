//! Temporal rhythm: when commits happen.
//!
//! Buckets commit times by hour of day and day of week after applying
//! the configured UTC offset, finds the longest daily streak, and
//! classifies the dominant activity window.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Timelike};
use commitscope_core::{AnalysisConfig, CommitRecord, MetricsBundle};
use serde::{Deserialize, Serialize};

use crate::analyzer::{local_time, month_key, percentage, valid_records, Analyzer};

const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Named parts of the day as `(label, first hour, end hour)`.
const PERIODS: [(&str, u32, u32); 5] = [
    ("lateNight", 0, 6),
    ("morning", 6, 12),
    ("afternoon", 12, 17),
    ("evening", 17, 21),
    ("night", 21, 24),
];

/// Dominant activity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityWindow {
    /// More than the threshold share of commits fall outside the day window.
    NightOwl,
    /// Everything else, including an empty history.
    DayCoder,
}

/// One of the busiest hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakHour {
    /// Hour of day, 0–23.
    pub hour: u32,
    /// Commits in that hour.
    pub count: usize,
    /// Share of all commits, 0–100.
    pub percentage: f64,
}

/// Commits in one named part of the day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodShare {
    /// `lateNight`, `morning`, `afternoon`, `evening` or `night`.
    pub period: String,
    /// Commits in the period.
    pub count: usize,
    /// Share of all commits, 0–100.
    pub percentage: f64,
}

/// Longest run of consecutive calendar days with at least one commit.
///
/// # Examples
///
/// ```
/// use commitscope_pulse::temporal::Streak;
///
/// let none = Streak::default();
/// assert_eq!(none.length, 0);
/// assert!(none.start.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Streak {
    /// Days in the run.
    pub length: usize,
    /// First day of the run.
    pub start: Option<NaiveDate>,
    /// Last day of the run.
    pub end: Option<NaiveDate>,
}

/// Everything the temporal analyzer reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalReport {
    /// Commits analyzed.
    pub total_commits: usize,
    /// Records skipped by validation.
    pub excluded_records: usize,
    /// Applied offset in minutes.
    pub utc_offset_minutes: i32,
    /// Commits per hour, index 0 = 00:00.
    pub hourly_counts: Vec<usize>,
    /// `hourly_counts` as shares of all commits, 0–100.
    pub hourly_percentages: Vec<f64>,
    /// Up to three busiest hours, busiest first, ties by earlier hour.
    pub peak_hours: Vec<PeakHour>,
    /// Commits per weekday, index 0 = Monday.
    pub daily_counts: Vec<usize>,
    /// `daily_counts` as shares of all commits, 0–100.
    pub daily_percentages: Vec<f64>,
    /// Busiest weekday, ties by earlier weekday.
    pub most_active_day: Option<String>,
    /// Share of commits Monday–Friday, 0–100.
    pub weekday_percentage: f64,
    /// Share of commits Saturday–Sunday, 0–100.
    pub weekend_percentage: f64,
    /// Commits per part of the day.
    pub periods: Vec<PeriodShare>,
    /// Longest daily streak, most recent on ties.
    pub longest_streak: Streak,
    /// Distinct days with a commit.
    pub active_days: usize,
    /// Calendar days from first to last commit, inclusive.
    pub span_days: usize,
    /// Commits per `YYYY-MM`.
    pub monthly_counts: BTreeMap<String, usize>,
    /// Share of commits outside the day window, 0–1.
    pub off_hours_share: f64,
    /// Classification derived from `off_hours_share`.
    pub activity_window: ActivityWindow,
}

/// Hour, weekday, streak and activity-window analysis.
#[derive(Debug, Clone)]
pub struct TemporalAnalyzer {
    config: AnalysisConfig,
}

impl TemporalAnalyzer {
    /// Create the analyzer.
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Compute the typed report.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use commitscope_core::{AnalysisConfig, CommitRecord};
    /// use commitscope_pulse::temporal::TemporalAnalyzer;
    ///
    /// let at = |d, h, m| Utc.with_ymd_and_hms(2024, 3, d, h, m, 0).unwrap();
    /// let records: Vec<CommitRecord> = [(1, 9, 0), (2, 9, 30), (3, 22, 0)]
    ///     .iter()
    ///     .enumerate()
    ///     .map(|(i, &(d, h, m))| CommitRecord {
    ///         sha: format!("c{i}"),
    ///         repository: "r".into(),
    ///         timestamp: at(d, h, m),
    ///         message: "Add".into(),
    ///         files: vec![],
    ///     })
    ///     .collect();
    ///
    /// let report = TemporalAnalyzer::new(AnalysisConfig::default()).report(&records);
    /// assert_eq!(report.hourly_counts[9], 2);
    /// assert_eq!(report.hourly_counts[22], 1);
    /// assert_eq!(report.longest_streak.length, 3);
    /// ```
    pub fn report(&self, records: &[CommitRecord]) -> TemporalReport {
        let (records, excluded_records) = valid_records(self.name(), records);
        let total = records.len();

        let mut hourly_counts = vec![0usize; 24];
        let mut daily_counts = vec![0usize; 7];
        let mut monthly_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut days: Vec<NaiveDate> = Vec::with_capacity(total);
        let mut off_hours = 0usize;

        for record in &records {
            let local = local_time(record.timestamp, self.config.utc_offset_minutes);
            let hour = local.hour();
            hourly_counts[hour as usize] += 1;
            daily_counts[local.weekday().num_days_from_monday() as usize] += 1;
            *monthly_counts.entry(month_key(local.date())).or_default() += 1;
            days.push(local.date());
            if hour < self.config.day_start_hour || hour >= self.config.day_end_hour {
                off_hours += 1;
            }
        }
        days.sort_unstable();
        days.dedup();

        let mut ranked: Vec<(u32, usize)> = hourly_counts
            .iter()
            .enumerate()
            .filter(|(_, &count)| count > 0)
            .map(|(hour, &count)| (hour as u32, count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let peak_hours = ranked
            .into_iter()
            .take(3)
            .map(|(hour, count)| PeakHour {
                hour,
                count,
                percentage: percentage(count, total),
            })
            .collect();

        let most_active_day = daily_counts
            .iter()
            .enumerate()
            .filter(|(_, &count)| count > 0)
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(day, _)| DAY_NAMES[day].to_string());

        let weekday: usize = daily_counts[..5].iter().sum();
        let weekend: usize = daily_counts[5..].iter().sum();

        let periods = PERIODS
            .iter()
            .map(|&(period, start, end)| {
                let count: usize = hourly_counts[start as usize..end as usize].iter().sum();
                PeriodShare {
                    period: period.to_string(),
                    count,
                    percentage: percentage(count, total),
                }
            })
            .collect();

        let span_days = match (days.first(), days.last()) {
            (Some(first), Some(last)) => (*last - *first).num_days() as usize + 1,
            _ => 0,
        };

        let off_hours_share = if total == 0 {
            0.0
        } else {
            off_hours as f64 / total as f64
        };
        let activity_window = if off_hours_share > self.config.night_share_threshold {
            ActivityWindow::NightOwl
        } else {
            ActivityWindow::DayCoder
        };

        TemporalReport {
            total_commits: total,
            excluded_records,
            utc_offset_minutes: self.config.utc_offset_minutes,
            hourly_percentages: hourly_counts.iter().map(|&c| percentage(c, total)).collect(),
            hourly_counts,
            peak_hours,
            daily_percentages: daily_counts.iter().map(|&c| percentage(c, total)).collect(),
            daily_counts,
            most_active_day,
            weekday_percentage: percentage(weekday, total),
            weekend_percentage: percentage(weekend, total),
            periods,
            longest_streak: longest_streak(&days),
            active_days: days.len(),
            span_days,
            monthly_counts,
            off_hours_share,
            activity_window,
        }
    }
}

impl Analyzer for TemporalAnalyzer {
    fn name(&self) -> &'static str {
        "temporal"
    }

    fn analyze(&self, records: &[CommitRecord]) -> MetricsBundle {
        MetricsBundle::from_report(self.name(), &self.report(records))
    }
}

/// Longest run over sorted, distinct days. Later runs win ties.
fn longest_streak(days: &[NaiveDate]) -> Streak {
    let mut best = Streak::default();
    let mut run_start = 0;
    for i in 0..days.len() {
        let continues = i > 0 && (days[i] - days[i - 1]).num_days() == 1;
        if !continues {
            run_start = i;
        }
        let length = i - run_start + 1;
        if length >= best.length {
            best = Streak {
                length,
                start: Some(days[run_start]),
                end: Some(days[i]),
            };
        }
    }
    best
}
