//! Productivity indices: consistency, devotion and velocity.
//!
//! Days and weeks are local calendar units after applying the configured
//! UTC offset. Weeks start on Monday. Velocity figures use the dense
//! day series of the observed span, so idle days count as zero.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Duration, NaiveDate};
use commitscope_core::{AnalysisConfig, CommitRecord, MetricsBundle};
use serde::{Deserialize, Serialize};

use crate::analyzer::{local_time, percentage, valid_records, Analyzer};

/// Shortest run of above-threshold days reported as an intense streak.
const MIN_INTENSE_DAYS: usize = 3;
/// Intense streaks listed in the report.
const TOP_INTENSE_STREAKS: usize = 5;
/// Trend percentage beyond which velocity is no longer stable.
const TREND_BAND: f64 = 10.0;

/// Commit share of one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDevotion {
    /// Repository name.
    pub repository: String,
    /// Commits in the repository.
    pub commits: usize,
    /// Share of all commits, 0–100.
    pub share: f64,
}

/// The busiest rolling window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotStreak {
    /// First day of the window.
    pub start: NaiveDate,
    /// Last day of the window, inclusive.
    pub end: NaiveDate,
    /// Commits inside the window.
    pub commits: usize,
    /// `commits` divided by the window length.
    pub commits_per_day: f64,
}

/// A run of consecutive days at or above the intensity threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntenseStreak {
    pub start: NaiveDate,
    /// Inclusive.
    pub end: NaiveDate,
    pub days: usize,
    pub commits: usize,
    pub commits_per_day: f64,
}

/// Busiest single day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeakDay {
    /// Local calendar day.
    pub date: NaiveDate,
    /// Commits on that day.
    pub commits: usize,
}

/// Direction of recent velocity compared with the start of the span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelocityTrend {
    Accelerating,
    Stable,
    Decelerating,
}

impl VelocityTrend {
    /// Classify a trend percentage; anything within ±10 is stable.
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage > TREND_BAND {
            VelocityTrend::Accelerating
        } else if percentage < -TREND_BAND {
            VelocityTrend::Decelerating
        } else {
            VelocityTrend::Stable
        }
    }
}

/// Everything the productivity analyzer reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductivityReport {
    /// Commits analyzed.
    pub total_commits: usize,
    /// Records that failed validation and were left out.
    pub excluded_records: usize,
    /// Active weeks over weeks in the observed window, 0–100.
    pub consistency_score: f64,
    /// Monday-start weeks with at least one commit.
    pub active_weeks: usize,
    /// Monday-start weeks from the first to the last commit.
    pub total_weeks: usize,
    pub average_commits_per_active_week: f64,
    /// Local days with at least one commit.
    pub active_days: usize,
    /// Days from the first to the last commit, inclusive.
    pub span_days: usize,
    /// `active_days` over `span_days`, 0–100.
    pub active_day_percentage: f64,
    /// Repositories with at least one commit.
    pub repository_count: usize,
    /// Most commits first, ties by name.
    pub devoted_repositories: Vec<RepositoryDevotion>,
    /// Length of the rolling window used for velocity.
    pub velocity_window_days: u32,
    /// Earliest window with the highest commit count.
    pub hot_streak: Option<HotStreak>,
    /// Commits over `span_days`.
    pub average_commits_per_day: f64,
    /// Mean commits per day over the last window of the span.
    pub recent_velocity: f64,
    /// Mean commits per day over the first window of the span.
    pub early_velocity: f64,
    /// Change from early to recent velocity, in percent.
    pub velocity_trend_percentage: f64,
    pub velocity_trend: VelocityTrend,
    /// Share of active days with at most `recent_velocity` commits, 0–100.
    pub recent_velocity_percentile: f64,
    /// Commits per active day needed to count towards an intense streak.
    pub intense_streak_threshold: f64,
    /// Number of intense streaks found.
    pub intense_streak_count: usize,
    /// Longest intense streaks first, ties by start.
    pub intense_streaks: Vec<IntenseStreak>,
    /// Earliest day with the highest commit count.
    pub peak_day: Option<PeakDay>,
    /// Lines added across all file changes.
    pub lines_added: u64,
    /// Lines removed across all file changes.
    pub lines_removed: u64,
}

/// Consistency, devotion and velocity analysis.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use commitscope_core::{AnalysisConfig, CommitRecord};
/// use commitscope_pulse::ProductivityAnalyzer;
///
/// let record = |sha: &str, day| CommitRecord {
///     sha: sha.into(),
///     repository: "cli".into(),
///     timestamp: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
///     message: "Add parser".into(),
///     files: vec![],
/// };
/// let report = ProductivityAnalyzer::new(AnalysisConfig::default())
///     .report(&[record("a", 1), record("b", 2), record("c", 4)]);
/// assert_eq!(report.active_days, 3);
/// assert_eq!(report.span_days, 4);
/// assert_eq!(report.average_commits_per_day, 0.75);
/// ```
#[derive(Debug, Clone)]
pub struct ProductivityAnalyzer {
    config: AnalysisConfig,
}

impl ProductivityAnalyzer {
    /// Analyzer using the offset, top-N and window settings of `config`.
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Typed report over `records`; invalid records are excluded and counted.
    pub fn report(&self, records: &[CommitRecord]) -> ProductivityReport {
        let (records, excluded_records) = valid_records(self.name(), records);
        let total = records.len();

        let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
        let mut per_repository: HashMap<&str, usize> = HashMap::new();
        let mut lines_added = 0u64;
        let mut lines_removed = 0u64;
        for record in &records {
            let day = local_time(record.timestamp, self.config.utc_offset_minutes).date();
            *per_day.entry(day).or_default() += 1;
            *per_repository.entry(record.repository.as_str()).or_default() += 1;
            for file in &record.files {
                lines_added += file.additions;
                lines_removed += file.deletions;
            }
        }

        let (first, last) = match (per_day.keys().next(), per_day.keys().next_back()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return self.empty(excluded_records),
        };
        let span_days = (last - first).num_days() as usize + 1;
        let mut daily = vec![0usize; span_days];
        for (day, commits) in &per_day {
            daily[(*day - first).num_days() as usize] = *commits;
        }

        let mut weeks: Vec<NaiveDate> = per_day.keys().map(|day| week_start(*day)).collect();
        weeks.dedup();
        let active_weeks = weeks.len();
        let total_weeks = ((week_start(last) - week_start(first)).num_days() / 7) as usize + 1;

        let peak_day = per_day
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(date, commits)| PeakDay {
                date: *date,
                commits: *commits,
            });

        let repository_count = per_repository.len();
        let mut devoted: Vec<(&str, usize)> = per_repository.into_iter().collect();
        devoted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        let devoted_repositories = devoted
            .into_iter()
            .take(self.config.top_repositories)
            .map(|(repository, commits)| RepositoryDevotion {
                repository: repository.to_string(),
                commits,
                share: percentage(commits, total),
            })
            .collect();

        let window = self.config.velocity_window_days.max(1) as usize;
        let velocity = velocity(&daily, window);
        let active_counts: Vec<usize> = per_day.values().copied().collect();
        let at_or_below = active_counts
            .iter()
            .filter(|commits| **commits as f64 <= velocity.recent)
            .count();
        let threshold = intensity_threshold(&active_counts);
        let mut intense = intense_streaks(&daily, first, threshold);
        let intense_streak_count = intense.len();
        intense.truncate(TOP_INTENSE_STREAKS);

        ProductivityReport {
            total_commits: total,
            excluded_records,
            consistency_score: percentage(active_weeks, total_weeks),
            active_weeks,
            total_weeks,
            average_commits_per_active_week: total as f64 / active_weeks as f64,
            active_days: per_day.len(),
            span_days,
            active_day_percentage: percentage(per_day.len(), span_days),
            repository_count,
            devoted_repositories,
            velocity_window_days: self.config.velocity_window_days,
            hot_streak: hot_streak(&daily, first, window),
            average_commits_per_day: velocity.average,
            recent_velocity: velocity.recent,
            early_velocity: velocity.early,
            velocity_trend_percentage: velocity.trend,
            velocity_trend: VelocityTrend::from_percentage(velocity.trend),
            recent_velocity_percentile: percentage(at_or_below, active_counts.len()),
            intense_streak_threshold: threshold,
            intense_streak_count,
            intense_streaks: intense,
            peak_day,
            lines_added,
            lines_removed,
        }
    }

    fn empty(&self, excluded_records: usize) -> ProductivityReport {
        ProductivityReport {
            total_commits: 0,
            excluded_records,
            consistency_score: 0.0,
            active_weeks: 0,
            total_weeks: 0,
            average_commits_per_active_week: 0.0,
            active_days: 0,
            span_days: 0,
            active_day_percentage: 0.0,
            repository_count: 0,
            devoted_repositories: Vec::new(),
            velocity_window_days: self.config.velocity_window_days,
            hot_streak: None,
            average_commits_per_day: 0.0,
            recent_velocity: 0.0,
            early_velocity: 0.0,
            velocity_trend_percentage: 0.0,
            velocity_trend: VelocityTrend::Stable,
            recent_velocity_percentile: 0.0,
            intense_streak_threshold: 0.0,
            intense_streak_count: 0,
            intense_streaks: Vec::new(),
            peak_day: None,
            lines_added: 0,
            lines_removed: 0,
        }
    }
}

impl Analyzer for ProductivityAnalyzer {
    fn name(&self) -> &'static str {
        "productivity"
    }

    fn analyze(&self, records: &[CommitRecord]) -> MetricsBundle {
        MetricsBundle::from_report(self.name(), &self.report(records))
    }
}

/// Monday of the week containing `day`.
fn week_start(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.weekday().num_days_from_monday()))
}

/// Slide a `window`-day window across the dense day series and keep the
/// earliest one with the most commits. A span shorter than the window
/// yields a single window starting at the first day.
fn hot_streak(daily: &[usize], first: NaiveDate, window: usize) -> Option<HotStreak> {
    let starts = daily.len().saturating_sub(window) + 1;
    let mut running: usize = daily.iter().take(window).sum();
    let mut best = (0usize, running);
    for start in 1..starts {
        running = running + daily[start + window - 1] - daily[start - 1];
        if running > best.1 {
            best = (start, running);
        }
    }

    let (offset, commits) = best;
    if commits == 0 {
        return None;
    }
    let start = first + Duration::days(offset as i64);
    Some(HotStreak {
        start,
        end: start + Duration::days(window as i64 - 1),
        commits,
        commits_per_day: commits as f64 / window as f64,
    })
}

struct Velocity {
    average: f64,
    recent: f64,
    early: f64,
    trend: f64,
}

fn velocity(daily: &[usize], window: usize) -> Velocity {
    let total: usize = daily.iter().sum();
    let average = total as f64 / daily.len() as f64;
    if daily.len() < window {
        return Velocity {
            average,
            recent: average,
            early: average,
            trend: 0.0,
        };
    }

    let mean = |days: &[usize]| days.iter().sum::<usize>() as f64 / window as f64;
    let early = mean(&daily[..window]);
    let recent = mean(&daily[daily.len() - window..]);
    let trend = if early > 0.0 {
        (recent - early) / early * 100.0
    } else {
        0.0
    };
    Velocity {
        average,
        recent,
        early,
        trend,
    }
}

/// Mean plus sample standard deviation of commits per active day.
fn intensity_threshold(counts: &[usize]) -> f64 {
    if counts.is_empty() {
        return 0.0;
    }
    let n = counts.len() as f64;
    let mean = counts.iter().sum::<usize>() as f64 / n;
    if counts.len() < 2 {
        return mean;
    }
    let variance = counts
        .iter()
        .map(|c| (*c as f64 - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    mean + variance.sqrt()
}

/// Runs of at least [`MIN_INTENSE_DAYS`] consecutive days at or above
/// `threshold`, longest first with ties broken by the earlier start.
fn intense_streaks(daily: &[usize], first: NaiveDate, threshold: f64) -> Vec<IntenseStreak> {
    let mut streaks = Vec::new();
    let mut run_start: Option<usize> = None;
    // A trailing zero closes a run that reaches the last day.
    for (offset, commits) in daily.iter().chain(std::iter::once(&0)).enumerate() {
        let hot = *commits > 0 && *commits as f64 >= threshold;
        match (hot, run_start) {
            (true, None) => run_start = Some(offset),
            (false, Some(start)) => {
                let days = offset - start;
                if days >= MIN_INTENSE_DAYS {
                    let commits: usize = daily[start..offset].iter().sum();
                    let start_day = first + Duration::days(start as i64);
                    streaks.push(IntenseStreak {
                        start: start_day,
                        end: start_day + Duration::days(days as i64 - 1),
                        days,
                        commits,
                        commits_per_day: commits as f64 / days as f64,
                    });
                }
                run_start = None;
            }
            _ => {}
        }
    }
    streaks.sort_by(|a, b| b.days.cmp(&a.days).then(a.start.cmp(&b.start)));
    streaks
}
