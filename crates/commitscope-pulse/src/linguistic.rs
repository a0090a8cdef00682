//! Commit message linguistics: leading verbs, polarity, message types,
//! lengths and recurring phrases.

use std::collections::{BTreeMap, HashMap};

use commitscope_core::{AnalysisConfig, CommitRecord, MetricsBundle};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analyzer::{median, valid_records, Analyzer};
use crate::sentiment::{LexiconScorer, Polarity, PolarityScorer};

/// Base forms recognized as a message's leading verb.
const VERBS: &[&str] = &[
    "add", "adjust", "allow", "build", "bump", "change", "clean", "configure", "correct",
    "create", "delete", "deprecate", "disable", "document", "drop", "enable", "enhance",
    "extract", "fix", "format", "handle", "ignore", "implement", "improve", "include",
    "initialize", "install", "introduce", "make", "merge", "migrate", "move", "optimize",
    "prepare", "refactor", "release", "remove", "rename", "replace", "restore", "revert",
    "rewrite", "set", "simplify", "split", "support", "switch", "tweak", "update", "upgrade",
    "use", "write",
];

/// Words dropped before phrase extraction.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "into", "this", "that", "these", "those", "was",
    "were", "are", "has", "have", "had", "not", "but", "its", "all", "any", "can", "out",
    "when", "then", "than", "also", "some", "more", "now", "our", "you", "your", "via",
    "add", "added", "update", "updated", "fix", "fixed", "remove", "removed", "change",
    "changed", "modify", "modified", "delete", "deleted", "merge", "merging", "commit",
    "committed", "push", "pushed",
];

/// Message classes, checked in order. A message belongs to the first
/// class with a token starting with one of its prefixes.
const MESSAGE_TYPES: &[(&str, &[&str])] = &[
    ("merge", &["merge", "merging"]),
    ("bugfix", &["fix", "bug", "error"]),
    ("feature", &["feat", "add", "new"]),
    ("refactor", &["refactor", "clean", "improve"]),
    ("documentation", &["doc", "readme", "comment"]),
    ("test", &["test"]),
];

const TOP_BIGRAMS: usize = 15;
const EXCERPT_CHARS: usize = 100;

/// Occurrences of one leading verb.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerbCount {
    /// Base form, e.g. `fix` for `fixed`.
    pub verb: String,
    /// Messages led by the verb.
    pub count: usize,
    /// Share of well-formed messages, 0–1.
    pub proportion: f64,
}

/// A commit singled out by its polarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredMessage {
    pub sha: String,
    pub repository: String,
    /// First line, truncated.
    pub message: String,
    /// Polarity in `[-1, 1]`.
    pub score: f64,
}

/// Polarity distribution over well-formed messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentSummary {
    /// Messages classified [`Polarity::Positive`](crate::sentiment::Polarity).
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
    /// Mean score, 0 without messages.
    pub average_polarity: f64,
    /// Highest positive score; ties keep the first in input order.
    pub most_positive: Option<ScoredMessage>,
    /// Lowest negative score; ties keep the first in input order.
    pub most_negative: Option<ScoredMessage>,
}

/// Message length statistics over all analyzed messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LengthStats {
    /// Characters of the full message.
    pub mean_chars: f64,
    pub median_chars: f64,
    /// Whitespace-separated words of the full message.
    pub mean_words: f64,
    pub median_words: f64,
}

/// A recurring two-word phrase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BigramCount {
    /// Two adjacent content tokens joined by a space.
    pub bigram: String,
    pub count: usize,
}

/// Everything the linguistic analyzer reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinguisticReport {
    /// Messages analyzed, malformed ones included.
    pub total_messages: usize,
    /// Records that failed validation and were left out.
    pub excluded_records: usize,
    /// Messages without a single alphabetic token.
    pub malformed_messages: usize,
    /// Well-formed messages whose first token is a known verb.
    pub messages_with_verb: usize,
    pub unique_verbs: usize,
    /// Most frequent first, ties by verb.
    pub top_verbs: Vec<VerbCount>,
    pub sentiment: SentimentSummary,
    /// Message type → messages classified as it.
    pub message_types: BTreeMap<String, usize>,
    pub length: LengthStats,
    /// Most frequent first, ties by phrase.
    pub top_bigrams: Vec<BigramCount>,
}

/// Lower-case the text, turn every non-letter into a separator and split.
///
/// # Examples
///
/// ```
/// use commitscope_pulse::linguistic::tokenize;
///
/// assert_eq!(tokenize("Fix login-bug (#12)"), ["fix", "login", "bug"]);
/// assert!(tokenize("🎉").is_empty());
/// ```
pub fn tokenize(message: &str) -> Vec<String> {
    let cleaned: String = message
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphabetic() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().map(str::to_string).collect()
}

/// Map an inflected token to its base verb, if it is one.
///
/// # Examples
///
/// ```
/// use commitscope_pulse::linguistic::base_verb;
///
/// for word in ["fix", "fixed", "fixes", "fixing"] {
///     assert_eq!(base_verb(word), Some("fix"));
/// }
/// assert_eq!(base_verb("updating"), Some("update"));
/// assert_eq!(base_verb("login"), None);
/// ```
pub fn base_verb(token: &str) -> Option<&'static str> {
    let known = |word: &str| VERBS.iter().copied().find(|verb| *verb == word);
    if let Some(verb) = known(token) {
        return Some(verb);
    }

    let mut candidates: Vec<String> = Vec::new();
    if let Some(stem) = token.strip_suffix("ies").or_else(|| token.strip_suffix("ied")) {
        candidates.push(format!("{stem}y"));
    }
    for suffix in ["ing", "ed"] {
        if let Some(stem) = token.strip_suffix(suffix) {
            candidates.push(stem.to_string());
            candidates.push(format!("{stem}e"));
            if let Some(undoubled) = undouble(stem) {
                candidates.push(undoubled.to_string());
            }
        }
    }
    for suffix in ["es", "s", "d"] {
        if let Some(stem) = token.strip_suffix(suffix) {
            candidates.push(stem.to_string());
        }
    }

    candidates
        .iter()
        .filter(|stem| !stem.is_empty())
        .find_map(|stem| known(stem.as_str()))
}

/// `stopp` → `stop`: drop a doubled trailing consonant.
fn undouble(stem: &str) -> Option<&str> {
    let mut chars = stem.chars().rev();
    match (chars.next(), chars.next()) {
        (Some(a), Some(b)) if a == b && !"aeiou".contains(a) => {
            Some(&stem[..stem.len() - a.len_utf8()])
        }
        _ => None,
    }
}

fn classify(tokens: &[String]) -> &'static str {
    MESSAGE_TYPES
        .iter()
        .find(|(_, prefixes)| {
            tokens
                .iter()
                .any(|token| prefixes.iter().any(|prefix| token.starts_with(prefix)))
        })
        .map(|(kind, _)| *kind)
        .unwrap_or("other")
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn excerpt(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or_default().trim();
    if first_line.chars().count() <= EXCERPT_CHARS {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(EXCERPT_CHARS).collect();
        format!("{cut}...")
    }
}

/// Verb, polarity, message-type, length and phrase analysis.
pub struct LinguisticAnalyzer {
    config: AnalysisConfig,
    scorer: Box<dyn PolarityScorer>,
}

impl LinguisticAnalyzer {
    /// Create the analyzer with the default [`LexiconScorer`].
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            scorer: Box::new(LexiconScorer),
        }
    }

    /// Swap the polarity scorer.
    pub fn with_scorer(mut self, scorer: impl PolarityScorer + 'static) -> Self {
        self.scorer = Box::new(scorer);
        self
    }

    /// Typed report over `records`; invalid records are excluded and counted.
    pub fn report(&self, records: &[CommitRecord]) -> LinguisticReport {
        let (records, excluded_records) = valid_records(self.name(), records);

        let mut malformed = 0usize;
        let mut well_formed = 0usize;
        let mut verbs: HashMap<&'static str, usize> = HashMap::new();
        let mut message_types: BTreeMap<String, usize> = BTreeMap::new();
        let mut bigrams: HashMap<String, usize> = HashMap::new();
        let mut chars = Vec::with_capacity(records.len());
        let mut words = Vec::with_capacity(records.len());
        let mut sentiment = SentimentSummary::default();
        let mut polarity_sum = 0.0;

        for record in &records {
            chars.push(record.message.chars().count() as f64);
            words.push(record.message.split_whitespace().count() as f64);

            let tokens = tokenize(&record.message);
            *message_types.entry(classify(&tokens).to_string()).or_default() += 1;
            if tokens.is_empty() {
                malformed += 1;
                debug!(sha = %record.sha, "message has no tokens");
                continue;
            }
            well_formed += 1;

            if let Some(verb) = base_verb(&tokens[0]) {
                *verbs.entry(verb).or_default() += 1;
            }

            let score = self.scorer.score(&record.message).clamp(-1.0, 1.0);
            polarity_sum += score;
            match Polarity::from_score(score) {
                Polarity::Positive => sentiment.positive += 1,
                Polarity::Neutral => sentiment.neutral += 1,
                Polarity::Negative => sentiment.negative += 1,
            }
            let scored = || ScoredMessage {
                sha: record.sha.clone(),
                repository: record.repository.clone(),
                message: excerpt(&record.message),
                score,
            };
            if score > 0.0 && sentiment.most_positive.as_ref().map_or(true, |m| score > m.score) {
                sentiment.most_positive = Some(scored());
            }
            if score < 0.0 && sentiment.most_negative.as_ref().map_or(true, |m| score < m.score) {
                sentiment.most_negative = Some(scored());
            }

            let content: Vec<&str> = tokens
                .iter()
                .map(String::as_str)
                .filter(|t| t.len() > 2 && !STOPWORDS.contains(t))
                .collect();
            for pair in content.windows(2) {
                *bigrams.entry(format!("{} {}", pair[0], pair[1])).or_default() += 1;
            }
        }
        if well_formed > 0 {
            sentiment.average_polarity = polarity_sum / well_formed as f64;
        }

        let messages_with_verb: usize = verbs.values().sum();
        let unique_verbs = verbs.len();
        let mut ranked: Vec<(&'static str, usize)> = verbs.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        let top_verbs = ranked
            .into_iter()
            .take(self.config.top_verbs)
            .map(|(verb, count)| VerbCount {
                verb: verb.to_string(),
                count,
                proportion: count as f64 / well_formed as f64,
            })
            .collect();

        let mut phrases: Vec<(String, usize)> = bigrams.into_iter().collect();
        phrases.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let top_bigrams = phrases
            .into_iter()
            .take(TOP_BIGRAMS)
            .map(|(bigram, count)| BigramCount { bigram, count })
            .collect();

        let length = LengthStats {
            mean_chars: mean(&chars),
            mean_words: mean(&words),
            median_chars: median(&mut chars),
            median_words: median(&mut words),
        };

        LinguisticReport {
            total_messages: records.len(),
            excluded_records,
            malformed_messages: malformed,
            messages_with_verb,
            unique_verbs,
            top_verbs,
            sentiment,
            message_types,
            length,
            top_bigrams,
        }
    }
}

impl Analyzer for LinguisticAnalyzer {
    fn name(&self) -> &'static str {
        "linguistic"
    }

    fn analyze(&self, records: &[CommitRecord]) -> MetricsBundle {
        MetricsBundle::from_report(self.name(), &self.report(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn commit(sha: &str, message: &str) -> CommitRecord {
        CommitRecord {
            sha: sha.into(),
            repository: "r".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            message: message.into(),
            files: vec![],
        }
    }

    fn report(messages: &[&str]) -> LinguisticReport {
        let records: Vec<_> = messages
            .iter()
            .enumerate()
            .map(|(i, m)| commit(&format!("c{i}"), m))
            .collect();
        LinguisticAnalyzer::new(AnalysisConfig::default()).report(&records)
    }

    struct Fixed(f64);

    impl PolarityScorer for Fixed {
        fn score(&self, _: &str) -> f64 {
            self.0
        }
    }

    #[test]
    fn leading_verb_of_simple_message() {
        let report = report(&["Fix login bug"]);
        assert_eq!(report.top_verbs.len(), 1);
        assert_eq!(report.top_verbs[0].verb, "fix");
        assert_eq!(report.top_verbs[0].proportion, 1.0);
        assert_eq!(report.malformed_messages, 0);
    }

    #[test]
    fn emoji_only_message_is_malformed() {
        let report = report(&["🎉", "Add parser"]);
        assert_eq!(report.malformed_messages, 1);
        assert_eq!(report.messages_with_verb, 1);
        assert_eq!(report.top_verbs[0].proportion, 1.0);
        assert_eq!(
            report.sentiment.positive + report.sentiment.neutral + report.sentiment.negative,
            1
        );
        assert_eq!(report.total_messages, 2);
    }

    #[test]
    fn inflections_collapse_to_base_verb() {
        let report = report(&["Fixed typo", "fixes #3", "Fixing CI", "Added tests", "refactoring"]);
        let counts: Vec<_> = report
            .top_verbs
            .iter()
            .map(|v| (v.verb.as_str(), v.count))
            .collect();
        assert_eq!(counts, [("fix", 3), ("add", 1), ("refactor", 1)]);
        assert_eq!(report.unique_verbs, 3);
    }

    #[test]
    fn stemming_rules() {
        assert_eq!(base_verb("bumps"), Some("bump"));
        assert_eq!(base_verb("renamed"), Some("rename"));
        assert_eq!(base_verb("dropped"), Some("drop"));
        assert_eq!(base_verb("simplified"), Some("simplify"));
        assert_eq!(base_verb("merging"), Some("merge"));
        assert_eq!(base_verb("s"), None);
        assert_eq!(base_verb("initial"), None);
    }

    #[test]
    fn top_verbs_respects_limit_and_breaks_ties_by_name() {
        let records: Vec<_> = ["Update a", "Add b", "Bump c", "Add d"]
            .iter()
            .enumerate()
            .map(|(i, m)| commit(&format!("c{i}"), m))
            .collect();
        let config = AnalysisConfig {
            top_verbs: 2,
            ..AnalysisConfig::default()
        };
        let report = LinguisticAnalyzer::new(config).report(&records);
        let verbs: Vec<_> = report.top_verbs.iter().map(|v| v.verb.as_str()).collect();
        assert_eq!(verbs, ["add", "bump"]);
        assert_eq!(report.unique_verbs, 3);
    }

    #[test]
    fn message_types_follow_priority() {
        let report = report(&[
            "Merge branch main",
            "Fix crash on start",
            "feat: new exporter",
            "Refactor cache",
            "Update README",
            "Add tests",
            "Bump version",
        ]);
        let expected: BTreeMap<String, usize> = [
            ("merge", 1),
            ("bugfix", 1),
            ("feature", 2),
            ("refactor", 1),
            ("documentation", 1),
            ("other", 1),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        assert_eq!(report.message_types, expected);
    }

    #[test]
    fn polarity_extremes_and_average() {
        let report = report(&["Great work", "Fix terrible crash", "Bump deps"]);
        assert_eq!(report.sentiment.positive, 1);
        assert_eq!(report.sentiment.negative, 1);
        assert_eq!(report.sentiment.neutral, 1);
        assert_eq!(report.sentiment.most_positive.as_ref().unwrap().sha, "c0");
        assert_eq!(report.sentiment.most_negative.as_ref().unwrap().sha, "c1");
    }

    #[test]
    fn custom_scorer_is_used_and_clamped() {
        let records = [commit("a", "anything")];
        let report = LinguisticAnalyzer::new(AnalysisConfig::default())
            .with_scorer(Fixed(3.0))
            .report(&records);
        assert_eq!(report.sentiment.average_polarity, 1.0);
        assert_eq!(report.sentiment.positive, 1);
    }

    #[test]
    fn lengths_and_bigrams() {
        let report = report(&[
            "Improve cache layer",
            "Improve cache layer again",
            "ok",
        ]);
        assert_eq!(report.length.median_words, 3.0);
        assert_eq!(report.length.mean_words, 8.0 / 3.0);
        assert_eq!(report.top_bigrams[0].bigram, "cache layer");
        assert_eq!(report.top_bigrams[0].count, 2);
        assert_eq!(report.top_bigrams[1].bigram, "improve cache");
    }

    #[test]
    fn excerpt_keeps_first_line() {
        assert_eq!(excerpt("Subject\n\nBody text"), "Subject");
        let long = "x".repeat(150);
        assert_eq!(excerpt(&long).chars().count(), EXCERPT_CHARS + 3);
    }

    #[test]
    fn empty_input_is_zero_valued() {
        let report = report(&[]);
        assert_eq!(report.total_messages, 0);
        assert!(report.top_verbs.is_empty());
        assert_eq!(report.length, LengthStats::default());
        assert_eq!(report.sentiment, SentimentSummary::default());
    }
}
