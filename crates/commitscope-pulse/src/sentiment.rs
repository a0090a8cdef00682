//! Message polarity scoring.

use serde::{Deserialize, Serialize};

/// Scores below `-THRESHOLD` are negative, above `THRESHOLD` positive.
const THRESHOLD: f64 = 0.1;

/// Maps text to a polarity score in `[-1, 1]`.
///
/// Implementations must be deterministic: the same text always yields the
/// same score.
pub trait PolarityScorer: Send + Sync {
    /// Polarity of `text`; 0 when nothing in it carries sentiment.
    fn score(&self, text: &str) -> f64;
}

/// Polarity class of a score.
///
/// # Examples
///
/// ```
/// use commitscope_pulse::sentiment::Polarity;
///
/// assert_eq!(Polarity::from_score(0.5), Polarity::Positive);
/// assert_eq!(Polarity::from_score(0.1), Polarity::Neutral);
/// assert_eq!(Polarity::from_score(-0.2), Polarity::Negative);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Score above 0.1.
    Positive,
    /// Score within ±0.1, inclusive.
    Neutral,
    /// Score below -0.1.
    Negative,
}

impl Polarity {
    /// Classify a score; the ±0.1 boundaries themselves are neutral.
    pub fn from_score(score: f64) -> Self {
        if score > THRESHOLD {
            Self::Positive
        } else if score < -THRESHOLD {
            Self::Negative
        } else {
            Self::Neutral
        }
    }
}

/// Word weights tuned for commit messages.
const LEXICON: &[(&str, f64)] = &[
    ("awesome", 0.9),
    ("better", 0.5),
    ("clean", 0.3),
    ("cleaner", 0.4),
    ("cool", 0.5),
    ("easier", 0.4),
    ("elegant", 0.7),
    ("enhance", 0.4),
    ("excellent", 0.9),
    ("fast", 0.4),
    ("faster", 0.5),
    ("finally", 0.3),
    ("good", 0.6),
    ("great", 0.8),
    ("happy", 0.7),
    ("improve", 0.5),
    ("improved", 0.5),
    ("improvement", 0.5),
    ("improves", 0.5),
    ("love", 0.8),
    ("nice", 0.6),
    ("perfect", 0.9),
    ("robust", 0.5),
    ("simpler", 0.4),
    ("simplify", 0.3),
    ("stable", 0.4),
    ("success", 0.6),
    ("working", 0.3),
    ("works", 0.3),
    ("annoying", -0.6),
    ("bad", -0.6),
    ("broke", -0.6),
    ("broken", -0.6),
    ("bug", -0.3),
    ("bugs", -0.3),
    ("crash", -0.7),
    ("crashes", -0.7),
    ("dirty", -0.4),
    ("error", -0.4),
    ("errors", -0.4),
    ("fail", -0.5),
    ("failed", -0.5),
    ("failing", -0.5),
    ("failure", -0.6),
    ("hack", -0.3),
    ("hacky", -0.5),
    ("horrible", -0.9),
    ("issue", -0.2),
    ("mess", -0.5),
    ("oops", -0.4),
    ("problem", -0.4),
    ("slow", -0.4),
    ("stupid", -0.8),
    ("terrible", -0.9),
    ("typo", -0.2),
    ("ugly", -0.6),
    ("wrong", -0.5),
    ("wtf", -0.8),
];

const NEGATIONS: &[&str] = &["no", "not", "never", "dont", "don't", "cant", "can't", "without"];

/// Lexicon scorer: mean weight of matched words, where a negation flips
/// the sign of the word that follows it. Unmatched text scores 0.
///
/// # Examples
///
/// ```
/// use commitscope_pulse::sentiment::{LexiconScorer, PolarityScorer};
///
/// let scorer = LexiconScorer;
/// assert!(scorer.score("Great improvement") > 0.1);
/// assert!(scorer.score("not good") < 0.0);
/// assert_eq!(scorer.score("Bump version"), 0.0);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct LexiconScorer;

impl LexiconScorer {
    fn weight(word: &str) -> Option<f64> {
        LEXICON
            .iter()
            .find(|(w, _)| *w == word)
            .map(|(_, weight)| *weight)
    }
}

impl PolarityScorer for LexiconScorer {
    fn score(&self, text: &str) -> f64 {
        let lowered = text.to_lowercase();
        let mut total = 0.0;
        let mut matched = 0usize;
        let mut negate = false;
        for word in lowered
            .split(|c: char| !(c.is_alphabetic() || c == '\''))
            .filter(|w| !w.is_empty())
        {
            if NEGATIONS.contains(&word) {
                negate = true;
                continue;
            }
            if let Some(weight) = Self::weight(word) {
                total += if negate { -weight } else { weight };
                matched += 1;
            }
            negate = false;
        }
        if matched == 0 {
            0.0
        } else {
            (total / matched as f64).clamp(-1.0, 1.0)
        }
    }
}
