//! Commit history analytics for commitscope.
//!
//! Every analyzer is a pure function of the merged, sorted commit set:
//! - [`temporal`]: hour and weekday rhythm, streaks, night-owl detection
//! - [`linguistic`]: leading verbs, polarity, message types and phrases
//! - [`language`]: language totals, monthly evolution and diversity
//! - [`productivity`]: consistency, devotion and velocity
//! - [`aggregate`]: merges datasets and builds the
//!   [`AnalysisDocument`](commitscope_core::AnalysisDocument)

pub mod aggregate;
pub mod analyzer;
pub mod language;
pub mod linguistic;
pub mod productivity;
pub mod sentiment;
pub mod temporal;

pub use aggregate::Aggregator;
pub use analyzer::Analyzer;
pub use language::LanguageAnalyzer;
pub use linguistic::LinguisticAnalyzer;
pub use productivity::ProductivityAnalyzer;
pub use sentiment::{LexiconScorer, Polarity, PolarityScorer};
pub use temporal::TemporalAnalyzer;
