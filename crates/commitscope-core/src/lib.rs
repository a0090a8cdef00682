//! Core types, configuration, and error handling for commitscope.
//!
//! This crate provides the shared foundation used by the other crates:
//! - [`ScopeError`] and [`FetchError`]: error types using `thiserror`
//! - [`ScopeConfig`]: the resolved configuration of one run
//! - The data model: [`CommitRecord`], [`RepositorySnapshot`],
//!   [`RepositoryDataset`], [`MetricsBundle`], [`AnalysisDocument`]
//! - [`language`]: the static extension → language table

mod config;
mod error;
pub mod language;
mod types;

pub use config::{AnalysisConfig, CacheConfig, FetchConfig, RepoSelection, ScopeConfig};
pub use error::{FetchError, ScopeError};
pub use types::{
    sort_records, AnalysisDocument, CommitRecord, DataOrigin, FetchStatus, FileChange,
    MetricsBundle, PartialReason, RepositoryDataset, RepositoryReport, RepositorySnapshot,
    RunSummary,
};

/// A convenience `Result` type for commitscope operations.
pub type Result<T> = std::result::Result<T, ScopeError>;
