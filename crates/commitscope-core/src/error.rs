use chrono::{DateTime, Utc};

/// Errors that can stop a commitscope run.
///
/// Per-repository fetch problems are not represented here; they are
/// [`FetchError`]s and end up as partial-data flags on the document.
/// Library crates use this type directly; the binary converts to
/// `miette` diagnostics at the boundary.
///
/// # Examples
///
/// ```
/// use commitscope_core::ScopeError;
///
/// let err = ScopeError::Config("account must not be empty".into());
/// assert!(err.to_string().contains("account must not be empty"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Local cache database failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// HTTP client construction failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failure of a single remote request or cache read.
///
/// Never aborts a run: transient errors are retried, terminal errors
/// mark one repository as failed, malformed records and corrupt cache
/// entries are skipped.
///
/// # Examples
///
/// ```
/// use commitscope_core::FetchError;
///
/// let err = FetchError::Transient("502 Bad Gateway".into());
/// assert!(err.is_retryable());
/// assert!(!err.is_terminal());
///
/// let err = FetchError::NotFound("octocat/missing".into());
/// assert!(err.is_terminal());
/// ```
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    /// Network failure or 5xx response.
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// The provider refused the request until `reset_at`.
    #[error("rate limit exceeded until {reset_at}")]
    RateLimited {
        /// When the provider budget is replenished.
        reset_at: DateTime<Utc>,
    },

    /// Bad or missing credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Account or repository does not exist (or is not visible).
    #[error("not found: {0}")]
    NotFound(String),

    /// A response entry did not have the expected shape.
    #[error("malformed record: {0}")]
    Malformed(String),

    /// A cache entry failed its checksum or could not be decoded.
    #[error("cache corruption: {0}")]
    CacheCorruption(String),
}

impl FetchError {
    /// Returns `true` if the same request may succeed when re-sent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    /// Returns `true` if the repository should be skipped without retrying.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchError::Unauthorized(_) | FetchError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ScopeError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn config_error_displays_message() {
        let err = ScopeError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(FetchError::Transient("timeout".into()).is_retryable());
        assert!(!FetchError::Unauthorized("bad token".into()).is_retryable());
        assert!(!FetchError::Malformed("missing sha".into()).is_retryable());
        assert!(!FetchError::RateLimited {
            reset_at: Utc::now()
        }
        .is_retryable());
    }

    #[test]
    fn auth_and_not_found_are_terminal() {
        assert!(FetchError::Unauthorized("401".into()).is_terminal());
        assert!(FetchError::NotFound("404".into()).is_terminal());
        assert!(!FetchError::Transient("503".into()).is_terminal());
        assert!(!FetchError::CacheCorruption("checksum".into()).is_terminal());
    }
}
