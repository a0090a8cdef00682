//! SQLite cache of fetched repositories.
//!
//! One row per `(account, repository, scope)` holding the snapshot and
//! records as JSON, a SHA-256 checksum of that JSON, the creation time
//! and the time-to-live. Stale and corrupt rows are evicted on read and
//! never served.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use commitscope_core::{CommitRecord, FetchConfig, FetchError, RepositorySnapshot, ScopeError};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Identifies one cached repository fetch.
///
/// `scope` encodes the fetch parameters that change the payload, so a
/// run with different limits never reads another run's entry.
///
/// # Examples
///
/// ```
/// use commitscope_core::FetchConfig;
/// use commitscope_fetch::cache::CacheKey;
///
/// let key = CacheKey::new("octocat", "hello-world", CacheKey::scope_for(&FetchConfig::default()));
/// assert_eq!(key.scope, "commits:max=1000:files=50");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Account login.
    pub account: String,
    /// Repository name.
    pub repository: String,
    /// Fetch parameters the payload depends on.
    pub scope: String,
}

impl CacheKey {
    /// Create a key.
    pub fn new(
        account: impl Into<String>,
        repository: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            repository: repository.into(),
            scope: scope.into(),
        }
    }

    /// Scope string for the given fetch settings.
    pub fn scope_for(config: &FetchConfig) -> String {
        let files = if config.fetch_file_stats {
            config.max_files_per_commit
        } else {
            0
        };
        format!("commits:max={}:files={files}", config.max_commits_per_repo)
    }
}

/// A fresh cache row.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Snapshot stored with the records.
    pub snapshot: RepositorySnapshot,
    /// Records in the order they were stored.
    pub records: Vec<CommitRecord>,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
    /// Lifetime from `created_at`.
    pub ttl: Duration,
}

/// Why a lookup did not produce an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// No row for the key.
    Absent,
    /// The row was at least `ttl` old and has been evicted.
    Stale,
    /// The row failed its checksum or could not be decoded and has been
    /// evicted.
    Corrupt,
}

/// Result of [`CacheStore::get`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// A fresh, intact entry.
    Hit(CacheEntry),
    /// Nothing usable.
    Miss(MissReason),
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    snapshot: &'a RepositorySnapshot,
    records: &'a [CommitRecord],
}

#[derive(Deserialize)]
struct Payload {
    snapshot: RepositorySnapshot,
    records: Vec<CommitRecord>,
}

/// The cache database.
///
/// Shared between fetch workers as `Arc<CacheStore>`; statements run
/// under an internal lock and each write is one transaction.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use chrono::Utc;
/// use commitscope_core::RepositorySnapshot;
/// use commitscope_fetch::cache::{CacheKey, CacheLookup, CacheStore, MissReason};
///
/// let store = CacheStore::in_memory().unwrap();
/// let key = CacheKey::new("octocat", "hello-world", "commits");
/// assert_eq!(store.get(&key).unwrap(), CacheLookup::Miss(MissReason::Absent));
///
/// let snapshot = RepositorySnapshot::new("hello-world", "main", Utc::now());
/// store.put(&key, &snapshot, &[], Duration::from_secs(60)).unwrap();
/// assert!(matches!(store.get(&key).unwrap(), CacheLookup::Hit(_)));
/// ```
#[derive(Debug)]
pub struct CacheStore {
    conn: Mutex<Connection>,
}

impl CacheStore {
    /// Open or create the cache database at `path`, creating parent
    /// directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Cache`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, ScopeError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ScopeError::Cache(format!("failed to create cache directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| ScopeError::Cache(format!("failed to open cache database: {e}")))?;
        Self::with_connection(conn)
    }

    /// Create a throwaway in-memory cache.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Cache`] if schema creation fails.
    pub fn in_memory() -> Result<Self, ScopeError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            ScopeError::Cache(format!("failed to create in-memory cache: {e}"))
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, ScopeError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS entries (
                account TEXT NOT NULL,
                repository TEXT NOT NULL,
                scope TEXT NOT NULL,
                payload TEXT NOT NULL,
                checksum TEXT NOT NULL,
                created_at TEXT NOT NULL,
                ttl_secs INTEGER NOT NULL,
                PRIMARY KEY (account, repository, scope)
            );
            ",
        )
        .map_err(|e| ScopeError::Cache(format!("failed to create cache schema: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ScopeError> {
        self.conn
            .lock()
            .map_err(|_| ScopeError::Cache("cache connection lock poisoned".into()))
    }

    /// Look up `key` as of now.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Cache`] on database failure. Corrupt rows are
    /// not errors; they are evicted and reported as a miss.
    pub fn get(&self, key: &CacheKey) -> Result<CacheLookup, ScopeError> {
        self.get_at(key, Utc::now())
    }

    /// Look up `key` as of `now`. An entry is stale once
    /// `now - created_at >= ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Cache`] on database failure.
    pub fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<CacheLookup, ScopeError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT payload, checksum, created_at, ttl_secs FROM entries
                 WHERE account = ?1 AND repository = ?2 AND scope = ?3",
                params![key.account, key.repository, key.scope],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| ScopeError::Cache(format!("failed to read cache entry: {e}")))?;

        let Some((payload, checksum, created_at, ttl_secs)) = row else {
            return Ok(CacheLookup::Miss(MissReason::Absent));
        };

        let decoded = decode_row(&payload, &checksum, &created_at, ttl_secs);
        let (entry, reason) = match decoded {
            Ok(entry) if now - entry.created_at >= age_limit(entry.ttl) => {
                (None, MissReason::Stale)
            }
            Ok(entry) => (Some(entry), MissReason::Absent),
            Err(err) => {
                warn!(
                    account = %key.account,
                    repository = %key.repository,
                    error = %err,
                    "evicting corrupt cache entry"
                );
                (None, MissReason::Corrupt)
            }
        };

        match entry {
            Some(entry) => {
                debug!(repository = %key.repository, records = entry.records.len(), "cache hit");
                Ok(CacheLookup::Hit(entry))
            }
            None => {
                if reason == MissReason::Stale {
                    debug!(repository = %key.repository, "evicting stale cache entry");
                }
                delete(&conn, key)?;
                Ok(CacheLookup::Miss(reason))
            }
        }
    }

    /// Store `snapshot` and `records` under `key`, created now.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Cache`] on database failure, or
    /// [`ScopeError::Serialization`] if the payload cannot be encoded.
    pub fn put(
        &self,
        key: &CacheKey,
        snapshot: &RepositorySnapshot,
        records: &[CommitRecord],
        ttl: Duration,
    ) -> Result<(), ScopeError> {
        self.put_at(key, snapshot, records, ttl, Utc::now())
    }

    /// Store an entry with an explicit creation time. Replaces any
    /// existing row for `key` in a single transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Cache`] on database failure, or
    /// [`ScopeError::Serialization`] if the payload cannot be encoded.
    pub fn put_at(
        &self,
        key: &CacheKey,
        snapshot: &RepositorySnapshot,
        records: &[CommitRecord],
        ttl: Duration,
        created_at: DateTime<Utc>,
    ) -> Result<(), ScopeError> {
        let payload = serde_json::to_string(&PayloadRef { snapshot, records })?;
        let checksum = compute_checksum(&payload);
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| ScopeError::Cache(format!("failed to begin cache write: {e}")))?;
        tx.execute(
            "INSERT OR REPLACE INTO entries
             (account, repository, scope, payload, checksum, created_at, ttl_secs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                key.account,
                key.repository,
                key.scope,
                payload,
                checksum,
                created_at.to_rfc3339(),
                ttl_secs,
            ],
        )
        .map_err(|e| ScopeError::Cache(format!("failed to write cache entry: {e}")))?;
        tx.commit()
            .map_err(|e| ScopeError::Cache(format!("failed to commit cache entry: {e}")))?;

        debug!(repository = %key.repository, records = records.len(), "cache entry written");
        Ok(())
    }

    /// Remove the entry for `key`. Returns `true` if one existed.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Cache`] on database failure.
    pub fn invalidate(&self, key: &CacheKey) -> Result<bool, ScopeError> {
        let conn = self.lock()?;
        delete(&conn, key)
    }
}

fn delete(conn: &Connection, key: &CacheKey) -> Result<bool, ScopeError> {
    let removed = conn
        .execute(
            "DELETE FROM entries WHERE account = ?1 AND repository = ?2 AND scope = ?3",
            params![key.account, key.repository, key.scope],
        )
        .map_err(|e| ScopeError::Cache(format!("failed to delete cache entry: {e}")))?;
    Ok(removed > 0)
}

fn decode_row(
    payload: &str,
    checksum: &str,
    created_at: &str,
    ttl_secs: i64,
) -> Result<CacheEntry, FetchError> {
    if compute_checksum(payload) != checksum {
        return Err(FetchError::CacheCorruption("checksum mismatch".into()));
    }
    let created_at = DateTime::parse_from_rfc3339(created_at)
        .map_err(|e| FetchError::CacheCorruption(format!("invalid created_at: {e}")))?
        .with_timezone(&Utc);
    let ttl = u64::try_from(ttl_secs)
        .map(Duration::from_secs)
        .map_err(|_| FetchError::CacheCorruption(format!("negative ttl {ttl_secs}")))?;
    let Payload { snapshot, records } = serde_json::from_str(payload)
        .map_err(|e| FetchError::CacheCorruption(format!("undecodable payload: {e}")))?;

    Ok(CacheEntry {
        snapshot,
        records,
        created_at,
        ttl,
    })
}

fn age_limit(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX)
}

fn compute_checksum(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}
