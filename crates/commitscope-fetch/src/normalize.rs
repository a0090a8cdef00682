//! Validation of raw API JSON into [`CommitRecord`]s.
//!
//! This is the only place provider payload shapes are known. Anything
//! downstream works on typed records.

use chrono::{DateTime, Utc};
use commitscope_core::{CommitRecord, FetchError, FileChange};
use serde_json::Value;

/// Convert one commit entry (list or detail shape) into a record.
///
/// The author date is used as the timestamp, falling back to the
/// committer date. File statistics are read when present, keeping at
/// most `max_files` entries.
///
/// # Errors
///
/// Returns [`FetchError::Malformed`] when the sha, the message or a
/// parseable timestamp is missing.
///
/// # Examples
///
/// ```
/// use commitscope_fetch::normalize::commit_from_json;
///
/// let entry = serde_json::json!({
///     "sha": "6dcb09b5b57875f334f61aebed695e2e4193db5e",
///     "commit": {
///         "message": "Fix all the bugs",
///         "author": { "name": "Monalisa", "date": "2011-04-14T16:00:49Z" }
///     }
/// });
/// let record = commit_from_json("hello-world", &entry, 50).unwrap();
/// assert_eq!(record.repository, "hello-world");
/// assert_eq!(record.message, "Fix all the bugs");
/// assert!(record.files.is_empty());
/// ```
pub fn commit_from_json(
    repository: &str,
    entry: &Value,
    max_files: usize,
) -> Result<CommitRecord, FetchError> {
    let sha = entry
        .get("sha")
        .and_then(Value::as_str)
        .ok_or_else(|| FetchError::Malformed("commit entry has no sha".into()))?;

    let commit = entry
        .get("commit")
        .ok_or_else(|| FetchError::Malformed(format!("commit {sha} has no commit object")))?;

    let message = commit
        .get("message")
        .and_then(Value::as_str)
        .ok_or_else(|| FetchError::Malformed(format!("commit {sha} has no message")))?;

    let date = ["author", "committer"]
        .iter()
        .find_map(|role| commit.get(role)?.get("date")?.as_str())
        .ok_or_else(|| FetchError::Malformed(format!("commit {sha} has no date")))?;
    let timestamp = DateTime::parse_from_rfc3339(date)
        .map_err(|e| FetchError::Malformed(format!("commit {sha} has invalid date '{date}': {e}")))?
        .with_timezone(&Utc);

    let record = CommitRecord {
        sha: sha.to_string(),
        repository: repository.to_string(),
        timestamp,
        message: message.to_string(),
        files: files_from_json(entry, max_files),
    };
    record.validate()?;
    Ok(record)
}

/// Read the `files` array of a commit detail, keeping at most `limit`
/// entries. Entries without a file name are skipped.
///
/// # Examples
///
/// ```
/// use commitscope_fetch::normalize::files_from_json;
///
/// let detail = serde_json::json!({
///     "files": [
///         { "filename": "src/app.py", "additions": 10, "deletions": 2 },
///         { "filename": "logo.png", "additions": 0, "deletions": 0 }
///     ]
/// });
/// let files = files_from_json(&detail, 50);
/// assert_eq!(files.len(), 2);
/// assert_eq!(files[0].language.as_deref(), Some("Python"));
/// assert_eq!(files[1].language, None);
/// ```
pub fn files_from_json(detail: &Value, limit: usize) -> Vec<FileChange> {
    let Some(files) = detail.get("files").and_then(Value::as_array) else {
        return Vec::new();
    };
    files
        .iter()
        .filter_map(|file| {
            let path = file.get("filename")?.as_str()?;
            let additions = file.get("additions").and_then(Value::as_u64).unwrap_or(0);
            let deletions = file.get("deletions").and_then(Value::as_u64).unwrap_or(0);
            Some(FileChange::new(path, additions, deletions))
        })
        .take(limit)
        .collect()
}
