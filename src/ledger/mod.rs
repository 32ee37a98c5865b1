//! Durable acquisition ledger.
//!
//! One row per work, keyed by the cross-source key, recording download
//! state, artifact paths per format and loan expiry. The ledger is the only
//! authority on what has already been acquired; every state transition is
//! a single SQL statement so a crash never leaves a half-written entry.
//!
//! # Example
//!
//! ```no_run
//! use bookfetch_core::{Database, Ledger, LedgerFilter};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = Ledger::new(Database::new(Path::new("ledger.db")).await?);
//! let report = ledger.verify().await?;
//! println!("demoted {} stale entries", report.demoted);
//! for entry in ledger.scan(&LedgerFilter::all()).await? {
//!     println!("{} - {} [{}]", entry.author, entry.title, entry.download_state);
//! }
//! # Ok(())
//! # }
//! ```

mod entry;
mod error;
mod report;

pub use entry::{DownloadState, LedgerEntry, LedgerFilter};
pub use error::{LedgerDbErrorKind, LedgerError};
pub use report::{AuthorStats, DuplicateGroup, LedgerStats, VerifyReport};

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use sqlx::{QueryBuilder, Sqlite};
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::catalog::{BookCandidate, SourceTag};
use crate::db::Database;
use entry::LedgerRow;

const HASH_CHUNK_BYTES: usize = 64 * 1024;

/// Current time as unix seconds.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Descriptive metadata written alongside every state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkInfo {
    pub cross_source_key: String,
    pub title: String,
    pub author: String,
    pub author_key: String,
    pub source: SourceTag,
    pub year: Option<i32>,
    pub subjects: Vec<String>,
}

impl From<&BookCandidate> for WorkInfo {
    fn from(candidate: &BookCandidate) -> Self {
        Self {
            cross_source_key: candidate.cross_source_key().to_string(),
            title: candidate.title().to_string(),
            author: candidate.author().display().to_string(),
            author_key: candidate.author().key().to_string(),
            source: candidate.source(),
            year: candidate.year(),
            subjects: candidate.subjects().iter().cloned().collect(),
        }
    }
}

/// A successfully written artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    /// Format extension, e.g. `epub`.
    pub format: String,
    pub path: PathBuf,
    pub content_hash: Option<String>,
    /// Set when the artifact came from a loan.
    pub loan_expires_at: Option<i64>,
}

type KeyLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Exclusive hold on one ledger key, from [`Ledger::key_guard`].
///
/// Dropping it releases the key and forgets the lock once no other task
/// holds or awaits it.
#[derive(Debug)]
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: KeyLocks,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own Arc; a count of one is the map's.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Handle to the ledger table. Cheap to clone; clones share key locks.
#[derive(Debug, Clone)]
pub struct Ledger {
    db: Database,
    key_locks: KeyLocks,
}

impl Ledger {
    /// Creates a ledger backed by `db` (migrations already applied).
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            key_locks: Arc::new(DashMap::new()),
        }
    }

    /// Underlying database.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Serializes work on one key across tasks sharing this ledger.
    ///
    /// Hold the guard for the whole read-decide-write sequence on `key`.
    /// Guards for different keys never contend.
    pub async fn key_guard(&self, key: &str) -> KeyGuard {
        let lock = self
            .key_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        KeyGuard {
            guard: Some(lock.lock_owned().await),
            key: key.to_string(),
            locks: Arc::clone(&self.key_locks),
        }
    }

    #[cfg(test)]
    fn tracked_key_locks(&self) -> usize {
        self.key_locks.len()
    }

    /// Reads one entry.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the store fails or the row is corrupt.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let row: Option<LedgerRow> =
            sqlx::query_as::<_, LedgerRow>("SELECT * FROM ledger WHERE cross_source_key = ?")
                .bind(key)
                .fetch_optional(self.db.pool())
                .await?;
        row.map(LedgerEntry::try_from).transpose()
    }

    /// Writes `entry` as-is, replacing any existing row with the same key.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the store fails.
    #[instrument(skip(self, entry), fields(key = %entry.cross_source_key))]
    pub async fn upsert(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        sqlx::query(
            r"INSERT INTO ledger (
                cross_source_key, title, author, author_key, source, year, subjects,
                download_state, local_paths, attempt_count, last_attempt_at,
                loan_expires_at, last_error, content_hash, hashed_format
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(cross_source_key) DO UPDATE SET
                title = excluded.title,
                author = excluded.author,
                author_key = excluded.author_key,
                source = excluded.source,
                year = excluded.year,
                subjects = excluded.subjects,
                download_state = excluded.download_state,
                local_paths = excluded.local_paths,
                attempt_count = excluded.attempt_count,
                last_attempt_at = excluded.last_attempt_at,
                loan_expires_at = excluded.loan_expires_at,
                last_error = excluded.last_error,
                content_hash = excluded.content_hash,
                hashed_format = excluded.hashed_format,
                updated_at = datetime('now')",
        )
        .bind(&entry.cross_source_key)
        .bind(&entry.title)
        .bind(&entry.author)
        .bind(&entry.author_key)
        .bind(entry.source.as_str())
        .bind(entry.year)
        .bind(json_text(&entry.subjects))
        .bind(entry.download_state.as_str())
        .bind(json_text(&path_map_strings(&entry.local_paths)))
        .bind(entry.attempt_count)
        .bind(entry.last_attempt_at)
        .bind(entry.loan_expires_at)
        .bind(&entry.last_error)
        .bind(&entry.content_hash)
        .bind(&entry.hashed_format)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Records a successful download: adds `local_paths[format]`, marks the
    /// entry `Downloaded`, bumps the attempt count and sets the loan expiry
    /// when the artifact is a loan. Creates the entry on first attempt.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the store fails.
    #[instrument(skip(self, work, artifact), fields(key = %work.cross_source_key, format = %artifact.format))]
    pub async fn record_download(
        &self,
        work: &WorkInfo,
        artifact: &ArtifactRecord,
        now: i64,
    ) -> Result<LedgerEntry, LedgerError> {
        let format = format_key(&artifact.format);
        let path = artifact.path.to_string_lossy().into_owned();
        let row = sqlx::query_as::<_, LedgerRow>(
            r"INSERT INTO ledger (
                cross_source_key, title, author, author_key, source, year, subjects,
                download_state, local_paths, attempt_count, last_attempt_at,
                loan_expires_at, last_error, content_hash, hashed_format
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 'downloaded', json_object(?, ?), 1, ?, ?, NULL, ?, ?)
            ON CONFLICT(cross_source_key) DO UPDATE SET
                title = excluded.title,
                author = excluded.author,
                author_key = excluded.author_key,
                source = excluded.source,
                year = COALESCE(excluded.year, ledger.year),
                subjects = CASE WHEN excluded.subjects = '[]' THEN ledger.subjects ELSE excluded.subjects END,
                download_state = 'downloaded',
                local_paths = json_set(ledger.local_paths, ?, ?),
                attempt_count = ledger.attempt_count + 1,
                last_attempt_at = excluded.last_attempt_at,
                loan_expires_at = COALESCE(excluded.loan_expires_at, ledger.loan_expires_at),
                last_error = NULL,
                content_hash = COALESCE(excluded.content_hash, ledger.content_hash),
                hashed_format = CASE WHEN excluded.content_hash IS NULL
                    THEN ledger.hashed_format ELSE excluded.hashed_format END,
                updated_at = datetime('now')
            RETURNING *",
        )
        .bind(&work.cross_source_key)
        .bind(&work.title)
        .bind(&work.author)
        .bind(&work.author_key)
        .bind(work.source.as_str())
        .bind(work.year)
        .bind(json_text(&work.subjects))
        .bind(&format)
        .bind(&path)
        .bind(now)
        .bind(artifact.loan_expires_at)
        .bind(&artifact.content_hash)
        .bind(artifact.content_hash.as_ref().map(|_| format.as_str()))
        .bind(json_path(&format))
        .bind(&path)
        .fetch_one(self.db.pool())
        .await?;

        debug!(path = %path, "ledger recorded download");
        LedgerEntry::try_from(row)
    }

    /// Records that every URL failed: marks the entry `Failed`, bumps the
    /// attempt count and stores `reason`. Existing paths are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the store fails.
    #[instrument(skip(self, work, reason), fields(key = %work.cross_source_key))]
    pub async fn record_failure(
        &self,
        work: &WorkInfo,
        reason: &str,
        now: i64,
    ) -> Result<LedgerEntry, LedgerError> {
        let row = sqlx::query_as::<_, LedgerRow>(
            r"INSERT INTO ledger (
                cross_source_key, title, author, author_key, source, year, subjects,
                download_state, attempt_count, last_attempt_at, last_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 'failed', 1, ?, ?)
            ON CONFLICT(cross_source_key) DO UPDATE SET
                download_state = 'failed',
                attempt_count = ledger.attempt_count + 1,
                last_attempt_at = excluded.last_attempt_at,
                last_error = excluded.last_error,
                year = COALESCE(ledger.year, excluded.year),
                updated_at = datetime('now')
            RETURNING *",
        )
        .bind(&work.cross_source_key)
        .bind(&work.title)
        .bind(&work.author)
        .bind(&work.author_key)
        .bind(work.source.as_str())
        .bind(work.year)
        .bind(json_text(&work.subjects))
        .bind(now)
        .bind(reason)
        .fetch_one(self.db.pool())
        .await?;

        LedgerEntry::try_from(row)
    }

    /// Adds a converted artifact to an existing entry's `local_paths`.
    ///
    /// Returns `None` if no entry exists for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the store fails.
    #[instrument(skip(self, path))]
    pub async fn record_conversion(
        &self,
        key: &str,
        format: &str,
        path: &Path,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let format = format_key(format);
        let row = sqlx::query_as::<_, LedgerRow>(
            "UPDATE ledger SET local_paths = json_set(local_paths, ?, ?), updated_at = datetime('now') \
             WHERE cross_source_key = ? RETURNING *",
        )
        .bind(json_path(&format))
        .bind(path.to_string_lossy().into_owned())
        .bind(key)
        .fetch_optional(self.db.pool())
        .await?;
        row.map(LedgerEntry::try_from).transpose()
    }

    /// Entries matching `filter`, ordered by author then title.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the store fails or a row is corrupt.
    #[instrument(skip(self))]
    pub async fn scan(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM ledger WHERE 1 = 1");
        if let Some(state) = filter.state {
            query.push(" AND download_state = ").push_bind(state.as_str());
        }
        if let Some(author_key) = &filter.author_key {
            query
                .push(" AND author_key = ")
                .push_bind(author_key.to_lowercase());
        }
        if let Some(source) = filter.source {
            query.push(" AND source = ").push_bind(source.as_str());
        }
        if filter.loans_only {
            query.push(" AND loan_expires_at IS NOT NULL");
        }
        query.push(" ORDER BY author_key, title, cross_source_key");

        let rows: Vec<LedgerRow> = query
            .build_query_as::<LedgerRow>()
            .fetch_all(self.db.pool())
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let entry = LedgerEntry::try_from(row)?;
            if filter.matches_in_memory(&entry) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Re-checks every `Downloaded` entry against the filesystem.
    ///
    /// Missing paths are dropped from `local_paths`. The hashed artifact is
    /// re-hashed and dropped too when its content changed. An entry left
    /// with no paths reverts to `NotAttempted`. Each entry is re-read and
    /// rewritten under its key lock, so this can run alongside acquisitions.
    /// Running it twice in a row changes nothing the second time.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the store fails or a row is corrupt.
    #[instrument(skip(self))]
    pub async fn verify(&self) -> Result<VerifyReport, LedgerError> {
        self.reconcile(true).await
    }

    /// [`Ledger::verify`] without re-hashing: only presence on disk is
    /// checked. Cheap enough to run before every acquisition batch.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the store fails or a row is corrupt.
    #[instrument(skip(self))]
    pub async fn verify_presence(&self) -> Result<VerifyReport, LedgerError> {
        self.reconcile(false).await
    }

    async fn reconcile(&self, check_content: bool) -> Result<VerifyReport, LedgerError> {
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT cross_source_key FROM ledger WHERE download_state = 'downloaded'",
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut report = VerifyReport::default();
        for key in keys {
            let _guard = self.key_guard(&key).await;
            let Some(entry) = self.get(&key).await? else {
                continue;
            };
            if entry.download_state != DownloadState::Downloaded {
                continue;
            }
            report.checked += 1;

            let mut existing = entry.existing_paths();
            let corrupt_format = if check_content {
                corrupted_artifact(&entry, &existing).await
            } else {
                None
            };
            if let Some(format) = &corrupt_format
                && let Some(path) = existing.remove(format)
            {
                warn!(key = %key, path = %path.display(), "artifact content does not match its hash");
                report.corrupted.push(path);
            }
            if !existing.is_empty() && existing.len() == entry.local_paths.len() {
                continue;
            }
            for (format, path) in &entry.local_paths {
                if !existing.contains_key(format) && corrupt_format.as_ref() != Some(format) {
                    warn!(key = %key, path = %path.display(), "artifact missing on disk");
                    report.missing_paths.push(path.clone());
                }
            }

            let state = if existing.is_empty() {
                report.demoted += 1;
                DownloadState::NotAttempted
            } else {
                report.repaired += 1;
                DownloadState::Downloaded
            };
            let hash_dropped = entry
                .hashed_format
                .as_ref()
                .is_some_and(|format| !existing.contains_key(format));
            sqlx::query(
                "UPDATE ledger SET local_paths = ?, download_state = ?, \
                 content_hash = CASE WHEN ? THEN NULL ELSE content_hash END, \
                 hashed_format = CASE WHEN ? THEN NULL ELSE hashed_format END, \
                 updated_at = datetime('now') WHERE cross_source_key = ?",
            )
            .bind(json_text(&path_map_strings(&existing)))
            .bind(state.as_str())
            .bind(hash_dropped)
            .bind(hash_dropped)
            .bind(&key)
            .execute(self.db.pool())
            .await?;
        }

        info!(
            checked = report.checked,
            repaired = report.repaired,
            demoted = report.demoted,
            corrupted = report.corrupted.len(),
            "ledger verification finished"
        );
        Ok(report)
    }

    /// Deletes `NotAttempted` entries that no longer reference any file.
    ///
    /// Never called implicitly; this is the explicit cleanup step after
    /// [`Ledger::verify`].
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the store fails.
    #[instrument(skip(self))]
    pub async fn prune(&self) -> Result<u64, LedgerError> {
        let result = sqlx::query(
            "DELETE FROM ledger WHERE download_state = 'not_attempted' AND local_paths = '{}'",
        )
        .execute(self.db.pool())
        .await?;
        let removed = result.rows_affected();
        info!(removed, "pruned ledger entries without artifacts");
        Ok(removed)
    }

    /// Aggregate counts by state, author and format.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the store fails or a row is corrupt.
    pub async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let entries = self.scan(&LedgerFilter::all()).await?;
        Ok(LedgerStats::from_entries(&entries, unix_now()))
    }

    /// Writes the entries matching `filter` to `writer` as a pretty JSON array.
    ///
    /// Returns the number of entries written.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Export`] if serialization or the write fails.
    pub async fn export_json<W: Write>(
        &self,
        filter: &LedgerFilter,
        mut writer: W,
    ) -> Result<usize, LedgerError> {
        let entries = self.scan(filter).await?;
        let export_error = |reason: String| LedgerError::Export { reason };
        serde_json::to_writer_pretty(&mut writer, &entries)
            .map_err(|e| export_error(e.to_string()))?;
        writeln!(writer)
            .and_then(|()| writer.flush())
            .map_err(|e| export_error(e.to_string()))?;
        debug!(entries = entries.len(), "ledger exported");
        Ok(entries.len())
    }

    /// Groups of entries whose latest artifacts have identical content.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the store fails or a row is corrupt.
    #[instrument(skip(self))]
    pub async fn duplicates(&self) -> Result<Vec<DuplicateGroup>, LedgerError> {
        let rows: Vec<LedgerRow> = sqlx::query_as::<_, LedgerRow>(
            r"SELECT * FROM ledger WHERE content_hash IN (
                SELECT content_hash FROM ledger
                WHERE content_hash IS NOT NULL
                GROUP BY content_hash HAVING COUNT(*) > 1
            ) ORDER BY content_hash, cross_source_key",
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut groups: Vec<DuplicateGroup> = Vec::new();
        for row in rows {
            let entry = LedgerEntry::try_from(row)?;
            let hash = entry.content_hash.clone().unwrap_or_default();
            match groups.last_mut() {
                Some(group) if group.content_hash == hash => group.entries.push(entry),
                _ => groups.push(DuplicateGroup {
                    content_hash: hash,
                    entries: vec![entry],
                }),
            }
        }
        Ok(groups)
    }
}

/// Format of the hashed artifact when it exists but no longer matches
/// `content_hash`. Files that cannot be read are kept.
async fn corrupted_artifact(
    entry: &LedgerEntry,
    existing: &BTreeMap<String, PathBuf>,
) -> Option<String> {
    let expected = entry.content_hash.as_deref()?;
    let format = entry.hashed_format.as_ref()?;
    let path = existing.get(format)?;
    match file_sha256(path).await {
        Ok(actual) if actual == expected => None,
        Ok(_) => Some(format.clone()),
        Err(error) => {
            warn!(path = %path.display(), %error, "could not re-hash artifact");
            None
        }
    }
}

async fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_BYTES];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Lower-case alphanumeric format key, safe inside a JSON path.
fn format_key(format: &str) -> String {
    let key: String = format
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase();
    if key.is_empty() { "bin".to_string() } else { key }
}

fn json_path(format: &str) -> String {
    format!("$.\"{format}\"")
}

fn path_map_strings(paths: &BTreeMap<String, PathBuf>) -> BTreeMap<&str, String> {
    paths
        .iter()
        .map(|(format, path)| (format.as_str(), path.to_string_lossy().into_owned()))
        .collect()
}

/// Serializes plain data (string maps and lists) that cannot fail to encode.
fn json_text<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}
