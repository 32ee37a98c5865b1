//! Ledger entry types, state definitions and row decoding.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::LedgerError;
use crate::catalog::SourceTag;

/// Download state of a work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// Known but never successfully fetched (or demoted by `verify`).
    NotAttempted,
    /// At least one artifact is on disk.
    Downloaded,
    /// Last attempt exhausted every URL.
    Failed,
}

impl DownloadState {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAttempted => "not_attempted",
            Self::Downloaded => "downloaded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_attempted" => Ok(Self::NotAttempted),
            "downloaded" => Ok(Self::Downloaded),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid download state: {s}")),
        }
    }
}

/// Raw `ledger` row as stored.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct LedgerRow {
    pub cross_source_key: String,
    pub title: String,
    pub author: String,
    pub author_key: String,
    pub source: String,
    pub year: Option<i64>,
    pub subjects: String,
    #[sqlx(rename = "download_state")]
    pub state_str: String,
    pub local_paths: String,
    pub attempt_count: i64,
    pub last_attempt_at: Option<i64>,
    pub loan_expires_at: Option<i64>,
    pub last_error: Option<String>,
    pub content_hash: Option<String>,
    pub hashed_format: Option<String>,
    pub updated_at: String,
}

/// Persisted record for one work, keyed by its cross-source key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub cross_source_key: String,
    pub title: String,
    /// Normalized author display form.
    pub author: String,
    pub author_key: String,
    /// Catalog of the latest artifact or attempt.
    pub source: SourceTag,
    pub year: Option<i32>,
    pub subjects: Vec<String>,
    pub download_state: DownloadState,
    /// Format extension → artifact path.
    pub local_paths: BTreeMap<String, PathBuf>,
    pub attempt_count: i64,
    /// Unix seconds of the latest attempt.
    pub last_attempt_at: Option<i64>,
    /// Unix seconds when the loan ends; only set for loaned artifacts.
    pub loan_expires_at: Option<i64>,
    pub last_error: Option<String>,
    /// SHA-256 (hex) of the most recently downloaded artifact.
    pub content_hash: Option<String>,
    /// Key in `local_paths` of the file `content_hash` describes.
    pub hashed_format: Option<String>,
    pub updated_at: String,
}

impl LedgerEntry {
    /// Paths from `local_paths` that currently exist on disk.
    #[must_use]
    pub fn existing_paths(&self) -> BTreeMap<String, PathBuf> {
        self.local_paths
            .iter()
            .filter(|(_, path)| path.is_file())
            .map(|(ext, path)| (ext.clone(), path.clone()))
            .collect()
    }

    /// `Downloaded` with at least one artifact still on disk.
    #[must_use]
    pub fn is_present_on_disk(&self) -> bool {
        self.download_state == DownloadState::Downloaded
            && self.local_paths.values().any(|path| path.is_file())
    }

    /// Path of an existing artifact in `format`, if any.
    #[must_use]
    pub fn path_for(&self, format: &str) -> Option<&Path> {
        self.local_paths
            .get(format)
            .map(PathBuf::as_path)
            .filter(|path| path.is_file())
    }

    /// True while a loan is running at `now` (unix seconds).
    #[must_use]
    pub fn is_loan_active_at(&self, now: i64) -> bool {
        self.loan_expires_at.is_some_and(|expires| expires > now)
    }
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let key = row.cross_source_key;
        let source = row
            .source
            .parse::<SourceTag>()
            .map_err(|e| LedgerError::corrupt(&key, e))?;
        let download_state = row
            .state_str
            .parse::<DownloadState>()
            .map_err(|e| LedgerError::corrupt(&key, e))?;
        let local_paths: BTreeMap<String, PathBuf> = serde_json::from_str(&row.local_paths)
            .map_err(|e| LedgerError::corrupt(&key, format!("local_paths: {e}")))?;
        let subjects: Vec<String> = serde_json::from_str(&row.subjects)
            .map_err(|e| LedgerError::corrupt(&key, format!("subjects: {e}")))?;
        let year = row
            .year
            .map(i32::try_from)
            .transpose()
            .map_err(|e| LedgerError::corrupt(&key, format!("year: {e}")))?;

        Ok(Self {
            cross_source_key: key,
            title: row.title,
            author: row.author,
            author_key: row.author_key,
            source,
            year,
            subjects,
            download_state,
            local_paths,
            attempt_count: row.attempt_count,
            last_attempt_at: row.last_attempt_at,
            loan_expires_at: row.loan_expires_at,
            last_error: row.last_error,
            content_hash: row.content_hash,
            hashed_format: row.hashed_format,
            updated_at: row.updated_at,
        })
    }
}

/// Selection for [`super::Ledger::scan`]. All set fields must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerFilter {
    pub state: Option<DownloadState>,
    /// Author lookup key (lower-cased display form).
    pub author_key: Option<String>,
    pub source: Option<SourceTag>,
    /// Case-insensitive substring of any subject.
    pub subject: Option<String>,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
    /// Only entries with a loan expiry recorded.
    pub loans_only: bool,
}

impl LedgerFilter {
    /// Matches every entry.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_state(mut self, state: DownloadState) -> Self {
        self.state = Some(state);
        self
    }

    #[must_use]
    pub fn with_author_key(mut self, author_key: impl Into<String>) -> Self {
        self.author_key = Some(author_key.into());
        self
    }

    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Publication year bounds, both inclusive. Entries with no known year
    /// are kept.
    #[must_use]
    pub fn with_year_range(mut self, min_year: Option<i32>, max_year: Option<i32>) -> Self {
        self.min_year = min_year;
        self.max_year = max_year;
        self
    }

    #[must_use]
    pub fn loans_only(mut self) -> Self {
        self.loans_only = true;
        self
    }

    /// Checks the fields not pushed down into SQL.
    pub(crate) fn matches_in_memory(&self, entry: &LedgerEntry) -> bool {
        if let Some(subject) = &self.subject {
            let needle = subject.to_lowercase();
            if !entry
                .subjects
                .iter()
                .any(|s| s.to_lowercase().contains(&needle))
            {
                return false;
            }
        }
        if let Some(min) = self.min_year
            && entry.year.is_some_and(|year| year < min)
        {
            return false;
        }
        if let Some(max) = self.max_year
            && entry.year.is_some_and(|year| year > max)
        {
            return false;
        }
        true
    }
}
