//! Summaries computed over ledger entries.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use super::{DownloadState, LedgerEntry};

/// Result of [`super::Ledger::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// `Downloaded` entries examined.
    pub checked: usize,
    /// Entries that lost some paths but kept at least one.
    pub repaired: usize,
    /// Entries reverted to `NotAttempted`.
    pub demoted: usize,
    pub missing_paths: Vec<PathBuf>,
    /// Files whose content no longer matches the recorded hash.
    pub corrupted: Vec<PathBuf>,
}

/// Per-author counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthorStats {
    pub total: usize,
    pub downloaded: usize,
    pub failed: usize,
}

/// Aggregate view of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub total: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub not_attempted: usize,
    pub active_loans: usize,
    pub expired_loans: usize,
    /// Keyed by author display form.
    pub by_author: BTreeMap<String, AuthorStats>,
    /// Recorded artifacts per format extension.
    pub by_format: BTreeMap<String, usize>,
}

impl LedgerStats {
    /// Tallies `entries`, classifying loans against `now` (unix seconds).
    #[must_use]
    pub fn from_entries(entries: &[LedgerEntry], now: i64) -> Self {
        let mut stats = Self {
            total: entries.len(),
            ..Self::default()
        };
        for entry in entries {
            let author = stats.by_author.entry(entry.author.clone()).or_default();
            author.total += 1;
            match entry.download_state {
                DownloadState::Downloaded => {
                    stats.downloaded += 1;
                    author.downloaded += 1;
                }
                DownloadState::Failed => {
                    stats.failed += 1;
                    author.failed += 1;
                }
                DownloadState::NotAttempted => stats.not_attempted += 1,
            }
            for format in entry.local_paths.keys() {
                *stats.by_format.entry(format.clone()).or_default() += 1;
            }
            if entry.loan_expires_at.is_some() {
                if entry.is_loan_active_at(now) {
                    stats.active_loans += 1;
                } else {
                    stats.expired_loans += 1;
                }
            }
        }
        stats
    }
}

/// Entries whose artifacts hashed identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub content_hash: String,
    pub entries: Vec<LedgerEntry>,
}
