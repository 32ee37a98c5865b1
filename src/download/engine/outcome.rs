//! Per-work outcomes and batch statistics.

use std::path::PathBuf;

use crate::catalog::SourceTag;
use crate::convert::{ConversionError, ConversionOutcome};
use crate::download::FetchError;

use super::plan::FetchPlan;

/// Final classification of one work in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// A new artifact was written.
    Downloaded,
    /// The ledger already had an artifact on disk; nothing was fetched.
    AlreadyPresent,
    /// Every candidate URL failed.
    AllUrlsFailed,
    /// The batch was interrupted before this work started.
    Cancelled,
}

impl OutcomeKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloaded => "downloaded",
            Self::AlreadyPresent => "already_present",
            Self::AllUrlsFailed => "all_urls_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed URL, in the order it was tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlFailure {
    pub url: String,
    pub source: SourceTag,
    pub error: FetchError,
}

/// What happened to one work.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquireOutcome {
    pub cross_source_key: String,
    pub title: String,
    pub author: String,
    pub kind: OutcomeKind,
    /// Artifact written (`Downloaded`) or found (`AlreadyPresent`).
    pub artifact: Option<PathBuf>,
    pub source: Option<SourceTag>,
    /// Set when the artifact is a loan.
    pub loan_expires_at: Option<i64>,
    /// URLs that failed before the outcome was decided.
    pub failures: Vec<UrlFailure>,
    /// Present when a conversion was attempted or skipped.
    pub conversion: Option<Result<ConversionOutcome, ConversionError>>,
}

impl AcquireOutcome {
    pub(super) fn new(plan: &FetchPlan, kind: OutcomeKind) -> Self {
        Self {
            cross_source_key: plan.work.cross_source_key.clone(),
            title: plan.work.title.clone(),
            author: plan.work.author.clone(),
            kind,
            artifact: None,
            source: None,
            loan_expires_at: None,
            failures: Vec::new(),
            conversion: None,
        }
    }

    /// Final artifact path after conversion, or the fetched artifact.
    #[must_use]
    pub fn final_path(&self) -> Option<&std::path::Path> {
        self.conversion
            .as_ref()
            .and_then(|result| result.as_ref().ok())
            .and_then(ConversionOutcome::output)
            .or(self.artifact.as_deref())
    }

    /// First line of each URL failure, joined with `; `. Used for the
    /// ledger's `last_error` and the fetch summary.
    #[must_use]
    pub fn failure_summary(&self) -> String {
        if self.failures.is_empty() {
            return "no candidate URLs".to_string();
        }
        self.failures
            .iter()
            .map(|failure| {
                failure
                    .error
                    .to_string()
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// True when a conversion was attempted and failed.
    #[must_use]
    pub fn conversion_failed(&self) -> bool {
        matches!(self.conversion, Some(Err(_)))
    }
}

/// Counts per outcome kind for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub downloaded: usize,
    pub already_present: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// New or reused conversions.
    pub converted: usize,
    pub conversion_failed: usize,
}

impl BatchStats {
    #[must_use]
    pub fn from_outcomes(outcomes: &[AcquireOutcome]) -> Self {
        let mut stats = Self::default();
        for outcome in outcomes {
            match outcome.kind {
                OutcomeKind::Downloaded => stats.downloaded += 1,
                OutcomeKind::AlreadyPresent => stats.already_present += 1,
                OutcomeKind::AllUrlsFailed => stats.failed += 1,
                OutcomeKind::Cancelled => stats.cancelled += 1,
            }
            match &outcome.conversion {
                Some(Ok(ConversionOutcome::Converted { .. } | ConversionOutcome::Reused { .. })) => {
                    stats.converted += 1;
                }
                Some(Err(_)) => stats.conversion_failed += 1,
                Some(Ok(ConversionOutcome::Skipped { .. })) | None => {}
            }
        }
        stats
    }

    /// Number of works in the batch.
    #[must_use]
    pub fn total(&self) -> usize {
        self.downloaded + self.already_present + self.failed + self.cancelled
    }
}

/// Everything [`super::DownloadEngine::acquire_all`] produced.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// One outcome per work, in first-seen order.
    pub outcomes: Vec<AcquireOutcome>,
    pub stats: BatchStats,
}
