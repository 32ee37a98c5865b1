//! Loan tracking over the ledger.
//!
//! Artifacts fetched from a lending URL carry an expiry fourteen days after
//! download. The tracker is a read-only view; it never modifies entries or
//! deletes files when a loan lapses.

use serde::Serialize;
use tracing::instrument;

use crate::download::LOAN_PERIOD_SECS;
use crate::ledger::{Ledger, LedgerEntry, LedgerError, LedgerFilter, unix_now};

/// Borrowed artifact with its remaining time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Loan {
    pub entry: LedgerEntry,
    pub expires_at: i64,
    /// Negative once the loan has lapsed.
    pub seconds_remaining: i64,
}

impl Loan {
    fn from_entry(entry: LedgerEntry, expires_at: i64, now: i64) -> Self {
        Self {
            entry,
            expires_at,
            seconds_remaining: expires_at - now,
        }
    }

    /// Whole days left, rounded down; zero or negative once lapsed.
    #[must_use]
    pub fn days_remaining(&self) -> i64 {
        self.seconds_remaining.div_euclid(24 * 60 * 60)
    }
}

/// Queries loans recorded in a [`Ledger`].
#[derive(Debug, Clone)]
pub struct LoanTracker {
    ledger: Ledger,
}

impl LoanTracker {
    #[must_use]
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// Loans with `expires_at > now`, soonest expiry first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the ledger cannot be read.
    pub async fn active_loans(&self) -> Result<Vec<Loan>, LedgerError> {
        self.active_loans_at(unix_now()).await
    }

    /// Loans with `expires_at <= now`, most recently lapsed first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the ledger cannot be read.
    pub async fn expired_loans(&self) -> Result<Vec<Loan>, LedgerError> {
        self.expired_loans_at(unix_now()).await
    }

    /// [`Self::active_loans`] evaluated at `now` (unix seconds).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the ledger cannot be read.
    #[instrument(skip(self))]
    pub async fn active_loans_at(&self, now: i64) -> Result<Vec<Loan>, LedgerError> {
        let mut loans = self.loans_at(now, |expires| expires > now).await?;
        loans.sort_by_key(|loan| loan.expires_at);
        Ok(loans)
    }

    /// [`Self::expired_loans`] evaluated at `now` (unix seconds).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the ledger cannot be read.
    #[instrument(skip(self))]
    pub async fn expired_loans_at(&self, now: i64) -> Result<Vec<Loan>, LedgerError> {
        let mut loans = self.loans_at(now, |expires| expires <= now).await?;
        loans.sort_by_key(|loan| std::cmp::Reverse(loan.expires_at));
        Ok(loans)
    }

    async fn loans_at(
        &self,
        now: i64,
        keep: impl Fn(i64) -> bool,
    ) -> Result<Vec<Loan>, LedgerError> {
        let entries = self.ledger.scan(&LedgerFilter::all().loans_only()).await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let expires_at = entry.loan_expires_at?;
                keep(expires_at).then(|| Loan::from_entry(entry, expires_at, now))
            })
            .collect())
    }
}

/// Expiry for a loan starting at `started_at`.
#[must_use]
pub fn loan_expiry(started_at: i64) -> i64 {
    started_at + LOAN_PERIOD_SECS
}
