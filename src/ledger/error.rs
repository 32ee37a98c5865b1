//! Error types for ledger operations.
//!
//! Every variant is fatal for an acquisition run: without a working ledger
//! there is no dedup guarantee.

use std::fmt;

use thiserror::Error;

/// Structured classification for ledger store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerDbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Filesystem or transport IO failure.
    Io,
    /// Unclassified database failure.
    Other,
}

impl LedgerDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for LedgerDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::Io => "io",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> LedgerDbErrorKind {
    let code = database_error.code();
    if matches!(
        code.as_deref(),
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
    ) {
        return LedgerDbErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return LedgerDbErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked") || message.contains("database is busy") {
        return LedgerDbErrorKind::BusyOrLocked;
    }

    LedgerDbErrorKind::Other
}

/// Errors that can occur during ledger operations.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Store read or write failed.
    #[error(
        "ledger database error ({kind}): {message}\n  Suggestion: Check that the ledger file is writable and not held by another process"
    )]
    Database {
        /// Typed classification.
        kind: LedgerDbErrorKind,
        /// Driver error text.
        message: String,
    },

    /// A stored row could not be decoded.
    #[error(
        "ledger entry '{key}' is corrupt: {reason}\n  Suggestion: Inspect or delete the row, or restore the ledger from a backup"
    )]
    Corrupt {
        /// Cross-source key of the bad row.
        key: String,
        /// What failed to decode.
        reason: String,
    },

    /// A snapshot could not be written out.
    #[error(
        "failed to export the ledger: {reason}\n  Suggestion: Check that the export destination is writable"
    )]
    Export { reason: String },
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: LedgerDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl LedgerError {
    /// Creates a [`LedgerError::Corrupt`].
    #[must_use]
    pub fn corrupt(key: &str, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns the typed database error kind, when this is a database error.
    #[must_use]
    pub fn database_kind(&self) -> Option<LedgerDbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            Self::Corrupt { .. } | Self::Export { .. } => None,
        }
    }

    /// Returns true when this error is a database busy/locked condition.
    #[must_use]
    pub fn is_busy_or_locked(&self) -> bool {
        self.database_kind() == Some(LedgerDbErrorKind::BusyOrLocked)
    }
}
