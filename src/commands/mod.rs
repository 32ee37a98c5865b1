//! CLI command handlers.

mod fetch;
mod ledger;
mod search;

use std::fs;

use anyhow::{Context, Result};
use bookfetch_core::{Database, DbError, Ledger, LedgerError};
use tracing::debug;

use crate::app::settings::Settings;

pub(crate) use fetch::run_fetch_command;
pub(crate) use ledger::{
    run_duplicates_command, run_export_command, run_loans_command, run_stats_command,
    run_verify_command,
};
pub(crate) use search::run_search_command;

/// Opens (creating if needed) the ledger database named by `settings`.
pub(crate) async fn open_ledger(settings: &Settings) -> Result<Ledger> {
    if let Some(parent) = settings.database.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create ledger directory '{}'", parent.display())
        })?;
    }
    let db = Database::new(&settings.database).await.with_context(|| {
        format!(
            "Failed to open ledger database '{}'",
            settings.database.display()
        )
    })?;
    debug!(path = %settings.database.display(), "ledger opened");
    Ok(Ledger::new(db))
}

/// Prefixes errors caused by ledger lock contention with a plain explanation.
pub(crate) fn explain_ledger_contention(err: anyhow::Error) -> anyhow::Error {
    let contended = err.chain().any(|cause| {
        cause
            .downcast_ref::<LedgerError>()
            .is_some_and(LedgerError::is_busy_or_locked)
            || cause
                .downcast_ref::<DbError>()
                .is_some_and(DbError::is_busy_or_locked)
    });
    if contended {
        err.context("another bookfetch run holds the ledger; wait for it to finish and retry")
    } else {
        err
    }
}
