//! Download orchestrator: concurrent, ordered-fallback acquisition of works.
//!
//! This module provides the `DownloadEngine`, which turns a batch of catalog
//! candidates into one [`AcquireOutcome`] per work. Works are fetched in
//! parallel on a semaphore-bounded pool of tokio tasks; the URLs of a single
//! work are tried strictly in order.
//!
//! # Concurrency Model
//!
//! - Candidates sharing a cross-source key are merged into one plan
//! - Each plan runs in its own tokio task once a semaphore permit is free
//! - A task holds the ledger key lock for its work from the ledger check to
//!   the final write, so concurrent batches never fetch the same work twice
//! - Setting the interrupt flag stops scheduling; running tasks finish
//! - A ledger failure stops scheduling and fails the batch once running
//!   tasks have drained
//!
//! # Example
//!
//! ```no_run
//! use bookfetch_core::download::{DownloadEngine, HttpClient};
//! use bookfetch_core::{Database, Ledger};
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! # async fn example(candidates: Vec<bookfetch_core::BookCandidate>) -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = Ledger::new(Database::new(Path::new("ledger.db")).await?);
//! let engine = DownloadEngine::new(ledger, HttpClient::new()?, "./books", 3)?;
//! let report = engine
//!     .acquire_all(candidates, Arc::new(AtomicBool::new(false)), None)
//!     .await?;
//! println!("downloaded {}, failed {}", report.stats.downloaded, report.stats.failed);
//! # Ok(())
//! # }
//! ```

mod outcome;
mod plan;
mod task;

pub use outcome::{AcquireOutcome, BatchReport, BatchStats, OutcomeKind, UrlFailure};
pub use plan::{FetchPlan, PlannedUrl, build_plans};

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use super::HttpClient;
use super::constants::{MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::catalog::BookCandidate;
use crate::convert::ConversionPipeline;
use crate::ledger::{Ledger, LedgerError};
use task::{ConversionStage, TaskContext};

/// How often a scheduler blocked on a permit re-checks the interrupt flag.
const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Error type for download engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The ledger failed; results of this batch are not trustworthy.
    #[error("ledger failure during acquisition: {0}")]
    Ledger(#[from] LedgerError),

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,

    /// An acquisition task panicked or was aborted.
    #[error("acquisition task failed: {0}")]
    TaskFailed(String),
}

/// Concurrent acquisition of works into an output directory.
#[derive(Debug)]
pub struct DownloadEngine {
    ctx: Arc<TaskContext>,
    concurrency: usize,
}

impl DownloadEngine {
    /// Creates an engine writing under `output_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `concurrency` is outside
    /// 1..=32.
    #[instrument(level = "debug", skip(ledger, client, output_dir))]
    pub fn new(
        ledger: Ledger,
        client: HttpClient,
        output_dir: impl Into<PathBuf>,
        concurrency: usize,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }
        Ok(Self {
            ctx: Arc::new(TaskContext {
                ledger,
                client,
                output_dir: output_dir.into(),
                conversion: None,
            }),
            concurrency,
        })
    }

    /// Converts every new artifact (and present artifacts lacking `target`)
    /// after download.
    #[must_use]
    pub fn with_conversion(mut self, pipeline: ConversionPipeline, target: &str) -> Self {
        let stage = ConversionStage {
            pipeline,
            target: target.trim_start_matches('.').to_ascii_lowercase(),
        };
        match Arc::get_mut(&mut self.ctx) {
            Some(ctx) => ctx.conversion = Some(stage),
            None => {
                self.ctx = Arc::new(TaskContext {
                    ledger: self.ctx.ledger.clone(),
                    client: self.ctx.client.clone(),
                    output_dir: self.ctx.output_dir.clone(),
                    conversion: Some(stage),
                });
            }
        }
        self
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ctx.ledger
    }

    /// Acquires every work in `candidates`.
    ///
    /// Each outcome is also sent on `progress` as soon as it is known.
    /// Individual URL or conversion failures never fail the batch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Ledger`] if any ledger read or write fails,
    /// after letting already-running tasks finish.
    #[instrument(skip_all, fields(candidates = candidates.len(), concurrency = self.concurrency))]
    pub async fn acquire_all(
        &self,
        candidates: Vec<BookCandidate>,
        interrupted: Arc<AtomicBool>,
        progress: Option<mpsc::Sender<AcquireOutcome>>,
    ) -> Result<BatchReport, EngineError> {
        let plans = build_plans(candidates);
        info!(works = plans.len(), "starting acquisition batch");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<(usize, Result<AcquireOutcome, LedgerError>)> = JoinSet::new();
        let mut collected: Vec<(usize, AcquireOutcome)> = Vec::with_capacity(plans.len());
        let mut failure: Option<EngineError> = None;

        let mut pending = plans.into_iter();
        while let Some(plan) = pending.next() {
            while let Some(joined) = tasks.try_join_next() {
                record_joined(joined, &mut collected, &mut failure);
            }
            if failure.is_some() {
                debug!("stopping scheduling after failure");
                break;
            }
            if interrupted.load(Ordering::SeqCst) {
                cancel(plan, &mut pending, &mut collected, progress.as_ref()).await;
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|_| EngineError::SemaphoreClosed)?
                }
                () = wait_for_interrupt(&interrupted) => {
                    cancel(plan, &mut pending, &mut collected, progress.as_ref()).await;
                    break;
                }
            };

            let ctx = Arc::clone(&self.ctx);
            let progress = progress.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = task::run_plan(&ctx, &plan).await;
                if let (Ok(outcome), Some(sender)) = (&result, &progress) {
                    let _ = sender.send(outcome.clone()).await;
                }
                (plan.index, result)
            });
        }

        debug!(running = tasks.len(), "waiting for running tasks");
        while let Some(joined) = tasks.join_next().await {
            record_joined(joined, &mut collected, &mut failure);
        }

        if let Some(error) = failure {
            error!(error = %error, "acquisition batch aborted");
            return Err(error);
        }

        collected.sort_by_key(|(index, _)| *index);
        let outcomes: Vec<AcquireOutcome> = collected.into_iter().map(|(_, o)| o).collect();
        let stats = BatchStats::from_outcomes(&outcomes);
        info!(
            downloaded = stats.downloaded,
            already_present = stats.already_present,
            failed = stats.failed,
            cancelled = stats.cancelled,
            converted = stats.converted,
            "acquisition batch complete"
        );
        Ok(BatchReport { outcomes, stats })
    }
}

fn record_joined(
    joined: Result<(usize, Result<AcquireOutcome, LedgerError>), tokio::task::JoinError>,
    collected: &mut Vec<(usize, AcquireOutcome)>,
    failure: &mut Option<EngineError>,
) {
    match joined {
        Ok((index, Ok(outcome))) => collected.push((index, outcome)),
        Ok((_, Err(ledger_error))) => {
            error!(error = %ledger_error, "ledger failure in acquisition task");
            failure.get_or_insert(EngineError::Ledger(ledger_error));
        }
        Err(join_error) => {
            error!(error = %join_error, "acquisition task panicked");
            failure.get_or_insert(EngineError::TaskFailed(join_error.to_string()));
        }
    }
}

/// Emits `Cancelled` for `first` and every plan not yet scheduled.
async fn cancel(
    first: FetchPlan,
    rest: &mut impl Iterator<Item = FetchPlan>,
    collected: &mut Vec<(usize, AcquireOutcome)>,
    progress: Option<&mpsc::Sender<AcquireOutcome>>,
) {
    let mut cancelled = 0usize;
    for plan in std::iter::once(first).chain(rest) {
        let outcome = AcquireOutcome::new(&plan, OutcomeKind::Cancelled);
        if let Some(sender) = progress {
            let _ = sender.send(outcome.clone()).await;
        }
        collected.push((plan.index, outcome));
        cancelled += 1;
    }
    warn!(cancelled, "interrupted; remaining works were not started");
}

async fn wait_for_interrupt(flag: &AtomicBool) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(INTERRUPT_POLL_INTERVAL).await;
    }
}
