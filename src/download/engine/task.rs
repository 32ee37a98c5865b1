//! Execution of one fetch plan: ledger check, URL fallback, ledger write,
//! optional conversion.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use super::outcome::{AcquireOutcome, OutcomeKind, UrlFailure};
use super::plan::FetchPlan;
use crate::convert::{ConversionOutcome, ConversionPipeline};
use crate::download::HttpClient;
use crate::download::filename::{artifact_stem, author_folder};
use crate::ledger::{ArtifactRecord, Ledger, LedgerEntry, LedgerError, unix_now};
use crate::loans::loan_expiry;

/// Conversion settings attached to an engine.
#[derive(Debug, Clone)]
pub(super) struct ConversionStage {
    pub pipeline: ConversionPipeline,
    pub target: String,
}

/// Shared, read-only state for every task of a batch.
#[derive(Debug)]
pub(super) struct TaskContext {
    pub ledger: Ledger,
    pub client: HttpClient,
    pub output_dir: PathBuf,
    pub conversion: Option<ConversionStage>,
}

/// Acquires one work while holding its ledger key lock.
///
/// Only ledger failures are returned as errors; everything else becomes
/// part of the outcome.
#[instrument(skip(ctx, plan), fields(key = %plan.key(), urls = plan.urls.len()))]
pub(super) async fn run_plan(
    ctx: &TaskContext,
    plan: &FetchPlan,
) -> Result<AcquireOutcome, LedgerError> {
    let _guard = ctx.ledger.key_guard(plan.key()).await;

    if let Some(entry) = ctx.ledger.get(plan.key()).await?
        && entry.is_present_on_disk()
    {
        debug!("already present, skipping network");
        return already_present(ctx, plan, &entry).await;
    }

    let folder = author_folder(&ctx.output_dir, &plan.author);
    let stem = artifact_stem(&plan.author, &plan.work.title, plan.key());
    let mut outcome = AcquireOutcome::new(plan, OutcomeKind::AllUrlsFailed);

    for (position, planned) in plan.urls.iter().enumerate() {
        debug!(url = %planned.url, position, loan = planned.loan, "trying URL");
        match ctx.client.fetch_artifact(&planned.url, &folder, &stem).await {
            Ok(artifact) => {
                let now = unix_now();
                let loan_expires_at = planned.loan.then(|| loan_expiry(now));
                let mut work = plan.work.clone();
                work.source = planned.source;
                let record = ArtifactRecord {
                    format: artifact.format.clone(),
                    path: artifact.path.clone(),
                    content_hash: Some(artifact.sha256.clone()),
                    loan_expires_at,
                };
                ctx.ledger.record_download(&work, &record, now).await?;
                info!(
                    path = %artifact.path.display(),
                    source = %planned.source,
                    loan = planned.loan,
                    "work downloaded"
                );

                outcome.kind = OutcomeKind::Downloaded;
                outcome.source = Some(planned.source);
                outcome.loan_expires_at = loan_expires_at;
                outcome.artifact = Some(artifact.path.clone());
                outcome.conversion = convert(ctx, plan.key(), &artifact.path).await?;
                return Ok(outcome);
            }
            Err(error) => {
                warn!(url = %planned.url, error = %error, "URL failed, trying next");
                outcome.failures.push(UrlFailure {
                    url: planned.url.clone(),
                    source: planned.source,
                    error,
                });
            }
        }
    }

    let reason = outcome.failure_summary();
    ctx.ledger
        .record_failure(&plan.work, &reason, unix_now())
        .await?;
    warn!(reason = %reason, "all URLs failed");
    Ok(outcome)
}

async fn already_present(
    ctx: &TaskContext,
    plan: &FetchPlan,
    entry: &LedgerEntry,
) -> Result<AcquireOutcome, LedgerError> {
    let mut outcome = AcquireOutcome::new(plan, OutcomeKind::AlreadyPresent);
    outcome.source = Some(entry.source);
    outcome.loan_expires_at = entry.loan_expires_at;

    let existing = entry.existing_paths();
    let source_path = existing
        .get("epub")
        .or_else(|| {
            ctx.conversion.as_ref().and_then(|stage| {
                existing
                    .iter()
                    .find(|(format, _)| **format != stage.target)
                    .map(|(_, path)| path)
            })
        })
        .or_else(|| existing.values().next())
        .cloned();
    outcome.artifact.clone_from(&source_path);

    if let (Some(stage), Some(path)) = (&ctx.conversion, source_path)
        && !existing.contains_key(&stage.target)
    {
        outcome.conversion = convert(ctx, plan.key(), &path).await?;
    }
    Ok(outcome)
}

/// Runs the conversion stage, recording successful outputs in the ledger.
async fn convert(
    ctx: &TaskContext,
    key: &str,
    input: &Path,
) -> Result<Option<Result<ConversionOutcome, crate::convert::ConversionError>>, LedgerError> {
    let Some(stage) = &ctx.conversion else {
        return Ok(None);
    };
    let result = stage.pipeline.convert(input, &stage.target).await;
    if let Ok(converted) = &result
        && let Some(output) = converted.output()
    {
        ctx.ledger
            .record_conversion(key, &stage.target, output)
            .await?;
    }
    Ok(Some(result))
}
