//! Fetch command handler: search, acquire, convert, report.

use std::collections::HashSet;
use std::fs;
use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use bookfetch_core::{
    AcquireOutcome, BatchReport, BookCandidate, ConversionPipeline, DownloadEngine, EbookConvert,
    HttpClient, OutcomeKind, build_default_catalogs,
};
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::app::settings::Settings;
use crate::app::{exit_handler, progress, terminal};
use crate::cli::FetchArgs;
use crate::commands::open_ledger;

pub(crate) async fn run_fetch_command(
    args: &FetchArgs,
    settings: &Settings,
    quiet: bool,
) -> Result<ProcessExit> {
    let ledger = open_ledger(settings).await?;

    let verify = ledger
        .verify_presence()
        .await
        .context("Failed to reconcile the ledger with the output folder")?;
    if verify.demoted > 0 || verify.repaired > 0 {
        info!(
            checked = verify.checked,
            repaired = verify.repaired,
            demoted = verify.demoted,
            "ledger reconciled with disk"
        );
    }

    let catalogs = build_default_catalogs(&settings.catalog_settings());
    let mut candidates: Vec<BookCandidate> = Vec::new();
    for raw_author in &requested_authors(args)? {
        let report = catalogs
            .search(raw_author, &args.sources.sources, args.sources.limit())
            .await
            .with_context(|| format!("Cannot search for author '{raw_author}'"))?;
        for warning in &report.warnings {
            eprintln!("warning: {warning}");
        }
        info!(
            author = %report.author,
            candidates = report.candidates.len(),
            "catalog search complete"
        );
        candidates.extend(report.candidates);
    }

    if candidates.is_empty() {
        println!("No works found.");
        return Ok(ProcessExit::Success);
    }

    let concurrency = args
        .concurrency
        .map_or(settings.concurrency, usize::from);
    let client = HttpClient::with_timeout(settings.request_timeout)
        .context("Failed to build the download HTTP client")?;
    let mut engine = DownloadEngine::new(ledger, client, &settings.output_dir, concurrency)?;

    if args.no_convert {
        debug!("conversion disabled");
    } else {
        let target = args
            .format
            .clone()
            .unwrap_or_else(|| settings.convert_format.clone());
        if target.trim_start_matches('.').is_empty() {
            bail!("--format must name a file extension, e.g. mobi");
        }
        let pipeline = ConversionPipeline::new(Arc::new(EbookConvert::with_program(
            settings.converter_program.clone(),
        )))
        .with_timeout(settings.conversion_timeout);
        engine = engine.with_conversion(pipeline, &target);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    let works = candidates
        .iter()
        .map(BookCandidate::cross_source_key)
        .collect::<HashSet<_>>()
        .len();
    let show_progress = terminal::should_show_progress(
        io::stderr().is_terminal(),
        quiet,
        terminal::is_dumb_terminal(),
    );
    let (progress_tx, progress_handle) = progress::spawn_progress_ui(show_progress, works);

    let report = engine
        .acquire_all(candidates, Arc::clone(&interrupted), Some(progress_tx))
        .await
        .context("Acquisition stopped on a ledger error")?;
    let _ = progress_handle.await;

    print_summary(&report);

    let was_interrupted = interrupted.load(Ordering::SeqCst);
    if was_interrupted {
        warn!(
            cancelled = report.stats.cancelled,
            "Interrupted. Run again to resume."
        );
    }
    Ok(exit_handler::determine_exit_outcome(
        &report.stats,
        was_interrupted,
    ))
}

/// Positional authors followed by those read from `--authors-file`.
fn requested_authors(args: &FetchArgs) -> Result<Vec<String>> {
    let mut authors = args.authors.clone();
    if let Some(path) = &args.authors_file {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read authors file '{}'", path.display()))?;
        let listed = parse_author_list(&text);
        if listed.is_empty() {
            warn!(path = %path.display(), "authors file lists no authors");
        }
        authors.extend(listed);
    }
    Ok(authors)
}

/// One author per line; blank lines and `#` comments are skipped.
fn parse_author_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split_once('#').map_or(line, |(name, _)| name).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn print_summary(report: &BatchReport) {
    for outcome in &report.outcomes {
        if let Some(line) = outcome_detail(outcome) {
            println!("{line}");
        }
    }
    let stats = &report.stats;
    println!(
        "Downloaded {}, already present {}, failed {}, cancelled {} ({} total).",
        stats.downloaded,
        stats.already_present,
        stats.failed,
        stats.cancelled,
        stats.total()
    );
    if stats.converted > 0 || stats.conversion_failed > 0 {
        println!(
            "Converted {}, conversion failed {}.",
            stats.converted, stats.conversion_failed
        );
    }
}

/// A line for outcomes that need the user's attention.
fn outcome_detail(outcome: &AcquireOutcome) -> Option<String> {
    match outcome.kind {
        OutcomeKind::AllUrlsFailed => Some(format!(
            "FAILED {} - {}: {}",
            outcome.author,
            outcome.title,
            outcome.failure_summary()
        )),
        OutcomeKind::Downloaded | OutcomeKind::AlreadyPresent => match &outcome.conversion {
            Some(Err(error)) => Some(format!(
                "CONVERT FAILED {} - {}: {}",
                outcome.author,
                outcome.title,
                error.to_string().lines().next().unwrap_or_default()
            )),
            _ => None,
        },
        OutcomeKind::Cancelled => None,
    }
}
