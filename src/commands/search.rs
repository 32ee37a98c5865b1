//! Search command handler: list an author's works without downloading.

use anyhow::{Context, Result};
use bookfetch_core::{BookCandidate, build_default_catalogs};

use crate::app::settings::Settings;
use crate::cli::SearchArgs;

pub(crate) async fn run_search_command(args: &SearchArgs, settings: &Settings) -> Result<()> {
    let catalogs = build_default_catalogs(&settings.catalog_settings());
    let report = catalogs
        .search(&args.author, &args.sources.sources, args.sources.limit())
        .await
        .with_context(|| format!("Cannot search for author '{}'", args.author))?;

    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }

    if report.candidates.is_empty() {
        println!("No works found for {}.", report.author);
        return Ok(());
    }

    println!(
        "{} work(s) by {}:",
        report.candidates.len(),
        report.author
    );
    for candidate in &report.candidates {
        println!("{}", render_candidate_row(candidate));
    }
    Ok(())
}

pub(crate) fn render_candidate_row(candidate: &BookCandidate) -> String {
    let year = candidate
        .year()
        .map(|year| format!(" ({year})"))
        .unwrap_or_default();
    let loan = if candidate.is_loanable() { " [loan]" } else { "" };
    format!(
        "  [{}] {}{}{} - {} url(s)",
        candidate.source(),
        candidate.title(),
        year,
        loan,
        candidate.candidate_urls().len()
    )
}
