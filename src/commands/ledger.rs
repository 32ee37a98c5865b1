//! Ledger views: stats, verify, loans, export, duplicates.

use std::fs::File;
use std::io::{self, BufWriter};

use anyhow::{Context, Result, bail};
use bookfetch_core::{LedgerFilter, LedgerStats, Loan, LoanTracker, normalize_author};

use crate::app::settings::Settings;
use crate::cli::{ExportArgs, LoansArgs, VerifyArgs};
use crate::commands::open_ledger;

const DAY_SECS: i64 = 24 * 60 * 60;

pub(crate) async fn run_stats_command(settings: &Settings) -> Result<()> {
    let ledger = open_ledger(settings).await?;
    let stats = ledger.stats().await?;
    print!("{}", render_stats(&stats));
    Ok(())
}

pub(crate) async fn run_verify_command(args: &VerifyArgs, settings: &Settings) -> Result<()> {
    let ledger = open_ledger(settings).await?;
    let report = ledger.verify().await?;
    println!(
        "Checked {} entries: {} repaired, {} reset to not attempted.",
        report.checked, report.repaired, report.demoted
    );
    for path in &report.missing_paths {
        println!("  missing: {}", path.display());
    }
    for path in &report.corrupted {
        println!("  corrupted: {}", path.display());
    }
    if args.prune {
        let removed = ledger.prune().await?;
        println!("Pruned {removed} entries that were never downloaded.");
    }
    Ok(())
}

pub(crate) async fn run_loans_command(args: &LoansArgs, settings: &Settings) -> Result<()> {
    let tracker = LoanTracker::new(open_ledger(settings).await?);
    let (loans, label) = if args.expired {
        (tracker.expired_loans().await?, "expired")
    } else {
        (tracker.active_loans().await?, "active")
    };
    if loans.is_empty() {
        println!("No {label} loans.");
        return Ok(());
    }
    for loan in &loans {
        println!("{}", render_loan(loan));
    }
    Ok(())
}

pub(crate) async fn run_export_command(args: &ExportArgs, settings: &Settings) -> Result<()> {
    let ledger = open_ledger(settings).await?;
    let mut filter = LedgerFilter::all();
    if let Some(author) = &args.author {
        let author = normalize_author(author)
            .with_context(|| format!("Invalid --author value '{author}'"))?;
        filter = filter.with_author_key(author.key());
    }
    if let Some(subject) = &args.subject {
        filter = filter.with_subject(subject.clone());
    }
    if let (Some(min), Some(max)) = (args.min_year, args.max_year)
        && min > max
    {
        bail!("--min-year {min} is after --max-year {max}");
    }
    filter = filter.with_year_range(args.min_year, args.max_year);
    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create '{}'", path.display()))?;
            let written = ledger.export_json(&filter, BufWriter::new(file)).await?;
            eprintln!("Exported {written} entries to {}", path.display());
        }
        None => {
            ledger.export_json(&filter, io::stdout()).await?;
        }
    }
    Ok(())
}

pub(crate) async fn run_duplicates_command(settings: &Settings) -> Result<()> {
    let ledger = open_ledger(settings).await?;
    let groups = ledger.duplicates().await?;
    if groups.is_empty() {
        println!("No duplicate artifacts.");
        return Ok(());
    }
    for group in &groups {
        let short_hash: String = group.content_hash.chars().take(12).collect();
        println!("{short_hash} ({} works):", group.entries.len());
        for entry in &group.entries {
            println!("  [{}] {} - {}", entry.source, entry.author, entry.title);
        }
    }
    Ok(())
}

fn render_stats(stats: &LedgerStats) -> String {
    let mut out = format!(
        "Works: {} ({} downloaded, {} failed, {} not attempted)\nLoans: {} active, {} expired\n",
        stats.total,
        stats.downloaded,
        stats.failed,
        stats.not_attempted,
        stats.active_loans,
        stats.expired_loans
    );
    if !stats.by_author.is_empty() {
        out.push_str("By author:\n");
        for (author, counts) in &stats.by_author {
            out.push_str(&format!(
                "  {author}: {} works, {} downloaded, {} failed\n",
                counts.total, counts.downloaded, counts.failed
            ));
        }
    }
    if !stats.by_format.is_empty() {
        out.push_str("By format:\n");
        for (format, count) in &stats.by_format {
            out.push_str(&format!("  {format}: {count}\n"));
        }
    }
    out
}

fn render_loan(loan: &Loan) -> String {
    let when = if loan.seconds_remaining > 0 {
        match loan.days_remaining() {
            0 => "expires within a day".to_string(),
            1 => "expires in 1 day".to_string(),
            days => format!("expires in {days} days"),
        }
    } else {
        let ago = (-loan.seconds_remaining) / DAY_SECS;
        format!("expired {ago} day(s) ago")
    };
    format!(
        "  {} - {} ({when})",
        loan.entry.author, loan.entry.title
    )
}
