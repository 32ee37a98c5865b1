//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use bookfetch_core::SourceTag;
use clap::{Args, Parser, Subcommand};

/// Acquire public-domain and borrowable books by author.
///
/// Bookfetch searches several catalogs for an author's works, downloads each
/// work once into a per-author folder, records it in a local ledger, and
/// converts it into your reading format.
#[derive(Parser, Debug)]
#[command(name = "bookfetch")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Root folder for downloaded books (default: current directory)
    #[arg(short = 'o', long, value_name = "DIR", global = true)]
    pub output_dir: Option<PathBuf>,

    /// Ledger database file (default: <output-dir>/.bookfetch/ledger.db)
    #[arg(long, value_name = "FILE", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List an author's works across catalogs without downloading
    Search(SearchArgs),
    /// Download every work by one or more authors
    Fetch(FetchArgs),
    /// Summarize the ledger
    Stats,
    /// Reconcile the ledger with files on disk
    Verify(VerifyArgs),
    /// List borrowed books and their expiry
    Loans(LoansArgs),
    /// Write ledger entries as JSON
    Export(ExportArgs),
    /// Report works whose downloaded files are byte-identical
    Duplicates,
}

/// Catalog selection shared by `search` and `fetch`.
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Only query these catalogs (gutenberg, archive, lending); repeatable
    #[arg(short = 's', long = "source", value_name = "SOURCE")]
    pub sources: Vec<SourceTag>,

    /// Maximum results taken from each catalog
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u16).range(1..))]
    pub limit: Option<u16>,
}

impl SourceArgs {
    pub fn limit(&self) -> Option<usize> {
        self.limit.map(usize::from)
    }
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Author name, e.g. "Mark Twain"
    pub author: String,

    #[command(flatten)]
    pub sources: SourceArgs,
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// One or more author names
    #[arg(required_unless_present = "authors_file", num_args = 1..)]
    pub authors: Vec<String>,

    /// Read more author names from FILE, one per line (`#` starts a comment)
    #[arg(long, value_name = "FILE")]
    pub authors_file: Option<PathBuf>,

    #[command(flatten)]
    pub sources: SourceArgs,

    /// Works acquired in parallel (1-32)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub concurrency: Option<u8>,

    /// Target format for conversion (e.g. mobi, azw3, epub)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Skip the conversion step
    #[arg(long, conflicts_with = "format")]
    pub no_convert: bool,
}

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    /// Also delete entries that were never downloaded
    #[arg(long)]
    pub prune: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LoansArgs {
    /// Show lapsed loans instead of active ones
    #[arg(long)]
    pub expired: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Write to this file instead of stdout
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Only entries tagged with this subject (case-insensitive)
    #[arg(long)]
    pub subject: Option<String>,

    /// Only entries by this author
    #[arg(long)]
    pub author: Option<String>,

    /// Only entries published in or after this year
    #[arg(long, value_name = "YEAR", allow_negative_numbers = true)]
    pub min_year: Option<i32>,

    /// Only entries published in or before this year
    #[arg(long, value_name = "YEAR", allow_negative_numbers = true)]
    pub max_year: Option<i32>,
}
