//! Effective settings: CLI flags over config file over built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bookfetch_core::catalog::CatalogTimeouts;
use bookfetch_core::convert::{
    DEFAULT_CONVERSION_TIMEOUT, DEFAULT_CONVERTER_PROGRAM, DEFAULT_TARGET_FORMAT,
};
use bookfetch_core::download::constants::{CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use bookfetch_core::{CatalogSettings, DEFAULT_CONCURRENCY};

use crate::app_config::{FileConfig, VerbositySetting};
use crate::cli::Cli;

const STATE_DIR: &str = ".bookfetch";
const LEDGER_FILE: &str = "ledger.db";
const DEFAULT_CATALOG_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Settings {
    pub(crate) output_dir: PathBuf,
    pub(crate) database: PathBuf,
    pub(crate) concurrency: usize,
    pub(crate) request_timeout: Duration,
    pub(crate) catalog_timeout_secs: u64,
    pub(crate) convert_format: String,
    pub(crate) converter_program: PathBuf,
    pub(crate) conversion_timeout: Duration,
    pub(crate) log_level: &'static str,
}

impl Settings {
    pub(crate) fn resolve(cli: &Cli, file: Option<&FileConfig>) -> Self {
        let file = file.cloned().unwrap_or_default();

        let output_dir = cli
            .output_dir
            .clone()
            .or(file.output_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        let database = cli
            .db
            .clone()
            .or(file.database)
            .unwrap_or_else(|| default_database_path(&output_dir));

        Self {
            database,
            output_dir,
            concurrency: file
                .concurrency
                .map_or(DEFAULT_CONCURRENCY, usize::from),
            request_timeout: Duration::from_secs(
                file.request_timeout_secs.unwrap_or(REQUEST_TIMEOUT_SECS),
            ),
            catalog_timeout_secs: file
                .catalog_timeout_secs
                .unwrap_or(DEFAULT_CATALOG_TIMEOUT_SECS),
            convert_format: file
                .convert_format
                .unwrap_or_else(|| DEFAULT_TARGET_FORMAT.to_string()),
            converter_program: file
                .converter_program
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONVERTER_PROGRAM)),
            conversion_timeout: file
                .conversion_timeout_secs
                .map_or(DEFAULT_CONVERSION_TIMEOUT, Duration::from_secs),
            log_level: resolve_log_level(cli, file.verbosity.map(VerbositySetting::log_level)),
        }
    }

    pub(crate) fn catalog_settings(&self) -> CatalogSettings {
        CatalogSettings {
            timeouts: CatalogTimeouts {
                connect_timeout_secs: CONNECT_TIMEOUT_SECS.min(self.catalog_timeout_secs),
                read_timeout_secs: self.catalog_timeout_secs,
            },
            ..CatalogSettings::default()
        }
    }
}

pub(crate) fn default_database_path(output_dir: &Path) -> PathBuf {
    output_dir.join(STATE_DIR).join(LEDGER_FILE)
}

/// `-q` beats `-v`; either beats the config file. `RUST_LOG` is applied later
/// and beats all of them.
fn resolve_log_level(cli: &Cli, configured: Option<&'static str>) -> &'static str {
    if cli.quiet {
        return "error";
    }
    match cli.verbose {
        0 => configured.unwrap_or("info"),
        1 => "debug",
        _ => "trace",
    }
}
