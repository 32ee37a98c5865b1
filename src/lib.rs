//! Bookfetch Core Library
//!
//! This library acquires digital books for a named author from several
//! independent catalogs, tracks every work in a durable ledger so nothing is
//! fetched twice, and converts downloads into a target reading format.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`author`] - Author name normalization and cross-source keys
//! - [`catalog`] - Catalog adapters (Gutenberg, Internet Archive, lending)
//! - [`ledger`] - Persistent acquisition ledger with filesystem verification
//! - [`download`] - Artifact client and the concurrent acquisition engine
//! - [`convert`] - External format conversion with timeouts
//! - [`loans`] - Active and expired loan queries
//! - [`db`] - Database connection and schema management

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod author;
pub mod catalog;
pub mod convert;
pub mod db;
pub mod download;
pub mod ledger;
pub mod loans;
mod user_agent;

// Re-export commonly used types
pub use author::{AuthorError, AuthorName, normalize_author};
pub use catalog::{
    BookCandidate, CatalogError, CatalogSettings, CatalogSource, Catalogs, SearchEvent,
    SearchReport, SourceTag, SourceWarning, build_default_catalogs,
};
pub use convert::{
    ConversionError, ConversionOutcome, ConversionPipeline, Converter, ConverterExit,
    EbookConvert,
};
pub use db::{Database, DbError};
pub use download::{
    AcquireOutcome, BatchReport, BatchStats, DEFAULT_CONCURRENCY, DownloadEngine, EngineError,
    FetchError, HttpClient, OutcomeKind,
};
pub use ledger::{
    DownloadState, Ledger, LedgerEntry, LedgerError, LedgerFilter, LedgerStats, VerifyReport,
};
pub use loans::{Loan, LoanTracker};
