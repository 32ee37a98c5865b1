//! Artifact downloading and the acquisition orchestrator.
//!
//! This module provides the [`HttpClient`] that fetches one candidate URL
//! into an author folder, and the [`DownloadEngine`] that runs a whole batch
//! of works through ordered URL fallback with bounded parallelism, recording
//! every outcome in the ledger.
//!
//! # Features
//!
//! - Streaming downloads written to `.part` files and renamed when complete
//! - Error pages (HTML bodies, tiny stubs) rejected per URL
//! - Format detected from the content type, falling back to the URL
//! - SHA-256 of every artifact for duplicate reporting
//! - Loan expiry recorded for artifacts from lending URLs

mod client;
pub mod constants;
mod engine;
mod error;
pub mod filename;

pub use client::{ClientBuildError, FetchedArtifact, HttpClient};
pub use constants::{DEFAULT_CONCURRENCY, LOAN_PERIOD_SECS};
pub use engine::{
    AcquireOutcome, BatchReport, BatchStats, DownloadEngine, EngineError, FetchPlan, OutcomeKind,
    PlannedUrl, UrlFailure, build_plans,
};
pub use error::FetchError;

// Note: no module-local Result aliases; signatures spell out
// `Result<T, FetchError>` explicitly.
