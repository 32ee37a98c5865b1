//! Constants for the download module (timeouts, size floor, parallelism).

/// HTTP connect timeout for artifact requests.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Whole-request timeout for one artifact URL.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Bodies smaller than this are treated as error pages, not books.
pub const MIN_ARTIFACT_BYTES: u64 = 1000;

/// Default number of works fetched in parallel.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Minimum concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum concurrency value.
pub const MAX_CONCURRENCY: usize = 32;

/// Loan length recorded for artifacts fetched from a lending URL.
pub const LOAN_PERIOD_SECS: i64 = 14 * 24 * 60 * 60;

/// Suffix of in-progress artifact files.
pub const PARTIAL_SUFFIX: &str = "part";
