//! Catalog search: turning an author into downloadable book candidates.
//!
//! # Architecture
//!
//! - [`CatalogSource`] - Trait each catalog adapter implements
//! - [`Catalogs`] - Ordered set of adapters; fans a query out and folds
//!   per-source failures into warnings
//! - [`GutenbergCatalog`] - Project Gutenberg (HTML search and book pages)
//! - [`ArchiveCatalog`] - Internet Archive advanced search (JSON)
//! - [`LendingCatalog`] - Open Library borrowable editions (loan URLs)
//!
//! Adapters return lazy streams: nothing touches the network until the
//! stream is polled, and a source that fails contributes a single error
//! item instead of aborting the whole search.

mod archive;
mod error;
mod gutenberg;
mod http_client;
mod openlibrary;
mod rate_limiter;
mod registry;
mod utils;

pub use archive::ArchiveCatalog;
pub use error::CatalogError;
pub use gutenberg::GutenbergCatalog;
pub use http_client::CatalogTimeouts;
pub(crate) use http_client::with_env_proxies;
pub use openlibrary::LendingCatalog;
pub use rate_limiter::RateLimiter;
pub use registry::{Catalogs, SearchEvent, SearchReport, SourceWarning};

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::author::{AuthorName, candidate_identity, cross_source_key, normalize_title};

/// Lazy stream of candidates produced by one catalog.
pub type CandidateStream<'a> = BoxStream<'a, Result<BookCandidate, CatalogError>>;

/// Which catalog produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// Project Gutenberg.
    Gutenberg,
    /// Internet Archive public-domain texts.
    Archive,
    /// Open Library lending (time-limited loans).
    Lending,
}

impl SourceTag {
    /// All sources in default search order.
    pub const ALL: [SourceTag; 3] = [Self::Gutenberg, Self::Archive, Self::Lending];

    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gutenberg => "gutenberg",
            Self::Archive => "archive",
            Self::Lending => "lending",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gutenberg" => Ok(Self::Gutenberg),
            "archive" | "internet_archive" => Ok(Self::Archive),
            "lending" | "openlibrary" => Ok(Self::Lending),
            _ => Err(format!(
                "invalid source: {s} (expected gutenberg, archive, or lending)"
            )),
        }
    }
}

/// One discovered work from one catalog.
///
/// Always carries at least one absolute http(s) URL; see [`BookCandidate::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookCandidate {
    identity: String,
    cross_source_key: String,
    title: String,
    author: AuthorName,
    year: Option<i32>,
    subjects: BTreeSet<String>,
    candidate_urls: Vec<String>,
    source: SourceTag,
    loanable: bool,
}

impl BookCandidate {
    /// Builds a candidate, keeping only absolute http(s) URLs in the given order.
    ///
    /// Returns `None` when no usable URL remains; such records are never yielded.
    #[must_use]
    pub fn new(
        source: SourceTag,
        author: &AuthorName,
        title: &str,
        urls: impl IntoIterator<Item = String>,
    ) -> Option<Self> {
        let mut candidate_urls: Vec<String> = Vec::new();
        for raw in urls {
            let is_http = Url::parse(&raw)
                .is_ok_and(|url| matches!(url.scheme(), "http" | "https"));
            if is_http && !candidate_urls.contains(&raw) {
                candidate_urls.push(raw);
            }
        }
        if candidate_urls.is_empty() {
            warn!(%source, title, "dropping candidate without usable URLs");
            return None;
        }

        let mut title = normalize_title(title);
        if title.is_empty() {
            title = "Untitled".to_string();
        }
        let cross_source_key = cross_source_key(author, &title);
        Some(Self {
            identity: candidate_identity(source.as_str(), &cross_source_key),
            cross_source_key,
            title,
            author: author.clone(),
            year: None,
            subjects: BTreeSet::new(),
            candidate_urls,
            source,
            loanable: false,
        })
    }

    /// Sets the publication year.
    #[must_use]
    pub fn with_year(mut self, year: Option<i32>) -> Self {
        self.year = year;
        self
    }

    /// Adds subjects, dropping blanks.
    #[must_use]
    pub fn with_subjects<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.subjects.extend(
            subjects
                .into_iter()
                .map(|s| s.as_ref().split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|s| !s.is_empty()),
        );
        self
    }

    /// Marks the candidate as coming from a time-limited loan.
    #[must_use]
    pub fn loanable(mut self) -> Self {
        self.loanable = true;
        self
    }

    /// Appends `other`'s URLs after this candidate's own, skipping duplicates.
    pub fn absorb_urls(&mut self, other: &BookCandidate) {
        for url in &other.candidate_urls {
            if !self.candidate_urls.contains(url) {
                self.candidate_urls.push(url.clone());
            }
        }
    }

    /// Per-source identity.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Key shared by the same work across sources.
    #[must_use]
    pub fn cross_source_key(&self) -> &str {
        &self.cross_source_key
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn author(&self) -> &AuthorName {
        &self.author
    }

    #[must_use]
    pub fn year(&self) -> Option<i32> {
        self.year
    }

    #[must_use]
    pub fn subjects(&self) -> &BTreeSet<String> {
        &self.subjects
    }

    /// Download URLs, highest priority first. Never empty.
    #[must_use]
    pub fn candidate_urls(&self) -> &[String] {
        &self.candidate_urls
    }

    #[must_use]
    pub fn source(&self) -> SourceTag {
        self.source
    }

    #[must_use]
    pub fn is_loanable(&self) -> bool {
        self.loanable
    }
}

/// A searchable book catalog.
///
/// Implementations hold only their own configuration (base URLs, HTTP
/// client, pacing) and may be shared across tasks.
pub trait CatalogSource: Send + Sync {
    /// Which catalog this adapter talks to.
    fn tag(&self) -> SourceTag;

    /// Lazily searches the catalog for works by `author`.
    ///
    /// A catalog-level failure is yielded as a single `Err` item, after which
    /// the stream ends.
    fn search<'a>(&'a self, author: &'a AuthorName) -> CandidateStream<'a>;
}

/// Base URLs and pacing for the built-in catalogs.
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub gutenberg_base: String,
    pub archive_base: String,
    pub openlibrary_base: String,
    pub timeouts: CatalogTimeouts,
    /// Minimum delay between requests to the same catalog host.
    pub request_spacing: Duration,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            gutenberg_base: gutenberg::DEFAULT_BASE_URL.to_string(),
            archive_base: archive::DEFAULT_BASE_URL.to_string(),
            openlibrary_base: openlibrary::DEFAULT_BASE_URL.to_string(),
            timeouts: CatalogTimeouts::default(),
            request_spacing: Duration::from_millis(500),
        }
    }
}

/// Builds the default catalog set in [`SourceTag::ALL`] order.
///
/// A catalog whose HTTP client cannot be constructed is skipped with a
/// warning; the remaining catalogs still work.
#[must_use]
pub fn build_default_catalogs(settings: &CatalogSettings) -> Catalogs {
    let mut catalogs = Catalogs::new();

    match GutenbergCatalog::with_base_url(
        &settings.gutenberg_base,
        settings.timeouts,
        settings.request_spacing,
    ) {
        Ok(catalog) => catalogs.register(Box::new(catalog)),
        Err(error) => warn!(
            error = %error,
            "Gutenberg catalog unavailable; continuing with remaining catalogs"
        ),
    }

    match ArchiveCatalog::with_base_url(&settings.archive_base, settings.timeouts) {
        Ok(catalog) => catalogs.register(Box::new(catalog)),
        Err(error) => warn!(
            error = %error,
            "Internet Archive catalog unavailable; continuing with remaining catalogs"
        ),
    }

    match LendingCatalog::with_base_urls(
        &settings.openlibrary_base,
        &settings.archive_base,
        settings.timeouts,
    ) {
        Ok(catalog) => catalogs.register(Box::new(catalog)),
        Err(error) => warn!(
            error = %error,
            "lending catalog unavailable; continuing with remaining catalogs"
        ),
    }

    catalogs
}
