//! Catalog registry: fan-out search over the configured adapters.

use std::collections::HashMap;
use std::fmt;

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::{BookCandidate, CatalogSource, SourceTag};
use crate::author::{AuthorError, AuthorName, normalize_author};

/// A catalog that contributed nothing because it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceWarning {
    pub source: SourceTag,
    pub message: String,
}

impl fmt::Display for SourceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.source, self.message)
    }
}

/// One item of an incremental search.
#[derive(Debug, Clone)]
pub enum SearchEvent {
    Candidate(BookCandidate),
    Warning(SourceWarning),
}

/// Collected result of [`Catalogs::search`].
#[derive(Debug, Clone)]
pub struct SearchReport {
    /// Normalized author the search ran for.
    pub author: AuthorName,
    /// Candidates in source order, one per identity.
    pub candidates: Vec<BookCandidate>,
    /// Catalogs that failed.
    pub warnings: Vec<SourceWarning>,
}

/// Ordered collection of catalog adapters.
pub struct Catalogs {
    sources: Vec<Box<dyn CatalogSource>>,
}

impl Catalogs {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Appends an adapter; search order follows registration order.
    pub fn register(&mut self, source: Box<dyn CatalogSource>) {
        debug!(source = %source.tag(), "registered catalog");
        self.sources.push(source);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Tags of the registered adapters, in search order.
    #[must_use]
    pub fn tags(&self) -> Vec<SourceTag> {
        self.sources.iter().map(|s| s.tag()).collect()
    }

    /// Streams candidates and per-source warnings as catalogs answer.
    ///
    /// `sources` selects adapters (empty means all). `limit` caps the items
    /// taken from each catalog. Catalogs are drained one after another, so
    /// a failing catalog only ever produces one [`SearchEvent::Warning`].
    pub fn search_stream<'a>(
        &'a self,
        author: &'a AuthorName,
        sources: &'a [SourceTag],
        limit: Option<usize>,
    ) -> BoxStream<'a, SearchEvent> {
        let per_source = self
            .sources
            .iter()
            .filter(move |adapter| sources.is_empty() || sources.contains(&adapter.tag()))
            .map(move |adapter| {
                let tag = adapter.tag();
                let events = adapter.search(author).map(move |item| match item {
                    Ok(candidate) => SearchEvent::Candidate(candidate),
                    Err(error) => SearchEvent::Warning(SourceWarning {
                        source: tag,
                        message: error.to_string(),
                    }),
                });
                match limit {
                    Some(limit) => events.take(limit).left_stream(),
                    None => events.right_stream(),
                }
            });
        stream::iter(per_source).flatten().boxed()
    }

    /// Normalizes `raw_author` and collects a full search.
    ///
    /// Candidates sharing an identity (same work twice in one catalog) are
    /// folded into the first, keeping every fallback URL.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorError`] for blank input, before any request is made.
    #[instrument(skip(self), fields(sources = ?sources))]
    pub async fn search(
        &self,
        raw_author: &str,
        sources: &[SourceTag],
        limit: Option<usize>,
    ) -> Result<SearchReport, AuthorError> {
        let author = normalize_author(raw_author)?;
        let mut candidates: Vec<BookCandidate> = Vec::new();
        let mut by_identity: HashMap<String, usize> = HashMap::new();
        let mut warnings = Vec::new();

        let mut events = self.search_stream(&author, sources, limit);
        while let Some(event) = events.next().await {
            match event {
                SearchEvent::Candidate(candidate) => {
                    if let Some(&index) = by_identity.get(candidate.identity()) {
                        debug!(identity = candidate.identity(), "folding duplicate candidate");
                        candidates[index].absorb_urls(&candidate);
                    } else {
                        by_identity.insert(candidate.identity().to_string(), candidates.len());
                        candidates.push(candidate);
                    }
                }
                SearchEvent::Warning(warning) => {
                    warn!(source = %warning.source, message = %warning.message, "catalog skipped");
                    warnings.push(warning);
                }
            }
        }
        drop(events);

        info!(
            author = %author,
            candidates = candidates.len(),
            warnings = warnings.len(),
            "catalog search finished"
        );
        Ok(SearchReport {
            author,
            candidates,
            warnings,
        })
    }
}

impl Default for Catalogs {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Catalogs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalogs")
            .field("sources", &self.tags())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::{CandidateStream, CatalogError};

    /// In-memory catalog yielding fixed titles, or failing.
    struct FixedCatalog {
        tag: SourceTag,
        titles: Vec<&'static str>,
        fail: bool,
    }

    impl CatalogSource for FixedCatalog {
        fn tag(&self) -> SourceTag {
            self.tag
        }

        fn search<'a>(&'a self, author: &'a AuthorName) -> CandidateStream<'a> {
            if self.fail {
                return stream::iter([Err(CatalogError::unavailable(self.tag, "offline"))])
                    .boxed();
            }
            let items: Vec<_> = self
                .titles
                .iter()
                .enumerate()
                .filter_map(|(i, title)| {
                    BookCandidate::new(
                        self.tag,
                        author,
                        title,
                        vec![format!("https://{}.example/{i}.epub", self.tag)],
                    )
                })
                .map(Ok)
                .collect();
            stream::iter(items).boxed()
        }
    }

    fn registry() -> Catalogs {
        let mut catalogs = Catalogs::new();
        catalogs.register(Box::new(FixedCatalog {
            tag: SourceTag::Gutenberg,
            titles: vec!["Roughing It", "Tom Sawyer", "Roughing It"],
            fail: false,
        }));
        catalogs.register(Box::new(FixedCatalog {
            tag: SourceTag::Archive,
            titles: vec![],
            fail: true,
        }));
        catalogs.register(Box::new(FixedCatalog {
            tag: SourceTag::Lending,
            titles: vec!["Letters"],
            fail: false,
        }));
        catalogs
    }

    #[tokio::test]
    async fn test_failing_catalog_becomes_warning_and_others_continue() {
        let report = registry().search("mark twain", &[], None).await.unwrap();

        assert_eq!(report.author.display(), "Mark Twain");
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].source, SourceTag::Archive);
        let titles: Vec<&str> = report.candidates.iter().map(BookCandidate::title).collect();
        assert_eq!(titles, vec!["Roughing It", "Tom Sawyer", "Letters"]);
    }

    #[tokio::test]
    async fn test_duplicate_identity_is_folded_keeping_urls() {
        let report = registry()
            .search("mark twain", &[SourceTag::Gutenberg], None)
            .await
            .unwrap();
        assert_eq!(report.candidates.len(), 2);
        assert_eq!(
            report.candidates[0].candidate_urls(),
            ["https://gutenberg.example/0.epub", "https://gutenberg.example/2.epub"]
        );
    }

    #[tokio::test]
    async fn test_limit_applies_per_source() {
        let report = registry()
            .search("mark twain", &[SourceTag::Gutenberg, SourceTag::Lending], Some(1))
            .await
            .unwrap();
        let sources: Vec<SourceTag> = report.candidates.iter().map(BookCandidate::source).collect();
        assert_eq!(sources, vec![SourceTag::Gutenberg, SourceTag::Lending]);
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_blank_author_rejected_before_search() {
        let error = registry().search("   ", &[], None).await.unwrap_err();
        assert_eq!(error, AuthorError::Empty);
    }

    #[test]
    fn test_debug_lists_tags() {
        let debug = format!("{:?}", registry());
        assert!(debug.contains("Gutenberg"));
        assert_eq!(registry().len(), 3);
        assert!(Catalogs::new().is_empty());
    }
}
