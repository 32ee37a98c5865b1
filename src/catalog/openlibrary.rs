//! Open Library lending adapter.
//!
//! Open Library lists in-copyright editions that can be borrowed for a
//! limited time. Those editions are served by the Internet Archive as
//! protected `_lcp` files, which are loan artifacts rather than
//! permanent-ownership copies; candidates from here are always loanable.

use futures_util::{StreamExt, stream};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::http_client::{CatalogTimeouts, build_catalog_http_client};
use super::{BookCandidate, CandidateStream, CatalogError, CatalogSource, SourceTag};
use crate::author::AuthorName;

/// Public Open Library host.
pub(crate) const DEFAULT_BASE_URL: &str = "https://openlibrary.org";

const DEFAULT_LIMIT: usize = 50;

/// Subjects on popular works run into the hundreds; keep the head.
const MAX_SUBJECTS: usize = 10;

const FIELDS: &str =
    "key,title,author_name,first_publish_year,subject,ebook_access,lending_identifier_s,ia";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<OpenLibraryDoc>,
}

#[derive(Debug, Deserialize)]
struct OpenLibraryDoc {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    first_publish_year: Option<i32>,
    #[serde(default)]
    subject: Vec<String>,
    #[serde(default)]
    ebook_access: Option<String>,
    #[serde(default)]
    lending_identifier_s: Option<String>,
    #[serde(default)]
    ia: Vec<String>,
}

impl OpenLibraryDoc {
    fn is_borrowable(&self) -> bool {
        self.ebook_access.as_deref() == Some("borrowable")
    }

    fn lending_identifier(&self) -> Option<&str> {
        self.lending_identifier_s
            .as_deref()
            .or_else(|| self.ia.first().map(String::as_str))
            .filter(|id| {
                !id.is_empty()
                    && id
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            })
    }
}

/// Open Library lending adapter.
#[derive(Debug)]
pub struct LendingCatalog {
    client: Client,
    base_url: String,
    archive_base_url: String,
    limit: usize,
}

impl LendingCatalog {
    /// Creates an adapter for openlibrary.org with archive.org loan URLs.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Setup`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, CatalogError> {
        Self::with_base_urls(
            DEFAULT_BASE_URL,
            super::archive::DEFAULT_BASE_URL,
            CatalogTimeouts::default(),
        )
    }

    /// Creates an adapter against custom search and loan hosts.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Setup`] if the HTTP client cannot be built.
    pub fn with_base_urls(
        base_url: &str,
        archive_base_url: &str,
        timeouts: CatalogTimeouts,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            client: build_catalog_http_client(SourceTag::Lending, timeouts)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            archive_base_url: archive_base_url.trim_end_matches('/').to_string(),
            limit: DEFAULT_LIMIT,
        })
    }

    /// Loan artifact URLs for a lending identifier, epub first.
    fn loan_urls(&self, identifier: &str) -> Vec<String> {
        let base = &self.archive_base_url;
        vec![
            format!("{base}/download/{identifier}/{identifier}_lcp.epub"),
            format!("{base}/download/{identifier}/{identifier}_lcp.pdf"),
        ]
    }

    #[instrument(skip(self), fields(author = %author))]
    async fn fetch_candidates(
        &self,
        author: &AuthorName,
    ) -> Result<Vec<BookCandidate>, CatalogError> {
        let limit = self.limit.to_string();
        let url = Url::parse_with_params(
            &format!("{}/search.json", self.base_url),
            &[
                ("author", author.display()),
                ("fields", FIELDS),
                ("limit", limit.as_str()),
            ],
        )
        .map_err(|e| CatalogError::Setup {
            catalog: SourceTag::Lending,
            reason: format!("invalid base URL: {e}"),
        })?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CatalogError::from_reqwest(SourceTag::Lending, &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::unavailable(
                SourceTag::Lending,
                format!("HTTP {}", status.as_u16()),
            ));
        }
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| CatalogError::malformed(SourceTag::Lending, e.to_string()))?;

        let total = body.docs.len();
        let candidates: Vec<BookCandidate> = body
            .docs
            .into_iter()
            .filter_map(|doc| self.candidate_from_doc(author, doc))
            .collect();
        debug!(total, borrowable = candidates.len(), "open library results parsed");
        Ok(candidates)
    }

    fn candidate_from_doc(&self, author: &AuthorName, doc: OpenLibraryDoc) -> Option<BookCandidate> {
        if !doc.is_borrowable() {
            return None;
        }
        let identifier = doc.lending_identifier()?.to_string();
        let title = doc.title.clone().unwrap_or_default();
        BookCandidate::new(
            SourceTag::Lending,
            author,
            &title,
            self.loan_urls(&identifier),
        )
        .map(|candidate| {
            candidate
                .with_year(doc.first_publish_year)
                .with_subjects(doc.subject.iter().take(MAX_SUBJECTS))
                .loanable()
        })
    }
}

impl CatalogSource for LendingCatalog {
    fn tag(&self) -> SourceTag {
        SourceTag::Lending
    }

    fn search<'a>(&'a self, author: &'a AuthorName) -> CandidateStream<'a> {
        stream::once(self.fetch_candidates(author))
            .flat_map(|result| match result {
                Ok(candidates) => stream::iter(candidates.into_iter().map(Ok)).left_stream(),
                Err(error) => stream::iter([Err(error)]).right_stream(),
            })
            .boxed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::author::normalize_author;

    fn catalog() -> LendingCatalog {
        LendingCatalog::with_base_urls(
            "https://ol.example",
            "https://ia.example",
            CatalogTimeouts::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_borrowable_doc_becomes_loanable_candidate_with_loan_urls() {
        let author = normalize_author("ursula k. le guin").unwrap();
        let doc: OpenLibraryDoc = serde_json::from_value(serde_json::json!({
            "title": "The Dispossessed",
            "first_publish_year": 1974,
            "subject": ["Science fiction", "Utopias"],
            "ebook_access": "borrowable",
            "lending_identifier_s": "dispossessed00legu",
            "ia": ["dispossessed00legu", "other"]
        }))
        .unwrap();

        let candidate = catalog().candidate_from_doc(&author, doc).unwrap();
        assert!(candidate.is_loanable());
        assert_eq!(candidate.source(), SourceTag::Lending);
        assert_eq!(candidate.year(), Some(1974));
        assert_eq!(
            candidate.candidate_urls(),
            [
                "https://ia.example/download/dispossessed00legu/dispossessed00legu_lcp.epub",
                "https://ia.example/download/dispossessed00legu/dispossessed00legu_lcp.pdf"
            ]
        );
    }

    #[test]
    fn test_non_borrowable_docs_are_skipped() {
        let author = normalize_author("jane austen").unwrap();
        for access in ["public", "no_ebook", "printdisabled"] {
            let doc: OpenLibraryDoc = serde_json::from_value(serde_json::json!({
                "title": "Emma",
                "ebook_access": access,
                "ia": ["emma00aust"]
            }))
            .unwrap();
            assert!(catalog().candidate_from_doc(&author, doc).is_none(), "{access}");
        }
    }

    #[test]
    fn test_missing_identifier_falls_back_to_ia_then_skips() {
        let doc: OpenLibraryDoc = serde_json::from_value(serde_json::json!({
            "ebook_access": "borrowable",
            "ia": ["fromia00"]
        }))
        .unwrap();
        assert_eq!(doc.lending_identifier(), Some("fromia00"));

        let doc: OpenLibraryDoc =
            serde_json::from_value(serde_json::json!({ "ebook_access": "borrowable" })).unwrap();
        assert_eq!(doc.lending_identifier(), None);
    }
}
