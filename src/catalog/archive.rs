//! Internet Archive catalog adapter (advanced search JSON API).

use futures_util::{StreamExt, stream};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::http_client::{CatalogTimeouts, build_catalog_http_client};
use super::utils::extract_year;
use super::{BookCandidate, CandidateStream, CatalogError, CatalogSource, SourceTag};
use crate::author::AuthorName;

/// Public Internet Archive host.
pub(crate) const DEFAULT_BASE_URL: &str = "https://archive.org";

/// Rows requested per search.
const DEFAULT_ROWS: usize = 50;

const FIELDS: [&str; 6] = [
    "identifier",
    "title",
    "creator",
    "year",
    "subject",
    "access-restricted-item",
];

#[derive(Debug, Deserialize)]
struct AdvancedSearchResponse {
    response: AdvancedSearchBody,
}

#[derive(Debug, Deserialize)]
struct AdvancedSearchBody {
    #[serde(default)]
    docs: Vec<ArchiveDoc>,
}

#[derive(Debug, Deserialize)]
struct ArchiveDoc {
    identifier: String,
    #[serde(default)]
    title: Option<OneOrMany>,
    #[serde(default)]
    year: Option<serde_json::Value>,
    #[serde(default)]
    subject: Option<OneOrMany>,
    #[serde(default, rename = "access-restricted-item")]
    access_restricted: Option<serde_json::Value>,
}

/// Archive metadata fields may be a scalar or a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn first(&self) -> Option<&str> {
        match self {
            Self::One(value) => Some(value),
            Self::Many(values) => values.first().map(String::as_str),
        }
    }

    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(value) => value
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Self::Many(values) => values,
        }
    }
}

impl ArchiveDoc {
    fn is_lending_only(&self) -> bool {
        match &self.access_restricted {
            Some(serde_json::Value::Bool(flag)) => *flag,
            Some(serde_json::Value::String(flag)) => flag.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    fn year(&self) -> Option<i32> {
        match self.year.as_ref()? {
            serde_json::Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
            serde_json::Value::String(s) => extract_year(s),
            serde_json::Value::Array(values) => values
                .iter()
                .find_map(|v| v.as_str().and_then(extract_year)),
            _ => None,
        }
    }
}

/// Internet Archive adapter.
///
/// Lending-only items are skipped here; [`super::LendingCatalog`] owns them.
#[derive(Debug)]
pub struct ArchiveCatalog {
    client: Client,
    base_url: String,
    rows: usize,
}

impl ArchiveCatalog {
    /// Creates an adapter for archive.org.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Setup`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, CatalogError> {
        Self::with_base_url(DEFAULT_BASE_URL, CatalogTimeouts::default())
    }

    /// Creates an adapter against a mirror or mock server.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Setup`] if the HTTP client cannot be built.
    pub fn with_base_url(base_url: &str, timeouts: CatalogTimeouts) -> Result<Self, CatalogError> {
        Ok(Self {
            client: build_catalog_http_client(SourceTag::Archive, timeouts)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            rows: DEFAULT_ROWS,
        })
    }

    /// Overrides how many records one search requests.
    #[must_use]
    pub fn with_rows(mut self, rows: usize) -> Self {
        self.rows = rows.max(1);
        self
    }

    fn search_url(&self, author: &AuthorName) -> Result<Url, CatalogError> {
        let query = format!("creator:\"{}\" AND mediatype:texts", author.display());
        let rows = self.rows.to_string();
        let mut params: Vec<(&str, &str)> = vec![("q", query.as_str())];
        params.extend(FIELDS.iter().map(|field| ("fl[]", *field)));
        params.extend([
            ("sort[]", "downloads desc"),
            ("rows", rows.as_str()),
            ("output", "json"),
        ]);
        Url::parse_with_params(&format!("{}/advancedsearch.php", self.base_url), &params)
            .map_err(|e| CatalogError::Setup {
                catalog: SourceTag::Archive,
                reason: format!("invalid base URL: {e}"),
            })
    }

    /// Download URLs for an item, preferred format first.
    fn download_urls(&self, identifier: &str) -> Vec<String> {
        let base = &self.base_url;
        vec![
            format!("{base}/download/{identifier}/{identifier}.epub"),
            format!("{base}/download/{identifier}/{identifier}.pdf"),
            format!("{base}/download/{identifier}/{identifier}.mobi"),
            format!("{base}/download/{identifier}/{identifier}_text.pdf"),
        ]
    }

    #[instrument(skip(self), fields(author = %author))]
    async fn fetch_candidates(
        &self,
        author: &AuthorName,
    ) -> Result<Vec<BookCandidate>, CatalogError> {
        let url = self.search_url(author)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CatalogError::from_reqwest(SourceTag::Archive, &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::unavailable(
                SourceTag::Archive,
                format!("HTTP {}", status.as_u16()),
            ));
        }
        let body: AdvancedSearchResponse = response
            .json()
            .await
            .map_err(|e| CatalogError::malformed(SourceTag::Archive, e.to_string()))?;

        let total = body.response.docs.len();
        let candidates: Vec<BookCandidate> = body
            .response
            .docs
            .into_iter()
            .filter_map(|doc| self.candidate_from_doc(author, doc))
            .collect();
        debug!(total, kept = candidates.len(), "archive search results parsed");
        Ok(candidates)
    }

    fn candidate_from_doc(&self, author: &AuthorName, doc: ArchiveDoc) -> Option<BookCandidate> {
        if doc.is_lending_only() {
            debug!(identifier = %doc.identifier, "skipping lending-only archive item");
            return None;
        }
        if !is_safe_identifier(&doc.identifier) {
            debug!(identifier = %doc.identifier, "skipping archive item with unusable identifier");
            return None;
        }
        let year = doc.year();
        let title = doc
            .title
            .as_ref()
            .and_then(OneOrMany::first)
            .unwrap_or("")
            .to_string();
        let subjects = doc.subject.map(OneOrMany::into_vec).unwrap_or_default();
        BookCandidate::new(
            SourceTag::Archive,
            author,
            &title,
            self.download_urls(&doc.identifier),
        )
        .map(|candidate| candidate.with_year(year).with_subjects(subjects))
    }
}

impl CatalogSource for ArchiveCatalog {
    fn tag(&self) -> SourceTag {
        SourceTag::Archive
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

/// Archive identifiers are `[A-Za-z0-9._-]`; anything else is not trusted in a path.
fn is_safe_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && !identifier.starts_with('.')
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::author::normalize_author;

    fn catalog() -> ArchiveCatalog {
        ArchiveCatalog::with_base_url("https://archive.example", CatalogTimeouts::default())
            .unwrap()
    }

    #[test]
    fn test_search_url_encodes_creator_query() {
        let author = normalize_author("mark twain").unwrap();
        let url = catalog().with_rows(10).search_url(&author).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(url.path(), "/advancedsearch.php");
        assert!(pairs.contains(&(
            "q".to_string(),
            "creator:\"Mark Twain\" AND mediatype:texts".to_string()
        )));
        assert!(pairs.contains(&("rows".to_string(), "10".to_string())));
        assert!(pairs.contains(&("output".to_string(), "json".to_string())));
        assert_eq!(pairs.iter().filter(|(k, _)| k == "fl[]").count(), FIELDS.len());
    }

    #[test]
    fn test_doc_with_list_fields_becomes_candidate() {
        let author = normalize_author("mark twain").unwrap();
        let doc: ArchiveDoc = serde_json::from_value(serde_json::json!({
            "identifier": "tomsawyer00twai",
            "title": "The Adventures of Tom Sawyer",
            "creator": ["Twain, Mark", "Williams, True"],
            "year": "1876",
            "subject": ["Fiction", "Mississippi River"]
        }))
        .unwrap();

        let candidate = catalog().candidate_from_doc(&author, doc).unwrap();
        assert_eq!(candidate.title(), "The Adventures of Tom Sawyer");
        assert_eq!(candidate.year(), Some(1876));
        assert_eq!(candidate.subjects().len(), 2);
        assert_eq!(
            candidate.candidate_urls()[0],
            "https://archive.example/download/tomsawyer00twai/tomsawyer00twai.epub"
        );
        assert_eq!(
            candidate.candidate_urls()[3],
            "https://archive.example/download/tomsawyer00twai/tomsawyer00twai_text.pdf"
        );
        assert_eq!(candidate.source(), SourceTag::Archive);
    }

    #[test]
    fn test_scalar_subject_splits_on_semicolons_and_numeric_year() {
        let doc: ArchiveDoc = serde_json::from_value(serde_json::json!({
            "identifier": "x",
            "year": 1899,
            "subject": "Fiction; Humor"
        }))
        .unwrap();
        assert_eq!(doc.year(), Some(1899));
        assert_eq!(doc.subject.unwrap().into_vec(), vec!["Fiction", "Humor"]);
    }

    #[test]
    fn test_lending_only_items_are_skipped() {
        let author = normalize_author("mark twain").unwrap();
        let doc: ArchiveDoc = serde_json::from_value(serde_json::json!({
            "identifier": "modernedition",
            "title": "Collected Stories",
            "access-restricted-item": "true"
        }))
        .unwrap();
        assert!(catalog().candidate_from_doc(&author, doc).is_none());
    }

    #[test]
    fn test_identifier_validation() {
        assert!(is_safe_identifier("tomsawyer00twai"));
        assert!(is_safe_identifier("a.b_c-d"));
        assert!(!is_safe_identifier("../etc"));
        assert!(!is_safe_identifier("a/b"));
        assert!(!is_safe_identifier(""));
    }
}
