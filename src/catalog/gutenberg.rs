//! Project Gutenberg catalog adapter.
//!
//! Gutenberg has no JSON search API, so this adapter reads the HTML search
//! results page, then visits each book page for title, subjects and release
//! year. Book pages are fetched lazily, one per polled candidate, and paced
//! per host.

use std::sync::LazyLock;
use std::time::Duration;

use futures_util::{StreamExt, stream};
use regex::Regex;
use reqwest::Client;
use tracing::{debug, instrument};

use super::http_client::{CatalogTimeouts, build_catalog_http_client};
use super::rate_limiter::RateLimiter;
use super::utils::{compile_static_regex, extract_year, html_text};
use super::{BookCandidate, CandidateStream, CatalogError, CatalogSource, SourceTag};
use crate::author::AuthorName;

/// Public Gutenberg site.
pub(crate) const DEFAULT_BASE_URL: &str = "https://www.gutenberg.org";

static BOOKLINK_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"<li[^>]*class\s*=\s*["'][^"']*\bbooklink\b"#));

static BOOK_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"href\s*=\s*["']/ebooks/(\d+)["']"#));

static LIST_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?s)<span[^>]*class\s*=\s*["']title["'][^>]*>(.*?)</span>"#)
});

static LIST_SUBTITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?s)<span[^>]*class\s*=\s*["']subtitle["'][^>]*>(.*?)</span>"#)
});

static HEADLINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?s)<td[^>]*itemprop\s*=\s*["']headline["'][^>]*>(.*?)</td>"#)
});

static H1_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?s)<h1[^>]*itemprop\s*=\s*["']name["'][^>]*>(.*?)</h1>"#)
});

static SUBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?s)<a[^>]*href\s*=\s*["']/ebooks/subject/\d+["'][^>]*>(.*?)</a>"#)
});

static RELEASE_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?s)<td[^>]*itemprop\s*=\s*["']datePublished["'][^>]*>(.*?)</td>"#)
});

/// One entry of the search results page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BookLink {
    id: u64,
    title: String,
    creator: Option<String>,
}

/// Metadata read from a book page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct BookPage {
    title: Option<String>,
    subjects: Vec<String>,
    year: Option<i32>,
}

/// Project Gutenberg adapter.
#[derive(Debug)]
pub struct GutenbergCatalog {
    client: Client,
    base_url: String,
    limiter: RateLimiter,
}

impl GutenbergCatalog {
    /// Creates an adapter for the public site with default pacing (500 ms).
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Setup`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, CatalogError> {
        Self::with_base_url(
            DEFAULT_BASE_URL,
            CatalogTimeouts::default(),
            Duration::from_millis(500),
        )
    }

    /// Creates an adapter against a mirror or mock server.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Setup`] if the HTTP client cannot be built.
    pub fn with_base_url(
        base_url: &str,
        timeouts: CatalogTimeouts,
        request_spacing: Duration,
    ) -> Result<Self, CatalogError> {
        Ok(Self {
            client: build_catalog_http_client(SourceTag::Gutenberg, timeouts)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::new(request_spacing),
        })
    }

    /// Download URLs for a book, primary representation first.
    fn download_urls(&self, id: u64) -> Vec<String> {
        let base = &self.base_url;
        vec![
            format!("{base}/ebooks/{id}.epub3.images"),
            format!("{base}/ebooks/{id}.epub.noimages"),
            format!("{base}/ebooks/{id}.epub.images"),
            format!("{base}/files/{id}/{id}-0.epub"),
            format!("{base}/files/{id}/{id}.epub"),
            format!("{base}/ebooks/{id}.kf8.images"),
            format!("{base}/ebooks/{id}.txt.utf-8"),
        ]
    }

    async fn fetch_text(&self, url: &str) -> Result<String, CatalogError> {
        self.limiter.acquire(url).await;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CatalogError::from_reqwest(SourceTag::Gutenberg, &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::unavailable(
                SourceTag::Gutenberg,
                format!("HTTP {} from {url}", status.as_u16()),
            ));
        }
        response
            .text()
            .await
            .map_err(|e| CatalogError::from_reqwest(SourceTag::Gutenberg, &e))
    }

    #[instrument(skip(self), fields(author = %author))]
    async fn list_books(&self, author: &AuthorName) -> Result<Vec<BookLink>, CatalogError> {
        let url = format!(
            "{}/ebooks/search/?query={}",
            self.base_url,
            urlencoding::encode(author.display())
        );
        let html = self.fetch_text(&url).await?;
        let links: Vec<BookLink> = parse_search_results(&html)
            .into_iter()
            .filter(|link| creator_matches(link.creator.as_deref(), author))
            .collect();
        debug!(books = links.len(), "gutenberg search results parsed");
        Ok(links)
    }

    async fn book_candidate(&self, author: &AuthorName, link: BookLink) -> Option<BookCandidate> {
        let url = format!("{}/ebooks/{}", self.base_url, link.id);
        let page = match self.fetch_text(&url).await {
            Ok(html) => parse_book_page(&html),
            Err(error) => {
                debug!(id = link.id, error = %error, "book page unavailable; using listing data");
                BookPage::default()
            }
        };
        let title = page.title.unwrap_or(link.title);
        BookCandidate::new(
            SourceTag::Gutenberg,
            author,
            &title,
            self.download_urls(link.id),
        )
        .map(|candidate| {
            candidate
                .with_year(page.year)
                .with_subjects(page.subjects)
        })
    }
}

impl CatalogSource for GutenbergCatalog {
    fn tag(&self) -> SourceTag {
        SourceTag::Gutenberg
    }

    fn search<'a>(&'a self, author: &'a AuthorName) -> CandidateStream<'a> {
        stream::once(self.list_books(author))
            .map(move |listing| match listing {
                Ok(links) => stream::iter(links)
                    .filter_map(move |link| self.book_candidate(author, link))
                    .map(Ok::<_, CatalogError>)
                    .left_stream(),
                Err(error) => stream::iter([Err(error)]).right_stream(),
            })
            .flatten()
            .boxed()
    }
}

fn parse_search_results(html: &str) -> Vec<BookLink> {
    let mut links: Vec<BookLink> = Vec::new();
    for chunk in BOOKLINK_SPLIT_RE.split(html).skip(1) {
        let Some(id) = BOOK_ID_RE
            .captures(chunk)
            .and_then(|caps| caps[1].parse::<u64>().ok())
        else {
            continue;
        };
        if links.iter().any(|link| link.id == id) {
            continue;
        }
        let title = LIST_TITLE_RE
            .captures(chunk)
            .map(|caps| html_text(&caps[1]))
            .unwrap_or_default();
        let creator = LIST_SUBTITLE_RE
            .captures(chunk)
            .map(|caps| html_text(&caps[1]))
            .filter(|s| !s.is_empty());
        links.push(BookLink { id, title, creator });
    }
    links
}

/// True when every author token appears in the listed creator.
///
/// Gutenberg lists creators as "Twain, Mark", so order is ignored.
fn creator_matches(creator: Option<&str>, author: &AuthorName) -> bool {
    let Some(creator) = creator else {
        return true;
    };
    let creator_tokens = name_tokens(creator);
    name_tokens(author.key())
        .iter()
        .all(|token| creator_tokens.contains(token))
}

/// Lower-cased alphanumeric runs, so "H.G." and "H. G." both give `h`, `g`.
fn name_tokens(name: &str) -> Vec<String> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn parse_book_page(html: &str) -> BookPage {
    let title = HEADLINE_RE
        .captures(html)
        .map(|caps| html_text(&caps[1]))
        .or_else(|| {
            H1_NAME_RE
                .captures(html)
                .map(|caps| strip_by_suffix(&html_text(&caps[1])))
        })
        .filter(|t| !t.is_empty());
    let subjects = SUBJECT_RE
        .captures_iter(html)
        .map(|caps| html_text(&caps[1]))
        .filter(|s| !s.is_empty())
        .collect();
    let year = RELEASE_DATE_RE
        .captures(html)
        .and_then(|caps| extract_year(&html_text(&caps[1])));
    BookPage {
        title,
        subjects,
        year,
    }
}

/// `"Walden by Henry David Thoreau"` → `"Walden"`.
fn strip_by_suffix(heading: &str) -> String {
    heading
        .rsplit_once(" by ")
        .map_or(heading, |(title, _)| title)
        .trim()
        .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::author::normalize_author;

    const SEARCH_HTML: &str = r#"
<ul class="results">
<li class="booklink">
<a class="link" href="/ebooks/76" accesskey="0">
<span class="cell content">
<span class="title">Adventures of Huckleberry Finn</span>
<span class="subtitle">Mark Twain</span>
<span class="extra">12345 downloads</span>
</span></a></li>
<li class="booklink">
<a class="link" href="/ebooks/74">
<span class="title">The Adventures of Tom Sawyer, Complete</span>
<span class="subtitle">Twain, Mark</span></a></li>
<li class="booklink">
<a class="link" href="/ebooks/1342">
<span class="title">Pride and Prejudice</span>
<span class="subtitle">Jane Austen</span></a></li>
</ul>"#;

    const BOOK_HTML: &str = r#"
<h1 itemprop="name">Adventures of Huckleberry Finn by Mark Twain</h1>
<table class="bibrec">
<tr><th>Title</th><td itemprop="headline">Adventures of Huckleberry Finn</td></tr>
<tr><th>Subject</th><td><a class="block" href="/ebooks/subject/123">
Humorous stories
</a></td></tr>
<tr><th>Subject</th><td><a class="block" href="/ebooks/subject/456">Boys -- Fiction</a></td></tr>
<tr><th>Release Date</th><td itemprop="datePublished">Jun 29, 2004</td></tr>
</table>"#;

    #[test]
    fn test_parse_search_results() {
        let links = parse_search_results(SEARCH_HTML);
        assert_eq!(links.len(), 3);
        assert_eq!(
            links[0],
            BookLink {
                id: 76,
                title: "Adventures of Huckleberry Finn".to_string(),
                creator: Some("Mark Twain".to_string()),
            }
        );
        assert_eq!(links[1].id, 74);
    }

    #[test]
    fn test_creator_filter_ignores_order_and_rejects_other_authors() {
        let twain = normalize_author("mark twain").unwrap();
        assert!(creator_matches(Some("Twain, Mark"), &twain));
        assert!(creator_matches(Some("Mark Twain"), &twain));
        assert!(creator_matches(None, &twain));
        assert!(!creator_matches(Some("Jane Austen"), &twain));

        let wells = normalize_author("h.g. wells").unwrap();
        assert!(creator_matches(
            Some("Wells, H. G. (Herbert George)"),
            &wells
        ));
        assert!(creator_matches(Some("H.G. Wells"), &wells));
        assert!(!creator_matches(Some("Wells, Carolyn"), &wells));
        let obrien = normalize_author("flann o'brien").unwrap();
        assert!(creator_matches(Some("O'Brien, Flann"), &obrien));
    }

    #[test]
    fn test_parse_book_page() {
        let page = parse_book_page(BOOK_HTML);
        assert_eq!(page.title.as_deref(), Some("Adventures of Huckleberry Finn"));
        assert_eq!(page.subjects, vec!["Humorous stories", "Boys -- Fiction"]);
        assert_eq!(page.year, Some(2004));
    }

    #[test]
    fn test_parse_book_page_falls_back_to_h1() {
        let page = parse_book_page(r#"<h1 itemprop="name">Walden by Henry David Thoreau</h1>"#);
        assert_eq!(page.title.as_deref(), Some("Walden"));
        assert!(page.subjects.is_empty());
        assert_eq!(page.year, None);
    }

    #[test]
    fn test_download_urls_order() {
        let catalog = GutenbergCatalog::with_base_url(
            "https://mirror.example/",
            CatalogTimeouts::default(),
            Duration::ZERO,
        )
        .unwrap();
        let urls = catalog.download_urls(76);
        assert_eq!(urls[0], "https://mirror.example/ebooks/76.epub3.images");
        assert_eq!(urls[1], "https://mirror.example/ebooks/76.epub.noimages");
        assert_eq!(urls[2], "https://mirror.example/ebooks/76.epub.images");
        assert_eq!(urls[3], "https://mirror.example/files/76/76-0.epub");
        assert_eq!(urls[4], "https://mirror.example/files/76/76.epub");
        assert_eq!(urls.last().unwrap(), "https://mirror.example/ebooks/76.txt.utf-8");
    }
}
