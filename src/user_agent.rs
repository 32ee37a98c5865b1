//! Shared User-Agent strings for artifact downloads and catalog queries.
//!
//! Catalog operators ask automated clients to identify themselves; both HTTP
//! clients send the same product token and contact URL.

/// Project URL included in every User-Agent.
const PROJECT_UA_URL: &str = "https://github.com/fierce/bookfetch";

/// User-Agent for artifact downloads.
#[must_use]
pub(crate) fn download_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("bookfetch/{version} (library-builder; +{PROJECT_UA_URL})")
}

/// User-Agent for catalog search and metadata requests.
#[must_use]
pub(crate) fn catalog_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("bookfetch/{version} (catalog-search; +{PROJECT_UA_URL})")
}
