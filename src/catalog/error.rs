//! Catalog-level failures.

use thiserror::Error;

use super::SourceTag;

/// A catalog could not be searched.
///
/// Never fatal: the affected catalog contributes no candidates and the
/// failure is reported to the caller as a warning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Catalog could not be reached, timed out, or answered with an error status.
    #[error(
        "{catalog} is unavailable: {reason}\n  Suggestion: Check your network connection or retry later; other catalogs are unaffected"
    )]
    SourceUnavailable {
        /// Affected catalog.
        catalog: SourceTag,
        /// What went wrong.
        reason: String,
    },

    /// Catalog answered but the payload could not be understood.
    #[error(
        "{catalog} returned an unusable response: {reason}\n  Suggestion: The catalog may have changed its format; results from it are skipped"
    )]
    Malformed {
        /// Affected catalog.
        catalog: SourceTag,
        /// What could not be parsed.
        reason: String,
    },

    /// The adapter could not be constructed.
    #[error("{catalog} catalog could not be initialised: {reason}")]
    Setup {
        /// Affected catalog.
        catalog: SourceTag,
        /// Construction failure.
        reason: String,
    },
}

impl CatalogError {
    /// Creates a [`CatalogError::SourceUnavailable`].
    #[must_use]
    pub fn unavailable(catalog: SourceTag, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            catalog,
            reason: reason.into(),
        }
    }

    /// Creates a [`CatalogError::Malformed`].
    #[must_use]
    pub fn malformed(catalog: SourceTag, reason: impl Into<String>) -> Self {
        Self::Malformed {
            catalog,
            reason: reason.into(),
        }
    }

    /// Maps a transport error from `reqwest` onto the catalog taxonomy.
    #[must_use]
    pub fn from_reqwest(catalog: SourceTag, error: &reqwest::Error) -> Self {
        if error.is_decode() {
            return Self::malformed(catalog, error.to_string());
        }
        if error.is_timeout() {
            return Self::unavailable(catalog, "request timed out");
        }
        if let Some(status) = error.status() {
            return Self::unavailable(catalog, format!("HTTP {}", status.as_u16()));
        }
        Self::unavailable(catalog, error.to_string())
    }

    /// The catalog this error concerns.
    #[must_use]
    pub fn catalog(&self) -> SourceTag {
        match self {
            Self::SourceUnavailable { catalog, .. }
            | Self::Malformed { catalog, .. }
            | Self::Setup { catalog, .. } => *catalog,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_message_names_catalog_and_suggestion() {
        let error = CatalogError::unavailable(SourceTag::Archive, "HTTP 503");
        let message = error.to_string();
        assert!(message.contains("archive is unavailable: HTTP 503"));
        assert!(message.contains("Suggestion:"));
        assert_eq!(error.catalog(), SourceTag::Archive);
    }

    #[test]
    fn test_malformed_message() {
        let error = CatalogError::malformed(SourceTag::Lending, "missing docs");
        assert!(error.to_string().contains("unusable response: missing docs"));
        assert_eq!(error.catalog(), SourceTag::Lending);
    }
}
