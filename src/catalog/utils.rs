//! Shared helpers for catalog adapters: static regexes, HTML text cleanup, years.

use std::sync::LazyLock;

use regex::Regex;

/// Compiles a regex at static init; panics on invalid pattern.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?s)<[^>]*>"));

static NUMERIC_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"&#(x[0-9a-fA-F]+|[0-9]+);"));

static YEAR_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"\b(1[0-9]|20)\d{2}\b"));

/// Strips tags, decodes common entities and collapses whitespace.
#[must_use]
pub(crate) fn html_text(fragment: &str) -> String {
    let without_tags = TAG_RE.replace_all(fragment, " ");
    let decoded = decode_entities(&without_tags);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    let named = text
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ");
    let numeric = NUMERIC_ENTITY_RE.replace_all(&named, |caps: &regex::Captures<'_>| {
        let raw = &caps[1];
        let code = if let Some(hex) = raw.strip_prefix('x') {
            u32::from_str_radix(hex, 16).ok()
        } else {
            raw.parse::<u32>().ok()
        };
        code.and_then(char::from_u32)
            .map_or_else(|| caps[0].to_string(), |ch| ch.to_string())
    });
    // Ampersand last so "&amp;lt;" stays literal.
    numeric.replace("&amp;", "&")
}

/// Returns the first plausible publication year (1000-2099) in `value`.
#[must_use]
pub(crate) fn extract_year(value: &str) -> Option<i32> {
    YEAR_VALUE_RE
        .find(value)
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_text_strips_tags_and_entities() {
        assert_eq!(
            html_text("<span class=\"title\">Pride &amp; Prejudice</span>\n  "),
            "Pride & Prejudice"
        );
        assert_eq!(html_text("Tom&#39;s &#x41;unt"), "Tom's Aunt");
        assert_eq!(html_text("a &amp;lt; b"), "a &lt; b");
    }

    #[test]
    fn test_extract_year() {
        assert_eq!(extract_year("Release Date: Jun 1, 2004 [eBook #76]"), Some(2004));
        assert_eq!(extract_year("1876"), Some(1876));
        assert_eq!(extract_year("c. 1599?"), Some(1599));
        assert_eq!(extract_year("no year"), None);
    }
}
