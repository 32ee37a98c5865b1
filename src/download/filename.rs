//! Artifact naming: sanitization, author folders and format detection.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use url::Url;

use crate::author::{AuthorName, normalize_title};

/// Longest sanitized name component, in characters.
const MAX_COMPONENT_CHARS: usize = 200;

/// Hex digits of the key hash appended to lossy stems.
const KEY_TAG_CHARS: usize = 8;

/// Formats recognised from URL path tokens, most specific first.
const URL_FORMAT_TOKENS: &[(&str, &str)] = &[
    ("epub3", "epub"),
    ("epub", "epub"),
    ("pdf", "pdf"),
    ("mobi", "mobi"),
    ("kf8", "azw3"),
    ("azw3", "azw3"),
    ("txt", "txt"),
];

/// Replaces characters that are invalid on common filesystems with `_` and
/// truncates to 200 characters.
#[must_use]
pub fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_COMPONENT_CHARS)
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<root>/<sanitized author display>`.
///
/// Case and whitespace variants of one name share a folder because the
/// display form is already normalized.
#[must_use]
pub fn author_folder(root: &Path, author: &AuthorName) -> PathBuf {
    root.join(sanitize_component(author.display()))
}

/// `<Author> - <Title>`, unique per ledger key within an author folder.
///
/// When sanitizing changes the name (reserved characters, trailing dots,
/// truncation) two keys could land on one stem, so a short hash of `key` is
/// appended: `<Author> - <Title> [1a2b3c4d]`.
#[must_use]
pub fn artifact_stem(author: &AuthorName, title: &str, key: &str) -> String {
    let natural = format!("{} - {}", author.display(), normalize_title(title));
    let stem = sanitize_component(&natural);
    if stem == natural {
        return stem;
    }

    let mut tag = format!("{:x}", Sha256::digest(key.as_bytes()));
    tag.truncate(KEY_TAG_CHARS);
    let base: String = stem
        .chars()
        .take(MAX_COMPONENT_CHARS - KEY_TAG_CHARS - 3)
        .collect();
    format!("{} [{tag}]", base.trim_end())
}

/// Format extension implied by a response content type, if it names a book.
#[must_use]
pub fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "application/epub+zip" => Some("epub"),
        "application/pdf" => Some("pdf"),
        "application/x-mobipocket-ebook" => Some("mobi"),
        "application/vnd.amazon.ebook" => Some("azw3"),
        "text/plain" => Some("txt"),
        _ => None,
    }
}

/// True when the content type is an HTML document.
#[must_use]
pub fn is_html_content_type(content_type: &str) -> bool {
    let lowered = content_type.to_ascii_lowercase();
    lowered.contains("text/html") || lowered.contains("application/xhtml")
}

/// Format extension implied by the URL's last path segment.
///
/// Handles catalog-style names such as `76.epub3.images` or
/// `76.txt.utf-8` by scanning every dot-separated token.
#[must_use]
pub fn extension_from_url(url: &str) -> Option<&'static str> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?.to_ascii_lowercase();
    let tokens: Vec<&str> = last_segment.split('.').skip(1).collect();
    URL_FORMAT_TOKENS
        .iter()
        .find(|(token, _)| tokens.contains(token))
        .map(|(_, ext)| *ext)
}

/// Content type first, then the URL, then `bin`.
#[must_use]
pub fn resolve_extension(content_type: Option<&str>, url: &str) -> &'static str {
    content_type
        .and_then(extension_from_content_type)
        .or_else(|| extension_from_url(url))
        .unwrap_or("bin")
}

/// Path of the in-progress file for `final_path`.
#[must_use]
pub fn partial_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".");
    name.push(super::constants::PARTIAL_SUFFIX);
    final_path.with_file_name(name)
}
