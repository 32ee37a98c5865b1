//! Author and title identity normalization.
//!
//! Every catalog spells authors differently ("MARK TWAIN", "mark  twain",
//! "Twain, Mark" aside). Adapters and the ledger only ever see the canonical
//! [`AuthorName`] produced here, so case and whitespace variants collapse
//! into one author folder and one ledger key.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Rejected author input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorError {
    /// Nothing left after trimming.
    #[error(
        "author name is empty\n  Suggestion: Pass a non-empty author name, e.g. \"Mark Twain\""
    )]
    Empty,
}

/// Canonical author identity: a display form and a lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AuthorName {
    display: String,
    key: String,
}

impl AuthorName {
    /// Canonical display form, e.g. `Mark Twain`.
    #[must_use]
    pub fn display(&self) -> &str {
        &self.display
    }

    /// Stable lookup key (lower-cased display form).
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for AuthorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// Normalizes free-form author text.
///
/// Trims, collapses internal whitespace, and title-cases each word. Words
/// that are already mixed case after their first letter (`McDonald`,
/// `O'Brien`) are kept as written. The result is idempotent.
///
/// # Errors
///
/// Returns [`AuthorError::Empty`] if the input is blank.
pub fn normalize_author(raw: &str) -> Result<AuthorName, AuthorError> {
    let display = raw
        .split_whitespace()
        .map(normalize_token)
        .collect::<Vec<_>>()
        .join(" ");
    if display.is_empty() {
        return Err(AuthorError::Empty);
    }
    let key = display.to_lowercase();
    Ok(AuthorName { display, key })
}

/// Collapses whitespace in a title, preserving case for display.
#[must_use]
pub fn normalize_title(raw: &str) -> String {
    collapse_whitespace(raw)
}

/// Case-insensitive comparison key for a title.
#[must_use]
pub fn title_key(raw: &str) -> String {
    collapse_whitespace(raw).to_lowercase()
}

/// Key shared by the same work across catalogs.
///
/// Exact match on normalized author and title only; punctuation variants
/// produce distinct keys.
#[must_use]
pub fn cross_source_key(author: &AuthorName, title: &str) -> String {
    format!("{}::{}", author.key(), title_key(title))
}

/// Per-source identity of a candidate.
#[must_use]
pub fn candidate_identity(source: &str, cross_source_key: &str) -> String {
    format!("{source}:{cross_source_key}")
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_token(token: &str) -> String {
    if is_mixed_case_tail(token) {
        token.to_string()
    } else {
        title_case(token)
    }
}

fn is_mixed_case_tail(token: &str) -> bool {
    let mut has_upper = false;
    let mut has_lower = false;
    for ch in token.chars().skip(1) {
        if ch.is_uppercase() {
            has_upper = true;
        } else if ch.is_lowercase() {
            has_lower = true;
        }
    }
    has_upper && has_lower
}

/// Upper-cases the first letter of every alphabetic run, lower-cases the rest.
fn title_case(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut in_word = false;
    for ch in token.chars() {
        if ch.is_alphabetic() {
            if in_word {
                out.extend(ch.to_lowercase());
            } else {
                let mut upper = ch.to_uppercase();
                if let Some(first) = upper.next() {
                    out.push(first);
                }
                out.extend(upper.flat_map(char::to_lowercase));
            }
            in_word = true;
        } else {
            out.push(ch);
            in_word = false;
        }
    }
    out
}
