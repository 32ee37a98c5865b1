//! End-to-end CLI tests for the bookfetch binary.

// `Command::cargo_bin` is deprecated in assert_cmd >=2.0.17 in favor of
// `cargo::cargo_bin_cmd!` macro. Suppressed until migration to the new API.
#![allow(deprecated)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use bookfetch_core::ledger::{ArtifactRecord, WorkInfo, unix_now};
use bookfetch_core::{Database, Ledger, SourceTag};
use predicates::prelude::*;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

/// A command isolated from the user's config and output folder.
fn bookfetch(temp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("bookfetch").unwrap();
    cmd.env("XDG_CONFIG_HOME", temp.path().join("xdg-config"))
        .env("RUST_LOG", "warn")
        .arg("--output-dir")
        .arg(temp.path().join("books"))
        .arg("--db")
        .arg(temp.path().join("ledger.db"));
    cmd
}

fn work(key: &str, title: &str, year: Option<i32>, subjects: &[&str]) -> WorkInfo {
    WorkInfo {
        cross_source_key: key.to_string(),
        title: title.to_string(),
        author: "Mark Twain".to_string(),
        author_key: "mark twain".to_string(),
        source: SourceTag::Gutenberg,
        year,
        subjects: subjects.iter().map(|s| (*s).to_string()).collect(),
    }
}

/// Records `work` as downloaded to `<title>.epub` next to the ledger file.
fn seed(db_path: &Path, work: WorkInfo, content_hash: Option<String>) -> PathBuf {
    let book = db_path.with_file_name(format!("{}.epub", work.title));
    std::fs::write(&book, b"epub bytes").unwrap();
    let artifact = ArtifactRecord {
        format: "epub".to_string(),
        path: book.clone(),
        content_hash,
        loan_expires_at: None,
    };
    tokio_test::block_on(async {
        let ledger = Ledger::new(Database::new(db_path).await.unwrap());
        ledger
            .record_download(&work, &artifact, unix_now())
            .await
            .unwrap();
    });
    book
}

fn seed_downloaded(db_path: &Path, key: &str, title: &str, subjects: &[&str]) {
    seed(db_path, work(key, title, Some(1884), subjects), None);
}

#[test]
fn test_binary_help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("bookfetch").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("fetch"))
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("verify"));
}

#[test]
fn test_binary_version_displays_name() {
    let mut cmd = Command::cargo_bin("bookfetch").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("bookfetch"));
}

#[test]
fn test_binary_rejects_unknown_flag() {
    let mut cmd = Command::cargo_bin("bookfetch").unwrap();
    cmd.args(["stats", "--no-such-flag"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--no-such-flag"));
}

#[test]
fn test_binary_fetch_blank_author_fails() {
    let temp = TempDir::new().unwrap();
    let assert = bookfetch(&temp)
        .args(["fetch", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("author name is empty"));
    assert_eq!(assert.get_output().status.code(), Some(1));
}

#[test]
fn test_binary_stats_on_fresh_ledger() {
    let temp = TempDir::new().unwrap();
    bookfetch(&temp)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Works: 0 (0 downloaded, 0 failed, 0 not attempted)",
        ));
    assert!(temp.path().join("ledger.db").exists());
}

#[test]
fn test_binary_export_filters_by_subject() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("ledger.db");
    seed_downloaded(&db_path, "mark twain::huck", "Huck", &["Humorous stories"]);
    seed_downloaded(&db_path, "mark twain::roughing it", "Roughing It", &["Travel"]);

    bookfetch(&temp)
        .args(["export", "--subject", "travel"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Roughing It"))
        .stdout(predicate::str::contains("Huck").not());
}

#[test]
fn test_binary_verify_reports_missing_file() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("ledger.db");
    seed_downloaded(&db_path, "mark twain::huck", "Huck", &[]);
    std::fs::remove_file(temp.path().join("Huck.epub")).unwrap();

    bookfetch(&temp)
        .args(["verify", "--prune"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 reset to not attempted"))
        .stdout(predicate::str::contains("Pruned 1 entries"));
}

#[test]
fn test_binary_config_unknown_key_is_error() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("config.toml");
    std::fs::write(&config, "rate_limit = 5\n").unwrap();

    bookfetch(&temp)
        .arg("--config")
        .arg(&config)
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_binary_loans_empty() {
    let temp = TempDir::new().unwrap();
    bookfetch(&temp)
        .arg("loans")
        .assert()
        .success()
        .stdout(predicate::str::contains("No active loans."));
}

#[test]
fn test_binary_export_filters_by_year_range() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("ledger.db");
    seed(&db_path, work("mark twain::sawyer", "Sawyer", Some(1876), &[]), None);
    seed(&db_path, work("mark twain::equator", "Equator", Some(1897), &[]), None);
    seed(&db_path, work("mark twain::sketches", "Sketches", None, &[]), None);

    bookfetch(&temp)
        .args(["export", "--min-year", "1880", "--max-year", "1900"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Equator"))
        .stdout(predicate::str::contains("Sketches"))
        .stdout(predicate::str::contains("Sawyer").not());
}

#[test]
fn test_binary_export_rejects_inverted_year_range() {
    let temp = TempDir::new().unwrap();
    bookfetch(&temp)
        .args(["export", "--min-year", "1900", "--max-year", "1800"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--min-year 1900 is after --max-year 1800"));
}

#[test]
fn test_binary_verify_reports_corrupted_file() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("ledger.db");
    let hash = format!("{:x}", Sha256::digest(b"epub bytes"));
    let book = seed(&db_path, work("mark twain::huck", "Huck", None, &[]), Some(hash));
    std::fs::write(&book, b"epub by").unwrap();

    bookfetch(&temp)
        .arg("verify")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 reset to not attempted"))
        .stdout(predicate::str::contains("corrupted:"))
        .stdout(predicate::str::contains("Huck.epub"));
}

#[test]
fn test_binary_fetch_with_commented_authors_file_finds_nothing() {
    let temp = TempDir::new().unwrap();
    let list = temp.path().join("authors.txt");
    std::fs::write(&list, "# nobody yet\n\n").unwrap();

    bookfetch(&temp)
        .arg("fetch")
        .arg("--authors-file")
        .arg(&list)
        .assert()
        .success()
        .stdout(predicate::str::contains("No works found."));
}

#[test]
fn test_binary_fetch_missing_authors_file_fails() {
    let temp = TempDir::new().unwrap();
    bookfetch(&temp)
        .arg("fetch")
        .arg("--authors-file")
        .arg(temp.path().join("absent.txt"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read authors file"));
}

#[test]
fn test_binary_fetch_needs_authors_or_file() {
    let temp = TempDir::new().unwrap();
    bookfetch(&temp)
        .arg("fetch")
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}
