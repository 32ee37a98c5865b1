//! Integration tests for the acquisition engine.
//!
//! These tests run `DownloadEngine` against a file-backed ledger and a mock
//! HTTP server, covering idempotence, URL fallback order, reconciliation with
//! the filesystem, loans, partial failures and concurrent batches.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bookfetch_core::{
    BookCandidate, ConversionError, ConversionOutcome, ConversionPipeline, Converter,
    ConverterExit, Database, DownloadEngine, DownloadState, EngineError, HttpClient, Ledger,
    LedgerFilter, LoanTracker, OutcomeKind, SourceTag, normalize_author,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

const DAY: i64 = 24 * 60 * 60;

fn epub_body(seed: &str) -> Vec<u8> {
    let mut body = b"PK\x03\x04mimetypeapplication/epub+zip".to_vec();
    body.extend(seed.as_bytes().iter().cycle().take(2048));
    body
}

fn epub_response(seed: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/epub+zip")
        .set_body_bytes(epub_body(seed))
}

struct Fixture {
    temp: TempDir,
    ledger: Ledger,
}

impl Fixture {
    async fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("ledger.db")).await.unwrap();
        Self {
            ledger: Ledger::new(db),
            temp,
        }
    }

    fn books(&self) -> std::path::PathBuf {
        self.temp.path().join("books")
    }

    fn engine(&self, concurrency: usize) -> DownloadEngine {
        DownloadEngine::new(
            self.ledger.clone(),
            HttpClient::new().unwrap(),
            self.books(),
            concurrency,
        )
        .unwrap()
    }
}

fn candidate(source: SourceTag, title: &str, urls: &[String]) -> BookCandidate {
    let author = normalize_author("Mark Twain").unwrap();
    BookCandidate::new(source, &author, title, urls.iter().cloned()).unwrap()
}

async fn run(engine: &DownloadEngine, candidates: Vec<BookCandidate>) -> bookfetch_core::BatchReport {
    engine
        .acquire_all(candidates, Arc::new(AtomicBool::new(false)), None)
        .await
        .unwrap()
}

async fn request_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| request.url.path().to_string())
        .collect()
}

#[tokio::test]
async fn test_second_run_skips_network_for_present_work() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/huck.epub"))
        .respond_with(epub_response("huck"))
        .mount(&server)
        .await;
    let fixture = Fixture::new().await;
    let engine = fixture.engine(2);
    let url = format!("{}/huck.epub", server.uri());

    let first = run(
        &engine,
        vec![candidate(SourceTag::Gutenberg, "Huckleberry Finn", &[url.clone()])],
    )
    .await;
    assert_eq!(first.outcomes[0].kind, OutcomeKind::Downloaded);
    let path = first.outcomes[0].artifact.clone().unwrap();
    assert_eq!(
        path,
        fixture
            .books()
            .join("Mark Twain")
            .join("Mark Twain - Huckleberry Finn.epub")
    );
    assert!(path.is_file());

    let second = run(
        &engine,
        vec![candidate(SourceTag::Gutenberg, "Huckleberry Finn", &[url])],
    )
    .await;
    assert_eq!(second.outcomes[0].kind, OutcomeKind::AlreadyPresent);
    assert_eq!(second.outcomes[0].artifact.as_deref(), Some(path.as_path()));
    assert_eq!(request_paths(&server).await.len(), 1, "no second request");

    let entry = fixture
        .ledger
        .get(&first.outcomes[0].cross_source_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.download_state, DownloadState::Downloaded);
    assert_eq!(entry.attempt_count, 1);
}

#[tokio::test]
async fn test_urls_are_tried_in_order_until_one_succeeds() {
    let server = require_mock_server!();
    Mock::given(path("/missing.epub"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(path("/login.epub"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_bytes(vec![b'<'; 4096]),
        )
        .mount(&server)
        .await;
    Mock::given(path("/good.epub"))
        .respond_with(epub_response("good"))
        .mount(&server)
        .await;
    Mock::given(path("/never.epub"))
        .respond_with(epub_response("never"))
        .mount(&server)
        .await;

    let fixture = Fixture::new().await;
    let urls: Vec<String> = ["missing", "login", "good", "never"]
        .iter()
        .map(|name| format!("{}/{name}.epub", server.uri()))
        .collect();
    let report = run(
        &fixture.engine(1),
        vec![candidate(SourceTag::Archive, "Roughing It", &urls)],
    )
    .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.kind, OutcomeKind::Downloaded);
    assert_eq!(outcome.source, Some(SourceTag::Archive));
    assert_eq!(outcome.failures.len(), 2);
    assert_eq!(outcome.failures[0].url, urls[0]);
    assert_eq!(outcome.failures[1].url, urls[1]);
    assert_eq!(
        request_paths(&server).await,
        vec!["/missing.epub", "/login.epub", "/good.epub"]
    );
}

#[tokio::test]
async fn test_non_loan_source_preferred_over_loan_for_same_work() {
    let server = require_mock_server!();
    Mock::given(path_regex(r"^/.*\.epub$"))
        .respond_with(epub_response("any"))
        .mount(&server)
        .await;
    let fixture = Fixture::new().await;
    let loan_url = format!("{}/loan.epub", server.uri());
    let free_url = format!("{}/free.epub", server.uri());
    let author = normalize_author("Mark Twain").unwrap();
    let loan = BookCandidate::new(SourceTag::Lending, &author, "Letters", [loan_url])
        .unwrap()
        .loanable();
    let free = candidate(SourceTag::Gutenberg, "Letters", &[free_url]);

    let report = run(&fixture.engine(1), vec![loan, free]).await;

    assert_eq!(report.outcomes.len(), 1, "one work, one outcome");
    assert_eq!(report.outcomes[0].source, Some(SourceTag::Gutenberg));
    assert_eq!(report.outcomes[0].loan_expires_at, None);
    assert_eq!(request_paths(&server).await, vec!["/free.epub"]);
}

#[tokio::test]
async fn test_all_urls_failing_records_failure() {
    let server = require_mock_server!();
    Mock::given(path("/tiny.epub"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/epub+zip")
                .set_body_bytes(vec![0u8; 10]),
        )
        .mount(&server)
        .await;
    let fixture = Fixture::new().await;
    let urls = vec![
        format!("{}/tiny.epub", server.uri()),
        format!("{}/gone.epub", server.uri()),
    ];
    let report = run(
        &fixture.engine(1),
        vec![candidate(SourceTag::Archive, "Following the Equator", &urls)],
    )
    .await;

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.kind, OutcomeKind::AllUrlsFailed);
    assert_eq!(outcome.failures.len(), 2);
    let entry = fixture
        .ledger
        .get(&outcome.cross_source_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.download_state, DownloadState::Failed);
    assert!(entry.last_error.is_some());
    assert!(entry.local_paths.is_empty());
    assert!(!fixture.books().join("Mark Twain").join("Mark Twain - Following the Equator.epub").exists());
}

#[tokio::test]
async fn test_deleted_file_is_reconciled_and_refetched() {
    let server = require_mock_server!();
    Mock::given(path("/sawyer.epub"))
        .respond_with(epub_response("sawyer"))
        .mount(&server)
        .await;
    let fixture = Fixture::new().await;
    let engine = fixture.engine(1);
    let url = format!("{}/sawyer.epub", server.uri());

    let first = run(&engine, vec![candidate(SourceTag::Gutenberg, "Tom Sawyer", &[url.clone()])]).await;
    let path = first.outcomes[0].artifact.clone().unwrap();
    std::fs::remove_file(&path).unwrap();

    let report = fixture.ledger.verify().await.unwrap();
    assert_eq!(report.demoted, 1);
    assert_eq!(report.missing_paths, vec![path.clone()]);
    let entry = fixture
        .ledger
        .get(&first.outcomes[0].cross_source_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.download_state, DownloadState::NotAttempted);

    let again = run(&engine, vec![candidate(SourceTag::Gutenberg, "Tom Sawyer", &[url])]).await;
    assert_eq!(again.outcomes[0].kind, OutcomeKind::Downloaded);
    assert!(path.is_file());
    assert_eq!(request_paths(&server).await.len(), 2);
}

#[tokio::test]
async fn test_loan_download_sets_fourteen_day_expiry() {
    let server = require_mock_server!();
    Mock::given(path("/letters_lcp.epub"))
        .respond_with(epub_response("letters"))
        .mount(&server)
        .await;
    let fixture = Fixture::new().await;
    let author = normalize_author("Mark Twain").unwrap();
    let loan = BookCandidate::new(
        SourceTag::Lending,
        &author,
        "Letters from the Earth",
        [format!("{}/letters_lcp.epub", server.uri())],
    )
    .unwrap()
    .loanable();

    let before = bookfetch_core::ledger::unix_now();
    let report = run(&fixture.engine(1), vec![loan]).await;
    let after = bookfetch_core::ledger::unix_now();

    let expires = report.outcomes[0].loan_expires_at.unwrap();
    assert!(expires >= before + 14 * DAY && expires <= after + 14 * DAY);

    let tracker = LoanTracker::new(fixture.ledger.clone());
    let active = tracker.active_loans().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].entry.title, "Letters from the Earth");
    assert!(tracker.expired_loans().await.unwrap().is_empty());

    let expired = tracker.expired_loans_at(expires + 1).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert!(tracker.active_loans_at(expires + 1).await.unwrap().is_empty());
}

/// Writes the output file unless the input name contains "Broken".
struct FakeConverter;

#[async_trait]
impl Converter for FakeConverter {
    fn name(&self) -> &str {
        "fake-convert"
    }

    async fn run(&self, input: &Path, output: &Path) -> std::io::Result<ConverterExit> {
        if input.to_string_lossy().contains("Broken") {
            return Ok(ConverterExit {
                success: false,
                code: Some(1),
                stderr: "cannot parse input".to_string(),
            });
        }
        tokio::fs::write(output, b"converted").await?;
        Ok(ConverterExit {
            success: true,
            code: Some(0),
            stderr: String::new(),
        })
    }
}

#[tokio::test]
async fn test_partial_failures_do_not_affect_other_works() {
    let server = require_mock_server!();
    for name in ["a", "broken", "e", "d"] {
        Mock::given(path(format!("/{name}.epub")))
            .respond_with(epub_response(name))
            .mount(&server)
            .await;
    }
    Mock::given(path("/b.epub"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fixture = Fixture::new().await;
    let url = |name: &str| vec![format!("{}/{name}.epub", server.uri())];

    // "D" is already in the library before the batch starts.
    run(
        &fixture.engine(1),
        vec![candidate(SourceTag::Gutenberg, "D", &url("d"))],
    )
    .await;

    let engine = fixture
        .engine(3)
        .with_conversion(ConversionPipeline::new(Arc::new(FakeConverter)), "mobi");
    let report = run(
        &engine,
        vec![
            candidate(SourceTag::Gutenberg, "A", &url("a")),
            candidate(SourceTag::Gutenberg, "B", &url("b")),
            candidate(SourceTag::Gutenberg, "Broken", &url("broken")),
            candidate(SourceTag::Gutenberg, "D", &url("d")),
            candidate(SourceTag::Gutenberg, "E", &url("e")),
        ],
    )
    .await;

    assert_eq!(report.outcomes.len(), 5);
    let kinds: Vec<OutcomeKind> = report.outcomes.iter().map(|o| o.kind).collect();
    assert_eq!(
        kinds,
        vec![
            OutcomeKind::Downloaded,
            OutcomeKind::AllUrlsFailed,
            OutcomeKind::Downloaded,
            OutcomeKind::AlreadyPresent,
            OutcomeKind::Downloaded,
        ]
    );

    assert!(matches!(
        report.outcomes[0].conversion,
        Some(Ok(ConversionOutcome::Converted { .. }))
    ));
    assert!(report.outcomes[1].conversion.is_none());
    assert!(matches!(
        report.outcomes[2].conversion,
        Some(Err(ConversionError::Failed { code: Some(1), .. }))
    ));
    assert!(matches!(
        report.outcomes[3].conversion,
        Some(Ok(ConversionOutcome::Converted { .. }))
    ));
    assert!(report.outcomes[2].artifact.as_ref().unwrap().is_file(), "input kept");

    assert_eq!(report.stats.downloaded, 3);
    assert_eq!(report.stats.already_present, 1);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.converted, 3);
    assert_eq!(report.stats.conversion_failed, 1);

    let a = fixture
        .ledger
        .get(&report.outcomes[0].cross_source_key)
        .await
        .unwrap()
        .unwrap();
    assert!(a.local_paths.contains_key("epub"));
    assert!(a.local_paths.contains_key("mobi"));
    let broken = fixture
        .ledger
        .get(&report.outcomes[2].cross_source_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(broken.download_state, DownloadState::Downloaded);
    assert!(!broken.local_paths.contains_key("mobi"));
}

#[tokio::test]
async fn test_concurrent_batches_fetch_each_work_once() {
    let server = require_mock_server!();
    Mock::given(path_regex(r"^/books/\d+\.epub$"))
        .respond_with(epub_response("book").set_delay(Duration::from_millis(20)))
        .mount(&server)
        .await;
    let fixture = Fixture::new().await;

    let batch = || -> Vec<BookCandidate> {
        (0..20)
            .flat_map(|n| {
                let urls = vec![format!("{}/books/{n}.epub", server.uri())];
                [
                    candidate(SourceTag::Gutenberg, &format!("Sketch {n}"), &urls),
                    candidate(SourceTag::Archive, &format!("Sketch {n}"), &urls),
                ]
            })
            .collect()
    };

    let first = fixture.engine(8);
    let second = fixture.engine(8);
    let (a, b) = tokio::join!(run(&first, batch()), run(&second, batch()));

    assert_eq!(a.outcomes.len(), 20);
    assert_eq!(b.outcomes.len(), 20);
    assert_eq!(a.stats.downloaded + b.stats.downloaded, 20);
    assert_eq!(a.stats.already_present + b.stats.already_present, 20);
    assert_eq!(request_paths(&server).await.len(), 20, "each work fetched once");

    let entries = fixture.ledger.scan(&LedgerFilter::all()).await.unwrap();
    assert_eq!(entries.len(), 20);
    assert!(
        entries
            .iter()
            .all(|e| e.download_state == DownloadState::Downloaded && e.attempt_count == 1)
    );
}

#[tokio::test]
async fn test_interrupt_lets_running_work_finish_and_cancels_the_rest() {
    let server = require_mock_server!();
    Mock::given(path_regex(r"^/slow/\d+\.epub$"))
        .respond_with(epub_response("slow").set_delay(Duration::from_millis(400)))
        .mount(&server)
        .await;
    let fixture = Fixture::new().await;
    let engine = fixture.engine(1);
    let candidates: Vec<BookCandidate> = (0..5)
        .map(|n| {
            candidate(
                SourceTag::Gutenberg,
                &format!("Tale {n}"),
                &[format!("{}/slow/{n}.epub", server.uri())],
            )
        })
        .collect();

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        flag.store(true, Ordering::SeqCst);
    });
    let report = engine
        .acquire_all(candidates, interrupted, None)
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 5);
    assert_eq!(report.outcomes[0].kind, OutcomeKind::Downloaded);
    assert!(report.stats.cancelled >= 3);
    assert_eq!(report.stats.downloaded + report.stats.cancelled, 5);
    assert!(report.outcomes[0].artifact.as_ref().unwrap().is_file());

    let entries = fixture.ledger.scan(&LedgerFilter::all()).await.unwrap();
    assert_eq!(entries.len(), report.stats.downloaded, "cancelled works stay unrecorded");
}

async fn fetch_lookalike_titles(concurrency: usize) {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/plain.epub"))
        .respond_with(epub_response("plain").set_delay(Duration::from_millis(30)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dotted.epub"))
        .respond_with(epub_response("dotted").set_delay(Duration::from_millis(30)))
        .mount(&server)
        .await;
    let fixture = Fixture::new().await;

    let report = run(
        &fixture.engine(concurrency),
        vec![
            candidate(
                SourceTag::Gutenberg,
                "Tom Sawyer",
                &[format!("{}/plain.epub", server.uri())],
            ),
            candidate(
                SourceTag::Gutenberg,
                "Tom Sawyer.",
                &[format!("{}/dotted.epub", server.uri())],
            ),
        ],
    )
    .await;

    assert_eq!(report.stats.downloaded, 2);
    let plain = report.outcomes[0].artifact.clone().unwrap();
    let dotted = report.outcomes[1].artifact.clone().unwrap();
    assert_ne!(plain, dotted);
    assert_eq!(std::fs::read(&plain).unwrap(), epub_body("plain"));
    assert_eq!(std::fs::read(&dotted).unwrap(), epub_body("dotted"));

    for outcome in &report.outcomes {
        let entry = fixture
            .ledger
            .get(&outcome.cross_source_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.path_for("epub"), outcome.artifact.as_deref());
    }
}

#[tokio::test]
async fn test_lookalike_titles_get_separate_files_sequentially() {
    fetch_lookalike_titles(1).await;
}

#[tokio::test]
async fn test_lookalike_titles_get_separate_files_concurrently() {
    fetch_lookalike_titles(2).await;
}

#[tokio::test]
async fn test_ledger_failure_aborts_the_batch() {
    let fixture = Fixture::new().await;
    let engine = fixture.engine(1);
    fixture.ledger.database().pool().close().await;

    let candidates: Vec<BookCandidate> = (0..3)
        .map(|n| {
            candidate(
                SourceTag::Gutenberg,
                &format!("Unreachable {n}"),
                &[format!("http://127.0.0.1:9/{n}.epub")],
            )
        })
        .collect();
    let result = engine
        .acquire_all(candidates, Arc::new(AtomicBool::new(false)), None)
        .await;

    assert!(
        matches!(result, Err(EngineError::Ledger(_))),
        "expected a ledger error, got {result:?}"
    );
    assert!(!fixture.books().exists(), "nothing written without a ledger");
}
