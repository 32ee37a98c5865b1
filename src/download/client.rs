//! HTTP client wrapper for fetching book artifacts.
//!
//! This module provides the `HttpClient` struct which performs one GET per
//! candidate URL, rejects error pages and stubs, and streams accepted bodies
//! into a `.part` file that is renamed into place only once complete.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, ClientBuilder};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, MIN_ARTIFACT_BYTES, REQUEST_TIMEOUT_SECS};
use super::error::FetchError;
use super::filename::{is_html_content_type, partial_path, resolve_extension};
use crate::catalog::with_env_proxies;
use crate::user_agent;

/// HTTP client for artifact downloads.
///
/// Created once per engine and shared by every task for connection pooling.
///
/// # Example
///
/// ```no_run
/// use bookfetch_core::download::HttpClient;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new()?;
/// let artifact = client
///     .fetch_artifact(
///         "https://www.gutenberg.org/ebooks/76.epub3.images",
///         Path::new("./books/Mark Twain"),
///         "Mark Twain - Adventures of Huckleberry Finn",
///     )
///     .await?;
/// println!("saved {} ({})", artifact.path.display(), artifact.format);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    min_artifact_bytes: u64,
}

/// A complete artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub path: PathBuf,
    /// Extension the file was saved with.
    pub format: String,
    pub bytes: u64,
    /// Lower-case hex SHA-256 of the body.
    pub sha256: String,
}

/// HTTP client construction failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to build download HTTP client: {0}")]
pub struct ClientBuildError(String);

impl HttpClient {
    /// Creates a client with the default 30 s request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] when the TLS or proxy setup fails.
    pub fn new() -> Result<Self, ClientBuildError> {
        Self::with_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    /// Creates a client whose requests (headers and body) must finish
    /// within `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] when the TLS or proxy setup fails.
    pub fn with_timeout(request_timeout: Duration) -> Result<Self, ClientBuildError> {
        let client = build_client(request_timeout)?;
        Ok(Self {
            client,
            min_artifact_bytes: MIN_ARTIFACT_BYTES,
        })
    }

    /// Overrides the minimum accepted body size.
    #[must_use]
    pub fn with_min_artifact_bytes(mut self, bytes: u64) -> Self {
        self.min_artifact_bytes = bytes;
        self
    }

    /// Fetches `url` into `<dest_dir>/<stem>.<ext>`.
    ///
    /// `ext` is taken from the response content type, falling back to the
    /// URL. The body is written to `<file>.part` and renamed on success, so
    /// a failed or interrupted transfer never leaves a torn artifact.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if:
    /// - The URL is invalid
    /// - The request fails or times out
    /// - The server returns an error status (4xx, 5xx)
    /// - The body is an HTML page or smaller than the minimum size
    /// - Writing to disk fails
    #[instrument(skip(self, dest_dir, stem), fields(url = %url))]
    pub async fn fetch_artifact(
        &self,
        url: &str,
        dest_dir: &Path,
        stem: &str,
    ) -> Result<FetchedArtifact, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::invalid_url(url));
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(url, status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if content_type.as_deref().is_some_and(is_html_content_type) {
            return Err(FetchError::NotABook {
                url: url.to_string(),
            });
        }

        let declared_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let Some(bytes) = declared_length
            && bytes < self.min_artifact_bytes
        {
            return Err(self.too_small(url, bytes));
        }

        let format = resolve_extension(content_type.as_deref(), url);
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| FetchError::io(dest_dir, &e))?;
        let final_path = dest_dir.join(format!("{stem}.{format}"));
        let part_path = partial_path(&final_path);
        debug!(path = %final_path.display(), %format, "streaming artifact");

        let mut file = File::create(&part_path)
            .await
            .map_err(|e| FetchError::io(&part_path, &e))?;
        let streamed = stream_to_file(&mut file, response, url, &part_path).await;
        drop(file);

        let (bytes, sha256) = match streamed {
            Ok(result) => result,
            Err(error) => {
                debug!(path = %part_path.display(), "cleaning up partial file after error");
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(error);
            }
        };

        if bytes < self.min_artifact_bytes {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(self.too_small(url, bytes));
        }

        if let Err(error) = tokio::fs::rename(&part_path, &final_path).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(FetchError::io(&final_path, &error));
        }

        info!(path = %final_path.display(), bytes, "artifact saved");
        Ok(FetchedArtifact {
            path: final_path,
            format: format.to_string(),
            bytes,
            sha256,
        })
    }

    fn too_small(&self, url: &str, bytes: u64) -> FetchError {
        FetchError::TooSmall {
            url: url.to_string(),
            bytes,
            minimum: self.min_artifact_bytes,
        }
    }
}

/// Streams the response body to `file`, returning the byte count and hash.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<(u64, String), FetchError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut hasher = Sha256::new();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| FetchError::from_reqwest(url, &e))?;
        hasher.update(&chunk);
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| FetchError::io(file_path, &e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| FetchError::io(file_path, &e))?;

    Ok((bytes_written, format!("{:x}", hasher.finalize())))
}

fn build_client(request_timeout: Duration) -> Result<Client, ClientBuildError> {
    let attempt = |env_only_proxy: bool| {
        catch_unwind(AssertUnwindSafe(move || {
            let mut builder = base_client_builder(request_timeout);
            if env_only_proxy {
                builder = with_env_proxies(builder.no_proxy());
            }
            builder.build()
        }))
    };

    match attempt(false) {
        Ok(built) => built.map_err(|e| ClientBuildError(e.to_string())),
        Err(_) => {
            warn!(
                "HTTP client builder panicked while loading system proxy settings; retrying with env-proxy fallback"
            );
            match attempt(true) {
                Ok(built) => built.map_err(|e| ClientBuildError(e.to_string())),
                Err(_) => Err(ClientBuildError(
                    "client builder panicked while applying env-proxy fallback".to_string(),
                )),
            }
        }
    }
}

fn base_client_builder(request_timeout: Duration) -> ClientBuilder {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(request_timeout))
        .timeout(request_timeout)
        .gzip(true)
        .user_agent(user_agent::download_user_agent())
}
