//! Conversion of downloaded artifacts into a target reading format.
//!
//! Conversion is delegated to an external program behind the [`Converter`]
//! trait. [`ConversionPipeline`] adds the policy around it: a hard timeout,
//! a list of input formats never converted, and reuse of outputs that
//! already exist. The input artifact is never deleted.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Default wall-clock limit for one conversion.
pub const DEFAULT_CONVERSION_TIMEOUT: Duration = Duration::from_secs(120);

/// Default external converter.
pub const DEFAULT_CONVERTER_PROGRAM: &str = "ebook-convert";

/// Default target format.
pub const DEFAULT_TARGET_FORMAT: &str = "mobi";

/// Input formats skipped unless configured otherwise.
pub const DEFAULT_SKIP_FORMATS: &[&str] = &["pdf"];

/// Longest stderr excerpt kept in a [`ConversionError::Failed`].
const STDERR_EXCERPT_CHARS: usize = 500;

/// How a converter process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterExit {
    pub success: bool,
    pub code: Option<i32>,
    pub stderr: String,
}

/// An external program turning one file into another.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Program name, for diagnostics.
    fn name(&self) -> &str;

    /// Converts `input` into `output`, waiting for the process to exit.
    ///
    /// Dropping the returned future must stop the process.
    async fn run(&self, input: &Path, output: &Path) -> std::io::Result<ConverterExit>;
}

/// Calibre's `ebook-convert` with Kindle output settings.
#[derive(Debug, Clone)]
pub struct EbookConvert {
    program: PathBuf,
    program_name: String,
}

impl EbookConvert {
    #[must_use]
    pub fn new() -> Self {
        Self::with_program(DEFAULT_CONVERTER_PROGRAM)
    }

    /// Uses `program` instead of `ebook-convert` from `PATH`.
    #[must_use]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let program_name = program.display().to_string();
        Self {
            program,
            program_name,
        }
    }
}

impl Default for EbookConvert {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Converter for EbookConvert {
    fn name(&self) -> &str {
        &self.program_name
    }

    async fn run(&self, input: &Path, output: &Path) -> std::io::Result<ConverterExit> {
        let result = Command::new(&self.program)
            .arg(input)
            .arg(output)
            .args([
                "--output-profile=kindle",
                "--no-inline-toc",
                "--max-toc-links=0",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(ConverterExit {
            success: result.status.success(),
            code: result.status.code(),
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
        })
    }
}

/// Errors from one conversion. Never fatal for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// The converter could not be started.
    #[error(
        "could not start converter '{program}': {message}\n  Suggestion: Install Calibre or set converter_program in the config file"
    )]
    Spawn { program: String, message: String },

    /// The converter exited unsuccessfully.
    #[error("converter failed on {input} (exit code {code:?}): {stderr}")]
    Failed {
        input: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    /// The converter did not finish in time and was killed.
    #[error(
        "conversion of {input} timed out after {seconds}s\n  Suggestion: Raise conversion_timeout_secs for very large books"
    )]
    Timeout { input: PathBuf, seconds: u64 },

    /// The converter reported success but wrote nothing.
    #[error("converter reported success but {output} was not created")]
    OutputMissing { output: PathBuf },
}

/// Result of a conversion request that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// A new file was written.
    Converted { output: PathBuf },
    /// The output already existed and was left untouched.
    Reused { output: PathBuf },
    /// The input is not converted (already in target format, or excluded).
    Skipped { reason: String },
}

impl ConversionOutcome {
    /// Output path for `Converted` and `Reused`.
    #[must_use]
    pub fn output(&self) -> Option<&Path> {
        match self {
            Self::Converted { output } | Self::Reused { output } => Some(output),
            Self::Skipped { .. } => None,
        }
    }
}

/// Converter plus timeout and skip policy.
#[derive(Clone)]
pub struct ConversionPipeline {
    converter: Arc<dyn Converter>,
    timeout: Duration,
    skip_formats: Vec<String>,
}

impl std::fmt::Debug for ConversionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionPipeline")
            .field("converter", &self.converter.name())
            .field("timeout", &self.timeout)
            .field("skip_formats", &self.skip_formats)
            .finish()
    }
}

impl ConversionPipeline {
    /// Pipeline with the default timeout and skip list.
    #[must_use]
    pub fn new(converter: Arc<dyn Converter>) -> Self {
        Self {
            converter,
            timeout: DEFAULT_CONVERSION_TIMEOUT,
            skip_formats: DEFAULT_SKIP_FORMATS.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the list of input extensions that are never converted.
    #[must_use]
    pub fn with_skip_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_formats = formats
            .into_iter()
            .map(|f| f.into().to_ascii_lowercase())
            .collect();
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Converts `input` into a sibling file with extension `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError`] on spawn failure, non-zero exit, timeout,
    /// or a missing output file. Any partial output is removed; the input
    /// is kept in every case.
    #[instrument(skip(self), fields(input = %input.display()))]
    pub async fn convert(
        &self,
        input: &Path,
        target: &str,
    ) -> Result<ConversionOutcome, ConversionError> {
        let target = target.trim_start_matches('.').to_ascii_lowercase();
        let source_format = input
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if source_format == target {
            return Ok(ConversionOutcome::Skipped {
                reason: format!("already {target}"),
            });
        }
        if self.skip_formats.contains(&source_format) {
            debug!(format = %source_format, "format excluded from conversion");
            return Ok(ConversionOutcome::Skipped {
                reason: format!("{source_format} inputs are not converted"),
            });
        }

        let output = input.with_extension(&target);
        if output.is_file() {
            debug!(output = %output.display(), "reusing existing conversion");
            return Ok(ConversionOutcome::Reused { output });
        }

        let run = tokio::time::timeout(self.timeout, self.converter.run(input, &output)).await;
        let result = match run {
            Err(_elapsed) => Err(ConversionError::Timeout {
                input: input.to_path_buf(),
                seconds: self.timeout.as_secs(),
            }),
            Ok(Err(error)) => Err(ConversionError::Spawn {
                program: self.converter.name().to_string(),
                message: error.to_string(),
            }),
            Ok(Ok(exit)) if !exit.success => Err(ConversionError::Failed {
                input: input.to_path_buf(),
                code: exit.code,
                stderr: stderr_excerpt(&exit.stderr),
            }),
            Ok(Ok(_)) if !output.is_file() => Err(ConversionError::OutputMissing {
                output: output.clone(),
            }),
            Ok(Ok(_)) => Ok(ConversionOutcome::Converted {
                output: output.clone(),
            }),
        };

        match &result {
            Ok(_) => info!(output = %output.display(), "converted"),
            Err(error) => {
                warn!(error = %error, "conversion failed");
                if output.exists() {
                    let _ = tokio::fs::remove_file(&output).await;
                }
            }
        }
        result
    }
}

/// Last few hundred characters of stderr, where converters print the cause.
fn stderr_excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - STDERR_EXCERPT_CHARS).collect()
}
