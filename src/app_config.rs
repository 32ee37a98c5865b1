//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Config file defaults for bookfetch; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Root folder that author folders are created under.
    pub output_dir: Option<PathBuf>,
    /// Ledger database file.
    pub database: Option<PathBuf>,
    /// Default number of works acquired in parallel (1..=32).
    pub concurrency: Option<u8>,
    /// Whole-request timeout for artifact downloads.
    pub request_timeout_secs: Option<u64>,
    /// Whole-request timeout for catalog queries.
    pub catalog_timeout_secs: Option<u64>,
    /// Format artifacts are converted into after download.
    pub convert_format: Option<String>,
    /// Converter executable (name on `PATH` or absolute path).
    pub converter_program: Option<PathBuf>,
    /// Per-invocation converter timeout.
    pub conversion_timeout_secs: Option<u64>,
    /// Default verbosity mode.
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(1..=32).contains(&concurrency)
        {
            bail!("Invalid config value for `concurrency`: {concurrency}. Expected range: 1..=32");
        }
        validate_timeout_secs("request_timeout_secs", self.request_timeout_secs)?;
        validate_timeout_secs("catalog_timeout_secs", self.catalog_timeout_secs)?;
        validate_timeout_secs("conversion_timeout_secs", self.conversion_timeout_secs)?;
        if let Some(format) = &self.convert_format
            && (format.is_empty() || !format.chars().all(|c| c.is_ascii_alphanumeric()))
        {
            bail!("Invalid config value for `convert_format`: '{format}'. Expected an extension such as \"mobi\"");
        }
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Log filter used when neither `RUST_LOG` nor a CLI flag decides.
    #[must_use]
    pub fn log_level(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Path that was consulted, if any could be resolved.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/bookfetch/config.toml`
/// 2. `$HOME/.config/bookfetch/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("bookfetch")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("bookfetch")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path (from `--config`) must exist; the default path is
/// optional and silently skipped when absent.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        if !path.exists() {
            bail!("Config file '{}' does not exist", path.display());
        }
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
        });
    }

    let path = resolve_default_config_path();
    let Some(path_ref) = path.as_deref() else {
        return Ok(LoadedConfig { path, config: None });
    };
    if !path_ref.exists() {
        return Ok(LoadedConfig { path, config: None });
    }

    let config = load_file_config(path_ref)?;
    Ok(LoadedConfig {
        path,
        config: Some(config),
    })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(invalid)?,
                ));
            }
            "database" => {
                cfg.database = Some(PathBuf::from(
                    parse_string_literal(value).with_context(invalid)?,
                ));
            }
            "concurrency" => {
                cfg.concurrency = Some(parse_integer_u8(value).with_context(invalid)?);
            }
            "request_timeout_secs" => {
                cfg.request_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "catalog_timeout_secs" => {
                cfg.catalog_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "conversion_timeout_secs" => {
                cfg.conversion_timeout_secs =
                    Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "convert_format" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.convert_format = Some(parsed.trim_start_matches('.').to_ascii_lowercase());
            }
            "converter_program" => {
                cfg.converter_program = Some(PathBuf::from(
                    parse_string_literal(value).with_context(invalid)?,
                ));
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_no}")
                })?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u8(raw_value: &str) -> Result<u8> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<u16>()?;
    u8::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u8"))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}
