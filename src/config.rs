//! Settings merged from the command line and an optional TOML file
//!
//! Command-line values win over file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;

use logtap_types::LogLevel;

/// Default tracing directive when neither the file nor `RUST_LOG` sets one
const DEFAULT_LOG_FILTER: &str = "warn";

/// Contents of the config file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub min_level: Option<String>,
    pub expect: Option<String>,
    pub expect_count: Option<String>,
    pub timeout_secs: Option<u64>,
    pub log_filter: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config file {}", path.display()))
    }
}

/// Wait until `count` accepted entries at `level` or above have been seen
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountExpectation {
    pub level: LogLevel,
    pub count: i64,
}

impl CountExpectation {
    /// Parse `LEVEL:N`, e.g. `error:3`
    pub fn parse(raw: &str) -> Result<Self> {
        let Some((level, count)) = raw.split_once(':') else {
            bail!("expected LEVEL:COUNT, got '{raw}'");
        };
        let Some(level) = LogLevel::parse(level.trim()) else {
            bail!("unknown log level '{level}'");
        };
        let count = count
            .trim()
            .parse()
            .with_context(|| format!("invalid count in '{raw}'"))?;
        Ok(Self { level, count })
    }
}

/// Resolved settings for one run
#[derive(Debug)]
pub struct Settings {
    pub input: Option<PathBuf>,
    pub min_level: Option<LogLevel>,
    pub expect: Option<Regex>,
    pub expect_count: Option<CountExpectation>,
    pub timeout: Option<Duration>,
    pub log_filter: String,
}

/// Raw command-line values that overlap with the config file
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub input: Option<PathBuf>,
    pub min_level: Option<String>,
    pub expect: Option<String>,
    pub expect_count: Option<String>,
    pub timeout_secs: Option<u64>,
    pub quiet: bool,
}

impl Settings {
    pub fn resolve(cli: CliOverrides, file: FileConfig) -> Result<Self> {
        let min_level = match cli.min_level.or(file.min_level) {
            Some(raw) => match LogLevel::parse(&raw) {
                Some(level) => Some(level),
                None => bail!("unknown log level '{raw}'"),
            },
            None => None,
        };

        let expect = cli
            .expect
            .or(file.expect)
            .map(|pattern| {
                Regex::new(&pattern).with_context(|| format!("invalid expectation pattern '{pattern}'"))
            })
            .transpose()?;

        let expect_count = cli
            .expect_count
            .or(file.expect_count)
            .as_deref()
            .map(CountExpectation::parse)
            .transpose()?;

        if expect.is_some() && expect_count.is_some() {
            bail!("--expect and --expect-count cannot be combined");
        }

        let log_filter = if cli.quiet {
            "error".to_string()
        } else {
            file.log_filter
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
        };

        Ok(Self {
            input: cli.input,
            min_level,
            expect,
            expect_count,
            timeout: cli.timeout_secs.or(file.timeout_secs).map(Duration::from_secs),
            log_filter,
        })
    }
}
