//! Runner configuration.
//!
//! Values are layered: compiled-in defaults, then an optional TOML file, then
//! environment variables / command-line flags (applied by `main.rs` through
//! [`Overrides`]). [`RunnerConfig::validate`] runs before anything starts.

use std::net::{Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Default port of the status server.
pub const DEFAULT_PORT: u16 = 3000;

/// Default executable invoked for each ingestion run.
pub const DEFAULT_INGEST_COMMAND: &str = "pipermail-fetch";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("you must specify the {0:?} setting")]
    Missing(&'static str),

    #[error("{name} must be at least 1")]
    NotPositive { name: &'static str },

    #[error("failed to load config file {path}: {reason}")]
    File { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Root configuration for the runner process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Archive root the ingestor reads from.
    pub source: Option<String>,
    /// Storage location for ingested content and the run log.
    pub database: Option<String>,
    /// Remote error-tracking endpoint; reporting stays local when unset.
    pub error_tracker_url: Option<String>,
    /// Fixed number of months per run instead of the calendar heuristic.
    pub months: Option<u32>,
    /// Months fetched concurrently by the ingestor.
    pub parallel: Option<u32>,
    pub port: u16,
    pub ingest_command: String,
    pub log_format: LogFormat,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            source: None,
            database: None,
            error_tracker_url: None,
            months: None,
            parallel: None,
            port: DEFAULT_PORT,
            ingest_command: DEFAULT_INGEST_COMMAND.to_string(),
            log_format: LogFormat::Text,
        }
    }
}

/// Settings supplied on the command line or through the environment.
/// Every `Some` replaces the file/default value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub source: Option<String>,
    pub database: Option<String>,
    pub error_tracker_url: Option<String>,
    pub months: Option<u32>,
    pub parallel: Option<u32>,
    pub port: Option<u16>,
    pub ingest_command: Option<String>,
    pub log_format: Option<LogFormat>,
}

/// A configuration that passed [`RunnerConfig::validate`].
#[derive(Debug, Clone)]
pub struct ValidConfig {
    pub source: String,
    pub database: String,
    pub error_tracker_url: Option<String>,
    pub months: Option<NonZeroU32>,
    pub parallel: Option<NonZeroU32>,
    pub port: u16,
    pub ingest_command: String,
    pub log_format: LogFormat,
}

impl RunnerConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let parsed = std::fs::read_to_string(path)
            .context("failed to read file")
            .and_then(|content| toml::from_str::<Self>(&content).context("failed to parse TOML"));
        match parsed {
            Ok(config) => {
                info!(path = %path.display(), "loaded runner configuration");
                Ok(config)
            }
            Err(e) => Err(ConfigError::File {
                path: path.to_path_buf(),
                reason: format!("{e:#}"),
            }),
        }
    }

    /// Defaults, or the file at `path` when one is given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn apply(mut self, overrides: Overrides) -> Self {
        if overrides.source.is_some() {
            self.source = overrides.source;
        }
        if overrides.database.is_some() {
            self.database = overrides.database;
        }
        if overrides.error_tracker_url.is_some() {
            self.error_tracker_url = overrides.error_tracker_url;
        }
        if overrides.months.is_some() {
            self.months = overrides.months;
        }
        if overrides.parallel.is_some() {
            self.parallel = overrides.parallel;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(command) = overrides.ingest_command {
            self.ingest_command = command;
        }
        if let Some(format) = overrides.log_format {
            self.log_format = format;
        }
        self
    }

    /// Check required values and ranges. Empty strings count as missing.
    pub fn validate(self) -> Result<ValidConfig, ConfigError> {
        let source = required(self.source, "source")?;
        let database = required(self.database, "database")?;
        let months = positive(self.months, "months")?;
        let parallel = positive(self.parallel, "parallel")?;
        if self.ingest_command.trim().is_empty() {
            return Err(ConfigError::Missing("ingest_command"));
        }

        Ok(ValidConfig {
            source,
            database,
            error_tracker_url: self.error_tracker_url.filter(|url| !url.trim().is_empty()),
            months,
            parallel,
            port: self.port,
            ingest_command: self.ingest_command,
            log_format: self.log_format,
        })
    }
}

impl ValidConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    /// Database location with any credentials stripped, for display.
    pub fn sanitized_database(&self) -> &str {
        sanitize_location(&self.database)
    }
}

/// Drop everything up to and including the last `@` (`user:pass@host/db`).
pub fn sanitize_location(location: &str) -> &str {
    match location.rfind('@') {
        Some(at) => &location[at + 1..],
        None => location,
    }
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn positive(value: Option<u32>, name: &'static str) -> Result<Option<NonZeroU32>, ConfigError> {
    match value {
        None => Ok(None),
        Some(n) => NonZeroU32::new(n)
            .map(Some)
            .ok_or(ConfigError::NotPositive { name }),
    }
}
