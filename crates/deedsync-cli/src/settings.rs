use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use deedsync_core::EngineConfig;
use deedsync_remote::{RemoteConfig, SessionCredential};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Contents of the `--config` YAML file. Both sections are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub engine: EngineConfig,
    pub remote: RemoteConfig,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub request_delay_ms: Option<u64>,
    pub registration_year: Option<i32>,
    pub not_found_threshold: Option<u32>,
}

impl FileConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(base_url) = &overrides.base_url {
            self.remote.base_url.clone_from(base_url);
        }
        if let Some(delay) = overrides.request_delay_ms {
            self.engine.request_delay_ms = delay;
        }
        if let Some(year) = overrides.registration_year {
            self.engine.registration_year = year;
        }
        if let Some(threshold) = overrides.not_found_threshold {
            self.engine.not_found_threshold = threshold;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.not_found_threshold == 0 {
            bail!("engine.not_found_threshold must be at least 1");
        }
        if self.engine.floor_run_length == 0 {
            bail!("engine.floor_run_length must be at least 1");
        }
        if self.engine.max_consecutive_failures == 0 {
            bail!("engine.max_consecutive_failures must be at least 1");
        }
        if self.engine.max_doc_number == 0 {
            bail!("engine.max_doc_number must be at least 1");
        }
        if self.remote.not_found_sentinel.trim().is_empty() {
            bail!("remote.not_found_sentinel must not be empty");
        }
        Ok(())
    }
}

/// A session file wins over an inline token so a rotated file is always honoured.
pub fn credential(inline: Option<&str>, file: Option<&PathBuf>) -> Result<SessionCredential> {
    match (file, inline) {
        (Some(path), _) => Ok(SessionCredential::File(path.clone())),
        (None, Some(token)) => Ok(SessionCredential::Inline(token.to_string())),
        (None, None) => Err(anyhow!(
            "no registry session: pass --session-file or --session (or DEEDSYNC_SESSION_FILE / DEEDSYNC_SESSION)"
        )),
    }
}

/// Human-readable logs go to stderr; stdout carries only the JSON result.
///
/// An explicit level wins; otherwise `RUST_LOG` applies, falling back to `info`.
pub fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .map_err(|err| anyhow!("invalid log level {level:?}: {err}"))?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_LEVEL))
            .map_err(|err| anyhow!("invalid RUST_LOG filter: {err}"))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("failed to initialise logging: {err}"))
}
