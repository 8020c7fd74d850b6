//! Opt-in tracing setup for applications embedding this crate.
//!
//! The library only emits `tracing` events. Hosts without their own
//! subscriber can call [`init`] to write them to a daily rolling file.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
  /// Directory for log files (default: $XDG_DATA_HOME/tekconf/logs)
  pub directory: Option<PathBuf>,
  /// Filter directives, e.g. `info,tekconf_client=debug`. `RUST_LOG` wins.
  pub filter: String,
  pub file_prefix: String,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      directory: None,
      filter: "info".to_string(),
      file_prefix: "tekconf.log".to_string(),
    }
  }
}

impl LoggingConfig {
  fn resolve_directory(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.directory {
      return Ok(dir.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;
    Ok(data_dir.join("tekconf").join("logs"))
  }

  fn env_filter(&self) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
      Ok(filter) => Ok(filter),
      Err(_) => EnvFilter::try_new(&self.filter)
        .map_err(|e| eyre!("Invalid log filter '{}': {}", self.filter, e)),
    }
  }
}

/// Install a global subscriber writing to a rolling log file.
///
/// Keep the returned guard alive for as long as logs should be flushed.
pub fn init(config: &LoggingConfig) -> Result<WorkerGuard> {
  let directory = config.resolve_directory()?;
  std::fs::create_dir_all(&directory)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", directory.display(), e))?;

  let appender = tracing_appender::rolling::daily(&directory, &config.file_prefix);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(config.env_filter()?)
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}
