use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::DEFAULT_BASE_URL;
use crate::dispatch::{LanesConfig, Priority};
use crate::logging::LoggingConfig;

/// Environment variable overriding `api.base_url`.
pub const API_URL_ENV: &str = "TEKCONF_API_URL";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub conferences: ConferencesConfig,
  pub lanes: LanesConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: DEFAULT_BASE_URL.to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
  /// SQLite file for the cache (default: $XDG_DATA_HOME/tekconf/cache.db)
  pub path: Option<PathBuf>,
}

/// Freshness and priority settings for conference lookups.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConferencesConfig {
  /// How long the conference list stays fresh, in seconds
  pub list_ttl_secs: u64,
  /// How long a single conference stays fresh, in seconds
  pub detail_ttl_secs: u64,
  /// Lane used for list fetches
  pub list_priority: Priority,
  /// Warm per-conference caches after each list fetch
  pub prefetch: bool,
}

impl ConferencesConfig {
  pub fn list_ttl(&self) -> Duration {
    Duration::from_secs(self.list_ttl_secs)
  }

  pub fn detail_ttl(&self) -> Duration {
    Duration::from_secs(self.detail_ttl_secs)
  }
}

impl Default for ConferencesConfig {
  fn default() -> Self {
    Self {
      list_ttl_secs: 10 * 60,
      detail_ttl_secs: 10 * 60,
      list_priority: Priority::UserInitiated,
      prefetch: true,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tekconf.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tekconf/config.yaml
  ///
  /// Falls back to defaults when no file exists. `TEKCONF_API_URL`
  /// overrides the API base URL either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Ok(url) = std::env::var(API_URL_ENV) {
      config.api.base_url = url;
    }

    Ok(config)
  }

  /// Parse configuration from YAML text.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tekconf.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tekconf").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    // An empty file means "all defaults"
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }

    serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }
}
