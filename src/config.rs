use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::connectivity::LinkClassifier;
use crate::queue::DEFAULT_MAX_RETRIES;

/// Environment variable overriding `api.base_url`.
pub const API_URL_ENV: &str = "RECIPE_OFFLINE_API_URL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
  /// Reachability probe; disabled when absent
  pub probe: Option<ProbeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:3000/api/".to_string(),
      request_timeout_secs: default_request_timeout_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Failed replays before an operation is left alone
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_retries: default_max_retries(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_ttl_hours")]
  pub default_ttl_hours: f64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_ttl_hours: default_ttl_hours(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite file (default: $XDG_DATA_HOME/recipe-offline/offline.db)
  pub path: Option<PathBuf>,
  /// Keep everything in memory; nothing survives a restart
  #[serde(default)]
  pub in_memory: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
  /// Link types treated as free bandwidth (case-insensitive)
  #[serde(default = "default_unmetered_types")]
  pub unmetered_types: Vec<String>,
  /// Link types that cost the user data (case-insensitive)
  #[serde(default = "default_metered_types")]
  pub metered_types: Vec<String>,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      unmetered_types: default_unmetered_types(),
      metered_types: default_metered_types(),
    }
  }
}

impl ConnectivityConfig {
  pub fn classifier(&self) -> LinkClassifier {
    LinkClassifier::new(&self.unmetered_types, &self.metered_types)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
  pub url: String,
  #[serde(default = "default_probe_interval_secs")]
  pub interval_secs: u64,
  /// Link type reported while the probe succeeds
  #[serde(default = "default_probe_link_type")]
  pub link_type: String,
}

fn default_request_timeout_secs() -> u64 {
  15
}

fn default_max_retries() -> u32 {
  DEFAULT_MAX_RETRIES
}

fn default_ttl_hours() -> f64 {
  2.0
}

fn default_unmetered_types() -> Vec<String> {
  vec!["wifi".into(), "ethernet".into(), "wimax".into()]
}

fn default_metered_types() -> Vec<String> {
  vec!["cellular".into(), "bluetooth".into()]
}

fn default_probe_interval_secs() -> u64 {
  30
}

fn default_probe_link_type() -> String {
  "wifi".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./recipe-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/recipe-offline/config.yaml
  ///
  /// Falls back to defaults when no file is found. `RECIPE_OFFLINE_API_URL`
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

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("recipe-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("recipe-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    url::Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {}: {}", self.api.base_url, e))?;

    let ttl = self.cache.default_ttl_hours;
    if !ttl.is_finite() || ttl <= 0.0 {
      return Err(eyre!("cache.default_ttl_hours must be positive, got {}", ttl));
    }

    if let Some(probe) = &self.probe {
      url::Url::parse(&probe.url).map_err(|e| eyre!("Invalid probe.url {}: {}", probe.url, e))?;
      if probe.interval_secs == 0 {
        return Err(eyre!("probe.interval_secs must be at least 1"));
      }
    }

    Ok(())
  }
}
