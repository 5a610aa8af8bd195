use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Seconds between poll cycles while online.
  #[serde(default = "default_poll_interval")]
  pub poll_interval_secs: u64,
  /// Bound on every network request, install-time and runtime alike.
  #[serde(default = "default_request_timeout")]
  pub request_timeout_secs: u64,
  /// Seconds between connectivity probes.
  #[serde(default = "default_probe_interval")]
  pub probe_interval_secs: u64,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub synthetic: SyntheticConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the sensor API, e.g. "https://sensors.example.com"
  pub url: String,
  pub username: String,
  /// Login password; overridable via SENSORSYNC_PASSWORD.
  #[serde(default)]
  pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Active cache generation. Bumping this is the only invalidation
  /// mechanism for non-expiring entries.
  #[serde(default = "default_cache_version")]
  pub version: String,
  /// Directory for the cache database (defaults to the platform data dir).
  pub dir: Option<PathBuf>,
  /// Max entries kept in each non-sensor store (assets, images), trimmed
  /// oldest-first on insert.
  #[serde(default = "default_asset_store_limit")]
  pub asset_store_limit: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: default_cache_version(),
      dir: None,
      asset_store_limit: default_asset_store_limit(),
    }
  }
}

/// The install-time fallback series and the runtime single-point synthetic
/// reading. The exact values are a product decision, hence configurable.
#[derive(Debug, Clone, Deserialize)]
pub struct SyntheticConfig {
  /// Points of the install-time series, oldest first. Timestamps are assigned
  /// at runtime, `spacing_minutes` apart, ending at the current instant.
  #[serde(default = "default_synthetic_series")]
  pub series: Vec<SyntheticPoint>,
  #[serde(default = "default_synthetic_spacing")]
  pub spacing_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyntheticPoint {
  pub temperature: f64,
  pub humidity: f64,
}

impl Default for SyntheticConfig {
  fn default() -> Self {
    Self {
      series: default_synthetic_series(),
      spacing_minutes: default_synthetic_spacing(),
    }
  }
}

fn default_poll_interval() -> u64 {
  30
}

fn default_request_timeout() -> u64 {
  3
}

fn default_probe_interval() -> u64 {
  15
}

fn default_cache_version() -> String {
  "v1".to_string()
}

fn default_asset_store_limit() -> usize {
  64
}

fn default_synthetic_spacing() -> i64 {
  10
}

fn default_synthetic_series() -> Vec<SyntheticPoint> {
  // A short plausible indoor series so a first-ever offline launch still has
  // something to render.
  [
    (20.8, 46.0),
    (21.0, 45.5),
    (21.2, 45.0),
    (21.4, 44.5),
    (21.3, 44.8),
    (21.1, 45.2),
    (21.0, 45.0),
  ]
  .into_iter()
  .map(|(temperature, humidity)| SyntheticPoint {
    temperature,
    humidity,
  })
  .collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./sensorsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/sensorsync/config.yaml
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/sensorsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("sensorsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("sensorsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Resolve the login password: environment variable first, then config.
  pub fn password(&self) -> Result<String> {
    if let Ok(p) = std::env::var("SENSORSYNC_PASSWORD") {
      return Ok(p);
    }
    self
      .api
      .password
      .clone()
      .ok_or_else(|| eyre!("No password configured. Set SENSORSYNC_PASSWORD or api.password."))
  }

  /// Directory holding the cache database.
  pub fn cache_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.cache.dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("sensorsync"))
  }
}
