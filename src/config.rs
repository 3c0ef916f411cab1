use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{CatalogSettings, Language};
use crate::retry::{RetryPolicy, DEFAULT_DELAYS_MS};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  #[serde(default)]
  pub languages: LanguagesConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub local: LocalConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
  /// Project URL, e.g. https://xyz.supabase.co
  pub url: String,
  pub records_table: String,
  pub translations_table: String,
  /// Per-request timeout
  pub timeout_secs: u64,
}

impl Default for BackendConfig {
  fn default() -> Self {
    Self {
      url: String::new(),
      records_table: "whiskies".to_string(),
      translations_table: "whisky_translations".to_string(),
      timeout_secs: 15,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LanguagesConfig {
  /// Language the canonical records are written in
  pub base: Language,
  pub fallback_order: Vec<Language>,
}

impl Default for LanguagesConfig {
  fn default() -> Self {
    Self {
      base: Language::Tr,
      fallback_order: Language::ALL.to_vec(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self { ttl_secs: 300 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  /// Wait before each retry; its length is the retry count
  pub delays_ms: Vec<u64>,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      delays_ms: DEFAULT_DELAYS_MS.to_vec(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
  /// Where the local database image and logs live (default: platform data dir)
  pub data_dir: Option<PathBuf>,
  /// File stem of the database image
  pub storage_key: String,
}

impl Default for LocalConfig {
  fn default() -> Self {
    Self {
      data_dir: None,
      storage_key: "dramsync_local_db".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./dramsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/dramsync/config.yaml
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
        "No configuration file found. Create one at ~/.config/dramsync/config.yaml\n\
         containing at least:\n\n  backend:\n    url: https://<project>.supabase.co"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("dramsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("dramsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.backend.url.trim().is_empty() {
      return Err(eyre!("backend.url is required"));
    }
    if config.cache.ttl_secs == 0 {
      return Err(eyre!("cache.ttl_secs must be positive"));
    }
    Ok(config)
  }

  /// Get the backend API key from environment variables.
  ///
  /// Checks DRAMSYNC_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("DRAMSYNC_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!("API key not found. Set DRAMSYNC_API_KEY or SUPABASE_ANON_KEY environment variable.")
      })
  }

  /// Directory for the local database image and log files.
  pub fn data_dir(&self) -> Result<PathBuf> {
    match &self.local.data_dir {
      Some(dir) => Ok(dir.clone()),
      None => dirs::data_dir()
        .map(|d| d.join("dramsync"))
        .ok_or_else(|| eyre!("Could not determine data directory")),
    }
  }

  pub fn catalog_settings(&self) -> CatalogSettings {
    CatalogSettings {
      base: self.languages.base,
      fallback_order: self.languages.fallback_order.clone(),
      ttl: Duration::from_secs(self.cache.ttl_secs),
      retry: RetryPolicy::from_millis(&self.retry.delays_ms),
    }
  }
}
