use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::{Generation, StaticManifest};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub app: AppConfig,
  pub cache: CacheConfig,
  pub network: NetworkConfig,
  pub offline: OfflineConfig,
  pub storage: StorageConfig,
  pub connectivity: ConnectivityConfig,
  pub push: PushConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Origin the site is served from; same-origin responses are `basic`
  pub origin: String,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Partition name prefix, e.g. "mr-dev-tech" gives "mr-dev-tech-static-v1.0.0"
  pub prefix: String,
  pub version: String,
  /// Paths (resolved against the origin) or absolute URLs seeded at install
  pub static_assets: Vec<String>,
  /// Hosts always fetched network-first; subdomains match too
  #[serde(deserialize_with = "deserialize_lowercase_list")]
  pub api_hosts: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "mr-dev-tech".to_string(),
      version: "1.0.0".to_string(),
      static_assets: [
        "/",
        "/index.html",
        "/css/style.css",
        "/css/responsive.css",
        "/js/main.js",
        "/images/icon.png",
        "/manifest.json",
      ]
      .iter()
      .map(|s| s.to_string())
      .collect(),
      api_hosts: ["firestore.googleapis.com", "firebaseio.com", "googleapis.com"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
  }
}

fn deserialize_lowercase_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Bound on network-first fetches before falling back to cache
  pub timeout_ms: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_ms: 8000 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
  /// Bound on each remote call made while syncing
  pub sync_timeout_ms: u64,
  /// Synced actions kept after each sync
  pub retain_synced: usize,
}

impl Default for OfflineConfig {
  fn default() -> Self {
    Self {
      sync_timeout_ms: 10_000,
      retain_synced: 20,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
  /// JSON document on this machine
  #[default]
  Local,
  /// Firebase Realtime Database over REST
  Remote,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  pub backend: StorageBackend,
  /// Local catalog file (defaults to catalog.json in the data directory)
  pub path: Option<PathBuf>,
  /// Database root URL, required for the remote backend
  pub database_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// URL probed with HEAD requests (defaults to the origin)
  pub probe_url: Option<String>,
  pub interval_ms: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_url: None,
      interval_ms: 5000,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PushConfig {
  /// Endpoint receiving push subscriptions; forwarding is off when unset
  pub subscribe_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Directory for daily log files; stderr only when unset
  pub directory: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./catalog-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/catalog-sw/config.yaml
  ///
  /// Without any file the defaults are used.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("catalog-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("catalog-sw").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    // serde_yaml rejects an empty document
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    config
      .validate()
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;
    Ok(config)
  }

  /// Reject values that parse but cannot be used.
  fn validate(&self) -> Result<()> {
    if self.connectivity.interval_ms == 0 {
      return Err(eyre!("connectivity.interval_ms must be greater than 0"));
    }
    if self.network.timeout_ms == 0 {
      return Err(eyre!("network.timeout_ms must be greater than 0"));
    }
    if self.offline.sync_timeout_ms == 0 {
      return Err(eyre!("offline.sync_timeout_ms must be greater than 0"));
    }
    Ok(())
  }

  pub fn origin(&self) -> Result<Url> {
    Url::parse(&self.app.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.app.origin, e))
  }

  pub fn generation(&self) -> Generation {
    Generation::new(self.cache.prefix.clone(), self.cache.version.clone())
  }

  pub fn manifest(&self) -> Result<StaticManifest> {
    StaticManifest::new(self.origin()?, &self.cache.static_assets)
  }

  pub fn network_timeout(&self) -> Duration {
    Duration::from_millis(self.network.timeout_ms)
  }

  pub fn sync_timeout(&self) -> Duration {
    Duration::from_millis(self.offline.sync_timeout_ms)
  }

  pub fn probe_url(&self) -> Result<Url> {
    match &self.connectivity.probe_url {
      Some(url) => Url::parse(url).map_err(|e| eyre!("Invalid probe URL '{}': {}", url, e)),
      None => self.origin(),
    }
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_millis(self.connectivity.interval_ms)
  }

  /// Get the database token from the environment.
  ///
  /// Checks CATALOG_SW_DB_TOKEN. Public databases need none.
  pub fn database_token() -> Option<String> {
    std::env::var("CATALOG_SW_DB_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}
