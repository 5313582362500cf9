use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Agent configuration.
///
/// Built once at startup and shared read-only with the worker; nothing in
/// here changes while the agent is running.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Application name used as the cache partition prefix
  pub app: String,
  /// Deployed version; a new value means new partitions
  pub version: String,
  /// Upstream origin that relative paths resolve against
  pub origin: String,
  /// Address the HTTP front door listens on
  pub listen: String,
  /// Assets that must always be resolvable from the static partition
  pub static_assets: Vec<String>,
  /// Root document served to navigations when offline
  pub shell_path: String,
  pub sync: SyncConfig,
  pub notification: NotificationConfig,
  /// SQLite database path (defaults to the user data directory)
  pub cache_db: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// The only sync tag acted on
  pub tag: String,
  /// Remote endpoint pending payloads are POSTed to
  pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  /// Body used when a push carries no text
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  /// Vibration pattern in milliseconds
  pub vibrate: Vec<u32>,
  /// Navigation target attached to every notification
  pub url: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      app: "wavemart-vms".to_string(),
      version: "v1.0.0".to_string(),
      origin: "http://127.0.0.1:8080/".to_string(),
      listen: "127.0.0.1:8787".to_string(),
      static_assets: vec![
        "./".to_string(),
        "./index.html".to_string(),
        "./manifest.json".to_string(),
        "./icons/icon-192x192.png".to_string(),
        "./icons/icon-512x512.png".to_string(),
      ],
      shell_path: "./index.html".to_string(),
      sync: SyncConfig::default(),
      notification: NotificationConfig::default(),
      cache_db: None,
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "vendor-data-sync".to_string(),
      endpoint: "/api/vendor/sync".to_string(),
    }
  }
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Wavemart VMS".to_string(),
      default_body: "New vendor system notification".to_string(),
      icon: "./icons/icon-192x192.png".to_string(),
      badge: "./icons/icon-96x96.png".to_string(),
      vibrate: vec![200, 100, 200],
      url: "./".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("swcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swcache").join("config.yaml");
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
    if self.app.is_empty() || self.version.is_empty() {
      return Err(eyre!("Both `app` and `version` must be non-empty"));
    }
    self.origin_url()?;
    for asset in &self.static_assets {
      self.resolve(asset)?;
    }
    Ok(())
  }

  /// Parsed upstream origin.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a path relative to the origin (`./index.html`, `/api/x`, ...).
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Cannot resolve '{}' against {}: {}", path, self.origin, e))
  }

  pub fn cache_names(&self) -> CacheNames {
    CacheNames::new(&self.app, &self.version)
  }

  /// Database path: explicit `cache_db` or `<data_dir>/swcache/cache.db`.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache_db {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("swcache").join("cache.db"))
  }
}

/// Version-tagged partition names for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
  /// `<app>-<version>`, also the version reported to clients
  pub primary: String,
  /// `<app>-static-<version>`
  pub static_name: String,
  /// `<app>-dynamic-<version>`
  pub dynamic: String,
  /// `<app>-dynamic-<version>-images`
  pub dynamic_images: String,
}

impl CacheNames {
  pub fn new(app: &str, version: &str) -> Self {
    let dynamic = format!("{}-dynamic-{}", app, version);
    Self {
      primary: format!("{}-{}", app, version),
      static_name: format!("{}-static-{}", app, version),
      dynamic_images: format!("{}-images", dynamic),
      dynamic,
    }
  }

  /// Whether a partition belongs to this version. Everything else is stale.
  pub fn is_current(&self, name: &str) -> bool {
    name == self.primary
      || name == self.static_name
      || name == self.dynamic
      || name == self.dynamic_images
  }
}
