use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::cache::{CacheStorage, NoopStorage, SqliteStorage};
use crate::db::SqliteMarketStore;
use crate::market::{ReconcilerConfig, TrustPolicy, TtlPolicy, WalletPolicy};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub database: DatabaseConfig,
  pub cache: CacheConfig,
  pub reconciler: ReconcilerConfig,
  pub trust: TrustPolicy,
  pub wallet: WalletPolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
  /// Marketplace database (defaults to the data directory)
  pub path: Option<PathBuf>,
}

impl DatabaseConfig {
  pub fn resolve_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(path) => Ok(path.clone()),
      None => SqliteMarketStore::default_path(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Set to false to always read through to the database
  pub enabled: bool,
  pub path: Option<PathBuf>,
  pub ttl: TtlPolicy,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      ttl: TtlPolicy::default(),
    }
  }
}

impl CacheConfig {
  /// Open the configured cache backend.
  ///
  /// A cache that can't be opened is replaced by one that stores nothing.
  pub fn open_storage(&self) -> Arc<dyn CacheStorage> {
    if !self.enabled {
      return Arc::new(NoopStorage);
    }

    let opened = match &self.path {
      Some(path) => SqliteStorage::open(path),
      None => SqliteStorage::default_path().and_then(|path| SqliteStorage::open(&path)),
    };

    match opened {
      Ok(storage) => Arc::new(storage),
      Err(e) => {
        warn!("Cache unavailable, continuing without it: {}", e);
        Arc::new(NoopStorage)
      }
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./societyshare.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/societyshare/config.yaml
  ///
  /// Without a config file every setting takes its default.
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
    // Check current directory
    let local = PathBuf::from("societyshare.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("societyshare").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    // An empty file is a valid, all-default config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }

    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_defaults() {
    let config = Config::parse("").unwrap();
    assert!(config.cache.enabled);
    assert_eq!(config.cache.ttl.short_secs, 120);
    assert_eq!(config.reconciler.interval_secs, 60);
    assert_eq!(config.reconciler.expiring_window_mins, 120);
    assert_eq!(config.trust.baseline, 100);
    assert_eq!(config.trust.fallback, 80);
    assert_eq!(config.wallet.starting_balance, 5000);
    assert_eq!(config.database.path, None);
  }

  #[test]
  fn test_partial_sections_keep_other_defaults() {
    let config = Config::parse(
      r#"
database:
  path: /tmp/market.db
cache:
  enabled: false
  ttl:
    short_secs: 30
reconciler:
  expiring_window_mins: 30
trust:
  baseline: 90
"#,
    )
    .unwrap();

    assert_eq!(config.database.resolve_path().unwrap(), PathBuf::from("/tmp/market.db"));
    assert!(!config.cache.enabled);
    assert_eq!(config.cache.ttl.short_secs, 30);
    assert_eq!(config.cache.ttl.long_secs, 1800);
    assert_eq!(config.reconciler.interval_secs, 60);
    assert_eq!(config.reconciler.expiring_window_mins, 30);
    assert_eq!(config.trust.baseline, 90);
    assert_eq!(config.trust.late_penalty_per_day, 10);
    assert_eq!(config.wallet.insurance_fee, 9);
  }

  #[test]
  fn test_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "wallet:\n  starting_balance: 2500").unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.wallet.starting_balance, 2500);

    let missing = file.path().with_extension("missing.yaml");
    assert!(Config::load(Some(&missing)).is_err());
  }

  #[test]
  fn test_invalid_yaml_is_an_error() {
    assert!(Config::parse("reconciler: [1, 2").is_err());
    assert!(Config::parse("trust:\n  fallback: -1").is_err());
  }

  #[test]
  fn test_disabled_cache_stores_nothing() {
    let config = CacheConfig {
      enabled: false,
      ..CacheConfig::default()
    };
    let storage = config.open_storage();
    storage.put("k", "v").unwrap();
    assert_eq!(storage.get("k").unwrap(), None);
  }
}
