use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::SqliteStorage;

/// Assets pinned in the install manifest when no config file lists them.
const DEFAULT_MANIFEST: &[&str] = &[
  "/",
  "/index.html",
  "/style.css",
  "/script.js",
  "/manifest.json",
  "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/css/all.min.css",
  "https://cdnjs.cloudflare.com/ajax/libs/three.js/r128/three.min.js",
  "https://cdnjs.cloudflare.com/ajax/libs/gsap/3.12.2/gsap.min.js",
  "https://cdnjs.cloudflare.com/ajax/libs/particles.js/2.0.0/particles.min.js",
  "https://cdnjs.cloudflare.com/ajax/libs/Chart.js/3.9.1/chart.min.js",
  "https://cdnjs.cloudflare.com/ajax/libs/qrcode/1.5.3/qrcode.min.js",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Site origin that root-relative manifest entries resolve against
  pub origin: String,
  /// Cache generation name. Bump it whenever a manifest entry changes.
  #[serde(default = "default_cache_name")]
  pub cache_name: String,
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
  /// Document served for navigations when both cache and network fail
  #[serde(default = "default_fallback_document")]
  pub fallback_document: String,
  /// Cache database path (defaults to $XDG_DATA_HOME/devcard-shell/cache.db)
  pub database: Option<PathBuf>,
  pub user_agent: Option<String>,
}

fn default_cache_name() -> String {
  "devcard-v1.0".to_string()
}

fn default_manifest() -> Vec<String> {
  DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect()
}

fn default_fallback_document() -> String {
  "/index.html".to_string()
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080/".to_string(),
      cache_name: default_cache_name(),
      manifest: default_manifest(),
      fallback_document: default_fallback_document(),
      database: None,
      user_agent: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./devcard-shell.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/devcard-shell/config.yaml
  /// 4. Built-in defaults
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
      None => {
        tracing::info!("no config file found, using built-in defaults");
        Self::default()
      }
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("devcard-shell.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("devcard-shell").join("config.yaml");
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
    if self.cache_name.trim().is_empty() {
      return Err(eyre!("cache_name must not be empty"));
    }
    let origin = self.origin()?;
    for entry in &self.manifest {
      origin
        .join(entry)
        .map_err(|e| eyre!("Invalid manifest entry '{}': {}", entry, e))?;
    }
    Ok(())
  }

  pub fn origin(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Cache database path, explicit or default.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(p) => Ok(p.clone()),
      None => SqliteStorage::default_path(),
    }
  }
}

/// Per-user data directory holding the cache database and the log file.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("devcard-shell"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_mirror_site() {
    let config = Config::default();
    assert_eq!(config.cache_name, "devcard-v1.0");
    assert_eq!(config.fallback_document, "/index.html");
    assert_eq!(config.manifest.len(), 11);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_yaml_fills_missing_fields() {
    let config = Config::from_yaml(
      "origin: https://devcard.example/\ncache_name: devcard-v2.0\n",
    )
    .unwrap();
    assert_eq!(config.cache_name, "devcard-v2.0");
    assert_eq!(config.manifest, default_manifest());
    assert!(config.database.is_none());
  }

  #[test]
  fn test_explicit_manifest() {
    let config = Config::from_yaml(
      "origin: https://devcard.example/\nmanifest:\n  - /\n  - /index.html\ndatabase: /tmp/dc.db\n",
    )
    .unwrap();
    assert_eq!(config.manifest, vec!["/", "/index.html"]);
    assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/dc.db"));
  }

  #[test]
  fn test_validate_rejects_bad_origin() {
    let config = Config {
      origin: "not a url".to_string(),
      ..Config::default()
    };
    assert!(config.validate().is_err());

    let config = Config {
      cache_name: " ".to_string(),
      ..Config::default()
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/devcard-shell.yaml"))).is_err());
  }
}
